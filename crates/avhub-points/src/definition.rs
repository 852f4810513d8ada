//! [`PointDefinition`] – the immutable schema of one point.

use avhub_types::{DefinitionError, PointType, Value};

/// Schema of a single point, created once at load time.
///
/// Absent optional fields are `None` (or an empty `aux` list) rather than a
/// zero value, so the definition can be written back out exactly as it was
/// read.
#[derive(Debug, Clone, PartialEq)]
pub struct PointDefinition {
    pub key: String,
    pub description: String,
    pub point_type: PointType,
    /// Lower bound; numeric types only.
    pub min: Option<Value>,
    /// Upper bound; numeric types only.
    pub max: Option<Value>,
    pub units: Option<String>,
    pub initial: Option<Value>,
    /// Minimum delta that triggers a change notification.
    pub tolerance: Option<f64>,
    /// Adapter-specific parameters, in source order.
    pub aux: Vec<String>,
}

impl PointDefinition {
    /// A definition with only the mandatory fields populated.
    pub fn new(key: impl Into<String>, description: impl Into<String>, point_type: PointType) -> Self {
        Self {
            key: key.into(),
            description: description.into(),
            point_type,
            min: None,
            max: None,
            units: None,
            initial: None,
            tolerance: None,
            aux: Vec::new(),
        }
    }

    /// Value the store seeds this point with.
    ///
    /// The declared initial when present, otherwise the type's zero pulled
    /// inside the bounds.
    pub fn seed_value(&self) -> Value {
        if let Some(initial) = &self.initial {
            return initial.clone();
        }
        let zero = self.point_type.zero();
        match (&zero, &self.min, &self.max) {
            (Value::Integer(z), Some(Value::Integer(lo)), _) if z < lo => Value::Integer(*lo),
            (Value::Integer(z), _, Some(Value::Integer(hi))) if z > hi => Value::Integer(*hi),
            (Value::Float(z), Some(Value::Float(lo)), _) if z < lo => Value::Float(*lo),
            (Value::Float(z), _, Some(Value::Float(hi))) if z > hi => Value::Float(*hi),
            _ => zero,
        }
    }

    /// Check the per-definition invariants.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError::Invariant`] naming the first violated rule.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        let fail = |details: String| DefinitionError::Invariant {
            key: self.key.clone(),
            details,
        };

        if self.key.is_empty() {
            return Err(fail("key is empty".to_string()));
        }
        if self.key.chars().any(|c| c == ':' || c.is_whitespace()) {
            return Err(fail("key contains ':' or whitespace".to_string()));
        }

        for (field, value) in [("min", &self.min), ("max", &self.max)] {
            if value.is_some() && !self.point_type.is_numeric() {
                return Err(fail(format!(
                    "{field} is not meaningful for {} points",
                    self.point_type
                )));
            }
        }
        for (field, value) in [("min", &self.min), ("max", &self.max), ("initial", &self.initial)] {
            if let Some(value) = value
                && value.point_type() != self.point_type
            {
                return Err(fail(format!(
                    "{field} {value} is not a {} value",
                    self.point_type
                )));
            }
            if let Some(Value::Float(v)) = value
                && !v.is_finite()
            {
                return Err(fail(format!("{field} must be finite")));
            }
        }

        let lo = self.min.as_ref().and_then(Value::as_f64);
        let hi = self.max.as_ref().and_then(Value::as_f64);
        if let (Some(lo), Some(hi)) = (lo, hi)
            && lo > hi
        {
            return Err(fail(format!("min {lo} exceeds max {hi}")));
        }
        if let Some(initial) = self.initial.as_ref().and_then(Value::as_f64) {
            if lo.is_some_and(|lo| initial < lo) || hi.is_some_and(|hi| initial > hi) {
                return Err(fail(format!("initial {initial} lies outside [min, max]")));
            }
        }

        if let Some(tolerance) = self.tolerance
            && (!tolerance.is_finite() || tolerance < 0.0)
        {
            return Err(fail(format!("tolerance {tolerance} must be a non-negative number")));
        }
        Ok(())
    }
}

/// A `name = integer` assignment from the definition header.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize, schemars::JsonSchema)]
pub struct HeaderConstant {
    pub name: String,
    pub value: i64,
}

/// Loader output: header constants and point definitions, both in source
/// order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DefinitionSet {
    pub constants: Vec<HeaderConstant>,
    pub points: Vec<PointDefinition>,
}

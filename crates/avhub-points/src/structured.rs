//! Structured, field-named representation of a definition set.
//!
//! [`StructuredDefinitions`] is the serde view of a [`DefinitionSet`]: one
//! table per point with explicit field names, absent fields skipped. It is
//! bijective with the text source for every populated field, so either form
//! can be used as the canonical point list.
//!
//! ```toml
//! [[constants]]
//! name = "BUS_RATE"
//! value = 500
//!
//! [[points]]
//! key = "ALT"
//! description = "Altitude"
//! type = "float"
//! min = -1000.0
//! max = 50000.0
//! units = "ft"
//! initial = 0.0
//! ```

use std::collections::HashSet;

use avhub_types::{DefinitionError, HubError, PointType, Value};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::definition::{DefinitionSet, HeaderConstant, PointDefinition};

/// One point in structured form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StructuredPoint {
    pub key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(rename = "type")]
    pub point_type: PointType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerance: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aux: Vec<String>,
}

/// A complete definition set in structured form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StructuredDefinitions {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constants: Vec<HeaderConstant>,
    #[serde(default)]
    pub points: Vec<StructuredPoint>,
}

impl StructuredDefinitions {
    /// JSON schema of the structured form, for external tooling.
    pub fn json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(StructuredDefinitions)
    }

    pub fn from_toml(text: &str) -> Result<Self, HubError> {
        toml::from_str(text).map_err(|e| HubError::Serialization(e.to_string()))
    }

    pub fn to_toml(&self) -> Result<String, HubError> {
        toml::to_string_pretty(self).map_err(|e| HubError::Serialization(e.to_string()))
    }

    pub fn from_json(text: &str) -> Result<Self, HubError> {
        serde_json::from_str(text).map_err(|e| HubError::Serialization(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, HubError> {
        serde_json::to_string_pretty(self).map_err(|e| HubError::Serialization(e.to_string()))
    }
}

impl From<&PointDefinition> for StructuredPoint {
    fn from(def: &PointDefinition) -> Self {
        Self {
            key: def.key.clone(),
            description: def.description.clone(),
            point_type: def.point_type,
            min: def.min.clone(),
            max: def.max.clone(),
            units: def.units.clone(),
            initial: def.initial.clone(),
            tolerance: def.tolerance,
            aux: def.aux.clone(),
        }
    }
}

impl From<&DefinitionSet> for StructuredDefinitions {
    fn from(set: &DefinitionSet) -> Self {
        Self {
            constants: set.constants.clone(),
            points: set.points.iter().map(StructuredPoint::from).collect(),
        }
    }
}

impl TryFrom<StructuredPoint> for PointDefinition {
    type Error = DefinitionError;

    /// Numeric fields are normalised to the declared type (TOML and JSON do
    /// not distinguish `-1000` from `-1000.0` the way the type does).
    fn try_from(point: StructuredPoint) -> Result<Self, Self::Error> {
        let key = point.key.clone();
        let ty = point.point_type;
        let def = PointDefinition {
            min: normalise(&key, "min", ty, point.min)?,
            max: normalise(&key, "max", ty, point.max)?,
            initial: normalise(&key, "initial", ty, point.initial)?,
            key: point.key,
            description: point.description,
            point_type: ty,
            units: point.units.filter(|u| !u.is_empty()),
            tolerance: point.tolerance,
            aux: point.aux.into_iter().filter(|a| !a.is_empty()).collect(),
        };
        def.validate()?;
        Ok(def)
    }
}

impl TryFrom<StructuredDefinitions> for DefinitionSet {
    type Error = DefinitionError;

    fn try_from(structured: StructuredDefinitions) -> Result<Self, Self::Error> {
        let mut seen = HashSet::new();
        let mut points = Vec::with_capacity(structured.points.len());
        for point in structured.points {
            let def = PointDefinition::try_from(point)?;
            if !seen.insert(def.key.clone()) {
                return Err(DefinitionError::DuplicateKey { key: def.key });
            }
            points.push(def);
        }
        Ok(DefinitionSet {
            constants: structured.constants,
            points,
        })
    }
}

fn normalise(
    key: &str,
    field: &str,
    ty: PointType,
    value: Option<Value>,
) -> Result<Option<Value>, DefinitionError> {
    let Some(value) = value else {
        return Ok(None);
    };
    let normalised = match (ty, value) {
        (PointType::Float, Value::Integer(v)) => Value::Float(v as f64),
        (PointType::Integer, Value::Float(v)) if v.fract() == 0.0 && v.abs() < i64::MAX as f64 => {
            Value::Integer(v as i64)
        }
        (ty, value) if value.point_type() == ty => value,
        (ty, value) => {
            return Err(DefinitionError::Invariant {
                key: key.to_string(),
                details: format!("{field} {value} is not a {ty} value"),
            });
        }
    };
    Ok(Some(normalised))
}

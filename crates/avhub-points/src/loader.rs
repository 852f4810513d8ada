//! Definition source parser and renderer.
//!
//! # Source format
//!
//! ```text
//! # header: integer constants
//! BUS_RATE = 500
//! ---
//! # key:description:type:min:max:units:initial:tolerance:aux
//! ALT:Altitude:float:-1000:50000:ft:0.0::
//! GEAR:Gear down:bool::::1::
//! ```
//!
//! Blank lines and `#` comments are skipped in both sections. Without a
//! separator line the whole source is treated as the body. Every record must
//! carry exactly nine fields; trailing fields may be empty.
//!
//! Parsing is all-or-nothing: the first malformed record aborts the load with
//! a [`DefinitionError`].

use std::collections::HashSet;

use avhub_types::{DefinitionError, PointType, Value};
use tracing::debug;

use crate::definition::{DefinitionSet, HeaderConstant, PointDefinition};

const FIELD_COUNT: usize = 9;

/// Parse a complete definition source.
///
/// # Errors
///
/// Returns the first [`DefinitionError`] found; nothing is returned for a
/// partially valid source.
pub fn parse_source(source: &str) -> Result<DefinitionSet, DefinitionError> {
    let lines: Vec<(usize, &str)> = source
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .collect();

    let separator = lines.iter().position(|(_, line)| is_separator(line));
    let (header, body) = match separator {
        Some(at) => (&lines[..at], &lines[at + 1..]),
        None => (&lines[..0], &lines[..]),
    };

    let mut set = DefinitionSet::default();

    for &(number, line) in header.iter().filter(|(_, l)| !is_skippable(l)) {
        set.constants.push(parse_constant(number, line)?);
    }

    let mut seen = HashSet::new();
    for &(number, line) in body.iter().filter(|(_, l)| !is_skippable(l)) {
        let point = parse_record(number, line)?;
        if !seen.insert(point.key.clone()) {
            return Err(DefinitionError::DuplicateKey { key: point.key });
        }
        point.validate()?;
        set.points.push(point);
    }

    debug!(
        constants = set.constants.len(),
        points = set.points.len(),
        "definition source parsed"
    );
    Ok(set)
}

/// Render a definition set back to source text.
///
/// Absent fields become empty fields, so `parse_source(render_source(s))`
/// reproduces `s`.
///
/// # Errors
///
/// Returns [`DefinitionError::Invariant`] when a field contains a character
/// the text format cannot carry (`:` or a line break; `,` inside an aux
/// entry).
pub fn render_source(set: &DefinitionSet) -> Result<String, DefinitionError> {
    let mut out = String::new();
    for constant in &set.constants {
        out.push_str(&format!("{} = {}\n", constant.name, constant.value));
    }
    out.push_str("---\n");

    for point in &set.points {
        check_renderable(point)?;
        let fields = [
            point.key.clone(),
            point.description.clone(),
            point.point_type.as_str().to_string(),
            render_opt(&point.min),
            render_opt(&point.max),
            point.units.clone().unwrap_or_default(),
            render_opt(&point.initial),
            point.tolerance.map(|t| t.to_string()).unwrap_or_default(),
            point.aux.join(","),
        ];
        out.push_str(&fields.join(":"));
        out.push('\n');
    }
    Ok(out)
}

// ────────────────────────────────────────────────────────────────────────────
// Internal helpers
// ────────────────────────────────────────────────────────────────────────────

fn is_separator(line: &str) -> bool {
    line.len() >= 3 && line.chars().all(|c| c == '-')
}

fn is_skippable(line: &str) -> bool {
    line.is_empty() || line.starts_with('#')
}

fn parse_constant(line: usize, text: &str) -> Result<HeaderConstant, DefinitionError> {
    let malformed = || DefinitionError::Header {
        line,
        text: text.to_string(),
    };
    let (name, value) = text.split_once('=').ok_or_else(malformed)?;
    let name = name.trim();
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(malformed());
    }
    let value = value.trim().parse::<i64>().map_err(|_| malformed())?;
    Ok(HeaderConstant {
        name: name.to_string(),
        value,
    })
}

fn parse_record(line: usize, text: &str) -> Result<PointDefinition, DefinitionError> {
    let fields: Vec<&str> = text.split(':').map(str::trim).collect();
    if fields.len() != FIELD_COUNT {
        return Err(DefinitionError::FieldCount {
            line,
            found: fields.len(),
        });
    }

    let key = fields[0];
    if key.is_empty() {
        return Err(DefinitionError::EmptyKey { line });
    }
    let point_type = PointType::parse(fields[2]).ok_or_else(|| DefinitionError::UnknownType {
        line,
        token: fields[2].to_string(),
    })?;

    let (min, max) = if point_type.is_numeric() {
        (
            parse_number(line, "min", fields[3], point_type)?,
            parse_number(line, "max", fields[4], point_type)?,
        )
    } else {
        (None, None)
    };

    let initial = match point_type {
        PointType::Integer | PointType::Float => parse_number(line, "initial", fields[6], point_type)?,
        PointType::Boolean => parse_bool(line, fields[6])?,
        PointType::String => non_empty(fields[6]).map(|s| Value::Text(s.to_string())),
    };

    Ok(PointDefinition {
        key: key.to_string(),
        description: fields[1].to_string(),
        point_type,
        min,
        max,
        units: non_empty(fields[5]).map(str::to_string),
        initial,
        tolerance: parse_tolerance(fields[7]),
        aux: fields[8]
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
    })
}

fn parse_number(
    line: usize,
    field: &'static str,
    raw: &str,
    point_type: PointType,
) -> Result<Option<Value>, DefinitionError> {
    let Some(raw) = non_empty(raw) else {
        return Ok(None);
    };
    let invalid = || DefinitionError::InvalidNumber {
        line,
        field,
        value: raw.to_string(),
    };
    let value = match point_type {
        PointType::Integer => Value::Integer(raw.parse().map_err(|_| invalid())?),
        _ => {
            let v: f64 = raw.parse().map_err(|_| invalid())?;
            if !v.is_finite() {
                return Err(invalid());
            }
            Value::Float(v)
        }
    };
    Ok(Some(value))
}

fn parse_bool(line: usize, raw: &str) -> Result<Option<Value>, DefinitionError> {
    let Some(raw) = non_empty(raw) else {
        return Ok(None);
    };
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(Some(Value::Boolean(true))),
        "false" | "0" => Ok(Some(Value::Boolean(false))),
        _ => Err(DefinitionError::InvalidNumber {
            line,
            field: "initial",
            value: raw.to_string(),
        }),
    }
}

/// Unparsable tolerances are dropped, never defaulted. Negative values are
/// kept so that validation rejects them.
fn parse_tolerance(raw: &str) -> Option<f64> {
    non_empty(raw)
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|t| t.is_finite())
}

fn non_empty(raw: &str) -> Option<&str> {
    (!raw.is_empty()).then_some(raw)
}

fn render_opt(value: &Option<Value>) -> String {
    value.as_ref().map(Value::to_string).unwrap_or_default()
}

fn check_renderable(point: &PointDefinition) -> Result<(), DefinitionError> {
    let unsafe_text = |s: &str| s.contains(':') || s.contains('\n') || s.contains('\r');
    let mut texts = vec![point.key.as_str(), point.description.as_str()];
    if let Some(units) = &point.units {
        texts.push(units);
    }
    if let Some(Value::Text(initial)) = &point.initial {
        texts.push(initial);
    }
    let bad_field = texts.into_iter().any(unsafe_text);
    let bad_aux = point.aux.iter().any(|a| unsafe_text(a) || a.contains(','));
    if bad_field || bad_aux {
        return Err(DefinitionError::Invariant {
            key: point.key.clone(),
            details: "field contains a character the text format cannot carry".to_string(),
        });
    }
    Ok(())
}

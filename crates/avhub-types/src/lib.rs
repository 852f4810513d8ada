//! `avhub-types` – shared vocabulary of the avionics hub.
//!
//! Every other crate in the workspace speaks in these types: the closed set
//! of [`PointType`]s, the tagged [`Value`] they carry, the [`Quality`] flag a
//! stored value is tagged with, the canonical bus [`Frame`], and the two error
//! enums ([`DefinitionError`] for load time, [`HubError`] for everything else).

pub mod frame;
pub mod value;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use frame::{Frame, MAX_FRAME_LEN};
pub use value::{PointType, Value};

/// Validity flag attached to every stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    /// Seeded from the definition; no adapter has written the point yet.
    Initial,
    /// Last write was stored as given.
    Good,
    /// Last write was outside the declared bounds and was clamped.
    Clamped,
    /// An adapter reported that its source for this point went away.
    Invalid,
}

impl Quality {
    /// `true` for every quality an adapter may act on.
    pub fn is_valid(self) -> bool {
        !matches!(self, Quality::Invalid)
    }
}

/// Fatal problems found while building the point registry.
///
/// Any of these aborts startup: adapters assume a complete, consistent point
/// set before the first one runs.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DefinitionError {
    #[error("line {line}: expected 9 colon-separated fields, found {found}")]
    FieldCount { line: usize, found: usize },

    #[error("line {line}: point key is empty")]
    EmptyKey { line: usize },

    #[error("line {line}: unknown point type '{token}'")]
    UnknownType { line: usize, token: String },

    #[error("line {line}: field '{field}' has unparsable value '{value}'")]
    InvalidNumber {
        line: usize,
        field: &'static str,
        value: String,
    },

    #[error("line {line}: malformed header constant '{text}'")]
    Header { line: usize, text: String },

    #[error("duplicate point key '{key}'")]
    DuplicateKey { key: String },

    #[error("point '{key}': {details}")]
    Invariant { key: String, details: String },
}

/// Global error type for registry lookups, value-store writes, plugin
/// lifecycle and configuration.
#[derive(Error, Debug)]
pub enum HubError {
    #[error("point not found: {0}")]
    NotFound(String),

    #[error("type mismatch on '{key}': expected {expected}, got {found}")]
    TypeMismatch {
        key: String,
        expected: PointType,
        found: PointType,
    },

    #[error("invalid value for '{key}': {details}")]
    InvalidValue { key: String, details: String },

    #[error("write to '{0}' from its own change cascade")]
    ReentrantWrite(String),

    #[error("definition error: {0}")]
    Definition(#[from] DefinitionError),

    #[error("frame payload of {len} bytes exceeds the {max}-byte limit")]
    FrameTooLong { len: usize, max: usize },

    #[error("unknown plugin kind: {0}")]
    UnknownPluginKind(String),

    #[error("duplicate plugin name: {0}")]
    DuplicatePlugin(String),

    #[error("option '{option}': {details}")]
    InvalidOption { option: String, details: String },

    #[error("plugin '{plugin}' cannot {operation} while {state}")]
    InvalidState {
        plugin: String,
        operation: &'static str,
        state: String,
    },

    #[error("runtime unavailable: {0}")]
    Runtime(String),

    #[error("telemetry parse error: {0}")]
    Parsing(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

//! [`PluginOptions`] – opaque per-instance configuration.
//!
//! The hub core never interprets options; each adapter constructor pulls the
//! keys it understands through the typed getters below, which report
//! problems as [`HubError::InvalidOption`].

use std::collections::BTreeMap;

use avhub_types::HubError;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// Key/value options from a `[plugins.options]` table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PluginOptions(BTreeMap<String, Json>);

impl PluginOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, mostly for tests and programmatic setups.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Json>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Json> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Result<Option<&str>, HubError> {
        match self.0.get(key) {
            None => Ok(None),
            Some(Json::String(s)) => Ok(Some(s.as_str())),
            Some(other) => Err(invalid(key, format!("expected a string, got {other}"))),
        }
    }

    pub fn require_str(&self, key: &str) -> Result<&str, HubError> {
        self.get_str(key)?
            .ok_or_else(|| invalid(key, "is required".to_string()))
    }

    pub fn get_f64(&self, key: &str) -> Result<Option<f64>, HubError> {
        match self.0.get(key) {
            None => Ok(None),
            Some(v) => v
                .as_f64()
                .map(Some)
                .ok_or_else(|| invalid(key, format!("expected a number, got {v}"))),
        }
    }

    pub fn get_u64(&self, key: &str) -> Result<Option<u64>, HubError> {
        match self.0.get(key) {
            None => Ok(None),
            Some(v) => v
                .as_u64()
                .map(Some)
                .ok_or_else(|| invalid(key, format!("expected a non-negative integer, got {v}"))),
        }
    }

    /// A list of strings; a single string is accepted as a one-element list.
    pub fn get_str_list(&self, key: &str) -> Result<Vec<String>, HubError> {
        match self.0.get(key) {
            None => Ok(Vec::new()),
            Some(Json::String(s)) => Ok(vec![s.clone()]),
            Some(Json::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| invalid(key, format!("list entry {item} is not a string")))
                })
                .collect(),
            Some(other) => Err(invalid(key, format!("expected a list of strings, got {other}"))),
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn invalid(option: &str, details: String) -> HubError {
    HubError::InvalidOption {
        option: option.to_string(),
        details,
    }
}

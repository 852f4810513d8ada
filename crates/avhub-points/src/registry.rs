//! [`PointRegistry`] – the finalized, immutable point set.
//!
//! Built exactly once at startup from a [`DefinitionSet`]; there is no
//! hot-reload. Every point gets a stable slot index (its position in the
//! source) which the value store uses to address its per-point state.

use std::collections::HashMap;
use std::path::Path;

use avhub_types::{DefinitionError, HubError};
use tracing::info;

use crate::definition::{DefinitionSet, HeaderConstant, PointDefinition};
use crate::loader::parse_source;
use crate::structured::StructuredDefinitions;

/// Read-only lookup over all point definitions.
#[derive(Debug, Clone)]
pub struct PointRegistry {
    points: Vec<PointDefinition>,
    index: HashMap<String, usize>,
    constants: Vec<HeaderConstant>,
}

impl PointRegistry {
    /// Finalize a definition set.
    ///
    /// Every definition is validated again here so that sets assembled in
    /// code get the same guarantees as loaded ones.
    ///
    /// # Errors
    ///
    /// Returns the first invariant violation or duplicate key.
    pub fn new(set: DefinitionSet) -> Result<Self, DefinitionError> {
        let mut index = HashMap::with_capacity(set.points.len());
        for (slot, point) in set.points.iter().enumerate() {
            point.validate()?;
            if index.insert(point.key.clone(), slot).is_some() {
                return Err(DefinitionError::DuplicateKey {
                    key: point.key.clone(),
                });
            }
        }
        Ok(Self {
            points: set.points,
            index,
            constants: set.constants,
        })
    }

    /// Parse a text definition source and finalize it.
    pub fn from_source(source: &str) -> Result<Self, DefinitionError> {
        Self::new(parse_source(source)?)
    }

    /// Load definitions from a file.
    ///
    /// `.toml` and `.json` files are read as the structured form; anything
    /// else as the text source format.
    pub fn load(path: &Path) -> Result<Self, HubError> {
        let text = std::fs::read_to_string(path)?;
        let set = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => DefinitionSet::try_from(StructuredDefinitions::from_toml(&text)?)?,
            Some("json") => DefinitionSet::try_from(StructuredDefinitions::from_json(&text)?)?,
            _ => parse_source(&text)?,
        };
        let registry = Self::new(set)?;
        info!(
            path = %path.display(),
            points = registry.len(),
            constants = registry.constants.len(),
            "point registry loaded"
        );
        Ok(registry)
    }

    /// Look up a definition by key.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] for undefined keys.
    pub fn definition(&self, key: &str) -> Result<&PointDefinition, HubError> {
        self.lookup(key).map(|(_, def)| def)
    }

    /// Slot index of `key`.
    pub fn index_of(&self, key: &str) -> Result<usize, HubError> {
        self.index
            .get(key)
            .copied()
            .ok_or_else(|| HubError::NotFound(key.to_string()))
    }

    /// Slot index and definition of `key` in one lookup.
    pub fn lookup(&self, key: &str) -> Result<(usize, &PointDefinition), HubError> {
        let slot = self.index_of(key)?;
        Ok((slot, &self.points[slot]))
    }

    pub fn get(&self, slot: usize) -> Option<&PointDefinition> {
        self.points.get(slot)
    }

    /// Keys in definition order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.points.iter().map(|p| p.key.as_str())
    }

    /// Definitions in definition order.
    pub fn iter(&self) -> std::slice::Iter<'_, PointDefinition> {
        self.points.iter()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Value of a header constant.
    pub fn constant(&self, name: &str) -> Option<i64> {
        self.constants
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.value)
    }

    pub fn constants(&self) -> &[HeaderConstant] {
        &self.constants
    }

    /// Copy of the registry contents, e.g. for export in structured form.
    pub fn to_definition_set(&self) -> DefinitionSet {
        DefinitionSet {
            constants: self.constants.clone(),
            points: self.points.clone(),
        }
    }
}

//! `avhub-points` – point definitions and the registry built from them.
//!
//! # Modules
//!
//! - [`definition`] – [`PointDefinition`], the immutable schema of one point,
//!   and its invariants.
//! - [`loader`] – the colon-delimited text source: [`parse_source`] and its
//!   inverse [`render_source`].
//! - [`structured`] – the field-named serde form ([`StructuredDefinitions`]),
//!   bijective with the text source.
//! - [`registry`] – [`PointRegistry`], the finalized read-only lookup every
//!   adapter relies on.

pub mod definition;
pub mod loader;
pub mod registry;
pub mod structured;

pub use definition::{DefinitionSet, HeaderConstant, PointDefinition};
pub use loader::{parse_source, render_source};
pub use registry::PointRegistry;
pub use structured::{StructuredDefinitions, StructuredPoint};

//! [`PluginCatalog`] – the registry of adapter kinds.
//!
//! Adapters are never discovered at runtime. Every kind is registered here
//! under a name with a constructor, and configuration names the kind it
//! wants.

use std::collections::BTreeMap;

use avhub_types::HubError;
use tracing::debug;

use crate::adapter::Adapter;
use crate::lifecycle::Plugin;
use crate::log_sink::LogSink;
use crate::options::PluginOptions;
use crate::{bus_trace, simulator, udp_telemetry};

/// Builds a fresh adapter instance from its options.
pub type AdapterFactory = fn(&PluginOptions) -> Result<Box<dyn Adapter>, HubError>;

/// Kind name → constructor.
#[derive(Clone, Default)]
pub struct PluginCatalog {
    factories: BTreeMap<String, AdapterFactory>,
}

impl PluginCatalog {
    /// An empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// A catalog with the built-in kinds registered.
    pub fn with_builtins() -> Self {
        let mut catalog = Self::new();
        catalog.register(simulator::KIND, simulator::factory);
        catalog.register(udp_telemetry::KIND, udp_telemetry::factory);
        catalog.register(bus_trace::KIND, bus_trace::factory);
        catalog
    }

    /// Register (or replace) a kind.
    pub fn register(&mut self, kind: impl Into<String>, factory: AdapterFactory) {
        self.factories.insert(kind.into(), factory);
    }

    /// Registered kind names, sorted.
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Build a `Created` plugin of `kind` named `name`.
    ///
    /// `log` replaces the default sink ([`LogSink::for_plugin`]) when given.
    ///
    /// # Errors
    ///
    /// [`HubError::UnknownPluginKind`] for unregistered kinds, or whatever the
    /// constructor reports for bad options.
    pub fn configure(
        &self,
        kind: &str,
        name: &str,
        options: &PluginOptions,
        log: Option<LogSink>,
    ) -> Result<Plugin, HubError> {
        let factory = self
            .factories
            .get(kind)
            .ok_or_else(|| HubError::UnknownPluginKind(kind.to_string()))?;
        let adapter = factory(options)?;
        debug!(plugin = name, kind, options = options.len(), "plugin configured");
        let log = log.unwrap_or_else(|| LogSink::for_plugin(name));
        Ok(Plugin::new(name, kind, adapter, log))
    }
}

//! [`PluginManager`] – all configured plugins of one hub, in configuration
//! order. Starts in order, stops in reverse order.

use std::sync::Arc;
use std::time::Duration;

use avhub_store::ValueStore;
use avhub_types::HubError;
use tracing::info;

use crate::catalog::PluginCatalog;
use crate::lifecycle::{LifecycleState, Plugin, StopOutcome};
use crate::log_sink::LogSink;
use crate::options::PluginOptions;

pub struct PluginManager {
    plugins: Vec<Plugin>,
    stop_timeout: Duration,
}

impl PluginManager {
    pub fn new(stop_timeout: Duration) -> Self {
        Self {
            plugins: Vec::new(),
            stop_timeout,
        }
    }

    /// Add a configured plugin.
    ///
    /// # Errors
    ///
    /// [`HubError::DuplicatePlugin`] if the name is taken.
    pub fn add(&mut self, plugin: Plugin) -> Result<(), HubError> {
        if self.get(plugin.name()).is_some() {
            return Err(HubError::DuplicatePlugin(plugin.name().to_string()));
        }
        self.plugins.push(plugin);
        Ok(())
    }

    /// Configure a plugin from `catalog` and add it.
    pub fn configure(
        &mut self,
        catalog: &PluginCatalog,
        kind: &str,
        name: &str,
        options: &PluginOptions,
        log: Option<LogSink>,
    ) -> Result<(), HubError> {
        if self.get(name).is_some() {
            return Err(HubError::DuplicatePlugin(name.to_string()));
        }
        let plugin = catalog.configure(kind, name, options, log)?;
        self.add(plugin)
    }

    pub fn get(&self, name: &str) -> Option<&Plugin> {
        self.plugins.iter().find(|p| p.name() == name)
    }

    /// Start every `Created` plugin in configuration order.
    ///
    /// Returns the number started. Stops at the first error; plugins already
    /// running keep running until [`stop_all`][Self::stop_all].
    pub fn start_all(&mut self, store: &Arc<ValueStore>) -> Result<usize, HubError> {
        let mut started = 0;
        for plugin in &mut self.plugins {
            if plugin.state() == LifecycleState::Created {
                plugin.run(Arc::clone(store))?;
                started += 1;
            }
        }
        info!(started, total = self.plugins.len(), "plugins started");
        Ok(started)
    }

    /// Stop every plugin in reverse configuration order.
    pub async fn stop_all(&mut self) -> Vec<(String, StopOutcome)> {
        let mut outcomes = Vec::with_capacity(self.plugins.len());
        for plugin in self.plugins.iter_mut().rev() {
            let outcome = plugin.stop(self.stop_timeout).await;
            outcomes.push((plugin.name().to_string(), outcome));
        }
        outcomes
    }

    /// `(name, kind, state)` of every plugin, in configuration order.
    pub fn states(&self) -> Vec<(&str, &str, LifecycleState)> {
        self.plugins
            .iter()
            .map(|p| (p.name(), p.kind(), p.state()))
            .collect()
    }

    pub fn stop_timeout(&self) -> Duration {
        self.stop_timeout
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{Adapter, AdapterContext};
    use async_trait::async_trait;
    use avhub_points::PointRegistry;
    use parking_lot::Mutex;

    /// Records its name into a shared journal when it sees the stop signal.
    struct Journaled {
        journal: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Adapter for Journaled {
        async fn run(&mut self, mut ctx: AdapterContext) -> Result<(), HubError> {
            ctx.stop.stopped().await;
            self.journal.lock().push(ctx.name.clone());
            Ok(())
        }
    }

    fn store() -> Arc<ValueStore> {
        let registry = PointRegistry::from_source("---\nALT:Altitude:float:::ft:0::\n").unwrap();
        Arc::new(ValueStore::new(Arc::new(registry)))
    }

    fn journaled(name: &str, journal: &Arc<Mutex<Vec<String>>>) -> Plugin {
        let adapter = Journaled {
            journal: Arc::clone(journal),
        };
        Plugin::new(name, "journaled", Box::new(adapter), LogSink::discard())
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut manager = PluginManager::new(Duration::from_secs(1));
        manager.add(journaled("a", &journal)).unwrap();
        assert!(matches!(
            manager.add(journaled("a", &journal)),
            Err(HubError::DuplicatePlugin(name)) if name == "a"
        ));

        let catalog = PluginCatalog::with_builtins();
        let opts = PluginOptions::new().with("point", "ALT");
        assert!(manager.configure(&catalog, "simulator", "a", &opts, None).is_err());
        manager.configure(&catalog, "simulator", "sim", &opts, None).unwrap();
        assert_eq!(manager.len(), 2);
    }

    #[tokio::test]
    async fn starts_in_order_and_stops_in_reverse() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut manager = PluginManager::new(Duration::from_secs(1));
        for name in ["first", "second", "third"] {
            manager.add(journaled(name, &journal)).unwrap();
        }

        assert_eq!(manager.start_all(&store()).unwrap(), 3);
        assert!(
            manager
                .states()
                .iter()
                .all(|(_, _, state)| *state == LifecycleState::Running)
        );

        let outcomes = manager.stop_all().await;
        let names: Vec<&str> = outcomes.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["third", "second", "first"]);
        assert!(outcomes.iter().all(|(_, o)| *o == StopOutcome::Cooperative));
        assert_eq!(*journal.lock(), ["third", "second", "first"]);
        assert_eq!(
            manager.states().iter().map(|(n, _, _)| *n).collect::<Vec<_>>(),
            ["first", "second", "third"]
        );
    }

    #[tokio::test]
    async fn built_in_simulator_runs_under_the_manager() {
        let store = store();
        let mut manager = PluginManager::new(Duration::from_millis(500));
        manager
            .configure(
                &PluginCatalog::with_builtins(),
                "simulator",
                "sim",
                &PluginOptions::new()
                    .with("point", "ALT")
                    .with("period_ms", 5)
                    .with("offset", 1000.0),
                Some(LogSink::discard()),
            )
            .unwrap();
        manager.start_all(&store).unwrap();

        for _ in 0..200 {
            if store.read("ALT").unwrap().value.as_f64().unwrap_or_default() > 0.0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(store.read("ALT").unwrap().value.as_f64().unwrap() > 0.0);

        let outcomes = manager.stop_all().await;
        assert_eq!(outcomes, [("sim".to_string(), StopOutcome::Cooperative)]);
    }
}

//! [`Plugin`] – one configured adapter instance and its lifecycle.
//!
//! ```text
//! Created ──run──▶ Running ──stop / adapter returns / adapter fails──▶ Stopped
//!    └──────────────────────stop──────────────────────────────────────▶┘
//! ```
//!
//! `run` spawns the adapter on its own Tokio task. `stop` first trips the
//! adapter's [`StopSignal`] and waits up to the timeout for it to return; if
//! it does not, the task is aborted and awaited for at most [`ABORT_GRACE`],
//! so an adapter parked at an await point is dropped, together with every
//! socket or file it owns, before `stop` returns. An adapter stuck in
//! blocking code never reaches an await point and cannot be dropped; `stop`
//! then gives up on it and reports [`StopOutcome::Detached`].

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use avhub_store::{ValueStore, panic_message};
use avhub_types::HubError;
use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use crate::adapter::{Adapter, AdapterContext, StopSignal};
use crate::log_sink::LogSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Created,
    Running,
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LifecycleState::Created => "created",
            LifecycleState::Running => "running",
            LifecycleState::Stopped => "stopped",
        })
    }
}

/// How long `stop` waits for an aborted task to be dropped.
pub const ABORT_GRACE: Duration = Duration::from_millis(250);

/// How a [`Plugin::stop`] call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The adapter returned within the timeout.
    Cooperative,
    /// The timeout elapsed and the task was aborted.
    Aborted,
    /// The task was aborted but kept its worker thread busy past
    /// [`ABORT_GRACE`]; it was left to finish on its own.
    Detached,
    /// The plugin was never started.
    NotStarted,
    /// The adapter had already finished (returned or failed).
    AlreadyStopped,
}

/// A configured adapter instance.
pub struct Plugin {
    name: String,
    kind: String,
    log: LogSink,
    state: Arc<Mutex<LifecycleState>>,
    adapter: Option<Box<dyn Adapter>>,
    stop_tx: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl Plugin {
    /// Wrap an adapter instance. Usually called through
    /// [`PluginCatalog::configure`][crate::PluginCatalog::configure].
    pub fn new(name: &str, kind: &str, adapter: Box<dyn Adapter>, log: LogSink) -> Self {
        Self {
            name: name.to_string(),
            kind: kind.to_string(),
            log,
            state: Arc::new(Mutex::new(LifecycleState::Created)),
            adapter: Some(adapter),
            stop_tx: None,
            task: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock()
    }

    /// Replace the log sink. Only allowed before `run`.
    pub fn set_log_sink(&mut self, log: LogSink) -> Result<(), HubError> {
        self.expect_created("replace the log sink")?;
        self.log = log;
        Ok(())
    }

    /// Start the adapter on its own task.
    ///
    /// # Errors
    ///
    /// [`HubError::InvalidState`] unless the plugin is `Created`;
    /// [`HubError::Runtime`] when called outside a Tokio runtime.
    pub fn run(&mut self, store: Arc<ValueStore>) -> Result<(), HubError> {
        self.expect_created("run")?;
        let runtime = Handle::try_current().map_err(|e| HubError::Runtime(e.to_string()))?;
        let Some(mut adapter) = self.adapter.take() else {
            return Err(self.invalid_state("run"));
        };

        let (stop_tx, stop) = StopSignal::channel();
        let ctx = AdapterContext {
            name: self.name.clone(),
            store,
            log: self.log.clone(),
            stop,
        };
        let name = self.name.clone();
        let log = self.log.clone();
        let state = Arc::clone(&self.state);
        let span = info_span!("plugin", plugin = %self.name, kind = %self.kind, run_id = %Uuid::new_v4());

        *self.state.lock() = LifecycleState::Running;
        let task = runtime.spawn(
            async move {
                let outcome = AssertUnwindSafe(adapter.run(ctx)).catch_unwind().await;
                match outcome {
                    Ok(Ok(())) => info!("adapter finished"),
                    Ok(Err(e)) => {
                        error!(plugin = %name, error = %e, "adapter failed");
                        log.log(&format!("failed: {e}"));
                    }
                    Err(panic) => {
                        let message = panic_message(panic.as_ref());
                        error!(plugin = %name, panic = %message, "adapter panicked");
                        log.log(&format!("panicked: {message}"));
                    }
                }
                *state.lock() = LifecycleState::Stopped;
            }
            .instrument(span),
        );

        self.stop_tx = Some(stop_tx);
        self.task = Some(task);
        info!(plugin = %self.name, kind = %self.kind, "plugin started");
        Ok(())
    }

    /// Stop the adapter, waiting at most `timeout` for it to cooperate.
    pub async fn stop(&mut self, timeout: Duration) -> StopOutcome {
        let Some(mut task) = self.task.take() else {
            let previous = std::mem::replace(&mut *self.state.lock(), LifecycleState::Stopped);
            self.adapter = None;
            return match previous {
                LifecycleState::Created => StopOutcome::NotStarted,
                _ => StopOutcome::AlreadyStopped,
            };
        };

        if task.is_finished() {
            let _ = task.await;
            self.stop_tx = None;
            return StopOutcome::AlreadyStopped;
        }

        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(true);
        }

        let outcome = match tokio::time::timeout(timeout, &mut task).await {
            Ok(_) => StopOutcome::Cooperative,
            Err(_) => {
                task.abort();
                match tokio::time::timeout(ABORT_GRACE, &mut task).await {
                    Ok(_) => {
                        warn!(plugin = %self.name, timeout_ms = timeout.as_millis() as u64, "adapter ignored stop, aborted");
                        self.log.log(&format!("aborted after {timeout:?}"));
                        StopOutcome::Aborted
                    }
                    Err(_) => {
                        error!(plugin = %self.name, "adapter is blocking its thread and cannot be aborted, detached");
                        self.log.log(&format!("detached: still blocking {:?} after abort", ABORT_GRACE));
                        StopOutcome::Detached
                    }
                }
            }
        };
        *self.state.lock() = LifecycleState::Stopped;
        info!(plugin = %self.name, outcome = ?outcome, "plugin stopped");
        outcome
    }

    fn expect_created(&self, operation: &'static str) -> Result<(), HubError> {
        if self.state() == LifecycleState::Created {
            Ok(())
        } else {
            Err(self.invalid_state(operation))
        }
    }

    fn invalid_state(&self, operation: &'static str) -> HubError {
        HubError::InvalidState {
            plugin: self.name.clone(),
            operation,
            state: self.state().to_string(),
        }
    }
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for Plugin {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use avhub_points::PointRegistry;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::net::UdpSocket;
    use tokio::sync::oneshot;
    use tokio::time::Instant;

    fn store() -> Arc<ValueStore> {
        let registry = PointRegistry::from_source("---\nALT:Altitude:float:::ft:0::\n").unwrap();
        Arc::new(ValueStore::new(Arc::new(registry)))
    }

    fn capture() -> (LogSink, Arc<Mutex<Vec<String>>>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let out = Arc::clone(&lines);
        (LogSink::new(move |m| out.lock().push(m.to_string())), lines)
    }

    async fn wait_for_state(plugin: &Plugin, state: LifecycleState) {
        for _ in 0..200 {
            if plugin.state() == state {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("plugin {} never reached {state}", plugin.name());
    }

    /// Waits for the stop signal, like a well-behaved adapter.
    struct Polite;

    #[async_trait]
    impl Adapter for Polite {
        async fn run(&mut self, mut ctx: AdapterContext) -> Result<(), HubError> {
            ctx.stop.stopped().await;
            Ok(())
        }
    }

    /// Blocks in a socket read and never looks at the stop signal.
    struct Deaf {
        addr: SocketAddr,
        bound: Option<oneshot::Sender<()>>,
    }

    #[async_trait]
    impl Adapter for Deaf {
        async fn run(&mut self, _ctx: AdapterContext) -> Result<(), HubError> {
            let socket = UdpSocket::bind(self.addr).await?;
            if let Some(bound) = self.bound.take() {
                let _ = bound.send(());
            }
            let mut buf = [0u8; 64];
            loop {
                socket.recv_from(&mut buf).await?;
            }
        }
    }

    struct Failing;

    #[async_trait]
    impl Adapter for Failing {
        async fn run(&mut self, _ctx: AdapterContext) -> Result<(), HubError> {
            Err(HubError::Runtime("link lost".to_string()))
        }
    }

    struct Panicking;

    #[async_trait]
    impl Adapter for Panicking {
        async fn run(&mut self, _ctx: AdapterContext) -> Result<(), HubError> {
            panic!("adapter bug");
        }
    }

    #[tokio::test]
    async fn cooperative_stop() {
        let mut plugin = Plugin::new("polite", "test", Box::new(Polite), LogSink::discard());
        assert_eq!(plugin.state(), LifecycleState::Created);
        plugin.run(store()).unwrap();
        assert_eq!(plugin.state(), LifecycleState::Running);

        assert_eq!(plugin.stop(Duration::from_secs(1)).await, StopOutcome::Cooperative);
        assert_eq!(plugin.state(), LifecycleState::Stopped);
        assert_eq!(plugin.stop(Duration::from_secs(1)).await, StopOutcome::AlreadyStopped);
    }

    #[tokio::test]
    async fn stop_aborts_an_adapter_blocked_in_io_and_releases_its_socket() {
        let addr = std::net::UdpSocket::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        let (bound_tx, bound_rx) = oneshot::channel();
        let deaf = Deaf {
            addr,
            bound: Some(bound_tx),
        };
        let (log, lines) = capture();
        let mut plugin = Plugin::new("deaf", "test", Box::new(deaf), log);
        plugin.run(store()).unwrap();
        tokio::time::timeout(Duration::from_secs(2), bound_rx)
            .await
            .unwrap()
            .unwrap();

        let timeout = Duration::from_millis(100);
        let started = Instant::now();
        let outcome = plugin.stop(timeout).await;
        let elapsed = started.elapsed();

        assert_eq!(outcome, StopOutcome::Aborted);
        assert!(elapsed >= timeout);
        assert!(elapsed < timeout + Duration::from_secs(1));
        assert_eq!(plugin.state(), LifecycleState::Stopped);
        assert!(lines.lock().iter().any(|l| l.starts_with("aborted")));

        // The adapter's socket is closed: the address can be bound again.
        std::net::UdpSocket::bind(addr).unwrap();
    }

    /// Sleeps on its worker thread without ever yielding, until released.
    struct Blocking {
        release: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Adapter for Blocking {
        async fn run(&mut self, _ctx: AdapterContext) -> Result<(), HubError> {
            while !self.release.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(10));
            }
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_is_bounded_for_an_adapter_blocking_its_thread() {
        let release = Arc::new(AtomicBool::new(false));
        let blocking = Blocking {
            release: Arc::clone(&release),
        };
        let (log, lines) = capture();
        let mut plugin = Plugin::new("serial", "test", Box::new(blocking), log);
        plugin.run(store()).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let timeout = Duration::from_millis(100);
        let started = Instant::now();
        let outcome = tokio::time::timeout(Duration::from_secs(3), plugin.stop(timeout))
            .await
            .expect("stop never returned");
        let elapsed = started.elapsed();
        release.store(true, Ordering::SeqCst);

        assert_eq!(outcome, StopOutcome::Detached);
        assert!(elapsed >= timeout + ABORT_GRACE);
        assert!(elapsed < timeout + ABORT_GRACE + Duration::from_secs(1));
        assert_eq!(plugin.state(), LifecycleState::Stopped);
        assert!(lines.lock().iter().any(|l| l.starts_with("detached")));
    }

    #[tokio::test]
    async fn adapter_failure_stops_only_that_plugin() {
        let (log, lines) = capture();
        let mut failing = Plugin::new("failing", "test", Box::new(Failing), log);
        let mut polite = Plugin::new("polite", "test", Box::new(Polite), LogSink::discard());
        let store = store();
        polite.run(Arc::clone(&store)).unwrap();
        failing.run(store).unwrap();

        wait_for_state(&failing, LifecycleState::Stopped).await;
        assert_eq!(polite.state(), LifecycleState::Running);
        assert_eq!(*lines.lock(), ["failed: runtime unavailable: link lost"]);

        assert_eq!(failing.stop(Duration::from_secs(1)).await, StopOutcome::AlreadyStopped);
        assert_eq!(polite.stop(Duration::from_secs(1)).await, StopOutcome::Cooperative);
    }

    #[tokio::test]
    async fn adapter_panic_is_contained() {
        let (log, lines) = capture();
        let mut plugin = Plugin::new("panicky", "test", Box::new(Panicking), log);
        plugin.run(store()).unwrap();
        wait_for_state(&plugin, LifecycleState::Stopped).await;
        assert_eq!(*lines.lock(), ["panicked: adapter bug"]);
    }

    #[tokio::test]
    async fn run_twice_is_rejected() {
        let mut plugin = Plugin::new("polite", "test", Box::new(Polite), LogSink::discard());
        plugin.run(store()).unwrap();
        assert!(matches!(
            plugin.run(store()),
            Err(HubError::InvalidState { operation: "run", .. })
        ));
        assert!(plugin.set_log_sink(LogSink::discard()).is_err());
        plugin.stop(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn stop_before_run() {
        let mut plugin = Plugin::new("idle", "test", Box::new(Polite), LogSink::discard());
        plugin.set_log_sink(LogSink::discard()).unwrap();
        assert_eq!(plugin.stop(Duration::from_secs(1)).await, StopOutcome::NotStarted);
        assert_eq!(plugin.state(), LifecycleState::Stopped);
        assert!(plugin.run(store()).is_err());
    }

    #[test]
    fn run_outside_a_runtime_is_an_error() {
        let mut plugin = Plugin::new("early", "test", Box::new(Polite), LogSink::discard());
        assert!(matches!(plugin.run(store()), Err(HubError::Runtime(_))));
        assert_eq!(plugin.state(), LifecycleState::Created);
    }
}

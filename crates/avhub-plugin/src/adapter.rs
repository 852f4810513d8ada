//! The adapter contract.
//!
//! An adapter bridges one external protocol to the hub. The hub never speaks
//! a protocol itself: adapters read from and write to the shared
//! [`ValueStore`] and subscribe to the keys they forward.
//!
//! - [`Adapter`] – the trait every adapter implements.
//! - [`AdapterContext`] – what a running adapter is handed: its instance
//!   name, the store, its [`LogSink`] and a [`StopSignal`].

use std::sync::Arc;

use async_trait::async_trait;
use avhub_store::ValueStore;
use avhub_types::HubError;
use tokio::sync::watch;

use crate::log_sink::LogSink;

/// Every protocol adapter implements this trait.
///
/// # Contract
///
/// * `run` executes until the adapter is done or `ctx.stop` fires. It should
///   select on [`StopSignal::stopped`] around every await that can block
///   indefinitely. An adapter that ignores the signal is aborted once the
///   stop timeout elapses.
/// * Blocking I/O (a serial port read, a synchronous driver call) belongs in
///   [`tokio::task::spawn_blocking`], with the blocking loop checking
///   [`StopSignal::is_stopped`] between reads. Abort only takes effect at an
///   await point: an adapter blocking its worker thread is detached by
///   `stop`, not dropped.
/// * Returning `Err` (or panicking) moves the plugin to `Stopped`; other
///   plugins are unaffected.
#[async_trait]
pub trait Adapter: Send {
    async fn run(&mut self, ctx: AdapterContext) -> Result<(), HubError>;
}

/// Handles passed to a running adapter.
#[derive(Clone)]
pub struct AdapterContext {
    /// Instance name; used as the `source` of every write.
    pub name: String,
    pub store: Arc<ValueStore>,
    pub log: LogSink,
    pub stop: StopSignal,
}

/// Cooperative stop request, cheap to clone.
#[derive(Debug, Clone)]
pub struct StopSignal(watch::Receiver<bool>);

impl StopSignal {
    /// A signal and the sender that trips it.
    pub fn channel() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self(rx))
    }

    pub fn is_stopped(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once a stop is requested or the sender is dropped.
    pub async fn stopped(&mut self) {
        // An Err means the sender is gone, which is a stop too.
        let _ = self.0.wait_for(|stop| *stop).await;
    }
}

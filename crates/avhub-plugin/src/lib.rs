//! `avhub-plugin` – adapters and their lifecycle.
//!
//! # Overview
//!
//! - [`Adapter`] – the contract every protocol adapter implements.
//! - [`PluginCatalog`] – kind name → constructor; the only way adapters are
//!   found.
//! - [`Plugin`] – one configured instance: `Created → Running → Stopped`.
//! - [`PluginManager`] – every plugin of a hub, started in order and stopped
//!   in reverse.
//! - [`LogSink`] – per-instance diagnostic output.
//!
//! Built-in kinds: [`simulator`], [`udp_telemetry`], [`bus_trace`].

pub mod adapter;
pub mod bus_trace;
pub mod catalog;
pub mod lifecycle;
pub mod log_sink;
pub mod manager;
pub mod options;
pub mod simulator;
pub mod telemetry_text;
pub mod udp_telemetry;

pub use adapter::{Adapter, AdapterContext, StopSignal};
pub use catalog::{AdapterFactory, PluginCatalog};
pub use lifecycle::{ABORT_GRACE, LifecycleState, Plugin, StopOutcome};
pub use log_sink::{LogSink, NAME_COLUMN_WIDTH};
pub use manager::PluginManager;
pub use options::PluginOptions;
pub use telemetry_text::{format_sample, parse_samples};

//! `avhub-store` – the shared value table and its change dispatch.
//!
//! [`ValueStore`] holds one typed slot per registered point and enforces the
//! write policy (coercion, clamping, tolerance). Accepted changes fan out
//! to every subscriber of the written key; see [`dispatch`].

pub mod dispatch;
pub mod store;

pub use dispatch::{Callback, Change, SLOW_SUBSCRIBER, SubscriberError, SubscriptionId, panic_message};
pub use store::{Reading, ValueStore, WriteReport, WriteStatus};

//! # policy-watcher
//!
//! Keeps the policy engines of several processes in step over a message bus.
//!
//! ## Overview
//!
//! Each process holding a copy of an access-control policy owns one
//! [`Notifier`](core::Notifier). After a process changes the policy it calls
//! `notify`; every notifier subscribed to the same subject then runs its
//! update callback, which typically reloads the policy from storage.
//!
//! - One connection, one subscription and one swappable callback per notifier
//! - Callbacks are looked up when a message arrives, so they can be replaced
//!   at any time
//! - `close` is idempotent and guarantees no callback runs after it returns
//! - Panicking callbacks are contained and logged
//!
//! ## Quick Start
//!
//! ```rust
//! use policy_watcher::prelude::*;
//!
//! # async fn example() -> policy_watcher::error::Result<()> {
//! let bus = MemoryBus::new();
//! bus.bind("mem://cluster");
//!
//! let updater = Notifier::connect(&bus, NotifierConfig::new("mem://cluster")).await?;
//! let listener = Notifier::connect(&bus, NotifierConfig::new("mem://cluster")).await?;
//!
//! listener.set_callback(|_msg| {
//!     // enforcer.load_policy()
//! });
//!
//! updater.notify().await?;
//!
//! updater.close().await;
//! listener.close().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `memory` (default): in-process bus, useful for tests and single-process
//!   deployments
//! - `nats`: NATS backend via `async-nats`
//! - `metrics`: OpenTelemetry counters for notify and dispatch

#![warn(missing_docs, rust_2024_compatibility)]
#![deny(unsafe_code)]

pub mod bus;
pub mod core;
pub mod error;
pub mod watcher;

#[cfg(feature = "metrics")]
pub mod metrics;

/// Convenient re-exports for common usage patterns.
pub mod prelude {
    pub use crate::bus::{Bus, ConnectOptions};
    pub use crate::core::{LifecycleState, Notifier, NotifierBuilder, NotifierConfig, Validate};
    pub use crate::error::{BusError, Result, ValidationError, WatcherError};
    pub use crate::watcher::Watcher;

    #[cfg(feature = "memory")]
    pub use crate::bus::MemoryBus;

    #[cfg(feature = "nats")]
    pub use crate::bus::NatsBus;
}

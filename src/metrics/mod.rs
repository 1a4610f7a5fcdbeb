//! Built-in metrics for notifier operations.
//!
//! Provides OpenTelemetry metrics tracking:
//! - Notifications published and failed
//! - Inbound messages delivered, dropped (no callback) and panicked
//! - Callback duration
//!
//! # Examples
//!
//! ```rust,no_run
//! use policy_watcher::prelude::*;
//! use policy_watcher::metrics::NotifierMetrics;
//! use opentelemetry::global;
//!
//! # async fn example() -> Result<()> {
//! let bus = MemoryBus::new();
//! bus.bind("mem://policy");
//!
//! let metrics = NotifierMetrics::new(global::meter("enforcer"));
//! let notifier = Notifier::connect_with_metrics(
//!     &bus,
//!     NotifierConfig::new("mem://policy"),
//!     metrics,
//! )
//! .await?;
//! # Ok(())
//! # }
//! ```

mod notifier_metrics;

pub use notifier_metrics::NotifierMetrics;

//! Core notifier types.

mod config;
mod dispatch;
mod instrument;
mod loader;
mod notifier;
mod validation;

pub use config::{DEFAULT_SUBJECT, NotifierConfig, NotifierConfigBuilder};
pub use dispatch::{RawCallback, UpdateCallback};
pub(crate) use loader::ConfigLoader;
pub use notifier::{LifecycleState, Notifier, NotifierBuilder};
pub use validation::Validate;

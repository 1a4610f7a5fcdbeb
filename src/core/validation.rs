//! Configuration validation support.

use crate::error::ValidationError;

/// Trait for configuration validation.
///
/// Implemented by [`NotifierConfig`](crate::core::NotifierConfig) and checked
/// before a notifier touches the bus. Wrapping applications can implement it
/// on their own config types that embed a notifier section.
///
/// # Examples
///
/// ```rust
/// use policy_watcher::core::Validate;
/// use policy_watcher::error::ValidationError;
///
/// struct EnforcerSettings {
///     reload_on_notify: bool,
///     model_path: String,
/// }
///
/// impl Validate for EnforcerSettings {
///     fn validate(&self) -> Result<(), ValidationError> {
///         if self.reload_on_notify && self.model_path.is_empty() {
///             return Err(ValidationError::invalid_field(
///                 "model_path",
///                 "required when reload_on_notify is set"
///             ));
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait Validate {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Should return a `ValidationError` describing what validation failed.
    fn validate(&self) -> Result<(), ValidationError>;
}

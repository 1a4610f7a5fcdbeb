//! Notifier settings and their builder.

use crate::bus::{ConnectOptions, validate_subject};
use crate::core::ConfigLoader;
use crate::core::Validate;
use crate::error::{Result, ValidationError};
use serde::Deserialize;
use std::path::PathBuf;

/// Subject used when none is configured.
pub const DEFAULT_SUBJECT: &str = "casbin.policy.updated";

/// Settings for a [`Notifier`](crate::core::Notifier).
///
/// With only `subject` set, the notifier publishes and listens on the same
/// subject, so it also receives its own notifications. Setting
/// `inbound_subject` to a different name splits the two.
///
/// # Examples
///
/// ```rust
/// use policy_watcher::core::NotifierConfig;
///
/// let config = NotifierConfig::new("nats://localhost:4222")
///     .with_subject("casbin.policy.updated");
/// assert_eq!(config.inbound_subject(), "casbin.policy.updated");
/// ```
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct NotifierConfig {
    /// Bus endpoint address.
    #[serde(default)]
    pub endpoint: String,
    /// Subject notifications are published on.
    #[serde(default = "default_subject")]
    pub subject: String,
    /// Subject the subscription listens on. Defaults to `subject`.
    #[serde(default)]
    pub inbound_subject: Option<String>,
    /// Options handed to the bus backend untouched.
    #[serde(default)]
    pub options: ConnectOptions,
}

fn default_subject() -> String {
    DEFAULT_SUBJECT.to_string()
}

impl NotifierConfig {
    /// Settings for `endpoint` with the default subject.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            subject: default_subject(),
            inbound_subject: None,
            options: ConnectOptions::default(),
        }
    }

    /// Create a builder that can also read files and environment variables.
    pub fn builder() -> NotifierConfigBuilder {
        NotifierConfigBuilder::new()
    }

    /// Set the outbound subject.
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    /// Listen on a separate subject instead of the outbound one.
    pub fn with_inbound_subject(mut self, subject: impl Into<String>) -> Self {
        self.inbound_subject = Some(subject.into());
        self
    }

    /// Set the bus connection options.
    pub fn with_options(mut self, options: ConnectOptions) -> Self {
        self.options = options;
        self
    }

    /// The subject the subscription listens on.
    pub fn inbound_subject(&self) -> &str {
        self.inbound_subject.as_deref().unwrap_or(&self.subject)
    }

    /// Whether publishing and listening use different subjects.
    pub fn is_dual_subject(&self) -> bool {
        self.inbound_subject() != self.subject
    }
}

impl Validate for NotifierConfig {
    fn validate(&self) -> std::result::Result<(), ValidationError> {
        let mut errors = Vec::new();

        if self.endpoint.trim().is_empty() {
            errors.push(ValidationError::invalid_field("endpoint", "must not be empty"));
        } else if self.endpoint.chars().any(char::is_whitespace) {
            errors.push(ValidationError::invalid_field(
                "endpoint",
                "must not contain whitespace",
            ));
        }

        if let Err(e) = validate_subject(&self.subject, false) {
            errors.push(ValidationError::invalid_field("subject", e.to_string()));
        }

        if let Some(inbound) = &self.inbound_subject {
            if let Err(e) = validate_subject(inbound, true) {
                errors.push(ValidationError::invalid_field(
                    "inbound_subject",
                    e.to_string(),
                ));
            }
        }

        if self.options.user.is_some() != self.options.password.is_some() {
            errors.push(ValidationError::invalid_field(
                "options",
                "user and password must be set together",
            ));
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ValidationError::Multiple(errors)),
        }
    }
}

/// Builder for [`NotifierConfig`].
///
/// Files are merged in the order they are added, environment variables
/// override files, and values set directly on the builder override both.
///
/// # Examples
///
/// ```rust,no_run
/// use policy_watcher::core::NotifierConfig;
///
/// # fn example() -> policy_watcher::error::Result<()> {
/// // POLICY_ENDPOINT=nats://bus:4222 POLICY_OPTIONS__TOKEN=... are picked up
/// let config = NotifierConfig::builder()
///     .with_file("config/watcher.yaml")
///     .with_env_overrides("POLICY", "__")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct NotifierConfigBuilder {
    file_paths: Vec<PathBuf>,
    env_prefix: Option<String>,
    env_separator: Option<String>,
    endpoint: Option<String>,
    subject: Option<String>,
    inbound_subject: Option<String>,
    options: Option<ConnectOptions>,
}

impl NotifierConfigBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            file_paths: Vec::new(),
            env_prefix: None,
            env_separator: None,
            endpoint: None,
            subject: None,
            inbound_subject: None,
            options: None,
        }
    }

    /// Add a YAML, TOML or JSON file. Later files take precedence.
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_paths.push(path.into());
        self
    }

    /// Read overrides from environment variables.
    ///
    /// # Arguments
    ///
    /// * `prefix` - Prefix for environment variables (e.g., "POLICY")
    /// * `separator` - Separator for nested keys (e.g., "__" for POLICY_OPTIONS__USER)
    pub fn with_env_overrides(mut self, prefix: &str, separator: &str) -> Self {
        self.env_prefix = Some(prefix.to_string());
        self.env_separator = Some(separator.to_string());
        self
    }

    /// Set the endpoint, overriding files and environment.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Set the outbound subject, overriding files and environment.
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Set the inbound subject, overriding files and environment.
    pub fn with_inbound_subject(mut self, subject: impl Into<String>) -> Self {
        self.inbound_subject = Some(subject.into());
        self
    }

    /// Set the connection options, overriding files and environment.
    pub fn with_options(mut self, options: ConnectOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// Merge every source and validate the result.
    ///
    /// # Errors
    ///
    /// Returns [`WatcherError::Config`](crate::error::WatcherError::Config)
    /// if a source cannot be read, or
    /// [`WatcherError::InvalidConfig`](crate::error::WatcherError::InvalidConfig)
    /// if the merged settings are invalid.
    pub fn build(self) -> Result<NotifierConfig> {
        let mut loader = ConfigLoader::new();
        for path in self.file_paths {
            loader.add_file(path);
        }
        if let (Some(prefix), Some(separator)) = (self.env_prefix, self.env_separator) {
            loader.set_env(prefix, separator);
        }
        tracing::debug!(sources = ?loader.source_names(), "loading notifier configuration");

        let mut config: NotifierConfig = loader.load(&[("subject", DEFAULT_SUBJECT)])?;

        if let Some(endpoint) = self.endpoint {
            config.endpoint = endpoint;
        }
        if let Some(subject) = self.subject {
            config.subject = subject;
        }
        if let Some(inbound_subject) = self.inbound_subject {
            config.inbound_subject = Some(inbound_subject);
        }
        if let Some(options) = self.options {
            config.options = options;
        }

        config.validate()?;
        Ok(config)
    }
}

impl Default for NotifierConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

//! Message-bus collaborator interface.
//!
//! A [`Notifier`](crate::core::Notifier) only ever talks to the bus through
//! the traits in this module: [`Bus`] opens a [`Connection`], a connection
//! publishes and hands out [`Subscription`]s. Backends live in submodules.

use crate::error::BusError;
use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "nats")]
pub mod nats;

#[cfg(feature = "memory")]
pub use memory::MemoryBus;

#[cfg(feature = "nats")]
pub use nats::NatsBus;

/// A message delivered to a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Subject the message was published on.
    pub subject: String,
    /// Raw payload, untouched by the bus.
    pub payload: Vec<u8>,
}

/// Handler invoked by a backend on its own dispatch task, once per message.
pub type MessageHandler = Arc<dyn Fn(Message) + Send + Sync>;

/// Connection state as reported by the bus backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Handshake or reconnect in progress.
    Pending,
    /// Usable for publish and subscribe.
    Connected,
    /// The server went away; the connection object is still alive.
    Disconnected,
    /// Closed by its owner. Terminal.
    Closed,
}

/// Entry point to a bus backend.
#[async_trait]
pub trait Bus: Send + Sync {
    /// Open a connection to `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Unreachable`] when nothing answers at the endpoint,
    /// or a transport error for any other handshake failure.
    async fn connect(
        &self,
        endpoint: &str,
        options: &ConnectOptions,
    ) -> Result<Arc<dyn Connection>, BusError>;

    /// Human-readable backend name (for logging).
    fn name(&self) -> &'static str;
}

/// A live connection to the bus.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Publish `payload` on `subject`. Does not wait for delivery.
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), BusError>;

    /// Register `handler` for every message published on `subject`.
    async fn subscribe(
        &self,
        subject: &str,
        handler: MessageHandler,
    ) -> Result<Box<dyn Subscription>, BusError>;

    /// Current connection state.
    fn state(&self) -> ConnectionState;

    /// Whether the connection reached its terminal state.
    fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }

    /// Close the connection. Closing twice is a no-op.
    async fn close(&self);
}

/// An active subscription. Dropping it unsubscribes.
#[async_trait]
pub trait Subscription: Send + Sync {
    /// Subject this subscription listens on.
    fn subject(&self) -> &str;

    /// Whether the subscription still receives messages.
    fn is_valid(&self) -> bool;

    /// Stop receiving messages.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::InvalidSubscription`] if it was already removed.
    async fn unsubscribe(&self) -> Result<(), BusError>;
}

/// Connection options passed through to the bus backend.
///
/// The notifier never interprets these; each backend maps the fields it
/// understands and ignores the rest.
#[derive(Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConnectOptions {
    /// Client name reported to the server.
    pub name: Option<String>,
    /// Username for user/password authentication.
    pub user: Option<String>,
    /// Password for user/password authentication.
    pub password: Option<String>,
    /// Token authentication.
    pub token: Option<String>,
    /// Handshake timeout in milliseconds.
    pub connect_timeout_ms: Option<u64>,
}

impl ConnectOptions {
    /// Create empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the client name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Authenticate with a username and password.
    pub fn with_user_and_password(
        mut self,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }

    /// Authenticate with a token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Set the handshake timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Handshake timeout, if one was set.
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }
}

// Credentials stay out of logs.
impl fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("name", &self.name)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .finish()
    }
}

/// Check that `subject` is a usable subject name.
///
/// Subjects are dot-separated tokens. Tokens must be non-empty and must not
/// contain whitespace. `*` and `>` are accepted as wildcard tokens when
/// `allow_wildcards` is set (subscribe side only), and `>` must be last.
pub fn validate_subject(subject: &str, allow_wildcards: bool) -> Result<(), BusError> {
    let invalid = || BusError::InvalidSubject(subject.to_string());

    if subject.is_empty() {
        return Err(invalid());
    }

    let tokens: Vec<&str> = subject.split('.').collect();
    for (index, token) in tokens.iter().enumerate() {
        if token.is_empty() || token.chars().any(char::is_whitespace) {
            return Err(invalid());
        }
        let is_wildcard = *token == "*" || *token == ">";
        if is_wildcard && !allow_wildcards {
            return Err(invalid());
        }
        if *token == ">" && index != tokens.len() - 1 {
            return Err(invalid());
        }
    }
    Ok(())
}

/// Whether a published `subject` matches a subscription `pattern`.
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');

    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => continue,
            (Some(p), Some(s)) if p == s => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

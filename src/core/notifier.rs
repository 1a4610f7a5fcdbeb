//! The notifier: one bus connection, one subscription, one swappable callback.

use crate::bus::{Bus, Connection, ConnectionState, Subscription};
use crate::core::dispatch::{self, Callback, UpdateCallback};
use crate::core::instrument::Instrumentation;
use crate::bus::ConnectOptions;
use crate::core::{NotifierConfig, NotifierConfigBuilder, Validate};
use crate::error::{Result, WatcherError};
use arc_swap::ArcSwapOption;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};

#[cfg(feature = "metrics")]
use crate::metrics::NotifierMetrics;

/// Where a notifier is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LifecycleState {
    /// Constructed, connection and subscription not yet established.
    Fresh = 0,
    /// Connection and subscription are live.
    Connected = 1,
    /// Torn down. Terminal.
    Released = 2,
}

impl LifecycleState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Fresh,
            1 => Self::Connected,
            _ => Self::Released,
        }
    }
}

/// Bus resources owned by a connected notifier.
struct Resources {
    connection: Arc<dyn Connection>,
    subscription: Box<dyn Subscription>,
}

impl Resources {
    async fn teardown(self) {
        if self.subscription.is_valid() {
            if let Err(e) = self.subscription.unsubscribe().await {
                tracing::warn!(subject = %self.subscription.subject(), error = %e, "unsubscribe failed during close");
            }
        }
        if !self.connection.is_closed() {
            self.connection.close().await;
        }
    }
}

/// State shared between the notifier and its dispatch trampoline.
pub(crate) struct Shared {
    state: AtomicU8,
    resources: Mutex<Option<Resources>>,
    /// Read side held by every callback invocation; `close` takes the write
    /// side once to wait for in-flight invocations.
    pub(crate) gate: RwLock<()>,
    pub(crate) callback: ArcSwapOption<Callback>,
    pub(crate) instrumentation: Instrumentation,
}

impl Shared {
    pub(crate) fn new(instrumentation: Instrumentation) -> Self {
        Self {
            state: AtomicU8::new(LifecycleState::Fresh as u8),
            resources: Mutex::new(None),
            gate: RwLock::new(()),
            callback: ArcSwapOption::empty(),
            instrumentation,
        }
    }

    pub(crate) fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn install(&self, resources: Resources) {
        let mut slot = self.resources.lock();
        *slot = Some(resources);
        self.state
            .store(LifecycleState::Connected as u8, Ordering::Release);
    }

    /// Move to `Released`. Only the first caller gets the resources back.
    fn release(&self) -> Option<Resources> {
        let taken = {
            let mut slot = self.resources.lock();
            let previous = self
                .state
                .swap(LifecycleState::Released as u8, Ordering::AcqRel);
            if previous == LifecycleState::Released as u8 {
                return None;
            }
            slot.take()
        };

        self.callback.store(None);

        // Wait for callbacks already running. A callback closing its own
        // notifier would wait on itself, so it skips the wait.
        if !dispatch::in_dispatch(self) {
            drop(self.gate.write());
        }

        taken
    }

    fn connection(&self) -> Option<Arc<dyn Connection>> {
        let slot = self.resources.lock();
        if self.state() != LifecycleState::Connected {
            return None;
        }
        slot.as_ref().map(|r| Arc::clone(&r.connection))
    }
}

/// Tells peer processes that the policy changed, and hears when they do.
///
/// A notifier owns one bus connection and one subscription. Inbound
/// notifications are handed to the callback installed with
/// [`set_callback`](Self::set_callback) at the moment they arrive.
///
/// Call [`close`](Self::close) to release the bus resources. Dropping an
/// unclosed notifier releases them too, in the background.
///
/// # Examples
///
/// ```rust
/// use policy_watcher::prelude::*;
///
/// # async fn example() -> Result<()> {
/// let bus = MemoryBus::new();
/// bus.bind("mem://policy");
///
/// let notifier = Notifier::connect(&bus, NotifierConfig::new("mem://policy")).await?;
/// notifier.set_callback(|_msg| println!("policy changed, reloading"));
///
/// notifier.notify().await?;
/// notifier.close().await;
/// assert!(notifier.notify().await.is_err());
/// # Ok(())
/// # }
/// ```
pub struct Notifier {
    shared: Arc<Shared>,
    endpoint: String,
    subject: String,
    inbound_subject: String,
}

impl Notifier {
    /// Connect to the bus and subscribe to the inbound subject.
    ///
    /// # Errors
    ///
    /// - [`WatcherError::InvalidConfig`] if `config` fails validation; the bus
    ///   is not contacted.
    /// - [`WatcherError::Connection`] if the connection cannot be established;
    ///   no subscription is attempted.
    /// - [`WatcherError::Subscription`] if subscribing fails; the connection
    ///   is closed before this returns.
    pub async fn connect<B>(bus: &B, config: NotifierConfig) -> Result<Self>
    where
        B: Bus + ?Sized,
    {
        Self::establish(bus, config, Instrumentation::default(), None).await
    }

    /// Start a fluent construction: settings and an initial callback, then
    /// [`NotifierBuilder::connect`].
    pub fn builder() -> NotifierBuilder {
        NotifierBuilder::new()
    }

    /// Like [`connect`](Self::connect), recording metrics into `metrics`.
    #[cfg(feature = "metrics")]
    pub async fn connect_with_metrics<B>(
        bus: &B,
        config: NotifierConfig,
        metrics: NotifierMetrics,
    ) -> Result<Self>
    where
        B: Bus + ?Sized,
    {
        Self::establish(bus, config, Instrumentation::with_metrics(metrics), None).await
    }

    async fn establish<B>(
        bus: &B,
        config: NotifierConfig,
        instrumentation: Instrumentation,
        initial_callback: Option<Callback>,
    ) -> Result<Self>
    where
        B: Bus + ?Sized,
    {
        config.validate()?;

        let inbound_subject = config.inbound_subject().to_string();
        let NotifierConfig {
            endpoint,
            subject,
            options,
            ..
        } = config;

        let connection = bus
            .connect(&endpoint, &options)
            .await
            .map_err(|source| WatcherError::Connection {
                endpoint: endpoint.clone(),
                source,
            })?;

        let shared = Arc::new(Shared::new(instrumentation));
        // In place before the subscription exists, so no early message is dropped.
        if let Some(callback) = initial_callback {
            shared.callback.store(Some(Arc::new(callback)));
        }
        let handler = dispatch::trampoline(Arc::downgrade(&shared));

        let subscription = match connection.subscribe(&inbound_subject, handler).await {
            Ok(subscription) => subscription,
            Err(source) => {
                connection.close().await;
                return Err(WatcherError::Subscription {
                    subject: inbound_subject,
                    source,
                });
            }
        };

        shared.install(Resources {
            connection,
            subscription,
        });

        tracing::debug!(
            bus = bus.name(),
            endpoint = %endpoint,
            subject = %subject,
            inbound_subject = %inbound_subject,
            "notifier connected"
        );

        Ok(Self {
            shared,
            endpoint,
            subject,
            inbound_subject,
        })
    }

    /// Install the callback for inbound notifications, replacing any
    /// previous one. The payload is decoded as UTF-8, lossily.
    ///
    /// Takes effect for every message dispatched after the swap. Has no
    /// effect once the notifier is closed.
    pub fn set_callback<F>(&self, callback: F)
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        self.install_callback(Callback::Text(Box::new(callback)));
    }

    /// Install a callback that receives the payload bytes as published.
    pub fn set_raw_callback<F>(&self, callback: F)
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.install_callback(Callback::Raw(Box::new(callback)));
    }

    pub(crate) fn set_boxed_callback(&self, callback: UpdateCallback) {
        self.install_callback(Callback::Text(callback));
    }

    fn install_callback(&self, callback: Callback) {
        if self.shared.state() == LifecycleState::Released {
            tracing::debug!(subject = %self.inbound_subject, "callback ignored on closed notifier");
            return;
        }
        self.shared.callback.store(Some(Arc::new(callback)));
        // Lost a race with `close`; keep the slot empty.
        if self.shared.state() == LifecycleState::Released {
            self.shared.callback.store(None);
        }
    }

    /// Remove the callback. Inbound notifications are dropped until a new
    /// one is installed.
    pub fn clear_callback(&self) {
        self.shared.callback.store(None);
    }

    /// Whether a callback is installed.
    pub fn has_callback(&self) -> bool {
        self.shared.callback.load().is_some()
    }

    /// Publish an empty notification on the outbound subject.
    ///
    /// Does not wait for any peer to receive it.
    ///
    /// # Errors
    ///
    /// - [`WatcherError::NotConnected`] after `close`, or when the bus reports
    ///   the connection as anything but connected.
    /// - [`WatcherError::Publish`] if the bus rejects the publish.
    pub async fn notify(&self) -> Result<()> {
        self.notify_with(Vec::new()).await
    }

    /// Publish `payload` on the outbound subject.
    ///
    /// # Errors
    ///
    /// Same as [`notify`](Self::notify).
    pub async fn notify_with(&self, payload: impl Into<Vec<u8>>) -> Result<()> {
        let result = self.publish(payload.into()).await;
        match &result {
            Ok(()) => self.shared.instrumentation.notify_sent(),
            Err(e) => {
                tracing::debug!(subject = %self.subject, error = %e, "notify failed");
                self.shared.instrumentation.notify_failed();
            }
        }
        result
    }

    async fn publish(&self, payload: Vec<u8>) -> Result<()> {
        let connection = self.shared.connection().ok_or(WatcherError::NotConnected)?;
        if connection.state() != ConnectionState::Connected {
            return Err(WatcherError::NotConnected);
        }

        connection
            .publish(&self.subject, payload)
            .await
            .map_err(|source| {
                if source.is_connection_lost() {
                    WatcherError::NotConnected
                } else {
                    WatcherError::Publish {
                        subject: self.subject.clone(),
                        source,
                    }
                }
            })?;

        tracing::debug!(subject = %self.subject, "policy change notification published");
        Ok(())
    }

    /// Unsubscribe, close the connection and drop the callback.
    ///
    /// Safe to call any number of times; only the first call does work.
    /// Returns once in-flight callback invocations have finished, so no
    /// callback runs after this returns. Teardown failures are logged, not
    /// returned.
    ///
    /// A callback that closes its own notifier does not wait for itself.
    pub async fn close(&self) {
        let Some(resources) = self.shared.release() else {
            return;
        };
        resources.teardown().await;
        tracing::debug!(endpoint = %self.endpoint, "notifier closed");
    }

    /// Lifecycle snapshot.
    pub fn state(&self) -> LifecycleState {
        self.shared.state()
    }

    /// Whether `notify` would currently reach the bus.
    pub fn is_connected(&self) -> bool {
        self.shared
            .connection()
            .is_some_and(|c| c.state() == ConnectionState::Connected)
    }

    /// Bus endpoint.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Subject notifications are published on.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Subject the subscription listens on.
    pub fn inbound_subject(&self) -> &str {
        &self.inbound_subject
    }
}

/// Fluent construction of a [`Notifier`].
///
/// Settings resolve the same way as [`NotifierConfigBuilder`]: files, then
/// environment, then values set here. The initial callback is installed
/// before the subscription starts.
///
/// # Examples
///
/// ```rust
/// use policy_watcher::prelude::*;
///
/// # async fn example() -> Result<()> {
/// let bus = MemoryBus::new();
/// bus.bind("mem://policy");
///
/// let notifier = Notifier::builder()
///     .with_endpoint("mem://policy")
///     .with_subject("casbin.policy.updated")
///     .with_callback(|_msg| println!("reloading"))
///     .connect(&bus)
///     .await?;
/// # notifier.close().await;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct NotifierBuilder {
    config: NotifierConfigBuilder,
    callback: Option<Callback>,
    instrumentation: Instrumentation,
}

impl NotifierBuilder {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a YAML, TOML or JSON settings file. Later files take precedence.
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config = self.config.with_file(path);
        self
    }

    /// Read settings overrides from prefixed environment variables.
    pub fn with_env_overrides(mut self, prefix: &str, separator: &str) -> Self {
        self.config = self.config.with_env_overrides(prefix, separator);
        self
    }

    /// Bus endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config = self.config.with_endpoint(endpoint);
        self
    }

    /// Outbound subject.
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.config = self.config.with_subject(subject);
        self
    }

    /// Listen on a separate subject instead of the outbound one.
    pub fn with_inbound_subject(mut self, subject: impl Into<String>) -> Self {
        self.config = self.config.with_inbound_subject(subject);
        self
    }

    /// Options handed to the bus backend.
    pub fn with_options(mut self, options: ConnectOptions) -> Self {
        self.config = self.config.with_options(options);
        self
    }

    /// Callback installed before the first message can arrive.
    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        self.callback = Some(Callback::Text(Box::new(callback)));
        self
    }

    /// Raw-bytes variant of [`with_callback`](Self::with_callback).
    pub fn with_raw_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.callback = Some(Callback::Raw(Box::new(callback)));
        self
    }

    /// Record metrics into `metrics`.
    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, metrics: NotifierMetrics) -> Self {
        self.instrumentation = Instrumentation::with_metrics(metrics);
        self
    }

    /// Resolve the settings and connect.
    ///
    /// # Errors
    ///
    /// Settings errors from [`NotifierConfigBuilder::build`], then the same
    /// errors as [`Notifier::connect`].
    pub async fn connect<B>(self, bus: &B) -> Result<Notifier>
    where
        B: Bus + ?Sized,
    {
        let config = self.config.build()?;
        Notifier::establish(bus, config, self.instrumentation, self.callback).await
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("endpoint", &self.endpoint)
            .field("subject", &self.subject)
            .field("inbound_subject", &self.inbound_subject)
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        let Some(resources) = self.shared.release() else {
            return;
        };
        tracing::debug!(endpoint = %self.endpoint, "notifier dropped without close, releasing");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(resources.teardown());
            }
            // Backends release on drop as well.
            Err(_) => drop(resources),
        }
    }
}

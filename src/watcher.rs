//! The watcher contract consumed by a policy engine.

use crate::core::{Notifier, UpdateCallback};
use crate::error::Result;
use async_trait::async_trait;

/// What a policy engine needs from a change watcher.
///
/// The engine installs a reload callback, calls [`update`](Self::update)
/// after it changes the policy, and calls [`close`](Self::close) on
/// shutdown.
///
/// # Examples
///
/// ```rust
/// use policy_watcher::prelude::*;
/// use std::sync::Arc;
///
/// # async fn example() -> Result<()> {
/// let bus = MemoryBus::new();
/// bus.bind("mem://policy");
///
/// let watcher: Arc<dyn Watcher> =
///     Arc::new(Notifier::connect(&bus, NotifierConfig::new("mem://policy")).await?);
/// watcher.set_update_callback(Box::new(|_| println!("reload policy")))?;
/// watcher.update().await?;
/// watcher.close().await;
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait Watcher: Send + Sync {
    /// Install the callback run when a peer reports a policy change.
    ///
    /// # Errors
    ///
    /// The notifier implementation never fails; other implementations may.
    fn set_update_callback(&self, callback: UpdateCallback) -> Result<()>;

    /// Tell every peer the policy changed.
    ///
    /// # Errors
    ///
    /// Returns [`WatcherError::NotConnected`](crate::error::WatcherError::NotConnected)
    /// when the watcher has no live connection.
    async fn update(&self) -> Result<()>;

    /// Release the watcher. The callback is not called afterwards.
    async fn close(&self);
}

#[async_trait]
impl Watcher for Notifier {
    fn set_update_callback(&self, callback: UpdateCallback) -> Result<()> {
        self.set_boxed_callback(callback);
        Ok(())
    }

    async fn update(&self) -> Result<()> {
        self.notify().await
    }

    async fn close(&self) {
        Notifier::close(self).await
    }
}

//! In-process bus backend.
//!
//! `MemoryBus` behaves like a tiny broker: endpoints must be bound before
//! anyone can connect to them, each subscription gets its own dispatch task,
//! and publishing fans a message out to every matching subscription on the
//! same endpoint. It is used by the test-suite and by applications that run
//! several policy engines inside one process.

use super::{
    Bus, ConnectOptions, Connection, ConnectionState, Message, MessageHandler, Subscription,
    subject_matches, validate_subject,
};
use crate::error::BusError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

/// In-process message bus.
///
/// Cloning yields another handle to the same broker.
///
/// # Examples
///
/// ```rust
/// use policy_watcher::bus::{Bus, ConnectOptions, Connection, MemoryBus};
///
/// # async fn example() -> Result<(), policy_watcher::error::BusError> {
/// let bus = MemoryBus::new();
/// bus.bind("mem://policy");
///
/// let connection = bus.connect("mem://policy", &ConnectOptions::new()).await?;
/// connection.publish("policy.updated", Vec::new()).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct MemoryBus {
    broker: Arc<Mutex<Broker>>,
}

#[derive(Default)]
struct Broker {
    endpoints: HashMap<String, Endpoint>,
    next_epoch: u64,
    next_id: u64,
}

impl Broker {
    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// The endpoint, but only if it is still the incarnation `epoch` refers to.
    fn endpoint_mut(&mut self, name: &str, epoch: u64) -> Option<&mut Endpoint> {
        self.endpoints
            .get_mut(name)
            .filter(|endpoint| endpoint.epoch == epoch)
    }
}

struct Endpoint {
    epoch: u64,
    connections: HashSet<u64>,
    subscribers: Vec<SubscriberEntry>,
}

struct SubscriberEntry {
    id: u64,
    connection_id: u64,
    pattern: String,
    tx: mpsc::UnboundedSender<Message>,
    task: AbortHandle,
}

impl MemoryBus {
    /// Create a broker with no endpoints bound.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start accepting connections at `endpoint`.
    ///
    /// Returns `false` if the endpoint was already bound.
    pub fn bind(&self, endpoint: impl Into<String>) -> bool {
        let endpoint = endpoint.into();
        let mut broker = self.broker.lock();
        if broker.endpoints.contains_key(&endpoint) {
            return false;
        }

        let epoch = broker.next_epoch;
        broker.next_epoch += 1;
        tracing::debug!(endpoint = %endpoint, epoch, "memory bus endpoint bound");
        broker.endpoints.insert(
            endpoint,
            Endpoint {
                epoch,
                connections: HashSet::new(),
                subscribers: Vec::new(),
            },
        );
        true
    }

    /// Stop the endpoint, as if the server shut down.
    ///
    /// Every subscription on it stops receiving messages and every connection
    /// to it reports [`ConnectionState::Disconnected`]. Returns `false` if the
    /// endpoint was not bound.
    pub fn unbind(&self, endpoint: &str) -> bool {
        let removed = self.broker.lock().endpoints.remove(endpoint);
        match removed {
            Some(endpoint_state) => {
                for entry in endpoint_state.subscribers {
                    entry.task.abort();
                }
                tracing::debug!(endpoint = %endpoint, "memory bus endpoint unbound");
                true
            }
            None => false,
        }
    }

    /// Whether `endpoint` accepts connections.
    pub fn is_bound(&self, endpoint: &str) -> bool {
        self.broker.lock().endpoints.contains_key(endpoint)
    }

    /// Number of open connections to `endpoint`.
    pub fn connection_count(&self, endpoint: &str) -> usize {
        self.broker
            .lock()
            .endpoints
            .get(endpoint)
            .map_or(0, |e| e.connections.len())
    }

    /// Number of live subscriptions at `endpoint`.
    pub fn subscription_count(&self, endpoint: &str) -> usize {
        self.broker
            .lock()
            .endpoints
            .get(endpoint)
            .map_or(0, |e| e.subscribers.len())
    }
}

#[async_trait]
impl Bus for MemoryBus {
    async fn connect(
        &self,
        endpoint: &str,
        options: &ConnectOptions,
    ) -> Result<Arc<dyn Connection>, BusError> {
        let mut broker = self.broker.lock();
        let id = broker.next_id();
        let endpoint_state = broker
            .endpoints
            .get_mut(endpoint)
            .ok_or_else(|| BusError::Unreachable(endpoint.to_string()))?;

        endpoint_state.connections.insert(id);
        let epoch = endpoint_state.epoch;
        tracing::debug!(endpoint = %endpoint, connection = id, name = ?options.name, "memory bus connection opened");

        Ok(Arc::new(MemoryConnection {
            id,
            endpoint: endpoint.to_string(),
            epoch,
            closed: AtomicBool::new(false),
            broker: Arc::clone(&self.broker),
        }))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

struct MemoryConnection {
    id: u64,
    endpoint: String,
    epoch: u64,
    closed: AtomicBool,
    broker: Arc<Mutex<Broker>>,
}

impl MemoryConnection {
    fn close_now(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let mut broker = self.broker.lock();
        if let Some(endpoint) = broker.endpoint_mut(&self.endpoint, self.epoch) {
            endpoint.connections.remove(&self.id);
            endpoint.subscribers.retain(|entry| {
                let owned = entry.connection_id == self.id;
                if owned {
                    entry.task.abort();
                }
                !owned
            });
        }
        tracing::debug!(endpoint = %self.endpoint, connection = self.id, "memory bus connection closed");
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), BusError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }
        validate_subject(subject, false)?;

        let mut broker = self.broker.lock();
        let endpoint = broker
            .endpoint_mut(&self.endpoint, self.epoch)
            .ok_or(BusError::Disconnected)?;

        for entry in endpoint
            .subscribers
            .iter()
            .filter(|entry| subject_matches(&entry.pattern, subject))
        {
            // A closed receiver means the dispatch task was aborted; skip it.
            let _ = entry.tx.send(Message {
                subject: subject.to_string(),
                payload: payload.clone(),
            });
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        subject: &str,
        handler: MessageHandler,
    ) -> Result<Box<dyn Subscription>, BusError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }
        validate_subject(subject, true)?;

        let mut broker = self.broker.lock();
        let id = broker.next_id();
        let endpoint = broker
            .endpoint_mut(&self.endpoint, self.epoch)
            .ok_or(BusError::Disconnected)?;

        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let task = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                handler(message);
            }
        });

        endpoint.subscribers.push(SubscriberEntry {
            id,
            connection_id: self.id,
            pattern: subject.to_string(),
            tx,
            task: task.abort_handle(),
        });

        Ok(Box::new(MemorySubscription {
            id,
            endpoint: self.endpoint.clone(),
            epoch: self.epoch,
            subject: subject.to_string(),
            task: task.abort_handle(),
            broker: Arc::clone(&self.broker),
        }))
    }

    fn state(&self) -> ConnectionState {
        if self.closed.load(Ordering::Acquire) {
            return ConnectionState::Closed;
        }
        let broker = self.broker.lock();
        match broker.endpoints.get(&self.endpoint) {
            Some(endpoint) if endpoint.epoch == self.epoch => ConnectionState::Connected,
            _ => ConnectionState::Disconnected,
        }
    }

    async fn close(&self) {
        self.close_now();
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.close_now();
    }
}

struct MemorySubscription {
    id: u64,
    endpoint: String,
    epoch: u64,
    subject: String,
    task: AbortHandle,
    broker: Arc<Mutex<Broker>>,
}

impl MemorySubscription {
    fn remove(&self) -> bool {
        let mut broker = self.broker.lock();
        let removed = match broker.endpoint_mut(&self.endpoint, self.epoch) {
            Some(endpoint) => {
                let before = endpoint.subscribers.len();
                endpoint.subscribers.retain(|entry| entry.id != self.id);
                endpoint.subscribers.len() != before
            }
            None => false,
        };
        self.task.abort();
        removed
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    fn subject(&self) -> &str {
        &self.subject
    }

    fn is_valid(&self) -> bool {
        let mut broker = self.broker.lock();
        broker
            .endpoint_mut(&self.endpoint, self.epoch)
            .is_some_and(|endpoint| endpoint.subscribers.iter().any(|e| e.id == self.id))
    }

    async fn unsubscribe(&self) -> Result<(), BusError> {
        if self.remove() {
            Ok(())
        } else {
            Err(BusError::InvalidSubscription)
        }
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        self.remove();
    }
}

//! NATS bus backend built on `async-nats`.

use super::{
    Bus, ConnectOptions, Connection, ConnectionState, Message, MessageHandler, Subscription,
    validate_subject,
};
use crate::error::BusError;
use async_nats::connection::State;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Bus backend that talks to a NATS server.
///
/// # Examples
///
/// ```rust,no_run
/// use policy_watcher::bus::{Bus, ConnectOptions, Connection, NatsBus};
///
/// # async fn example() -> Result<(), policy_watcher::error::BusError> {
/// let bus = NatsBus::new();
/// let connection = bus
///     .connect("nats://localhost:4222", &ConnectOptions::new().with_name("enforcer-1"))
///     .await?;
/// connection.publish("casbin.policy.updated", Vec::new()).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct NatsBus;

impl NatsBus {
    /// Create the backend.
    pub fn new() -> Self {
        Self
    }

    fn client_options(options: &ConnectOptions) -> async_nats::ConnectOptions {
        let mut nats_options = async_nats::ConnectOptions::new();
        if let (Some(user), Some(password)) = (&options.user, &options.password) {
            nats_options = nats_options.user_and_password(user.clone(), password.clone());
        }
        if let Some(token) = &options.token {
            nats_options = nats_options.token(token.clone());
        }
        if let Some(name) = &options.name {
            nats_options = nats_options.name(name);
        }
        if let Some(timeout) = options.connect_timeout() {
            nats_options = nats_options.connection_timeout(timeout);
        }
        nats_options
    }
}

#[async_trait]
impl Bus for NatsBus {
    async fn connect(
        &self,
        endpoint: &str,
        options: &ConnectOptions,
    ) -> Result<Arc<dyn Connection>, BusError> {
        let client = Self::client_options(options)
            .connect(endpoint)
            .await
            .map_err(|e| {
                use async_nats::ConnectErrorKind;
                match e.kind() {
                    ConnectErrorKind::Io | ConnectErrorKind::TimedOut | ConnectErrorKind::Dns => {
                        BusError::Unreachable(format!("{}: {}", endpoint, e))
                    }
                    _ => BusError::Transport(e.to_string()),
                }
            })?;

        tracing::debug!(endpoint = %endpoint, "nats connection opened");
        Ok(Arc::new(NatsConnection {
            client: Mutex::new(Some(client)),
            closed: AtomicBool::new(false),
        }))
    }

    fn name(&self) -> &'static str {
        "nats"
    }
}

struct NatsConnection {
    client: Mutex<Option<async_nats::Client>>,
    closed: AtomicBool,
}

impl NatsConnection {
    fn client(&self) -> Result<async_nats::Client, BusError> {
        self.client.lock().clone().ok_or(BusError::Closed)
    }
}

#[async_trait]
impl Connection for NatsConnection {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), BusError> {
        validate_subject(subject, false)?;
        let client = self.client()?;
        client
            .publish(subject.to_string(), Bytes::from(payload))
            .await
            .map_err(|e| publish_failure(client.connection_state(), e.to_string()))
    }

    async fn subscribe(
        &self,
        subject: &str,
        handler: MessageHandler,
    ) -> Result<Box<dyn Subscription>, BusError> {
        validate_subject(subject, true)?;
        let client = self.client()?;
        let mut subscriber = client
            .subscribe(subject.to_string())
            .await
            .map_err(|e| BusError::Transport(e.to_string()))?;

        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    // Fires on an explicit stop and when the sender is dropped.
                    _ = &mut stop_rx => {
                        let _ = subscriber.unsubscribe().await;
                        break;
                    }
                    next = subscriber.next() => match next {
                        Some(message) => handler(Message {
                            subject: message.subject.to_string(),
                            payload: message.payload.to_vec(),
                        }),
                        None => break,
                    },
                }
            }
        });

        Ok(Box::new(NatsSubscription {
            subject: subject.to_string(),
            stop: Mutex::new(Some(stop_tx)),
            task: Mutex::new(Some(task)),
        }))
    }

    fn state(&self) -> ConnectionState {
        if self.closed.load(Ordering::Acquire) {
            return ConnectionState::Closed;
        }
        match self.client.lock().as_ref() {
            Some(client) => match client.connection_state() {
                State::Connected => ConnectionState::Connected,
                State::Pending => ConnectionState::Pending,
                _ => ConnectionState::Disconnected,
            },
            None => ConnectionState::Closed,
        }
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let client = self.client.lock().take();
        if let Some(client) = client {
            if let Err(e) = client.flush().await {
                tracing::warn!(error = %e, "nats flush before close failed");
            }
            // The connection task shuts down once the last client handle is gone.
            drop(client);
        }
        tracing::debug!("nats connection closed");
    }
}

/// A publish that fails because the link dropped is a lost connection, not
/// a transport fault.
fn publish_failure(state: State, detail: String) -> BusError {
    match state {
        State::Connected => BusError::Transport(detail),
        _ => BusError::Disconnected,
    }
}

struct NatsSubscription {
    subject: String,
    stop: Mutex<Option<oneshot::Sender<()>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl Subscription for NatsSubscription {
    fn subject(&self) -> &str {
        &self.subject
    }

    fn is_valid(&self) -> bool {
        let stopped = self.stop.lock().is_none();
        let finished = self
            .task
            .lock()
            .as_ref()
            .is_none_or(|task| task.is_finished());
        !stopped && !finished
    }

    async fn unsubscribe(&self) -> Result<(), BusError> {
        let stop = self.stop.lock().take().ok_or(BusError::InvalidSubscription)?;
        let _ = stop.send(());

        let task = self.task.lock().take();
        if let Some(task) = task {
            // Called from a callback running on the dispatch task itself. The
            // loop sees the stop signal once the callback returns.
            if tokio::task::try_id() == Some(task.id()) {
                return Ok(());
            }
            task.await
                .map_err(|e| BusError::Transport(format!("dispatch task failed: {}", e)))?;
        }
        Ok(())
    }
}

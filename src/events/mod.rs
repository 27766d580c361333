//! One push connection fanned out to many subscribers.

pub mod connector;

pub use connector::{PushConnector, PushStream, WsConnector};

use crate::config::EventsConfig;
use crate::error::{AppError, AppResult};
use nanowallet_types::PushMessage;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

pub type SubscriptionKey = u64;

/// Subscriber callback. Runs while the subscriber list is locked, so it
/// must return quickly; spawn anything slow.
pub type Callback = Box<dyn Fn(&PushMessage) + Send + Sync>;

pub struct EventBus {
    urls: Vec<String>,
    reconnect_delay: Duration,
    connector: Arc<dyn PushConnector>,
    subscribers: Mutex<BTreeMap<SubscriptionKey, Callback>>,
    next_key: AtomicU64,
    state: RwLock<ConnectionState>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("urls", &self.urls)
            .field("subscribers", &self.subscriber_count())
            .finish_non_exhaustive()
    }
}

impl EventBus {
    pub fn new(config: &EventsConfig, connector: Arc<dyn PushConnector>) -> Self {
        Self {
            urls: config.ws_urls.clone(),
            reconnect_delay: Duration::from_secs(config.reconnect_delay_secs),
            connector,
            subscribers: Mutex::new(BTreeMap::new()),
            next_key: AtomicU64::new(1),
            state: RwLock::new(ConnectionState::Disconnected),
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionKey
    where
        F: Fn(&PushMessage) + Send + Sync + 'static,
    {
        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, Box::new(callback));
        debug!(key, "Subscribed");
        key
    }

    /// Returns whether the key was registered.
    pub fn unsubscribe(&self, key: SubscriptionKey) -> bool {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key)
            .is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Deliver to every subscriber in subscription order.
    pub fn dispatch(&self, message: &PushMessage) {
        let subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        for callback in subscribers.values() {
            callback(message);
        }
    }

    /// First endpoint, in configured order, that accepts a connection.
    pub async fn connect(&self) -> AppResult<Box<dyn PushStream>> {
        for url in &self.urls {
            info!(url = %url, "Connecting to push endpoint");
            match self.connector.connect(url).await {
                Ok(stream) => return Ok(stream),
                Err(e) => warn!(url = %url, error = %e, "Push endpoint refused"),
            }
        }
        Err(AppError::network("no push endpoint reachable"))
    }

    /// Connect, deliver, and on any failure wait and reconnect. Never returns.
    pub async fn run(&self) {
        loop {
            *self.state.write().await = ConnectionState::Connecting;

            match self.connect().await {
                Ok(mut stream) => {
                    *self.state.write().await = ConnectionState::Connected;
                    info!("Push connection established");

                    loop {
                        match stream.next_confirmation().await {
                            Ok(Some(confirmation)) => {
                                self.dispatch(&PushMessage::Confirmation(confirmation));
                            }
                            Ok(None) => {
                                warn!("Push connection closed by server");
                                break;
                            }
                            Err(e) => {
                                error!(error = %e, "Push delivery failed");
                                self.dispatch(&PushMessage::ConnectionError(e.to_string()));
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    error!(error = %e, "Failed to connect to any push endpoint");
                    self.dispatch(&PushMessage::ConnectionError(e.to_string()));
                }
            }

            *self.state.write().await = ConnectionState::Reconnecting;
            warn!(delay_secs = self.reconnect_delay.as_secs_f32(), "Reconnecting to push endpoint");
            tokio::time::sleep(self.reconnect_delay).await;
        }
    }

    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let bus = self.clone();
        tokio::spawn(async move { bus.run().await })
    }
}

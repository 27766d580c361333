//! Keeps open wallets' balances fresh: a periodic full refresh as the
//! backstop, plus single-account refreshes driven by confirmations.

use crate::config::SyncConfig;
use crate::error::AppResult;
use crate::events::{EventBus, SubscriptionKey};
use crate::wallet::AccountDirectory;
use nanowallet_types::{Address, Confirmation, PushMessage};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

pub struct BalanceSynchronizer {
    // Never held across an await; read from event callbacks.
    directories: RwLock<Vec<Arc<AccountDirectory>>>,
    jobs_tx: mpsc::Sender<Address>,
    jobs_rx: Arc<Mutex<mpsc::Receiver<Address>>>,
    interval: Duration,
    workers: usize,
}

impl std::fmt::Debug for BalanceSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BalanceSynchronizer")
            .field("interval", &self.interval)
            .field("workers", &self.workers)
            .field("queued", &(self.jobs_tx.max_capacity() - self.jobs_tx.capacity()))
            .finish()
    }
}

impl BalanceSynchronizer {
    pub fn new(config: &SyncConfig) -> Self {
        let (jobs_tx, jobs_rx) = mpsc::channel(config.queue_capacity.max(1));
        Self {
            directories: RwLock::new(Vec::new()),
            jobs_tx,
            jobs_rx: Arc::new(Mutex::new(jobs_rx)),
            interval: Duration::from_secs(config.interval_secs),
            workers: config.workers.max(1),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    fn snapshot(&self) -> Vec<Arc<AccountDirectory>> {
        self.directories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Start keeping `directory` fresh.
    pub async fn open(&self, directory: Arc<AccountDirectory>) {
        let mut directories = self
            .directories
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if !directories.iter().any(|d| Arc::ptr_eq(d, &directory)) {
            directories.push(directory);
        }
    }

    pub async fn close(&self, directory: &Arc<AccountDirectory>) {
        self.directories
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|d| !Arc::ptr_eq(d, directory));
    }

    pub async fn open_count(&self) -> usize {
        self.snapshot().len()
    }

    /// True if some open directory holds `address`.
    pub fn is_open(&self, address: &Address) -> bool {
        self.directories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|d| d.holds(address))
    }

    /// Full refresh of every open directory. Failures are logged and
    /// otherwise ignored; the next tick tries again.
    pub async fn refresh_all(&self) {
        let directories = self.snapshot();
        let refreshes = directories.iter().map(|d| d.refresh_balances());
        for result in futures::future::join_all(refreshes).await {
            if let Err(e) = result {
                warn!(error = %e, transient = e.is_transient(), "Balance refresh failed");
            }
        }
    }

    /// Refresh `address` in whichever open directory holds it.
    ///
    /// Returns false, without any network traffic, if no open directory does.
    pub async fn refresh_address(&self, address: &Address) -> AppResult<bool> {
        let directories = self.snapshot();
        let mut found = false;
        for directory in directories {
            if directory.contains(address).await {
                found = true;
                directory.refresh_account(address).await?;
            }
        }
        Ok(found)
    }

    /// Queue single-account refreshes for the block owner and, for sends,
    /// the receiving account, skipping addresses no open directory holds.
    /// Never blocks; a full queue drops the job and leaves it to the
    /// periodic refresh.
    pub fn handle_confirmation(&self, confirmation: &Confirmation) {
        for address in confirmation.affected().filter(|a| self.is_open(a)) {
            if let Err(e) = self.jobs_tx.try_send(address) {
                debug!(address = %address, error = %e, "Refresh queue full, dropping job");
            }
        }
    }

    /// Route confirmations from `bus` into the refresh queue.
    pub fn attach(self: &Arc<Self>, bus: &EventBus) -> SubscriptionKey {
        let sync = self.clone();
        bus.subscribe(move |message| {
            if let PushMessage::Confirmation(confirmation) = message {
                sync.handle_confirmation(confirmation);
            }
        })
    }

    /// Start the timer loop and the refresh workers.
    pub fn spawn(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(self.workers + 1);

        let sync = self.clone();
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sync.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                sync.refresh_all().await;
            }
        }));

        for worker in 0..self.workers {
            let sync = self.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    let job = sync.jobs_rx.lock().await.recv().await;
                    let Some(address) = job else { break };
                    match sync.refresh_address(&address).await {
                        Ok(true) => debug!(worker, address = %address, "Refreshed account"),
                        Ok(false) => {}
                        Err(e) => warn!(worker, address = %address, error = %e, "Account refresh failed"),
                    }
                }
            }));
        }

        handles
    }
}

//! WebSocket relay pool.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use satsip_nostr::{Event, Signer};
use tokio::sync::{Mutex, RwLock, broadcast};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::connection::RelayConnection;
use super::message::Filter;
use super::{
    PoolConfig, RelayClient, RelayClientFactory, RelayError, RelayStatus, normalize_relay_urls,
};

const STATUS_CHANNEL_CAPACITY: usize = 256;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// A set of relay connections sharing one status channel.
pub struct RelayPool {
    config: PoolConfig,
    connections: RwLock<HashMap<String, Arc<RelayConnection>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    status_tx: broadcast::Sender<RelayStatus>,
    cancel: CancellationToken,
    signer: Option<Arc<dyn Signer>>,
}

impl std::fmt::Debug for RelayPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayPool")
            .field("config", &self.config)
            .field("has_signer", &self.signer.is_some())
            .finish_non_exhaustive()
    }
}

impl RelayPool {
    pub fn new(config: PoolConfig, signer: Option<Arc<dyn Signer>>) -> Self {
        // The `Err` case means a provider is already installed.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let (status_tx, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        Self {
            config,
            connections: RwLock::new(HashMap::new()),
            tasks: Mutex::new(Vec::new()),
            status_tx,
            cancel: CancellationToken::new(),
            signer,
        }
    }

    /// URLs of every relay in the pool, connected or not.
    pub async fn relay_urls(&self) -> Vec<String> {
        self.connections.read().await.keys().cloned().collect()
    }

    async fn connected(&self) -> Vec<Arc<RelayConnection>> {
        self.connections
            .read()
            .await
            .values()
            .filter(|c| c.is_connected())
            .cloned()
            .collect()
    }
}

impl Drop for RelayPool {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[async_trait]
impl RelayClient for RelayPool {
    async fn connect(&self, urls: &[String]) -> Result<(), RelayError> {
        if self.cancel.is_cancelled() {
            return Err(RelayError::NotConnected);
        }
        let urls = normalize_relay_urls(urls);
        if urls.is_empty() {
            return Err(RelayError::NoRelayUrls);
        }

        let mut connections = self.connections.write().await;
        let mut tasks = self.tasks.lock().await;
        for url in urls {
            if connections.contains_key(&url) {
                continue;
            }
            debug!(relay = %url, "Adding relay to pool");
            let (conn, handle) = RelayConnection::spawn(
                url.clone(),
                self.config.clone(),
                self.status_tx.clone(),
                self.cancel.child_token(),
            );
            connections.insert(url, conn);
            tasks.push(handle);
        }
        Ok(())
    }

    fn subscribe_status(&self) -> broadcast::Receiver<RelayStatus> {
        self.status_tx.subscribe()
    }

    async fn connected_relays(&self) -> Vec<String> {
        self.connected()
            .await
            .iter()
            .map(|c| c.url().to_string())
            .collect()
    }

    async fn fetch_events(&self, filter: Filter) -> Result<Vec<Event>, RelayError> {
        let relays = self.connected().await;
        if relays.is_empty() {
            return Err(RelayError::NotConnected);
        }

        let eose_timeout = self.config.eose_timeout;
        let results = join_all(relays.iter().map(|c| c.query(&filter, eose_timeout))).await;

        let mut seen = HashSet::new();
        let mut events = Vec::new();
        let mut first_error = None;
        let mut answered = 0usize;
        for (relay, result) in relays.iter().zip(results) {
            match result {
                Ok(batch) => {
                    answered += 1;
                    for event in batch {
                        if seen.insert(event.id.clone()) {
                            events.push(event);
                        }
                    }
                }
                Err(e) => {
                    debug!(relay = %relay.url(), error = %e, "Relay query failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) if answered == 0 => Err(e),
            _ => Ok(events),
        }
    }

    async fn publish(&self, event: &Event) -> Result<usize, RelayError> {
        let relays = self.connected().await;
        if relays.is_empty() {
            return Err(RelayError::NotConnected);
        }

        let ack_timeout = self.config.ack_timeout;
        let results = join_all(relays.iter().map(|c| c.publish(event, ack_timeout))).await;

        let mut accepted = 0usize;
        let mut first_error = None;
        for (relay, result) in relays.iter().zip(results) {
            match result {
                Ok(()) => accepted += 1,
                Err(e) => {
                    warn!(relay = %relay.url(), id = %event.id, error = %e, "Publish failed on relay");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) if accepted == 0 => Err(e),
            _ => {
                info!(id = %event.id, kind = event.kind, accepted, "Event published");
                Ok(accepted)
            }
        }
    }

    fn signer(&self) -> Option<Arc<dyn Signer>> {
        self.signer.clone()
    }

    async fn shutdown(&self) {
        self.cancel.cancel();
        let handles: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for handle in handles {
            if timeout(SHUTDOWN_GRACE, handle).await.is_err() {
                debug!("Relay task did not stop within grace period");
            }
        }
        self.connections.write().await.clear();
    }
}

/// Builds a [`RelayPool`] per connect attempt.
#[derive(Debug, Clone, Default)]
pub struct PoolFactory {
    config: PoolConfig,
}

impl PoolFactory {
    pub const fn new(config: PoolConfig) -> Self {
        Self { config }
    }
}

impl RelayClientFactory for PoolFactory {
    fn create(&self, signer: Option<Arc<dyn Signer>>) -> Arc<dyn RelayClient> {
        Arc::new(RelayPool::new(self.config.clone(), signer))
    }
}

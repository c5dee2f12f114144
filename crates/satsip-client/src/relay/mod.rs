//! Relay transport.
//!
//! [`RelayClient`] is the contract the connection manager and the service
//! need from a relay pool: start connecting, report per-relay connect and
//! disconnect, fetch events by filter and publish. [`RelayPool`] implements
//! it over WebSockets; tests substitute an in-memory client.

mod connection;
mod message;
mod pool;
mod urls;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use satsip_core::RelayConfig;
use satsip_nostr::{Event, Signer};
use tokio::sync::broadcast;

pub use message::{ClientMessage, Filter, RelayMessage};
pub use pool::{PoolFactory, RelayPool};
pub use urls::{normalize_relay_url, normalize_relay_urls};

/// Errors from the relay transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("No connected relays")]
    NotConnected,

    #[error("No valid relay URLs given")]
    NoRelayUrls,

    #[error("Relay {url} disconnected")]
    Disconnected { url: String },

    #[error("Relay {url} closed subscription: {message}")]
    Closed { url: String, message: String },

    #[error("Relay {url} rejected event: {message}")]
    Rejected { url: String, message: String },

    #[error("Relay {url} did not acknowledge within {timeout_ms}ms")]
    AckTimeout { url: String, timeout_ms: u64 },

    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// A per-relay connectivity change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayStatus {
    Connected { url: String },
    Disconnected { url: String },
}

/// A pool of relay connections.
#[async_trait]
pub trait RelayClient: Send + Sync {
    /// Begin connecting to every relay in `urls`. Returns once the attempts
    /// are under way; progress is reported on [`RelayClient::subscribe_status`].
    async fn connect(&self, urls: &[String]) -> Result<(), RelayError>;

    /// Per-relay connect/disconnect notifications.
    fn subscribe_status(&self) -> broadcast::Receiver<RelayStatus>;

    /// URLs of relays currently connected.
    async fn connected_relays(&self) -> Vec<String>;

    /// Stored events matching `filter` from every connected relay,
    /// de-duplicated by id.
    async fn fetch_events(&self, filter: Filter) -> Result<Vec<Event>, RelayError>;

    /// Publish to every connected relay. Returns how many accepted it.
    async fn publish(&self, event: &Event) -> Result<usize, RelayError>;

    /// The signer this client was built with.
    fn signer(&self) -> Option<Arc<dyn Signer>>;

    /// Close every connection and stop reconnecting. Idempotent.
    async fn shutdown(&self);
}

/// Builds fresh relay clients, one per connect attempt.
pub trait RelayClientFactory: Send + Sync {
    fn create(&self, signer: Option<Arc<dyn Signer>>) -> Arc<dyn RelayClient>;
}

/// Wait between re-opens of a dropped relay socket. Starts at
/// `initial_delay` and doubles per consecutive failure up to `max_delay`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Failed re-opens before the relay is left disconnected. `None` keeps trying.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&RelayConfig::default())
    }
}

impl From<&RelayConfig> for ReconnectPolicy {
    fn from(config: &RelayConfig) -> Self {
        Self {
            initial_delay: config.reconnect_initial_delay(),
            max_delay: config.reconnect_max_delay(),
            max_attempts: (config.reconnect_max_attempts > 0)
                .then_some(config.reconnect_max_attempts),
        }
    }
}

impl ReconnectPolicy {
    /// Wait before re-open number `attempt`, counting from zero.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }

    pub const fn should_retry(&self, attempt: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempt < max,
            None => true,
        }
    }
}

/// Timeouts and backoff for a [`RelayPool`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Bound on a single relay's WebSocket handshake.
    pub connect_timeout: Duration,
    /// How long a query waits for a relay's end-of-stored-events.
    pub eose_timeout: Duration,
    /// How long a publish waits for a relay's `OK`.
    pub ack_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::from(&RelayConfig::default())
    }
}

impl From<&RelayConfig> for PoolConfig {
    fn from(config: &RelayConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            eose_timeout: config.eose_timeout(),
            ack_timeout: config.publish_ack_timeout(),
            reconnect: ReconnectPolicy::from(config),
        }
    }
}

//! Relay connection manager.
//!
//! Owns the single active relay client and the connection state machine:
//!
//! ```text
//! Idle ──connect──▶ Connecting ──first relay──▶ Connected
//!                      │                          │  ▲
//!                      └─timeout──▶ Disconnected ◀┘  │ relays return
//!                                        └───────────┘
//! ```
//!
//! Each connect attempt gets a generation number and a cancellation token.
//! Starting a new attempt cancels the previous one; a cancelled attempt
//! shuts its own client down and never writes shared state. Relay status
//! events are mirrored into [`ConnectionState`] (published on a watch
//! channel) and into the [`SessionStore`], but only while their attempt is
//! still the current one.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use satsip_core::RelayConfig;
use satsip_nostr::nip19::{self, Identifier};
use satsip_nostr::{Signer, SignerProbe};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ClientError, Result};
use crate::notify::{NoticeLevel, Notifier};
use crate::relay::{RelayClient, RelayClientFactory, RelayStatus, normalize_relay_urls};
use crate::session::{SessionRecord, SessionStore};

const NO_SIGNER_WARNING: &str =
    "No signer found. Connected in read-only mode; publishing and zaps are unavailable.";

/// Lifecycle phase of the manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionPhase {
    #[default]
    Idle,
    Connecting,
    Connected,
    Disconnected,
}

/// Snapshot published on every change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionState {
    pub phase: ConnectionPhase,
    /// True iff `connected_relay_count > 0`.
    pub is_connected: bool,
    pub connected_relay_count: usize,
    pub has_signer: bool,
    pub user_pubkey: Option<String>,
}

/// Timeouts and defaults for the manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub default_relays: Vec<String>,
    /// Bound on opening the relay connections.
    pub connect_timeout: Duration,
    /// Bound on waiting for the first relay to come up.
    pub first_relay_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self::from(&RelayConfig::default())
    }
}

impl From<&RelayConfig> for ManagerConfig {
    fn from(config: &RelayConfig) -> Self {
        Self {
            default_relays: config.default_relays.clone(),
            connect_timeout: config.connect_timeout(),
            first_relay_timeout: config.first_relay_timeout(),
        }
    }
}

#[derive(Default)]
struct Inner {
    phase: ConnectionPhase,
    client: Option<Arc<dyn RelayClient>>,
    listener: Option<JoinHandle<()>>,
    signer: Option<Arc<dyn Signer>>,
    user_pubkey: Option<String>,
    relay_urls: Vec<String>,
    connected: HashSet<String>,
    cancel: Option<CancellationToken>,
    generation: u64,
}

impl Inner {
    fn snapshot(&self) -> ConnectionState {
        ConnectionState {
            phase: self.phase,
            is_connected: !self.connected.is_empty(),
            connected_relay_count: self.connected.len(),
            has_signer: self.signer.is_some(),
            user_pubkey: self.user_pubkey.clone(),
        }
    }
}

/// State reachable from listener and watcher tasks.
struct Shared {
    inner: Mutex<Inner>,
    state_tx: watch::Sender<ConnectionState>,
    session: Arc<SessionStore>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, inner: &Inner) {
        self.state_tx.send_replace(inner.snapshot());
    }

    /// Apply a relay-set change from the listener of attempt `generation`.
    fn mirror_relays(&self, generation: u64, connected: &HashSet<String>) {
        let mut inner = self.lock();
        if inner.generation != generation {
            return;
        }
        inner.connected.clone_from(connected);
        match inner.phase {
            ConnectionPhase::Connected if connected.is_empty() => {
                warn!("All relays disconnected");
                inner.phase = ConnectionPhase::Disconnected;
            }
            ConnectionPhase::Disconnected if !connected.is_empty() && inner.client.is_some() => {
                info!(relays = connected.len(), "Relays back online");
                inner.phase = ConnectionPhase::Connected;
            }
            _ => {}
        }
        // The session is written before the new state is published.
        self.session
            .update_connection_state(!connected.is_empty(), connected.len());
        self.publish(&inner);
    }
}

/// Owns the active relay client. Share it as `Arc<ConnectionManager>`.
pub struct ConnectionManager {
    config: ManagerConfig,
    factory: Arc<dyn RelayClientFactory>,
    probe: Arc<dyn SignerProbe>,
    notifier: Arc<dyn Notifier>,
    shared: Arc<Shared>,
    warned_no_signer: AtomicBool,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    pub fn new(
        config: ManagerConfig,
        factory: Arc<dyn RelayClientFactory>,
        probe: Arc<dyn SignerProbe>,
        session: Arc<SessionStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::default());
        Self {
            config,
            factory,
            probe,
            notifier,
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner::default()),
                state_tx,
                session,
            }),
            warned_no_signer: AtomicBool::new(false),
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn state(&self) -> ConnectionState {
        self.shared.state_tx.borrow().clone()
    }

    /// Receive every state change.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// The live client, once a connect attempt has succeeded.
    pub fn client(&self) -> Option<Arc<dyn RelayClient>> {
        self.shared.lock().client.clone()
    }

    pub fn signer(&self) -> Option<Arc<dyn Signer>> {
        self.shared.lock().signer.clone()
    }

    /// Relay set of the current or last attempt.
    pub fn relay_urls(&self) -> Vec<String> {
        self.shared.lock().relay_urls.clone()
    }

    pub fn session(&self) -> &SessionStore {
        &self.shared.session
    }

    pub fn default_relays(&self) -> Vec<String> {
        normalize_relay_urls(&self.config.default_relays)
    }

    // ------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------

    /// Connect to `relay_urls`, or the default relays when none are given.
    ///
    /// Resolves once at least one relay is connected. Fails with
    /// [`ClientError::NoRelaysReachable`] when none comes up in time and
    /// with [`ClientError::ConnectCancelled`] when a newer attempt (or a
    /// disconnect) supersedes this one.
    pub async fn connect(&self, relay_urls: Option<Vec<String>>) -> Result<()> {
        self.connect_with(relay_urls.unwrap_or_default(), None).await
    }

    /// Decode a profile identifier and connect to its relay hints followed
    /// by the default relays.
    pub async fn connect_to_identifier(&self, identifier: &str) -> Result<Identifier> {
        let decoded = nip19::decode_identifier(identifier)?;
        let mut urls = decoded.relays.clone();
        urls.extend(self.config.default_relays.iter().cloned());
        self.connect_with(urls, Some(identifier.trim().to_string()))
            .await?;
        Ok(decoded)
    }

    /// Cancel any attempt in flight, close every relay and forget the
    /// session.
    pub async fn disconnect(&self) {
        let (client, listener, cancel) = {
            let mut inner = self.shared.lock();
            inner.generation += 1;
            inner.phase = ConnectionPhase::Disconnected;
            inner.connected.clear();
            inner.relay_urls.clear();
            inner.signer = None;
            inner.user_pubkey = None;
            let taken = (inner.client.take(), inner.listener.take(), inner.cancel.take());
            self.shared.publish(&inner);
            taken
        };
        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        if let Some(listener) = listener {
            listener.abort();
        }
        if let Some(client) = client {
            client.shutdown().await;
        }
        self.shared.session.clear();
        info!("Disconnected");
    }

    /// Disconnect, then connect again to the relays of the last session
    /// (or the defaults).
    pub async fn reconnect(&self) -> Result<()> {
        let record = self.shared.session.load();
        let identifier = record.as_ref().and_then(|r| r.identifier.clone());
        let mut urls = record.map(|r| r.relay_urls).unwrap_or_default();
        if urls.is_empty() {
            urls = self.relay_urls();
        }
        self.disconnect().await;
        self.connect_with(urls, identifier).await
    }

    /// Reconnect after the host regains focus, when the manager has dropped
    /// its connection (or never made one but a session is stored) and no
    /// attempt is in flight. Returns whether a reconnect was attempted.
    pub async fn handle_visibility_regained(&self) -> Result<bool> {
        let (phase, mut urls) = {
            let inner = self.shared.lock();
            (inner.phase, inner.relay_urls.clone())
        };
        let record = self.shared.session.load();
        let eligible = match phase {
            ConnectionPhase::Disconnected => !urls.is_empty() || record.is_some(),
            ConnectionPhase::Idle => record.is_some(),
            ConnectionPhase::Connecting | ConnectionPhase::Connected => false,
        };
        if !eligible {
            return Ok(false);
        }
        if urls.is_empty() {
            urls = record
                .as_ref()
                .map(|r| r.relay_urls.clone())
                .unwrap_or_default();
        }
        debug!(relays = urls.len(), "Reconnecting after visibility regained");
        self.connect_with(urls, record.and_then(|r| r.identifier))
            .await
            .map(|()| true)
    }

    /// Resume the stored session at start-up when it had a signer.
    /// Returns whether a connection was attempted.
    pub async fn restore(&self) -> Result<bool> {
        if !self.shared.session.should_auto_reconnect() {
            return Ok(false);
        }
        let record = self.shared.session.load().unwrap_or_default();
        info!(relays = record.relay_urls.len(), "Restoring previous session");
        self.connect_with(record.relay_urls, record.identifier)
            .await
            .map(|()| true)
    }

    /// Poll the signer probe every `interval` and track availability
    /// changes. Abort the handle to stop.
    pub fn spawn_signer_watch(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let manager = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    return;
                };
                manager.refresh_signer().await;
            }
        })
    }

    /// Probe once and record a change in signer availability.
    pub async fn refresh_signer(&self) {
        let signer = self.probe.probe().await;
        let user_pubkey = match &signer {
            Some(s) => s.public_key().await.ok(),
            None => None,
        };
        let has_signer = signer.is_some();
        let mut inner = self.shared.lock();
        if inner.signer.is_some() == has_signer {
            return;
        }
        inner.signer = signer;
        if user_pubkey.is_some() || !has_signer {
            inner.user_pubkey.clone_from(&user_pubkey);
        }
        info!(has_signer, "Signer availability changed");
        if let Some(mut record) = self.shared.session.load() {
            record.has_signer = has_signer;
            record.user_npub = user_pubkey
                .as_deref()
                .and_then(|pk| nip19::encode_npub(pk).ok());
            record.user_pubkey = user_pubkey;
            self.shared.session.replace(record);
        }
        self.shared.publish(&inner);
    }

    // ------------------------------------------------------------------
    // Connect attempt
    // ------------------------------------------------------------------

    async fn connect_with(&self, requested: Vec<String>, identifier: Option<String>) -> Result<()> {
        let mut urls = normalize_relay_urls(&requested);
        if urls.is_empty() {
            urls = self.default_relays();
        }
        let (generation, cancel, previous) = self.begin_attempt(&urls);
        if let Some(previous) = previous {
            previous.shutdown().await;
        }
        info!(generation, relays = urls.len(), "Connecting");

        let signer = tokio::select! {
            () = cancel.cancelled() => return Err(ClientError::ConnectCancelled),
            signer = self.probe.probe() => signer,
        };
        if signer.is_none() {
            self.warn_no_signer_once();
        }

        let client = self.factory.create(signer.clone());
        let (count_tx, mut count_rx) = watch::channel(0usize);
        let listener = tokio::spawn(listen(
            Arc::clone(&self.shared),
            generation,
            Arc::clone(&client),
            client.subscribe_status(),
            count_tx,
        ));
        if !self.attach_listener(generation, listener) {
            client.shutdown().await;
            return Err(ClientError::ConnectCancelled);
        }

        let opened = tokio::select! {
            () = cancel.cancelled() => None,
            opened = timeout(self.config.connect_timeout, client.connect(&urls)) => Some(opened),
        };
        match opened {
            None => return self.abandon(client).await,
            Some(Ok(Ok(()))) => {}
            Some(Ok(Err(e))) => {
                warn!(error = %e, "Relay client refused to connect");
                return self.fail(generation, client, urls.len()).await;
            }
            Some(Err(_)) => {
                warn!(
                    timeout_ms = self.config.connect_timeout.as_millis(),
                    "Opening relay connections timed out"
                );
            }
        }

        let reached = tokio::select! {
            () = cancel.cancelled() => None,
            reached = timeout(
                self.config.first_relay_timeout,
                async { count_rx.wait_for(|count| *count > 0).await.is_ok() },
            ) => Some(reached.unwrap_or(false)),
        };
        match reached {
            None => self.abandon(client).await,
            Some(false) => self.fail(generation, client, urls.len()).await,
            Some(true) => self.succeed(generation, client, signer, urls, identifier).await,
        }
    }

    /// Supersede any earlier attempt and reset shared state for a new one.
    /// Returns the previous client, which the caller must shut down.
    fn begin_attempt(
        &self,
        urls: &[String],
    ) -> (u64, CancellationToken, Option<Arc<dyn RelayClient>>) {
        let cancel = CancellationToken::new();
        let mut inner = self.shared.lock();
        if let Some(previous) = inner.cancel.replace(cancel.clone()) {
            debug!(generation = inner.generation, "Cancelling in-flight connect");
            previous.cancel();
        }
        if let Some(listener) = inner.listener.take() {
            listener.abort();
        }
        inner.generation += 1;
        inner.phase = ConnectionPhase::Connecting;
        inner.relay_urls = urls.to_vec();
        inner.connected.clear();
        let previous = inner.client.take();
        self.shared.publish(&inner);
        (inner.generation, cancel, previous)
    }

    fn attach_listener(&self, generation: u64, listener: JoinHandle<()>) -> bool {
        let mut inner = self.shared.lock();
        if inner.generation != generation {
            listener.abort();
            return false;
        }
        if let Some(previous) = inner.listener.replace(listener) {
            previous.abort();
        }
        true
    }

    async fn abandon(&self, client: Arc<dyn RelayClient>) -> Result<()> {
        debug!("Connect attempt cancelled, tearing down its client");
        client.shutdown().await;
        Err(ClientError::ConnectCancelled)
    }

    async fn fail(
        &self,
        generation: u64,
        client: Arc<dyn RelayClient>,
        attempted: usize,
    ) -> Result<()> {
        let current = {
            let mut inner = self.shared.lock();
            let current = inner.generation == generation;
            if current {
                if let Some(listener) = inner.listener.take() {
                    listener.abort();
                }
                inner.cancel = None;
                inner.phase = ConnectionPhase::Disconnected;
                inner.connected.clear();
                self.shared.session.update_connection_state(false, 0);
                self.shared.publish(&inner);
            }
            current
        };
        client.shutdown().await;
        if !current {
            return Err(ClientError::ConnectCancelled);
        }
        warn!(attempted, "No relays reachable");
        Err(ClientError::NoRelaysReachable { attempted })
    }

    async fn succeed(
        &self,
        generation: u64,
        client: Arc<dyn RelayClient>,
        signer: Option<Arc<dyn Signer>>,
        urls: Vec<String>,
        identifier: Option<String>,
    ) -> Result<()> {
        let user_pubkey = match &signer {
            Some(s) => match s.public_key().await {
                Ok(pk) => Some(pk),
                Err(e) => {
                    warn!(error = %e, "Signer did not reveal a public key");
                    None
                }
            },
            None => None,
        };
        let has_signer = signer.is_some();
        let user_npub = user_pubkey
            .as_deref()
            .and_then(|pk| nip19::encode_npub(pk).ok());

        let installed = {
            let mut inner = self.shared.lock();
            if inner.generation == generation {
                inner.client = Some(Arc::clone(&client));
                inner.signer = signer;
                inner.user_pubkey.clone_from(&user_pubkey);
                inner.cancel = None;
                inner.phase = ConnectionPhase::Connected;
                self.shared.session.replace(SessionRecord {
                    is_connected: true,
                    has_signer,
                    user_pubkey,
                    user_npub,
                    identifier,
                    relay_urls: urls,
                    ..SessionRecord::default()
                });
                self.shared.publish(&inner);
                info!(relays = inner.connected.len(), has_signer, "Connected");
            }
            inner.generation == generation
        };
        if installed {
            Ok(())
        } else {
            self.abandon(client).await
        }
    }

    fn warn_no_signer_once(&self) {
        if !self.warned_no_signer.swap(true, Ordering::SeqCst) {
            self.notifier.notify(NoticeLevel::Warning, NO_SIGNER_WARNING);
        }
    }
}

/// Track one attempt's connected-relay set from its client's status events.
async fn listen(
    shared: Arc<Shared>,
    generation: u64,
    client: Arc<dyn RelayClient>,
    mut status_rx: broadcast::Receiver<RelayStatus>,
    count_tx: watch::Sender<usize>,
) {
    let mut connected: HashSet<String> = HashSet::new();
    loop {
        let changed = match status_rx.recv().await {
            Ok(RelayStatus::Connected { url }) => {
                debug!(relay = %url, "Relay up");
                connected.insert(url)
            }
            Ok(RelayStatus::Disconnected { url }) => {
                debug!(relay = %url, "Relay down");
                connected.remove(&url)
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Relay status listener lagged, resyncing");
                connected = client.connected_relays().await.into_iter().collect();
                true
            }
            Err(broadcast::error::RecvError::Closed) => return,
        };
        if changed {
            count_tx.send_replace(connected.len());
            shared.mirror_relays(generation, &connected);
        }
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;

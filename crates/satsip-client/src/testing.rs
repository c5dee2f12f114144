//! In-memory doubles for the relay transport, storage, notifications and
//! payment capabilities.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use satsip_nostr::{Event, Signer};
use tokio::sync::broadcast;

use crate::notify::{NoticeLevel, Notifier};
use crate::relay::{Filter, RelayClient, RelayClientFactory, RelayError, RelayStatus};
use crate::session::{PersistError, SessionStorage};
use crate::zap::{
    CapabilityError, Clipboard, LightningAddress, LnurlClient, PayDescriptor, PaymentFailure,
    PaymentReceipt, UriOpener, WalletCapability, ZapCapability,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Storage whose every operation fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingStorage;

impl SessionStorage for FailingStorage {
    fn get(&self, _key: &str) -> Result<Option<String>, PersistError> {
        Err(PersistError::Unavailable("storage disabled".into()))
    }

    fn set(&self, _key: &str, _value: &str) -> Result<(), PersistError> {
        Err(PersistError::Unavailable("storage disabled".into()))
    }

    fn remove(&self, _key: &str) -> Result<(), PersistError> {
        Err(PersistError::Unavailable("storage disabled".into()))
    }
}

/// Collects notifications for assertions.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<(NoticeLevel, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notices(&self) -> Vec<(NoticeLevel, String)> {
        lock(&self.notices).clone()
    }

    pub fn count(&self, level: NoticeLevel) -> usize {
        lock(&self.notices).iter().filter(|(l, _)| *l == level).count()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, level: NoticeLevel, message: &str) {
        lock(&self.notices).push((level, message.to_string()));
    }
}

/// How every [`MockRelayClient`] built by a [`MockClientFactory`] behaves.
#[derive(Debug, Clone, Default)]
pub struct MockBehavior {
    /// Relays that come up, each after `connect_delay`. Others never do.
    pub reachable: Vec<String>,
    pub connect_delay: Duration,
    /// Stored events served to queries (filtered per query).
    pub events: Vec<Event>,
    /// Delay before each query answers.
    pub fetch_delay: Duration,
    /// Number of leading queries that fail with a relay error.
    pub fetch_failures: usize,
    pub reject_publish: bool,
}

#[derive(Debug)]
struct MockState {
    behavior: MockBehavior,
    status_tx: broadcast::Sender<RelayStatus>,
    connected: Mutex<HashSet<String>>,
    shut_down: AtomicBool,
}

impl MockState {
    fn set_up(&self, url: &str) {
        if self.shut_down.load(Ordering::SeqCst) {
            return;
        }
        if lock(&self.connected).insert(url.to_string()) {
            let _ = self.status_tx.send(RelayStatus::Connected {
                url: url.to_string(),
            });
        }
    }

    fn set_down(&self, url: &str) {
        if lock(&self.connected).remove(url) {
            let _ = self.status_tx.send(RelayStatus::Disconnected {
                url: url.to_string(),
            });
        }
    }
}

/// A relay client that never touches the network.
pub struct MockRelayClient {
    state: Arc<MockState>,
    signer: Option<Arc<dyn Signer>>,
    fetch_calls: AtomicUsize,
    published: Mutex<Vec<Event>>,
    connect_calls: Mutex<Vec<Vec<String>>>,
}

impl std::fmt::Debug for MockRelayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockRelayClient")
            .field("state", &self.state)
            .field("has_signer", &self.signer.is_some())
            .finish_non_exhaustive()
    }
}

impl MockRelayClient {
    pub fn new(behavior: MockBehavior, signer: Option<Arc<dyn Signer>>) -> Self {
        let (status_tx, _) = broadcast::channel(64);
        Self {
            state: Arc::new(MockState {
                behavior,
                status_tx,
                connected: Mutex::new(HashSet::new()),
                shut_down: AtomicBool::new(false),
            }),
            signer,
            fetch_calls: AtomicUsize::new(0),
            published: Mutex::new(Vec::new()),
            connect_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.shut_down.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn published(&self) -> Vec<Event> {
        lock(&self.published).clone()
    }

    /// URL lists passed to each `connect` call.
    pub fn connect_calls(&self) -> Vec<Vec<String>> {
        lock(&self.connect_calls).clone()
    }

    /// Simulate a relay dropping.
    pub fn drop_relay(&self, url: &str) {
        self.state.set_down(url);
    }

    /// Simulate a relay coming (back) up.
    pub fn restore_relay(&self, url: &str) {
        self.state.set_up(url);
    }
}

#[async_trait]
impl RelayClient for MockRelayClient {
    async fn connect(&self, urls: &[String]) -> Result<(), RelayError> {
        lock(&self.connect_calls).push(urls.to_vec());
        if urls.is_empty() {
            return Err(RelayError::NoRelayUrls);
        }
        for url in urls {
            if !self.state.behavior.reachable.contains(url) {
                continue;
            }
            let state = Arc::clone(&self.state);
            let url = url.clone();
            tokio::spawn(async move {
                tokio::time::sleep(state.behavior.connect_delay).await;
                state.set_up(&url);
            });
        }
        Ok(())
    }

    fn subscribe_status(&self) -> broadcast::Receiver<RelayStatus> {
        self.state.status_tx.subscribe()
    }

    async fn connected_relays(&self) -> Vec<String> {
        lock(&self.state.connected).iter().cloned().collect()
    }

    async fn fetch_events(&self, filter: Filter) -> Result<Vec<Event>, RelayError> {
        let call = self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.state.behavior.fetch_delay).await;
        if lock(&self.state.connected).is_empty() {
            return Err(RelayError::NotConnected);
        }
        if call < self.state.behavior.fetch_failures {
            return Err(RelayError::Protocol("simulated relay failure".into()));
        }
        Ok(self
            .state
            .behavior
            .events
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect())
    }

    async fn publish(&self, event: &Event) -> Result<usize, RelayError> {
        let Some(url) = lock(&self.state.connected).iter().next().cloned() else {
            return Err(RelayError::NotConnected);
        };
        if self.state.behavior.reject_publish {
            return Err(RelayError::Rejected {
                url,
                message: "blocked: not allowed".into(),
            });
        }
        lock(&self.published).push(event.clone());
        Ok(1)
    }

    fn signer(&self) -> Option<Arc<dyn Signer>> {
        self.signer.clone()
    }

    async fn shutdown(&self) {
        self.state.shut_down.store(true, Ordering::SeqCst);
        let urls: Vec<String> = lock(&self.state.connected).iter().cloned().collect();
        for url in urls {
            self.state.set_down(&url);
        }
    }
}

/// Builds [`MockRelayClient`]s and remembers each one.
#[derive(Debug, Default)]
pub struct MockClientFactory {
    behavior: Mutex<MockBehavior>,
    created: Mutex<Vec<Arc<MockRelayClient>>>,
}

impl MockClientFactory {
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            created: Mutex::new(Vec::new()),
        }
    }

    /// Behaviour for clients created from now on.
    pub fn set_behavior(&self, behavior: MockBehavior) {
        *lock(&self.behavior) = behavior;
    }

    pub fn clients(&self) -> Vec<Arc<MockRelayClient>> {
        lock(&self.created).clone()
    }

    pub fn last(&self) -> Option<Arc<MockRelayClient>> {
        lock(&self.created).last().cloned()
    }
}

impl RelayClientFactory for MockClientFactory {
    fn create(&self, signer: Option<Arc<dyn Signer>>) -> Arc<dyn RelayClient> {
        let client = Arc::new(MockRelayClient::new(lock(&self.behavior).clone(), signer));
        lock(&self.created).push(Arc::clone(&client));
        client
    }
}

/// An LNURL client with canned answers.
#[derive(Debug)]
pub struct StaticLnurlClient {
    descriptor: Result<PayDescriptor, PaymentFailure>,
    invoice: Result<String, PaymentFailure>,
    invoice_requests: Mutex<Vec<(u64, Option<String>)>>,
}

impl StaticLnurlClient {
    pub fn new(descriptor: PayDescriptor, invoice: impl Into<String>) -> Self {
        Self {
            descriptor: Ok(descriptor),
            invoice: Ok(invoice.into()),
            invoice_requests: Mutex::new(Vec::new()),
        }
    }

    /// A client whose descriptor lookup fails.
    pub fn failing(failure: PaymentFailure) -> Self {
        Self {
            descriptor: Err(failure.clone()),
            invoice: Err(failure),
            invoice_requests: Mutex::new(Vec::new()),
        }
    }

    /// `(amount_msats, zap_request)` of every invoice request.
    pub fn invoice_requests(&self) -> Vec<(u64, Option<String>)> {
        lock(&self.invoice_requests).clone()
    }
}

/// A descriptor accepting 1..=100 000 sats, with or without zap support.
pub fn pay_descriptor(allows_nostr: bool) -> PayDescriptor {
    PayDescriptor {
        callback: "https://pay.example/callback".into(),
        min_sendable: 1_000,
        max_sendable: 100_000_000,
        metadata: "[[\"text/plain\",\"tips\"]]".into(),
        tag: "payRequest".into(),
        allows_nostr,
        nostr_pubkey: allows_nostr.then(|| "ab".repeat(32)),
        comment_allowed: None,
    }
}

#[async_trait]
impl LnurlClient for StaticLnurlClient {
    async fn fetch_descriptor(
        &self,
        _address: &LightningAddress,
    ) -> Result<PayDescriptor, PaymentFailure> {
        self.descriptor.clone()
    }

    async fn request_invoice(
        &self,
        _address: &LightningAddress,
        _descriptor: &PayDescriptor,
        amount_msats: u64,
        zap_request: Option<&str>,
    ) -> Result<String, PaymentFailure> {
        lock(&self.invoice_requests).push((amount_msats, zap_request.map(ToString::to_string)));
        self.invoice.clone()
    }
}

/// A payment capability that records what it was asked to do and either
/// succeeds or fails. Implements every capability trait.
#[derive(Debug, Default)]
pub struct RecordingCapability {
    fail: bool,
    received: Mutex<Vec<String>>,
}

impl RecordingCapability {
    pub fn succeeding() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            received: Mutex::new(Vec::new()),
        }
    }

    pub fn received(&self) -> Vec<String> {
        lock(&self.received).clone()
    }

    fn record(&self, value: &str) -> Result<(), CapabilityError> {
        lock(&self.received).push(value.to_string());
        if self.fail {
            Err(CapabilityError("declined".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ZapCapability for RecordingCapability {
    async fn zap(
        &self,
        _address: &LightningAddress,
        _descriptor: &PayDescriptor,
        _amount_msats: u64,
        zap_request: &str,
    ) -> Result<(), CapabilityError> {
        self.record(zap_request)
    }
}

#[async_trait]
impl WalletCapability for RecordingCapability {
    async fn enable(&self) -> Result<(), CapabilityError> {
        if self.fail {
            Err(CapabilityError("wallet locked".into()))
        } else {
            Ok(())
        }
    }

    async fn send_payment(&self, invoice: &str) -> Result<PaymentReceipt, CapabilityError> {
        self.record(invoice)?;
        Ok(PaymentReceipt {
            preimage: "00".repeat(32),
        })
    }
}

impl UriOpener for RecordingCapability {
    fn open(&self, uri: &str) -> Result<(), CapabilityError> {
        self.record(uri)
    }
}

impl Clipboard for RecordingCapability {
    fn copy(&self, text: &str) -> Result<(), CapabilityError> {
        self.record(text)
    }
}

#![allow(clippy::unwrap_used, clippy::panic)]

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use satsip_nostr::nip19::{self, ProfilePointer};
use satsip_nostr::{Keys, LocalSigner, Signer, SignerProbe, StaticSignerProbe};

use super::*;
use crate::notify::NoticeLevel;
use crate::session::SessionUpdate;
use crate::testing::{MockBehavior, MockClientFactory, MockRelayClient, RecordingNotifier};

const A: &str = "wss://a.example";
const B: &str = "wss://b.example";

struct Harness {
    manager: Arc<ConnectionManager>,
    factory: Arc<MockClientFactory>,
    notifier: Arc<RecordingNotifier>,
    session: Arc<SessionStore>,
}

fn reachable(urls: &[&str], delay_ms: u64) -> MockBehavior {
    MockBehavior {
        reachable: urls.iter().map(ToString::to_string).collect(),
        connect_delay: Duration::from_millis(delay_ms),
        ..MockBehavior::default()
    }
}

fn harness_with(
    behavior: MockBehavior,
    probe: Arc<dyn SignerProbe>,
    first_relay_timeout: Duration,
) -> Harness {
    let factory = Arc::new(MockClientFactory::new(behavior));
    let notifier = Arc::new(RecordingNotifier::new());
    let session = Arc::new(SessionStore::in_memory());
    let config = ManagerConfig {
        default_relays: vec![A.to_string()],
        connect_timeout: Duration::from_secs(1),
        first_relay_timeout,
    };
    let manager = Arc::new(ConnectionManager::new(
        config,
        Arc::clone(&factory) as Arc<dyn RelayClientFactory>,
        probe,
        Arc::clone(&session),
        Arc::clone(&notifier) as Arc<dyn Notifier>,
    ));
    Harness {
        manager,
        factory,
        notifier,
        session,
    }
}

fn harness(behavior: MockBehavior) -> Harness {
    harness_with(
        behavior,
        Arc::new(StaticSignerProbe::none()),
        Duration::from_secs(2),
    )
}

fn local_signer() -> (Keys, Arc<dyn Signer>) {
    let keys = Keys::generate();
    let signer: Arc<dyn Signer> = Arc::new(LocalSigner::new(keys.clone()));
    (keys, signer)
}

fn is_current(manager: &ConnectionManager, mock: &Arc<MockRelayClient>) -> bool {
    manager
        .client()
        .is_some_and(|c| std::ptr::addr_eq(Arc::as_ptr(&c), Arc::as_ptr(mock)))
}

async fn wait_for_phase(manager: &ConnectionManager, phase: ConnectionPhase) {
    let mut rx = manager.subscribe();
    tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| s.phase == phase))
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn connect_resolves_on_first_relay_without_waiting_for_silent_ones() {
    let h = harness(reachable(&[A], 20));
    let started = Instant::now();

    h.manager
        .connect(Some(vec![A.into(), B.into()]))
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(1));
    let state = h.manager.state();
    assert_eq!(state.phase, ConnectionPhase::Connected);
    assert!(state.is_connected);
    assert_eq!(state.connected_relay_count, 1);

    let record = h.session.load().unwrap();
    assert!(record.is_connected);
    assert_eq!(record.relay_urls, vec![A.to_string(), B.to_string()]);
}

#[tokio::test]
async fn connect_fails_when_no_relay_comes_up() {
    let h = harness_with(
        MockBehavior::default(),
        Arc::new(StaticSignerProbe::none()),
        Duration::from_millis(100),
    );

    let err = h
        .manager
        .connect(Some(vec![A.into(), B.into()]))
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::NoRelaysReachable { attempted: 2 }));
    let state = h.manager.state();
    assert_eq!(state.phase, ConnectionPhase::Disconnected);
    assert!(!state.is_connected);
    assert_eq!(state.connected_relay_count, 0);
    assert!(h.manager.client().is_none());
    assert!(h.factory.last().unwrap().is_shut_down());
    assert!(h.session.load().is_none());
}

#[tokio::test]
async fn newer_connect_supersedes_one_in_flight() {
    let h = harness(reachable(&[A], 300));
    let first = {
        let manager = Arc::clone(&h.manager);
        tokio::spawn(async move { manager.connect(Some(vec![A.into()])).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    h.factory.set_behavior(reachable(&[B], 10));
    h.manager.connect(Some(vec![B.into()])).await.unwrap();

    assert!(matches!(
        first.await.unwrap(),
        Err(ClientError::ConnectCancelled)
    ));
    let clients = h.factory.clients();
    assert_eq!(clients.len(), 2);
    assert!(clients[0].is_shut_down());
    assert!(is_current(&h.manager, &clients[1]));

    // The abandoned client's relay would have come up by now.
    tokio::time::sleep(Duration::from_millis(400)).await;
    let state = h.manager.state();
    assert_eq!(state.phase, ConnectionPhase::Connected);
    assert_eq!(state.connected_relay_count, 1);
    assert_eq!(h.manager.relay_urls(), vec![B.to_string()]);
    assert_eq!(h.session.load().unwrap().relay_urls, vec![B.to_string()]);
}

#[tokio::test]
async fn missing_signer_warns_once_and_connects_read_only() {
    let h = harness(reachable(&[A], 0));

    h.manager.connect(None).await.unwrap();
    h.manager.connect(None).await.unwrap();

    assert_eq!(h.notifier.count(NoticeLevel::Warning), 1);
    let state = h.manager.state();
    assert!(!state.has_signer);
    assert!(state.user_pubkey.is_none());
    assert!(h.manager.signer().is_none());
    assert!(!h.session.load().unwrap().has_signer);
}

#[tokio::test]
async fn signer_identity_is_recorded() {
    let (keys, signer) = local_signer();
    let h = harness_with(
        reachable(&[A], 0),
        Arc::new(StaticSignerProbe::new(Some(signer))),
        Duration::from_secs(2),
    );

    h.manager.connect(None).await.unwrap();

    let state = h.manager.state();
    assert!(state.has_signer);
    assert_eq!(state.user_pubkey.as_deref(), Some(keys.public_key()));
    let record = h.session.load().unwrap();
    assert!(record.has_signer);
    assert_eq!(record.user_npub, Some(keys.npub()));
    assert_eq!(h.notifier.count(NoticeLevel::Warning), 0);
}

#[tokio::test]
async fn empty_relay_list_falls_back_to_defaults() {
    let h = harness(reachable(&[A], 0));

    h.manager.connect(Some(vec!["  ".into(), "https://nope".into()])).await.unwrap();

    assert_eq!(h.factory.last().unwrap().connect_calls(), vec![vec![A.to_string()]]);
}

#[tokio::test]
async fn disconnect_clears_state_and_session() {
    let h = harness(reachable(&[A], 0));
    h.manager.connect(None).await.unwrap();
    let client = h.factory.last().unwrap();

    h.manager.disconnect().await;

    assert!(client.is_shut_down());
    assert!(h.manager.client().is_none());
    assert!(h.session.load().is_none());
    let state = h.manager.state();
    assert_eq!(state.phase, ConnectionPhase::Disconnected);
    assert_eq!(state.connected_relay_count, 0);

    assert!(!h.manager.handle_visibility_regained().await.unwrap());
    assert_eq!(h.factory.clients().len(), 1);
}

#[tokio::test]
async fn relay_drops_are_mirrored_into_state_and_session() {
    let h = harness(reachable(&[A], 0));
    h.manager.connect(None).await.unwrap();
    let client = h.factory.last().unwrap();

    client.drop_relay(A);
    wait_for_phase(&h.manager, ConnectionPhase::Disconnected).await;
    assert!(!h.manager.state().is_connected);
    assert!(!h.session.load().unwrap().is_connected);

    client.restore_relay(A);
    wait_for_phase(&h.manager, ConnectionPhase::Connected).await;
    assert_eq!(h.manager.state().connected_relay_count, 1);
    assert!(h.session.load().unwrap().is_connected);
}

#[tokio::test]
async fn visibility_regained_reconnects_dropped_connection() {
    let h = harness(reachable(&[A], 0));
    assert!(!h.manager.handle_visibility_regained().await.unwrap());

    h.manager.connect(None).await.unwrap();
    assert!(!h.manager.handle_visibility_regained().await.unwrap());

    h.factory.last().unwrap().drop_relay(A);
    wait_for_phase(&h.manager, ConnectionPhase::Disconnected).await;

    assert!(h.manager.handle_visibility_regained().await.unwrap());
    let clients = h.factory.clients();
    assert_eq!(clients.len(), 2);
    assert!(clients[0].is_shut_down());
    assert_eq!(h.manager.state().phase, ConnectionPhase::Connected);
}

#[tokio::test]
async fn restore_needs_a_session_with_signer() {
    let h = harness(reachable(&[B], 0));
    assert!(!h.manager.restore().await.unwrap());

    h.session.save(SessionUpdate {
        has_signer: Some(false),
        relay_urls: Some(vec![B.into()]),
        ..SessionUpdate::default()
    });
    assert!(!h.manager.restore().await.unwrap());

    h.session.save(SessionUpdate {
        has_signer: Some(true),
        ..SessionUpdate::default()
    });
    assert!(h.manager.restore().await.unwrap());
    assert_eq!(h.factory.last().unwrap().connect_calls(), vec![vec![B.to_string()]]);
    assert_eq!(h.manager.state().phase, ConnectionPhase::Connected);
}

#[tokio::test]
async fn connect_to_identifier_tries_hints_before_defaults() {
    let h = harness(reachable(&[A, B], 0));
    let pubkey = Keys::generate().public_key().to_string();
    let nprofile = nip19::encode_nprofile(&ProfilePointer {
        pubkey: pubkey.clone(),
        relays: vec![B.into()],
    })
    .unwrap();

    let identifier = h.manager.connect_to_identifier(&nprofile).await.unwrap();

    assert_eq!(identifier.pubkey, pubkey);
    assert_eq!(
        h.factory.last().unwrap().connect_calls(),
        vec![vec![B.to_string(), A.to_string()]]
    );
    assert_eq!(h.session.load().unwrap().identifier, Some(nprofile));
}

#[tokio::test]
async fn connect_to_identifier_rejects_garbage() {
    let h = harness(reachable(&[A], 0));
    let err = h.manager.connect_to_identifier("npub1garbage").await.unwrap_err();
    assert!(matches!(err, ClientError::Decode(_)));
    assert!(h.factory.clients().is_empty());
}

#[tokio::test]
async fn reconnect_reuses_session_relays_and_identifier() {
    let h = harness(reachable(&[A, B], 0));
    let pubkey = Keys::generate().public_key().to_string();
    h.manager.connect_to_identifier(&pubkey).await.unwrap();
    let first = h.factory.last().unwrap();

    h.manager.reconnect().await.unwrap();

    assert!(first.is_shut_down());
    let second = h.factory.last().unwrap();
    assert_eq!(second.connect_calls(), vec![vec![A.to_string()]]);
    assert_eq!(h.session.load().unwrap().identifier, Some(pubkey));
    assert!(is_current(&h.manager, &second));
}

#[tokio::test]
async fn plain_connect_replaces_identifier_from_earlier_session() {
    let h = harness(reachable(&[A, B], 0));
    let nprofile = nip19::encode_nprofile(&ProfilePointer {
        pubkey: Keys::generate().public_key().to_string(),
        relays: vec![B.into()],
    })
    .unwrap();
    h.manager.connect_to_identifier(&nprofile).await.unwrap();
    assert_eq!(h.session.load().unwrap().identifier, Some(nprofile));

    h.manager.connect(Some(vec![A.into()])).await.unwrap();

    let record = h.session.load().unwrap();
    assert_eq!(record.identifier, None);
    assert_eq!(record.relay_urls, vec![A.to_string()]);

    h.manager.reconnect().await.unwrap();
    assert_eq!(h.session.load().unwrap().identifier, None);
}

#[tokio::test]
async fn connect_without_signer_drops_stale_identity() {
    let h = harness(reachable(&[A], 0));
    let keys = Keys::generate();
    h.session.save(SessionUpdate {
        has_signer: Some(true),
        user_pubkey: Some(keys.public_key().to_string()),
        user_npub: Some(keys.npub()),
        ..SessionUpdate::default()
    });

    h.manager.connect(None).await.unwrap();

    let record = h.session.load().unwrap();
    assert!(!record.has_signer);
    assert_eq!(record.user_pubkey, None);
    assert_eq!(record.user_npub, None);
}

/// A probe whose answer can change between calls.
#[derive(Default)]
struct SwitchableProbe {
    signer: Mutex<Option<Arc<dyn Signer>>>,
}

#[async_trait]
impl SignerProbe for SwitchableProbe {
    async fn probe(&self) -> Option<Arc<dyn Signer>> {
        self.signer.lock().unwrap().clone()
    }
}

#[tokio::test]
async fn signer_watch_picks_up_late_signer() {
    let probe = Arc::new(SwitchableProbe::default());
    let h = harness_with(
        reachable(&[A], 0),
        Arc::clone(&probe) as Arc<dyn SignerProbe>,
        Duration::from_secs(2),
    );
    h.manager.connect(None).await.unwrap();
    assert!(!h.manager.state().has_signer);

    let (keys, signer) = local_signer();
    *probe.signer.lock().unwrap() = Some(signer);
    let watch = h.manager.spawn_signer_watch(Duration::from_millis(20));

    let mut rx = h.manager.subscribe();
    tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| s.has_signer))
        .await
        .unwrap()
        .unwrap();
    watch.abort();

    assert_eq!(h.manager.state().user_pubkey.as_deref(), Some(keys.public_key()));
    let record = h.session.load().unwrap();
    assert!(record.has_signer);
    assert_eq!(record.user_npub, Some(keys.npub()));
}

#[tokio::test]
async fn vanished_signer_clears_recorded_identity() {
    let (_keys, signer) = local_signer();
    let probe = Arc::new(SwitchableProbe::default());
    *probe.signer.lock().unwrap() = Some(signer);
    let h = harness_with(
        reachable(&[A], 0),
        Arc::clone(&probe) as Arc<dyn SignerProbe>,
        Duration::from_secs(2),
    );
    h.manager.connect(None).await.unwrap();
    assert!(h.session.load().unwrap().user_npub.is_some());

    *probe.signer.lock().unwrap() = None;
    h.manager.refresh_signer().await;

    assert!(!h.manager.state().has_signer);
    assert_eq!(h.manager.state().user_pubkey, None);
    let record = h.session.load().unwrap();
    assert!(!record.has_signer);
    assert_eq!(record.user_pubkey, None);
    assert_eq!(record.user_npub, None);
}

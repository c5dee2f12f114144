#![allow(clippy::unwrap_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use satsip_nostr::schema::{self, KIND_ZAP_RECEIPT, LinkRecord, Profile, Theme, ZapRequest};
use satsip_nostr::testing::RejectingSigner;
use satsip_nostr::{
    Event, EventTemplate, Keys, LocalSigner, ParseError, Signer, StaticSignerProbe,
};

use super::*;
use crate::manager::ManagerConfig;
use crate::session::SessionStore;
use crate::testing::{
    MockBehavior, MockClientFactory, RecordingCapability, RecordingNotifier, StaticLnurlClient,
    pay_descriptor,
};
use crate::zap::{Clipboard, PaymentFailure, UriOpener};

const RELAY: &str = "wss://relay.example";

struct Fixture {
    service: NostrService,
    factory: Arc<MockClientFactory>,
    notifier: Arc<RecordingNotifier>,
}

struct Setup {
    events: Vec<Event>,
    signer: Option<Arc<dyn Signer>>,
    policy: QueryPolicy,
    fetch_delay: Duration,
    fetch_failures: usize,
    reject_publish: bool,
    lnurl: Arc<dyn LnurlClient>,
    capabilities: PaymentCapabilities,
    connect: bool,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            events: Vec::new(),
            signer: None,
            policy: QueryPolicy {
                timeout: Duration::from_secs(2),
                attempts: 3,
            },
            fetch_delay: Duration::ZERO,
            fetch_failures: 0,
            reject_publish: false,
            lnurl: Arc::new(StaticLnurlClient::new(pay_descriptor(false), "lnbc210n1test")),
            capabilities: PaymentCapabilities::default(),
            connect: true,
        }
    }
}

impl Setup {
    async fn build(self) -> Fixture {
        let factory = Arc::new(MockClientFactory::new(MockBehavior {
            reachable: vec![RELAY.to_string()],
            events: self.events,
            fetch_delay: self.fetch_delay,
            fetch_failures: self.fetch_failures,
            reject_publish: self.reject_publish,
            ..MockBehavior::default()
        }));
        let notifier = Arc::new(RecordingNotifier::new());
        let manager = Arc::new(ConnectionManager::new(
            ManagerConfig {
                default_relays: vec![RELAY.to_string()],
                connect_timeout: Duration::from_secs(1),
                first_relay_timeout: Duration::from_secs(2),
            },
            Arc::clone(&factory) as Arc<dyn crate::relay::RelayClientFactory>,
            Arc::new(StaticSignerProbe::new(self.signer)),
            Arc::new(SessionStore::in_memory()),
            Arc::clone(&notifier) as Arc<dyn Notifier>,
        ));
        if self.connect {
            manager.connect(None).await.unwrap();
        }
        let service = NostrService::new(
            manager,
            self.policy,
            Arc::clone(&notifier) as Arc<dyn Notifier>,
            self.lnurl,
            self.capabilities,
        );
        Fixture {
            service,
            factory,
            notifier,
        }
    }
}

fn signer_for(keys: &Keys) -> Option<Arc<dyn Signer>> {
    Some(Arc::new(LocalSigner::new(keys.clone())))
}

fn link(id: &str, title: &str, position: i64, is_active: bool) -> LinkRecord {
    LinkRecord {
        id: id.into(),
        title: title.into(),
        url: format!("https://{id}.example"),
        position,
        is_active,
        ..LinkRecord::default()
    }
}

fn record_event<T: AppRecord>(keys: &Keys, record: &T, created_at: u64) -> Event {
    keys.sign(schema::serialize(record, created_at)).unwrap()
}

fn raw_event(keys: &Keys, kind: u16, tags: &[&[&str]], content: &str, created_at: u64) -> Event {
    keys.sign(EventTemplate {
        kind,
        content: content.into(),
        tags: tags
            .iter()
            .map(|t| t.iter().map(ToString::to_string).collect())
            .collect(),
        created_at,
    })
    .unwrap()
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

#[tokio::test]
async fn links_are_newest_per_id_active_and_ordered() {
    let creator = Keys::generate();
    let stranger = Keys::generate();
    let events = vec![
        record_event(&creator, &link("c", "Third", 3, true), 10),
        record_event(&creator, &link("a", "Old first", 1, true), 10),
        record_event(&creator, &link("a", "First", 1, true), 20),
        record_event(&creator, &link("b", "Second", 2, true), 10),
        record_event(&creator, &link("hidden", "Hidden", 0, false), 10),
        raw_event(
            &creator,
            KIND_APP_DATA,
            &[&["d", "link-broken"], &["t", APP_TAG]],
            "{not json",
            10,
        ),
        record_event(&creator, &Profile::default(), 10),
        record_event(&stranger, &link("x", "Not theirs", 0, true), 10),
    ];
    let f = Setup {
        events,
        ..Setup::default()
    }
    .build()
    .await;

    let links = f.service.get_links(creator.public_key()).await.unwrap();

    let titles: Vec<_> = links.iter().map(|l| l.title.as_str()).collect();
    assert_eq!(titles, vec!["First", "Second", "Third"]);
}

#[tokio::test]
async fn profile_is_newest_and_missing_records_are_none() {
    let creator = Keys::generate();
    let old = Profile {
        name: "old".into(),
        ..Profile::default()
    };
    let new = Profile {
        name: "new".into(),
        lud16: Some("alice@pay.example".into()),
        ..Profile::default()
    };
    let f = Setup {
        events: vec![
            record_event(&creator, &new, 20),
            record_event(&creator, &old, 10),
        ],
        ..Setup::default()
    }
    .build()
    .await;

    let profile = f.service.get_profile(creator.public_key()).await.unwrap();
    assert_eq!(profile, Some(new));
    assert_eq!(f.service.get_theme(creator.public_key()).await.unwrap(), None);
    assert_eq!(f.service.get_wallets(creator.public_key()).await.unwrap(), None);
}

#[tokio::test]
async fn malformed_singleton_parses_to_zero_value() {
    let creator = Keys::generate();
    let f = Setup {
        events: vec![raw_event(
            &creator,
            KIND_APP_DATA,
            &[&["d", "theme"], &["t", APP_TAG]],
            "[1,2,3]",
            5,
        )],
        ..Setup::default()
    }
    .build()
    .await;

    let theme = f.service.get_theme(creator.public_key()).await.unwrap();
    assert_eq!(theme, Some(Theme::default()));
}

#[tokio::test]
async fn zap_receipts_skip_malformed_and_sort_newest_first() {
    let creator = Keys::generate();
    let wallet = Keys::generate();
    let pk = creator.public_key();
    let f = Setup {
        events: vec![
            raw_event(&wallet, KIND_ZAP_RECEIPT, &[&["p", pk], &["bolt11", "lnbc10n1a"]], "", 10),
            raw_event(&wallet, KIND_ZAP_RECEIPT, &[&["p", pk]], "", 30),
            raw_event(&wallet, KIND_ZAP_RECEIPT, &[&["p", pk], &["bolt11", "lnbc20n1b"]], "", 20),
        ],
        ..Setup::default()
    }
    .build()
    .await;

    let receipts = f.service.get_zap_receipts(pk).await.unwrap();

    let invoices: Vec<_> = receipts.iter().map(|r| r.bolt11.as_str()).collect();
    assert_eq!(invoices, vec!["lnbc20n1b", "lnbc10n1a"]);
    assert_eq!(receipts[1].amount_msats(), Some(1_000));
}

#[tokio::test]
async fn query_timeout_is_not_retried() {
    let f = Setup {
        fetch_delay: Duration::from_millis(300),
        policy: QueryPolicy {
            timeout: Duration::from_millis(50),
            attempts: 3,
        },
        ..Setup::default()
    }
    .build()
    .await;

    let err = f.service.get_profile(&"ab".repeat(32)).await.unwrap_err();

    assert!(matches!(err, ClientError::QueryTimeout { timeout_ms: 50 }));
    assert_eq!(f.factory.last().unwrap().fetch_calls(), 1);
}

#[tokio::test]
async fn relay_failures_are_retried_up_to_the_attempt_limit() {
    let f = Setup {
        fetch_failures: 2,
        ..Setup::default()
    }
    .build()
    .await;
    assert!(f.service.get_links(&"ab".repeat(32)).await.unwrap().is_empty());
    assert_eq!(f.factory.last().unwrap().fetch_calls(), 3);

    let f = Setup {
        fetch_failures: 10,
        ..Setup::default()
    }
    .build()
    .await;
    let err = f.service.get_links(&"ab".repeat(32)).await.unwrap_err();
    assert!(matches!(err, ClientError::Relay(_)));
    assert_eq!(f.factory.last().unwrap().fetch_calls(), 3);
}

#[tokio::test]
async fn queries_before_connecting_fail_with_not_connected() {
    let f = Setup {
        connect: false,
        ..Setup::default()
    }
    .build()
    .await;

    let err = f.service.get_profile(&"ab".repeat(32)).await.unwrap_err();
    assert!(matches!(err, ClientError::NotConnected));
}

// ---------------------------------------------------------------------------
// Writes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn publish_signs_and_sends_app_record() {
    let keys = Keys::generate();
    let f = Setup {
        signer: signer_for(&keys),
        ..Setup::default()
    }
    .build()
    .await;

    assert!(f.service.publish_link(&link("l1", "Shop", 1, true)).await);

    let published = f.factory.last().unwrap().published();
    assert_eq!(published.len(), 1);
    let event = &published[0];
    assert_eq!(event.kind, KIND_APP_DATA);
    assert_eq!(event.pubkey, keys.public_key());
    assert_eq!(event.d_tag(), Some("link-l1"));
    assert!(event.verify().is_ok());
    assert!(f.notifier.notices().is_empty());
}

#[tokio::test]
async fn publish_without_signer_returns_false_and_notifies() {
    let f = Setup::default().build().await;
    let theme = Theme {
        name: "dark".into(),
        ..Theme::default()
    };

    assert!(!f.service.publish_theme(&theme).await);

    assert_eq!(f.notifier.count(NoticeLevel::Error), 1);
    assert!(f.factory.last().unwrap().published().is_empty());
}

#[tokio::test]
async fn rejected_publish_returns_false_and_notifies() {
    let keys = Keys::generate();
    let f = Setup {
        signer: signer_for(&keys),
        reject_publish: true,
        ..Setup::default()
    }
    .build()
    .await;

    assert!(!f.service.publish_profile(&Profile::default()).await);
    assert_eq!(f.notifier.count(NoticeLevel::Error), 1);
}

#[tokio::test]
async fn invalid_record_is_not_published() {
    let keys = Keys::generate();
    let f = Setup {
        signer: signer_for(&keys),
        ..Setup::default()
    }
    .build()
    .await;

    assert!(!f.service.publish_link(&link("", "No id", 0, true)).await);
    assert!(!f.service.publish_wallets(&schema::Wallets {
        wallets: vec![schema::WalletEntry::default()],
    })
    .await);
    assert_eq!(f.notifier.count(NoticeLevel::Error), 2);
    assert!(f.factory.last().unwrap().published().is_empty());
}

// ---------------------------------------------------------------------------
// Zaps
// ---------------------------------------------------------------------------

fn zap_data() -> ZapRequestData {
    ZapRequestData {
        amount_msats: 21_000,
        recipient_pubkey: "cd".repeat(32),
        relays: vec![RELAY.into()],
        content: "great post".into(),
        event_id: None,
        lnurl: None,
    }
}

#[tokio::test]
async fn zap_request_is_signed_by_the_user() {
    let keys = Keys::generate();
    let f = Setup {
        signer: signer_for(&keys),
        ..Setup::default()
    }
    .build()
    .await;

    let json = f.service.create_zap_request(&zap_data()).await.unwrap();

    let request = ZapRequest::from_json(&json).unwrap();
    assert_eq!(request.sender(), keys.public_key());
    assert_eq!(request.amount_msats, Some(21_000));
    assert_eq!(request.relays, vec![RELAY.to_string()]);
    assert!(request.event.verify().is_ok());
}

#[tokio::test]
async fn zap_request_needs_a_willing_signer() {
    let f = Setup::default().build().await;
    let err = f.service.create_zap_request(&zap_data()).await.unwrap_err();
    assert!(matches!(err, ClientError::Signing(SignerError::Unavailable)));

    let rejecting: Arc<dyn Signer> = Arc::new(RejectingSigner::new("ab".repeat(32)));
    let f = Setup {
        signer: Some(rejecting),
        ..Setup::default()
    }
    .build()
    .await;
    let err = f.service.create_zap_request(&zap_data()).await.unwrap_err();
    assert!(matches!(err, ClientError::Signing(SignerError::Rejected(_))));
}

#[tokio::test]
async fn invalid_zap_request_is_rejected_before_signing() {
    let keys = Keys::generate();
    let f = Setup {
        signer: signer_for(&keys),
        ..Setup::default()
    }
    .build()
    .await;

    let zero = ZapRequestData {
        amount_msats: 0,
        ..zap_data()
    };
    let err = f.service.create_zap_request(&zero).await.unwrap_err();
    assert!(matches!(err, ClientError::InvalidRecord(ParseError::Invalid(_))));

    let bad_recipient = ZapRequestData {
        recipient_pubkey: "not-hex".into(),
        ..zap_data()
    };
    let err = f.service.create_zap_request(&bad_recipient).await.unwrap_err();
    assert!(matches!(err, ClientError::InvalidRecord(_)));
}

#[tokio::test]
async fn send_zap_falls_back_to_lightning_uri() {
    let opener = Arc::new(RecordingCapability::succeeding());
    let lnurl = Arc::new(StaticLnurlClient::new(pay_descriptor(false), "lnbc210n1test"));
    let f = Setup {
        lnurl: Arc::clone(&lnurl) as Arc<dyn LnurlClient>,
        capabilities: PaymentCapabilities {
            uri_opener: Some(Arc::clone(&opener) as Arc<dyn UriOpener>),
            ..PaymentCapabilities::default()
        },
        ..Setup::default()
    }
    .build()
    .await;

    assert!(f
        .service
        .send_zap("alice@pay.example", 21, Some("{\"kind\":9734}"))
        .await
        .unwrap());

    assert_eq!(opener.received(), vec!["lightning:lnbc210n1test".to_string()]);
    // The provider does not accept zaps, so the request is not forwarded.
    assert_eq!(lnurl.invoice_requests(), vec![(21_000, None)]);
}

#[tokio::test]
async fn send_zap_copies_invoice_as_last_resort() {
    let clipboard = Arc::new(RecordingCapability::succeeding());
    let f = Setup {
        capabilities: PaymentCapabilities {
            wallet: Some(Arc::new(RecordingCapability::failing())),
            uri_opener: Some(Arc::new(RecordingCapability::failing())),
            clipboard: Some(Arc::clone(&clipboard) as Arc<dyn Clipboard>),
            ..PaymentCapabilities::default()
        },
        ..Setup::default()
    }
    .build()
    .await;

    let route = f.service.pay_zap("alice@pay.example", 21, None).await.unwrap();

    assert_eq!(
        route,
        PaymentRoute::Clipboard {
            invoice: "lnbc210n1test".into()
        }
    );
    assert_eq!(clipboard.received(), vec!["lnbc210n1test".to_string()]);
    assert_eq!(f.notifier.count(NoticeLevel::Info), 1);
}

#[tokio::test]
async fn send_zap_reports_exhaustion_and_bad_addresses() {
    let f = Setup::default().build().await;

    let err = f.service.send_zap("alice@pay.example", 21, None).await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::PaymentFailed(PaymentFailure::Exhausted)
    ));

    let err = f.service.send_zap("not-an-address", 21, None).await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::PaymentFailed(PaymentFailure::MalformedAddress(_))
    ));
    assert_eq!(f.notifier.count(NoticeLevel::Error), 2);
}

//! `SatSip` client
//!
//! The stateful half of the app's Nostr layer:
//!
//! - **Relay transport**: a WebSocket relay pool behind the [`RelayClient`] trait
//! - **Connection manager**: cancellable connects, relay status mirroring,
//!   visibility-driven reconnects
//! - **Session store**: the persisted connection record used to resume
//! - **Service**: profile, links, theme and wallet queries, publishing, zaps
//! - **Zaps**: LNURL-pay resolution and the payment fallback chain

pub mod error;
pub mod manager;
pub mod notify;
pub mod relay;
pub mod service;
pub mod session;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
pub mod zap;

pub use error::{ClientError, Result};
pub use manager::{ConnectionManager, ConnectionPhase, ConnectionState, ManagerConfig};
pub use notify::{NoticeLevel, Notifier, TracingNotifier};
pub use relay::{PoolFactory, RelayClient, RelayClientFactory, RelayError, RelayPool};
pub use service::{NostrService, QueryPolicy};
pub use session::{SessionRecord, SessionStore, SessionUpdate};

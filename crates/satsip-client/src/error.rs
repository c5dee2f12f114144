//! Client error taxonomy.

use satsip_nostr::{EventError, Nip19Error, ParseError, SignerError};

use crate::relay::RelayError;
use crate::zap::PaymentFailure;

/// Errors surfaced by the connection manager and the query/publish service.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Invalid identifier: {0}")]
    Decode(Nip19Error),

    #[error("Cannot encode identifier: {0}")]
    Encode(Nip19Error),

    #[error("No relays reachable (tried {attempted})")]
    NoRelaysReachable { attempted: usize },

    #[error("Connect attempt superseded by a newer one")]
    ConnectCancelled,

    #[error("Not connected to any relay")]
    NotConnected,

    #[error("Query timed out after {timeout_ms}ms")]
    QueryTimeout { timeout_ms: u64 },

    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),

    #[error("Signing error: {0}")]
    Signing(#[from] SignerError),

    /// A record or request failed validation before it was signed.
    #[error("Invalid record: {0}")]
    InvalidRecord(#[from] ParseError),

    #[error("Event error: {0}")]
    Event(#[from] EventError),

    #[error("Payment failed: {}", .0.user_message())]
    PaymentFailed(PaymentFailure),
}

impl From<Nip19Error> for ClientError {
    fn from(e: Nip19Error) -> Self {
        if e.is_decode() {
            Self::Decode(e)
        } else {
            Self::Encode(e)
        }
    }
}

impl ClientError {
    /// Whether a read that failed this way is repeated. Query timeouts
    /// never are.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Relay(_) | Self::NotConnected)
    }

    /// Whether the caller can reasonably try again later.
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NoRelaysReachable { .. } | Self::QueryTimeout { .. } | Self::Relay(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

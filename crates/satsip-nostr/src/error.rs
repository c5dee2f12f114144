//! Nostr primitive error types.

/// Errors from NIP-19 identifier encoding and decoding.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Nip19Error {
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Decode error: expected {expected} identifier, got {actual}")]
    PrefixMismatch {
        expected: &'static str,
        actual: String,
    },

    #[error("Encode error: {0}")]
    Encode(String),
}

impl Nip19Error {
    /// Whether this error came from decoding (as opposed to encoding).
    pub const fn is_decode(&self) -> bool {
        matches!(self, Self::Decode(_) | Self::PrefixMismatch { .. })
    }
}

/// Errors from building, hashing and verifying events.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("Invalid event: {0}")]
    Invalid(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Errors from strict record parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("Invalid JSON: {0}")]
    Json(String),

    #[error("Invalid payload: {0}")]
    Invalid(String),

    #[error("Unexpected kind: expected {expected}, got {actual}")]
    WrongKind { expected: u16, actual: u16 },

    #[error("Missing tag: {0}")]
    MissingTag(&'static str),
}

/// Errors from a signing capability.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignerError {
    #[error("No signer available")]
    Unavailable,

    #[error("Signing rejected: {0}")]
    Rejected(String),

    #[error("Signing failed: {0}")]
    Failed(String),
}

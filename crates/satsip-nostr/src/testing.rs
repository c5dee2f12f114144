//! Test doubles for code that needs a [`Signer`].

use async_trait::async_trait;

use crate::error::SignerError;
use crate::event::{Event, UnsignedEvent};
use crate::signer::Signer;

/// A signer that knows its public key but refuses every signing request,
/// like a user declining a prompt.
#[derive(Debug, Clone)]
pub struct RejectingSigner {
    pubkey: String,
}

impl RejectingSigner {
    pub fn new(pubkey: impl Into<String>) -> Self {
        Self {
            pubkey: pubkey.into(),
        }
    }
}

#[async_trait]
impl Signer for RejectingSigner {
    async fn public_key(&self) -> Result<String, SignerError> {
        Ok(self.pubkey.clone())
    }

    async fn sign_event(&self, _unsigned: UnsignedEvent) -> Result<Event, SignerError> {
        Err(SignerError::Rejected("user declined".into()))
    }
}

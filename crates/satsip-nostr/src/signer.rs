//! Signing capability.
//!
//! A [`Signer`] is anything that can produce signatures for the current
//! user: local keys, a remote signer, a hardware device. Whether one is
//! available is discovered through a [`SignerProbe`], which callers invoke on
//! demand (and optionally on a timer).

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::SignerError;
use crate::event::{Event, EventTemplate, UnsignedEvent};
use crate::keys::Keys;

/// A capability that signs events on behalf of the user.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Hex public key of the user this signer represents.
    async fn public_key(&self) -> Result<String, SignerError>;

    /// Sign an event authored by [`Signer::public_key`].
    async fn sign_event(&self, unsigned: UnsignedEvent) -> Result<Event, SignerError>;

    /// Attach the author and sign.
    async fn sign_template(&self, template: EventTemplate) -> Result<Event, SignerError> {
        let pubkey = self.public_key().await?;
        self.sign_event(template.into_unsigned(pubkey)).await
    }
}

/// A signer backed by in-process [`Keys`].
#[derive(Debug, Clone)]
pub struct LocalSigner {
    keys: Keys,
}

impl LocalSigner {
    pub const fn new(keys: Keys) -> Self {
        Self { keys }
    }

    pub const fn keys(&self) -> &Keys {
        &self.keys
    }
}

#[async_trait]
impl Signer for LocalSigner {
    async fn public_key(&self) -> Result<String, SignerError> {
        Ok(self.keys.public_key().to_string())
    }

    async fn sign_event(&self, unsigned: UnsignedEvent) -> Result<Event, SignerError> {
        self.keys
            .sign_unsigned(unsigned)
            .map_err(|e| SignerError::Failed(e.to_string()))
    }
}

/// Detects whether a signing capability is currently available.
#[async_trait]
pub trait SignerProbe: Send + Sync {
    async fn probe(&self) -> Option<Arc<dyn Signer>>;
}

/// A probe with a fixed answer.
#[derive(Clone, Default)]
pub struct StaticSignerProbe {
    signer: Option<Arc<dyn Signer>>,
}

impl StaticSignerProbe {
    pub fn new(signer: Option<Arc<dyn Signer>>) -> Self {
        Self { signer }
    }

    /// A probe that never finds a signer (read-only mode).
    pub fn none() -> Self {
        Self { signer: None }
    }
}

#[async_trait]
impl SignerProbe for StaticSignerProbe {
    async fn probe(&self) -> Option<Arc<dyn Signer>> {
        self.signer.clone()
    }
}

/// Looks for a key file on every probe, so a key added (or removed) while
/// the process runs is picked up on the next connect.
#[derive(Debug, Clone)]
pub struct KeyFileProbe {
    path: PathBuf,
}

impl KeyFileProbe {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SignerProbe for KeyFileProbe {
    async fn probe(&self) -> Option<Arc<dyn Signer>> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "No key file, continuing without signer");
            return None;
        }
        match Keys::load_from_file(&self.path) {
            Ok(keys) => Some(Arc::new(LocalSigner::new(keys))),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Key file present but unusable");
                None
            }
        }
    }
}

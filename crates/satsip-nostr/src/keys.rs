//! Local key material.
//!
//! A [`Keys`] value holds a secp256k1 secret key and signs events locally.
//! On disk the secret is stored as an `nsec` string with owner-only
//! permissions.

use std::path::Path;

use rand::RngCore;
use rand::rngs::OsRng;
use secp256k1::{Keypair, Message, Secp256k1, SecretKey};
use zeroize::Zeroize;

use crate::error::EventError;
use crate::event::{Event, EventTemplate, UnsignedEvent};
use crate::nip19;

/// A secp256k1 keypair used for signing events.
#[derive(Clone)]
pub struct Keys {
    secret: SecretKey,
    public_hex: String,
}

impl std::fmt::Debug for Keys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keys")
            .field("public", &self.public_hex)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl Keys {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        loop {
            let mut bytes = [0u8; 32];
            OsRng.fill_bytes(&mut bytes);
            let parsed = Self::from_secret_bytes(&bytes);
            bytes.zeroize();
            // Out-of-range scalars are astronomically rare; draw again.
            if let Ok(keys) = parsed {
                return keys;
            }
        }
    }

    /// Reconstruct from raw 32-byte secret key bytes.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, EventError> {
        if bytes.len() != 32 {
            return Err(EventError::InvalidKey(format!(
                "expected 32 secret key bytes, got {}",
                bytes.len()
            )));
        }
        let secret =
            SecretKey::from_slice(bytes).map_err(|e| EventError::InvalidKey(e.to_string()))?;
        let secp = Secp256k1::signing_only();
        let (xonly, _parity) = secret.x_only_public_key(&secp);
        Ok(Self {
            secret,
            public_hex: hex::encode(xonly.serialize()),
        })
    }

    /// Parse a secret key given as `nsec1...` or 64 hex characters.
    pub fn parse(input: &str) -> Result<Self, EventError> {
        let input = input.trim();
        if input.starts_with("nsec1") {
            let hex_secret =
                nip19::decode_nsec(input).map_err(|e| EventError::InvalidKey(e.to_string()))?;
            let mut bytes =
                hex::decode(&hex_secret).map_err(|e| EventError::InvalidKey(e.to_string()))?;
            let keys = Self::from_secret_bytes(&bytes);
            bytes.zeroize();
            keys
        } else {
            let mut bytes = hex::decode(input)
                .map_err(|e| EventError::InvalidKey(format!("bad hex secret: {e}")))?;
            let keys = Self::from_secret_bytes(&bytes);
            bytes.zeroize();
            keys
        }
    }

    /// Lowercase hex x-only public key.
    pub fn public_key(&self) -> &str {
        &self.public_hex
    }

    /// Bech32 `npub` of the public key.
    pub fn npub(&self) -> String {
        // The public key is always valid hex of the right length.
        nip19::encode_npub(&self.public_hex).unwrap_or_default()
    }

    /// Bech32 `nsec` of the secret key. Handle with care.
    pub fn nsec(&self) -> String {
        let mut hex_secret = hex::encode(self.secret.secret_bytes());
        let nsec = nip19::encode_nsec(&hex_secret).unwrap_or_default();
        hex_secret.zeroize();
        nsec
    }

    /// Sign a template, producing a complete event authored by these keys.
    pub fn sign(&self, template: EventTemplate) -> Result<Event, EventError> {
        self.sign_unsigned(template.into_unsigned(self.public_hex.clone()))
    }

    /// Sign an event whose author must be these keys.
    pub fn sign_unsigned(&self, unsigned: UnsignedEvent) -> Result<Event, EventError> {
        if unsigned.pubkey != self.public_hex {
            return Err(EventError::InvalidKey(
                "event author does not match signing key".into(),
            ));
        }
        let id_bytes = unsigned.id_bytes()?;
        let secp = Secp256k1::signing_only();
        let keypair = Keypair::from_secret_key(&secp, &self.secret);
        let sig = secp.sign_schnorr_no_aux_rand(&Message::from_digest(id_bytes), &keypair);

        Ok(Event {
            id: hex::encode(id_bytes),
            pubkey: unsigned.pubkey,
            created_at: unsigned.created_at,
            kind: unsigned.kind,
            tags: unsigned.tags,
            content: unsigned.content,
            sig: hex::encode(sig.serialize()),
        })
    }

    /// Save the secret key as an `nsec` string with restrictive permissions.
    pub fn save_to_file(&self, path: &Path) -> Result<(), EventError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        let mut nsec = self.nsec();
        std::fs::write(path, &nsec)?;
        nsec.zeroize();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }

    /// Load keys from a file containing an `nsec` or hex secret.
    ///
    /// On Unix, refuses files readable by anyone but the owner.
    pub fn load_from_file(path: &Path) -> Result<Self, EventError> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let metadata = std::fs::metadata(path)?;
            let mode = metadata.permissions().mode() & 0o777;
            if mode & 0o077 != 0 {
                return Err(EventError::IoError(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    format!("Key file has insecure permissions: {mode:o} (expected 600)"),
                )));
            }
        }

        let mut contents = std::fs::read_to_string(path)?;
        let keys = Self::parse(&contents);
        contents.zeroize();
        keys
    }

    /// Load from file, or generate new keys and save them.
    pub fn load_or_generate(path: &Path) -> Result<Self, EventError> {
        if path.exists() {
            Self::load_from_file(path)
        } else {
            let keys = Self::generate();
            keys.save_to_file(path)?;
            Ok(keys)
        }
    }
}

//! NIP-01 events.
//!
//! The id of an event is the SHA-256 of the canonical serialization
//! `[0, pubkey, created_at, kind, tags, content]`; the signature is a
//! BIP-340 Schnorr signature over that id.

use secp256k1::{Message, Secp256k1, XOnlyPublicKey, schnorr};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::EventError;

/// Current Unix time in seconds.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// A signed Nostr event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Lowercase hex SHA-256 of the canonical serialization.
    pub id: String,
    /// Lowercase hex x-only public key of the author.
    pub pubkey: String,
    /// Unix timestamp in seconds.
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    /// Lowercase hex 64-byte Schnorr signature.
    pub sig: String,
}

/// An event with an author but no id or signature yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedEvent {
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

/// What a caller wants published; the signer supplies the author.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTemplate {
    pub kind: u16,
    pub content: String,
    pub tags: Vec<Vec<String>>,
    pub created_at: u64,
}

impl EventTemplate {
    /// Attach an author, producing an event ready for signing.
    pub fn into_unsigned(self, pubkey: impl Into<String>) -> UnsignedEvent {
        UnsignedEvent {
            pubkey: pubkey.into(),
            created_at: self.created_at,
            kind: self.kind,
            tags: self.tags,
            content: self.content,
        }
    }

    /// First value of the first tag named `name`.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        first_tag_value(&self.tags, name)
    }
}

impl UnsignedEvent {
    /// Canonical serialization used for the event id.
    pub fn canonical_json(&self) -> Result<String, EventError> {
        if !is_hex_of_len(&self.pubkey, 32) {
            return Err(EventError::InvalidKey(format!(
                "pubkey must be 64 lowercase hex chars, got {:?}",
                self.pubkey
            )));
        }
        Ok(serde_json::to_string(&(
            0,
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        ))?)
    }

    /// The 32-byte event id.
    pub fn id_bytes(&self) -> Result<[u8; 32], EventError> {
        let serialized = self.canonical_json()?;
        Ok(Sha256::digest(serialized.as_bytes()).into())
    }

    /// The hex event id.
    pub fn id(&self) -> Result<String, EventError> {
        Ok(hex::encode(self.id_bytes()?))
    }
}

impl Event {
    /// Parse an event from its JSON wire form.
    pub fn from_json(json: &str) -> Result<Self, EventError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize to the JSON wire form.
    pub fn to_json(&self) -> Result<String, EventError> {
        Ok(serde_json::to_string(self)?)
    }

    /// The unsigned part of this event.
    pub fn unsigned(&self) -> UnsignedEvent {
        UnsignedEvent {
            pubkey: self.pubkey.clone(),
            created_at: self.created_at,
            kind: self.kind,
            tags: self.tags.clone(),
            content: self.content.clone(),
        }
    }

    /// First value of the first tag named `name`.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        first_tag_value(&self.tags, name)
    }

    /// All values of tags named `name` (the second element of each tag).
    pub fn tag_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.tags
            .iter()
            .filter(move |t| t.first().is_some_and(|n| n == name))
            .filter_map(|t| t.get(1).map(String::as_str))
    }

    /// The `d` tag, identifying a parameterized replaceable event.
    pub fn d_tag(&self) -> Option<&str> {
        self.tag_value("d")
    }

    /// Check the id matches the content and the signature matches the id.
    pub fn verify(&self) -> Result<(), EventError> {
        let id_bytes = self.unsigned().id_bytes()?;
        if hex::encode(id_bytes) != self.id {
            return Err(EventError::Invalid("id does not match content".into()));
        }

        let sig_bytes = hex::decode(&self.sig)
            .map_err(|e| EventError::InvalidSignature(format!("bad hex: {e}")))?;
        let sig = schnorr::Signature::from_slice(&sig_bytes)
            .map_err(|e| EventError::InvalidSignature(e.to_string()))?;

        let pk_bytes = hex::decode(&self.pubkey)
            .map_err(|e| EventError::InvalidKey(format!("bad hex: {e}")))?;
        let pubkey = XOnlyPublicKey::from_slice(&pk_bytes)
            .map_err(|e| EventError::InvalidKey(e.to_string()))?;

        let secp = Secp256k1::verification_only();
        let message = Message::from_digest(id_bytes);
        secp.verify_schnorr(&sig, &message, &pubkey)
            .map_err(|e| EventError::InvalidSignature(e.to_string()))
    }
}

fn first_tag_value<'a>(tags: &'a [Vec<String>], name: &str) -> Option<&'a str> {
    tags.iter()
        .find(|t| t.first().is_some_and(|n| n == name))
        .and_then(|t| t.get(1))
        .map(String::as_str)
}

/// Whether `s` is lowercase hex encoding exactly `bytes` bytes.
pub fn is_hex_of_len(s: &str, bytes: usize) -> bool {
    s.len() == bytes * 2 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

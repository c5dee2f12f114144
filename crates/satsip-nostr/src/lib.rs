//! `SatSip` Nostr primitives
//!
//! Everything the client needs to speak Nostr without a relay connection:
//!
//! - **NIP-19**: bech32 `npub` / `nsec` / `nprofile` / `nevent` / `naddr`
//! - **NIP-01**: event structure, canonical id hashing, Schnorr signatures
//! - **Keys & signers**: local key material and the [`Signer`] capability
//! - **Schema**: the app's replaceable records (profile, links, theme,
//!   wallets) and NIP-57 zap request/receipt events

pub mod error;
pub mod event;
pub mod keys;
pub mod nip19;
pub mod schema;
pub mod signer;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use error::{EventError, Nip19Error, ParseError, SignerError};
pub use event::{Event, EventTemplate, UnsignedEvent, unix_now};
pub use keys::Keys;
pub use nip19::{AddressPointer, EventPointer, Identifier, Nip19, ProfilePointer};
pub use signer::{KeyFileProbe, LocalSigner, Signer, SignerProbe, StaticSignerProbe};

//! NIP-19: bech32-encoded entities.
//!
//! Bare keys (`npub`, `nsec`) encode the 32 raw bytes directly. Shareable
//! identifiers (`nprofile`, `nevent`, `naddr`) encode a TLV stream:
//!
//! | type | meaning | value |
//! |------|---------|-------|
//! | 0 | special | 32-byte key or event id; UTF-8 `d` identifier for `naddr` |
//! | 1 | relay | UTF-8 relay URL, may repeat |
//! | 2 | author | 32-byte public key |
//! | 3 | kind | u32 big-endian |
//!
//! Unknown TLV types are skipped.

use bech32::{Bech32, Hrp};

use crate::error::Nip19Error;
use crate::event::is_hex_of_len;

pub const NPUB: &str = "npub";
pub const NSEC: &str = "nsec";
pub const NPROFILE: &str = "nprofile";
pub const NEVENT: &str = "nevent";
pub const NADDR: &str = "naddr";

const TLV_SPECIAL: u8 = 0;
const TLV_RELAY: u8 = 1;
const TLV_AUTHOR: u8 = 2;
const TLV_KIND: u8 = 3;

/// A profile reference with relay hints (`nprofile`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfilePointer {
    pub pubkey: String,
    pub relays: Vec<String>,
}

/// An event reference (`nevent`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventPointer {
    pub id: String,
    pub relays: Vec<String>,
    pub author: Option<String>,
    pub kind: Option<u32>,
}

/// A parameterized replaceable event reference (`naddr`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressPointer {
    pub identifier: String,
    pub pubkey: String,
    pub kind: u32,
    pub relays: Vec<String>,
}

/// Any decoded NIP-19 entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Nip19 {
    Pubkey(String),
    Secret(String),
    Profile(ProfilePointer),
    Event(EventPointer),
    Address(AddressPointer),
}

/// A decoded reference to a creator: who, and where to look.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identifier {
    pub pubkey: String,
    pub relays: Vec<String>,
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

pub fn encode_npub(pubkey: &str) -> Result<String, Nip19Error> {
    encode_bech32(NPUB, &key_bytes(pubkey, "pubkey")?)
}

pub fn encode_nsec(secret: &str) -> Result<String, Nip19Error> {
    encode_bech32(NSEC, &key_bytes(secret, "secret key")?)
}

pub fn encode_nprofile(profile: &ProfilePointer) -> Result<String, Nip19Error> {
    let mut tlv = Vec::new();
    push_tlv(&mut tlv, TLV_SPECIAL, &key_bytes(&profile.pubkey, "pubkey")?)?;
    for relay in &profile.relays {
        push_tlv(&mut tlv, TLV_RELAY, relay.as_bytes())?;
    }
    encode_bech32(NPROFILE, &tlv)
}

pub fn encode_nevent(event: &EventPointer) -> Result<String, Nip19Error> {
    let mut tlv = Vec::new();
    push_tlv(&mut tlv, TLV_SPECIAL, &key_bytes(&event.id, "event id")?)?;
    for relay in &event.relays {
        push_tlv(&mut tlv, TLV_RELAY, relay.as_bytes())?;
    }
    if let Some(author) = &event.author {
        push_tlv(&mut tlv, TLV_AUTHOR, &key_bytes(author, "author")?)?;
    }
    if let Some(kind) = event.kind {
        push_tlv(&mut tlv, TLV_KIND, &kind.to_be_bytes())?;
    }
    encode_bech32(NEVENT, &tlv)
}

pub fn encode_naddr(addr: &AddressPointer) -> Result<String, Nip19Error> {
    let mut tlv = Vec::new();
    push_tlv(&mut tlv, TLV_SPECIAL, addr.identifier.as_bytes())?;
    for relay in &addr.relays {
        push_tlv(&mut tlv, TLV_RELAY, relay.as_bytes())?;
    }
    push_tlv(&mut tlv, TLV_AUTHOR, &key_bytes(&addr.pubkey, "pubkey")?)?;
    push_tlv(&mut tlv, TLV_KIND, &addr.kind.to_be_bytes())?;
    encode_bech32(NADDR, &tlv)
}

/// Encode any entity with its matching prefix.
pub fn encode(entity: &Nip19) -> Result<String, Nip19Error> {
    match entity {
        Nip19::Pubkey(pk) => encode_npub(pk),
        Nip19::Secret(sk) => encode_nsec(sk),
        Nip19::Profile(p) => encode_nprofile(p),
        Nip19::Event(e) => encode_nevent(e),
        Nip19::Address(a) => encode_naddr(a),
    }
}

fn key_bytes(hex_key: &str, what: &str) -> Result<Vec<u8>, Nip19Error> {
    if !is_hex_of_len(hex_key, 32) {
        return Err(Nip19Error::Encode(format!(
            "{what} must be 64 lowercase hex chars"
        )));
    }
    hex::decode(hex_key).map_err(|e| Nip19Error::Encode(format!("{what}: {e}")))
}

fn push_tlv(out: &mut Vec<u8>, kind: u8, value: &[u8]) -> Result<(), Nip19Error> {
    let len = u8::try_from(value.len()).map_err(|_| {
        Nip19Error::Encode(format!("TLV value too long ({} bytes)", value.len()))
    })?;
    out.push(kind);
    out.push(len);
    out.extend_from_slice(value);
    Ok(())
}

fn encode_bech32(hrp: &str, data: &[u8]) -> Result<String, Nip19Error> {
    let hrp = Hrp::parse(hrp).map_err(|e| Nip19Error::Encode(e.to_string()))?;
    bech32::encode::<Bech32>(hrp, data).map_err(|e| Nip19Error::Encode(e.to_string()))
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

pub fn decode_npub(input: &str) -> Result<String, Nip19Error> {
    let data = decode_expecting(NPUB, input)?;
    hex_of_32(&data, "pubkey")
}

pub fn decode_nsec(input: &str) -> Result<String, Nip19Error> {
    let data = decode_expecting(NSEC, input)?;
    hex_of_32(&data, "secret key")
}

pub fn decode_nprofile(input: &str) -> Result<ProfilePointer, Nip19Error> {
    let data = decode_expecting(NPROFILE, input)?;
    let tlv = parse_tlv(&data)?;
    let special = tlv.special.ok_or_else(|| missing("pubkey"))?;
    Ok(ProfilePointer {
        pubkey: hex_of_32(&special, "pubkey")?,
        relays: tlv.relays,
    })
}

pub fn decode_nevent(input: &str) -> Result<EventPointer, Nip19Error> {
    let data = decode_expecting(NEVENT, input)?;
    let tlv = parse_tlv(&data)?;
    let special = tlv.special.ok_or_else(|| missing("event id"))?;
    Ok(EventPointer {
        id: hex_of_32(&special, "event id")?,
        relays: tlv.relays,
        author: tlv
            .author
            .map(|a| hex_of_32(&a, "author"))
            .transpose()?,
        kind: tlv.kind,
    })
}

pub fn decode_naddr(input: &str) -> Result<AddressPointer, Nip19Error> {
    let data = decode_expecting(NADDR, input)?;
    let tlv = parse_tlv(&data)?;
    let special = tlv.special.ok_or_else(|| missing("identifier"))?;
    let identifier = String::from_utf8(special)
        .map_err(|_| Nip19Error::Decode("identifier is not UTF-8".into()))?;
    let author = tlv.author.ok_or_else(|| missing("author"))?;
    Ok(AddressPointer {
        identifier,
        pubkey: hex_of_32(&author, "author")?,
        kind: tlv.kind.ok_or_else(|| missing("kind"))?,
        relays: tlv.relays,
    })
}

/// Decode any entity, dispatching on its prefix.
pub fn decode(input: &str) -> Result<Nip19, Nip19Error> {
    let input = input.trim();
    let (hrp, _) = bech32::decode(input).map_err(|e| Nip19Error::Decode(e.to_string()))?;
    match hrp.to_lowercase().as_str() {
        NPUB => decode_npub(input).map(Nip19::Pubkey),
        NSEC => decode_nsec(input).map(Nip19::Secret),
        NPROFILE => decode_nprofile(input).map(Nip19::Profile),
        NEVENT => decode_nevent(input).map(Nip19::Event),
        NADDR => decode_naddr(input).map(Nip19::Address),
        other => Err(Nip19Error::Decode(format!("unknown prefix {other:?}"))),
    }
}

/// Decode a creator reference: `npub`, `nprofile`, `naddr`, optionally
/// prefixed with `nostr:`, or a raw hex public key.
pub fn decode_identifier(input: &str) -> Result<Identifier, Nip19Error> {
    let input = input.trim();
    let input = input.strip_prefix("nostr:").unwrap_or(input);

    if is_hex_of_len(input, 32) {
        return Ok(Identifier {
            pubkey: input.to_string(),
            relays: Vec::new(),
        });
    }

    match decode(input)? {
        Nip19::Pubkey(pubkey) => Ok(Identifier {
            pubkey,
            relays: Vec::new(),
        }),
        Nip19::Profile(p) => Ok(Identifier {
            pubkey: p.pubkey,
            relays: p.relays,
        }),
        Nip19::Address(a) => Ok(Identifier {
            pubkey: a.pubkey,
            relays: a.relays,
        }),
        Nip19::Secret(_) => Err(Nip19Error::Decode(
            "refusing to use a secret key as a profile identifier".into(),
        )),
        Nip19::Event(_) => Err(Nip19Error::PrefixMismatch {
            expected: NPROFILE,
            actual: NEVENT.to_string(),
        }),
    }
}

pub fn is_valid_npub(input: &str) -> bool {
    decode_npub(input).is_ok()
}

pub fn is_valid_nprofile(input: &str) -> bool {
    decode_nprofile(input).is_ok()
}

pub fn is_valid_nevent(input: &str) -> bool {
    decode_nevent(input).is_ok()
}

pub fn is_valid_naddr(input: &str) -> bool {
    decode_naddr(input).is_ok()
}

fn decode_expecting(expected: &'static str, input: &str) -> Result<Vec<u8>, Nip19Error> {
    let (hrp, data) =
        bech32::decode(input.trim()).map_err(|e| Nip19Error::Decode(e.to_string()))?;
    let actual = hrp.to_lowercase();
    if actual != expected {
        return Err(Nip19Error::PrefixMismatch { expected, actual });
    }
    Ok(data)
}

fn hex_of_32(bytes: &[u8], what: &str) -> Result<String, Nip19Error> {
    if bytes.len() != 32 {
        return Err(Nip19Error::Decode(format!(
            "{what} must be 32 bytes, got {}",
            bytes.len()
        )));
    }
    Ok(hex::encode(bytes))
}

fn missing(what: &str) -> Nip19Error {
    Nip19Error::Decode(format!("missing {what}"))
}

#[derive(Default)]
struct Tlv {
    special: Option<Vec<u8>>,
    relays: Vec<String>,
    author: Option<Vec<u8>>,
    kind: Option<u32>,
}

fn parse_tlv(mut data: &[u8]) -> Result<Tlv, Nip19Error> {
    let mut tlv = Tlv::default();
    while !data.is_empty() {
        let [kind, len, rest @ ..] = data else {
            return Err(Nip19Error::Decode("truncated TLV header".into()));
        };
        let len = usize::from(*len);
        if rest.len() < len {
            return Err(Nip19Error::Decode("TLV value overruns input".into()));
        }
        let (value, tail) = rest.split_at(len);
        match *kind {
            TLV_SPECIAL => {
                if tlv.special.is_none() {
                    tlv.special = Some(value.to_vec());
                }
            }
            TLV_RELAY => {
                let relay = std::str::from_utf8(value)
                    .map_err(|_| Nip19Error::Decode("relay is not UTF-8".into()))?;
                tlv.relays.push(relay.to_string());
            }
            TLV_AUTHOR => {
                if tlv.author.is_none() {
                    tlv.author = Some(value.to_vec());
                }
            }
            TLV_KIND => {
                let bytes: [u8; 4] = value
                    .try_into()
                    .map_err(|_| Nip19Error::Decode("kind must be 4 bytes".into()))?;
                tlv.kind = Some(u32::from_be_bytes(bytes));
            }
            _ => {}
        }
        data = tail;
    }
    Ok(tlv)
}

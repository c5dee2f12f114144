//! NIP-57 zap request and receipt events.

use super::{KIND_ZAP_RECEIPT, KIND_ZAP_REQUEST};
use crate::error::ParseError;
use crate::event::{Event, EventTemplate, is_hex_of_len};

/// What the user wants to zap, before signing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ZapRequestData {
    pub amount_msats: u64,
    pub recipient_pubkey: String,
    /// Relays the recipient's wallet should publish the receipt to.
    pub relays: Vec<String>,
    pub content: String,
    /// Event being zapped, if any.
    pub event_id: Option<String>,
    /// Bech32 `lnurl` of the recipient's pay endpoint.
    pub lnurl: Option<String>,
}

impl ZapRequestData {
    /// Build the unsigned kind-9734 template.
    pub fn to_template(&self, created_at: u64) -> Result<EventTemplate, ParseError> {
        if self.amount_msats == 0 {
            return Err(ParseError::Invalid("zap amount must be positive".into()));
        }
        if !is_hex_of_len(&self.recipient_pubkey, 32) {
            return Err(ParseError::Invalid(format!(
                "recipient must be a 64-char hex pubkey, got {:?}",
                self.recipient_pubkey
            )));
        }
        if self.relays.is_empty() {
            return Err(ParseError::MissingTag("relays"));
        }

        let mut relays = Vec::with_capacity(self.relays.len() + 1);
        relays.push("relays".to_string());
        relays.extend(self.relays.iter().cloned());

        let mut tags = vec![
            relays,
            vec!["amount".to_string(), self.amount_msats.to_string()],
            vec!["p".to_string(), self.recipient_pubkey.clone()],
        ];
        if let Some(id) = &self.event_id {
            tags.push(vec!["e".to_string(), id.clone()]);
        }
        if let Some(lnurl) = &self.lnurl {
            tags.push(vec!["lnurl".to_string(), lnurl.clone()]);
        }

        Ok(EventTemplate {
            kind: KIND_ZAP_REQUEST,
            content: self.content.clone(),
            tags,
            created_at,
        })
    }
}

/// A signed zap request as read back from the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZapRequest {
    pub event: Event,
    pub amount_msats: Option<u64>,
    pub recipient_pubkey: String,
    pub relays: Vec<String>,
    pub event_id: Option<String>,
}

impl ZapRequest {
    pub fn from_event(event: Event) -> Result<Self, ParseError> {
        if event.kind != KIND_ZAP_REQUEST {
            return Err(ParseError::WrongKind {
                expected: KIND_ZAP_REQUEST,
                actual: event.kind,
            });
        }
        let recipient_pubkey = event
            .tag_value("p")
            .ok_or(ParseError::MissingTag("p"))?
            .to_string();
        let amount_msats = match event.tag_value("amount") {
            Some(raw) => Some(
                raw.parse()
                    .map_err(|_| ParseError::Invalid(format!("invalid amount: {raw}")))?,
            ),
            None => None,
        };
        let relays = event
            .tags
            .iter()
            .find(|t| t.first().is_some_and(|n| n == "relays"))
            .map(|t| t.iter().skip(1).cloned().collect())
            .unwrap_or_default();
        let event_id = event.tag_value("e").map(ToString::to_string);

        Ok(Self {
            event,
            amount_msats,
            recipient_pubkey,
            relays,
            event_id,
        })
    }

    /// Parse the JSON string handed around by the payment flow.
    pub fn from_json(json: &str) -> Result<Self, ParseError> {
        let event = Event::from_json(json).map_err(|e| ParseError::Json(e.to_string()))?;
        Self::from_event(event)
    }

    /// The zapping user.
    pub fn sender(&self) -> &str {
        &self.event.pubkey
    }
}

/// A kind-9735 receipt published by the recipient's wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZapReceipt {
    pub event: Event,
    pub bolt11: String,
    pub preimage: Option<String>,
    pub recipient_pubkey: String,
    /// The embedded zap request, when it parses.
    pub request: Option<ZapRequest>,
}

impl ZapReceipt {
    pub fn from_event(event: Event) -> Result<Self, ParseError> {
        if event.kind != KIND_ZAP_RECEIPT {
            return Err(ParseError::WrongKind {
                expected: KIND_ZAP_RECEIPT,
                actual: event.kind,
            });
        }
        let bolt11 = event
            .tag_value("bolt11")
            .ok_or(ParseError::MissingTag("bolt11"))?
            .to_string();
        let recipient_pubkey = event
            .tag_value("p")
            .ok_or(ParseError::MissingTag("p"))?
            .to_string();
        let preimage = event.tag_value("preimage").map(ToString::to_string);
        let request = event
            .tag_value("description")
            .and_then(|d| ZapRequest::from_json(d).ok());

        Ok(Self {
            event,
            bolt11,
            preimage,
            recipient_pubkey,
            request,
        })
    }

    /// Paid amount: the invoice amount, or the requested amount when the
    /// invoice carries none.
    pub fn amount_msats(&self) -> Option<u64> {
        bolt11_amount_msats(&self.bolt11).or_else(|| self.request.as_ref()?.amount_msats)
    }

    /// Pubkey of whoever sent the zap.
    pub fn sender(&self) -> Option<&str> {
        self.request.as_ref().map(ZapRequest::sender)
    }
}

/// Amount encoded in a BOLT-11 invoice's human-readable part.
pub fn bolt11_amount_msats(invoice: &str) -> Option<u64> {
    let invoice = invoice.trim().to_ascii_lowercase();
    let hrp = &invoice[..invoice.rfind('1')?];
    let rest = hrp.strip_prefix("ln")?;
    let amount_start = rest.find(|c: char| c.is_ascii_digit())?;
    let amount = &rest[amount_start..];

    let (digits, multiplier) = match amount.chars().last()? {
        c if c.is_ascii_digit() => (amount, None),
        c => (&amount[..amount.len() - c.len_utf8()], Some(c)),
    };
    let value: u64 = digits.parse().ok()?;

    // One bitcoin is 10^11 millisatoshis.
    match multiplier {
        None => value.checked_mul(100_000_000_000),
        Some('m') => value.checked_mul(100_000_000),
        Some('u') => value.checked_mul(100_000),
        Some('n') => value.checked_mul(100),
        Some('p') if value % 10 == 0 => Some(value / 10),
        _ => None,
    }
}

//! NIP-01 wire messages.
//!
//! Client to relay: `EVENT`, `REQ`, `CLOSE`.
//! Relay to client: `EVENT`, `OK`, `EOSE`, `CLOSED`, `NOTICE`.

use satsip_nostr::Event;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::RelayError;

/// A subscription filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u16>>,
    #[serde(rename = "#d", default, skip_serializing_if = "Option::is_none")]
    pub d_tags: Option<Vec<String>>,
    #[serde(rename = "#p", default, skip_serializing_if = "Option::is_none")]
    pub p_tags: Option<Vec<String>>,
    #[serde(rename = "#t", default, skip_serializing_if = "Option::is_none")]
    pub t_tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

fn push<T>(slot: &mut Option<Vec<T>>, value: T) {
    slot.get_or_insert_with(Vec::new).push(value);
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn author(mut self, pubkey: impl Into<String>) -> Self {
        push(&mut self.authors, pubkey.into());
        self
    }

    #[must_use]
    pub fn kind(mut self, kind: u16) -> Self {
        push(&mut self.kinds, kind);
        self
    }

    #[must_use]
    pub fn d_tag(mut self, d: impl Into<String>) -> Self {
        push(&mut self.d_tags, d.into());
        self
    }

    #[must_use]
    pub fn p_tag(mut self, pubkey: impl Into<String>) -> Self {
        push(&mut self.p_tags, pubkey.into());
        self
    }

    #[must_use]
    pub fn t_tag(mut self, topic: impl Into<String>) -> Self {
        push(&mut self.t_tags, topic.into());
        self
    }

    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether an event satisfies every populated field.
    pub fn matches(&self, event: &Event) -> bool {
        fn allows<T: PartialEq>(field: Option<&Vec<T>>, value: &T) -> bool {
            field.is_none_or(|values| values.contains(value))
        }
        fn tag_allows(field: Option<&Vec<String>>, event: &Event, name: &str) -> bool {
            field.is_none_or(|values| event.tag_values(name).any(|v| values.iter().any(|w| w == v)))
        }

        allows(self.ids.as_ref(), &event.id)
            && allows(self.authors.as_ref(), &event.pubkey)
            && allows(self.kinds.as_ref(), &event.kind)
            && tag_allows(self.d_tags.as_ref(), event, "d")
            && tag_allows(self.p_tags.as_ref(), event, "p")
            && tag_allows(self.t_tags.as_ref(), event, "t")
            && self.since.is_none_or(|s| event.created_at >= s)
            && self.until.is_none_or(|u| event.created_at <= u)
    }
}

/// Messages a client sends.
#[derive(Debug, Clone)]
pub enum ClientMessage {
    Event(Event),
    Req {
        subscription_id: String,
        filter: Filter,
    },
    Close {
        subscription_id: String,
    },
}

impl ClientMessage {
    /// Serialize as a wire frame. Filter and event fields keep their
    /// declaration order.
    pub fn to_json(&self) -> Result<String, RelayError> {
        let frame = match self {
            Self::Event(event) => serde_json::to_string(&("EVENT", event)),
            Self::Req {
                subscription_id,
                filter,
            } => serde_json::to_string(&("REQ", subscription_id, filter)),
            Self::Close { subscription_id } => serde_json::to_string(&("CLOSE", subscription_id)),
        };
        frame.map_err(|e| RelayError::Protocol(format!("unserializable frame: {e}")))
    }
}

/// Messages a relay sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayMessage {
    Event {
        subscription_id: String,
        event: Event,
    },
    Ok {
        event_id: String,
        accepted: bool,
        message: String,
    },
    Eose {
        subscription_id: String,
    },
    Closed {
        subscription_id: String,
        message: String,
    },
    Notice {
        message: String,
    },
}

fn string_at(arr: &[Value], index: usize, what: &str) -> Result<String, RelayError> {
    arr.get(index)
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .ok_or_else(|| RelayError::Protocol(format!("missing or non-string {what}")))
}

impl RelayMessage {
    /// Parse a relay frame. Unknown message types are `Ok(None)`.
    pub fn from_json(json: &str) -> Result<Option<Self>, RelayError> {
        let arr: Vec<Value> =
            serde_json::from_str(json).map_err(|e| RelayError::Protocol(e.to_string()))?;
        let kind = string_at(&arr, 0, "message type")?;

        let message = match kind.as_str() {
            "EVENT" => {
                let subscription_id = string_at(&arr, 1, "subscription id")?;
                let raw = arr
                    .get(2)
                    .cloned()
                    .ok_or_else(|| RelayError::Protocol("EVENT without event".into()))?;
                let event: Event =
                    serde_json::from_value(raw).map_err(|e| RelayError::Protocol(e.to_string()))?;
                Self::Event {
                    subscription_id,
                    event,
                }
            }
            "OK" => Self::Ok {
                event_id: string_at(&arr, 1, "event id")?,
                accepted: arr
                    .get(2)
                    .and_then(Value::as_bool)
                    .ok_or_else(|| RelayError::Protocol("OK without status".into()))?,
                message: string_at(&arr, 3, "message").unwrap_or_default(),
            },
            "EOSE" => Self::Eose {
                subscription_id: string_at(&arr, 1, "subscription id")?,
            },
            "CLOSED" => Self::Closed {
                subscription_id: string_at(&arr, 1, "subscription id")?,
                message: string_at(&arr, 2, "message").unwrap_or_default(),
            },
            "NOTICE" => Self::Notice {
                message: string_at(&arr, 1, "notice")?,
            },
            _ => return Ok(None),
        };
        Ok(Some(message))
    }
}

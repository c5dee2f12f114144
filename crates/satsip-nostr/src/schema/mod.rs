//! App event schema.
//!
//! Every SatSip record is a parameterized replaceable event of kind
//! [`KIND_APP_DATA`], addressed by its `d` tag:
//!
//! | record  | `d` tag     |
//! |---------|-------------|
//! | profile | `profile`   |
//! | link    | `link-{id}` |
//! | theme   | `theme`     |
//! | wallets | `wallets`   |
//!
//! Each link is its own event so links can be edited independently.
//!
//! Parsing is layered: [`parse_strict`] reports exactly what is wrong with a
//! payload, and [`parse`] is the tolerant adapter the query layer uses, which
//! turns any failure into the record's zero value so one malformed remote
//! event cannot break a whole profile.

mod links;
mod profile;
mod theme;
mod wallets;
pub mod zap;

use std::collections::HashMap;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::ParseError;
use crate::event::{Event, EventTemplate};

pub use links::{LinkRecord, LinkType, visible_links};
pub use profile::Profile;
pub use theme::Theme;
pub use wallets::{WalletEntry, WalletKind, Wallets};
pub use zap::{ZapReceipt, ZapRequest, ZapRequestData};

/// NIP-78 application-specific data.
pub const KIND_APP_DATA: u16 = 30078;
/// NIP-57 zap request.
pub const KIND_ZAP_REQUEST: u16 = 9734;
/// NIP-57 zap receipt.
pub const KIND_ZAP_RECEIPT: u16 = 9735;

/// Marker tag value carried by every app record.
pub const APP_TAG: &str = "satsip";

pub const PROFILE_D_TAG: &str = "profile";
pub const THEME_D_TAG: &str = "theme";
pub const WALLETS_D_TAG: &str = "wallets";
pub const LINK_D_TAG_PREFIX: &str = "link-";

/// Which app record an event carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Profile,
    Link,
    Theme,
    Wallets,
}

impl RecordKind {
    /// Classify a `d` tag.
    pub fn from_d_tag(d: &str) -> Option<Self> {
        match d {
            PROFILE_D_TAG => Some(Self::Profile),
            THEME_D_TAG => Some(Self::Theme),
            WALLETS_D_TAG => Some(Self::Wallets),
            _ if d.starts_with(LINK_D_TAG_PREFIX) && d.len() > LINK_D_TAG_PREFIX.len() => {
                Some(Self::Link)
            }
            _ => None,
        }
    }
}

/// A record stored as an app-data event.
pub trait AppRecord: Default + Serialize + DeserializeOwned {
    const RECORD: RecordKind;

    /// The `d` tag addressing this record.
    fn d_tag(&self) -> String;

    /// Structural checks beyond what deserialization enforces.
    fn validate(&self) -> Result<(), ParseError> {
        Ok(())
    }
}

/// Parse a record, reporting why a payload is unusable.
pub fn parse_strict<T: AppRecord>(content: &str) -> Result<T, ParseError> {
    let record: T = serde_json::from_str(content).map_err(|e| ParseError::Json(e.to_string()))?;
    record.validate()?;
    Ok(record)
}

/// Parse a record, falling back to its zero value on any failure.
pub fn parse<T: AppRecord>(content: &str) -> T {
    parse_strict(content).unwrap_or_else(|e| {
        debug!(record = ?T::RECORD, error = %e, "Discarding malformed record");
        T::default()
    })
}

/// Build the event template for a record.
pub fn serialize<T: AppRecord>(record: &T, created_at: u64) -> EventTemplate {
    // Derived serializers over string-keyed data cannot fail.
    let content = serde_json::to_string(record).unwrap_or_else(|_| "{}".to_string());
    EventTemplate {
        kind: KIND_APP_DATA,
        content,
        tags: vec![
            vec!["d".to_string(), record.d_tag()],
            vec!["t".to_string(), APP_TAG.to_string()],
        ],
        created_at,
    }
}

/// Any app record.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Profile(Profile),
    Link(LinkRecord),
    Theme(Theme),
    Wallets(Wallets),
}

/// Tolerant parse of a payload whose record kind is already known.
pub fn parse_record(kind: RecordKind, content: &str) -> Record {
    match kind {
        RecordKind::Profile => Record::Profile(parse(content)),
        RecordKind::Link => Record::Link(parse(content)),
        RecordKind::Theme => Record::Theme(parse(content)),
        RecordKind::Wallets => Record::Wallets(parse(content)),
    }
}

/// Classify and tolerantly parse an event. `None` for events that are not
/// app records at all.
pub fn record_from_event(event: &Event) -> Option<Record> {
    if event.kind != KIND_APP_DATA {
        return None;
    }
    let kind = RecordKind::from_d_tag(event.d_tag()?)?;
    Some(parse_record(kind, &event.content))
}

/// Keep only the newest event per `d` tag (last write wins). Output is in
/// order of each tag's first appearance; events without a `d` tag are dropped.
pub fn latest_by_d_tag(events: Vec<Event>) -> Vec<Event> {
    let mut slots: HashMap<String, usize> = HashMap::new();
    let mut latest: Vec<Event> = Vec::new();
    for event in events {
        let Some(d) = event.d_tag() else {
            continue;
        };
        match slots.get(d).and_then(|&i| latest.get_mut(i)) {
            Some(slot) => {
                if event.created_at > slot.created_at {
                    *slot = event;
                }
            }
            None => {
                slots.insert(d.to_string(), latest.len());
                latest.push(event);
            }
        }
    }
    latest
}

/// The newest of a set of events.
pub fn newest(events: Vec<Event>) -> Option<Event> {
    events.into_iter().reduce(|best, e| {
        if e.created_at > best.created_at {
            e
        } else {
            best
        }
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::keys::Keys;

    fn app_event(keys: &Keys, d: &str, content: &str, created_at: u64) -> Event {
        keys.sign(EventTemplate {
            kind: KIND_APP_DATA,
            content: content.into(),
            tags: vec![vec!["d".into(), d.into()]],
            created_at,
        })
        .unwrap()
    }

    #[test]
    fn d_tag_classification() {
        assert_eq!(RecordKind::from_d_tag("profile"), Some(RecordKind::Profile));
        assert_eq!(RecordKind::from_d_tag("theme"), Some(RecordKind::Theme));
        assert_eq!(RecordKind::from_d_tag("wallets"), Some(RecordKind::Wallets));
        assert_eq!(RecordKind::from_d_tag("link-abc"), Some(RecordKind::Link));
        assert_eq!(RecordKind::from_d_tag("link-"), None);
        assert_eq!(RecordKind::from_d_tag("other"), None);
    }

    #[test]
    fn serialize_uses_d_and_marker_tags() {
        let link = LinkRecord {
            id: "42".into(),
            title: "Blog".into(),
            url: "https://example.com".into(),
            ..LinkRecord::default()
        };
        let tpl = serialize(&link, 7);
        assert_eq!(tpl.kind, KIND_APP_DATA);
        assert_eq!(tpl.created_at, 7);
        assert_eq!(tpl.tag_value("d"), Some("link-42"));
        assert_eq!(tpl.tag_value("t"), Some(APP_TAG));
        assert_eq!(parse_strict::<LinkRecord>(&tpl.content).unwrap(), link);
    }

    #[test]
    fn tolerant_parse_never_fails() {
        for content in ["", "null", "[]", "{", "42", r#"{"id": 5}"#, r#"{"title":"x"}"#] {
            assert_eq!(parse::<LinkRecord>(content), LinkRecord::default());
            let _ = parse::<Profile>(content);
            let _ = parse::<Theme>(content);
            let _ = parse::<Wallets>(content);
        }
    }

    #[test]
    fn strict_parse_distinguishes_json_from_structure() {
        assert!(matches!(
            parse_strict::<LinkRecord>("{"),
            Err(ParseError::Json(_))
        ));
        assert!(matches!(
            parse_strict::<LinkRecord>(r#"{"id":"","url":"https://x"}"#),
            Err(ParseError::Invalid(_))
        ));
    }

    #[test]
    fn record_from_event_dispatches_on_d_tag() {
        let keys = Keys::generate();
        let profile = app_event(&keys, "profile", r#"{"name":"alice"}"#, 1);
        match record_from_event(&profile) {
            Some(Record::Profile(p)) => assert_eq!(p.name, "alice"),
            other => panic!("unexpected {other:?}"),
        }
        let unknown = app_event(&keys, "unrelated", "{}", 1);
        assert!(record_from_event(&unknown).is_none());
    }

    #[test]
    fn latest_by_d_tag_keeps_newest() {
        let keys = Keys::generate();
        let events = vec![
            app_event(&keys, "link-1", r#"{"v":1}"#, 10),
            app_event(&keys, "link-2", r#"{"v":2}"#, 10),
            app_event(&keys, "link-1", r#"{"v":3}"#, 20),
            app_event(&keys, "link-1", r#"{"v":4}"#, 15),
        ];
        let latest = latest_by_d_tag(events);
        assert_eq!(latest.len(), 2);
        let link1 = latest.iter().find(|e| e.d_tag() == Some("link-1")).unwrap();
        assert_eq!(link1.created_at, 20);
    }

    #[test]
    fn latest_by_d_tag_keeps_first_seen_order_across_many_tags() {
        let keys = Keys::generate();
        let mut events: Vec<Event> = (0..50)
            .map(|i| app_event(&keys, &format!("link-{i}"), "{}", 1))
            .collect();
        events.push(app_event(&keys, "link-7", "{}", 3));
        events.push(app_event(&keys, "link-0", "{}", 2));
        events.push(app_event(&keys, "link-7", "{}", 2));

        let latest = latest_by_d_tag(events);
        assert_eq!(latest.len(), 50);
        let tags: Vec<String> = latest
            .iter()
            .map(|e| e.d_tag().unwrap().to_string())
            .collect();
        let expected: Vec<String> = (0..50).map(|i| format!("link-{i}")).collect();
        assert_eq!(tags, expected);
        assert_eq!(latest[7].created_at, 3);
        assert_eq!(latest[0].created_at, 2);
    }

    #[test]
    fn newest_picks_max_created_at() {
        let keys = Keys::generate();
        let events = vec![
            app_event(&keys, "theme", "{}", 5),
            app_event(&keys, "theme", "{}", 9),
            app_event(&keys, "theme", "{}", 7),
        ];
        assert_eq!(newest(events).unwrap().created_at, 9);
        assert!(newest(Vec::new()).is_none());
    }
}

use serde::{Deserialize, Serialize};

use super::{AppRecord, LINK_D_TAG_PREFIX, RecordKind};
use crate::error::ParseError;

/// What a link points at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkType {
    #[default]
    Link,
    Wallet,
}

/// One entry on a creator's page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkRecord {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(rename = "type", default)]
    pub link_type: LinkType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// Render order, ascending.
    #[serde(default)]
    pub position: i64,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(rename = "created_at", default)]
    pub created_at: u64,
    #[serde(rename = "updated_at", default)]
    pub updated_at: u64,
}

const fn default_active() -> bool {
    true
}

impl AppRecord for LinkRecord {
    const RECORD: RecordKind = RecordKind::Link;

    fn d_tag(&self) -> String {
        format!("{LINK_D_TAG_PREFIX}{}", self.id)
    }

    fn validate(&self) -> Result<(), ParseError> {
        if self.id.trim().is_empty() {
            return Err(ParseError::Invalid("link has no id".into()));
        }
        if self.url.trim().is_empty() {
            return Err(ParseError::Invalid(format!("link {} has no url", self.id)));
        }
        Ok(())
    }
}

/// Active links in render order.
pub fn visible_links(mut links: Vec<LinkRecord>) -> Vec<LinkRecord> {
    links.retain(|l| l.is_active);
    links.sort_by_key(|l| l.position);
    links
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::schema::{parse, parse_strict};

    #[test]
    fn parses_full_payload() {
        let json = r#"{
            "id": "l1",
            "title": "My shop",
            "url": "https://shop.example",
            "type": "wallet",
            "description": "stuff",
            "imageUrl": "https://img.example/a.png",
            "icon": "cart",
            "position": 3,
            "isActive": false,
            "created_at": 100,
            "updated_at": 200
        }"#;
        let link: LinkRecord = parse_strict(json).unwrap();
        assert_eq!(link.link_type, LinkType::Wallet);
        assert_eq!(link.image_url.as_deref(), Some("https://img.example/a.png"));
        assert_eq!(link.position, 3);
        assert!(!link.is_active);
        assert_eq!(link.updated_at, 200);
    }

    #[test]
    fn missing_is_active_defaults_to_visible() {
        let link: LinkRecord = parse(r#"{"id":"a","url":"https://a"}"#);
        assert!(link.is_active);
        assert_eq!(link.link_type, LinkType::Link);
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(parse_strict::<LinkRecord>(r#"{"id":"a","url":"u","type":"video"}"#).is_err());
    }

    #[test]
    fn zero_value_is_empty_and_inactive() {
        let zero = LinkRecord::default();
        assert!(zero.id.is_empty());
        assert!(zero.title.is_empty());
        assert!(!zero.is_active);
    }

    #[test]
    fn visible_links_filters_and_orders() {
        let mk = |id: &str, position, is_active| LinkRecord {
            id: id.into(),
            url: format!("https://{id}"),
            position,
            is_active,
            ..LinkRecord::default()
        };
        let links = vec![
            mk("c", 3, true),
            mk("a", 1, true),
            mk("hidden", 0, false),
            mk("b", 2, true),
        ];
        let ids: Vec<_> = visible_links(links).into_iter().map(|l| l.id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }
}

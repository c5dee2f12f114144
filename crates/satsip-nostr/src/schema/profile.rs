use serde::{Deserialize, Serialize};

use super::{AppRecord, PROFILE_D_TAG, RecordKind};

/// A creator's public profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub banner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nip05: Option<String>,
    /// Lightning address (`user@domain`) receiving tips.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lud16: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
}

impl Profile {
    /// Name to show: display name when set, else the handle.
    pub fn shown_name(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(&self.name)
    }
}

impl AppRecord for Profile {
    const RECORD: RecordKind = RecordKind::Profile;

    fn d_tag(&self) -> String {
        PROFILE_D_TAG.to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::schema::parse_strict;

    #[test]
    fn optional_fields_are_omitted() {
        let profile = Profile {
            name: "alice".into(),
            ..Profile::default()
        };
        assert_eq!(serde_json::to_string(&profile).unwrap(), r#"{"name":"alice"}"#);
    }

    #[test]
    fn camel_case_keys() {
        let p: Profile =
            parse_strict(r#"{"name":"a","displayName":"Alice","lud16":"alice@getalby.com"}"#)
                .unwrap();
        assert_eq!(p.shown_name(), "Alice");
        assert_eq!(p.lud16.as_deref(), Some("alice@getalby.com"));
    }

    #[test]
    fn blank_display_name_falls_back() {
        let p = Profile {
            name: "bob".into(),
            display_name: Some("  ".into()),
            ..Profile::default()
        };
        assert_eq!(p.shown_name(), "bob");
    }
}

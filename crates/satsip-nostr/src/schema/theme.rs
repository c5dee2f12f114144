use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{AppRecord, RecordKind, THEME_D_TAG};
use crate::error::ParseError;

/// The selected page theme. Variables are opaque to this crate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Theme {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

impl AppRecord for Theme {
    const RECORD: RecordKind = RecordKind::Theme;

    fn d_tag(&self) -> String {
        THEME_D_TAG.to_string()
    }

    fn validate(&self) -> Result<(), ParseError> {
        if self.name.trim().is_empty() {
            return Err(ParseError::Invalid("theme has no name".into()));
        }
        Ok(())
    }
}

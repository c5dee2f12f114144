use serde::{Deserialize, Serialize};

use super::{AppRecord, RecordKind, WALLETS_D_TAG};
use crate::error::ParseError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalletKind {
    #[default]
    Lightning,
    Bitcoin,
    #[serde(other)]
    Other,
}

/// A payment destination shown on the page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletEntry {
    #[serde(default)]
    pub kind: WalletKind,
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// All wallets a creator advertises.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallets {
    #[serde(default)]
    pub wallets: Vec<WalletEntry>,
}

impl Wallets {
    /// First lightning address, used as the zap target.
    pub fn lightning_address(&self) -> Option<&str> {
        self.wallets
            .iter()
            .find(|w| w.kind == WalletKind::Lightning && w.address.contains('@'))
            .map(|w| w.address.as_str())
    }
}

impl AppRecord for Wallets {
    const RECORD: RecordKind = RecordKind::Wallets;

    fn d_tag(&self) -> String {
        WALLETS_D_TAG.to_string()
    }

    fn validate(&self) -> Result<(), ParseError> {
        if let Some(empty) = self.wallets.iter().position(|w| w.address.trim().is_empty()) {
            return Err(ParseError::Invalid(format!("wallet {empty} has no address")));
        }
        Ok(())
    }
}

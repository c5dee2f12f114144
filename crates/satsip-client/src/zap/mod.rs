//! Lightning zap payment flow.
//!
//! A zap resolves the recipient's Lightning address to an LNURL-pay
//! descriptor ([`lnurl`]), then tries each available payment route in turn
//! ([`payment`]).

pub mod lnurl;
pub mod payment;

pub use lnurl::{HttpLnurlClient, LightningAddress, LnurlClient, PayDescriptor};
pub use payment::{
    CapabilityError, Clipboard, PaymentCapabilities, PaymentReceipt, PaymentRoute, UriOpener,
    WalletCapability, ZapCapability, pay,
};

/// Why a payment could not be made. Each variant carries a message fit for
/// the user.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PaymentFailure {
    #[error("malformed lightning address {0:?}")]
    MalformedAddress(String),

    #[error("provider {domain} unreachable: {reason}")]
    Unreachable { domain: String, reason: String },

    #[error("provider {domain} does not support LNURL-pay")]
    LnurlUnsupported { domain: String },

    #[error("provider error: {0}")]
    Provider(String),

    #[error("amount must be between {min_sats} and {max_sats} sats")]
    AmountOutOfRange { min_sats: u64, max_sats: u64 },

    #[error("amount must be at least 1 sat")]
    InvalidAmount,

    #[error("no payment method succeeded")]
    Exhausted,
}

impl PaymentFailure {
    /// Text to show the user.
    pub fn user_message(&self) -> String {
        match self {
            Self::MalformedAddress(address) => {
                format!("\"{address}\" is not a valid Lightning address (expected name@domain).")
            }
            Self::Unreachable { domain, .. } => format!(
                "Could not reach {domain}. The wallet provider may be down or blocking requests from this app."
            ),
            Self::LnurlUnsupported { domain } => {
                format!("{domain} does not support Lightning address payments.")
            }
            Self::Provider(reason) => format!("The wallet provider refused the payment: {reason}"),
            Self::AmountOutOfRange { min_sats, max_sats } => {
                format!("This wallet accepts between {min_sats} and {max_sats} sats.")
            }
            Self::InvalidAmount => "Enter an amount of at least 1 sat.".to_string(),
            Self::Exhausted => {
                "No way to pay the invoice was available. Install a Lightning wallet and try again."
                    .to_string()
            }
        }
    }
}

//! Payment routes and the fallback chain.
//!
//! Routes are tried in order: the host's native zap capability (only when
//! the provider accepts zaps), an attached wallet, a `lightning:` URI
//! handler, then the clipboard. A route that fails hands over to the next.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::PaymentFailure;
use super::lnurl::{LightningAddress, LnurlClient, PayDescriptor};
use crate::notify::{NoticeLevel, Notifier};

/// A payment capability failed or was declined.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct CapabilityError(pub String);

/// Proof of payment from a wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentReceipt {
    pub preimage: String,
}

/// Completes a whole zap (invoice and payment) on the host's side.
#[async_trait]
pub trait ZapCapability: Send + Sync {
    async fn zap(
        &self,
        address: &LightningAddress,
        descriptor: &PayDescriptor,
        amount_msats: u64,
        zap_request: &str,
    ) -> Result<(), CapabilityError>;
}

/// A wallet that pays BOLT-11 invoices.
#[async_trait]
pub trait WalletCapability: Send + Sync {
    /// Ask the user to allow this app to use the wallet.
    async fn enable(&self) -> Result<(), CapabilityError>;
    async fn send_payment(&self, invoice: &str) -> Result<PaymentReceipt, CapabilityError>;
}

/// Hands a URI to whatever the system has registered for it.
pub trait UriOpener: Send + Sync {
    fn open(&self, uri: &str) -> Result<(), CapabilityError>;
}

pub trait Clipboard: Send + Sync {
    fn copy(&self, text: &str) -> Result<(), CapabilityError>;
}

/// What the host can offer for paying. Every capability is optional.
#[derive(Clone, Default)]
pub struct PaymentCapabilities {
    pub zapper: Option<Arc<dyn ZapCapability>>,
    pub wallet: Option<Arc<dyn WalletCapability>>,
    pub uri_opener: Option<Arc<dyn UriOpener>>,
    pub clipboard: Option<Arc<dyn Clipboard>>,
}

impl std::fmt::Debug for PaymentCapabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentCapabilities")
            .field("zapper", &self.zapper.is_some())
            .field("wallet", &self.wallet.is_some())
            .field("uri_opener", &self.uri_opener.is_some())
            .field("clipboard", &self.clipboard.is_some())
            .finish()
    }
}

/// The route that completed the payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentRoute {
    NativeZap,
    Wallet { preimage: String },
    UriHandler { invoice: String },
    Clipboard { invoice: String },
}

/// Pay `amount_sats` to `address`, attaching `zap_request` when the
/// provider accepts zaps.
pub async fn pay(
    lnurl: &dyn LnurlClient,
    capabilities: &PaymentCapabilities,
    notifier: &dyn Notifier,
    address: &str,
    amount_sats: u64,
    zap_request: Option<&str>,
) -> Result<PaymentRoute, PaymentFailure> {
    if amount_sats == 0 {
        return Err(PaymentFailure::InvalidAmount);
    }
    let amount_msats = amount_sats
        .checked_mul(1000)
        .ok_or(PaymentFailure::InvalidAmount)?;
    let address = LightningAddress::parse(address)?;
    let descriptor = lnurl.fetch_descriptor(&address).await?;
    descriptor.check_amount(amount_msats)?;

    let zap_request = zap_request.filter(|_| descriptor.supports_zaps());

    if let (Some(zapper), Some(request)) = (&capabilities.zapper, zap_request) {
        match zapper.zap(&address, &descriptor, amount_msats, request).await {
            Ok(()) => {
                info!(%address, amount_sats, "Zap sent natively");
                return Ok(PaymentRoute::NativeZap);
            }
            Err(e) => warn!(%address, error = %e, "Native zap failed, falling back to invoice"),
        }
    }

    let invoice = lnurl
        .request_invoice(&address, &descriptor, amount_msats, zap_request)
        .await?;

    if let Some(wallet) = &capabilities.wallet {
        let paid = match wallet.enable().await {
            Ok(()) => wallet.send_payment(&invoice).await,
            Err(e) => Err(e),
        };
        match paid {
            Ok(receipt) => {
                info!(%address, amount_sats, "Invoice paid by wallet");
                return Ok(PaymentRoute::Wallet {
                    preimage: receipt.preimage,
                });
            }
            Err(e) => warn!(%address, error = %e, "Wallet payment failed"),
        }
    }

    if let Some(opener) = &capabilities.uri_opener {
        match opener.open(&format!("lightning:{invoice}")) {
            Ok(()) => {
                info!(%address, "Invoice handed to lightning: handler");
                return Ok(PaymentRoute::UriHandler { invoice });
            }
            Err(e) => warn!(%address, error = %e, "No lightning: handler"),
        }
    }

    if let Some(clipboard) = &capabilities.clipboard {
        match clipboard.copy(&invoice) {
            Ok(()) => {
                notifier.notify(
                    NoticeLevel::Info,
                    "Invoice copied to clipboard. Paste it into your Lightning wallet to pay.",
                );
                return Ok(PaymentRoute::Clipboard { invoice });
            }
            Err(e) => warn!(%address, error = %e, "Clipboard copy failed"),
        }
    }

    Err(PaymentFailure::Exhausted)
}

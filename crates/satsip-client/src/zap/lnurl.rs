//! LNURL-pay (LUD-06 / LUD-16) resolution.

use std::time::Duration;

use async_trait::async_trait;
use bech32::{Bech32, Hrp};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::PaymentFailure;

/// A `name@domain` Lightning address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LightningAddress {
    pub user: String,
    pub domain: String,
}

impl LightningAddress {
    pub fn parse(input: &str) -> Result<Self, PaymentFailure> {
        let trimmed = input.trim();
        let malformed = || PaymentFailure::MalformedAddress(trimmed.to_string());

        let (user, domain) = trimmed.split_once('@').ok_or_else(malformed)?;
        let user = user.to_ascii_lowercase();
        let domain = domain.to_ascii_lowercase();

        let user_ok = !user.is_empty()
            && user
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '+'));
        let domain_ok = !domain.is_empty()
            && !domain.starts_with('.')
            && domain
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | ':'));
        if !user_ok || !domain_ok {
            return Err(malformed());
        }
        Ok(Self { user, domain })
    }

    /// The LUD-16 well-known endpoint.
    pub fn well_known_url(&self, scheme: &str) -> String {
        format!("{scheme}://{}/.well-known/lnurlp/{}", self.domain, self.user)
    }

    /// Bech32 `lnurl` of the HTTPS endpoint.
    pub fn lnurl(&self) -> Result<String, PaymentFailure> {
        let hrp = Hrp::parse("lnurl").map_err(|e| PaymentFailure::Provider(e.to_string()))?;
        bech32::encode::<Bech32>(hrp, self.well_known_url("https").as_bytes())
            .map_err(|_| PaymentFailure::MalformedAddress(self.to_string()))
    }
}

impl std::fmt::Display for LightningAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.user, self.domain)
    }
}

/// An LNURL-pay descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayDescriptor {
    pub callback: String,
    pub min_sendable: u64,
    pub max_sendable: u64,
    #[serde(default)]
    pub metadata: String,
    pub tag: String,
    #[serde(default)]
    pub allows_nostr: bool,
    #[serde(default)]
    pub nostr_pubkey: Option<String>,
    #[serde(default)]
    pub comment_allowed: Option<u64>,
}

impl PayDescriptor {
    /// Whether the provider publishes zap receipts.
    pub fn supports_zaps(&self) -> bool {
        self.allows_nostr && self.nostr_pubkey.is_some()
    }

    pub const fn check_amount(&self, amount_msats: u64) -> Result<(), PaymentFailure> {
        if amount_msats < self.min_sendable || amount_msats > self.max_sendable {
            return Err(PaymentFailure::AmountOutOfRange {
                min_sats: self.min_sendable.div_ceil(1000),
                max_sats: self.max_sendable / 1000,
            });
        }
        Ok(())
    }

    /// Callback URL asking for an invoice.
    pub fn invoice_url(
        &self,
        amount_msats: u64,
        zap_request: Option<&str>,
        lnurl: Option<&str>,
    ) -> Result<Url, PaymentFailure> {
        let mut url = Url::parse(&self.callback)
            .map_err(|e| PaymentFailure::Provider(format!("bad callback URL: {e}")))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("amount", &amount_msats.to_string());
            if let Some(request) = zap_request {
                query.append_pair("nostr", request);
            }
            if let Some(lnurl) = lnurl {
                query.append_pair("lnurl", lnurl);
            }
        }
        Ok(url)
    }
}

/// Resolves descriptors and invoices.
#[async_trait]
pub trait LnurlClient: Send + Sync {
    async fn fetch_descriptor(
        &self,
        address: &LightningAddress,
    ) -> Result<PayDescriptor, PaymentFailure>;

    /// A BOLT-11 invoice for `amount_msats`.
    async fn request_invoice(
        &self,
        address: &LightningAddress,
        descriptor: &PayDescriptor,
        amount_msats: u64,
        zap_request: Option<&str>,
    ) -> Result<String, PaymentFailure>;
}

#[derive(Deserialize)]
struct InvoiceResponse {
    pr: String,
}

/// LNURL client over `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpLnurlClient {
    http: reqwest::Client,
    scheme: &'static str,
}

impl HttpLnurlClient {
    pub fn new(timeout: Duration) -> Result<Self, PaymentFailure> {
        // Ensure a TLS crypto provider is installed (reqwest uses rustls-no-provider).
        let _ = rustls::crypto::ring::default_provider().install_default();

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PaymentFailure::Provider(format!("HTTP client: {e}")))?;
        Ok(Self {
            http,
            scheme: "https",
        })
    }

    /// Resolve addresses over plain HTTP, for local test servers.
    #[must_use]
    pub const fn plain_http(mut self) -> Self {
        self.scheme = "http";
        self
    }

    async fn get_json(&self, url: &str, domain: &str) -> Result<Value, PaymentFailure> {
        let unreachable_err = |e: reqwest::Error| PaymentFailure::Unreachable {
            domain: domain.to_string(),
            reason: e.to_string(),
        };

        debug!(url, "LNURL request");
        let response = self.http.get(url).send().await.map_err(unreachable_err)?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(PaymentFailure::LnurlUnsupported {
                domain: domain.to_string(),
            });
        }
        if !status.is_success() {
            return Err(PaymentFailure::Unreachable {
                domain: domain.to_string(),
                reason: format!("HTTP {status}"),
            });
        }
        let body: Value = response
            .json()
            .await
            .map_err(|_| PaymentFailure::LnurlUnsupported {
                domain: domain.to_string(),
            })?;

        if body.get("status").and_then(Value::as_str) == Some("ERROR") {
            let reason = body
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(PaymentFailure::Provider(reason.to_string()));
        }
        Ok(body)
    }
}

#[async_trait]
impl LnurlClient for HttpLnurlClient {
    async fn fetch_descriptor(
        &self,
        address: &LightningAddress,
    ) -> Result<PayDescriptor, PaymentFailure> {
        let unsupported = || PaymentFailure::LnurlUnsupported {
            domain: address.domain.clone(),
        };
        let body = self
            .get_json(&address.well_known_url(self.scheme), &address.domain)
            .await?;
        let descriptor: PayDescriptor = serde_json::from_value(body).map_err(|_| unsupported())?;
        if descriptor.tag != "payRequest" || descriptor.min_sendable > descriptor.max_sendable {
            return Err(unsupported());
        }
        Ok(descriptor)
    }

    async fn request_invoice(
        &self,
        address: &LightningAddress,
        descriptor: &PayDescriptor,
        amount_msats: u64,
        zap_request: Option<&str>,
    ) -> Result<String, PaymentFailure> {
        let lnurl = address.lnurl()?;
        let url = descriptor.invoice_url(amount_msats, zap_request, Some(&lnurl))?;
        let body = self.get_json(url.as_str(), &address.domain).await?;
        let invoice: InvoiceResponse = serde_json::from_value(body)
            .map_err(|_| PaymentFailure::Provider("response carried no invoice".into()))?;
        Ok(invoice.pr)
    }
}

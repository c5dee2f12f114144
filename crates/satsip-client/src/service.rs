//! Query and publish operations over the manager's live relay client.
//!
//! Reads are bounded by the configured query timeout. A timed-out read is
//! reported as [`ClientError::QueryTimeout`] straight away, while other relay
//! failures are retried up to the configured number of attempts. Publishing
//! never fails loudly: problems are reported through the [`Notifier`] and
//! the call returns `false`.

use std::sync::Arc;
use std::time::Duration;

use satsip_core::RelayConfig;
use satsip_nostr::schema::{
    self, APP_TAG, AppRecord, KIND_APP_DATA, KIND_ZAP_RECEIPT, LINK_D_TAG_PREFIX, LinkRecord,
    PROFILE_D_TAG, Profile, THEME_D_TAG, Theme, WALLETS_D_TAG, Wallets, ZapReceipt, ZapRequestData,
};
use satsip_nostr::{Event, SignerError, unix_now};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{ClientError, Result};
use crate::manager::ConnectionManager;
use crate::notify::{NoticeLevel, Notifier};
use crate::relay::{Filter, RelayClient};
use crate::zap::{self, LnurlClient, PaymentCapabilities, PaymentRoute};

/// Read policy for queries.
#[derive(Debug, Clone, Copy)]
pub struct QueryPolicy {
    pub timeout: Duration,
    /// Total tries for a read that fails with a retryable error.
    pub attempts: u32,
}

impl Default for QueryPolicy {
    fn default() -> Self {
        Self::from(&RelayConfig::default())
    }
}

impl From<&RelayConfig> for QueryPolicy {
    fn from(config: &RelayConfig) -> Self {
        Self {
            timeout: config.query_timeout(),
            attempts: config.query_attempts.max(1),
        }
    }
}

pub struct NostrService {
    manager: Arc<ConnectionManager>,
    policy: QueryPolicy,
    notifier: Arc<dyn Notifier>,
    lnurl: Arc<dyn LnurlClient>,
    capabilities: PaymentCapabilities,
}

impl std::fmt::Debug for NostrService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NostrService")
            .field("policy", &self.policy)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

impl NostrService {
    pub fn new(
        manager: Arc<ConnectionManager>,
        policy: QueryPolicy,
        notifier: Arc<dyn Notifier>,
        lnurl: Arc<dyn LnurlClient>,
        capabilities: PaymentCapabilities,
    ) -> Self {
        Self {
            manager,
            policy,
            notifier,
            lnurl,
            capabilities,
        }
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// The creator's newest profile record.
    pub async fn get_profile(&self, pubkey: &str) -> Result<Option<Profile>> {
        self.get_singleton(pubkey, PROFILE_D_TAG).await
    }

    /// The creator's visible links in render order.
    pub async fn get_links(&self, pubkey: &str) -> Result<Vec<LinkRecord>> {
        // Relays cannot prefix-match `d` tags, so fetch every app record and
        // keep the link ones.
        let filter = Filter::new()
            .author(pubkey)
            .kind(KIND_APP_DATA)
            .t_tag(APP_TAG);
        let events: Vec<Event> = self
            .query(filter)
            .await?
            .into_iter()
            .filter(|e| e.d_tag().is_some_and(|d| d.starts_with(LINK_D_TAG_PREFIX)))
            .collect();

        let links: Vec<LinkRecord> = schema::latest_by_d_tag(events)
            .iter()
            .map(|e| schema::parse::<LinkRecord>(&e.content))
            .filter(|link| !link.id.is_empty())
            .collect();
        debug!(pubkey, links = links.len(), "Fetched links");
        Ok(schema::visible_links(links))
    }

    pub async fn get_theme(&self, pubkey: &str) -> Result<Option<Theme>> {
        self.get_singleton(pubkey, THEME_D_TAG).await
    }

    pub async fn get_wallets(&self, pubkey: &str) -> Result<Option<Wallets>> {
        self.get_singleton(pubkey, WALLETS_D_TAG).await
    }

    /// Zap receipts naming `pubkey` as recipient. Malformed receipts are
    /// skipped.
    pub async fn get_zap_receipts(&self, pubkey: &str) -> Result<Vec<ZapReceipt>> {
        let filter = Filter::new().kind(KIND_ZAP_RECEIPT).p_tag(pubkey);
        let mut receipts: Vec<ZapReceipt> = self
            .query(filter)
            .await?
            .into_iter()
            .filter_map(|event| match ZapReceipt::from_event(event) {
                Ok(receipt) => Some(receipt),
                Err(e) => {
                    debug!(error = %e, "Skipping malformed zap receipt");
                    None
                }
            })
            .collect();
        receipts.sort_by(|a, b| b.event.created_at.cmp(&a.event.created_at));
        Ok(receipts)
    }

    async fn get_singleton<T: AppRecord>(&self, pubkey: &str, d_tag: &str) -> Result<Option<T>> {
        let filter = Filter::new()
            .author(pubkey)
            .kind(KIND_APP_DATA)
            .d_tag(d_tag);
        let events = self.query(filter).await?;
        Ok(schema::newest(events).map(|e| schema::parse::<T>(&e.content)))
    }

    /// Run a filter against the live client under the read policy.
    async fn query(&self, filter: Filter) -> Result<Vec<Event>> {
        let mut attempt = 1;
        loop {
            match self.query_once(filter.clone()).await {
                Ok(events) => return Ok(events),
                Err(e) if e.is_retryable() && attempt < self.policy.attempts => {
                    warn!(attempt, error = %e, "Query failed, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn query_once(&self, filter: Filter) -> Result<Vec<Event>> {
        let client = self.manager.client().ok_or(ClientError::NotConnected)?;
        match timeout(self.policy.timeout, client.fetch_events(filter)).await {
            Ok(events) => Ok(events?),
            Err(_) => Err(ClientError::QueryTimeout {
                timeout_ms: u64::try_from(self.policy.timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    pub async fn publish_profile(&self, profile: &Profile) -> bool {
        self.publish_record(profile, "profile").await
    }

    pub async fn publish_link(&self, link: &LinkRecord) -> bool {
        self.publish_record(link, "link").await
    }

    pub async fn publish_theme(&self, theme: &Theme) -> bool {
        self.publish_record(theme, "theme").await
    }

    pub async fn publish_wallets(&self, wallets: &Wallets) -> bool {
        self.publish_record(wallets, "wallets").await
    }

    async fn publish_record<T: AppRecord>(&self, record: &T, what: &str) -> bool {
        if let Err(e) = record.validate() {
            warn!(record = what, error = %e, "Refusing to publish invalid record");
            self.notifier
                .notify(NoticeLevel::Error, &format!("Your {what} is incomplete: {e}"));
            return false;
        }
        match self.try_publish(record).await {
            Ok(accepted) => {
                info!(record = what, d_tag = %record.d_tag(), accepted, "Published");
                true
            }
            Err(e) => {
                warn!(record = what, error = %e, "Publish failed");
                self.notifier
                    .notify(NoticeLevel::Error, &format!("Could not save your {what}: {e}"));
                false
            }
        }
    }

    async fn try_publish<T: AppRecord>(&self, record: &T) -> Result<usize> {
        let client = self.manager.client().ok_or(ClientError::NotConnected)?;
        let signer = self
            .manager
            .signer()
            .ok_or(ClientError::Signing(SignerError::Unavailable))?;
        let event = signer
            .sign_template(schema::serialize(record, unix_now()))
            .await?;
        Ok(client.publish(&event).await?)
    }

    // ------------------------------------------------------------------
    // Zaps
    // ------------------------------------------------------------------

    /// Sign a zap request and return it as event JSON.
    pub async fn create_zap_request(&self, zap: &ZapRequestData) -> Result<String> {
        let signer = self
            .manager
            .signer()
            .ok_or(ClientError::Signing(SignerError::Unavailable))?;
        let template = zap.to_template(unix_now())?;
        let event = signer.sign_template(template).await?;
        Ok(event.to_json()?)
    }

    /// Pay `amount_sats` to `lightning_address` and report which route
    /// completed the payment.
    pub async fn pay_zap(
        &self,
        lightning_address: &str,
        amount_sats: u64,
        zap_request: Option<&str>,
    ) -> Result<PaymentRoute> {
        match zap::pay(
            self.lnurl.as_ref(),
            &self.capabilities,
            self.notifier.as_ref(),
            lightning_address,
            amount_sats,
            zap_request,
        )
        .await
        {
            Ok(route) => Ok(route),
            Err(failure) => {
                warn!(address = lightning_address, error = %failure, "Zap failed");
                self.notifier
                    .notify(NoticeLevel::Error, &failure.user_message());
                Err(ClientError::PaymentFailed(failure))
            }
        }
    }

    /// Pay through the fallback chain. `Ok(true)` once any route succeeds.
    pub async fn send_zap(
        &self,
        lightning_address: &str,
        amount_sats: u64,
        zap_request: Option<&str>,
    ) -> Result<bool> {
        self.pay_zap(lightning_address, amount_sats, zap_request)
            .await
            .map(|_| true)
    }
}

#[cfg(test)]
#[path = "service_tests.rs"]
mod tests;

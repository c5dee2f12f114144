//! Wiring: builds the connection manager and service from configuration.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::Result;
use satsip_client::relay::PoolConfig;
use satsip_client::zap::{HttpLnurlClient, PaymentCapabilities};
use satsip_client::{
    ConnectionManager, ManagerConfig, NoticeLevel, NostrService, Notifier, PoolFactory,
    QueryPolicy, SessionStore,
};
use satsip_core::Config;
use satsip_nostr::KeyFileProbe;

use crate::cmd::{SystemClipboard, SystemUriOpener};

/// Prints user-facing notices to stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalNotifier;

impl Notifier for TerminalNotifier {
    fn notify(&self, level: NoticeLevel, message: &str) {
        let prefix = match level {
            NoticeLevel::Info => "note",
            NoticeLevel::Warning => "warning",
            NoticeLevel::Error => "error",
        };
        let _ = writeln!(io::stderr(), "{prefix}: {message}");
    }
}

/// Everything a command needs.
pub struct App {
    pub config: Config,
    pub manager: Arc<ConnectionManager>,
    pub service: NostrService,
}

impl App {
    pub fn build(config: Config) -> Result<Self> {
        let notifier: Arc<dyn Notifier> = Arc::new(TerminalNotifier);
        let session = Arc::new(SessionStore::file(config.session.resolved_storage_dir()));
        let probe = Arc::new(KeyFileProbe::new(config.session.resolved_key_path()));
        let factory = Arc::new(PoolFactory::new(PoolConfig::from(&config.relays)));

        let manager = Arc::new(ConnectionManager::new(
            ManagerConfig::from(&config.relays),
            factory,
            probe,
            session,
            Arc::clone(&notifier),
        ));

        let lnurl = Arc::new(HttpLnurlClient::new(config.zaps.lnurl_timeout())?);
        let capabilities = PaymentCapabilities {
            uri_opener: Some(Arc::new(SystemUriOpener)),
            clipboard: Some(Arc::new(SystemClipboard)),
            ..PaymentCapabilities::default()
        };
        let service = NostrService::new(
            Arc::clone(&manager),
            QueryPolicy::from(&config.relays),
            notifier,
            lnurl,
            capabilities,
        );

        Ok(Self {
            config,
            manager,
            service,
        })
    }
}

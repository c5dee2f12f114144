//! Subcommand handlers.
//!
//! User-facing output uses writeln! to stdout (this is a CLI binary, not debug output).

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Args, Subcommand};
use satsip_client::zap::{LightningAddress, PaymentRoute};
use satsip_client::{ConnectionState, SessionRecord};
use satsip_nostr::schema::{LinkRecord, LinkType, Profile, Theme, ZapReceipt, ZapRequestData};
use satsip_nostr::{Keys, nip19, unix_now};
use serde::Serialize;
use tracing::warn;

use crate::app::App;
use crate::prompt;

/// Flags shared by every subcommand.
#[derive(Debug, Clone, Default)]
pub struct GlobalOpts {
    /// Relays to use instead of the session's or the configured defaults.
    pub relays: Vec<String>,
    pub non_interactive: bool,
    pub json: bool,
}

/// `--relay` flags. Accepted before the subcommand and again after it; the
/// two sets are concatenated.
#[derive(Debug, Clone, Default, Args)]
pub struct RelayArgs {
    /// Relay URL to use (repeatable or comma-separated)
    #[arg(long = "relay", value_delimiter = ',', action = ArgAction::Append)]
    pub relays: Vec<String>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Connect to relays, optionally those hinted by an npub or nprofile
    Connect {
        /// npub, nprofile or hex public key
        identifier: Option<String>,
        /// Stay connected and print state changes until interrupted
        #[arg(long)]
        watch: bool,
        #[command(flatten)]
        relay: RelayArgs,
    },
    /// Show the last saved session
    Status,
    /// Disconnect and forget the saved session
    Disconnect,
    /// Show a creator's profile
    Profile { identifier: String },
    /// List a creator's visible links
    Links { identifier: String },
    /// Show a creator's theme
    Theme { identifier: String },
    /// List a creator's wallets
    Wallets { identifier: String },
    /// List zaps a creator has received, newest first
    Zaps { identifier: String },
    /// Publish your profile
    PublishProfile {
        #[arg(long)]
        name: String,
        #[arg(long)]
        display_name: Option<String>,
        #[arg(long)]
        bio: Option<String>,
        #[arg(long)]
        picture: Option<String>,
        #[arg(long)]
        banner: Option<String>,
        /// Lightning address receiving zaps
        #[arg(long)]
        lud16: Option<String>,
        #[arg(long)]
        website: Option<String>,
        #[command(flatten)]
        relay: RelayArgs,
    },
    /// Publish or update one link
    PublishLink {
        /// Link id; reuse an existing id to replace that link
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        title: String,
        #[arg(long)]
        url: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long, default_value_t = 0)]
        position: i64,
        /// Publish the link hidden
        #[arg(long)]
        inactive: bool,
        /// Mark the link as a wallet link
        #[arg(long)]
        wallet: bool,
        #[command(flatten)]
        relay: RelayArgs,
    },
    /// Publish your theme
    PublishTheme {
        #[arg(long)]
        name: String,
        /// Theme variable as KEY=VALUE (repeatable)
        #[arg(long = "var", value_name = "KEY=VALUE")]
        vars: Vec<String>,
        #[command(flatten)]
        relay: RelayArgs,
    },
    /// Send a zap to a Lightning address or a creator
    Zap {
        /// Lightning address (name@domain); looked up from the creator when omitted
        address: Option<String>,
        /// Creator to zap (npub, nprofile or hex)
        #[arg(long)]
        to: Option<String>,
        /// Amount in sats
        #[arg(long)]
        amount: Option<u64>,
        #[arg(long, default_value = "")]
        comment: String,
    },
    /// Generate a signing key
    Keygen {
        /// Replace an existing key
        #[arg(long)]
        force: bool,
    },
    /// Decode an npub, nprofile or hex public key
    Decode { identifier: String },
}

impl Command {
    /// Relays given after the subcommand name.
    pub fn relays(&self) -> &[String] {
        match self {
            Self::Connect { relay, .. }
            | Self::PublishProfile { relay, .. }
            | Self::PublishLink { relay, .. }
            | Self::PublishTheme { relay, .. } => &relay.relays,
            _ => &[],
        }
    }
}

/// Execute a subcommand.
pub async fn run(app: &App, command: Command, opts: &GlobalOpts) -> Result<()> {
    let mut out = io::stdout();
    match command {
        Command::Connect { identifier, watch, .. } => {
            match identifier {
                Some(identifier) => {
                    let id = app.manager.connect_to_identifier(&identifier).await?;
                    writeln!(out, "Connected for {}", id.pubkey)?;
                }
                None => app.manager.connect(relay_override(opts)).await?,
            }
            write_state(&mut out, &app.manager.state())?;
            if watch {
                watch_state(app, &mut out).await?;
            }
        }
        Command::Status => {
            let session = app.manager.session().load();
            if opts.json {
                write_json(&mut out, &session)?;
            } else {
                write_session(&mut out, session.as_ref())?;
            }
        }
        Command::Disconnect => {
            app.manager.disconnect().await;
            writeln!(out, "Disconnected.")?;
        }
        Command::Profile { identifier } => {
            let id = app.manager.connect_to_identifier(&identifier).await?;
            let profile = app.service.get_profile(&id.pubkey).await?;
            if opts.json {
                write_json(&mut out, &profile)?;
            } else {
                match profile {
                    Some(profile) => write_profile(&mut out, &profile)?,
                    None => writeln!(out, "No profile published.")?,
                }
            }
        }
        Command::Links { identifier } => {
            let id = app.manager.connect_to_identifier(&identifier).await?;
            let links = app.service.get_links(&id.pubkey).await?;
            if opts.json {
                write_json(&mut out, &links)?;
            } else {
                write_links(&mut out, &links)?;
            }
        }
        Command::Theme { identifier } => {
            let id = app.manager.connect_to_identifier(&identifier).await?;
            let theme = app.service.get_theme(&id.pubkey).await?;
            if opts.json {
                write_json(&mut out, &theme)?;
            } else {
                match theme {
                    Some(theme) => write_theme(&mut out, &theme)?,
                    None => writeln!(out, "No theme published.")?,
                }
            }
        }
        Command::Wallets { identifier } => {
            let id = app.manager.connect_to_identifier(&identifier).await?;
            let wallets = app.service.get_wallets(&id.pubkey).await?;
            if opts.json {
                write_json(&mut out, &wallets)?;
            } else {
                let entries = wallets.map(|w| w.wallets).unwrap_or_default();
                if entries.is_empty() {
                    writeln!(out, "No wallets published.")?;
                }
                for entry in &entries {
                    let label = entry.label.as_deref().unwrap_or("-");
                    let kind = format!("{:?}", entry.kind);
                    writeln!(out, "{kind:<10}  {label:<20}  {}", entry.address)?;
                }
            }
        }
        Command::Zaps { identifier } => {
            let id = app.manager.connect_to_identifier(&identifier).await?;
            let receipts = app.service.get_zap_receipts(&id.pubkey).await?;
            write_receipts(&mut out, &receipts)?;
        }
        Command::PublishProfile {
            name,
            display_name,
            bio,
            picture,
            banner,
            lud16,
            website,
            ..
        } => {
            ensure_writable(app, opts).await?;
            let profile = Profile {
                name,
                display_name,
                bio,
                picture,
                banner,
                nip05: None,
                lud16,
                website,
            };
            report_publish(&mut out, "Profile", app.service.publish_profile(&profile).await)?;
        }
        Command::PublishLink {
            id,
            title,
            url,
            description,
            position,
            inactive,
            wallet,
            ..
        } => {
            ensure_writable(app, opts).await?;
            let now = unix_now();
            let link = LinkRecord {
                id: id.unwrap_or_else(|| now.to_string()),
                title,
                url,
                link_type: if wallet { LinkType::Wallet } else { LinkType::Link },
                description,
                position,
                is_active: !inactive,
                created_at: now,
                updated_at: now,
                ..LinkRecord::default()
            };
            let published = app.service.publish_link(&link).await;
            report_publish(&mut out, &format!("Link {}", link.id), published)?;
        }
        Command::PublishTheme { name, vars, .. } => {
            let variables = parse_variables(&vars)?;
            ensure_writable(app, opts).await?;
            let theme = Theme { name, variables };
            report_publish(&mut out, "Theme", app.service.publish_theme(&theme).await)?;
        }
        Command::Zap {
            address,
            to,
            amount,
            comment,
        } => zap(app, opts, &mut out, address, to, amount, comment).await?,
        Command::Keygen { force } => {
            let path = app.config.session.resolved_key_path();
            if path.exists() && !force {
                let keys = Keys::load_from_file(&path)
                    .with_context(|| format!("Failed to read key at {}", path.display()))?;
                writeln!(
                    out,
                    "Key already exists at {} (use --force to replace)",
                    path.display()
                )?;
                writeln!(out, "{}", keys.npub())?;
                return Ok(());
            }
            let keys = Keys::generate();
            keys.save_to_file(&path)
                .with_context(|| format!("Failed to write key to {}", path.display()))?;
            writeln!(out, "Saved new key to {}", path.display())?;
            writeln!(out, "{}", keys.npub())?;
        }
        Command::Decode { identifier } => {
            let id = nip19::decode_identifier(&identifier)?;
            writeln!(out, "pubkey: {}", id.pubkey)?;
            writeln!(out, "npub:   {}", nip19::encode_npub(&id.pubkey)?)?;
            for relay in &id.relays {
                writeln!(out, "relay:  {relay}")?;
            }
        }
    }
    Ok(())
}

fn relay_override(opts: &GlobalOpts) -> Option<Vec<String>> {
    (!opts.relays.is_empty()).then(|| opts.relays.clone())
}

/// Connect (reusing the saved session when possible) and require a signer.
async fn ensure_writable(app: &App, opts: &GlobalOpts) -> Result<()> {
    if let Some(relays) = relay_override(opts) {
        app.manager.connect(Some(relays)).await?;
    } else if !app.manager.restore().await? {
        app.manager.connect(None).await?;
    }
    if app.manager.signer().is_none() {
        bail!(
            "No signing key at {}. Run `satsip keygen` first.",
            app.config.session.resolved_key_path().display()
        );
    }
    Ok(())
}

async fn zap(
    app: &App,
    opts: &GlobalOpts,
    out: &mut impl Write,
    address: Option<String>,
    to: Option<String>,
    amount: Option<u64>,
    comment: String,
) -> Result<()> {
    let recipient = match &to {
        Some(identifier) => Some(app.manager.connect_to_identifier(identifier).await?),
        None => None,
    };

    let address = match (address, &recipient) {
        (Some(address), _) => address,
        (None, Some(id)) => lookup_address(app, &id.pubkey)
            .await?
            .context("Creator has no Lightning address")?,
        (None, None) => bail!("Give a Lightning address or --to <creator>"),
    };

    let amount_sats = match amount {
        Some(amount) => amount,
        None => prompt::prompt_amount(opts.non_interactive, app.config.zaps.default_amount_sats)?,
    };
    if !prompt::confirm_zap(opts.non_interactive, &address, amount_sats)? {
        writeln!(out, "Cancelled.")?;
        return Ok(());
    }

    let zap_request = match &recipient {
        Some(id) if app.manager.signer().is_some() => {
            let data = ZapRequestData {
                amount_msats: amount_sats.saturating_mul(1000),
                recipient_pubkey: id.pubkey.clone(),
                relays: app.manager.relay_urls(),
                content: comment,
                event_id: None,
                lnurl: LightningAddress::parse(&address)
                    .ok()
                    .and_then(|a| a.lnurl().ok()),
            };
            match app.service.create_zap_request(&data).await {
                Ok(json) => Some(json),
                Err(e) => {
                    warn!(error = %e, "Paying without a zap request");
                    None
                }
            }
        }
        _ => None,
    };

    let route = app
        .service
        .pay_zap(&address, amount_sats, zap_request.as_deref())
        .await?;
    writeln!(out, "{}", describe_route(&route))?;
    Ok(())
}

/// The creator's wallet address, falling back to the profile's `lud16`.
async fn lookup_address(app: &App, pubkey: &str) -> Result<Option<String>> {
    let from_wallets = app
        .service
        .get_wallets(pubkey)
        .await?
        .and_then(|w| w.lightning_address().map(ToString::to_string));
    if from_wallets.is_some() {
        return Ok(from_wallets);
    }
    Ok(app
        .service
        .get_profile(pubkey)
        .await?
        .and_then(|p| p.lud16)
        .filter(|a| !a.trim().is_empty()))
}

async fn watch_state(app: &App, out: &mut impl Write) -> Result<()> {
    let _signer_watch = app
        .config
        .relays
        .signer_poll_interval()
        .map(|interval| app.manager.spawn_signer_watch(interval));
    let mut states = app.manager.subscribe();
    loop {
        tokio::select! {
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = states.borrow_and_update().clone();
                write_state(out, &state)?;
            }
            _ = tokio::signal::ctrl_c() => break,
            // Stand-in for a regained-focus signal in a terminal session.
            () = tokio::time::sleep(Duration::from_secs(60)) => {
                if app.manager.handle_visibility_regained().await? {
                    writeln!(out, "Reconnected.")?;
                }
            }
        }
    }
    Ok(())
}

fn report_publish(out: &mut impl Write, what: &str, published: bool) -> Result<()> {
    if published {
        writeln!(out, "{what} published.")?;
        Ok(())
    } else {
        bail!("{what} was not published")
    }
}

/// Parse `KEY=VALUE` pairs.
pub fn parse_variables(pairs: &[String]) -> Result<BTreeMap<String, String>> {
    pairs
        .iter()
        .map(|pair| {
            let (key, value) = pair
                .split_once('=')
                .with_context(|| format!("Expected KEY=VALUE, got {pair:?}"))?;
            let key = key.trim();
            if key.is_empty() {
                bail!("Empty theme variable name in {pair:?}");
            }
            Ok((key.to_string(), value.trim().to_string()))
        })
        .collect()
}

pub fn describe_route(route: &PaymentRoute) -> String {
    match route {
        PaymentRoute::NativeZap => "Zap sent.".to_string(),
        PaymentRoute::Wallet { preimage } => format!("Paid. Preimage: {preimage}"),
        PaymentRoute::UriHandler { .. } => {
            "Opened the invoice in your Lightning wallet.".to_string()
        }
        PaymentRoute::Clipboard { invoice } => {
            format!("Invoice copied to clipboard. Paste it into your wallet:\n{invoice}")
        }
    }
}

fn write_json(out: &mut impl Write, value: &impl Serialize) -> Result<()> {
    writeln!(out, "{}", serde_json::to_string_pretty(value)?)?;
    Ok(())
}

pub fn write_state(out: &mut impl Write, state: &ConnectionState) -> Result<()> {
    writeln!(
        out,
        "{:?}: {} relay(s), signer {}",
        state.phase,
        state.connected_relay_count,
        if state.has_signer { "available" } else { "unavailable" }
    )?;
    if let Some(pubkey) = &state.user_pubkey {
        writeln!(out, "Signed in as {pubkey}")?;
    }
    Ok(())
}

pub fn write_session(out: &mut impl Write, session: Option<&SessionRecord>) -> Result<()> {
    let Some(session) = session else {
        writeln!(out, "No saved session.")?;
        return Ok(());
    };
    writeln!(
        out,
        "Last session: {}",
        if session.is_connected { "connected" } else { "disconnected" }
    )?;
    if let Some(npub) = &session.user_npub {
        writeln!(out, "User:   {npub}")?;
    }
    if let Some(identifier) = &session.identifier {
        writeln!(out, "Viewing: {identifier}")?;
    }
    for relay in &session.relay_urls {
        writeln!(out, "Relay:  {relay}")?;
    }
    Ok(())
}

pub fn write_profile(out: &mut impl Write, profile: &Profile) -> Result<()> {
    writeln!(out, "{}", profile.shown_name())?;
    let fields = [
        ("Bio", &profile.bio),
        ("Website", &profile.website),
        ("Lightning", &profile.lud16),
        ("Picture", &profile.picture),
    ];
    for (label, value) in fields {
        if let Some(value) = value {
            writeln!(out, "  {label}: {value}")?;
        }
    }
    Ok(())
}

pub fn write_links(out: &mut impl Write, links: &[LinkRecord]) -> Result<()> {
    if links.is_empty() {
        writeln!(out, "No links.")?;
        return Ok(());
    }
    for link in links {
        let title = if link.title.is_empty() { &link.url } else { &link.title };
        writeln!(out, "{:>3}. {title}  <{}>", link.position, link.url)?;
    }
    Ok(())
}

fn write_theme(out: &mut impl Write, theme: &Theme) -> Result<()> {
    writeln!(out, "{}", theme.name)?;
    for (key, value) in &theme.variables {
        writeln!(out, "  {key} = {value}")?;
    }
    Ok(())
}

fn write_receipts(out: &mut impl Write, receipts: &[ZapReceipt]) -> Result<()> {
    if receipts.is_empty() {
        writeln!(out, "No zaps received.")?;
        return Ok(());
    }
    for receipt in receipts {
        let sats = receipt
            .amount_msats()
            .map_or_else(|| "?".to_string(), |m| (m / 1000).to_string());
        let sender = receipt.sender().unwrap_or("anonymous");
        let at = receipt.event.created_at;
        writeln!(out, "{at:>10}  {sats:>8} sats  from {sender}")?;
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use satsip_client::ConnectionPhase;

    fn render(f: impl FnOnce(&mut Vec<u8>) -> Result<()>) -> String {
        let mut buf = Vec::new();
        f(&mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn parse_variables_splits_on_first_equals() {
        let vars = parse_variables(&["accent = #ff0".into(), "font=a=b".into()]).unwrap();
        assert_eq!(vars["accent"], "#ff0");
        assert_eq!(vars["font"], "a=b");
    }

    #[test]
    fn parse_variables_rejects_bad_pairs() {
        assert!(parse_variables(&["accent".into()]).is_err());
        assert!(parse_variables(&["=red".into()]).is_err());
    }

    #[test]
    fn links_fall_back_to_url_for_title() {
        let links = vec![LinkRecord {
            id: "1".into(),
            url: "https://a.example".into(),
            position: 2,
            is_active: true,
            ..LinkRecord::default()
        }];
        let text = render(|out| write_links(out, &links));
        assert_eq!(text, "  2. https://a.example  <https://a.example>\n");
        assert_eq!(render(|out| write_links(out, &[])), "No links.\n");
    }

    #[test]
    fn profile_prefers_display_name() {
        let profile = Profile {
            name: "alice".into(),
            display_name: Some("Alice".into()),
            lud16: Some("alice@pay.example".into()),
            ..Profile::default()
        };
        let text = render(|out| write_profile(out, &profile));
        assert!(text.starts_with("Alice\n"));
        assert!(text.contains("Lightning: alice@pay.example"));
        assert!(!text.contains("Bio"));
    }

    #[test]
    fn state_line_reports_relays_and_signer() {
        let state = ConnectionState {
            phase: ConnectionPhase::Connected,
            is_connected: true,
            connected_relay_count: 2,
            has_signer: false,
            user_pubkey: None,
        };
        assert_eq!(
            render(|out| write_state(out, &state)),
            "Connected: 2 relay(s), signer unavailable\n"
        );
    }

    #[test]
    fn session_summary_without_session() {
        assert_eq!(render(|out| write_session(out, None)), "No saved session.\n");
    }

    #[test]
    fn clipboard_route_includes_invoice() {
        let text = describe_route(&PaymentRoute::Clipboard {
            invoice: "lnbc1".into(),
        });
        assert!(text.ends_with("lnbc1"));
    }
}

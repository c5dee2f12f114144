//! Relay URL normalization.

use tracing::debug;
use url::Url;

/// Normalize a relay URL: trimmed, `ws`/`wss` only, lowercase host, no
/// fragment, no trailing slash on a bare host.
///
/// Returns `None` for anything that is not a usable relay address.
pub fn normalize_relay_url(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let mut url = Url::parse(raw).ok()?;
    if !matches!(url.scheme(), "ws" | "wss") || url.host_str().is_none_or(str::is_empty) {
        return None;
    }
    url.set_fragment(None);

    let mut normalized = url.to_string();
    if url.path() == "/" && url.query().is_none() {
        normalized.pop();
    }
    Some(normalized)
}

/// Normalize and de-duplicate, keeping first-seen order. Invalid entries
/// are dropped.
pub fn normalize_relay_urls<I, S>(urls: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for raw in urls {
        match normalize_relay_url(raw.as_ref()) {
            Some(url) if !out.contains(&url) => out.push(url),
            Some(_) => {}
            None => debug!(url = raw.as_ref(), "Dropping invalid relay URL"),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_common_forms() {
        assert_eq!(
            normalize_relay_url("  wss://Relay.Damus.io/ ").as_deref(),
            Some("wss://relay.damus.io")
        );
        assert_eq!(
            normalize_relay_url("wss://nos.lol").as_deref(),
            Some("wss://nos.lol")
        );
        assert_eq!(
            normalize_relay_url("ws://127.0.0.1:7777/#frag").as_deref(),
            Some("ws://127.0.0.1:7777")
        );
        assert_eq!(
            normalize_relay_url("wss://relay.example.com/nostr/").as_deref(),
            Some("wss://relay.example.com/nostr/")
        );
    }

    #[test]
    fn rejects_non_websocket_urls() {
        assert!(normalize_relay_url("https://relay.damus.io").is_none());
        assert!(normalize_relay_url("relay.damus.io").is_none());
        assert!(normalize_relay_url("").is_none());
        assert!(normalize_relay_url("wss://").is_none());
    }

    #[test]
    fn dedupes_after_normalizing() {
        let urls = normalize_relay_urls([
            "wss://nos.lol/",
            "wss://relay.damus.io",
            "WSS://NOS.LOL",
            "not a url",
        ]);
        assert_eq!(urls, vec!["wss://nos.lol", "wss://relay.damus.io"]);
    }
}

//! Log output for the `satsip` binary.
//!
//! Logs go to stderr so command output on stdout stays pipeable. The level
//! comes from `log_level` in settings; `RUST_LOG` replaces it entirely.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Socket and TLS crates log every frame below `warn`.
const NOISY_DEPENDENCIES: &[&str] = &[
    "tungstenite",
    "tokio_tungstenite",
    "rustls",
    "hyper_util",
    "reqwest",
];

/// Filter directives for the configured `level`. A non-blank `rust_log`
/// is used as is.
pub fn filter_directives(level: &str, rust_log: Option<&str>) -> String {
    if let Some(explicit) = rust_log.map(str::trim).filter(|s| !s.is_empty()) {
        return explicit.to_string();
    }
    let mut directives = vec![level.trim().to_string()];
    directives.extend(NOISY_DEPENDENCIES.iter().map(|krate| format!("{krate}=warn")));
    directives.join(",")
}

/// Install the global subscriber. An unparsable level falls back to `info`.
pub fn init_tracing(level: &str, log_json: bool) {
    let directives = filter_directives(level, std::env::var("RUST_LOG").ok().as_deref());
    let env_filter = EnvFilter::try_new(&directives).unwrap_or_else(|_| {
        EnvFilter::new(filter_directives("info", None))
    });

    if log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use satsip_cli::app::App;
use satsip_cli::commands::{self, Command, GlobalOpts, RelayArgs};
use satsip_core::config::load_config;
use satsip_core::tracing_init::init_tracing;

/// `SatSip` client: creator pages, links and zaps over Nostr.
#[derive(Debug, Parser)]
#[command(name = "satsip", version, about)]
struct Cli {
    #[command(flatten)]
    relay: RelayArgs,

    /// Directory holding a `.satsip/settings.json` (defaults to the working directory)
    #[arg(long, global = true)]
    project_dir: Option<PathBuf>,

    /// Run without interactive prompts (use defaults or CLI flags)
    #[arg(long, short = 'y', global = true, env = "SATSIP_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Print machine-readable JSON where supported
    #[arg(long, global = true)]
    json: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    /// Relays from before the subcommand, then those after it.
    fn requested_relays(&self) -> Vec<String> {
        let mut relays = self.relay.relays.clone();
        relays.extend_from_slice(self.command.relays());
        relays
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    let config = load_config(Some(&project_dir))?;
    init_tracing(&config.log_level, cli.log_json);

    let opts = GlobalOpts {
        relays: cli.requested_relays(),
        non_interactive: cli.non_interactive,
        json: cli.json,
    };
    let app = App::build(config)?;
    commands::run(&app, cli.command, &opts).await
}

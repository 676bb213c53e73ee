use clap::{Parser, Subcommand};
use corelib::ThresholdKey;

#[derive(Debug, Parser)]
#[clap(name = "mexc-monitor", version, about = "Volume and price surge monitor for MEXC spot")]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Option<Command>,
}

impl Cli {
    /// `run` when no subcommand is given.
    pub fn into_command(self) -> Command {
        self.command.unwrap_or(Command::Run)
    }
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Stream market data and raise alerts until Ctrl-C
    Run,

    /// Print thresholds and active suppressions
    Status,

    /// Change one threshold: `time` (seconds), `volume` (quote units) or
    /// `change` (percent)
    Set {
        #[clap(value_parser = parse_key)]
        key: ThresholdKey,
        value: String,
    },

    /// Manage temporarily muted symbols
    #[clap(subcommand)]
    Blacklist(BlacklistCommand),

    /// Send a sample alert through the configured sink
    TestAlert,
}

#[derive(Debug, Clone, Subcommand)]
pub enum BlacklistCommand {
    /// Mute a symbol for the given number of seconds
    Add { symbol: String, seconds: u64 },

    /// Unmute a symbol
    Remove { symbol: String },

    /// Show muted symbols and time left
    List,
}

fn parse_key(raw: &str) -> Result<ThresholdKey, String> {
    raw.parse::<ThresholdKey>().map_err(|e| e.to_string())
}

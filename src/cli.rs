use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Directory for persisted state (default: `$MINIMEALIE_DATA_DIR`, then `.minimealie`).
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Store server credentials and verify them against the live server.
    Connect(ConnectArgs),
    /// Probe a page and report whether the server sees a recipe.
    Detect(DetectArgs),
    /// Submit a page to the server as a new recipe.
    Submit(SubmitArgs),
    /// Show or change the submission mode.
    Mode(ModeArgs),
    /// Show configuration and current activity.
    Status,
    /// Inspect the diagnostic event log.
    Log {
        #[command(subcommand)]
        command: LogCommand,
    },
}

#[derive(Debug, Args)]
pub struct ConnectArgs {
    /// Mealie base URL (must be http/https).
    #[arg(long)]
    pub server: String,

    /// API token.
    #[arg(long)]
    pub token: String,
}

#[derive(Debug, Args)]
pub struct DetectArgs {
    /// Page URL to probe.
    #[arg(long)]
    pub url: String,

    /// Page title, used for the duplicate scan.
    #[arg(long)]
    pub title: Option<String>,
}

#[derive(Debug, Args)]
pub struct SubmitArgs {
    /// Page URL to submit.
    #[arg(long)]
    pub url: String,

    /// Page title, used for the duplicate scan.
    #[arg(long)]
    pub title: Option<String>,

    /// Tab id reported to the orchestrator.
    #[arg(long, default_value_t = 1)]
    pub tab_id: i64,

    /// Skip the detection probe that normally precedes submission.
    #[arg(long)]
    pub no_probe: bool,
}

#[derive(Debug, Args)]
pub struct ModeArgs {
    /// New mode (`url` or `html`); prints the current mode when omitted.
    #[arg(long)]
    pub set: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum LogCommand {
    /// Print recent events, oldest first.
    Show(LogShowArgs),
    /// Delete all stored events.
    Clear,
}

#[derive(Debug, Args)]
pub struct LogShowArgs {
    /// Maximum number of events to print.
    #[arg(long, default_value_t = 50)]
    pub limit: usize,
}

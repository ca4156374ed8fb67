use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "match-recognizer", about = "Read match results from scoreboard screenshots")]
pub struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Recognize a batch of screenshots for one player.
    Scan {
        /// Screenshot files, processed in the given order.
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Owner uid the observations are submitted for.
        #[arg(short, long)]
        owner: String,

        /// Display name to anchor the stat line on, when no directory is used.
        #[arg(short, long)]
        name: Option<String>,

        /// Player directory base URL (overrides the config file).
        #[arg(long)]
        directory_url: Option<String>,

        /// OCR server URL (overrides the config file).
        #[arg(long)]
        ocr_url: Option<String>,

        /// JSON lines file receiving finalized observations.
        #[arg(short = 'O', long, default_value = "observations.jsonl")]
        output: PathBuf,

        /// Leave unreadable items pending instead of prompting.
        #[arg(long)]
        no_prompt: bool,
    },
    /// Write the default configuration to the config file.
    InitConfig {
        /// Replace an existing file.
        #[arg(long)]
        force: bool,
    },
}

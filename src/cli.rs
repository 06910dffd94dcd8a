use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "fetchgram")]
#[command(author, version, about = "Telegram bot that downloads videos from links and sends them back", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Run the bot (default)
    Run {
        /// Use webhook mode instead of long polling
        #[arg(long)]
        webhook: bool,
    },

    /// Classify and fetch one link locally, print the route the bot would take
    Fetch {
        /// Link to fetch
        url: String,

        /// Directory to download into (defaults to DOWNLOAD_FOLDER)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Keep the downloaded file instead of deleting it
        #[arg(long)]
        keep: bool,
    },

    /// Print the yt-dlp version or update it
    UpdateYtdlp {
        /// Only print the installed version
        #[arg(long)]
        check: bool,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

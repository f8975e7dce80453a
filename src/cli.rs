//! Command-line interface for Ongoarr.

use clap::{Parser, Subcommand};

/// Ongoarr - Episode tracker for ongoing series
/// Merges observed episodes and reconciles them against upstream catalogs
#[derive(Parser)]
#[command(name = "ongoarr")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run as background daemon with scheduler and ingest API
    #[command(alias = "-d", alias = "--daemon")]
    Daemon,

    /// Run a single reconciliation pass
    #[command(alias = "check", alias = "-c")]
    Reconcile,

    /// Apply a notification batch from a JSON file ("-" reads stdin)
    #[command(alias = "p")]
    Process {
        /// Path to the notification JSON
        file: String,
    },

    /// List all tracked titles
    #[command(alias = "ls", alias = "l")]
    List,

    /// Stop tracking one title
    #[command(alias = "rm", alias = "r")]
    Remove {
        /// MyAnimeList id of the title
        mal_id: i32,
        /// Dub/variant label, e.g. "ja" or "en"
        dub: String,
    },

    /// Create default config file
    #[command(alias = "--init")]
    Init,
}

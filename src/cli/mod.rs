//! CLI module for Lydbot.

pub mod commands;
mod output;
pub mod preflight;

pub use output::{format_size, Output};

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Lydbot - YouTube audio over Telegram
///
/// A Telegram bot that turns YouTube links into MP3 files.
/// The name comes from the Norwegian word "lyd", meaning "sound".
#[derive(Parser, Debug)]
#[command(name = "lydbot")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "LYDBOT_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the bot with long polling
    Run,

    /// Run the bot behind a webhook
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to bind to
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },

    /// Download one link locally through the bot pipeline
    Grab {
        /// YouTube link
        url: String,

        /// Directory for the MP3 file
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
    },

    /// Check system requirements and configuration
    Doctor,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Set a configuration value
    Set {
        /// Configuration key (e.g., "extraction.timeout_secs")
        key: String,
        /// Configuration value
        value: String,
    },

    /// Open configuration file in editor
    Edit,

    /// Show configuration file path
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_grab() {
        let cli = Cli::parse_from(["lydbot", "-vv", "grab", "https://youtu.be/dQw4w9WgXcQ", "--out", "/tmp/music"]);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Grab { url, out } => {
                assert_eq!(url, "https://youtu.be/dQw4w9WgXcQ");
                assert_eq!(out, PathBuf::from("/tmp/music"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_config_set() {
        let cli = Cli::parse_from(["lydbot", "config", "set", "delivery.max_attempts", "2"]);
        assert!(matches!(
            cli.command,
            Commands::Config { action: ConfigAction::Set { .. } }
        ));
    }

    #[test]
    fn test_verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}

//! Command-line argument parsing for the download cache
//!
//! This module defines the CLI structure using clap derive macros. The
//! commands inspect and maintain an existing cache directory.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Download cache - inspect and maintain a streamed-response disk cache
#[derive(Parser, Debug)]
#[command(
    name = "download-cache",
    version,
    about = "Inspect and maintain a disk cache of streamed downloads",
    long_about = "Inspect and maintain the disk cache used for streamed network bodies.
The cache directory and its index may be shared with running downloaders."
)]
pub struct Cli {
    /// Global options
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Global arguments available to all subcommands
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Very verbose logging (debug level)
    #[arg(long, global = true)]
    pub very_verbose: bool,

    /// Quiet mode - suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file path
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Storage root holding the cache directory
    #[arg(long, global = true, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,
}

/// Available CLI commands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Show cache location and usage
    Info,

    /// List exported entries
    List {
        /// Print the snapshot as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run one expiry and quota maintenance cycle
    Maintain,

    /// Remove the entry for a URL
    Remove {
        /// Source URL of the entry
        #[arg(value_name = "URL")]
        url: String,
    },

    /// Remove every entry and empty the cache directory
    Clear {
        /// Confirm removal of all cached files
        #[arg(short, long)]
        yes: bool,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Logging level requested by flags, if any
    pub fn log_level(&self) -> Option<tracing::Level> {
        if self.global.quiet {
            Some(tracing::Level::ERROR)
        } else if self.global.very_verbose {
            Some(tracing::Level::DEBUG)
        } else if self.global.verbose {
            Some(tracing::Level::INFO)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_remove_with_globals() {
        let cli = Cli::try_parse_from([
            "download-cache",
            "remove",
            "https://example.com/a.ts",
            "--cache-dir",
            "/tmp/media",
            "-v",
        ])
        .unwrap();

        assert_eq!(
            cli.command,
            Commands::Remove {
                url: "https://example.com/a.ts".to_string()
            }
        );
        assert_eq!(cli.global.cache_dir, Some(PathBuf::from("/tmp/media")));
        assert_eq!(cli.log_level(), Some(tracing::Level::INFO));
    }

    #[test]
    fn test_log_level_precedence() {
        let cli = Cli::try_parse_from(["download-cache", "info"]).unwrap();
        assert_eq!(cli.log_level(), None);

        let cli = Cli::try_parse_from(["download-cache", "-q", "--very-verbose", "info"]).unwrap();
        assert_eq!(cli.log_level(), Some(tracing::Level::ERROR));

        let cli = Cli::try_parse_from(["download-cache", "--very-verbose", "list", "--json"]).unwrap();
        assert_eq!(cli.log_level(), Some(tracing::Level::DEBUG));
        assert_eq!(cli.command, Commands::List { json: true });
    }

    #[test]
    fn test_remove_requires_url() {
        assert!(Cli::try_parse_from(["download-cache", "remove"]).is_err());
    }
}

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "respguard")]
#[command(about = "Inline sensitive-data detector for relayed HTTP responses")]
#[command(version)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "respguard.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the relay and scan responses passing through it
    Listen {
        /// Listen address (overrides the config file)
        addr: Option<String>,
        /// Number of concurrent scan workers (not written back to the config)
        #[arg(short, long)]
        threads: Option<usize>,
    },
    /// Scan local files with the configured rules
    Scan {
        /// Files to scan
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Locator to report findings under (defaults to file://<path>)
        #[arg(long)]
        locator: Option<String>,
        /// Print findings as JSON lines instead of coloured text
        #[arg(long)]
        json: bool,
    },
    /// List the active rules
    Rules,
    /// Write the default configuration file
    Init,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listen_accepts_address_and_threads() {
        let cli = Cli::try_parse_from(["respguard", "listen", ":9000", "-t", "4"]).unwrap();
        match cli.command {
            Commands::Listen { addr, threads } => {
                assert_eq!(addr.as_deref(), Some(":9000"));
                assert_eq!(threads, Some(4));
            }
            _ => panic!("expected listen"),
        }
        assert_eq!(cli.config, PathBuf::from("respguard.toml"));
    }

    #[test]
    fn scan_requires_a_file() {
        assert!(Cli::try_parse_from(["respguard", "scan"]).is_err());
        let cli = Cli::try_parse_from(["respguard", "-c", "x.toml", "scan", "a.html"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("x.toml"));
        assert!(matches!(cli.command, Commands::Scan { .. }));
    }
}

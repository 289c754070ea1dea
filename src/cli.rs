//! Command-line interface built on clap.
//!
//! `serve` runs the service; `submit`, `status` and `fetch` talk to a running
//! server over HTTP; `config` prints the effective configuration.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::client::client::DEFAULT_SERVER;

/// Upload intake, background processing and result retrieval.
#[derive(Debug, Parser)]
#[command(name = "intake", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Path to the TOML config file (default: ./intake.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP server and the processing engine.
    Serve {
        #[arg(long)]
        host: Option<String>,

        #[arg(long)]
        port: Option<u16>,

        /// Worker pool size.
        #[arg(long)]
        workers: Option<usize>,

        #[arg(long)]
        data_dir: Option<PathBuf>,
    },

    /// Upload a file and print the job id.
    Submit {
        file: PathBuf,

        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,

        /// Wait for the job to finish.
        #[arg(long, default_value_t = false)]
        wait: bool,

        /// Where to write the result (implies --wait).
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Show a job's status as JSON.
    Status {
        id: Uuid,

        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },

    /// Download a finished job's result.
    Fetch {
        id: Uuid,

        #[arg(long, short)]
        output: PathBuf,

        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },

    /// Print the effective configuration as TOML.
    Config,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_serve_overrides() {
        let cli = Cli::parse_from(["intake", "serve", "--port", "8080", "--workers", "2"]);
        match cli.command {
            Command::Serve {
                host,
                port,
                workers,
                data_dir,
            } => {
                assert!(host.is_none());
                assert_eq!(port, Some(8080));
                assert_eq!(workers, Some(2));
                assert!(data_dir.is_none());
            }
            _ => panic!("expected Serve command"),
        }
    }

    #[test]
    fn cli_parses_submit_with_defaults() {
        let cli = Cli::parse_from(["intake", "submit", "report.xlsx", "-o", "out.xlsx"]);
        match cli.command {
            Command::Submit {
                file,
                server,
                wait,
                output,
            } => {
                assert_eq!(file, PathBuf::from("report.xlsx"));
                assert_eq!(server, DEFAULT_SERVER);
                assert!(!wait);
                assert_eq!(output, Some(PathBuf::from("out.xlsx")));
            }
            _ => panic!("expected Submit command"),
        }
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::parse_from([
            "intake",
            "--config",
            "/etc/intake.toml",
            "--verbose",
            "config",
        ]);
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/intake.toml")));
        assert!(matches!(cli.command, Command::Config));
    }

    #[test]
    fn cli_rejects_malformed_job_id() {
        assert!(Cli::try_parse_from(["intake", "status", "not-a-uuid"]).is_err());
    }

    #[test]
    fn cli_verify() {
        Cli::command().debug_assert();
    }
}

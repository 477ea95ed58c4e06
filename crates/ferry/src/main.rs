// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ferry - always-on channel ingestion.
//!
//! This is the binary entry point for the ferry daemon and its operator commands.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod health;
mod inspect;
mod prompt;
mod serve;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use ferry_core::FerryError;

/// Ferry - always-on channel ingestion.
#[derive(Parser, Debug)]
#[command(name = "ferry", version, about, long_about = None)]
struct Cli {
    /// Load configuration from this file instead of the XDG hierarchy.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the ingestion pipeline until interrupted (default).
    Serve,
    /// Establish an upstream session interactively and persist it.
    Login,
    /// Run one discovery pass and exit.
    Sync,
    /// Print the channel catalog.
    Channels {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
        /// Disable colors.
        #[arg(long)]
        plain: bool,
    },
    /// Print backfill jobs.
    Jobs {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
        /// Disable colors.
        #[arg(long)]
        plain: bool,
    },
}

/// Process exit codes.
const EXIT_CONFIG: u8 = 1;
const EXIT_CATALOG_UNAVAILABLE: u8 = 2;
const EXIT_AUTH_FAILED: u8 = 3;
const EXIT_RUNTIME: u8 = 4;

/// Map a terminal error onto the process exit code.
fn exit_code_for(err: &FerryError) -> u8 {
    match err {
        FerryError::Config(_) => EXIT_CONFIG,
        FerryError::CatalogStoreUnavailable { .. } => EXIT_CATALOG_UNAVAILABLE,
        FerryError::AuthRequired(_) | FerryError::AuthExpired(_) => EXIT_AUTH_FAILED,
        _ => EXIT_RUNTIME,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => ferry_config::load_and_validate_path(path),
        None => ferry_config::load_and_validate(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(errors) => {
            ferry_config::render_errors(&errors);
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    serve::init_tracing(&config.ingest.log_level);

    let result = match cli.command {
        None | Some(Commands::Serve) => serve::run_serve(config).await,
        Some(Commands::Login) => serve::run_login(config).await,
        Some(Commands::Sync) => serve::run_sync(config).await,
        Some(Commands::Channels { json, plain }) => {
            inspect::run_channels(&config, json, plain).await
        }
        Some(Commands::Jobs { json, plain }) => inspect::run_jobs(&config, json, plain).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(exit_code_for(&e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(not(target_env = "msvc"))]
    fn jemalloc_is_active() {
        // Only jemalloc supports advancing the epoch.
        use tikv_jemalloc_ctl::{epoch, stats};
        epoch::advance().unwrap();
        let allocated = stats::allocated::read().unwrap();
        assert!(allocated > 0, "jemalloc should report non-zero allocation");
    }

    #[test]
    fn no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["ferry"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn channels_accepts_json_flag() {
        let cli = Cli::try_parse_from(["ferry", "channels", "--json"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Channels { json: true, plain: false })
        ));
    }

    #[test]
    fn config_flag_is_global() {
        let cli = Cli::try_parse_from(["ferry", "jobs", "--config", "/tmp/ferry.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/ferry.toml")));
    }

    #[test]
    fn exit_codes_follow_error_class() {
        assert_eq!(exit_code_for(&FerryError::Config("bad".into())), 1);
        assert_eq!(
            exit_code_for(&FerryError::CatalogStoreUnavailable {
                source: "locked".into()
            }),
            2
        );
        assert_eq!(exit_code_for(&FerryError::AuthRequired("no tty".into())), 3);
        assert_eq!(exit_code_for(&FerryError::Internal("boom".into())), 4);
    }

    #[test]
    fn binary_loads_config_defaults() {
        let config = ferry_config::load_and_validate_str("").expect("empty config should be valid");
        assert_eq!(config.backfill.batch_size, 100);
    }
}

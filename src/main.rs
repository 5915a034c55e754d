#![allow(missing_docs)]

//! LiteClaw backend binary.
//!
//! `serve` (the default) runs the HTTP API on loopback; `doctor` prints a
//! one-shot health report without starting the server.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use liteclaw::config::DataPaths;
use liteclaw::http::{self, auth, AppState, DEFAULT_PORT};
use liteclaw::logging;

#[derive(Debug, Parser)]
#[command(name = "liteclaw", version, about = "Approval-gated local assistant backend")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP backend on loopback.
    Serve {
        /// Listen port.
        #[arg(long, env = "LITECLAW_PORT", default_value_t = DEFAULT_PORT)]
        port: u16,
        /// Data directory root.
        #[arg(long, env = "LITECLAW_DATA_DIR")]
        data_dir: Option<PathBuf>,
    },
    /// Print a doctor report and exit.
    Doctor {
        /// Data directory root.
        #[arg(long, env = "LITECLAW_DATA_DIR")]
        data_dir: Option<PathBuf>,
        /// Render as markdown instead of JSON.
        #[arg(long)]
        markdown: bool,
    },
}

fn resolve_paths(data_dir: Option<PathBuf>) -> DataPaths {
    match data_dir {
        Some(root) => DataPaths::under(root),
        None => DataPaths::from_env(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Serve {
        port: DEFAULT_PORT,
        data_dir: None,
    }) {
        Command::Serve { port, data_dir } => {
            let paths = resolve_paths(data_dir);
            let _logging_guard = logging::init_server(&paths.logs_dir)?;

            let token_from_env = std::env::var(auth::AUTH_TOKEN_ENV).is_ok()
                || std::env::var(auth::API_TOKEN_ENV).is_ok();
            let api_token = auth::resolve_api_token();
            if !token_from_env {
                warn!(
                    token = %api_token,
                    "no {} set; generated an ephemeral API token",
                    auth::AUTH_TOKEN_ENV
                );
            }

            let state = AppState::initialize(paths, api_token)?;
            info!(data_dir = %state.paths.root.display(), port, "starting backend");
            http::serve(state, port).await
        }
        Command::Doctor { data_dir, markdown } => {
            logging::init_cli();
            let paths = resolve_paths(data_dir);
            let config = liteclaw::config::load_from_disk(&paths)?;
            let models = liteclaw::models::load_state(&paths)?;
            let report = liteclaw::doctor::generate_report(&config, &models, &paths);
            if markdown {
                println!("{}", liteclaw::doctor::report_to_markdown(&report));
            } else {
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            Ok(())
        }
    }
}

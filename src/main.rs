mod cart;
mod catalog;
mod cli;
mod db;
mod ipc;
mod logging;
mod schedule;
mod scoring;
mod validate;

use std::io::{self, BufRead, Write};

use anyhow::Context;
use clap::Parser;
use serde_json::json;

fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();
    logging::init_logging(cli.verbosity());

    let mut state = ipc::AppState::new();
    if let Some(path) = cli.workspace.as_deref() {
        ipc::open_workspace(&mut state, path)
            .with_context(|| format!("opening workspace {}", path.display()))?;
    }
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "campusd ready");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "stdin read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let resp = match serde_json::from_str::<ipc::Request>(&line) {
            Ok(req) => ipc::handle_request(&mut state, req),
            Err(e) => {
                // No id to echo back.
                tracing::warn!(error = %e, "malformed request line");
                json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                })
            }
        };

        writeln!(stdout, "{}", resp).context("writing response")?;
        stdout.flush().context("flushing stdout")?;
    }

    tracing::info!("stdin closed, shutting down");
    Ok(())
}

mod answer_key;
mod config;
mod db;
mod ipc;
mod questionnaire;
mod submission;

use serde_json::json;
use std::io::{self, BufRead, Write};
use tracing_subscriber::EnvFilter;

fn init_logging(filter: &str) {
    // stdout carries responses, so logs go to stderr.
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(false)
        .with_target(false)
        .init();
}

fn main() {
    let config = config::Config::from_env();
    init_logging(&config.log_filter);

    let mut state = ipc::AppState::default();
    if let Some(path) = config.workspace.as_deref() {
        // Keep serving either way; the UI can select another workspace.
        match state.open_workspace(path) {
            Ok(()) => {
                tracing::info!(workspace = %path.display(), "workspace opened from config")
            }
            Err(e) => tracing::error!(
                workspace = %path.display(),
                error = ?e,
                "failed to open configured workspace"
            ),
        }
    }

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "assessd ready");

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

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // Can't reply without id.
                tracing::warn!(error = %e, "unparseable request line");
                let resp = json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                let _ = writeln!(stdout, "{}", resp);
                let _ = stdout.flush();
                continue;
            }
        };

        tracing::debug!(id = %req.id, method = %req.method, "request");
        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
}

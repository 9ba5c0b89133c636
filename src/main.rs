mod autosave;
mod config;
mod db;
mod grading;
mod ipc;
mod logging;
mod session;
mod store;

use std::time::Instant;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info, warn};

use crate::config::Config;

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(tokio::time::Instant::from_std(d)).await,
        None => std::future::pending::<()>().await,
    }
}

/// Lines that are not a valid request still get a reply, echoing the id
/// when one can be recovered.
fn bad_json_response(line: &str, e: serde_json::Error) -> serde_json::Value {
    let id = serde_json::from_str::<serde_json::Value>(line)
        .ok()
        .and_then(|v| v.get("id").and_then(|id| id.as_str()).map(str::to_string))
        .unwrap_or_default();
    ipc::err(&id, "bad_json", e.to_string(), None)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cfg = Config::from_env();
    logging::init(&cfg);

    let mut state = ipc::AppState::new(&cfg);
    if let Some(path) = cfg.workspace.as_ref() {
        match db::open_db(path) {
            Ok(conn) => {
                state.workspace = Some(path.clone());
                state.db = Some(conn);
                info!(workspace = %path.display(), "workspace opened from environment");
            }
            Err(e) => error!(workspace = %path.display(), error = ?e, "could not open workspace"),
        }
    }
    info!(
        version = env!("CARGO_PKG_VERSION"),
        autosave_ms = cfg.autosave_quiet.as_millis() as u64,
        "resultsd ready"
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    // Requests and autosave deadlines share one task, so saves never race
    // each other or a request touching the same cell.
    loop {
        let deadline = state.autosave.next_deadline();
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(v)) => v,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "stdin read failed");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }

                let resp = match serde_json::from_str::<ipc::Request>(&line) {
                    Ok(req) => ipc::handle_request(&mut state, req),
                    Err(e) => bad_json_response(&line, e),
                };
                let mut out = serde_json::to_string(&resp)?;
                out.push('\n');
                if let Err(e) = stdout.write_all(out.as_bytes()).await {
                    warn!(error = %e, "stdout closed");
                    break;
                }
                if let Err(e) = stdout.flush().await {
                    warn!(error = %e, "stdout closed");
                    break;
                }
            }
            _ = sleep_until(deadline) => {
                ipc::flush_due(&mut state, Instant::now());
            }
        }
    }

    let outcome = ipc::flush_all(&mut state);
    info!(
        saved = outcome.saved,
        failed = outcome.failed,
        dropped = outcome.dropped,
        "shutting down"
    );
    Ok(())
}

use std::path::PathBuf;
use std::time::Duration;

use crate::autosave::DEFAULT_QUIET_PERIOD;

/// Startup settings, read once from the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Workspace opened before the first request, if any.
    pub workspace: Option<PathBuf>,
    /// Quiet period after the last edit to a cell before it is saved.
    pub autosave_quiet: Duration,
    /// `EnvFilter` directive for stderr logging.
    pub log_filter: String,
    pub log_json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: None,
            autosave_quiet: DEFAULT_QUIET_PERIOD,
            log_filter: "info".to_string(),
            log_json: false,
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim() {
        "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
        "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
        _ => None,
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unset or unparseable values keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let default = Self::default();
        Self {
            workspace: lookup("RESULTSD_WORKSPACE")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            autosave_quiet: lookup("RESULTSD_AUTOSAVE_MS")
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(default.autosave_quiet),
            log_filter: lookup("RESULTSD_LOG")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(default.log_filter),
            log_json: lookup("RESULTSD_LOG_JSON")
                .and_then(|v| parse_bool(&v))
                .unwrap_or(default.log_json),
        }
    }
}

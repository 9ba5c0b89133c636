use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::autosave::SaveScheduler;
use crate::config::Config;
use crate::session::MarksSession;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub session: Option<MarksSession>,
    pub autosave: SaveScheduler,
}

impl AppState {
    pub fn new(cfg: &Config) -> Self {
        Self {
            workspace: None,
            db: None,
            session: None,
            autosave: SaveScheduler::new(cfg.autosave_quiet),
        }
    }
}

use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::fetch::FetchSequencer;
use crate::session::Session;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub config: Config,
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub session: Option<Session>,
    pub fetches: FetchSequencer,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            workspace: None,
            db: None,
            session: None,
            fetches: FetchSequencer::new(),
        }
    }

    pub fn conn(&self) -> AppResult<&Connection> {
        self.db.as_ref().ok_or(AppError::NoWorkspace)
    }

    /// Station name for log rows: explicit param, then config, then `Unknown`.
    pub fn pc_number(&self, explicit: Option<String>) -> String {
        explicit
            .or_else(|| self.config.pc_number.clone())
            .unwrap_or_else(|| "Unknown".to_string())
    }
}

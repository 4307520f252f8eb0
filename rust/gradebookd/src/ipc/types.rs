use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::cache::ScoreCache;
use crate::calc::insights::InsightPolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Default)]
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub cache: ScoreCache,
    /// Defaults overlaid with the workspace `gradebook.toml`, before saved overrides.
    pub base_policy: InsightPolicy,
}

use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::ipc::error::err;

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
}

impl AppState {
    /// The open workspace connection, or a `no_workspace` error response for `req`.
    pub fn require_db(&self, req: &Request) -> Result<&Connection, serde_json::Value> {
        self.db
            .as_ref()
            .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
    }
}

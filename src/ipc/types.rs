use std::path::PathBuf;

use crate::db;
use crate::ident::IdGenerator;
use rand::rngs::StdRng;
use rusqlite::Connection;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Everything a handler may read or write. Owned by the request loop and
/// passed down explicitly.
pub struct AppState {
    /// `None` while the store is the in-memory session database.
    pub workspace: Option<PathBuf>,
    pub db: Connection,
    pub ids: IdGenerator<StdRng>,
}

impl AppState {
    pub fn in_memory() -> anyhow::Result<Self> {
        Ok(Self {
            workspace: None,
            db: db::open_in_memory()?,
            ids: IdGenerator::from_entropy(),
        })
    }
}

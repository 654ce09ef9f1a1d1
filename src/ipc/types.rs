use std::path::PathBuf;

use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::error::err;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl Request {
    /// Absent and `null` both read as `None`.
    pub fn optional<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, serde_json::Value> {
        match self.params.get(key) {
            None => Ok(None),
            Some(v) if v.is_null() => Ok(None),
            Some(v) => serde_json::from_value(v.clone()).map(Some).map_err(|e| {
                err(
                    &self.id,
                    "bad_params",
                    format!("invalid {}: {}", key, e),
                    None,
                )
            }),
        }
    }

    pub fn required<T: DeserializeOwned>(&self, key: &str) -> Result<T, serde_json::Value> {
        self.optional(key)?
            .ok_or_else(|| err(&self.id, "bad_params", format!("missing {}", key), None))
    }

    /// Decodes the whole params object; a request without params decodes as `{}`.
    pub fn decode_params<T: DeserializeOwned>(&self) -> Result<T, serde_json::Value> {
        let raw = if self.params.is_null() {
            serde_json::json!({})
        } else {
            self.params.clone()
        };
        serde_json::from_value(raw)
            .map_err(|e| err(&self.id, "bad_params", format!("invalid params: {}", e), None))
    }
}

/// Engine methods work without a workspace; only persisted configuration needs `db`.
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
}

impl AppState {
    pub fn require_db(&self, req: &Request) -> Result<&Connection, serde_json::Value> {
        self.db
            .as_ref()
            .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
    }
}

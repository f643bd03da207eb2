use crate::ipc::error::err;
use crate::ipc::types::Request;
use chrono::{DateTime, Utc};
use serde_json::json;

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn optional_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn optional_bool(req: &Request, key: &str) -> Result<Option<bool>, serde_json::Value> {
    match req.params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v.as_bool().map(Some).ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                format!("{} must be boolean", key),
                None,
            )
        }),
    }
}

/// Score fields arrive either as JSON numbers or as form strings ("12,5" included).
pub fn score_from_value(v: &serde_json::Value) -> Option<f64> {
    let n = match v {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().replace(',', ".").parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

pub fn timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339()
}

pub fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_default()
}

/// Bound on regenerations when a fresh identifier hits a UNIQUE index.
pub const MAX_ID_ATTEMPTS: usize = 8;

/// Inserts a row keyed by a generated identifier, regenerating on collision.
pub fn insert_with_fresh_id<G, F>(mut generate: G, mut insert: F) -> rusqlite::Result<String>
where
    G: FnMut() -> String,
    F: FnMut(&str) -> rusqlite::Result<usize>,
{
    let mut attempt = 1;
    loop {
        let candidate = generate();
        match insert(&candidate) {
            Ok(_) => return Ok(candidate),
            Err(e) if crate::db::is_unique_violation(&e) && attempt < MAX_ID_ATTEMPTS => {
                tracing::debug!(attempt, "generated id collided, retrying");
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

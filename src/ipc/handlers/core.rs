use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

pub const IN_MEMORY_WORKSPACE: &str = ":memory:";

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "persistent": state.workspace.is_some()
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|p| !p.is_empty());
    let Some(raw) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    if raw == IN_MEMORY_WORKSPACE {
        return match db::open_in_memory() {
            Ok(conn) => {
                state.db = conn;
                state.workspace = None;
                tracing::info!("switched to in-memory session store");
                ok(&req.id, json!({ "workspacePath": null, "persistent": false }))
            }
            Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
        };
    }

    let path = PathBuf::from(raw);
    match db::open_db(&path) {
        Ok(conn) => {
            state.db = conn;
            state.workspace = Some(path.clone());
            tracing::info!(workspace = %path.display(), "workspace opened");
            ok(
                &req.id,
                json!({ "workspacePath": path.to_string_lossy(), "persistent": true }),
            )
        }
        Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        _ => None,
    }
}

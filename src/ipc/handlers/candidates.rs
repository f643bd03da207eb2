use crate::ident::IdKind;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{insert_with_fresh_id, optional_str, required_str, timestamp};
use crate::ipc::types::{AppState, Request};
use crate::matricule::Role;
use chrono::Utc;
use rusqlite::OptionalExtension;
use serde_json::json;

use super::setup;

fn handle_candidates_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let matricule = match required_str(req, "matricule") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let email = optional_str(req, "email");

    let validator = match setup::matricule_validator(&state.db) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if !validator.validate(&matricule, Role::Student) {
        return err(
            &req.id,
            "bad_matricule",
            "matricule must be 8 digits followed by one letter",
            Some(json!({ "matricule": matricule })),
        );
    }

    let existing: Option<String> = match state
        .db
        .query_row(
            "SELECT id FROM candidates WHERE matricule = ?",
            [&matricule],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Some(existing_id) = existing {
        return err(
            &req.id,
            "duplicate",
            "a candidate with this matricule already exists",
            Some(json!({ "candidateId": existing_id })),
        );
    }

    let candidate_id = uuid::Uuid::new_v4().to_string();
    let now = Utc::now();
    let created_at = timestamp(now);
    let ids = &mut state.ids;
    let conn = &state.db;
    let anonymous_id = match insert_with_fresh_id(
        || ids.generate(&IdKind::Anonymous, now),
        |anon| {
            conn.execute(
                "INSERT INTO candidates(id, matricule, anonymous_id, name, email, created_at)
                 VALUES(?, ?, ?, ?, ?, ?)",
                (&candidate_id, &matricule, anon, &name, &email, &created_at),
            )
        },
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_insert_failed", e.to_string(), None),
    };

    tracing::info!(candidate = %candidate_id, anonymous_id = %anonymous_id, "candidate registered");
    ok(
        &req.id,
        json!({
            "candidateId": candidate_id,
            "anonymousId": anonymous_id,
            "matricule": matricule,
            "name": name,
            "email": email,
            "createdAt": created_at
        }),
    )
}

fn handle_candidates_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let mut stmt = match state.db.prepare(
        "SELECT c.id, c.matricule, c.anonymous_id, c.name, c.email, c.created_at,
                (SELECT COUNT(*) FROM submissions s WHERE s.candidate_id = c.id)
         FROM candidates c
         ORDER BY c.created_at, c.matricule",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            Ok(json!({
                "candidateId": row.get::<_, String>(0)?,
                "matricule": row.get::<_, String>(1)?,
                "anonymousId": row.get::<_, String>(2)?,
                "name": row.get::<_, String>(3)?,
                "email": row.get::<_, Option<String>>(4)?,
                "createdAt": row.get::<_, String>(5)?,
                "submissionCount": row.get::<_, i64>(6)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(candidates) => ok(&req.id, json!({ "candidates": candidates })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "candidates.create" => Some(handle_candidates_create(state, req)),
        "candidates.list" => Some(handle_candidates_list(state, req)),
        _ => None,
    }
}

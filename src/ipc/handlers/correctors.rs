use crate::ident::{CodeType, IdKind};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{insert_with_fresh_id, optional_str, required_str, timestamp};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

/// Active corrector row as other handlers need it.
pub struct CorrectorRef {
    pub id: String,
    pub subject: Option<String>,
}

pub fn find_active_corrector(
    conn: &Connection,
    corrector_id: &str,
) -> rusqlite::Result<Option<CorrectorRef>> {
    conn.query_row(
        "SELECT id, subject FROM correctors WHERE id = ? AND active = 1",
        [corrector_id],
        |r| {
            Ok(CorrectorRef {
                id: r.get(0)?,
                subject: r.get(1)?,
            })
        },
    )
    .optional()
}

fn handle_correctors_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let lastname = match required_str(req, "lastname") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let firstname = match required_str(req, "firstname") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let institution = match required_str(req, "institution") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let email = match required_str(req, "email") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if !email.contains('@') {
        return err(
            &req.id,
            "bad_params",
            "email must be an address",
            Some(json!({ "email": email })),
        );
    }
    let subject = optional_str(req, "subject");

    let corrector_id = uuid::Uuid::new_v4().to_string();
    let now = Utc::now();
    let created_at = timestamp(now);
    let kind = IdKind::Code {
        code_type: CodeType::Corrector,
        prefix: None,
    };
    let ids = &mut state.ids;
    let conn = &state.db;
    let access_code = match insert_with_fresh_id(
        || ids.generate(&kind, now),
        |code| {
            conn.execute(
                "INSERT INTO correctors(id, lastname, firstname, institution, email, subject, access_code, active, created_at)
                 VALUES(?, ?, ?, ?, ?, ?, ?, 1, ?)",
                (
                    &corrector_id,
                    &lastname,
                    &firstname,
                    &institution,
                    &email,
                    &subject,
                    code,
                    &created_at,
                ),
            )
        },
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_insert_failed", e.to_string(), None),
    };

    tracing::info!(corrector = %corrector_id, "corrector account created");
    ok(
        &req.id,
        json!({
            "correctorId": corrector_id,
            "lastname": lastname,
            "firstname": firstname,
            "institution": institution,
            "email": email,
            "subject": subject,
            "accessCode": access_code,
            "createdAt": created_at
        }),
    )
}

fn handle_correctors_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let include_inactive = req
        .params
        .get("includeInactive")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let mut stmt = match state.db.prepare(
        "SELECT k.id, k.lastname, k.firstname, k.institution, k.email, k.subject,
                k.access_code, k.active, k.created_at,
                (SELECT COUNT(*) FROM corrections c WHERE c.corrector_id = k.id AND c.finalized = 1)
         FROM correctors k
         WHERE k.active = 1 OR ?
         ORDER BY k.lastname, k.firstname",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([include_inactive], |row| {
            Ok(json!({
                "correctorId": row.get::<_, String>(0)?,
                "lastname": row.get::<_, String>(1)?,
                "firstname": row.get::<_, String>(2)?,
                "institution": row.get::<_, String>(3)?,
                "email": row.get::<_, String>(4)?,
                "subject": row.get::<_, Option<String>>(5)?,
                "accessCode": row.get::<_, String>(6)?,
                "active": row.get::<_, i64>(7)? != 0,
                "createdAt": row.get::<_, String>(8)?,
                "correctedCount": row.get::<_, i64>(9)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(correctors) => ok(&req.id, json!({ "correctors": correctors })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

/// Releases open claims, then removes the account. A corrector with finalized
/// corrections is deactivated instead so those corrections keep their author.
fn handle_correctors_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let corrector_id = match required_str(req, "correctorId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let exists: Option<i64> = match state
        .db
        .query_row(
            "SELECT 1 FROM correctors WHERE id = ?",
            [&corrector_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "corrector not found", None);
    }

    let tx = match state.db.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if let Err(e) = tx.execute(
        "DELETE FROM corrections WHERE corrector_id = ? AND finalized = 0",
        [&corrector_id],
    ) {
        return err(&req.id, "db_delete_failed", e.to_string(), None);
    }
    let released = match tx.execute(
        "UPDATE submissions SET status = 'pending', claimed_by = NULL, updated_at = ?
         WHERE claimed_by = ? AND status = 'in_progress'",
        (timestamp(Utc::now()), &corrector_id),
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    let finalized: i64 = match tx.query_row(
        "SELECT COUNT(*) FROM corrections WHERE corrector_id = ?",
        [&corrector_id],
        |r| r.get(0),
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let deactivated = finalized > 0;
    let result = if deactivated {
        tx.execute("UPDATE correctors SET active = 0 WHERE id = ?", [&corrector_id])
    } else {
        tx.execute("DELETE FROM correctors WHERE id = ?", [&corrector_id])
    };
    if let Err(e) = result {
        return err(&req.id, "db_delete_failed", e.to_string(), None);
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    tracing::info!(corrector = %corrector_id, released, deactivated, "corrector removed");
    ok(
        &req.id,
        json!({
            "ok": true,
            "deleted": !deactivated,
            "deactivated": deactivated,
            "releasedSubmissions": released
        }),
    )
}

fn handle_correctors_authenticate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let code = match required_str(req, "accessCode") {
        Ok(v) => v.to_ascii_uppercase(),
        Err(e) => return e,
    };
    let row = state
        .db
        .query_row(
            "SELECT id, lastname, firstname, subject FROM correctors
             WHERE access_code = ? AND active = 1",
            [&code],
            |r| {
                Ok(json!({
                    "correctorId": r.get::<_, String>(0)?,
                    "lastname": r.get::<_, String>(1)?,
                    "firstname": r.get::<_, String>(2)?,
                    "subject": r.get::<_, Option<String>>(3)?
                }))
            },
        )
        .optional();
    match row {
        Ok(Some(v)) => ok(&req.id, v),
        Ok(None) => {
            tracing::warn!("rejected corrector access code");
            err(&req.id, "not_found", "invalid access code", None)
        }
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "correctors.create" => Some(handle_correctors_create(state, req)),
        "correctors.list" => Some(handle_correctors_list(state, req)),
        "correctors.delete" => Some(handle_correctors_delete(state, req)),
        "correctors.authenticate" => Some(handle_correctors_authenticate(state, req)),
        _ => None,
    }
}

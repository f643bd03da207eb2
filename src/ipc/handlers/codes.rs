use crate::ident::{CodeType, IdKind, MAX_BATCH};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{insert_with_fresh_id, optional_str, parse_timestamp, required_str, timestamp};
use crate::ipc::types::{AppState, Request};
use crate::report::CodeRecord;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

pub fn list_codes(conn: &Connection, code_type: Option<&str>) -> rusqlite::Result<Vec<CodeRecord>> {
    let mut stmt = conn.prepare(
        "SELECT code, type_label, generated_at, used FROM generated_codes
         WHERE ? IS NULL OR code_type = ?
         ORDER BY generated_at, code",
    )?;
    let rows = stmt.query_map((code_type, code_type), |r| {
        let generated_at: String = r.get(2)?;
        Ok(CodeRecord {
            code: r.get(0)?,
            type_label: r.get(1)?,
            generated_at: parse_timestamp(&generated_at),
            used: r.get::<_, i64>(3)? != 0,
        })
    })?;
    rows.collect()
}

fn code_json(c: &CodeRecord) -> serde_json::Value {
    json!({
        "code": c.code,
        "type": c.type_label,
        "generatedAt": timestamp(c.generated_at),
        "used": c.used
    })
}

fn parse_code_type(req: &Request) -> Result<(String, CodeType), serde_json::Value> {
    let raw = required_str(req, "type")?;
    let code_type = CodeType::parse(&raw).ok_or_else(|| {
        err(
            &req.id,
            "bad_params",
            "type must be one of: candidate, session, corrector, exam, access",
            Some(json!({ "type": raw })),
        )
    })?;
    Ok((raw, code_type))
}

fn handle_codes_generate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (type_raw, code_type) = match parse_code_type(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let quantity = match req.params.get("quantity") {
        None | Some(serde_json::Value::Null) => 1,
        Some(v) => match v.as_u64().map(|n| n as usize) {
            Some(n) if (1..=MAX_BATCH).contains(&n) => n,
            _ => {
                return err(
                    &req.id,
                    "bad_params",
                    format!("quantity must be in 1..={}", MAX_BATCH),
                    None,
                )
            }
        },
    };
    let kind = IdKind::Code {
        code_type,
        prefix: optional_str(req, "prefix").map(|p| p.to_ascii_uppercase()),
    };

    let now = Utc::now();
    let generated_at = timestamp(now);
    let tx = match state.db.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    let ids = &mut state.ids;
    let mut codes = Vec::with_capacity(quantity);
    for _ in 0..quantity {
        let inserted = insert_with_fresh_id(
            || ids.generate(&kind, now),
            |code| {
                tx.execute(
                    "INSERT INTO generated_codes(code, code_type, type_label, generated_at, used)
                     VALUES(?, ?, ?, ?, 0)",
                    (code, &type_raw, code_type.label(), &generated_at),
                )
            },
        );
        match inserted {
            Ok(code) => codes.push(code),
            Err(e) => return err(&req.id, "db_insert_failed", e.to_string(), None),
        }
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    tracing::info!(code_type = %type_raw, quantity, "codes generated");
    ok(
        &req.id,
        json!({
            "type": type_raw,
            "typeLabel": code_type.label(),
            "generatedAt": generated_at,
            "codes": codes
        }),
    )
}

fn handle_codes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let code_type = match req.params.get("type") {
        None | Some(serde_json::Value::Null) => None,
        Some(_) => match parse_code_type(req) {
            Ok((raw, _)) => Some(raw),
            Err(e) => return e,
        },
    };
    match list_codes(&state.db, code_type.as_deref()) {
        Ok(codes) => ok(
            &req.id,
            json!({ "codes": codes.iter().map(code_json).collect::<Vec<_>>() }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_codes_mark_used(state: &mut AppState, req: &Request) -> serde_json::Value {
    let code = match required_str(req, "code") {
        Ok(v) => v.to_ascii_uppercase(),
        Err(e) => return e,
    };
    let was_used: Option<bool> = match state
        .db
        .query_row(
            "SELECT used FROM generated_codes WHERE code = ?",
            [&code],
            |r| r.get::<_, i64>(0),
        )
        .optional()
    {
        Ok(v) => v.map(|n| n != 0),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(was_used) = was_used else {
        return err(&req.id, "not_found", "code not found", None);
    };
    if was_used {
        tracing::warn!(code = %code, "code was already used");
    } else if let Err(e) = state
        .db
        .execute("UPDATE generated_codes SET used = 1 WHERE code = ?", [&code])
    {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(
        &req.id,
        json!({ "code": code, "used": true, "alreadyUsed": was_used }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "codes.generate" => Some(handle_codes_generate(state, req)),
        "codes.list" => Some(handle_codes_list(state, req)),
        "codes.markUsed" => Some(handle_codes_mark_used(state, req)),
        _ => None,
    }
}

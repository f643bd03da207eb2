use crate::calc::SCORE_SCALE;
use crate::ipc::error::{domain_err, err, ok};
use crate::ipc::helpers::{optional_bool, required_str, score_from_value, timestamp};
use crate::ipc::types::{AppState, Request};
use crate::report::CorrectionRecord;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};

use super::rules;
use super::submissions::{self, SubmissionStatus};

fn correction_json(row: &rusqlite::Row<'_>) -> rusqlite::Result<Value> {
    let criteria_raw: Option<String> = row.get(5)?;
    let criteria = criteria_raw
        .and_then(|s| serde_json::from_str::<Value>(&s).ok())
        .unwrap_or(Value::Null);
    Ok(json!({
        "submissionId": row.get::<_, String>(0)?,
        "anonymousId": row.get::<_, String>(1)?,
        "correctorId": row.get::<_, String>(2)?,
        "score": row.get::<_, f64>(3)?,
        "comments": row.get::<_, String>(4)?,
        "criteria": criteria,
        "finalized": row.get::<_, i64>(6)? != 0,
        "updatedAt": row.get::<_, String>(7)?
    }))
}

const CORRECTION_SELECT: &str = "SELECT k.submission_id, s.anonymous_id, k.corrector_id, k.score,
        k.comments, k.criteria_json, k.finalized, k.updated_at
 FROM corrections k
 JOIN submissions s ON s.id = k.submission_id";

/// Rows for the correction exports, keyed by anonymous id only.
pub fn correction_records(
    conn: &Connection,
    finalized_only: bool,
) -> rusqlite::Result<Vec<CorrectionRecord>> {
    let mut stmt = conn.prepare(
        "SELECT s.anonymous_id, k.score, k.comments, s.filename
         FROM corrections k
         JOIN submissions s ON s.id = k.submission_id
         WHERE k.finalized = 1 OR NOT ?
         ORDER BY s.upload_date, s.id",
    )?;
    let rows = stmt.query_map([finalized_only], |r| {
        Ok(CorrectionRecord {
            anonymous_id: r.get(0)?,
            score: r.get(1)?,
            comments: r.get(2)?,
            filename: r.get(3)?,
        })
    })?;
    rows.collect()
}

fn handle_corrections_save(state: &mut AppState, req: &Request) -> Value {
    let submission_id = match required_str(req, "submissionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let corrector_id = match required_str(req, "correctorId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let finalize = match optional_bool(req, "finalize") {
        Ok(v) => v.unwrap_or(false),
        Err(e) => return e,
    };
    let comments = req
        .params
        .get("comments")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let current = match submissions::load_state(&state.db, &submission_id) {
        Ok(Some(s)) => s,
        Ok(None) => return err(&req.id, "not_found", "submission not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    match current.status {
        SubmissionStatus::Corrected => {
            return err(
                &req.id,
                "correction_finalized",
                "correction is finalized and can no longer change",
                None,
            )
        }
        SubmissionStatus::Pending => {
            return err(
                &req.id,
                "bad_transition",
                "claim the submission before saving a correction",
                Some(json!({ "status": current.status.as_str() })),
            )
        }
        SubmissionStatus::InProgress => {}
    }
    if current.claimed_by.as_deref() != Some(corrector_id.as_str()) {
        return err(
            &req.id,
            "locked",
            "submission is claimed by another corrector",
            None,
        );
    }

    let criteria = req.params.get("criteria").filter(|v| !v.is_null());
    let (score, criteria_json, rubric_view) = if criteria.is_some() {
        let rubric = match rules::evaluate_rubric(criteria, req.params.get("adjustments")) {
            Ok(r) => r,
            Err(e) => return domain_err(&req.id, e),
        };
        if rubric.max_total() > SCORE_SCALE {
            return err(
                &req.id,
                "bad_score",
                format!("rubric maximum must not exceed {}", SCORE_SCALE),
                Some(json!({ "maxTotal": rubric.max_total() })),
            );
        }
        let stored = match serde_json::to_string(&rubric.criteria) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "bad_params", e.to_string(), None),
        };
        (rubric.total(), Some(stored), Some(rules::rubric_json(&rubric, &comments)))
    } else {
        let Some(raw) = req.params.get("score").filter(|v| !v.is_null()) else {
            return err(&req.id, "bad_params", "score or criteria is required", None);
        };
        let Some(score) = score_from_value(raw) else {
            return err(&req.id, "bad_score", "score must be a number", None);
        };
        if !(0.0..=SCORE_SCALE).contains(&score) {
            return err(
                &req.id,
                "bad_score",
                format!("score must be between 0 and {}", SCORE_SCALE),
                Some(json!({ "score": score })),
            );
        }
        (score, None, None)
    };

    let now = timestamp(Utc::now());
    let tx = match state.db.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    // A finalized row can only exist for a corrected submission, but the guard
    // keeps the upsert from rewriting one.
    let written = match tx.execute(
        "INSERT INTO corrections(submission_id, corrector_id, score, comments, criteria_json, finalized, updated_at)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(submission_id) DO UPDATE SET
           corrector_id = excluded.corrector_id,
           score = excluded.score,
           comments = excluded.comments,
           criteria_json = excluded.criteria_json,
           finalized = excluded.finalized,
           updated_at = excluded.updated_at
         WHERE corrections.finalized = 0",
        (
            &submission_id,
            &corrector_id,
            score,
            &comments,
            &criteria_json,
            finalize,
            &now,
        ),
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_insert_failed", e.to_string(), None),
    };
    if written == 0 {
        return err(
            &req.id,
            "correction_finalized",
            "correction is finalized and can no longer change",
            None,
        );
    }
    if finalize {
        if let Err(e) = tx.execute(
            "UPDATE submissions SET status = 'corrected', updated_at = ? WHERE id = ?",
            (&now, &submission_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    if finalize {
        tracing::info!(submission = %submission_id, corrector = %corrector_id, score, "correction finalized");
    } else {
        tracing::debug!(submission = %submission_id, score, "correction draft saved");
    }
    let status = if finalize {
        SubmissionStatus::Corrected
    } else {
        SubmissionStatus::InProgress
    };
    ok(
        &req.id,
        json!({
            "submissionId": submission_id,
            "score": score,
            "finalized": finalize,
            "status": status.as_str(),
            "rubric": rubric_view,
            "updatedAt": now
        }),
    )
}

fn handle_corrections_get(state: &mut AppState, req: &Request) -> Value {
    let submission_id = match required_str(req, "submissionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let sql = format!("{} WHERE k.submission_id = ?", CORRECTION_SELECT);
    match state
        .db
        .query_row(&sql, [&submission_id], correction_json)
        .optional()
    {
        Ok(Some(v)) => ok(&req.id, v),
        Ok(None) => err(&req.id, "not_found", "no correction for this submission", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_corrections_list(state: &mut AppState, req: &Request) -> Value {
    let finalized_only = match optional_bool(req, "finalizedOnly") {
        Ok(v) => v.unwrap_or(false),
        Err(e) => return e,
    };
    let sql = format!(
        "{} WHERE k.finalized = 1 OR NOT ? ORDER BY s.upload_date, s.id",
        CORRECTION_SELECT
    );
    let mut stmt = match state.db.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([finalized_only], correction_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(corrections) => ok(&req.id, json!({ "corrections": corrections })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "corrections.save" => Some(handle_corrections_save(state, req)),
        "corrections.get" => Some(handle_corrections_get(state, req)),
        "corrections.list" => Some(handle_corrections_list(state, req)),
        _ => None,
    }
}

use crate::calc::Progress;
use crate::ipc::error::{domain_err, err, ok};
use crate::ipc::helpers::{optional_str, required_str, timestamp};
use crate::ipc::types::{AppState, Request};
use crate::upload;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::path::PathBuf;

use super::{correctors, setup};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionStatus {
    Pending,
    InProgress,
    Corrected,
}

impl SubmissionStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "corrected" => Some(Self::Corrected),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Corrected => "corrected",
        }
    }
}

/// Lifecycle fields of one submission.
pub struct SubmissionState {
    pub status: SubmissionStatus,
    pub claimed_by: Option<String>,
}

pub fn load_state(conn: &Connection, submission_id: &str) -> anyhow::Result<Option<SubmissionState>> {
    let row: Option<(String, Option<String>)> = conn
        .query_row(
            "SELECT status, claimed_by FROM submissions WHERE id = ?",
            [submission_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let Some((status, claimed_by)) = row else {
        return Ok(None);
    };
    let status = SubmissionStatus::parse(&status)
        .ok_or_else(|| anyhow::anyhow!("unknown submission status {}", status))?;
    Ok(Some(SubmissionState { status, claimed_by }))
}

fn handle_submissions_upload(state: &mut AppState, req: &Request) -> serde_json::Value {
    let candidate_id = match required_str(req, "candidateId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let path = match required_str(req, "path") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e,
    };
    let subject = optional_str(req, "subject");

    let anonymous_id: Option<String> = match state
        .db
        .query_row(
            "SELECT anonymous_id FROM candidates WHERE id = ?",
            [&candidate_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(anonymous_id) = anonymous_id else {
        return err(&req.id, "not_found", "candidate not found", None);
    };

    let policy = match setup::upload_policy(&state.db) {
        Ok(p) => p,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let inspected = match upload::inspect_file(&path, &policy) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(path = %path.display(), code = %e.code, message = %e.message, "upload rejected");
            return domain_err(&req.id, e);
        }
    };

    let submission_id = uuid::Uuid::new_v4().to_string();
    let upload_date = timestamp(Utc::now());
    if let Err(e) = state.db.execute(
        "INSERT INTO submissions(id, candidate_id, anonymous_id, filename, kind, size_bytes, sha256, subject, status, upload_date)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, 'pending', ?)",
        (
            &submission_id,
            &candidate_id,
            &anonymous_id,
            &inspected.filename,
            inspected.kind.as_str(),
            inspected.size_bytes as i64,
            &inspected.sha256,
            &subject,
            &upload_date,
        ),
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    tracing::info!(
        submission = %submission_id,
        anonymous_id = %anonymous_id,
        kind = inspected.kind.as_str(),
        size = inspected.size_bytes,
        "submission uploaded"
    );
    ok(
        &req.id,
        json!({
            "submissionId": submission_id,
            "anonymousId": anonymous_id,
            "filename": inspected.filename,
            "kind": inspected.kind,
            "sizeBytes": inspected.size_bytes,
            "sha256": inspected.sha256,
            "zipEntries": inspected.zip_entries,
            "subject": subject,
            "status": SubmissionStatus::Pending.as_str(),
            "uploadDate": upload_date
        }),
    )
}

fn status_filter(req: &Request) -> Result<Option<SubmissionStatus>, serde_json::Value> {
    match optional_str(req, "status") {
        None => Ok(None),
        Some(s) => SubmissionStatus::parse(&s).map(Some).ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                "status must be one of: pending, in_progress, corrected",
                Some(json!({ "status": s })),
            )
        }),
    }
}

/// Administrative listing; the only one that joins candidate identity.
fn handle_submissions_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let status = match status_filter(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mut stmt = match state.db.prepare(
        "SELECT s.id, s.anonymous_id, s.filename, s.kind, s.size_bytes, s.sha256, s.subject,
                s.status, s.claimed_by, s.upload_date, c.id, c.matricule, c.name, k.score
         FROM submissions s
         JOIN candidates c ON c.id = s.candidate_id
         LEFT JOIN corrections k ON k.submission_id = s.id
         WHERE ? IS NULL OR s.status = ?
         ORDER BY s.upload_date, s.id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let status = status.map(SubmissionStatus::as_str);
    let rows = stmt
        .query_map((status, status), |row| {
            Ok(json!({
                "submissionId": row.get::<_, String>(0)?,
                "anonymousId": row.get::<_, String>(1)?,
                "filename": row.get::<_, String>(2)?,
                "kind": row.get::<_, String>(3)?,
                "sizeBytes": row.get::<_, i64>(4)?,
                "sha256": row.get::<_, String>(5)?,
                "subject": row.get::<_, Option<String>>(6)?,
                "status": row.get::<_, String>(7)?,
                "claimedBy": row.get::<_, Option<String>>(8)?,
                "uploadDate": row.get::<_, String>(9)?,
                "candidate": {
                    "candidateId": row.get::<_, String>(10)?,
                    "matricule": row.get::<_, String>(11)?,
                    "name": row.get::<_, String>(12)?
                },
                "score": row.get::<_, Option<f64>>(13)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(submissions) => ok(&req.id, json!({ "submissions": submissions })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

/// Corrector-facing listing. Never touches the candidates table.
fn handle_submissions_list_for_corrector(state: &mut AppState, req: &Request) -> serde_json::Value {
    let corrector = match optional_str(req, "correctorId") {
        None => None,
        Some(id) => match correctors::find_active_corrector(&state.db, &id) {
            Ok(Some(c)) => Some(c),
            Ok(None) => return err(&req.id, "not_found", "corrector not found", None),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        },
    };
    let corrector_id = corrector.as_ref().map(|c| c.id.as_str());
    let subject = corrector.as_ref().and_then(|c| c.subject.as_deref());

    let mut stmt = match state.db.prepare(
        "SELECT s.id, s.anonymous_id, s.filename, s.subject, s.upload_date, s.status,
                s.claimed_by, k.score, k.finalized
         FROM submissions s
         LEFT JOIN corrections k ON k.submission_id = s.id
         WHERE (?1 IS NULL OR s.subject IS NULL OR s.subject = ?1)
           AND (?2 IS NULL OR s.status <> 'in_progress' OR s.claimed_by = ?2)
         ORDER BY s.upload_date, s.id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map((subject, corrector_id), |row| {
            let claimed_by: Option<String> = row.get(6)?;
            let mine = corrector_id.is_some() && claimed_by.as_deref() == corrector_id;
            Ok(json!({
                "submissionId": row.get::<_, String>(0)?,
                "anonymousId": row.get::<_, String>(1)?,
                "filename": row.get::<_, String>(2)?,
                "subject": row.get::<_, Option<String>>(3)?,
                "uploadDate": row.get::<_, String>(4)?,
                "status": row.get::<_, String>(5)?,
                "claimedByMe": mine,
                "score": row.get::<_, Option<f64>>(7)?,
                "finalized": row.get::<_, Option<i64>>(8)?.unwrap_or(0) != 0
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(submissions) => ok(&req.id, json!({ "submissions": submissions })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn claim_params(req: &Request) -> Result<(String, String), serde_json::Value> {
    Ok((
        required_str(req, "submissionId")?,
        required_str(req, "correctorId")?,
    ))
}

fn handle_submissions_claim(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (submission_id, corrector_id) = match claim_params(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    match correctors::find_active_corrector(&state.db, &corrector_id) {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "corrector not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }
    let current = match load_state(&state.db, &submission_id) {
        Ok(Some(s)) => s,
        Ok(None) => return err(&req.id, "not_found", "submission not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    match current.status {
        SubmissionStatus::Corrected => {
            return err(
                &req.id,
                "bad_transition",
                "submission is already corrected",
                Some(json!({ "status": current.status.as_str() })),
            )
        }
        SubmissionStatus::InProgress => {
            if current.claimed_by.as_deref() == Some(corrector_id.as_str()) {
                return ok(
                    &req.id,
                    json!({ "submissionId": submission_id, "status": current.status.as_str() }),
                );
            }
            tracing::warn!(submission = %submission_id, corrector = %corrector_id, "claim refused, submission locked");
            return err(
                &req.id,
                "locked",
                "submission is being corrected by another corrector",
                None,
            );
        }
        SubmissionStatus::Pending => {}
    }

    // The status guard makes the claim a compare-and-set.
    let changed = match state.db.execute(
        "UPDATE submissions SET status = 'in_progress', claimed_by = ?, updated_at = ?
         WHERE id = ? AND status = 'pending'",
        (&corrector_id, timestamp(Utc::now()), &submission_id),
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    if changed == 0 {
        return err(&req.id, "locked", "submission was claimed concurrently", None);
    }
    tracing::info!(submission = %submission_id, corrector = %corrector_id, "submission claimed");
    ok(
        &req.id,
        json!({
            "submissionId": submission_id,
            "status": SubmissionStatus::InProgress.as_str()
        }),
    )
}

fn handle_submissions_release(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (submission_id, corrector_id) = match claim_params(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let current = match load_state(&state.db, &submission_id) {
        Ok(Some(s)) => s,
        Ok(None) => return err(&req.id, "not_found", "submission not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if current.status != SubmissionStatus::InProgress {
        return err(
            &req.id,
            "bad_transition",
            format!("cannot release a {} submission", current.status.as_str()),
            Some(json!({ "status": current.status.as_str() })),
        );
    }
    if current.claimed_by.as_deref() != Some(corrector_id.as_str()) {
        return err(
            &req.id,
            "locked",
            "only the claiming corrector may release",
            None,
        );
    }

    let tx = match state.db.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if let Err(e) = tx.execute(
        "DELETE FROM corrections WHERE submission_id = ? AND finalized = 0",
        [&submission_id],
    ) {
        return err(&req.id, "db_delete_failed", e.to_string(), None);
    }
    if let Err(e) = tx.execute(
        "UPDATE submissions SET status = 'pending', claimed_by = NULL, updated_at = ?
         WHERE id = ?",
        (timestamp(Utc::now()), &submission_id),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }
    tracing::info!(submission = %submission_id, corrector = %corrector_id, "submission released");
    ok(
        &req.id,
        json!({
            "submissionId": submission_id,
            "status": SubmissionStatus::Pending.as_str()
        }),
    )
}

pub fn progress(conn: &Connection) -> rusqlite::Result<Progress> {
    let mut p = Progress::default();
    let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM submissions GROUP BY status")?;
    let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?;
    for row in rows {
        let (status, n) = row?;
        let n = n.max(0) as usize;
        match SubmissionStatus::parse(&status) {
            Some(SubmissionStatus::Pending) => p.pending += n,
            Some(SubmissionStatus::InProgress) => p.in_progress += n,
            Some(SubmissionStatus::Corrected) => p.corrected += n,
            None => {}
        }
        p.total += n;
    }
    Ok(p)
}

fn handle_submissions_progress(state: &mut AppState, req: &Request) -> serde_json::Value {
    match progress(&state.db) {
        Ok(p) => ok(
            &req.id,
            json!({
                "pending": p.pending,
                "inProgress": p.in_progress,
                "corrected": p.corrected,
                "total": p.total,
                "percentCorrected": p.percent_corrected()
            }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "submissions.upload" => Some(handle_submissions_upload(state, req)),
        "submissions.list" => Some(handle_submissions_list(state, req)),
        "submissions.listForCorrector" => Some(handle_submissions_list_for_corrector(state, req)),
        "submissions.claim" => Some(handle_submissions_claim(state, req)),
        "submissions.release" => Some(handle_submissions_release(state, req)),
        "submissions.progress" => Some(handle_submissions_progress(state, req)),
        _ => None,
    }
}

use crate::calc::{self, SCORE_SCALE};
use crate::ident::IdKind;
use crate::ipc::error::{domain_err, err, ok};
use crate::ipc::helpers::{
    insert_with_fresh_id, optional_str, parse_timestamp, required_str, timestamp,
};
use crate::ipc::types::{AppState, Request};
use crate::matricule::Role;
use crate::report::{ExamResultRecord, ResultSheet, SubjectScore};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

use super::{rules, setup};

/// Stored result plus the columns only the per-student sheet needs.
pub struct StoredResult {
    pub id: String,
    pub record: ExamResultRecord,
    pub student_lastname: String,
    pub student_firstname: String,
    pub passed: bool,
}

impl StoredResult {
    pub fn sheet(&self) -> ResultSheet {
        ResultSheet {
            lastname: self.student_lastname.clone(),
            firstname: self.student_firstname.clone(),
            matricule: self.record.matricule.clone(),
            scores: self.record.scores.clone(),
            average: self.record.average,
            status: self.record.status.clone(),
            passed: self.passed,
        }
    }
}

const RESULT_SELECT: &str = "SELECT id, copy_id, matricule, centre, professor_firstname,
        professor_lastname, institution, student_lastname, student_firstname,
        scores_json, average, mention, status, passed, recorded_at
 FROM exam_results";

fn stored_result(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredResult> {
    let scores_json: String = row.get(9)?;
    let scores: Vec<SubjectScore> = serde_json::from_str(&scores_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(9, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let recorded_at: String = row.get(14)?;
    Ok(StoredResult {
        id: row.get(0)?,
        record: ExamResultRecord {
            copy_id: row.get(1)?,
            matricule: row.get(2)?,
            centre: row.get(3)?,
            professor_firstname: row.get(4)?,
            professor_lastname: row.get(5)?,
            institution: row.get(6)?,
            scores,
            average: row.get(10)?,
            mention: row.get(11)?,
            status: row.get(12)?,
            recorded_at: parse_timestamp(&recorded_at),
        },
        student_lastname: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
        student_firstname: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
        passed: row.get::<_, i64>(13)? != 0,
    })
}

pub fn list_results(conn: &Connection, matricule: Option<&str>) -> rusqlite::Result<Vec<StoredResult>> {
    let sql = format!(
        "{} WHERE ? IS NULL OR matricule = ? ORDER BY recorded_at, copy_id",
        RESULT_SELECT
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map((matricule, matricule), stored_result)?;
    rows.collect()
}

pub fn get_result(conn: &Connection, result_id: &str) -> rusqlite::Result<Option<StoredResult>> {
    let sql = format!("{} WHERE id = ? OR copy_id = ?", RESULT_SELECT);
    conn.query_row(&sql, [result_id, result_id], stored_result)
        .optional()
}

fn result_json(r: &StoredResult) -> serde_json::Value {
    json!({
        "resultId": r.id,
        "copyId": r.record.copy_id,
        "matricule": r.record.matricule,
        "centre": r.record.centre,
        "professorFirstname": r.record.professor_firstname,
        "professorLastname": r.record.professor_lastname,
        "institution": r.record.institution,
        "studentLastname": r.student_lastname,
        "studentFirstname": r.student_firstname,
        "scores": r.record.scores,
        "average": r.record.average,
        "roundedAverage": calc::round_off_2_decimals(r.record.average),
        "mention": r.record.mention,
        "status": r.record.status,
        "passed": r.passed,
        "recordedAt": timestamp(r.record.recorded_at)
    })
}

fn handle_results_record(state: &mut AppState, req: &Request) -> serde_json::Value {
    let matricule = match required_str(req, "matricule") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let centre = match required_str(req, "centre") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let professor_firstname = match required_str(req, "professorFirstname") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let professor_lastname = match required_str(req, "professorLastname") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let institution = match required_str(req, "institution") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_lastname = optional_str(req, "studentLastname");
    let student_firstname = optional_str(req, "studentFirstname");

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

    let scores = match rules::parse_subject_scores(req.params.get("scores")) {
        Ok(v) => v,
        Err(e) => return domain_err(&req.id, e),
    };
    if scores.is_empty() {
        return err(
            &req.id,
            "no_scores",
            "at least one subject score is required",
            None,
        );
    }
    // Entry form: reject instead of clamping.
    if let Some((subject, score)) = scores
        .iter()
        .find(|(_, s)| !(0.0..=SCORE_SCALE).contains(s))
    {
        return err(
            &req.id,
            "bad_score",
            format!("score for {} must be between 0 and {}", subject, SCORE_SCALE),
            Some(json!({ "subject": subject, "score": score })),
        );
    }

    let policy = match rules::policy_param(state, req) {
        Ok(p) => p,
        Err(e) => return e,
    };
    let agg = match calc::aggregate(scores.iter().map(|(s, v)| (s.as_str(), *v)), policy) {
        Ok(a) => a,
        Err(e) => return domain_err(&req.id, e),
    };
    let subject_scores: Vec<SubjectScore> = scores
        .iter()
        .map(|(subject, score)| SubjectScore {
            subject: subject.clone(),
            score: *score,
        })
        .collect();
    let scores_json = match serde_json::to_string(&subject_scores) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "bad_params", e.to_string(), None),
    };

    let result_id = uuid::Uuid::new_v4().to_string();
    let now = Utc::now();
    let recorded_at = timestamp(now);
    let ids = &mut state.ids;
    let conn = &state.db;
    let copy_id = match insert_with_fresh_id(
        || ids.generate(&IdKind::Copy, now),
        |copy_id| {
            conn.execute(
                "INSERT INTO exam_results(id, copy_id, matricule, centre, professor_firstname,
                    professor_lastname, institution, student_lastname, student_firstname,
                    scores_json, average, mention, status, passed, policy, recorded_at)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                (
                    &result_id,
                    copy_id,
                    &matricule,
                    &centre,
                    &professor_firstname,
                    &professor_lastname,
                    &institution,
                    &student_lastname,
                    &student_firstname,
                    &scores_json,
                    agg.average,
                    agg.mention.label(),
                    agg.status.label(),
                    agg.status.passed,
                    policy.as_str(),
                    &recorded_at,
                ),
            )
        },
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_insert_failed", e.to_string(), None),
    };

    tracing::info!(copy_id = %copy_id, policy = policy.as_str(), passed = agg.status.passed, "exam result recorded");
    ok(
        &req.id,
        json!({
            "resultId": result_id,
            "copyId": copy_id,
            "average": agg.average,
            "roundedAverage": calc::round_off_2_decimals(agg.average),
            "mention": agg.mention,
            "status": agg.status,
            "passed": agg.status.passed,
            "policy": policy.as_str(),
            "recordedAt": recorded_at
        }),
    )
}

fn handle_results_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let matricule = optional_str(req, "matricule");
    match list_results(&state.db, matricule.as_deref()) {
        Ok(rows) => ok(
            &req.id,
            json!({ "results": rows.iter().map(result_json).collect::<Vec<_>>() }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "results.record" => Some(handle_results_record(state, req)),
        "results.list" => Some(handle_results_list(state, req)),
        _ => None,
    }
}

use crate::calc::{self, PassPolicy};
use crate::error::DomainError;
use crate::ident::IdKind;
use crate::ipc::error::{domain_err, err, ok};
use crate::ipc::helpers::{optional_str, required_str, score_from_value};
use crate::ipc::types::{AppState, Request};
use crate::matricule::Role;
use crate::rubric::{Adjustment, Criterion, Rubric};
use chrono::Utc;
use serde_json::{json, Value};

use super::setup;

/// Reads `{subject: score}` or `[{subject, score}]` into ordered pairs.
/// Subjects must be non-empty and appear once.
pub fn parse_subject_scores(raw: Option<&Value>) -> Result<Vec<(String, f64)>, DomainError> {
    let mut out: Vec<(String, f64)> = Vec::new();
    match raw {
        Some(Value::Object(map)) => {
            for (subject, v) in map {
                let subject = subject.trim();
                if subject.is_empty() {
                    return Err(DomainError::new("bad_params", "each score needs a subject"));
                }
                push_subject(&mut out, subject, subject_score(subject, v)?)?;
            }
        }
        Some(Value::Array(items)) => {
            for (i, item) in items.iter().enumerate() {
                let subject = item
                    .get("subject")
                    .and_then(|s| s.as_str())
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| {
                        DomainError::new("bad_params", "each score needs a subject")
                            .with_details(json!({ "index": i }))
                    })?;
                let v = item.get("score").unwrap_or(&Value::Null);
                push_subject(&mut out, subject, subject_score(subject, v)?)?;
            }
        }
        None | Some(Value::Null) => {}
        Some(_) => {
            return Err(DomainError::new(
                "bad_params",
                "scores must be an object or an array",
            ))
        }
    }
    Ok(out)
}

fn push_subject(out: &mut Vec<(String, f64)>, subject: &str, score: f64) -> Result<(), DomainError> {
    if out.iter().any(|(s, _)| s.eq_ignore_ascii_case(subject)) {
        return Err(
            DomainError::new("bad_params", format!("subject {} is listed twice", subject))
                .with_details(json!({ "subject": subject })),
        );
    }
    out.push((subject.to_string(), score));
    Ok(())
}

fn subject_score(subject: &str, v: &Value) -> Result<f64, DomainError> {
    score_from_value(v).ok_or_else(|| {
        DomainError::new("bad_score", format!("score for {} must be a number", subject))
            .with_details(json!({ "subject": subject }))
    })
}

pub fn policy_param(state: &AppState, req: &Request) -> Result<PassPolicy, Value> {
    match optional_str(req, "policy") {
        Some(raw) => PassPolicy::parse(&raw).ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                "policy must be one of: admission12, pass10",
                Some(json!({ "policy": raw })),
            )
        }),
        None => setup::grading_settings(&state.db)
            .map(|g| g.pass_policy)
            .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None)),
    }
}

/// Builds a rubric from `criteria` (default grid when absent) and applies
/// `adjustments` in order.
pub fn evaluate_rubric(
    criteria: Option<&Value>,
    adjustments: Option<&Value>,
) -> Result<Rubric, DomainError> {
    let mut rubric = match criteria {
        None | Some(Value::Null) => Rubric::default(),
        Some(v) => {
            let parsed: Vec<Criterion> = serde_json::from_value(v.clone()).map_err(|e| {
                DomainError::new("bad_params", format!("invalid criteria: {}", e))
            })?;
            Rubric::from_criteria(parsed)?
        }
    };

    let Some(adjustments) = adjustments.filter(|v| !v.is_null()) else {
        return Ok(rubric);
    };
    let Some(items) = adjustments.as_array() else {
        return Err(DomainError::new("bad_params", "adjustments must be an array"));
    };
    for (i, adj) in items.iter().enumerate() {
        let Some(name) = adj.get("criterion").and_then(|v| v.as_str()) else {
            return Err(DomainError::new("bad_params", "adjustment needs a criterion")
                .with_details(json!({ "index": i })));
        };
        let op = adj.get("op").and_then(|v| v.as_str()).unwrap_or("");
        if op == "set" {
            let Some(score) = adj.get("score").and_then(score_from_value) else {
                return Err(DomainError::new("bad_score", "set needs a numeric score")
                    .with_details(json!({ "index": i })));
            };
            rubric.set_score(name, score)?;
            continue;
        }
        match Adjustment::parse(op) {
            Some(Adjustment::Increment) => rubric.increment(name)?,
            Some(Adjustment::Decrement) => rubric.decrement(name)?,
            None => {
                return Err(DomainError::new(
                    "bad_params",
                    "op must be one of: increment, decrement, set",
                )
                .with_details(json!({ "index": i, "op": op })))
            }
        }
    }
    Ok(rubric)
}

pub fn rubric_json(rubric: &Rubric, global_comments: &str) -> Value {
    json!({
        "criteria": rubric.criteria,
        "total": rubric.total(),
        "maxTotal": rubric.max_total(),
        "percentage": calc::round_off_2_decimals(rubric.percentage()),
        "combinedComments": rubric.combined_comments(global_comments)
    })
}

fn handle_ids_generate(state: &mut AppState, req: &Request) -> Value {
    let kind_raw = match required_str(req, "kind") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let prefix = optional_str(req, "prefix");
    let Some(kind) = IdKind::parse(&kind_raw, prefix.as_deref()) else {
        return err(
            &req.id,
            "bad_params",
            format!("unknown id kind: {}", kind_raw),
            None,
        );
    };
    let quantity = match req.params.get("quantity") {
        None | Some(Value::Null) => 1,
        Some(v) => match v.as_u64() {
            Some(n) => n as usize,
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    "quantity must be a positive integer",
                    None,
                )
            }
        },
    };
    match state.ids.generate_batch(&kind, quantity, Utc::now()) {
        Ok(ids) => ok(&req.id, json!({ "kind": kind_raw, "ids": ids })),
        Err(e) => domain_err(&req.id, e),
    }
}

fn handle_matricule_validate(state: &mut AppState, req: &Request) -> Value {
    let value = req
        .params
        .get("value")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let role_raw = match required_str(req, "role") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(role) = Role::parse(&role_raw) else {
        return err(
            &req.id,
            "bad_params",
            "role must be one of: student, corrector, service, admin",
            Some(json!({ "role": role_raw })),
        );
    };
    let validator = match setup::matricule_validator(&state.db) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(
        &req.id,
        json!({ "valid": validator.validate(value, role), "role": role.as_str() }),
    )
}

fn handle_grading_aggregate(state: &mut AppState, req: &Request) -> Value {
    let scores = match parse_subject_scores(req.params.get("scores")) {
        Ok(v) => v,
        Err(e) => return domain_err(&req.id, e),
    };
    let policy = match policy_param(state, req) {
        Ok(p) => p,
        Err(e) => return e,
    };
    match calc::aggregate(scores.iter().map(|(s, v)| (s.as_str(), *v)), policy) {
        Ok(agg) => ok(
            &req.id,
            json!({
                "average": agg.average,
                "roundedAverage": calc::round_off_2_decimals(agg.average),
                "mention": agg.mention,
                "status": agg.status,
                "passed": agg.status.passed,
                "policy": policy.as_str(),
                "subjectCount": agg.subject_count,
                "clampedCount": agg.clamped_count
            }),
        ),
        Err(e) => domain_err(&req.id, e),
    }
}

fn handle_rubric_evaluate(_state: &mut AppState, req: &Request) -> Value {
    let rubric = match evaluate_rubric(req.params.get("criteria"), req.params.get("adjustments")) {
        Ok(r) => r,
        Err(e) => return domain_err(&req.id, e),
    };
    let comments = req
        .params
        .get("comments")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    ok(&req.id, rubric_json(&rubric, comments))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "ids.generate" => Some(handle_ids_generate(state, req)),
        "matricule.validate" => Some(handle_matricule_validate(state, req)),
        "grading.aggregate" => Some(handle_grading_aggregate(state, req)),
        "rubric.evaluate" => Some(handle_rubric_evaluate(state, req)),
        _ => None,
    }
}

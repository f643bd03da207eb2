use crate::calc::{PassPolicy, DEFAULT_REPORT_PASS_THRESHOLD, SCORE_SCALE};
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::matricule::{self, MatriculeValidator, DEFAULT_CORRECTOR_PATTERN};
use crate::upload::{UploadPolicy, BYTES_PER_MB, DEFAULT_MAX_SIZE_MB};
use serde_json::{json, Map, Value};
use std::path::PathBuf;

const MAX_UPLOAD_MB: i64 = 50;

#[derive(Clone, Copy)]
enum SetupSection {
    Grading,
    Uploads,
    Validation,
    Reports,
}

impl SetupSection {
    const ALL: [SetupSection; 4] = [
        SetupSection::Grading,
        SetupSection::Uploads,
        SetupSection::Validation,
        SetupSection::Reports,
    ];

    fn parse(s: &str) -> Option<Self> {
        match s {
            "grading" => Some(Self::Grading),
            "uploads" => Some(Self::Uploads),
            "validation" => Some(Self::Validation),
            "reports" => Some(Self::Reports),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Grading => "grading",
            Self::Uploads => "uploads",
            Self::Validation => "validation",
            Self::Reports => "reports",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Grading => "setup.grading",
            Self::Uploads => "setup.uploads",
            Self::Validation => "setup.validation",
            Self::Reports => "setup.reports",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Grading => json!({
            "passPolicy": PassPolicy::Admission12.as_str(),
            "reportPassThreshold": DEFAULT_REPORT_PASS_THRESHOLD
        }),
        SetupSection::Uploads => json!({
            "maxSizeMb": DEFAULT_MAX_SIZE_MB,
            "acceptZip": true
        }),
        SetupSection::Validation => json!({
            "correctorPattern": DEFAULT_CORRECTOR_PATTERN
        }),
        SetupSection::Reports => json!({
            "showGeneratedAt": true,
            "pdfFontDir": null,
            "pdfFontFamily": "LiberationSans"
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool()
        .ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_f64_range(v: &Value, key: &str, min: f64, max: f64) -> Result<f64, String> {
    let n = v
        .as_f64()
        .ok_or_else(|| format!("{} must be a number", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.len() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn parse_nullable_string_max(v: &Value, key: &str, max_len: usize) -> Result<Value, String> {
    if v.is_null() {
        return Ok(Value::Null);
    }
    let s = parse_string_max(v, key, max_len)?;
    if s.is_empty() {
        return Ok(Value::Null);
    }
    Ok(Value::String(s))
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::Grading => match k.as_str() {
                "passPolicy" => {
                    let s = parse_string_max(v, k, 24)?;
                    let Some(policy) = PassPolicy::parse(&s) else {
                        return Err("passPolicy must be one of: admission12, pass10".into());
                    };
                    obj.insert(k.clone(), Value::String(policy.as_str().to_string()));
                }
                "reportPassThreshold" => {
                    obj.insert(k.clone(), json!(parse_f64_range(v, k, 0.0, SCORE_SCALE)?));
                }
                _ => return Err(format!("unknown grading field: {}", k)),
            },
            SetupSection::Uploads => match k.as_str() {
                "maxSizeMb" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, MAX_UPLOAD_MB)?));
                }
                "acceptZip" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown uploads field: {}", k)),
            },
            SetupSection::Validation => match k.as_str() {
                "correctorPattern" => {
                    let s = parse_string_max(v, k, 200)?;
                    matricule::compile_corrector_pattern(&s)?;
                    obj.insert(k.clone(), Value::String(s));
                }
                _ => return Err(format!("unknown validation field: {}", k)),
            },
            SetupSection::Reports => match k.as_str() {
                "showGeneratedAt" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                "pdfFontDir" => {
                    obj.insert(k.clone(), parse_nullable_string_max(v, k, 1024)?);
                }
                "pdfFontFamily" => {
                    let s = parse_string_max(v, k, 120)?;
                    if s.is_empty() {
                        return Err("pdfFontFamily must not be empty".into());
                    }
                    obj.insert(k.clone(), Value::String(s));
                }
                _ => return Err(format!("unknown reports field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(
    conn: &rusqlite::Connection,
    section: SetupSection,
) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Best-effort apply: a malformed stored value falls back to the default.
            if let Err(e) = merge_section_patch(section, &mut current, saved_obj) {
                tracing::warn!(section = section.name(), error = %e, "ignoring stored setup value");
                current = default_section(section);
            }
        }
    }
    Ok(current)
}

/// Grading settings as the rule modules consume them.
#[derive(Debug, Clone, Copy)]
pub struct GradingSettings {
    pub pass_policy: PassPolicy,
    pub report_pass_threshold: f64,
}

pub fn grading_settings(conn: &rusqlite::Connection) -> anyhow::Result<GradingSettings> {
    let v = load_section(conn, SetupSection::Grading)?;
    Ok(GradingSettings {
        pass_policy: v
            .get("passPolicy")
            .and_then(|p| p.as_str())
            .and_then(PassPolicy::parse)
            .unwrap_or(PassPolicy::Admission12),
        report_pass_threshold: v
            .get("reportPassThreshold")
            .and_then(|t| t.as_f64())
            .unwrap_or(DEFAULT_REPORT_PASS_THRESHOLD),
    })
}

pub fn upload_policy(conn: &rusqlite::Connection) -> anyhow::Result<UploadPolicy> {
    let v = load_section(conn, SetupSection::Uploads)?;
    let max_mb = v
        .get("maxSizeMb")
        .and_then(|n| n.as_u64())
        .unwrap_or(DEFAULT_MAX_SIZE_MB);
    Ok(UploadPolicy {
        max_size_bytes: max_mb * BYTES_PER_MB,
        accept_zip: v.get("acceptZip").and_then(|b| b.as_bool()).unwrap_or(true),
    })
}

pub fn matricule_validator(conn: &rusqlite::Connection) -> anyhow::Result<MatriculeValidator> {
    let v = load_section(conn, SetupSection::Validation)?;
    let pattern = v
        .get("correctorPattern")
        .and_then(|p| p.as_str())
        .unwrap_or(DEFAULT_CORRECTOR_PATTERN);
    MatriculeValidator::with_corrector_pattern(pattern).map_err(anyhow::Error::msg)
}

#[derive(Debug, Clone)]
pub struct ReportSettings {
    pub show_generated_at: bool,
    pub pdf_font_dir: Option<PathBuf>,
    pub pdf_font_family: Option<String>,
}

pub fn report_settings(conn: &rusqlite::Connection) -> anyhow::Result<ReportSettings> {
    let v = load_section(conn, SetupSection::Reports)?;
    Ok(ReportSettings {
        show_generated_at: v
            .get("showGeneratedAt")
            .and_then(|b| b.as_bool())
            .unwrap_or(true),
        pdf_font_dir: v
            .get("pdfFontDir")
            .and_then(|d| d.as_str())
            .map(PathBuf::from),
        pdf_font_family: v
            .get("pdfFontFamily")
            .and_then(|f| f.as_str())
            .map(str::to_string),
    })
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let mut out = Map::new();
    for section in SetupSection::ALL {
        let v = match load_section(&state.db, section) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        out.insert(section.name().to_string(), v);
    }
    ok(&req.id, Value::Object(out))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(
            &req.id,
            "bad_params",
            "unknown section",
            Some(json!({ "section": section_raw })),
        );
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(&state.db, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(&state.db, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    tracing::info!(section = section.name(), "setup updated");
    ok(&req.id, json!({ "ok": true, section.name(): current }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}

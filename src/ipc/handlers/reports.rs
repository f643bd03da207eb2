use crate::bundle::{self, BundleEntry};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{optional_bool, optional_str, required_str, timestamp};
use crate::ipc::types::{AppState, Request};
use crate::render;
use crate::report::{self, CodeRecord};
use chrono::Utc;
use serde_json::json;
use std::path::{Path, PathBuf};

use super::{codes, corrections, results, setup};

/// Relative paths resolve against the open workspace.
fn resolve_path(state: &AppState, req: &Request, raw: &str) -> Result<PathBuf, serde_json::Value> {
    let p = PathBuf::from(raw);
    if p.is_absolute() {
        return Ok(p);
    }
    match &state.workspace {
        Some(ws) => Ok(ws.join(p)),
        None => Err(err(
            &req.id,
            "no_workspace",
            "relative paths need a selected workspace",
            Some(json!({ "path": raw })),
        )),
    }
}

fn optional_out_path(state: &AppState, req: &Request) -> Result<Option<PathBuf>, serde_json::Value> {
    match optional_str(req, "outPath") {
        None => Ok(None),
        Some(raw) => resolve_path(state, req, &raw).map(Some),
    }
}

fn write_text(path: &Path, content: &str) -> anyhow::Result<()> {
    use anyhow::Context;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
        }
    }
    std::fs::write(path, content)
        .with_context(|| format!("failed to write {}", path.to_string_lossy()))
}

/// Answers with the text and, when `outPath` is given, also writes it there.
fn text_report(
    state: &AppState,
    req: &Request,
    filename: String,
    content: String,
    count: usize,
) -> serde_json::Value {
    let out_path = match optional_out_path(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Some(path) = &out_path {
        if let Err(e) = write_text(path, &content) {
            return err(&req.id, "io_failed", format!("{e:#}"), None);
        }
        tracing::info!(path = %path.display(), "report written");
    }
    ok(
        &req.id,
        json!({
            "filename": filename,
            "content": content,
            "count": count,
            "path": out_path.map(|p| p.to_string_lossy().to_string())
        }),
    )
}

fn finalized_only(req: &Request) -> Result<bool, serde_json::Value> {
    optional_bool(req, "finalizedOnly").map(|v| v.unwrap_or(true))
}

fn handle_corrections_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    let finalized_only = match finalized_only(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let records = match corrections::correction_records(&state.db, finalized_only) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let now = Utc::now();
    text_report(
        state,
        req,
        report::corrections_csv_filename(now),
        report::corrections_to_csv(&records),
        records.len(),
    )
}

fn handle_detailed(state: &mut AppState, req: &Request) -> serde_json::Value {
    let finalized_only = match finalized_only(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let records = match corrections::correction_records(&state.db, finalized_only) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let grading = match setup::grading_settings(&state.db) {
        Ok(g) => g,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let now = Utc::now();
    text_report(
        state,
        req,
        report::detailed_report_filename(now),
        report::corrections_detailed_report(&records, now, grading.report_pass_threshold),
        records.len(),
    )
}

fn handle_results_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    let matricule = optional_str(req, "matricule");
    let rows = match results::list_results(&state.db, matricule.as_deref()) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let records: Vec<_> = rows.into_iter().map(|r| r.record).collect();
    let now = Utc::now();
    text_report(
        state,
        req,
        report::results_csv_filename(now),
        report::results_to_csv(&records),
        records.len(),
    )
}

fn handle_result_sheet(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result_id = match required_str(req, "resultId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let stored = match results::get_result(&state.db, &result_id) {
        Ok(Some(r)) => r,
        Ok(None) => return err(&req.id, "not_found", "result not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let sheet = stored.sheet();
    text_report(
        state,
        req,
        report::result_sheet_filename(&sheet),
        report::result_sheet_text(&sheet, Utc::now()),
        1,
    )
}

fn handle_codes_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    let all = match codes::list_codes(&state.db, None) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let selected: Vec<CodeRecord> = match req.params.get("codes").and_then(|v| v.as_array()) {
        Some(wanted) => {
            let wanted: Vec<String> = wanted
                .iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.trim().to_ascii_uppercase())
                .collect();
            all.into_iter()
                .filter(|c| wanted.iter().any(|w| w == &c.code))
                .collect()
        }
        None => all,
    };
    let now = Utc::now();
    text_report(
        state,
        req,
        report::codes_csv_filename(now),
        report::codes_to_csv(&selected),
        selected.len(),
    )
}

fn handle_export_pdf(state: &mut AppState, req: &Request) -> serde_json::Value {
    let out_raw = match required_str(req, "outPath") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let out_path = match resolve_path(state, req, &out_raw) {
        Ok(p) => p,
        Err(e) => return e,
    };
    let format = optional_str(req, "format").unwrap_or_else(|| "pdf".to_string());
    let settings = match setup::report_settings(&state.db) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(renderer) = render::renderer_for(
        &format,
        settings.pdf_font_dir.clone(),
        settings.pdf_font_family.clone(),
    ) else {
        return err(
            &req.id,
            "bad_params",
            "format must be one of: pdf, text",
            Some(json!({ "format": format })),
        );
    };

    let rows = match results::list_results(&state.db, None) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let records: Vec<_> = rows.into_iter().map(|r| r.record).collect();
    let now = Utc::now();
    let mut doc = report::results_document(&records, now);
    if !settings.show_generated_at {
        doc.header_lines.retain(|l| !l.starts_with("Généré le"));
    }

    if let Err(e) = renderer.render(&doc, &out_path) {
        tracing::warn!(path = %out_path.display(), error = %e, "render failed");
        return err(&req.id, "render_failed", format!("{e:#}"), None);
    }
    tracing::info!(path = %out_path.display(), format = renderer.format(), rows = records.len(), "results document rendered");
    ok(
        &req.id,
        json!({
            "path": out_path.to_string_lossy(),
            "format": renderer.format(),
            "suggestedFilename": report::results_pdf_filename(now),
            "rowCount": records.len()
        }),
    )
}

fn handle_export_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let out_raw = match required_str(req, "outPath") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let out_path = match resolve_path(state, req, &out_raw) {
        Ok(p) => p,
        Err(e) => return e,
    };
    let correction_rows = match corrections::correction_records(&state.db, true) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let result_rows: Vec<_> = match results::list_results(&state.db, None) {
        Ok(v) => v.into_iter().map(|r| r.record).collect(),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let grading = match setup::grading_settings(&state.db) {
        Ok(g) => g,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let now = Utc::now();
    let entries = vec![
        BundleEntry::text(
            report::corrections_csv_filename(now),
            &report::corrections_to_csv(&correction_rows),
        ),
        BundleEntry::text(
            report::results_csv_filename(now),
            &report::results_to_csv(&result_rows),
        ),
        BundleEntry::text(
            report::detailed_report_filename(now),
            &report::corrections_detailed_report(&correction_rows, now, grading.report_pass_threshold),
        ),
    ];
    match bundle::export_report_bundle(&entries, &out_path, now) {
        Ok(summary) => {
            tracing::info!(path = %out_path.display(), entries = summary.entry_count, "report bundle exported");
            ok(
                &req.id,
                json!({
                    "path": out_path.to_string_lossy(),
                    "bundleFormat": summary.bundle_format,
                    "entryCount": summary.entry_count,
                    "entries": summary.entries,
                    "exportedAt": timestamp(now)
                }),
            )
        }
        Err(e) => err(&req.id, "io_failed", format!("{e:#}"), None),
    }
}

fn handle_verify_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let in_raw = match required_str(req, "inPath") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let in_path = match resolve_path(state, req, &in_raw) {
        Ok(p) => p,
        Err(e) => return e,
    };
    match bundle::verify_report_bundle(&in_path) {
        Ok(summary) => ok(
            &req.id,
            json!({
                "bundleFormat": summary.bundle_format,
                "exportedAt": summary.exported_at,
                "verifiedEntries": summary.verified_entries,
                "csvRows": summary
                    .csv_rows
                    .iter()
                    .map(|(name, rows)| (name.clone(), json!(rows)))
                    .collect::<serde_json::Map<_, _>>()
            }),
        ),
        Err(e) => err(&req.id, "bad_bundle", format!("{e:#}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.correctionsCsv" => Some(handle_corrections_csv(state, req)),
        "reports.detailed" => Some(handle_detailed(state, req)),
        "reports.resultsCsv" => Some(handle_results_csv(state, req)),
        "reports.resultSheet" => Some(handle_result_sheet(state, req)),
        "reports.codesCsv" => Some(handle_codes_csv(state, req)),
        "reports.exportPdf" => Some(handle_export_pdf(state, req)),
        "reports.exportBundle" => Some(handle_export_bundle(state, req)),
        "reports.verifyBundle" => Some(handle_verify_bundle(state, req)),
        _ => None,
    }
}

use crate::report::parse_csv;
use crate::upload::sha256_hex;
use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const MANIFEST_ENTRY: &str = "manifest.json";
pub const BUNDLE_FORMAT_V1: &str = "concours-reports-v1";

/// One file placed in the export archive.
#[derive(Debug, Clone)]
pub struct BundleEntry {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl BundleEntry {
    pub fn text(name: impl Into<String>, content: &str) -> Self {
        Self {
            name: name.into(),
            bytes: content.as_bytes().to_vec(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub entry_count: usize,
    pub entries: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct VerifySummary {
    pub bundle_format: String,
    pub exported_at: String,
    pub verified_entries: usize,
    /// Data rows (header excluded) of each CSV entry.
    pub csv_rows: Vec<(String, usize)>,
}

pub fn export_report_bundle(
    entries: &[BundleEntry],
    out_path: &Path,
    exported_at: DateTime<Utc>,
) -> anyhow::Result<ExportSummary> {
    if let Some(parent) = out_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create directory {}", parent.to_string_lossy())
            })?;
        }
    }

    let out_file = File::create(out_path).with_context(|| {
        format!(
            "failed to create output file {}",
            out_path.to_string_lossy()
        )
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let manifest = json!({
        "format": BUNDLE_FORMAT_V1,
        "version": 1,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "exportedAt": exported_at.to_rfc3339(),
        "entries": entries
            .iter()
            .map(|e| json!({
                "name": e.name,
                "sizeBytes": e.bytes.len(),
                "sha256": sha256_hex(&e.bytes),
            }))
            .collect::<Vec<_>>(),
    });
    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&manifest)
            .context("failed to serialize manifest")?
            .as_bytes(),
    )
    .context("failed to write manifest entry")?;

    for entry in entries {
        zip.start_file(entry.name.as_str(), opts)
            .with_context(|| format!("failed to start entry {}", entry.name))?;
        zip.write_all(&entry.bytes)
            .with_context(|| format!("failed to write entry {}", entry.name))?;
    }

    zip.finish().context("failed to finalize zip bundle")?;

    Ok(ExportSummary {
        bundle_format: BUNDLE_FORMAT_V1.to_string(),
        entry_count: entries.len() + 1,
        entries: entries.iter().map(|e| e.name.clone()).collect(),
    })
}

/// Re-reads an exported archive and checks every entry against its manifest digest.
pub fn verify_report_bundle(in_path: &Path) -> anyhow::Result<VerifySummary> {
    let in_file = File::open(in_path)
        .with_context(|| format!("failed to open bundle {}", in_path.to_string_lossy()))?;
    let mut archive = ZipArchive::new(in_file).context("invalid zip archive")?;

    let mut manifest_text = String::new();
    archive
        .by_name(MANIFEST_ENTRY)
        .context("bundle missing manifest.json")?
        .read_to_string(&mut manifest_text)
        .context("failed to read manifest.json")?;
    let manifest: serde_json::Value =
        serde_json::from_str(&manifest_text).context("manifest.json is invalid JSON")?;
    let format = manifest
        .get("format")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if format != BUNDLE_FORMAT_V1 {
        return Err(anyhow!("unsupported bundle format: {}", format));
    }

    let listed = manifest
        .get("entries")
        .and_then(|v| v.as_array())
        .ok_or_else(|| anyhow!("manifest.json has no entries list"))?;
    let mut csv_rows = Vec::new();
    for item in listed {
        let name = item
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("manifest entry without a name"))?;
        let expected = item.get("sha256").and_then(|v| v.as_str()).unwrap_or("");
        let mut bytes = Vec::new();
        archive
            .by_name(name)
            .with_context(|| format!("bundle missing {}", name))?
            .read_to_end(&mut bytes)
            .with_context(|| format!("failed to read {}", name))?;
        let actual = sha256_hex(&bytes);
        if actual != expected {
            return Err(anyhow!(
                "digest mismatch for {}: manifest {} but content {}",
                name,
                expected,
                actual
            ));
        }
        if name.ends_with(".csv") {
            let rows = parse_csv(&String::from_utf8_lossy(&bytes));
            csv_rows.push((name.to_string(), rows.len().saturating_sub(1)));
        }
    }

    Ok(VerifySummary {
        bundle_format: format.to_string(),
        exported_at: manifest
            .get("exportedAt")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string(),
        verified_entries: listed.len(),
        csv_rows,
    })
}

use crate::error::DomainError;
use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::io::Cursor;
use std::path::Path;
use zip::ZipArchive;

const PDF_MAGIC: &[u8] = b"%PDF-";
const ZIP_MAGIC: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];
pub const BYTES_PER_MB: u64 = 1024 * 1024;
pub const DEFAULT_MAX_SIZE_MB: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadKind {
    Pdf,
    Zip,
}

impl UploadKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Zip => "zip",
        }
    }

    fn from_extension(filename: &str) -> Option<Self> {
        let ext = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())?
            .to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(Self::Pdf),
            "zip" => Some(Self::Zip),
            _ => None,
        }
    }

    fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(PDF_MAGIC) {
            Some(Self::Pdf)
        } else if bytes.len() >= 4 && bytes[..4] == ZIP_MAGIC {
            Some(Self::Zip)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct UploadPolicy {
    pub max_size_bytes: u64,
    pub accept_zip: bool,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            max_size_bytes: DEFAULT_MAX_SIZE_MB * BYTES_PER_MB,
            accept_zip: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectedUpload {
    pub filename: String,
    pub kind: UploadKind,
    pub size_bytes: u64,
    pub sha256: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zip_entries: Option<usize>,
}

fn rejected(reason: &str, message: impl Into<String>) -> DomainError {
    DomainError::new("upload_rejected", message).with_details(json!({ "reason": reason }))
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Checks type, size and archive integrity of one uploaded copy.
pub fn inspect_bytes(
    filename: &str,
    bytes: &[u8],
    policy: &UploadPolicy,
) -> Result<InspectedUpload, DomainError> {
    let filename = filename.trim();
    if filename.is_empty() {
        return Err(rejected("missing_filename", "filename must not be empty"));
    }
    let size = bytes.len() as u64;
    if size == 0 {
        return Err(rejected("empty_file", "file is empty"));
    }
    if size > policy.max_size_bytes {
        return Err(rejected(
            "too_large",
            format!(
                "file is {} bytes; the maximum is {} MB",
                size,
                policy.max_size_bytes / BYTES_PER_MB
            ),
        ));
    }

    let Some(declared) = UploadKind::from_extension(filename) else {
        return Err(rejected("bad_extension", "accepted formats are PDF and ZIP"));
    };
    let Some(actual) = UploadKind::sniff(bytes) else {
        return Err(rejected("bad_signature", "file content is neither PDF nor ZIP"));
    };
    if declared != actual {
        return Err(rejected(
            "extension_mismatch",
            format!(
                "file named .{} but content is {}",
                declared.as_str(),
                actual.as_str()
            ),
        ));
    }
    if actual == UploadKind::Zip && !policy.accept_zip {
        return Err(rejected("zip_disabled", "ZIP uploads are disabled"));
    }

    let zip_entries = if actual == UploadKind::Zip {
        let archive = ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| rejected("bad_archive", format!("invalid zip archive: {}", e)))?;
        if archive.is_empty() {
            return Err(rejected("empty_archive", "zip archive has no entries"));
        }
        Some(archive.len())
    } else {
        None
    };

    Ok(InspectedUpload {
        filename: filename.to_string(),
        kind: actual,
        size_bytes: size,
        sha256: sha256_hex(bytes),
        zip_entries,
    })
}

pub fn inspect_file(path: &Path, policy: &UploadPolicy) -> Result<InspectedUpload, DomainError> {
    let meta = std::fs::metadata(path).map_err(|e| {
        DomainError::new("io_failed", e.to_string())
            .with_details(json!({ "path": path.to_string_lossy() }))
    })?;
    // Size gate before reading so oversized files are never loaded.
    if meta.len() > policy.max_size_bytes {
        return Err(rejected(
            "too_large",
            format!(
                "file is {} bytes; the maximum is {} MB",
                meta.len(),
                policy.max_size_bytes / BYTES_PER_MB
            ),
        ));
    }
    let bytes = std::fs::read(path).map_err(|e| {
        DomainError::new("io_failed", e.to_string())
            .with_details(json!({ "path": path.to_string_lossy() }))
    })?;
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    inspect_bytes(filename, &bytes, policy)
}

use anyhow::{anyhow, Context};
use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
    Pdf,
    Docx,
}

impl ExportFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "csv" => Some(Self::Csv),
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
            Self::Pdf => "pdf",
            Self::Docx => "docx",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Csv => "text/csv",
            Self::Pdf => "application/pdf",
            Self::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplaintExportRow {
    pub id: String,
    pub title: String,
    pub category_name: String,
    pub student_name: String,
    pub status: String,
    pub submitted_at: String,
}

fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

pub fn complaints_to_csv(rows: &[ComplaintExportRow]) -> String {
    let mut out = String::from("id,title,category,student,status,submittedAt\n");
    for row in rows {
        out.push_str(&format!(
            "{},{},{},{},{},{}\n",
            csv_escape(&row.id),
            csv_escape(&row.title),
            csv_escape(&row.category_name),
            csv_escape(&row.student_name),
            csv_escape(&row.status),
            csv_escape(&row.submitted_at),
        ));
    }
    out
}

/// Flat-text rendition served under the pdf/docx content types. This is a
/// carried-over gap from the platform these exports replace: the payload is
/// plain text, not a binary-formatted document.
pub fn complaints_to_plain_document(rows: &[ComplaintExportRow], heading: &str) -> String {
    let mut out = String::new();
    out.push_str(heading);
    out.push('\n');
    out.push_str(&"=".repeat(heading.chars().count()));
    out.push('\n');
    if rows.is_empty() {
        out.push_str("\nNo complaints in scope.\n");
        return out;
    }
    for row in rows {
        out.push('\n');
        out.push_str(&format!("[{}] {}\n", row.status, row.title));
        out.push_str(&format!("  Category:  {}\n", row.category_name));
        out.push_str(&format!("  Student:   {}\n", row.student_name));
        out.push_str(&format!("  Submitted: {}\n", row.submitted_at));
        out.push_str(&format!("  Ref:       {}\n", row.id));
    }
    out
}

const MANIFEST_ENTRY: &str = "manifest.json";
const DB_ENTRY: &str = "db/campusdesk.sqlite3";
const META_WORKSPACE_ENTRY: &str = "meta/workspace.json";
pub const BUNDLE_FORMAT_V1: &str = "campusdesk-workspace-v1";

#[derive(Debug, Clone)]
pub struct BundleExportSummary {
    pub bundle_format: String,
    pub entry_count: usize,
}

#[derive(Debug, Clone)]
pub struct BundleImportSummary {
    pub bundle_format_detected: String,
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

pub fn export_workspace_bundle(
    workspace_path: &Path,
    out_path: &Path,
) -> anyhow::Result<BundleExportSummary> {
    let db_path = workspace_path.join("campusdesk.sqlite3");
    if !db_path.is_file() {
        return Err(anyhow!(
            "workspace database not found: {}",
            db_path.to_string_lossy()
        ));
    }

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }

    let db_bytes = std::fs::read(&db_path)
        .with_context(|| format!("failed to read database {}", db_path.to_string_lossy()))?;

    let out_file = File::create(out_path).with_context(|| {
        format!(
            "failed to create output file {}",
            out_path.to_string_lossy()
        )
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let exported_at = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let manifest = json!({
        "format": BUNDLE_FORMAT_V1,
        "version": 1,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "exportedAt": exported_at,
        "dbSha256": sha256_hex(&db_bytes),
    });
    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&manifest)
            .context("failed to serialize manifest")?
            .as_bytes(),
    )
    .context("failed to write manifest entry")?;

    zip.start_file(DB_ENTRY, opts)
        .context("failed to start database entry")?;
    zip.write_all(&db_bytes)
        .context("failed to write database entry")?;

    let workspace_meta = json!({
        "sourceWorkspace": workspace_path.to_string_lossy(),
    });
    zip.start_file(META_WORKSPACE_ENTRY, opts)
        .context("failed to start workspace metadata entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&workspace_meta)
            .context("failed to serialize workspace metadata")?
            .as_bytes(),
    )
    .context("failed to write workspace metadata entry")?;

    zip.finish().context("failed to finalize zip bundle")?;

    Ok(BundleExportSummary {
        bundle_format: BUNDLE_FORMAT_V1.to_string(),
        entry_count: 3,
    })
}

pub fn import_workspace_bundle(
    in_path: &Path,
    workspace_path: &Path,
) -> anyhow::Result<BundleImportSummary> {
    std::fs::create_dir_all(workspace_path).with_context(|| {
        format!(
            "failed to create workspace {}",
            workspace_path.to_string_lossy()
        )
    })?;
    let dst = workspace_path.join("campusdesk.sqlite3");

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

    let mut db_bytes = Vec::new();
    archive
        .by_name(DB_ENTRY)
        .context("bundle missing db/campusdesk.sqlite3")?
        .read_to_end(&mut db_bytes)
        .context("failed to extract database entry")?;

    if let Some(expected) = manifest.get("dbSha256").and_then(|v| v.as_str()) {
        let actual = sha256_hex(&db_bytes);
        if actual != expected {
            return Err(anyhow!(
                "bundle database checksum mismatch: expected {}, got {}",
                expected,
                actual
            ));
        }
    }

    let tmp_dst = workspace_path.join("campusdesk.sqlite3.importing");
    std::fs::write(&tmp_dst, &db_bytes).with_context(|| {
        format!(
            "failed to write temp database {}",
            tmp_dst.to_string_lossy()
        )
    })?;

    if dst.exists() {
        std::fs::remove_file(&dst).with_context(|| {
            format!(
                "failed to remove existing database {}",
                dst.to_string_lossy()
            )
        })?;
    }
    std::fs::rename(&tmp_dst, &dst).with_context(|| {
        format!(
            "failed to move extracted database to {}",
            dst.to_string_lossy()
        )
    })?;

    Ok(BundleImportSummary {
        bundle_format_detected: BUNDLE_FORMAT_V1.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(title: &str, status: &str) -> ComplaintExportRow {
        ComplaintExportRow {
            id: "c-1".into(),
            title: title.into(),
            category_name: "Hostel".into(),
            student_name: "Ada, Obi".into(),
            status: status.into(),
            submitted_at: "2025-09-15T08:00:00+00:00".into(),
        }
    }

    #[test]
    fn csv_has_header_and_escapes_commas() {
        let out = complaints_to_csv(&[row("Leaking roof, block B", "PENDING")]);
        let mut lines = out.lines();
        assert_eq!(lines.next(), Some("id,title,category,student,status,submittedAt"));
        let data = lines.next().expect("data row");
        assert!(data.contains("\"Leaking roof, block B\""));
        assert!(data.contains("\"Ada, Obi\""));
    }

    #[test]
    fn plain_document_renders_empty_scope() {
        let out = complaints_to_plain_document(&[], "Complaints");
        assert!(out.contains("No complaints in scope."));
    }

    #[test]
    fn format_parse_round_trips() {
        for name in ["json", "csv", "pdf", "docx"] {
            let f = ExportFormat::parse(name).expect("format");
            assert_eq!(f.as_str(), name);
        }
        assert_eq!(ExportFormat::parse("xlsx"), None);
        assert_eq!(ExportFormat::parse("CSV"), Some(ExportFormat::Csv));
    }
}

use anyhow::{anyhow, Context};
use rusqlite::{Connection, OpenFlags};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::db::DB_FILE;

const MANIFEST_ENTRY: &str = "manifest.json";
const DB_ENTRY: &str = "db/school.sqlite3";
const META_WORKSPACE_ENTRY: &str = "meta/workspace.json";
pub const BUNDLE_FORMAT_V1: &str = "school-workspace-v1";
const ZIP_MAGIC: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];
const SQLITE_MAGIC: &[u8; 16] = b"SQLite format 3\0";

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub entry_count: usize,
    pub db_sha256: String,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub bundle_format_detected: String,
    pub checksum_verified: bool,
}

fn sha256_file(path: &Path) -> anyhow::Result<String> {
    let mut f = File::open(path)
        .with_context(|| format!("failed to open {}", path.to_string_lossy()))?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut f, &mut hasher)
        .with_context(|| format!("failed to hash {}", path.to_string_lossy()))?;
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn export_workspace_bundle(
    workspace_path: &Path,
    out_path: &Path,
) -> anyhow::Result<ExportSummary> {
    let db_path = workspace_path.join(DB_FILE);
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

    let db_sha256 = sha256_file(&db_path)?;

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
        "exportedAt": chrono::Utc::now().to_rfc3339(),
        "dbSha256": db_sha256,
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
    let mut db_file = File::open(&db_path)
        .with_context(|| format!("failed to open database {}", db_path.to_string_lossy()))?;
    std::io::copy(&mut db_file, &mut zip).context("failed to write database entry")?;

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

    Ok(ExportSummary {
        bundle_format: BUNDLE_FORMAT_V1.to_string(),
        entry_count: 3,
        db_sha256,
    })
}

/// What an import source looks like on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Bundle,
    RawSqlite,
    Unknown,
}

pub fn detect_source(path: &Path) -> anyhow::Result<SourceKind> {
    let mut f = File::open(path)
        .with_context(|| format!("failed to open input file {}", path.to_string_lossy()))?;
    let mut head = [0u8; 16];
    let mut read = 0;
    while read < head.len() {
        let n = f
            .read(&mut head[read..])
            .context("failed to read file signature")?;
        if n == 0 {
            break;
        }
        read += n;
    }
    if read >= ZIP_MAGIC.len() && head[..ZIP_MAGIC.len()] == ZIP_MAGIC {
        return Ok(SourceKind::Bundle);
    }
    if read == SQLITE_MAGIC.len() && head == *SQLITE_MAGIC {
        return Ok(SourceKind::RawSqlite);
    }
    Ok(SourceKind::Unknown)
}

/// Replace the workspace database with the one in `in_path`. The candidate
/// is written next to the live file and only moved into place once its
/// checksum (bundles) and `quick_check` pass; on any failure the live
/// database is untouched.
pub fn import_workspace_bundle(
    in_path: &Path,
    workspace_path: &Path,
) -> anyhow::Result<ImportSummary> {
    let kind = detect_source(in_path)?;
    if kind == SourceKind::Unknown {
        return Err(anyhow!(
            "{} is neither a workspace bundle nor a SQLite database",
            in_path.to_string_lossy()
        ));
    }

    std::fs::create_dir_all(workspace_path).with_context(|| {
        format!(
            "failed to create workspace {}",
            workspace_path.to_string_lossy()
        )
    })?;
    let dst = workspace_path.join(DB_FILE);
    let tmp_dst = workspace_path.join(format!("{}.importing", DB_FILE));
    if tmp_dst.exists() {
        let _ = std::fs::remove_file(&tmp_dst);
    }

    let staged = match kind {
        SourceKind::Bundle => stage_bundle(in_path, &tmp_dst),
        _ => stage_raw(in_path, &tmp_dst),
    }
    .and_then(|summary| verify_database(&tmp_dst).map(|()| summary));
    let summary = match staged {
        Ok(summary) => summary,
        Err(e) => {
            let _ = std::fs::remove_file(&tmp_dst);
            return Err(e);
        }
    };

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
            "failed to move imported database to {}",
            dst.to_string_lossy()
        )
    })?;
    Ok(summary)
}

fn stage_raw(in_path: &Path, tmp_dst: &Path) -> anyhow::Result<ImportSummary> {
    std::fs::copy(in_path, tmp_dst).with_context(|| {
        format!(
            "failed to copy raw sqlite backup from {} to {}",
            in_path.to_string_lossy(),
            tmp_dst.to_string_lossy()
        )
    })?;
    Ok(ImportSummary {
        bundle_format_detected: "raw-sqlite3".to_string(),
        checksum_verified: false,
    })
}

fn stage_bundle(in_path: &Path, tmp_dst: &Path) -> anyhow::Result<ImportSummary> {
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
    let expected = manifest.get("dbSha256").and_then(|v| v.as_str());

    let mut db_out = File::create(tmp_dst).with_context(|| {
        format!(
            "failed to create temp database {}",
            tmp_dst.to_string_lossy()
        )
    })?;
    {
        let mut db_entry = archive
            .by_name(DB_ENTRY)
            .context("bundle missing db/school.sqlite3")?;
        std::io::copy(&mut db_entry, &mut db_out).context("failed to extract database entry")?;
    }
    db_out
        .flush()
        .context("failed to flush extracted database")?;
    drop(db_out);

    if let Some(expected) = expected {
        let actual = sha256_file(tmp_dst)?;
        if !actual.eq_ignore_ascii_case(expected) {
            return Err(anyhow!(
                "database checksum mismatch: manifest {}, bundle {}",
                expected,
                actual
            ));
        }
    }

    Ok(ImportSummary {
        bundle_format_detected: BUNDLE_FORMAT_V1.to_string(),
        checksum_verified: expected.is_some(),
    })
}

/// Open the staged file read-only and run `PRAGMA quick_check`.
fn verify_database(path: &Path) -> anyhow::Result<()> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .with_context(|| format!("failed to open staged database {}", path.to_string_lossy()))?;
    let verdict: String = conn
        .query_row("PRAGMA quick_check", [], |r| r.get(0))
        .context("staged database failed to open as SQLite")?;
    if verdict != "ok" {
        return Err(anyhow!("staged database failed quick_check: {}", verdict));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite_with_marker(path: &Path, marker: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let conn = Connection::open(path).unwrap();
        conn.execute_batch("CREATE TABLE marker(v TEXT NOT NULL)").unwrap();
        conn.execute("INSERT INTO marker(v) VALUES(?)", [marker]).unwrap();
    }

    fn marker(path: &Path) -> String {
        let conn = Connection::open(path).unwrap();
        conn.query_row("SELECT v FROM marker", [], |r| r.get(0)).unwrap()
    }

    #[test]
    fn bundle_round_trips_and_records_checksum() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        sqlite_with_marker(&src.join(DB_FILE), "exported");
        sqlite_with_marker(&dst.join(DB_FILE), "live");

        let bundle = tmp.path().join("out/backup.zip");
        let export = export_workspace_bundle(&src, &bundle).unwrap();
        assert_eq!(export.entry_count, 3);
        assert_eq!(export.db_sha256.len(), 64);
        assert_eq!(detect_source(&bundle).unwrap(), SourceKind::Bundle);

        let import = import_workspace_bundle(&bundle, &dst).unwrap();
        assert!(import.checksum_verified);
        assert_eq!(marker(&dst.join(DB_FILE)), "exported");
        assert!(!dst.join(format!("{}.importing", DB_FILE)).exists());
    }

    #[test]
    fn tampered_manifest_checksum_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let dst = tmp.path().join("dst");
        sqlite_with_marker(&dst.join(DB_FILE), "keep me");

        let bundle = tmp.path().join("bad.zip");
        let mut zip = ZipWriter::new(File::create(&bundle).unwrap());
        let opts = FileOptions::default();
        zip.start_file(MANIFEST_ENTRY, opts).unwrap();
        let manifest = json!({ "format": BUNDLE_FORMAT_V1, "dbSha256": "00".repeat(32) });
        zip.write_all(manifest.to_string().as_bytes()).unwrap();
        zip.start_file(DB_ENTRY, opts).unwrap();
        zip.write_all(b"other bytes").unwrap();
        zip.finish().unwrap();

        let e = import_workspace_bundle(&bundle, &dst).unwrap_err();
        assert!(e.to_string().contains("checksum mismatch"));
        assert_eq!(marker(&dst.join(DB_FILE)), "keep me");
        assert!(!dst.join(format!("{}.importing", DB_FILE)).exists());
    }

    #[test]
    fn raw_sqlite_file_is_copied() {
        let tmp = tempfile::tempdir().unwrap();
        let raw = tmp.path().join("raw.sqlite3");
        sqlite_with_marker(&raw, "raw");
        let dst = tmp.path().join("dst");
        assert_eq!(detect_source(&raw).unwrap(), SourceKind::RawSqlite);

        let import = import_workspace_bundle(&raw, &dst).unwrap();
        assert_eq!(import.bundle_format_detected, "raw-sqlite3");
        assert!(!import.checksum_verified);
        assert_eq!(marker(&dst.join(DB_FILE)), "raw");
    }

    #[test]
    fn text_file_is_refused_before_touching_the_live_database() {
        let tmp = tempfile::tempdir().unwrap();
        let dst = tmp.path().join("dst");
        sqlite_with_marker(&dst.join(DB_FILE), "keep me");
        let notes = tmp.path().join("notes.txt");
        std::fs::write(&notes, b"hello, this is not a database at all").unwrap();
        assert_eq!(detect_source(&notes).unwrap(), SourceKind::Unknown);

        assert!(import_workspace_bundle(&notes, &dst).is_err());
        assert_eq!(marker(&dst.join(DB_FILE)), "keep me");
    }

    #[test]
    fn sqlite_header_over_garbage_fails_verification() {
        let tmp = tempfile::tempdir().unwrap();
        let dst = tmp.path().join("dst");
        sqlite_with_marker(&dst.join(DB_FILE), "keep me");
        let fake = tmp.path().join("fake.sqlite3");
        let mut body = SQLITE_MAGIC.to_vec();
        body.extend(std::iter::repeat(0xAB).take(4096));
        std::fs::write(&fake, body).unwrap();
        assert_eq!(detect_source(&fake).unwrap(), SourceKind::RawSqlite);

        assert!(import_workspace_bundle(&fake, &dst).is_err());
        assert_eq!(marker(&dst.join(DB_FILE)), "keep me");
        assert!(!dst.join(format!("{}.importing", DB_FILE)).exists());
    }
}

use anyhow::{anyhow, Context};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::db::DB_FILE_NAME;

const MANIFEST_ENTRY: &str = "manifest.json";
const DB_ENTRY: &str = "db/gradecut.sqlite3";
pub const BACKUP_FORMAT_V1: &str = "gradecut-backup-v1";

#[derive(Debug, Clone)]
pub struct BackupSummary {
    pub format: String,
    pub entry_count: usize,
    pub db_sha256: String,
}

/// Archive the workspace database as a zip with a checksummed manifest.
pub fn create_backup(workspace_path: &Path, out_path: &Path) -> anyhow::Result<BackupSummary> {
    let db_path = workspace_path.join(DB_FILE_NAME);
    if !db_path.is_file() {
        return Err(anyhow!("no database at {}", db_path.display()));
    }

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating backup directory {}", parent.display()))?;
    }

    // Hash the exact bytes that go into the archive.
    let db_bytes = std::fs::read(&db_path)
        .with_context(|| format!("reading database {}", db_path.display()))?;
    let db_sha256 = format!("{:x}", Sha256::digest(&db_bytes));

    let out_file = File::create(out_path)
        .with_context(|| format!("creating backup file {}", out_path.display()))?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let manifest = json!({
        "format": BACKUP_FORMAT_V1,
        "version": 1,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "createdAt": crate::db::now_rfc3339(),
        "dbSha256": db_sha256,
    });
    let manifest_text =
        serde_json::to_string_pretty(&manifest).context("serializing backup manifest")?;

    zip.start_file(MANIFEST_ENTRY, opts)
        .context("writing backup manifest")?;
    zip.write_all(manifest_text.as_bytes())
        .context("writing backup manifest")?;

    zip.start_file(DB_ENTRY, opts)
        .context("writing database entry")?;
    zip.write_all(&db_bytes).context("writing database entry")?;

    zip.finish().context("finalizing backup zip")?;

    Ok(BackupSummary {
        format: BACKUP_FORMAT_V1.to_string(),
        entry_count: 2,
        db_sha256,
    })
}

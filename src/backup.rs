//! Workspace bundles: a zip holding the SQLite file plus a manifest that
//! records its size and SHA-256.

use anyhow::{anyhow, bail, Context};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const MANIFEST_ENTRY: &str = "manifest.json";
const DB_ENTRY: &str = "db/labdesk.sqlite3";
const DB_FILE: &str = "labdesk.sqlite3";
const ZIP_MAGIC: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];
pub const BUNDLE_FORMAT: &str = "labdesk-workspace-v1";
pub const RAW_SQLITE_FORMAT: &str = "raw-sqlite3";

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub db_bytes: u64,
    pub sha256: String,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub bundle_format_detected: String,
    pub db_bytes: u64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    #[serde(default)]
    format: String,
    #[serde(default)]
    app_version: Option<String>,
    #[serde(default)]
    exported_at: Option<String>,
    #[serde(default)]
    source_workspace: Option<String>,
    #[serde(default)]
    database: Option<DatabaseEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct DatabaseEntry {
    entry: String,
    bytes: u64,
    sha256: String,
}

fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

pub fn export_workspace_bundle(
    workspace_path: &Path,
    out_path: &Path,
) -> anyhow::Result<ExportSummary> {
    let db_path = workspace_path.join(DB_FILE);
    if !db_path.is_file() {
        bail!("workspace database not found: {}", db_path.display());
    }
    let db_bytes = std::fs::read(&db_path)
        .with_context(|| format!("failed to read database {}", db_path.display()))?;
    let checksum = sha256_hex(&db_bytes);

    let manifest = Manifest {
        format: BUNDLE_FORMAT.to_string(),
        app_version: Some(env!("CARGO_PKG_VERSION").to_string()),
        exported_at: Some(chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()),
        source_workspace: Some(workspace_path.to_string_lossy().into_owned()),
        database: Some(DatabaseEntry {
            entry: DB_ENTRY.to_string(),
            bytes: db_bytes.len() as u64,
            sha256: checksum.clone(),
        }),
    };
    let manifest_text =
        serde_json::to_string_pretty(&manifest).context("failed to serialize manifest")?;

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    let out_file = File::create(out_path)
        .with_context(|| format!("failed to create bundle {}", out_path.display()))?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    for (name, bytes) in [(MANIFEST_ENTRY, manifest_text.as_bytes()), (DB_ENTRY, &db_bytes[..])] {
        zip.start_file(name, opts)
            .with_context(|| format!("failed to start {} entry", name))?;
        zip.write_all(bytes)
            .with_context(|| format!("failed to write {} entry", name))?;
    }
    zip.finish().context("failed to finalize zip bundle")?;

    Ok(ExportSummary {
        bundle_format: BUNDLE_FORMAT.to_string(),
        db_bytes: db_bytes.len() as u64,
        sha256: checksum,
    })
}

/// Restores `labdesk.sqlite3` into `workspace_path`. A plain SQLite file is
/// accepted as-is; a bundle must match its manifest checksum. The existing
/// database is only replaced once the new bytes are fully on disk.
pub fn import_workspace_bundle(
    in_path: &Path,
    workspace_path: &Path,
) -> anyhow::Result<ImportSummary> {
    std::fs::create_dir_all(workspace_path)
        .with_context(|| format!("failed to create workspace {}", workspace_path.display()))?;

    let (format, db_bytes) = if has_zip_magic(in_path)? {
        (BUNDLE_FORMAT, read_bundle(in_path)?)
    } else {
        let bytes = std::fs::read(in_path)
            .with_context(|| format!("failed to read sqlite backup {}", in_path.display()))?;
        (RAW_SQLITE_FORMAT, bytes)
    };
    replace_database(workspace_path, &db_bytes)?;

    Ok(ImportSummary {
        bundle_format_detected: format.to_string(),
        db_bytes: db_bytes.len() as u64,
    })
}

/// Database bytes from a bundle after the manifest checks pass.
fn read_bundle(in_path: &Path) -> anyhow::Result<Vec<u8>> {
    let in_file = File::open(in_path)
        .with_context(|| format!("failed to open bundle {}", in_path.display()))?;
    let mut archive = ZipArchive::new(in_file).context("invalid zip archive")?;

    let mut manifest_text = String::new();
    archive
        .by_name(MANIFEST_ENTRY)
        .context("bundle missing manifest.json")?
        .read_to_string(&mut manifest_text)
        .context("failed to read manifest.json")?;
    let manifest: Manifest =
        serde_json::from_str(&manifest_text).context("manifest.json is invalid")?;
    if manifest.format != BUNDLE_FORMAT {
        bail!("unsupported bundle format: {}", manifest.format);
    }

    let entry = manifest
        .database
        .as_ref()
        .map_or(DB_ENTRY, |d| d.entry.as_str());
    let mut db_bytes = Vec::new();
    archive
        .by_name(entry)
        .with_context(|| format!("bundle missing {}", entry))?
        .read_to_end(&mut db_bytes)
        .context("failed to extract database entry")?;

    if let Some(expected) = &manifest.database {
        let actual = sha256_hex(&db_bytes);
        if actual != expected.sha256 {
            return Err(anyhow!(
                "database checksum mismatch (manifest {}, bundle {})",
                expected.sha256,
                actual
            ));
        }
    }
    Ok(db_bytes)
}

fn replace_database(workspace_path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let dst = workspace_path.join(DB_FILE);
    let staged = workspace_path.join(format!("{}.importing", DB_FILE));
    {
        let mut out = File::create(&staged)
            .with_context(|| format!("failed to create {}", staged.display()))?;
        out.write_all(bytes)
            .and_then(|_| out.sync_all())
            .with_context(|| format!("failed to write {}", staged.display()))?;
    }
    if dst.exists() {
        std::fs::remove_file(&dst)
            .with_context(|| format!("failed to remove existing database {}", dst.display()))?;
    }
    std::fs::rename(&staged, &dst)
        .with_context(|| format!("failed to move imported database to {}", dst.display()))?;
    Ok(())
}

fn has_zip_magic(path: &Path) -> anyhow::Result<bool> {
    let mut f = File::open(path)
        .with_context(|| format!("failed to open input file {}", path.display()))?;
    let mut sig = [0u8; 4];
    let read = f.read(&mut sig).context("failed to read file signature")?;
    Ok(read == sig.len() && sig == ZIP_MAGIC)
}

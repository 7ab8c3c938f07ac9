#[path = "../src/backup.rs"]
mod backup;

use std::fs::File;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

#[test]
fn zip_export_and_import_roundtrip() {
    let workspace = temp_dir("labdesk-backup-src");
    let workspace2 = temp_dir("labdesk-backup-dst");
    let out_dir = temp_dir("labdesk-backup-out");

    let bytes = b"sqlite-test-payload";
    std::fs::write(workspace.join("labdesk.sqlite3"), bytes).expect("write source db");

    let bundle_path = out_dir.join("workspace.labdesk.zip");
    let export = backup::export_workspace_bundle(&workspace, &bundle_path).expect("export bundle");
    assert_eq!(export.bundle_format, backup::BUNDLE_FORMAT);
    assert_eq!(export.db_bytes, bytes.len() as u64);
    assert_eq!(export.sha256.len(), 64);

    let f = File::open(&bundle_path).expect("open bundle");
    let mut archive = zip::ZipArchive::new(f).expect("open zip archive");
    let mut manifest = String::new();
    archive
        .by_name("manifest.json")
        .expect("manifest entry")
        .read_to_string(&mut manifest)
        .expect("read manifest");
    assert!(manifest.contains(backup::BUNDLE_FORMAT));
    assert!(manifest.contains(&export.sha256));
    archive
        .by_name("db/labdesk.sqlite3")
        .expect("database entry in bundle");

    let import = backup::import_workspace_bundle(&bundle_path, &workspace2).expect("import bundle");
    assert_eq!(import.bundle_format_detected, backup::BUNDLE_FORMAT);
    assert_eq!(import.db_bytes, bytes.len() as u64);

    let restored = std::fs::read(workspace2.join("labdesk.sqlite3")).expect("read restored db");
    assert_eq!(restored, bytes);

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(workspace2);
    let _ = std::fs::remove_dir_all(out_dir);
}

#[test]
fn raw_sqlite_import_is_supported() {
    let out_dir = temp_dir("labdesk-backup-raw");
    let workspace = temp_dir("labdesk-backup-raw-dst");

    let raw_file = out_dir.join("copy.sqlite3");
    let bytes = b"plain-sqlite-copy";
    std::fs::write(&raw_file, bytes).expect("write sqlite file");

    let import = backup::import_workspace_bundle(&raw_file, &workspace).expect("import sqlite");
    assert_eq!(import.bundle_format_detected, backup::RAW_SQLITE_FORMAT);

    let restored = std::fs::read(workspace.join("labdesk.sqlite3")).expect("read restored sqlite");
    assert_eq!(restored, bytes);

    let _ = std::fs::remove_dir_all(out_dir);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn tampered_bundle_is_rejected_and_workspace_untouched() {
    let out_dir = temp_dir("labdesk-backup-tamper");
    let workspace = temp_dir("labdesk-backup-tamper-dst");
    std::fs::write(workspace.join("labdesk.sqlite3"), b"original").expect("seed db");

    let bundle_path = out_dir.join("tampered.zip");
    {
        let f = File::create(&bundle_path).expect("create bundle");
        let mut zip = zip::ZipWriter::new(f);
        let opts = zip::write::FileOptions::default();
        zip.start_file("manifest.json", opts).expect("manifest entry");
        zip.write_all(
            serde_json::json!({
                "format": backup::BUNDLE_FORMAT,
                "database": { "entry": "db/labdesk.sqlite3", "bytes": 3, "sha256": "00" },
            })
            .to_string()
            .as_bytes(),
        )
        .expect("write manifest");
        zip.start_file("db/labdesk.sqlite3", opts).expect("db entry");
        zip.write_all(b"bad").expect("write db");
        zip.finish().expect("finish zip");
    }

    let err = backup::import_workspace_bundle(&bundle_path, &workspace).unwrap_err();
    assert!(format!("{err:#}").contains("checksum mismatch"));
    let kept = std::fs::read(workspace.join("labdesk.sqlite3")).expect("read db");
    assert_eq!(kept, b"original");

    let _ = std::fs::remove_dir_all(out_dir);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn export_without_database_fails() {
    let workspace = temp_dir("labdesk-backup-empty");
    let err = backup::export_workspace_bundle(&workspace, &workspace.join("x.zip")).unwrap_err();
    assert!(err.to_string().contains("workspace database not found"));
    let _ = std::fs::remove_dir_all(workspace);
}

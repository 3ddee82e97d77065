use anyhow::{anyhow, Context};
use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::calc;
use crate::db;
use crate::documents::{sha256_file, sha256_hex};

const MANIFEST_ENTRY: &str = "manifest.json";
const DB_ENTRY: &str = "db/efsrt.sqlite3";
pub const BUNDLE_FORMAT_V1: &str = "efsrt-workspace-v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestEntry {
    path: String,
    sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    format: String,
    version: u32,
    app_version: String,
    exported_at: String,
    entries: Vec<ManifestEntry>,
}

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub entry_count: usize,
    pub document_count: usize,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub bundle_format_detected: String,
    pub document_count: usize,
}

pub fn export_workspace_bundle(
    workspace_path: &Path,
    out_path: &Path,
) -> anyhow::Result<ExportSummary> {
    let db_path = db::db_path(workspace_path);
    if !db_path.is_file() {
        return Err(anyhow!(
            "workspace database not found: {}",
            db_path.to_string_lossy()
        ));
    }

    // (entry name, source path)
    let mut files: Vec<(String, PathBuf)> = vec![(DB_ENTRY.to_string(), db_path)];
    let docs_dir = db::documents_dir(workspace_path);
    if docs_dir.is_dir() {
        let mut docs: Vec<(String, PathBuf)> = Vec::new();
        for ent in std::fs::read_dir(&docs_dir)
            .with_context(|| format!("failed to list {}", docs_dir.to_string_lossy()))?
        {
            let p = ent?.path();
            if !p.is_file() {
                continue;
            }
            let Some(name) = p.file_name().and_then(|s| s.to_str()) else {
                continue;
            };
            docs.push((format!("{}/{}", db::DOCUMENTS_DIR, name), p.clone()));
        }
        docs.sort();
        files.extend(docs);
    }

    let mut entries = Vec::with_capacity(files.len());
    for (name, path) in &files {
        entries.push(ManifestEntry {
            path: name.clone(),
            sha256: sha256_file(path)?,
        });
    }
    let manifest = Manifest {
        format: BUNDLE_FORMAT_V1.to_string(),
        version: 1,
        app_version: env!("CARGO_PKG_VERSION").to_string(),
        exported_at: chrono::Utc::now().to_rfc3339(),
        entries,
    };

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }
    let out_file = File::create(out_path).with_context(|| {
        format!(
            "failed to create output file {}",
            out_path.to_string_lossy()
        )
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&manifest)
            .context("failed to serialize manifest")?
            .as_bytes(),
    )
    .context("failed to write manifest entry")?;

    for (name, path) in &files {
        zip.start_file(name.as_str(), opts)
            .with_context(|| format!("failed to start entry {}", name))?;
        let mut src = File::open(path)
            .with_context(|| format!("failed to open {}", path.to_string_lossy()))?;
        std::io::copy(&mut src, &mut zip).with_context(|| format!("failed to write entry {}", name))?;
    }

    zip.finish().context("failed to finalize zip bundle")?;

    Ok(ExportSummary {
        bundle_format: BUNDLE_FORMAT_V1.to_string(),
        entry_count: files.len() + 1,
        document_count: files.len() - 1,
    })
}

pub fn import_workspace_bundle(
    in_path: &Path,
    workspace_path: &Path,
) -> anyhow::Result<ImportSummary> {
    if !is_zip_file(in_path)? {
        return Err(anyhow!(
            "not a workspace bundle: {}",
            in_path.to_string_lossy()
        ));
    }
    std::fs::create_dir_all(workspace_path).with_context(|| {
        format!(
            "failed to create workspace {}",
            workspace_path.to_string_lossy()
        )
    })?;

    let in_file = File::open(in_path)
        .with_context(|| format!("failed to open bundle {}", in_path.to_string_lossy()))?;
    let mut archive = ZipArchive::new(in_file).context("invalid zip archive")?;

    let mut manifest_text = String::new();
    archive
        .by_name(MANIFEST_ENTRY)
        .context("bundle missing manifest.json")?
        .read_to_string(&mut manifest_text)
        .context("failed to read manifest.json")?;
    let manifest: Manifest =
        serde_json::from_str(&manifest_text).context("manifest.json is invalid")?;
    if manifest.format != BUNDLE_FORMAT_V1 {
        return Err(anyhow!("unsupported bundle format: {}", manifest.format));
    }
    if !manifest.entries.iter().any(|e| e.path == DB_ENTRY) {
        return Err(anyhow!("bundle missing {}", DB_ENTRY));
    }

    // Read and verify everything before touching the live workspace.
    let mut payloads: Vec<(String, Vec<u8>)> = Vec::with_capacity(manifest.entries.len());
    for entry in &manifest.entries {
        if entry.path != DB_ENTRY && !is_document_entry(&entry.path) {
            return Err(anyhow!("unexpected bundle entry: {}", entry.path));
        }
        let mut bytes = Vec::new();
        archive
            .by_name(&entry.path)
            .with_context(|| format!("bundle missing {}", entry.path))?
            .read_to_end(&mut bytes)
            .with_context(|| format!("failed to read {}", entry.path))?;
        if sha256_hex(&bytes) != entry.sha256 {
            return Err(anyhow!("checksum mismatch for {}", entry.path));
        }
        payloads.push((entry.path.clone(), bytes));
    }

    let dst = db::db_path(workspace_path);
    let tmp_dst = workspace_path.join(format!("{}.importing", db::DB_FILE));
    let docs_dir = db::documents_dir(workspace_path);
    let tmp_docs = workspace_path.join(format!("{}.importing", db::DOCUMENTS_DIR));
    if tmp_dst.exists() {
        let _ = std::fs::remove_file(&tmp_dst);
    }
    if tmp_docs.exists() {
        let _ = std::fs::remove_dir_all(&tmp_docs);
    }
    std::fs::create_dir_all(&tmp_docs)
        .with_context(|| format!("failed to create {}", tmp_docs.to_string_lossy()))?;

    let mut document_count = 0;
    for (path, bytes) in &payloads {
        let target = if path == DB_ENTRY {
            tmp_dst.clone()
        } else {
            document_count += 1;
            let name = path
                .strip_prefix(&format!("{}/", db::DOCUMENTS_DIR))
                .unwrap_or(path);
            tmp_docs.join(name)
        };
        let mut out = File::create(&target)
            .with_context(|| format!("failed to create {}", target.to_string_lossy()))?;
        out.write_all(bytes)
            .with_context(|| format!("failed to write {}", target.to_string_lossy()))?;
        out.flush()
            .with_context(|| format!("failed to flush {}", target.to_string_lossy()))?;
    }

    if let Err(e) = check_staged_database(&tmp_dst) {
        let _ = std::fs::remove_file(&tmp_dst);
        let _ = std::fs::remove_dir_all(&tmp_docs);
        return Err(e);
    }

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
    if docs_dir.exists() {
        std::fs::remove_dir_all(&docs_dir).with_context(|| {
            format!(
                "failed to remove existing documents {}",
                docs_dir.to_string_lossy()
            )
        })?;
    }
    std::fs::rename(&tmp_docs, &docs_dir).with_context(|| {
        format!(
            "failed to move extracted documents to {}",
            docs_dir.to_string_lossy()
        )
    })?;

    Ok(ImportSummary {
        bundle_format_detected: manifest.format,
        document_count,
    })
}

/// The extracted database must carry grading settings the workspace can grade with.
fn check_staged_database(db_file: &Path) -> anyhow::Result<()> {
    let conn = Connection::open_with_flags(db_file, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .with_context(|| format!("failed to open {}", db_file.to_string_lossy()))?;
    calc::load_grading_config(&conn).context("bundle grading settings are unusable")?;
    Ok(())
}

/// `documents/<file>` with a single plain file-name component.
fn is_document_entry(path: &str) -> bool {
    let Some(name) = path.strip_prefix(&format!("{}/", db::DOCUMENTS_DIR)) else {
        return false;
    };
    let mut comps = Path::new(name).components();
    matches!(
        (comps.next(), comps.next()),
        (Some(Component::Normal(_)), None)
    )
}

fn is_zip_file(path: &Path) -> anyhow::Result<bool> {
    let mut f = File::open(path)
        .with_context(|| format!("failed to open input file {}", path.to_string_lossy()))?;
    let mut sig = [0u8; 4];
    let read = f.read(&mut sig).context("failed to read file signature")?;
    if read < 4 {
        return Ok(false);
    }
    Ok(sig == [0x50, 0x4B, 0x03, 0x04])
}

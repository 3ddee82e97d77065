use anyhow::{anyhow, Context};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use uuid::Uuid;

use crate::db;

#[derive(Debug, Clone)]
pub struct StoredDocument {
    /// Original file name as the student attached it.
    pub name: String,
    /// Path relative to the workspace root.
    pub rel_path: String,
    pub sha256: String,
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

pub fn sha256_file(path: &Path) -> anyhow::Result<String> {
    let mut f = File::open(path)
        .with_context(|| format!("failed to open {}", path.to_string_lossy()))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = f
            .read(&mut buf)
            .with_context(|| format!("failed to read {}", path.to_string_lossy()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().iter().map(|b| format!("{:02x}", b)).collect())
}

/// Copies an attached file into the workspace `documents/` folder under a fresh name.
pub fn store_document(workspace: &Path, source: &Path) -> anyhow::Result<StoredDocument> {
    if !source.is_file() {
        return Err(anyhow!(
            "document not found: {}",
            source.to_string_lossy()
        ));
    }
    let name = source
        .file_name()
        .and_then(|s| s.to_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow!("document path has no file name"))?;
    let ext = source
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| format!(".{}", s.to_ascii_lowercase()))
        .unwrap_or_default();

    let dir = db::documents_dir(workspace);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create directory {}", dir.to_string_lossy()))?;
    let stored_name = format!("{}{}", Uuid::new_v4(), ext);
    let dst = dir.join(&stored_name);
    std::fs::copy(source, &dst).with_context(|| {
        format!(
            "failed to copy {} to {}",
            source.to_string_lossy(),
            dst.to_string_lossy()
        )
    })?;
    let sha256 = sha256_file(&dst)?;

    Ok(StoredDocument {
        name,
        rel_path: format!("{}/{}", db::DOCUMENTS_DIR, stored_name),
        sha256,
    })
}

/// Removes a previously stored document. Missing files are not an error.
pub fn remove_document(workspace: &Path, rel_path: &str) -> anyhow::Result<()> {
    let p = workspace.join(rel_path);
    if p.is_file() {
        std::fs::remove_file(&p)
            .with_context(|| format!("failed to remove {}", p.to_string_lossy()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir(prefix: &str) -> std::path::PathBuf {
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
    fn sha256_of_known_input() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn stored_document_keeps_content_and_digest() {
        let root = temp_dir("efsrt-documents");
        let src = root.join("Informe Final.PDF");
        std::fs::write(&src, b"abc").expect("write source");
        let workspace = root.join("ws");

        let stored = store_document(&workspace, &src).expect("store");
        assert_eq!(stored.name, "Informe Final.PDF");
        assert!(stored.rel_path.starts_with("documents/"));
        assert!(stored.rel_path.ends_with(".pdf"));
        assert_eq!(stored.sha256, sha256_hex(b"abc"));
        assert_eq!(
            std::fs::read(workspace.join(&stored.rel_path)).expect("read copy"),
            b"abc"
        );

        remove_document(&workspace, &stored.rel_path).expect("remove");
        assert!(!workspace.join(&stored.rel_path).exists());
        remove_document(&workspace, &stored.rel_path).expect("remove twice");
    }

    #[test]
    fn missing_source_is_rejected() {
        let root = temp_dir("efsrt-documents-missing");
        assert!(store_document(&root, &root.join("nope.pdf")).is_err());
    }
}

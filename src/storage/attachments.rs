//! Local filesystem sink for attachment bytes.
//!
//! Stored names are `YYYYMMDD-HHMMSS-NNNNNNNNN-<hash><ext>` where `<hash>` is the
//! hex of the first 8 bytes of the content's SHA-256. Callers only ever see paths
//! relative to the root.

use chrono::Utc;
use sha2::{Digest, Sha256};
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::models::attachment::StoredFile;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Invalid attachment path: {0}")]
    InvalidPath(String),

    #[error("Attachment not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Content-type to extension, used when the original name carries none.
const EXTENSIONS: &[(&str, &str)] = &[
    ("image/jpeg", ".jpg"),
    ("image/png", ".png"),
    ("image/gif", ".gif"),
    ("image/webp", ".webp"),
    ("application/pdf", ".pdf"),
    ("text/plain", ".txt"),
    ("text/html", ".html"),
    ("text/csv", ".csv"),
    ("application/zip", ".zip"),
    ("application/json", ".json"),
    ("application/msword", ".doc"),
    (
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        ".docx",
    ),
    ("application/vnd.ms-excel", ".xls"),
    (
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        ".xlsx",
    ),
    ("message/rfc822", ".eml"),
];

const MAX_SAVE_ATTEMPTS: usize = 5;

#[derive(Debug, Clone)]
pub struct AttachmentStore {
    root: PathBuf,
}

impl AttachmentStore {
    /// Open the store, creating `root` if it does not exist.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write `bytes` under a fresh stored name.
    pub async fn save(
        &self,
        original_name: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> Result<StoredFile, StorageError> {
        let digest = Sha256::digest(bytes);
        let hash = hex::encode(&digest[..8]);
        let ext = extension_for(original_name, content_type);

        let mut attempt = 0;
        loop {
            attempt += 1;
            let stamp = Utc::now().format("%Y%m%d-%H%M%S-%9f");
            let filename = format!("{stamp}-{hash}{ext}");
            let path = self.root.join(&filename);

            match write_new(&path, bytes).await {
                Ok(()) => {
                    debug!(file = %filename, size = bytes.len(), "Stored attachment");
                    return Ok(StoredFile {
                        file_path: filename.clone(),
                        filename,
                        original_name: original_name.to_string(),
                        content_type: content_type.to_string(),
                        size: i64::try_from(bytes.len()).unwrap_or(i64::MAX),
                    });
                }
                // Same content written within the same nanosecond.
                Err(e) if e.kind() == ErrorKind::AlreadyExists && attempt < MAX_SAVE_ATTEMPTS => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub async fn get(&self, relative: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.resolve(relative)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StorageError::NotFound(relative.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn delete(&self, relative: &str) -> Result<(), StorageError> {
        let path = self.resolve(relative)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StorageError::NotFound(relative.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn resolve(&self, relative: &str) -> Result<PathBuf, StorageError> {
        let rel = Path::new(relative);
        let plain = !relative.is_empty()
            && rel
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !plain {
            return Err(StorageError::InvalidPath(relative.to_string()));
        }
        Ok(self.root.join(rel))
    }
}

async fn write_new(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let path = path.to_path_buf();
    let bytes = bytes.to_vec();
    tokio::task::spawn_blocking(move || {
        let mut options = std::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o644);
        }
        let mut file = options.open(&path)?;
        file.write_all(&bytes)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            // Exact mode regardless of the process umask.
            file.set_permissions(std::fs::Permissions::from_mode(0o644))?;
        }
        file.sync_all()
    })
    .await
    .map_err(std::io::Error::other)?
}

/// Extension from `original_name`, else from the content-type table, else `.bin`.
fn extension_for(original_name: &str, content_type: &str) -> String {
    let from_name = Path::new(original_name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.len() <= 16 && e.chars().all(|c| c.is_ascii_alphanumeric()));

    if let Some(ext) = from_name {
        return format!(".{}", ext.to_ascii_lowercase());
    }

    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    EXTENSIONS
        .iter()
        .find(|(ct, _)| *ct == essence)
        .map_or_else(|| ".bin".to_string(), |(_, ext)| (*ext).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_rules() {
        assert_eq!(extension_for("Report.PDF", "application/octet-stream"), ".pdf");
        assert_eq!(extension_for("noext", "image/png"), ".png");
        assert_eq!(extension_for("", "text/plain; charset=utf-8"), ".txt");
        assert_eq!(extension_for("", "application/x-unknown"), ".bin");
        assert_eq!(extension_for("weird.p$f", "image/gif"), ".gif");
    }

    #[tokio::test]
    async fn root_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("nested").join("attachments");
        AttachmentStore::new(&root).unwrap();
        assert!(root.is_dir());
    }

    #[tokio::test]
    async fn save_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = AttachmentStore::new(dir.path()).unwrap();

        let stored = store
            .save("notes.txt", "text/plain", b"hello")
            .await
            .unwrap();

        // sha256("hello") = 2cf24dba5fb0a30e...
        assert!(stored.filename.ends_with("-2cf24dba5fb0a30e.txt"), "{}", stored.filename);
        assert_eq!(stored.file_path, stored.filename);
        assert_eq!(stored.size, 5);
        assert_eq!(store.get(&stored.file_path).await.unwrap(), b"hello");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let meta = std::fs::metadata(dir.path().join(&stored.file_path)).unwrap();
            assert_eq!(meta.permissions().mode() & 0o777, 0o644);
        }

        store.delete(&stored.file_path).await.unwrap();
        assert!(matches!(
            store.get(&stored.file_path).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn duplicate_names_get_distinct_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = AttachmentStore::new(dir.path()).unwrap();

        let a = store.save("same.pdf", "application/pdf", b"x").await.unwrap();
        let b = store.save("same.pdf", "application/pdf", b"x").await.unwrap();
        assert_ne!(a.file_path, b.file_path);
    }

    #[tokio::test]
    async fn traversal_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = AttachmentStore::new(dir.path()).unwrap();

        for bad in ["../etc/passwd", "/etc/passwd", "", "a/../../b"] {
            assert!(matches!(
                store.get(bad).await,
                Err(StorageError::InvalidPath(_))
            ));
        }
    }
}

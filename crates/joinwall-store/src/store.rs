//! The record store: one JSON file, one writer at a time.
//!
//! Readers get the last committed [`Document`] as an `Arc` and never wait on
//! disk I/O. Writers go through [`DocumentStore::transaction`], which holds the
//! writer lock across read-modify-write so concurrent updates cannot clobber
//! each other.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::document::Document;
use crate::error::{Result, StoreError};

const TEMP_FILE_SUFFIX: &str = ".tmp";

#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    /// Write an empty document when the file does not exist yet.
    pub create_if_missing: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            create_if_missing: true,
        }
    }
}

/// Reads and parses the record file.
pub async fn load_document(path: &Path) -> std::result::Result<Document, StoreError> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(StoreError::Missing(path.to_path_buf()));
        }
        Err(e) => return Err(StoreError::io(path, e)),
    };

    serde_json::from_slice(&bytes).map_err(|source| StoreError::Malformed {
        path: path.to_path_buf(),
        source,
    })
}

/// Serializes the whole document and replaces the file atomically.
pub async fn save_document(path: &Path, doc: &Document) -> std::result::Result<(), StoreError> {
    let json = serde_json::to_vec_pretty(doc)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| StoreError::io(parent, e))?;
    }

    let tmp = PathBuf::from(format!("{}{}", path.display(), TEMP_FILE_SUFFIX));
    fs::write(&tmp, &json)
        .await
        .map_err(|e| StoreError::io(&tmp, e))?;
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(StoreError::io(path, e));
    }
    Ok(())
}

pub struct DocumentStore {
    path: PathBuf,
    committed: RwLock<Arc<Document>>,
    writer: Mutex<()>,
}

impl DocumentStore {
    /// Opens the record file, creating an empty one if allowed.
    pub async fn open<P: AsRef<Path>>(path: P, options: StoreOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let doc = match load_document(&path).await {
            Ok(doc) => doc,
            Err(StoreError::Missing(_)) if options.create_if_missing => {
                info!(path = %path.display(), "record file missing, creating an empty one");
                let doc = Document::default();
                save_document(&path, &doc).await?;
                doc
            }
            Err(e) => return Err(e.into()),
        };

        debug!(
            path = %path.display(),
            users = doc.users.len(),
            blocked_ips = doc.settings.blocked_ips.len(),
            "record file loaded"
        );

        Ok(Self::with_document(path, doc))
    }

    /// Wraps an already loaded document without touching the disk.
    pub fn with_document(path: PathBuf, doc: Document) -> Self {
        Self {
            path,
            committed: RwLock::new(Arc::new(doc)),
            writer: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The last committed document.
    pub fn snapshot(&self) -> Arc<Document> {
        let guard = self.committed.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Runs `f` against a copy of the committed document and commits the copy
    /// once it has been written. If `f` fails or the write fails, neither the
    /// file nor the snapshot changes.
    pub async fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Document) -> Result<T>,
    {
        let _writer = self.writer.lock().await;

        let mut working = Document::clone(&self.snapshot());
        let output = f(&mut working)?;

        if let Err(e) = save_document(&self.path, &working).await {
            warn!(path = %self.path.display(), error = %e, "failed to write record file");
            return Err(e.into());
        }

        self.publish(working);
        Ok(output)
    }

    /// Writes the committed document back out unchanged.
    pub async fn save(&self) -> Result<()> {
        let _writer = self.writer.lock().await;
        save_document(&self.path, &self.snapshot()).await?;
        Ok(())
    }

    /// Replaces the committed document with what is currently on disk.
    pub async fn reload(&self) -> Result<Arc<Document>> {
        let _writer = self.writer.lock().await;
        let doc = load_document(&self.path).await?;
        self.publish(doc);
        info!(path = %self.path.display(), "record file reloaded");
        Ok(self.snapshot())
    }

    fn publish(&self, doc: Document) {
        let mut guard = self.committed.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(doc);
    }
}

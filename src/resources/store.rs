//! Byte-store seam behind the resource provider
//!
//! Resources are read from an external store; this trait is the only place
//! that knows how. `FsStore` serves a directory tree, `MemoryStore` backs
//! tests and embedded deployments.

use crate::error::{Result, ServerError};
use crate::types::{ResourceDescriptor, ResourceKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Read access to a provider's backing bytes.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// List the entries under a directory path.
    async fn list(&self, path: &str) -> Result<Vec<ResourceDescriptor>>;

    /// Read a resource in full.
    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Read the half-open window `[start, end)` of a resource.
    async fn read_range(&self, path: &str, start: u64, end: u64) -> Result<Vec<u8>>;

    /// Size and modification metadata for a single resource.
    async fn metadata(&self, path: &str) -> Result<ResourceDescriptor>;
}

/// Filesystem-backed store rooted at a directory.
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a provider path inside the root, rejecting escapes.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        for component in relative.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => {
                    return Err(ServerError::InvalidParams(format!(
                        "path '{}' escapes the store root",
                        path
                    )))
                }
            }
        }
        Ok(self.root.join(relative))
    }
}

fn map_io(path: &str, err: std::io::Error) -> ServerError {
    if err.kind() == std::io::ErrorKind::NotFound {
        ServerError::ResourceNotFound(path.to_string())
    } else {
        ServerError::Io(err)
    }
}

fn describe(name: String, meta: &std::fs::Metadata) -> ResourceDescriptor {
    ResourceDescriptor {
        name,
        kind: if meta.is_dir() {
            ResourceKind::Directory
        } else {
            ResourceKind::File
        },
        size: meta.len(),
        modified: meta.modified().ok().map(DateTime::<Utc>::from),
    }
}

#[async_trait]
impl ResourceStore for FsStore {
    async fn list(&self, path: &str) -> Result<Vec<ResourceDescriptor>> {
        let dir = self.resolve(path)?;
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| map_io(path, e))?;
        let mut listed = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| map_io(path, e))? {
            let meta = entry.metadata().await.map_err(|e| map_io(path, e))?;
            listed.push(describe(entry.file_name().to_string_lossy().into_owned(), &meta));
        }
        listed.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(listed)
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let file = self.resolve(path)?;
        tokio::fs::read(&file).await.map_err(|e| map_io(path, e))
    }

    async fn read_range(&self, path: &str, start: u64, end: u64) -> Result<Vec<u8>> {
        let resolved = self.resolve(path)?;
        let mut file = tokio::fs::File::open(&resolved)
            .await
            .map_err(|e| map_io(path, e))?;
        file.seek(std::io::SeekFrom::Start(start))
            .await
            .map_err(|e| map_io(path, e))?;
        let mut buf = Vec::with_capacity((end - start) as usize);
        let mut window = file.take(end - start);
        window
            .read_to_end(&mut buf)
            .await
            .map_err(|e| map_io(path, e))?;
        Ok(buf)
    }

    async fn metadata(&self, path: &str) -> Result<ResourceDescriptor> {
        let resolved = self.resolve(path)?;
        let meta = tokio::fs::metadata(&resolved)
            .await
            .map_err(|e| map_io(path, e))?;
        let name = resolved
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string());
        Ok(describe(name, &meta))
    }
}

/// In-memory store of flat path → bytes mappings.
///
/// Counts full reads so tests can assert that a cached second read never
/// touches the store.
#[derive(Default)]
pub struct MemoryStore {
    files: RwLock<HashMap<String, Vec<u8>>>,
    read_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<String>, content: Vec<u8>) {
        self.files
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.into(), content);
    }

    pub fn remove(&self, path: &str) {
        self.files
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(path);
    }

    /// Number of full `read` calls served so far.
    pub fn read_calls(&self) -> usize {
        self.read_calls.load(Ordering::SeqCst)
    }

    fn with_file<T>(&self, path: &str, f: impl FnOnce(&Vec<u8>) -> T) -> Result<T> {
        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        files
            .get(path)
            .map(f)
            .ok_or_else(|| ServerError::ResourceNotFound(path.to_string()))
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn list(&self, path: &str) -> Result<Vec<ResourceDescriptor>> {
        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{}/", path.trim_end_matches('/'))
        };
        let mut listed: Vec<ResourceDescriptor> = files
            .iter()
            .filter(|(name, _)| name.starts_with(&prefix))
            .map(|(name, content)| ResourceDescriptor {
                name: name.clone(),
                kind: ResourceKind::File,
                size: content.len() as u64,
                modified: None,
            })
            .collect();
        if listed.is_empty() && !path.is_empty() {
            return Err(ServerError::ResourceNotFound(path.to_string()));
        }
        listed.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(listed)
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        self.with_file(path, |content| content.clone())
    }

    async fn read_range(&self, path: &str, start: u64, end: u64) -> Result<Vec<u8>> {
        self.with_file(path, |content| {
            let len = content.len() as u64;
            let start = start.min(len) as usize;
            let end = end.min(len) as usize;
            content[start..end].to_vec()
        })
    }

    async fn metadata(&self, path: &str) -> Result<ResourceDescriptor> {
        self.with_file(path, |content| ResourceDescriptor {
            name: path.to_string(),
            kind: ResourceKind::File,
            size: content.len() as u64,
            modified: None,
        })
    }
}

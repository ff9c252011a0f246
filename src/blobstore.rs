//! Flat-file store for the voice blobs.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::Result;

/// Writes opaque audio bytes under `<root>/<id>.<extension>`.
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, id: &str, extension: &str) -> PathBuf {
        self.root.join(format!("{id}.{extension}"))
    }

    /// Persists the bytes, reporting whether the file was newly created.
    /// Callers undoing a failed insert must only remove files they created.
    pub fn write(&self, id: &str, extension: &str, bytes: &[u8]) -> Result<bool> {
        fs::create_dir_all(&self.root)?;
        let path = self.path_for(id, extension);
        let created = !path.exists();
        fs::write(&path, bytes)?;
        debug!(path = %path.display(), size = bytes.len(), "wrote voice blob");
        Ok(created)
    }

    pub fn read(&self, id: &str, extension: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.path_for(id, extension)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn remove(&self, id: &str, extension: &str) -> Result<bool> {
        match fs::remove_file(self.path_for(id, extension)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

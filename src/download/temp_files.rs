//! Scoped ownership of the local files a request creates.
//!
//! A [`TempFileSet`] lives for exactly one request. Every path the pipeline
//! writes is registered with it, and whatever is still registered when the
//! set is cleaned up or dropped is removed from disk. Removal happens once per
//! path: a path leaves the set the moment it is deleted.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

#[derive(Debug, Default)]
pub struct TempFileSet {
    files: Vec<PathBuf>,
    /// `(directory, prefix)` pairs: any entry of `directory` whose name starts
    /// with `prefix` belongs to the request (extractor fragments, `.part` files).
    prefixes: Vec<(PathBuf, String)>,
    request_id: String,
}

impl TempFileSet {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            files: Vec::new(),
            prefixes: Vec::new(),
            request_id: request_id.into(),
        }
    }

    /// Registers a file; registering the same path twice is a no-op.
    pub fn track(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if !self.files.contains(&path) {
            self.files.push(path);
        }
    }

    /// Registers every file in `dir` starting with `prefix`, including ones
    /// created after this call.
    pub fn track_prefix(&mut self, dir: impl Into<PathBuf>, prefix: impl Into<String>) {
        self.prefixes.push((dir.into(), prefix.into()));
    }

    pub fn is_tracked(&self, path: &Path) -> bool {
        self.files.iter().any(|p| p == path)
    }

    /// Number of exact paths tracked; prefix registrations are not counted.
    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Deletes one tracked file now and stops tracking it.
    ///
    /// Used when a transcoded successor supersedes the original.
    pub async fn release(&mut self, path: &Path) {
        if let Some(pos) = self.files.iter().position(|p| p == path) {
            let path = self.files.remove(pos);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => log::warn!("[{}] failed to delete {}: {}", self.request_id, path.display(), e),
            }
        }
    }

    /// Stops tracking a file without deleting it. Returns false if it was not tracked.
    pub fn keep(&mut self, path: &Path) -> bool {
        match self.files.iter().position(|p| p == path) {
            Some(pos) => {
                self.files.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Removes every remaining tracked file. Idempotent.
    ///
    /// Returns the number of files actually deleted.
    pub fn cleanup(&mut self) -> usize {
        let mut removed = 0;
        for path in std::mem::take(&mut self.files) {
            if remove_quietly(&path, &self.request_id) {
                removed += 1;
            }
        }
        for (dir, prefix) in std::mem::take(&mut self.prefixes) {
            removed += remove_by_prefix(&dir, &prefix, &self.request_id);
        }
        if removed > 0 {
            log::debug!("[{}] cleanup removed {} file(s)", self.request_id, removed);
        }
        removed
    }
}

impl TempFileSet {
    /// [`cleanup`](Self::cleanup) on the blocking pool, for async callers.
    pub async fn cleanup_async(&mut self) -> usize {
        let mut detached = TempFileSet {
            files: std::mem::take(&mut self.files),
            prefixes: std::mem::take(&mut self.prefixes),
            request_id: self.request_id.clone(),
        };
        // A failed join still drops `detached`, which removes its files.
        tokio::task::spawn_blocking(move || detached.cleanup())
            .await
            .unwrap_or(0)
    }
}

impl Drop for TempFileSet {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn remove_quietly(path: &Path, request_id: &str) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == ErrorKind::NotFound => false,
        Err(e) => {
            log::warn!("[{}] failed to delete {}: {}", request_id, path.display(), e);
            false
        }
    }
}

fn remove_by_prefix(dir: &Path, prefix: &str, request_id: &str) -> usize {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };
    entries
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(prefix))
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter(|entry| remove_quietly(&entry.path(), request_id))
        .count()
}

//! Shared log store for echolog
//!
//! The store is one file holding the raw concatenation of every appended
//! message and timestamp line. Appends and full reads are only reachable
//! through [`LogStore::lock`], so every caller holds the store mutex while
//! touching the file. A connection worker keeps one guard across its append
//! and its read-back, which is what makes its echo include its own message.

use bytes::Bytes;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Mutex-protected append-only log backed by a single file
#[derive(Debug)]
pub struct LogStore {
    path: PathBuf,
    file: Mutex<LogFile>,
}

/// Handle to the backing file, reachable only while holding the store mutex
#[derive(Debug)]
pub struct LogFile {
    path: PathBuf,
}

impl LogStore {
    /// Describe a store at `path` without touching the filesystem
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            file: Mutex::new(LogFile { path: path.clone() }),
            path,
        }
    }

    /// Create the store, truncating any existing file at `path`
    pub async fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let store = Self::new(path);
        store.reset().await?;
        Ok(store)
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquire the store mutex
    pub async fn lock(&self) -> MutexGuard<'_, LogFile> {
        self.file.lock().await
    }

    /// Create the backing file, or truncate it to empty
    pub async fn reset(&self) -> io::Result<()> {
        let guard = self.lock().await;
        File::create(&guard.path).await?;
        debug!(path = %guard.path.display(), "log store reset");
        Ok(())
    }

    /// Remove the backing file. A file that is already gone counts as removed.
    pub async fn destroy(&self) -> io::Result<()> {
        let guard = self.lock().await;
        match tokio::fs::remove_file(&guard.path).await {
            Ok(()) => {
                debug!(path = %guard.path.display(), "log store removed");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl LogFile {
    /// Append `bytes` in full to the end of the log
    pub async fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut file = OpenOptions::new().append(true).open(&self.path).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        Ok(())
    }

    /// Read the whole log from its first byte
    pub async fn read_all(&mut self) -> io::Result<Bytes> {
        let mut file = File::open(&self.path).await?;
        let mut content = Vec::new();
        file.read_to_end(&mut content).await?;
        Ok(Bytes::from(content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_create_truncates_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data");
        std::fs::write(&path, "stale content\n").unwrap();

        let store = LogStore::create(&path).await.unwrap();
        let content = store.lock().await.read_all().await.unwrap();
        assert!(content.is_empty());
    }

    #[tokio::test]
    async fn test_append_then_read_all() {
        let dir = tempdir().unwrap();
        let store = LogStore::create(dir.path().join("data")).await.unwrap();

        let mut log = store.lock().await;
        log.append(b"first\n").await.unwrap();
        log.append(b"second\n").await.unwrap();
        assert_eq!(&log.read_all().await.unwrap()[..], b"first\nsecond\n");
    }

    #[tokio::test]
    async fn test_reset_empties_log() {
        let dir = tempdir().unwrap();
        let store = LogStore::create(dir.path().join("data")).await.unwrap();
        store.lock().await.append(b"hello\n").await.unwrap();

        store.reset().await.unwrap();
        assert!(store.lock().await.read_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_destroy_removes_file_and_is_repeatable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data");
        let store = LogStore::create(&path).await.unwrap();
        assert!(path.exists());

        store.destroy().await.unwrap();
        assert!(!path.exists());
        store.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn test_append_after_destroy_fails() {
        let dir = tempdir().unwrap();
        let store = LogStore::create(dir.path().join("data")).await.unwrap();
        store.destroy().await.unwrap();

        let err = store.lock().await.append(b"late\n").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_create_in_missing_directory_fails() {
        let dir = tempdir().unwrap();
        let result = LogStore::create(dir.path().join("missing").join("data")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_appends_never_interleave() {
        let dir = tempdir().unwrap();
        let store = Arc::new(LogStore::create(dir.path().join("data")).await.unwrap());

        let mut handles = vec![];
        for i in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let line = format!("{}\n", i.to_string().repeat(512));
                store.lock().await.append(line.as_bytes()).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let content = store.lock().await.read_all().await.unwrap();
        let text = String::from_utf8(content.to_vec()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 16);
        for line in lines {
            let first = &line[..line.len() / 512];
            assert_eq!(line, first.repeat(512));
        }
    }
}

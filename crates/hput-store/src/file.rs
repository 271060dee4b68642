//! Directory-backed runnable store.
//!
//! Each runnable lives in its own JSON record inside the store directory:
//!
//! ```text
//! hput.db/
//! ├── 1f0e…c3a9.json      {"path": "/greet", "payload": …}
//! └── 8b2d…04e1.json      {"path": "/a/x", "payload": …}
//! ```
//!
//! File names are the hex SHA-256 of the request path, so every path, however
//! long, maps to a fixed-length valid file name. The record itself carries the
//! path; prefix scans read it from there. Writes go to a temporary file first
//! and are renamed into place, so readers never observe a half-written record.

use crate::{Saver, StreamEvent};
use async_trait::async_trait;
use hput_common::{HputError, Payload, Result, Runnable};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, mpsc};

const RECORD_EXTENSION: &str = "json";

/// Runnables persisted as files under one directory.
pub struct FileSaver {
    root: PathBuf,
    /// Serialises writers so reading the old record and renaming the new one
    /// are one step.
    write_lock: Mutex<()>,
}

impl FileSaver {
    /// Opens (creating if needed) a store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or `root` exists
    /// but is not a directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| {
            HputError::Storage(format!("cannot create store at {}: {}", root.display(), e))
        })?;
        if !root.is_dir() {
            return Err(HputError::Storage(format!(
                "store root {} is not a directory",
                root.display()
            )));
        }
        tracing::info!(path = %root.display(), "opened file store");
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, path: &str) -> PathBuf {
        self.root
            .join(format!("{}.{}", record_name(path), RECORD_EXTENSION))
    }

    async fn read_record(&self, file: &Path) -> Result<Option<Runnable>> {
        let bytes = match tokio::fs::read(file).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(HputError::Storage(format!(
                    "cannot read record {}: {}",
                    file.display(),
                    e
                )));
            }
        };
        let runnable = serde_json::from_slice(&bytes).map_err(|e| {
            HputError::Storage(format!("corrupt record {}: {}", file.display(), e))
        })?;
        Ok(Some(runnable))
    }

    async fn scan(&self, prefix: &str, sink: &mpsc::Sender<StreamEvent>) -> Result<bool> {
        let mut dir = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = dir.next_entry().await? {
            let file = entry.path();
            if !is_record(&file) {
                continue;
            }
            // A record removed between listing and reading is skipped.
            let Some(runnable) = self.read_record(&file).await? else {
                continue;
            };
            if !runnable.path.starts_with(prefix) {
                continue;
            }
            if sink.send(StreamEvent::Runnable(runnable)).await.is_err() {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[async_trait]
impl Saver for FileSaver {
    async fn put(&self, payload: Payload, path: &str) -> Result<Option<Payload>> {
        let record = serde_json::to_vec(&Runnable::new(path, payload))?;
        let target = self.record_path(path);
        let staging = target.with_extension("tmp");

        let _guard = self.write_lock.lock().await;
        let replaced = self.read_record(&target).await?.map(|r| r.payload);
        tokio::fs::write(&staging, &record).await.map_err(|e| {
            HputError::Storage(format!("cannot write record for {}: {}", path, e))
        })?;
        tokio::fs::rename(&staging, &target).await.map_err(|e| {
            HputError::Storage(format!("cannot commit record for {}: {}", path, e))
        })?;
        tracing::debug!(path, overwrote = replaced.is_some(), "file store saved record");
        Ok(replaced)
    }

    async fn get(&self, path: &str) -> Result<Option<Runnable>> {
        let runnable = self.read_record(&self.record_path(path)).await?;
        Ok(runnable.filter(|r| r.path == path))
    }

    async fn stream_by_prefix(&self, prefix: &str, sink: mpsc::Sender<StreamEvent>) -> Result<()> {
        match self.scan(prefix, &sink).await {
            Ok(true) => {
                let _ = sink.send(StreamEvent::Done).await;
                Ok(())
            }
            Ok(false) => {
                tracing::debug!("file stream: consumer went away for prefix {}", prefix);
                Ok(())
            }
            Err(e) => {
                tracing::error!("file stream: scan of {} failed: {}", prefix, e);
                let _ = sink.send(StreamEvent::Failed(e.to_string())).await;
                Err(e)
            }
        }
    }
}

/// Hex SHA-256 of `path`, the record's file stem.
fn record_name(path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    hex::encode(hasher.finalize())
}

/// Committed records only; staging and stray files are skipped.
fn is_record(file: &Path) -> bool {
    file.extension().is_some_and(|ext| ext == RECORD_EXTENSION)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{collect_stream, stream_channel};
    use hput_common::Kind;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn open_temp() -> (tempfile::TempDir, FileSaver) {
        let dir = tempfile::tempdir().unwrap();
        let saver = FileSaver::open(dir.path().join("hput.db")).unwrap();
        (dir, saver)
    }

    #[test]
    fn test_record_names_have_fixed_length() {
        let short = record_name("/");
        let long = record_name(&format!("/{}", "a".repeat(4096)));
        assert_eq!(short.len(), 64);
        assert_eq!(long.len(), 64);
        assert_ne!(short, record_name("/a"));
        assert!(hex::decode(&long).is_ok());
    }

    #[test]
    fn test_staging_files_are_not_records() {
        assert!(!is_record(Path::new("/x/2f61.tmp")));
        assert!(is_record(Path::new("/x/2f61.json")));
    }

    #[tokio::test]
    async fn test_put_get_binary() {
        let (_dir, saver) = open_temp();
        let bytes = vec![0u8, 0xff, 0xfe, 7];
        assert!(saver.put(Payload::Binary(bytes.clone()), "/img").await.unwrap().is_none());

        let runnable = saver.get("/img").await.unwrap().unwrap();
        assert_eq!(runnable.kind(), Kind::Binary);
        assert_eq!(runnable.as_bytes(), bytes.as_slice());
    }

    #[tokio::test]
    async fn test_overwrite_is_reported_and_replaces() {
        let (_dir, saver) = open_temp();
        assert!(saver.put(Payload::Script("'hi ' + 1".into()), "/greet").await.unwrap().is_none());
        assert_eq!(
            saver.put(Payload::Text("bye".into()), "/greet").await.unwrap(),
            Some(Payload::Script("'hi ' + 1".into()))
        );

        let runnable = saver.get("/greet").await.unwrap().unwrap();
        assert_eq!(runnable.payload, Payload::Text("bye".into()));
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("store");
        {
            let saver = FileSaver::open(&root).unwrap();
            saver.put(Payload::Text("kept".into()), "/keep").await.unwrap();
        }
        let saver = FileSaver::open(&root).unwrap();
        let runnable = saver.get("/keep").await.unwrap().unwrap();
        assert_eq!(runnable.text(), Some("kept"));
    }

    #[tokio::test]
    async fn test_stream_by_prefix() {
        let (_dir, saver) = open_temp();
        saver.put(Payload::Text("x".into()), "/a/x").await.unwrap();
        saver.put(Payload::Text("y".into()), "/a/y").await.unwrap();
        saver.put(Payload::Text("z".into()), "/b/z").await.unwrap();

        let (tx, rx) = stream_channel();
        saver.stream_by_prefix("/a", tx).await.unwrap();
        let paths: HashSet<String> = collect_stream(rx)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.path)
            .collect();
        assert_eq!(paths, HashSet::from(["/a/x".to_string(), "/a/y".to_string()]));
    }

    #[tokio::test]
    async fn test_corrupt_record_is_a_backend_fault() {
        let (_dir, saver) = open_temp();
        tokio::fs::write(saver.record_path("/bad"), b"not json")
            .await
            .unwrap();
        let err = saver.get("/bad").await.unwrap_err();
        assert!(matches!(err, HputError::Storage(_)));
        assert!(err.to_string().contains("corrupt record"));
    }

    #[tokio::test]
    async fn test_failed_scan_signals_failure() {
        let (_dir, saver) = open_temp();
        tokio::fs::write(saver.record_path("/a/bad"), b"{").await.unwrap();

        let (tx, rx) = stream_channel();
        assert!(saver.stream_by_prefix("/a", tx).await.is_err());
        assert!(matches!(collect_stream(rx).await, Err(HputError::Storage(_))));
    }

    #[tokio::test]
    async fn test_long_paths_are_stored() {
        let (_dir, saver) = open_temp();
        let long = format!("/{}", "a".repeat(1024));
        assert!(saver.put(Payload::Text("x".into()), &long).await.unwrap().is_none());

        let runnable = saver.get(&long).await.unwrap().unwrap();
        assert_eq!(runnable.path, long);
        assert_eq!(runnable.text(), Some("x"));

        let (tx, rx) = stream_channel();
        saver.stream_by_prefix("/aaaa", tx).await.unwrap();
        let streamed = collect_stream(rx).await.unwrap();
        assert_eq!(streamed.len(), 1);
        assert_eq!(streamed[0].path, long);
    }

    #[tokio::test]
    async fn test_get_of_missing_long_path_is_none() {
        let (_dir, saver) = open_temp();
        let long = format!("/{}", "b".repeat(1024));
        assert!(saver.get(&long).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_writers_see_one_fresh_write() {
        let (_dir, saver) = open_temp();
        let saver = Arc::new(saver);
        let mut handles = Vec::new();
        for i in 0..8 {
            let saver = Arc::clone(&saver);
            handles.push(tokio::spawn(async move {
                saver.put(Payload::Text(i.to_string()), "/race").await.unwrap()
            }));
        }
        let mut fresh = 0;
        let mut replaced = HashSet::new();
        for handle in handles {
            match handle.await.unwrap() {
                None => fresh += 1,
                Some(Payload::Text(previous)) => assert!(replaced.insert(previous)),
                Some(other) => panic!("unexpected payload {other:?}"),
            }
        }
        assert_eq!(fresh, 1);
        assert_eq!(replaced.len(), 7);
    }
}

//! Flat-file dedup store.
//!
//! Format: a JSON array of `[message_id, thread_id]` pairs. Every insert
//! rewrites the whole file through a temp file + rename, so a crash mid-write
//! leaves the previous version intact. Ids are stored as fetched, in their
//! bracketed `<local@domain>` form.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use super::{DedupStore, IdHashing};
use crate::error::StoreError;

type Pair = (String, String);

/// Dedup store persisted as a JSON list of pairs.
pub struct FileDedupStore {
    path: PathBuf,
    hashing: IdHashing,
    pairs: Mutex<BTreeSet<Pair>>,
    /// Serializes file rewrites so an older snapshot never lands last.
    writer: tokio::sync::Mutex<()>,
}

impl FileDedupStore {
    /// Open the store at `path`.
    ///
    /// A missing file is created empty. An unreadable or corrupt file yields
    /// an empty set; the next insert overwrites it.
    pub fn open(path: impl Into<PathBuf>, hashing: IdHashing) -> Self {
        let path = path.into();
        let pairs = match load(&path) {
            Ok(Some(pairs)) => {
                info!(path = %path.display(), count = pairs.len(), "Loaded processed email pairs");
                pairs
            }
            Ok(None) => {
                debug!(path = %path.display(), "Creating new dedup file");
                if let Err(e) = persist(&path, &BTreeSet::new()) {
                    error!(path = %path.display(), error = %e, "Failed to create dedup file");
                }
                BTreeSet::new()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Dedup file unreadable, starting empty");
                BTreeSet::new()
            }
        };

        Self {
            path,
            hashing,
            pairs: Mutex::new(pairs),
            writer: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of recorded pairs.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeSet<Pair>> {
        // A poisoned set is still a valid set.
        self.pairs.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn key(&self, message_id: &str, thread_id: &str) -> Pair {
        (self.hashing.key(message_id), self.hashing.key(thread_id))
    }
}

fn io_err(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Read the file. `Ok(None)` when it does not exist.
fn load(path: &Path) -> Result<Option<BTreeSet<Pair>>, StoreError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_err(path, e)),
    };
    let list: Vec<Pair> = serde_json::from_str(&raw)?;
    Ok(Some(list.into_iter().collect()))
}

fn persist(path: &Path, pairs: &BTreeSet<Pair>) -> Result<(), StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    let list: Vec<[&str; 2]> = pairs.iter().map(|(m, t)| [m.as_str(), t.as_str()]).collect();
    let body = serde_json::to_string_pretty(&list)?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, body).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| io_err(path, e))?;
    Ok(())
}

#[async_trait]
impl DedupStore for FileDedupStore {
    async fn is_processed(&self, message_id: &str, thread_id: &str) -> Result<bool, StoreError> {
        let key = self.key(message_id, thread_id);
        Ok(self.lock().contains(&key))
    }

    /// Write failures are logged only; the in-memory set stays authoritative
    /// and the next insert retries the full rewrite.
    async fn mark_processed(&self, message_id: &str, thread_id: &str) -> Result<(), StoreError> {
        let key = self.key(message_id, thread_id);
        let _writing = self.writer.lock().await;
        let snapshot = {
            let mut pairs = self.lock();
            if !pairs.insert(key) {
                return Ok(());
            }
            pairs.clone()
        };

        // File I/O stays off the async worker threads.
        let target = self.path.clone();
        let count = snapshot.len();
        let result = tokio::task::spawn_blocking(move || persist(&target, &snapshot))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))
            .and_then(|r| r);
        match result {
            Ok(()) => debug!(count, "Saved processed pairs"),
            Err(e) => error!(path = %self.path.display(), error = %e, "Failed to save dedup file"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fresh_store_reports_nothing_processed() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileDedupStore::open(tmp.path().join("sent.json"), IdHashing::Plain);
        assert!(!store.is_processed("m1", "t1").await.unwrap());
        assert!(store.is_empty());
        // The empty file is created on open.
        let raw = std::fs::read_to_string(tmp.path().join("sent.json")).unwrap();
        assert_eq!(raw.trim(), "[]");
    }

    #[tokio::test]
    async fn marking_twice_keeps_one_entry() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileDedupStore::open(tmp.path().join("sent.json"), IdHashing::Plain);
        store.mark_processed("m1", "t1").await.unwrap();
        store.mark_processed("m1", "t1").await.unwrap();
        assert!(store.is_processed("m1", "t1").await.unwrap());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn pair_must_match_exactly() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileDedupStore::open(tmp.path().join("sent.json"), IdHashing::Plain);
        store.mark_processed("m1", "t1").await.unwrap();
        assert!(!store.is_processed("m1", "t2").await.unwrap());
        assert!(!store.is_processed("m2", "t1").await.unwrap());
    }

    #[tokio::test]
    async fn survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("sent.json");
        {
            let store = FileDedupStore::open(&path, IdHashing::Plain);
            store.mark_processed("m1", "t1").await.unwrap();
            store.mark_processed("m2", "t1").await.unwrap();
        }
        let store = FileDedupStore::open(&path, IdHashing::Plain);
        assert_eq!(store.len(), 2);
        assert!(store.is_processed("m2", "t1").await.unwrap());
    }

    #[tokio::test]
    async fn file_is_list_of_pairs() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("sent.json");
        let store = FileDedupStore::open(&path, IdHashing::Plain);
        store.mark_processed("<a@x>", "<a@x>").await.unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let parsed: Vec<Vec<String>> = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed, vec![vec!["<a@x>".to_string(), "<a@x>".to_string()]]);
    }

    #[tokio::test]
    async fn corrupt_file_starts_empty_and_recovers() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("sent.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = FileDedupStore::open(&path, IdHashing::Plain);
        assert!(store.is_empty());
        assert!(!store.is_processed("m1", "t1").await.unwrap());

        store.mark_processed("m1", "t1").await.unwrap();
        let reopened = FileDedupStore::open(&path, IdHashing::Plain);
        assert!(reopened.is_processed("m1", "t1").await.unwrap());
    }

    #[tokio::test]
    async fn hashed_store_never_writes_raw_ids() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("sent.json");
        let store = FileDedupStore::open(&path, IdHashing::Sha256);
        store.mark_processed("<secret@x>", "<thread@x>").await.unwrap();

        assert!(store.is_processed("<secret@x>", "<thread@x>").await.unwrap());
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("secret"));
        assert!(raw.contains(&super::super::sha256_hex("<secret@x>")));
    }

    #[tokio::test]
    async fn failed_write_keeps_memory_authoritative() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("sent.json");
        let store = FileDedupStore::open(&path, IdHashing::Plain);

        // A directory at the target makes the rename fail.
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();
        store.mark_processed("<m1@x>", "<m1@x>").await.unwrap();
        assert!(store.is_processed("<m1@x>", "<m1@x>").await.unwrap());
        assert!(path.is_dir());

        std::fs::remove_dir(&path).unwrap();
        store.mark_processed("<m2@x>", "<m1@x>").await.unwrap();

        let reopened = FileDedupStore::open(&path, IdHashing::Plain);
        assert_eq!(reopened.len(), 2);
        assert!(reopened.is_processed("<m1@x>", "<m1@x>").await.unwrap());
        assert!(reopened.is_processed("<m2@x>", "<m1@x>").await.unwrap());
    }

    #[tokio::test]
    async fn reads_files_written_by_earlier_deployments() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("sent_drafts.json");
        std::fs::write(
            &path,
            "[\n  [\n    \"<m1@x>\",\n    \"<m1@x>\"\n  ],\n  [\n    \"<m2@x>\",\n    \"<m1@x>\"\n  ]\n]",
        )
        .unwrap();
        let store = FileDedupStore::open(&path, IdHashing::Plain);
        assert_eq!(store.len(), 2);

        let raw = "From: bob@example.com\r\nSubject: Re: hi\r\nMessage-ID: <m2@x>\r\nIn-Reply-To: <m1@x>\r\n\r\nThanks\r\n";
        let email = crate::transport::message::parse_email(raw.as_bytes()).unwrap();
        assert!(store.is_processed(&email.id, &email.thread_id).await.unwrap());
    }

    #[tokio::test]
    async fn creates_missing_parent_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested/dir/sent.json");
        let store = FileDedupStore::open(&path, IdHashing::Plain);
        store.mark_processed("m1", "t1").await.unwrap();
        assert!(path.exists());
    }
}

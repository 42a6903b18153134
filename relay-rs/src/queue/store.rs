//! Durable queue storage
//!
//! [`QueueStore`] is the only channel between the session engine (which
//! creates records) and the scheduler (which updates and deletes them).
//! Records are never edited in place: every update rewrites the full record.

use crate::error::{RelayError, Result};
use crate::queue::message::{generate_id, is_valid_id, QueuedMessage};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::ffi::OsStr;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const RECORD_EXTENSION: &str = "json";
const TEMP_PREFIX: &str = ".tmp_";

#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Assign an id to `message` and persist it. Returns the stored record.
    async fn create(&self, message: QueuedMessage) -> Result<QueuedMessage>;

    /// Every stored record, in no particular order
    async fn list_all(&self) -> Result<Vec<QueuedMessage>>;

    /// Rewrite the record with the same id
    async fn update(&self, message: &QueuedMessage) -> Result<()>;

    async fn delete(&self, id: &str) -> Result<()>;
}

fn prepare_new(mut message: QueuedMessage) -> Result<QueuedMessage> {
    if message.to.is_empty() {
        return Err(RelayError::Queue("message has no recipients".to_string()));
    }

    message.id = generate_id(&message.from, Utc::now());
    Ok(message)
}

fn check_id(id: &str) -> Result<()> {
    if is_valid_id(id) {
        Ok(())
    } else {
        Err(RelayError::Queue(format!("invalid message id: {:?}", id)))
    }
}

/// One JSON file per message in a spool directory.
///
/// Writes go to `.tmp_<id>.json` first and are renamed into place, so a
/// concurrent `list_all` never observes a half-written record.
pub struct FileQueueStore {
    spool_dir: PathBuf,
}

impl FileQueueStore {
    /// Open the spool, creating the directory if needed
    pub async fn open<P: AsRef<Path>>(spool_dir: P) -> Result<Self> {
        let spool_dir = spool_dir.as_ref().to_path_buf();
        fs::create_dir_all(&spool_dir).await.map_err(|e| {
            RelayError::Queue(format!("Failed to create spool {:?}: {}", spool_dir, e))
        })?;

        info!("Queue spool at {}", spool_dir.display());
        Ok(Self { spool_dir })
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.spool_dir.join(format!("{}.{}", id, RECORD_EXTENSION))
    }

    async fn write_record(&self, message: &QueuedMessage) -> Result<()> {
        let data = serde_json::to_vec_pretty(message)?;

        let tmp_path = self
            .spool_dir
            .join(format!("{}{}.{}", TEMP_PREFIX, message.id, RECORD_EXTENSION));
        let path = self.record_path(&message.id);

        fs::write(&tmp_path, data).await?;
        if let Err(e) = fs::rename(&tmp_path, &path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }

        Ok(())
    }
}

#[async_trait]
impl QueueStore for FileQueueStore {
    async fn create(&self, message: QueuedMessage) -> Result<QueuedMessage> {
        let message = prepare_new(message)?;
        self.write_record(&message).await?;

        info!(
            "Queued message {} from {} to {} recipient(s)",
            message.id,
            message.from,
            message.to.len()
        );
        Ok(message)
    }

    async fn list_all(&self) -> Result<Vec<QueuedMessage>> {
        let mut entries = fs::read_dir(&self.spool_dir).await?;
        let mut messages = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();

            if file_name.starts_with(TEMP_PREFIX)
                || path.extension().and_then(|ext| ext.to_str()) != Some(RECORD_EXTENSION)
            {
                continue;
            }

            let data = match fs::read(&path).await {
                Ok(data) => data,
                // Deleted between read_dir and read
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            match serde_json::from_slice::<QueuedMessage>(&data) {
                Ok(message) if path.file_stem() == Some(OsStr::new(&message.id)) => {
                    messages.push(message)
                }
                Ok(message) => {
                    warn!(
                        "Skipping {}: record id {:?} does not match file name",
                        path.display(),
                        message.id
                    );
                }
                Err(e) => {
                    warn!("Skipping unreadable record {}: {}", path.display(), e);
                }
            }
        }

        debug!("Loaded {} queued message(s)", messages.len());
        Ok(messages)
    }

    async fn update(&self, message: &QueuedMessage) -> Result<()> {
        check_id(&message.id)?;

        if fs::metadata(self.record_path(&message.id)).await.is_err() {
            return Err(RelayError::Queue(format!("no such message: {}", message.id)));
        }

        self.write_record(message).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        check_id(id)?;

        match fs::remove_file(self.record_path(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(RelayError::Queue(format!("no such message: {}", id)))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory store for tests and ephemeral setups
#[derive(Default)]
pub struct MemoryQueueStore {
    messages: RwLock<HashMap<String, QueuedMessage>>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.messages.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.messages.read().await.is_empty()
    }

    pub async fn get(&self, id: &str) -> Option<QueuedMessage> {
        self.messages.read().await.get(id).cloned()
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn create(&self, message: QueuedMessage) -> Result<QueuedMessage> {
        let message = prepare_new(message)?;
        self.messages
            .write()
            .await
            .insert(message.id.clone(), message.clone());
        Ok(message)
    }

    async fn list_all(&self) -> Result<Vec<QueuedMessage>> {
        Ok(self.messages.read().await.values().cloned().collect())
    }

    async fn update(&self, message: &QueuedMessage) -> Result<()> {
        match self.messages.write().await.get_mut(&message.id) {
            Some(stored) => {
                *stored = message.clone();
                Ok(())
            }
            None => Err(RelayError::Queue(format!("no such message: {}", message.id))),
        }
    }

    async fn delete(&self, id: &str) -> Result<()> {
        match self.messages.write().await.remove(id) {
            Some(_) => Ok(()),
            None => Err(RelayError::Queue(format!("no such message: {}", id))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn sample() -> QueuedMessage {
        QueuedMessage::new(
            "a@b",
            vec!["c@d".to_string()],
            "Subject: hi\r\n\r\nbody\r\n",
        )
    }

    #[tokio::test]
    async fn test_create_assigns_id_and_is_due() {
        let dir = TempDir::new().unwrap();
        let store = FileQueueStore::open(dir.path()).await.unwrap();

        let stored = store.create(sample()).await.unwrap();

        assert!(!stored.id.is_empty());
        assert_eq!(stored.attempts, 0);
        assert!(stored.next_attempt_at <= Utc::now());
        assert!(dir.path().join(format!("{}.json", stored.id)).exists());

        let listed = store.list_all().await.unwrap();
        assert_eq!(listed, vec![stored]);
    }

    #[tokio::test]
    async fn test_create_rejects_empty_recipients() {
        let dir = TempDir::new().unwrap();
        let store = FileQueueStore::open(dir.path()).await.unwrap();

        let result = store
            .create(QueuedMessage::new("a@b", Vec::new(), "x\r\n"))
            .await;
        assert!(matches!(result, Err(RelayError::Queue(_))));
        assert!(store.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let dir = TempDir::new().unwrap();
        let store = FileQueueStore::open(dir.path()).await.unwrap();

        let first = store.create(sample()).await.unwrap();
        let second = store.create(sample()).await.unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(store.list_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_open_creates_spool_dir() {
        let dir = TempDir::new().unwrap();
        let spool = dir.path().join("nested").join("spool");

        let store = FileQueueStore::open(&spool).await.unwrap();
        assert!(spool.is_dir());

        let stored = store.create(sample()).await.unwrap();
        assert!(spool.join(format!("{}.json", stored.id)).is_file());
    }

    #[tokio::test]
    async fn test_create_accepts_very_long_sender() {
        let dir = TempDir::new().unwrap();
        let store = FileQueueStore::open(dir.path()).await.unwrap();

        let sender = format!("{}@{}.example.com", "a".repeat(120), "b".repeat(117));
        assert_eq!(sender.len(), 250);

        let stored = store
            .create(QueuedMessage::new(sender.clone(), vec!["c@d".to_string()], "x\r\n"))
            .await
            .unwrap();

        let listed = store.list_all().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, stored.id);
        assert_eq!(listed[0].from, sender);
    }

    #[tokio::test]
    async fn test_update_rewrites_full_record() {
        let dir = TempDir::new().unwrap();
        let store = FileQueueStore::open(dir.path()).await.unwrap();

        let mut stored = store.create(sample()).await.unwrap();
        stored.record_failure("connect refused", Utc::now(), Duration::minutes(15));
        store.update(&stored).await.unwrap();

        // Reopen to prove the state survives a restart
        let reopened = FileQueueStore::open(dir.path()).await.unwrap();
        let listed = reopened.list_all().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].attempts, 1);
        assert_eq!(listed[0].last_error.as_deref(), Some("connect refused"));
        assert_eq!(listed[0].next_attempt_at, stored.next_attempt_at);
    }

    #[tokio::test]
    async fn test_update_missing_record_fails() {
        let dir = TempDir::new().unwrap();
        let store = FileQueueStore::open(dir.path()).await.unwrap();

        let mut ghost = sample();
        ghost.id = "1-ghost-00000000".to_string();
        assert!(store.update(&ghost).await.is_err());
        assert!(store.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_removes_record() {
        let dir = TempDir::new().unwrap();
        let store = FileQueueStore::open(dir.path()).await.unwrap();

        let stored = store.create(sample()).await.unwrap();
        store.delete(&stored.id).await.unwrap();

        assert!(store.list_all().await.unwrap().is_empty());
        assert!(store.delete(&stored.id).await.is_err());
    }

    #[tokio::test]
    async fn test_rejects_path_traversal_ids() {
        let dir = TempDir::new().unwrap();
        let store = FileQueueStore::open(dir.path()).await.unwrap();

        assert!(store.delete("../outside").await.is_err());
    }

    #[tokio::test]
    async fn test_list_skips_temp_and_corrupt_files() {
        let dir = TempDir::new().unwrap();
        let store = FileQueueStore::open(dir.path()).await.unwrap();
        let stored = store.create(sample()).await.unwrap();

        std::fs::write(dir.path().join(".tmp_partial.json"), b"{\"id\":").unwrap();
        std::fs::write(dir.path().join("garbage.json"), b"not json").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"hello").unwrap();

        let listed = store.list_all().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, stored.id);
    }

    #[tokio::test]
    async fn test_memory_store_lifecycle() {
        let store = MemoryQueueStore::new();

        let mut stored = store.create(sample()).await.unwrap();
        assert_eq!(store.len().await, 1);

        stored.attempts = 3;
        store.update(&stored).await.unwrap();
        assert_eq!(store.get(&stored.id).await.unwrap().attempts, 3);

        store.delete(&stored.id).await.unwrap();
        assert!(store.is_empty().await);
    }
}

//! Directory-backed message store
//!
//! Every message is one JSON file named `{sequence}-{hex(message id)}.json`.
//! The zero-padded sequence keeps lexical order equal to enqueue order, so the
//! queue can be rebuilt from a directory listing after a restart. A claimed
//! message keeps its file until the claimant removes or rewrites it.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use indexmap::IndexMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use esb_common::{StoreError, StoredMessage};

use crate::store::MessageStore;

const EXTENSION: &str = "json";

struct Index {
    files: IndexMap<String, PathBuf>,
    claimed: HashSet<String>,
    next_seq: u64,
}

pub struct FileMessageStore {
    name: String,
    dir: PathBuf,
    index: Mutex<Index>,
}

impl FileMessageStore {
    /// Open (or create) a store rooted at `dir`, reloading persisted messages
    pub async fn open(name: impl Into<String>, dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let name = name.into();
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;

        let mut found: Vec<(u64, String, PathBuf)> = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            let Some(seq) = parse_sequence(&path) else {
                warn!(store = %name, path = %path.display(), "Skipping file with unexpected name");
                continue;
            };
            match read_message(&path).await {
                Ok(message) => found.push((seq, message.message_id, path)),
                Err(e) => {
                    warn!(store = %name, path = %path.display(), error = %e, "Skipping unreadable message file");
                }
            }
        }

        found.sort_by_key(|(seq, _, _)| *seq);
        let next_seq = found.last().map(|(seq, _, _)| seq + 1).unwrap_or(0);
        let files: IndexMap<String, PathBuf> = found
            .into_iter()
            .map(|(_, id, path)| (id, path))
            .collect();

        info!(store = %name, dir = %dir.display(), messages = files.len(), "Opened file message store");

        Ok(Self {
            name,
            dir,
            index: Mutex::new(Index {
                files,
                claimed: HashSet::new(),
                next_seq,
            }),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl MessageStore for FileMessageStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn enqueue(&self, message: StoredMessage) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(&message)?;

        let mut index = self.index.lock().await;
        if let Some(previous) = index.files.shift_remove(&message.message_id) {
            remove_file(&previous).await?;
        }

        let seq = index.next_seq;
        index.next_seq += 1;
        let path = self.dir.join(format!(
            "{:020}-{}.{}",
            seq,
            hex::encode(message.message_id.as_bytes()),
            EXTENSION
        ));

        // only complete files ever carry the .json extension
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!(store = %self.name, message_id = %message.message_id, seq, "Persisted message");
        index.claimed.remove(&message.message_id);
        index.files.insert(message.message_id, path);
        Ok(())
    }

    async fn dequeue_next(&self) -> Result<Option<StoredMessage>, StoreError> {
        let mut index = self.index.lock().await;
        let next = index
            .files
            .iter()
            .find(|(id, _)| !index.claimed.contains(*id))
            .map(|(id, path)| (id.clone(), path.clone()));
        let Some((message_id, path)) = next else {
            return Ok(None);
        };
        let message = read_message(&path).await?;
        index.claimed.insert(message_id);
        Ok(Some(message))
    }

    async fn release(&self, message_id: &str) -> Result<(), StoreError> {
        self.index.lock().await.claimed.remove(message_id);
        Ok(())
    }

    async fn peek(&self) -> Result<Option<StoredMessage>, StoreError> {
        let index = self.index.lock().await;
        match index.files.first() {
            Some((_, path)) => Ok(Some(read_message(path).await?)),
            None => Ok(None),
        }
    }

    async fn remove(&self, message_id: &str) -> Result<Option<StoredMessage>, StoreError> {
        let mut index = self.index.lock().await;
        index.claimed.remove(message_id);
        let Some(path) = index.files.shift_remove(message_id) else {
            return Ok(None);
        };
        let message = read_message(&path).await?;
        remove_file(&path).await?;
        Ok(Some(message))
    }

    async fn get(&self, message_id: &str) -> Result<Option<StoredMessage>, StoreError> {
        let index = self.index.lock().await;
        match index.files.get(message_id) {
            Some(path) => Ok(Some(read_message(path).await?)),
            None => Ok(None),
        }
    }

    async fn size(&self) -> Result<usize, StoreError> {
        Ok(self.index.lock().await.files.len())
    }

    async fn list_ids(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.index.lock().await.files.keys().cloned().collect())
    }

    async fn clear(&self) -> Result<usize, StoreError> {
        let mut index = self.index.lock().await;
        let count = index.files.len();
        index.claimed.clear();
        for (_, path) in index.files.drain(..) {
            remove_file(&path).await?;
        }
        Ok(count)
    }
}

fn parse_sequence(path: &Path) -> Option<u64> {
    let stem = path.file_stem()?.to_str()?;
    let (seq, _) = stem.split_once('-')?;
    seq.parse().ok()
}

async fn read_message(path: &Path) -> Result<StoredMessage, StoreError> {
    let bytes = tokio::fs::read(path).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

async fn remove_file(path: &Path) -> Result<(), StoreError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use esb_common::Envelope;

    #[tokio::test]
    async fn test_messages_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();

        {
            let store = FileMessageStore::open("durable", dir.path()).await.unwrap();
            store.enqueue(StoredMessage::new("m1", Envelope::text("one"))).await.unwrap();
            store.enqueue(StoredMessage::new("m2", Envelope::text("two"))).await.unwrap();
            store.enqueue(StoredMessage::new("m3", Envelope::text("three"))).await.unwrap();
            store.remove("m2").await.unwrap();
        }

        let reopened = FileMessageStore::open("durable", dir.path()).await.unwrap();
        assert_eq!(reopened.list_ids().await.unwrap(), vec!["m1", "m3"]);

        let first = reopened.dequeue_next().await.unwrap().unwrap();
        assert_eq!(first.envelope.body_str(), "one");
        reopened.remove(&first.message_id).await.unwrap();

        // sequence numbers continue after the highest persisted one
        reopened.enqueue(StoredMessage::new("m4", Envelope::text("four"))).await.unwrap();
        assert_eq!(reopened.list_ids().await.unwrap(), vec!["m3", "m4"]);
    }

    #[tokio::test]
    async fn test_claim_keeps_file_until_removed() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileMessageStore::open("s", dir.path()).await.unwrap();
        store.enqueue(StoredMessage::new("m1", Envelope::text("one"))).await.unwrap();
        store.enqueue(StoredMessage::new("m2", Envelope::text("two"))).await.unwrap();

        assert_eq!(store.dequeue_next().await.unwrap().unwrap().message_id, "m1");
        assert_eq!(store.dequeue_next().await.unwrap().unwrap().message_id, "m2");
        assert!(store.dequeue_next().await.unwrap().is_none());

        // claims are not persisted, a restart hands both out again
        let restarted = FileMessageStore::open("s", dir.path()).await.unwrap();
        assert_eq!(restarted.list_ids().await.unwrap(), vec!["m1", "m2"]);
        assert_eq!(restarted.dequeue_next().await.unwrap().unwrap().message_id, "m1");

        store.release("m2").await.unwrap();
        assert_eq!(store.dequeue_next().await.unwrap().unwrap().message_id, "m2");
        store.remove("m1").await.unwrap();
        let reopened = FileMessageStore::open("s", dir.path()).await.unwrap();
        assert_eq!(reopened.list_ids().await.unwrap(), vec!["m2"]);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("00000000000000000007-6d.json"), b"{not json")
            .await
            .unwrap();

        let store = FileMessageStore::open("s", dir.path()).await.unwrap();
        assert_eq!(store.size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_clear_removes_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileMessageStore::open("s", dir.path()).await.unwrap();
        store.enqueue(StoredMessage::new("a", Envelope::text("a"))).await.unwrap();
        store.enqueue(StoredMessage::new("b", Envelope::text("b"))).await.unwrap();

        assert_eq!(store.clear().await.unwrap(), 2);
        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }
}

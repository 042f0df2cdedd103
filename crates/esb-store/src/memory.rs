use std::collections::HashSet;

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::trace;

use esb_common::{StoreError, StoredMessage};

use crate::store::MessageStore;

#[derive(Default)]
struct Inner {
    messages: IndexMap<String, StoredMessage>,
    claimed: HashSet<String>,
}

/// Insertion-ordered in-memory store
pub struct InMemoryMessageStore {
    name: String,
    inner: Mutex<Inner>,
    capacity: Option<usize>,
}

impl InMemoryMessageStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(Inner::default()),
            capacity: None,
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn enqueue(&self, message: StoredMessage) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let replacing = inner.messages.contains_key(&message.message_id);

        if let Some(capacity) = self.capacity {
            if !replacing && inner.messages.len() >= capacity {
                return Err(StoreError::Full {
                    store: self.name.clone(),
                    capacity,
                });
            }
        }

        trace!(store = %self.name, message_id = %message.message_id, "Enqueued message");
        inner.messages.shift_remove(&message.message_id);
        inner.claimed.remove(&message.message_id);
        inner.messages.insert(message.message_id.clone(), message);
        Ok(())
    }

    async fn dequeue_next(&self) -> Result<Option<StoredMessage>, StoreError> {
        let mut inner = self.inner.lock();
        let Inner { messages, claimed } = &mut *inner;
        let next = messages
            .values()
            .find(|message| !claimed.contains(&message.message_id))
            .cloned();
        if let Some(message) = &next {
            claimed.insert(message.message_id.clone());
        }
        Ok(next)
    }

    async fn release(&self, message_id: &str) -> Result<(), StoreError> {
        self.inner.lock().claimed.remove(message_id);
        Ok(())
    }

    async fn peek(&self) -> Result<Option<StoredMessage>, StoreError> {
        Ok(self.inner.lock().messages.first().map(|(_, message)| message.clone()))
    }

    async fn remove(&self, message_id: &str) -> Result<Option<StoredMessage>, StoreError> {
        let mut inner = self.inner.lock();
        inner.claimed.remove(message_id);
        Ok(inner.messages.shift_remove(message_id))
    }

    async fn get(&self, message_id: &str) -> Result<Option<StoredMessage>, StoreError> {
        Ok(self.inner.lock().messages.get(message_id).cloned())
    }

    async fn size(&self) -> Result<usize, StoreError> {
        Ok(self.inner.lock().messages.len())
    }

    async fn list_ids(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.inner.lock().messages.keys().cloned().collect())
    }

    async fn clear(&self) -> Result<usize, StoreError> {
        let mut inner = self.inner.lock();
        let count = inner.messages.len();
        inner.messages.clear();
        inner.claimed.clear();
        Ok(count)
    }
}

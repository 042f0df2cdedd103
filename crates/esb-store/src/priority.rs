use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, trace};

use esb_common::{StoreError, StoredMessage};
use esb_queue::{InternalQueue, MultiPriorityQueue, UnboundedQueue};

use crate::store::MessageStore;

/// Store backed by one unbounded queue per configured priority
///
/// The priority is read from the message's `esb.priority` property. Messages
/// without one, or with a priority that has no queue, land in the default
/// priority's queue. Within a priority the most recently stored message is
/// delivered first.
pub struct PriorityMessageStore {
    name: String,
    queue: MultiPriorityQueue<StoredMessage>,
    default_priority: i32,
    /// Claimed ids; the lock also serializes every mutation of `queue`
    claimed: Mutex<HashSet<String>>,
}

impl PriorityMessageStore {
    pub fn new(name: impl Into<String>, priorities: &[i32], default_priority: i32) -> Self {
        let mut levels: Vec<i32> = priorities.to_vec();
        if !levels.contains(&default_priority) {
            levels.push(default_priority);
        }
        levels.sort_unstable();
        levels.dedup();

        let queues = levels
            .into_iter()
            .map(|p| Arc::new(UnboundedQueue::new(p)) as Arc<dyn InternalQueue<StoredMessage>>)
            .collect();

        Self {
            name: name.into(),
            queue: MultiPriorityQueue::new(queues),
            default_priority,
            claimed: Mutex::new(HashSet::new()),
        }
    }

    pub fn priorities(&self) -> Vec<i32> {
        self.queue.queues().iter().map(|q| q.priority()).collect()
    }
}

#[async_trait]
impl MessageStore for PriorityMessageStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn enqueue(&self, message: StoredMessage) -> Result<(), StoreError> {
        let id = message.message_id.clone();
        let mut claimed = self.claimed.lock();
        claimed.remove(&id);
        self.queue.remove_first(&|m: &StoredMessage| m.message_id == id);

        let priority = message.priority().unwrap_or(self.default_priority);
        match self.queue.offer(priority, message) {
            Ok(()) => {}
            Err(rejected) => {
                debug!(
                    store = %self.name,
                    priority,
                    default_priority = self.default_priority,
                    "Unknown priority, using default queue"
                );
                self.queue
                    .offer(self.default_priority, rejected.into_inner())
                    .map_err(|_| StoreError::Unavailable(format!("{}: default queue rejected message", self.name)))?;
            }
        }
        trace!(store = %self.name, message_id = %id, priority, "Enqueued message");
        Ok(())
    }

    async fn dequeue_next(&self) -> Result<Option<StoredMessage>, StoreError> {
        let mut claimed = self.claimed.lock();
        let next = self
            .queue
            .snapshot()
            .into_iter()
            .find(|m| !claimed.contains(&m.message_id));
        if let Some(message) = &next {
            claimed.insert(message.message_id.clone());
        }
        Ok(next)
    }

    async fn release(&self, message_id: &str) -> Result<(), StoreError> {
        self.claimed.lock().remove(message_id);
        Ok(())
    }

    async fn peek(&self) -> Result<Option<StoredMessage>, StoreError> {
        Ok(self.queue.peek())
    }

    async fn remove(&self, message_id: &str) -> Result<Option<StoredMessage>, StoreError> {
        let mut claimed = self.claimed.lock();
        claimed.remove(message_id);
        Ok(self.queue.remove_first(&|m: &StoredMessage| m.message_id == message_id))
    }

    async fn get(&self, message_id: &str) -> Result<Option<StoredMessage>, StoreError> {
        Ok(self
            .queue
            .snapshot()
            .into_iter()
            .find(|m| m.message_id == message_id))
    }

    async fn size(&self) -> Result<usize, StoreError> {
        Ok(self.queue.size())
    }

    async fn list_ids(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.queue.snapshot().into_iter().map(|m| m.message_id).collect())
    }

    async fn clear(&self) -> Result<usize, StoreError> {
        let mut claimed = self.claimed.lock();
        claimed.clear();
        Ok(self.queue.clear())
    }
}

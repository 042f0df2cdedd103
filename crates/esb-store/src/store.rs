use async_trait::async_trait;

use esb_common::{StoreError, StoredMessage};

/// Ordered collection of persisted messages, addressable by message id
///
/// Implementations are the only synchronization point between a processor
/// draining the store and operators managing it, so every operation must be
/// safe to call concurrently.
#[async_trait]
pub trait MessageStore: Send + Sync {
    fn name(&self) -> &str;

    /// Append a message; an existing message with the same id is replaced,
    /// moves to the back and is no longer claimed
    async fn enqueue(&self, message: StoredMessage) -> Result<(), StoreError>;

    /// Claim the next unclaimed message in delivery order
    ///
    /// The message stays stored, and visible to `get`, until the claimant
    /// removes it, re-enqueues it or calls `release`. Claims live in memory
    /// only, so a restarted store hands every persisted message out again.
    async fn dequeue_next(&self) -> Result<Option<StoredMessage>, StoreError>;

    /// Drop a claim, leaving the stored message unchanged
    async fn release(&self, message_id: &str) -> Result<(), StoreError>;

    async fn peek(&self) -> Result<Option<StoredMessage>, StoreError>;

    async fn remove(&self, message_id: &str) -> Result<Option<StoredMessage>, StoreError>;

    async fn get(&self, message_id: &str) -> Result<Option<StoredMessage>, StoreError>;

    async fn size(&self) -> Result<usize, StoreError>;

    /// Ids in delivery order
    async fn list_ids(&self) -> Result<Vec<String>, StoreError>;

    /// Remove everything, returning how many messages were discarded
    async fn clear(&self) -> Result<usize, StoreError>;
}

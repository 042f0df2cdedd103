//! Operator view over a processor's dead-letter store
//!
//! Every operation goes straight to the store, so the view is safe to use
//! while the owning processor keeps polling.

use std::sync::Arc;

use tracing::{info, warn};

use esb_common::{StoreError, StoredMessage};
use esb_mediation::EnvelopeCodec;

use crate::registry::ProcessorRegistry;
use crate::store::MessageStore;

pub struct DeadLetterChannelView {
    store: Arc<dyn MessageStore>,
    processors: Arc<ProcessorRegistry>,
    codec: Arc<dyn EnvelopeCodec>,
}

impl DeadLetterChannelView {
    pub fn new(
        store: Arc<dyn MessageStore>,
        processors: Arc<ProcessorRegistry>,
        codec: Arc<dyn EnvelopeCodec>,
    ) -> Self {
        Self {
            store,
            processors,
            codec,
        }
    }

    pub fn store_name(&self) -> &str {
        self.store.name()
    }

    /// Hand one message back to the processor that dead-lettered it
    ///
    /// Returns `false` when the message is not in the store or its processor
    /// is no longer registered; in the latter case the message stays put.
    pub async fn resend(&self, message_id: &str) -> Result<bool, StoreError> {
        let Some(message) = self.store.remove(message_id).await? else {
            return Ok(false);
        };
        self.resend_message(message).await
    }

    /// Resend every message, returning how many were handed back
    pub async fn resend_all(&self) -> Result<usize, StoreError> {
        let mut resent = 0;
        for message_id in self.store.list_ids().await? {
            if self.resend(&message_id).await? {
                resent += 1;
            }
        }
        info!(store = %self.store.name(), resent, "Resent dead-lettered messages");
        Ok(resent)
    }

    async fn resend_message(&self, message: StoredMessage) -> Result<bool, StoreError> {
        let message_id = message.message_id.clone();
        let processor = message
            .processor_name()
            .and_then(|name| self.processors.get(name));

        let Some(processor) = processor else {
            warn!(
                store = %self.store.name(),
                message_id = %message_id,
                processor = ?message.processor_name(),
                "Cannot resend message, originating processor unknown"
            );
            self.store.enqueue(message).await?;
            return Ok(false);
        };

        if let Err(e) = processor.resubmit(message.clone()).await {
            warn!(
                store = %self.store.name(),
                message_id = %message_id,
                processor = %processor.name(),
                error = %e,
                "Resend failed, message kept in dead-letter store"
            );
            self.store.enqueue(message).await?;
            return Err(e);
        }

        info!(message_id = %message_id, processor = %processor.name(), "Resent dead-lettered message");
        Ok(true)
    }

    pub async fn delete(&self, message_id: &str) -> Result<bool, StoreError> {
        Ok(self.store.remove(message_id).await?.is_some())
    }

    pub async fn delete_all(&self) -> Result<usize, StoreError> {
        let deleted = self.store.clear().await?;
        info!(store = %self.store.name(), deleted, "Cleared dead-letter store");
        Ok(deleted)
    }

    pub async fn get_message_ids(&self) -> Result<Vec<String>, StoreError> {
        self.store.list_ids().await
    }

    /// Serialized envelope of a message, `None` when it is not stored
    pub async fn get_envelope(&self, message_id: &str) -> Result<Option<String>, StoreError> {
        let Some(message) = self.store.get(message_id).await? else {
            return Ok(None);
        };
        let bytes = self
            .codec
            .to_bytes(&message.envelope)
            .map_err(|e| StoreError::Codec(e.to_string()))?;
        Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
    }

    pub async fn get_message(&self, message_id: &str) -> Result<Option<StoredMessage>, StoreError> {
        self.store.get(message_id).await
    }

    pub async fn get_size(&self) -> Result<usize, StoreError> {
        self.store.size().await
    }
}

use std::fmt;
use std::sync::Arc;
use chrono::Utc;
use tokio::sync::oneshot;

use esb_common::{new_message_id, Envelope, Properties, StoredMessage};

use crate::environment::MediationEnvironment;
use crate::mediator::FaultHandler;

/// One message in flight through the mediation pipeline
///
/// A context has a single owner at a time. Mediators receive it as
/// `&mut MessageContext`, so two mediators can never touch the same message
/// concurrently.
pub struct MessageContext {
    message_id: String,
    pub envelope: Envelope,
    pub properties: Properties,
    pub is_response: bool,
    /// Destination address, set by dispatch
    pub to: Option<String>,
    fault_stack: Vec<Arc<dyn FaultHandler>>,
    environment: Arc<MediationEnvironment>,
    reply: Option<oneshot::Sender<Envelope>>,
}

impl MessageContext {
    /// Create a context for a message entering at the transport boundary
    pub fn new(environment: Arc<MediationEnvironment>, envelope: Envelope) -> Self {
        Self::with_id(environment, new_message_id(), envelope)
    }

    pub fn with_id(
        environment: Arc<MediationEnvironment>,
        message_id: impl Into<String>,
        envelope: Envelope,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            envelope,
            properties: Properties::new(),
            is_response: false,
            to: None,
            fault_stack: Vec::new(),
            environment,
            reply: None,
        }
    }

    /// Rebuild a context from a persisted snapshot
    ///
    /// The fault stack and reply channel are not persisted; a restored
    /// context starts with neither.
    pub fn restore(message: StoredMessage, environment: Arc<MediationEnvironment>) -> Self {
        Self {
            message_id: message.message_id,
            envelope: message.envelope,
            properties: message.properties,
            is_response: message.is_response,
            to: message.to,
            fault_stack: Vec::new(),
            environment,
            reply: None,
        }
    }

    pub fn snapshot(&self) -> StoredMessage {
        StoredMessage {
            message_id: self.message_id.clone(),
            envelope: self.envelope.clone(),
            properties: self.properties.clone(),
            is_response: self.is_response,
            to: self.to.clone(),
            stored_at: Utc::now(),
        }
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn environment(&self) -> &Arc<MediationEnvironment> {
        &self.environment
    }

    // ------------------------------------------------------------------------
    // Properties
    // ------------------------------------------------------------------------

    pub fn property(&self, key: &str) -> Option<&serde_json::Value> {
        self.properties.get(key)
    }

    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(|v| v.as_str())
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.properties.insert(key.into(), value.into());
    }

    pub fn remove_property(&mut self, key: &str) -> Option<serde_json::Value> {
        self.properties.remove(key)
    }

    // ------------------------------------------------------------------------
    // Fault stack
    // ------------------------------------------------------------------------

    pub fn push_fault(&mut self, handler: Arc<dyn FaultHandler>) {
        self.fault_stack.push(handler);
    }

    pub fn pop_fault(&mut self) -> Option<Arc<dyn FaultHandler>> {
        self.fault_stack.pop()
    }

    pub fn fault_depth(&self) -> usize {
        self.fault_stack.len()
    }

    /// Drop every handler pushed above `depth`
    pub fn truncate_faults(&mut self, depth: usize) {
        self.fault_stack.truncate(depth);
    }

    // ------------------------------------------------------------------------
    // Reply channel
    // ------------------------------------------------------------------------

    /// Attach the channel the transport waits on for the caller's response
    pub fn attach_reply(&mut self, reply: oneshot::Sender<Envelope>) {
        self.reply = Some(reply);
    }

    pub fn take_reply(&mut self) -> Option<oneshot::Sender<Envelope>> {
        self.reply.take()
    }

    pub fn has_reply(&self) -> bool {
        self.reply.is_some()
    }
}

impl fmt::Debug for MessageContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageContext")
            .field("message_id", &self.message_id)
            .field("content_type", &self.envelope.content_type)
            .field("body_len", &self.envelope.len())
            .field("is_response", &self.is_response)
            .field("to", &self.to)
            .field("fault_depth", &self.fault_stack.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use esb_common::properties;

    #[test]
    fn test_snapshot_restore_keeps_identity() {
        let env = MediationEnvironment::builder().build();
        let mut ctx = MessageContext::new(env.clone(), Envelope::text("payload"));
        ctx.set_property(properties::PRIORITY, 4);
        ctx.is_response = true;

        let snapshot = ctx.snapshot();
        let restored = MessageContext::restore(snapshot, env);

        assert_eq!(restored.message_id(), ctx.message_id());
        assert_eq!(restored.envelope, ctx.envelope);
        assert!(restored.is_response);
        assert_eq!(restored.property(properties::PRIORITY), Some(&serde_json::json!(4)));
        assert_eq!(restored.fault_depth(), 0);
    }

    #[test]
    fn test_message_ids_are_unique() {
        let env = MediationEnvironment::builder().build();
        let a = MessageContext::new(env.clone(), Envelope::default());
        let b = MessageContext::new(env, Envelope::default());
        assert_ne!(a.message_id(), b.message_id());
    }
}

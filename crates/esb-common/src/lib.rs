use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;

pub mod error;

pub use error::{CacheError, ConfigError, MediationError, ReplicationError, StoreError};

// ============================================================================
// Well-known Context Properties
// ============================================================================

/// Property names used for communication between pipeline stages
pub mod properties {
    /// Digest of the request, set by a request-mode cache mediator
    pub const REQUEST_HASH: &str = "esb.cache.request_hash";
    /// Number of failed delivery attempts recorded by a message processor
    pub const RETRY_COUNT: &str = "esb.processor.retry_count";
    /// Name of the processor that last attempted delivery
    pub const PROCESSOR_NAME: &str = "esb.processor.name";
    /// Error of the last failed delivery attempt
    pub const LAST_ERROR: &str = "esb.processor.last_error";
    /// Priority used by priority message stores
    pub const PRIORITY: &str = "esb.priority";
    /// Error description recorded before a fault handler runs
    pub const ERROR_MESSAGE: &str = "ERROR_MESSAGE";
    /// Error kind recorded before a fault handler runs
    pub const ERROR_KIND: &str = "ERROR_KIND";
    /// Proxy service that received the message
    pub const PROXY_NAME: &str = "esb.proxy.name";
}

// ============================================================================
// Envelope
// ============================================================================

/// Opaque message payload together with its media type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub content_type: String,
    pub body: Bytes,
}

impl Envelope {
    pub fn new(content_type: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            content_type: content_type.into(),
            body: body.into(),
        }
    }

    pub fn text(body: impl Into<String>) -> Self {
        Self::new("text/plain", Bytes::from(body.into()))
    }

    pub fn json(value: &serde_json::Value) -> Self {
        Self::new("application/json", Bytes::from(value.to_string()))
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// Body as UTF-8 text, replacing invalid sequences
    pub fn body_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

impl Default for Envelope {
    fn default() -> Self {
        Self::new("application/octet-stream", Bytes::new())
    }
}

// ============================================================================
// Persisted Message Snapshot
// ============================================================================

pub type Properties = HashMap<String, serde_json::Value>;

/// Serializable snapshot of a message context, owned by a message store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub message_id: String,
    pub envelope: Envelope,
    #[serde(default)]
    pub properties: Properties,
    #[serde(default)]
    pub is_response: bool,
    #[serde(default)]
    pub to: Option<String>,
    pub stored_at: DateTime<Utc>,
}

impl StoredMessage {
    pub fn new(message_id: impl Into<String>, envelope: Envelope) -> Self {
        Self {
            message_id: message_id.into(),
            envelope,
            properties: HashMap::new(),
            is_response: false,
            to: None,
            stored_at: Utc::now(),
        }
    }

    pub fn property(&self, key: &str) -> Option<&serde_json::Value> {
        self.properties.get(key)
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.properties.insert(key.into(), value.into());
    }

    pub fn remove_property(&mut self, key: &str) -> Option<serde_json::Value> {
        self.properties.remove(key)
    }

    pub fn retry_count(&self) -> u32 {
        self.properties
            .get(properties::RETRY_COUNT)
            .and_then(|v| v.as_u64())
            .map(|v| v as u32)
            .unwrap_or(0)
    }

    pub fn set_retry_count(&mut self, count: u32) {
        self.set_property(properties::RETRY_COUNT, count);
    }

    pub fn priority(&self) -> Option<i32> {
        self.properties
            .get(properties::PRIORITY)
            .and_then(|v| v.as_i64())
            .map(|v| v as i32)
    }

    pub fn processor_name(&self) -> Option<&str> {
        self.properties
            .get(properties::PROCESSOR_NAME)
            .and_then(|v| v.as_str())
    }
}

// ============================================================================
// Mediator Configuration
// ============================================================================

pub type MediatorParams = serde_json::Map<String, serde_json::Value>;

/// Declarative description of one mediator: a registry tag plus its parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediatorSpec {
    #[serde(rename = "type")]
    pub tag: String,
    #[serde(flatten)]
    pub params: MediatorParams,
}

impl MediatorSpec {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            params: MediatorParams::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

// ============================================================================
// Utilities
// ============================================================================

/// Wall clock in epoch milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Generate a message identifier for a context created at ingress
pub fn new_message_id() -> String {
    format!("urn:uuid:{}", uuid::Uuid::new_v4())
}

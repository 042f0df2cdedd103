//! Endpoint dispatch
//!
//! [`HttpDispatcher`] posts envelopes to the addresses of configured
//! endpoints. A response body, when present, is handed back as the
//! synchronous response of the exchange.

use std::collections::HashMap;
use std::time::Duration;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use esb_common::{ConfigError, Envelope, MediationError};

use crate::context::MessageContext;

#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Send the message to a named endpoint
    ///
    /// `Ok(Some(_))` carries the endpoint's synchronous response, `Ok(None)`
    /// means the send was accepted with nothing to return.
    async fn send(
        &self,
        endpoint: &str,
        ctx: &mut MessageContext,
    ) -> Result<Option<Envelope>, MediationError>;

    /// Deliver the current envelope to the original caller
    async fn send_back(&self, ctx: &mut MessageContext) -> Result<(), MediationError> {
        let reply = ctx.take_reply().ok_or_else(|| {
            MediationError::delivery("caller", "no reply channel attached to the message")
        })?;
        reply
            .send(ctx.envelope.clone())
            .map_err(|_| MediationError::delivery("caller", "caller is no longer waiting for a response"))?;
        debug!(message_id = %ctx.message_id(), "Response sent back to caller");
        Ok(())
    }
}

/// Placeholder used when no dispatcher was configured
#[derive(Debug, Default)]
pub struct UnconfiguredDispatcher;

#[async_trait]
impl Dispatcher for UnconfiguredDispatcher {
    async fn send(
        &self,
        endpoint: &str,
        _ctx: &mut MessageContext,
    ) -> Result<Option<Envelope>, MediationError> {
        Err(MediationError::configuration(format!(
            "No dispatcher configured, cannot send to endpoint {}",
            endpoint
        )))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub name: String,
    pub address: String,
    #[serde(default, with = "timeout_secs")]
    pub timeout: Option<Duration>,
}

impl Endpoint {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            timeout: None,
        }
    }
}

mod timeout_secs {
    use std::time::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&d.as_secs()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_secs))
    }
}

#[derive(Debug, Clone)]
pub struct HttpDispatcherConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for HttpDispatcherConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

pub struct HttpDispatcher {
    client: reqwest::Client,
    endpoints: HashMap<String, Endpoint>,
}

impl HttpDispatcher {
    pub fn new(config: HttpDispatcherConfig, endpoints: Vec<Endpoint>) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ConfigError::invalid(format!("Failed to build HTTP client: {}", e)))?;

        let endpoints = endpoints
            .into_iter()
            .map(|endpoint| (endpoint.name.clone(), endpoint))
            .collect();

        Ok(Self { client, endpoints })
    }

    pub fn endpoint(&self, name: &str) -> Option<&Endpoint> {
        self.endpoints.get(name)
    }
}

#[async_trait]
impl Dispatcher for HttpDispatcher {
    async fn send(
        &self,
        endpoint: &str,
        ctx: &mut MessageContext,
    ) -> Result<Option<Envelope>, MediationError> {
        let target = self.endpoints.get(endpoint).ok_or_else(|| {
            MediationError::configuration(format!("Endpoint named {} cannot be found", endpoint))
        })?;
        ctx.to = Some(target.address.clone());

        debug!(
            message_id = %ctx.message_id(),
            endpoint = %endpoint,
            address = %target.address,
            "Sending message to endpoint"
        );

        let mut request = self
            .client
            .post(&target.address)
            .header(CONTENT_TYPE, ctx.envelope.content_type.as_str())
            .header("X-Message-Id", ctx.message_id())
            .body(ctx.envelope.body.clone());
        if let Some(timeout) = target.timeout {
            request = request.timeout(timeout);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                error!(endpoint = %endpoint, error = %e, "HTTP request failed");
                return Err(MediationError::delivery(endpoint, e.to_string()));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            warn!(endpoint = %endpoint, status = %status, "Endpoint returned an error status");
            return Err(MediationError::delivery(
                endpoint,
                format!("HTTP {}: {}", status, error_body),
            ));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let body = response
            .bytes()
            .await
            .map_err(|e| MediationError::delivery(endpoint, format!("Failed to read response: {}", e)))?;

        if body.is_empty() {
            Ok(None)
        } else {
            Ok(Some(Envelope::new(content_type, body)))
        }
    }
}

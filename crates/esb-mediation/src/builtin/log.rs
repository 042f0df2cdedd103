use std::str::FromStr;
use async_trait::async_trait;
use tracing::{debug, error, info, trace, warn};

use esb_common::MediationError;

use crate::context::MessageContext;
use crate::mediator::Mediator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown log level {}", other)),
        }
    }
}

/// Logs a message line with selected properties of the context
pub struct LogMediator {
    level: LogLevel,
    message: Option<String>,
    properties: Vec<String>,
}

impl LogMediator {
    pub fn new(level: LogLevel, message: Option<String>, properties: Vec<String>) -> Self {
        Self {
            level,
            message,
            properties,
        }
    }

    fn selected(&self, ctx: &MessageContext) -> serde_json::Value {
        let selected: serde_json::Map<String, serde_json::Value> = self
            .properties
            .iter()
            .filter_map(|key| ctx.property(key).map(|v| (key.clone(), v.clone())))
            .collect();
        serde_json::Value::Object(selected)
    }
}

#[async_trait]
impl Mediator for LogMediator {
    async fn mediate(&self, ctx: &mut MessageContext) -> Result<bool, MediationError> {
        let message = self.message.as_deref().unwrap_or("Log mediator");
        let id = ctx.message_id();
        let props = self.selected(ctx);
        let direction = if ctx.is_response { "response" } else { "request" };

        match self.level {
            LogLevel::Trace => trace!(message_id = %id, direction, properties = %props, envelope = %ctx.envelope.body_str(), "{}", message),
            LogLevel::Debug => debug!(message_id = %id, direction, properties = %props, "{}", message),
            LogLevel::Info => info!(message_id = %id, direction, properties = %props, "{}", message),
            LogLevel::Warn => warn!(message_id = %id, direction, properties = %props, "{}", message),
            LogLevel::Error => error!(message_id = %id, direction, properties = %props, "{}", message),
        }
        Ok(true)
    }

    fn name(&self) -> &str {
        "log"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_parsing() {
        assert_eq!("WARN".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("loud".parse::<LogLevel>().is_err());
    }
}

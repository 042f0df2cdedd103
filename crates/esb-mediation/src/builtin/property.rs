use async_trait::async_trait;
use tracing::trace;

use esb_common::MediationError;

use crate::context::MessageContext;
use crate::mediator::Mediator;

#[derive(Debug, Clone, PartialEq)]
pub enum PropertyAction {
    Set(serde_json::Value),
    Remove,
}

/// Sets or removes one context property
pub struct PropertyMediator {
    name: String,
    action: PropertyAction,
}

impl PropertyMediator {
    pub fn new(name: impl Into<String>, action: PropertyAction) -> Self {
        Self {
            name: name.into(),
            action,
        }
    }
}

#[async_trait]
impl Mediator for PropertyMediator {
    async fn mediate(&self, ctx: &mut MessageContext) -> Result<bool, MediationError> {
        match &self.action {
            PropertyAction::Set(value) => {
                trace!(property = %self.name, value = %value, "Setting property");
                ctx.set_property(self.name.clone(), value.clone());
            }
            PropertyAction::Remove => {
                ctx.remove_property(&self.name);
            }
        }
        Ok(true)
    }

    fn name(&self) -> &str {
        "property"
    }
}

use async_trait::async_trait;
use tracing::debug;

use esb_common::MediationError;

use crate::context::MessageContext;
use crate::mediator::Mediator;
use crate::sequence::SequenceRef;

/// Dispatches the message to a named endpoint and ends the request path
///
/// A synchronous response replaces the envelope and runs through the
/// `receive` sequence when one is configured, otherwise it is sent straight
/// back to a waiting caller.
pub struct SendMediator {
    endpoint: String,
    receive: Option<SequenceRef>,
}

impl SendMediator {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            receive: None,
        }
    }

    pub fn with_receive(mut self, receive: SequenceRef) -> Self {
        self.receive = Some(receive);
        self
    }
}

#[async_trait]
impl Mediator for SendMediator {
    async fn mediate(&self, ctx: &mut MessageContext) -> Result<bool, MediationError> {
        let dispatcher = ctx.environment().dispatcher().clone();
        let Some(response) = dispatcher.send(&self.endpoint, ctx).await? else {
            return Ok(false);
        };

        debug!(message_id = %ctx.message_id(), endpoint = %self.endpoint, "Received synchronous response");
        ctx.envelope = response;
        ctx.is_response = true;

        match &self.receive {
            Some(receive) => {
                let sequence = receive.resolve(ctx.environment()).ok_or_else(|| {
                    MediationError::configuration(format!(
                        "Receiving sequence {} cannot be found",
                        receive.describe()
                    ))
                })?;
                sequence.mediate(ctx).await?;
            }
            None if ctx.has_reply() => dispatcher.send_back(ctx).await?,
            None => {}
        }
        Ok(false)
    }

    fn name(&self) -> &str {
        "send"
    }
}

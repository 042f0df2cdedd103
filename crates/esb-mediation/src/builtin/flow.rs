use std::sync::Arc;
use async_trait::async_trait;

use esb_common::MediationError;

use crate::context::MessageContext;
use crate::mediator::Mediator;
use crate::sequence::SequenceMediator;

/// Stops the pipeline for the current message
#[derive(Debug, Default)]
pub struct DropMediator;

#[async_trait]
impl Mediator for DropMediator {
    async fn mediate(&self, _ctx: &mut MessageContext) -> Result<bool, MediationError> {
        Ok(false)
    }

    fn name(&self) -> &str {
        "drop"
    }
}

/// Sends the current envelope back to the caller and stops
#[derive(Debug, Default)]
pub struct RespondMediator;

#[async_trait]
impl Mediator for RespondMediator {
    async fn mediate(&self, ctx: &mut MessageContext) -> Result<bool, MediationError> {
        ctx.to = None;
        let dispatcher = ctx.environment().dispatcher().clone();
        dispatcher.send_back(ctx).await?;
        Ok(false)
    }

    fn name(&self) -> &str {
        "respond"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Request,
    Response,
}

impl Direction {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Request => "in",
            Self::Response => "out",
        }
    }

    fn matches(&self, ctx: &MessageContext) -> bool {
        match self {
            Self::Request => !ctx.is_response,
            Self::Response => ctx.is_response,
        }
    }
}

/// Runs its children only for messages flowing in one direction
pub struct DirectionFilter {
    direction: Direction,
    children: Arc<SequenceMediator>,
}

impl DirectionFilter {
    pub fn new(direction: Direction, children: SequenceMediator) -> Self {
        Self {
            direction,
            children: Arc::new(children),
        }
    }
}

#[async_trait]
impl Mediator for DirectionFilter {
    async fn mediate(&self, ctx: &mut MessageContext) -> Result<bool, MediationError> {
        if self.direction.matches(ctx) {
            self.children.mediate(ctx).await
        } else {
            Ok(true)
        }
    }

    fn name(&self) -> &str {
        self.direction.tag()
    }
}

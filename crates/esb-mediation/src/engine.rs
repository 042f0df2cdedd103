//! Entry points that run a message through the pipeline
//!
//! Every entry point follows the same shape: push the outermost fault handler,
//! mediate, and on failure unwind the fault stack innermost-first.

use std::sync::Arc;
use tracing::{debug, info, warn};

use esb_common::{properties, MediationError};

use crate::context::MessageContext;
use crate::environment::MediationEnvironment;
use crate::fault::{handle_failure, FaultOutcome};
use crate::mediator::MediatorFaultHandler;
use crate::sequence::SequenceRef;
use crate::{FAULT_SEQUENCE, MAIN_SEQUENCE};

/// A named service front: its own in-sequence, fault sequence and target
#[derive(Debug, Clone)]
pub struct ProxyService {
    pub name: String,
    pub in_sequence: Option<SequenceRef>,
    pub fault_sequence: Option<SequenceRef>,
    pub target_endpoint: Option<String>,
}

impl ProxyService {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            in_sequence: None,
            fault_sequence: None,
            target_endpoint: None,
        }
    }

    pub fn with_in_sequence(mut self, sequence: SequenceRef) -> Self {
        self.in_sequence = Some(sequence);
        self
    }

    pub fn with_fault_sequence(mut self, sequence: SequenceRef) -> Self {
        self.fault_sequence = Some(sequence);
        self
    }

    pub fn with_target_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.target_endpoint = Some(endpoint.into());
        self
    }
}

/// How the pipeline finished for one message
#[derive(Debug)]
pub enum MediationOutcome {
    /// Every mediator returned `true`
    Continued,
    /// A mediator stopped the pipeline
    Stopped,
    /// Mediation failed and a fault handler took over
    FaultHandled { handler: String },
    /// Mediation failed with no handler in scope
    Dropped { error: MediationError },
}

impl MediationOutcome {
    pub fn is_dropped(&self) -> bool {
        matches!(self, Self::Dropped { .. })
    }
}

pub struct MediationEngine {
    environment: Arc<MediationEnvironment>,
}

impl MediationEngine {
    pub fn new(environment: Arc<MediationEnvironment>) -> Self {
        Self { environment }
    }

    pub fn environment(&self) -> &Arc<MediationEnvironment> {
        &self.environment
    }

    /// Create a context for an inbound envelope bound to this engine
    pub fn new_context(&self, envelope: esb_common::Envelope) -> MessageContext {
        MessageContext::new(self.environment.clone(), envelope)
    }

    /// Run a message through the `main` sequence
    ///
    /// The global `fault` sequence, when registered, is the outermost handler.
    pub async fn inject(&self, ctx: &mut MessageContext) -> MediationOutcome {
        let depth = ctx.fault_depth();
        match self.environment.sequence(FAULT_SEQUENCE) {
            Some(fault) => ctx.push_fault(Arc::new(MediatorFaultHandler::new(fault))),
            None => debug!("No global fault sequence registered"),
        }

        debug!(
            message_id = %ctx.message_id(),
            is_response = ctx.is_response,
            "Injecting message into the main sequence"
        );

        let result = match self.environment.sequence(MAIN_SEQUENCE) {
            Some(main) => main.mediate(ctx).await,
            None => Err(MediationError::configuration("Main sequence is not defined")),
        };
        finish(ctx, depth, result).await
    }

    /// Receive a message on a proxy service
    pub async fn receive(&self, proxy_name: &str, ctx: &mut MessageContext) -> MediationOutcome {
        let depth = ctx.fault_depth();
        debug!(proxy = %proxy_name, message_id = %ctx.message_id(), "Proxy Service received a new message");
        ctx.set_property(properties::PROXY_NAME, proxy_name);

        let result = match self.environment.proxy(proxy_name) {
            Some(proxy) => self.run_proxy(&proxy, ctx).await,
            None => Err(MediationError::configuration(format!(
                "Proxy Service with the name {} does not exist",
                proxy_name
            ))),
        };
        finish(ctx, depth, result).await
    }

    async fn run_proxy(
        &self,
        proxy: &ProxyService,
        ctx: &mut MessageContext,
    ) -> Result<bool, MediationError> {
        if let Some(fault) = &proxy.fault_sequence {
            match fault.resolve(&self.environment) {
                Some(handler) => ctx.push_fault(Arc::new(MediatorFaultHandler::new(handler))),
                None => warn!(
                    proxy = %proxy.name,
                    fault_sequence = %fault.describe(),
                    "Unable to find the fault sequence for the proxy service"
                ),
            }
        }

        if let Some(in_sequence) = &proxy.in_sequence {
            let sequence = in_sequence.resolve(&self.environment).ok_or_else(|| {
                MediationError::configuration(format!(
                    "Unable to find the in sequence for the proxy service specified by the name {}",
                    in_sequence.describe()
                ))
            })?;
            if !sequence.mediate(ctx).await? {
                return Ok(false);
            }
        }

        let Some(endpoint) = &proxy.target_endpoint else {
            return Ok(true);
        };

        debug!(proxy = %proxy.name, endpoint = %endpoint, "Forwarding message to the target endpoint");
        let dispatcher = self.environment.dispatcher().clone();
        if let Some(response) = dispatcher.send(endpoint, ctx).await? {
            ctx.envelope = response;
            ctx.is_response = true;
            if ctx.has_reply() {
                dispatcher.send_back(ctx).await?;
            }
        }
        Ok(true)
    }
}

async fn finish(
    ctx: &mut MessageContext,
    depth: usize,
    result: Result<bool, MediationError>,
) -> MediationOutcome {
    match result {
        Ok(proceed) => {
            ctx.truncate_faults(depth);
            if proceed {
                MediationOutcome::Continued
            } else {
                MediationOutcome::Stopped
            }
        }
        Err(error) => {
            let outcome = match handle_failure(ctx, error).await {
                FaultOutcome::Handled { handler } => {
                    info!(message_id = %ctx.message_id(), handler = %handler, "Message handed to fault handler");
                    MediationOutcome::FaultHandled { handler }
                }
                FaultOutcome::Dropped { error } => MediationOutcome::Dropped { error },
            };
            ctx.truncate_faults(depth);
            outcome
        }
    }
}

//! Routing of mediation failures to the fault-handler stack

use tracing::{debug, error, warn};

use esb_common::{properties, MediationError};

use crate::context::MessageContext;

#[derive(Debug)]
pub enum FaultOutcome {
    /// A fault handler ran to completion
    Handled { handler: String },
    /// No handler remained; the message is dropped
    Dropped { error: MediationError },
}

/// Record the failure on the context so the fault handler can inspect it
pub fn record_error(ctx: &mut MessageContext, error: &MediationError) {
    ctx.set_property(properties::ERROR_MESSAGE, error.to_string());
    ctx.set_property(properties::ERROR_KIND, error.kind());
}

/// Pop and run fault handlers innermost-first until one succeeds
///
/// A handler that itself fails passes its error to the next handler down the
/// stack. There is no retry at this layer.
pub async fn handle_failure(ctx: &mut MessageContext, error: MediationError) -> FaultOutcome {
    let mut error = error;

    loop {
        let Some(handler) = ctx.pop_fault() else {
            error!(
                message_id = %ctx.message_id(),
                error = %error,
                "No error handlers found - [Message Dropped]"
            );
            return FaultOutcome::Dropped { error };
        };

        record_error(ctx, &error);
        debug!(
            message_id = %ctx.message_id(),
            handler = %handler.name(),
            error = %error,
            "Invoking fault handler"
        );

        match handler.handle_fault(ctx).await {
            Ok(()) => {
                return FaultOutcome::Handled {
                    handler: handler.name().to_string(),
                };
            }
            Err(e) => {
                warn!(
                    message_id = %ctx.message_id(),
                    handler = %handler.name(),
                    error = %e,
                    "Fault handler failed, trying the next one"
                );
                error = e;
            }
        }
    }
}

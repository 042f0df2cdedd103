use std::sync::Arc;
use async_trait::async_trait;
use tracing::{debug, trace, warn};

use esb_common::MediationError;

use crate::context::MessageContext;
use crate::environment::MediationEnvironment;
use crate::fault::record_error;
use crate::mediator::{Mediator, MediatorFaultHandler, MediatorStats, StatsSnapshot};

/// Reference to a sequence, either by registered name or held directly
#[derive(Clone)]
pub enum SequenceRef {
    Named(String),
    Inline(Arc<dyn Mediator>),
}

impl SequenceRef {
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    /// Look the sequence up; named references resolve at call time
    pub fn resolve(&self, env: &MediationEnvironment) -> Option<Arc<dyn Mediator>> {
        match self {
            Self::Named(name) => env.sequence(name),
            Self::Inline(mediator) => Some(mediator.clone()),
        }
    }

    pub fn describe(&self) -> &str {
        match self {
            Self::Named(name) => name,
            Self::Inline(mediator) => mediator.name(),
        }
    }
}

impl std::fmt::Debug for SequenceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Named(name) => f.debug_tuple("Named").field(name).finish(),
            Self::Inline(m) => f.debug_tuple("Inline").field(&m.name()).finish(),
        }
    }
}

/// Ordered composition of mediators
///
/// When an error handler is configured it is pushed onto the fault stack for
/// the duration of the sequence and popped on every exit path. A failure
/// inside the sequence runs that handler and stops the pipeline.
pub struct SequenceMediator {
    name: String,
    children: Vec<Arc<dyn Mediator>>,
    error_handler: Option<SequenceRef>,
    stats: MediatorStats,
}

impl SequenceMediator {
    pub fn new(name: impl Into<String>, children: Vec<Arc<dyn Mediator>>) -> Self {
        Self {
            name: name.into(),
            children,
            error_handler: None,
            stats: MediatorStats::new(),
        }
    }

    pub fn anonymous(children: Vec<Arc<dyn Mediator>>) -> Self {
        Self::new("anonymous", children)
    }

    pub fn with_error_handler(mut self, handler: SequenceRef) -> Self {
        self.error_handler = Some(handler);
        self
    }

    pub fn children(&self) -> &[Arc<dyn Mediator>] {
        &self.children
    }

    pub fn error_handler(&self) -> Option<&SequenceRef> {
        self.error_handler.as_ref()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    async fn run_children(&self, ctx: &mut MessageContext) -> Result<bool, MediationError> {
        for child in &self.children {
            trace!(sequence = %self.name, mediator = %child.name(), "Invoking mediator");
            if !child.mediate(ctx).await? {
                debug!(
                    sequence = %self.name,
                    mediator = %child.name(),
                    message_id = %ctx.message_id(),
                    "Mediator stopped the sequence"
                );
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[async_trait]
impl Mediator for SequenceMediator {
    async fn mediate(&self, ctx: &mut MessageContext) -> Result<bool, MediationError> {
        let depth = ctx.fault_depth();

        let handler = match &self.error_handler {
            Some(reference) => {
                let resolved = reference.resolve(ctx.environment());
                if resolved.is_none() {
                    warn!(
                        sequence = %self.name,
                        error_handler = %reference.describe(),
                        "Error handler sequence not found, continuing without it"
                    );
                }
                resolved
            }
            None => None,
        };
        let pushed = match handler {
            Some(handler) => {
                ctx.push_fault(Arc::new(MediatorFaultHandler::new(handler)));
                true
            }
            None => false,
        };

        let result = self.run_children(ctx).await;
        self.stats.record(&self.name, &result);

        match result {
            Ok(proceed) => {
                ctx.truncate_faults(depth);
                Ok(proceed)
            }
            Err(error) if pushed => {
                // Anything a child left above our handler is out of scope now
                ctx.truncate_faults(depth + 1);
                match ctx.pop_fault() {
                    Some(own) => {
                        record_error(ctx, &error);
                        debug!(
                            sequence = %self.name,
                            handler = %own.name(),
                            error = %error,
                            "Sequence failed, running its error handler"
                        );
                        own.handle_fault(ctx).await?;
                        Ok(false)
                    }
                    None => Err(error),
                }
            }
            Err(error) => {
                ctx.truncate_faults(depth);
                Err(error)
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Invokes a named sequence looked up at mediation time
pub struct SequenceRefMediator {
    target: String,
}

impl SequenceRefMediator {
    pub fn new(target: impl Into<String>) -> Self {
        Self { target: target.into() }
    }
}

#[async_trait]
impl Mediator for SequenceRefMediator {
    async fn mediate(&self, ctx: &mut MessageContext) -> Result<bool, MediationError> {
        let sequence = ctx.environment().sequence(&self.target).ok_or_else(|| {
            MediationError::configuration(format!("Sequence named {} cannot be found", self.target))
        })?;
        sequence.mediate(ctx).await
    }

    fn name(&self) -> &str {
        &self.target
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use esb_common::{properties, Envelope};

    struct Probe {
        name: String,
        calls: Arc<AtomicUsize>,
        result: fn() -> Result<bool, MediationError>,
    }

    #[async_trait]
    impl Mediator for Probe {
        async fn mediate(&self, _ctx: &mut MessageContext) -> Result<bool, MediationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.result)()
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    fn probe(name: &str, result: fn() -> Result<bool, MediationError>) -> (Arc<dyn Mediator>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let mediator = Arc::new(Probe {
            name: name.to_string(),
            calls: calls.clone(),
            result,
        });
        (mediator, calls)
    }

    fn context() -> MessageContext {
        MessageContext::new(MediationEnvironment::builder().build(), Envelope::text("hi"))
    }

    #[tokio::test]
    async fn test_stop_skips_remaining_children() {
        let (a, a_calls) = probe("a", || Ok(true));
        let (b, b_calls) = probe("b", || Ok(false));
        let (c, c_calls) = probe("c", || Ok(true));
        let sequence = SequenceMediator::new("abc", vec![a, b, c]);

        let mut ctx = context();
        let proceed = sequence.mediate(&mut ctx).await.unwrap();

        assert!(!proceed);
        assert_eq!(a_calls.load(Ordering::SeqCst), 1);
        assert_eq!(b_calls.load(Ordering::SeqCst), 1);
        assert_eq!(c_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_error_handler_popped_after_success() {
        let (a, _) = probe("a", || Ok(true));
        let (fault, _) = probe("fault", || Ok(true));
        let sequence = SequenceMediator::new("seq", vec![a])
            .with_error_handler(SequenceRef::Inline(fault));

        let mut ctx = context();
        assert!(sequence.mediate(&mut ctx).await.unwrap());
        assert_eq!(ctx.fault_depth(), 0);
    }

    #[tokio::test]
    async fn test_failure_runs_own_error_handler() {
        let (a, _) = probe("a", || Err(MediationError::mediation("a", "boom")));
        let (b, b_calls) = probe("b", || Ok(true));
        let (fault, fault_calls) = probe("fault", || Ok(true));
        let sequence = SequenceMediator::new("seq", vec![a, b])
            .with_error_handler(SequenceRef::Inline(fault));

        let mut ctx = context();
        let proceed = sequence.mediate(&mut ctx).await.unwrap();

        assert!(!proceed);
        assert_eq!(b_calls.load(Ordering::SeqCst), 0);
        assert_eq!(fault_calls.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.fault_depth(), 0);
        assert_eq!(ctx.property_str(properties::ERROR_KIND), Some("MEDIATION"));
        assert_eq!(sequence.stats().failures, 1);
    }

    #[tokio::test]
    async fn test_failure_without_handler_propagates() {
        let (a, _) = probe("a", || Err(MediationError::mediation("a", "boom")));
        let sequence = SequenceMediator::new("seq", vec![a]);

        let mut ctx = context();
        let err = sequence.mediate(&mut ctx).await.unwrap_err();
        assert_eq!(err.kind(), "MEDIATION");
        assert_eq!(ctx.fault_depth(), 0);
    }

    #[tokio::test]
    async fn test_innermost_handler_wins() {
        let (failing, _) = probe("failing", || Err(MediationError::mediation("failing", "boom")));
        let (inner_fault, inner_calls) = probe("inner-fault", || Ok(true));
        let (outer_fault, outer_calls) = probe("outer-fault", || Ok(true));

        let inner: Arc<dyn Mediator> = Arc::new(
            SequenceMediator::new("inner", vec![failing])
                .with_error_handler(SequenceRef::Inline(inner_fault)),
        );
        let outer = SequenceMediator::new("outer", vec![inner])
            .with_error_handler(SequenceRef::Inline(outer_fault));

        let mut ctx = context();
        assert!(!outer.mediate(&mut ctx).await.unwrap());
        assert_eq!(inner_calls.load(Ordering::SeqCst), 1);
        assert_eq!(outer_calls.load(Ordering::SeqCst), 0);
        assert_eq!(ctx.fault_depth(), 0);
    }

    #[tokio::test]
    async fn test_missing_named_sequence_is_configuration_error() {
        let mut ctx = context();
        let err = SequenceRefMediator::new("nowhere")
            .mediate(&mut ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "CONFIGURATION");
    }
}

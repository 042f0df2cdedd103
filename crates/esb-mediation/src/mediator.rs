use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use async_trait::async_trait;
use serde::Serialize;

use esb_common::MediationError;

use crate::context::MessageContext;

/// A pipeline stage acting on one message
///
/// `Ok(true)` continues with the next mediator of the enclosing sequence,
/// `Ok(false)` stops the pipeline for this message. An `Err` is handed to the
/// innermost fault handler in scope.
#[async_trait]
pub trait Mediator: Send + Sync {
    async fn mediate(&self, ctx: &mut MessageContext) -> Result<bool, MediationError>;

    fn name(&self) -> &str;
}

/// Recovery action pushed onto a context's fault stack
#[async_trait]
pub trait FaultHandler: Send + Sync {
    async fn handle_fault(&self, ctx: &mut MessageContext) -> Result<(), MediationError>;

    fn name(&self) -> &str;
}

/// Fault handler that runs a mediator (usually a fault sequence)
pub struct MediatorFaultHandler {
    mediator: Arc<dyn Mediator>,
}

impl MediatorFaultHandler {
    pub fn new(mediator: Arc<dyn Mediator>) -> Self {
        Self { mediator }
    }
}

#[async_trait]
impl FaultHandler for MediatorFaultHandler {
    async fn handle_fault(&self, ctx: &mut MessageContext) -> Result<(), MediationError> {
        self.mediator.mediate(ctx).await.map(|_| ())
    }

    fn name(&self) -> &str {
        self.mediator.name()
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Invocation counters held by a mediator
#[derive(Debug, Default)]
pub struct MediatorStats {
    invocations: AtomicU64,
    failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub invocations: u64,
    pub failures: u64,
}

impl MediatorStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record<T>(&self, mediator: &str, result: &Result<T, MediationError>) {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("esb_mediator_invocations_total", "mediator" => mediator.to_string())
            .increment(1);

        if let Err(e) = result {
            self.failures.fetch_add(1, Ordering::Relaxed);
            metrics::counter!(
                "esb_mediator_failures_total",
                "mediator" => mediator.to_string(),
                "kind" => e.kind()
            )
            .increment(1);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            invocations: self.invocations.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

//! Mediation engine
//!
//! Messages flow through trees of [`Mediator`]s. A [`SequenceMediator`] runs
//! its children in order and stops as soon as one of them returns `false`.
//! Failures are returned as [`MediationError`] values and routed by the runner
//! to the innermost fault handler on the context's fault stack.

pub mod builtin;
pub mod cache;
pub mod codec;
pub mod context;
pub mod digest;
pub mod dispatch;
pub mod engine;
pub mod environment;
pub mod fault;
pub mod mediator;
pub mod registry;
pub mod replication;
pub mod sequence;

pub use cache::{CacheManager, CacheMediator, CacheScope, CachedObject};
pub use codec::{EnvelopeCodec, FixedSizeBuffer, MimeCodec};
pub use context::MessageContext;
pub use digest::{DigestGenerator, Sha256Digest};
pub use dispatch::{Dispatcher, Endpoint, HttpDispatcher, HttpDispatcherConfig};
pub use engine::{MediationEngine, MediationOutcome, ProxyService};
pub use environment::{EnvironmentBuilder, MediationEnvironment};
pub use fault::FaultOutcome;
pub use mediator::{FaultHandler, Mediator, MediatorFaultHandler, MediatorStats, StatsSnapshot};
pub use registry::{MediatorFactory, MediatorRegistry};
pub use replication::{ChannelReplicator, NoopReplicator, ReplicationUpdate, Replicator};
pub use sequence::{SequenceMediator, SequenceRef, SequenceRefMediator};

pub use esb_common::{ConfigError, MediationError};

/// Name of the sequence messages are injected into when no proxy applies
pub const MAIN_SEQUENCE: &str = "main";
/// Name of the global fault sequence pushed as the outermost handler
pub const FAULT_SEQUENCE: &str = "fault";

//! Best-effort propagation of cache mutations to cluster peers
//!
//! Callers treat every [`ReplicationError`] as a log line; replication never
//! changes the outcome of the mediation that triggered it.

use std::sync::Arc;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use esb_common::ReplicationError;

use crate::cache::{CacheManager, CachedObject};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ReplicationUpdate {
    Upsert {
        cache_key: String,
        object: CachedObject,
    },
    Remove {
        cache_key: String,
        request_hash: String,
    },
    Clear {
        cache_key: String,
    },
}

impl ReplicationUpdate {
    pub fn cache_key(&self) -> &str {
        match self {
            Self::Upsert { cache_key, .. }
            | Self::Remove { cache_key, .. }
            | Self::Clear { cache_key } => cache_key,
        }
    }
}

#[async_trait]
pub trait Replicator: Send + Sync {
    async fn replicate(&self, update: &ReplicationUpdate) -> Result<(), ReplicationError>;
}

/// Single-node deployments: nothing to propagate
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReplicator;

#[async_trait]
impl Replicator for NoopReplicator {
    async fn replicate(&self, _update: &ReplicationUpdate) -> Result<(), ReplicationError> {
        Ok(())
    }
}

/// Fans updates out to in-process peers over a broadcast channel
pub struct ChannelReplicator {
    tx: broadcast::Sender<ReplicationUpdate>,
}

impl ChannelReplicator {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReplicationUpdate> {
        self.tx.subscribe()
    }

    pub fn peer_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[async_trait]
impl Replicator for ChannelReplicator {
    async fn replicate(&self, update: &ReplicationUpdate) -> Result<(), ReplicationError> {
        self.tx
            .send(update.clone())
            .map(|peers| debug!(peers, cache_key = %update.cache_key(), "Replicated cache update"))
            .map_err(|_| ReplicationError::NoPeers)
    }
}

/// Apply updates received from peers to a local cache manager
pub fn spawn_peer(
    mut updates: broadcast::Receiver<ReplicationUpdate>,
    manager: Arc<CacheManager>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(update) => manager.apply_replicated(update),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Replication peer lagged, cache state may be stale");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("Replication channel closed, peer shutting down");
                    break;
                }
            }
        }
    })
}

//! Shared state visible to every mediator: named sequences, proxies and the
//! collaborator services

use std::sync::{Arc, OnceLock};
use dashmap::DashMap;
use tracing::debug;

use crate::cache::CacheManager;
use crate::codec::{EnvelopeCodec, MimeCodec};
use crate::digest::{DigestGenerator, Sha256Digest};
use crate::dispatch::{Dispatcher, UnconfiguredDispatcher};
use crate::engine::ProxyService;
use crate::mediator::Mediator;
use crate::replication::{NoopReplicator, Replicator};

pub struct MediationEnvironment {
    sequences: DashMap<String, Arc<dyn Mediator>>,
    proxies: DashMap<String, Arc<ProxyService>>,
    dispatcher: Arc<dyn Dispatcher>,
    codec: Arc<dyn EnvelopeCodec>,
    digest: Arc<dyn DigestGenerator>,
    replicator: Arc<dyn Replicator>,
    cache_manager: OnceLock<Arc<CacheManager>>,
}

impl MediationEnvironment {
    pub fn builder() -> EnvironmentBuilder {
        EnvironmentBuilder::default()
    }

    pub fn add_sequence(&self, name: impl Into<String>, sequence: Arc<dyn Mediator>) {
        let name = name.into();
        debug!(sequence = %name, "Registered sequence");
        self.sequences.insert(name, sequence);
    }

    pub fn sequence(&self, name: &str) -> Option<Arc<dyn Mediator>> {
        self.sequences.get(name).map(|entry| entry.value().clone())
    }

    pub fn remove_sequence(&self, name: &str) -> Option<Arc<dyn Mediator>> {
        self.sequences.remove(name).map(|(_, sequence)| sequence)
    }

    pub fn sequence_names(&self) -> Vec<String> {
        self.sequences.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn add_proxy(&self, proxy: ProxyService) {
        debug!(proxy = %proxy.name, "Registered proxy service");
        self.proxies.insert(proxy.name.clone(), Arc::new(proxy));
    }

    pub fn proxy(&self, name: &str) -> Option<Arc<ProxyService>> {
        self.proxies.get(name).map(|entry| entry.value().clone())
    }

    pub fn dispatcher(&self) -> &Arc<dyn Dispatcher> {
        &self.dispatcher
    }

    pub fn codec(&self) -> &Arc<dyn EnvelopeCodec> {
        &self.codec
    }

    pub fn digest(&self) -> &Arc<dyn DigestGenerator> {
        &self.digest
    }

    pub fn replicator(&self) -> &Arc<dyn Replicator> {
        &self.replicator
    }

    /// Cache manager for this environment, created on first use
    ///
    /// Concurrent first callers all observe the same instance.
    pub fn cache_manager(&self) -> &Arc<CacheManager> {
        self.cache_manager.get_or_init(|| {
            debug!("Creating cache manager");
            Arc::new(CacheManager::new(self.replicator.clone()))
        })
    }
}

#[derive(Default)]
pub struct EnvironmentBuilder {
    dispatcher: Option<Arc<dyn Dispatcher>>,
    codec: Option<Arc<dyn EnvelopeCodec>>,
    digest: Option<Arc<dyn DigestGenerator>>,
    replicator: Option<Arc<dyn Replicator>>,
}

impl EnvironmentBuilder {
    pub fn dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn codec(mut self, codec: Arc<dyn EnvelopeCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    pub fn digest(mut self, digest: Arc<dyn DigestGenerator>) -> Self {
        self.digest = Some(digest);
        self
    }

    pub fn replicator(mut self, replicator: Arc<dyn Replicator>) -> Self {
        self.replicator = Some(replicator);
        self
    }

    pub fn build(self) -> Arc<MediationEnvironment> {
        Arc::new(MediationEnvironment {
            sequences: DashMap::new(),
            proxies: DashMap::new(),
            dispatcher: self.dispatcher.unwrap_or_else(|| Arc::new(UnconfiguredDispatcher)),
            codec: self.codec.unwrap_or_else(|| Arc::new(MimeCodec)),
            digest: self.digest.unwrap_or_else(|| Arc::new(Sha256Digest)),
            replicator: self.replicator.unwrap_or_else(|| Arc::new(NoopReplicator)),
            cache_manager: OnceLock::new(),
        })
    }
}

//! Turns an [`EngineConfig`] into a running object graph

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info};

use esb_config::{EngineConfig, ProxyConfig, StoreConfig, StoreKind};
use esb_mediation::cache::CacheMediatorConfig;
use esb_mediation::builtin::register_cache;
use esb_mediation::{
    Endpoint, HttpDispatcher, HttpDispatcherConfig, MediationEngine, MediationEnvironment,
    MediatorRegistry, ProxyService, SequenceMediator, SequenceRef,
};
use esb_store::{
    register_store_mediator, FileMessageStore, InMemoryMessageStore, MessageProcessor,
    MessageStore, PriorityMessageStore, ProcessorConfig, ProcessorRegistry,
};

pub struct Engine {
    pub engine: Arc<MediationEngine>,
    pub processors: Arc<ProcessorRegistry>,
    /// Processors configured with `auto_start`
    pub auto_start: Vec<String>,
}

pub async fn build(config: &EngineConfig) -> Result<Engine> {
    let endpoints = config
        .endpoints
        .iter()
        .map(|e| Endpoint {
            name: e.name.clone(),
            address: e.address.clone(),
            timeout: e.timeout_secs.map(Duration::from_secs),
        })
        .collect();
    let dispatcher = HttpDispatcher::new(
        HttpDispatcherConfig {
            connect_timeout: Duration::from_secs(config.http.connect_timeout_secs),
            request_timeout: Duration::from_secs(config.http.request_timeout_secs),
        },
        endpoints,
    )?;

    let env = MediationEnvironment::builder()
        .dispatcher(Arc::new(dispatcher))
        .build();
    let processors = Arc::new(ProcessorRegistry::new());

    let mut registry = MediatorRegistry::with_builtins();
    register_cache(
        &mut registry,
        CacheMediatorConfig {
            timeout: config.cache.timeout(),
            in_memory_size: config.cache.in_memory_size,
            max_message_size: config.cache.max_message_size,
            ..Default::default()
        },
    );
    register_store_mediator(&mut registry, processors.clone());

    for sequence in &config.sequences {
        let built = registry
            .build_sequence(&sequence.name, &sequence.mediators, sequence.on_error.as_deref())
            .with_context(|| format!("building sequence '{}'", sequence.name))?;
        env.add_sequence(sequence.name.clone(), Arc::new(built));
        debug!(sequence = %sequence.name, "Sequence deployed");
    }

    for proxy in &config.proxies {
        env.add_proxy(build_proxy(&registry, proxy)?);
        debug!(proxy = %proxy.name, "Proxy service deployed");
    }

    let mut stores: HashMap<String, Arc<dyn MessageStore>> = HashMap::new();
    for store in &config.stores {
        stores.insert(store.name.clone(), open_store(store).await?);
    }

    let mut auto_start = Vec::new();
    for settings in &config.processors {
        let store = lookup(&stores, &settings.store)?;
        let dead_letter_store = lookup(&stores, &settings.dead_letter_store)?;

        let processor_config = ProcessorConfig {
            name: settings.name.clone(),
            poll_interval: settings.poll_interval(),
            max_retries: settings.max_retries,
            concurrency: settings.concurrency,
            parameters: settings.parameters.clone(),
        };
        let mut processor = MessageProcessor::new(
            processor_config,
            store,
            dead_letter_store,
            SequenceRef::named(settings.on_process.clone()),
            env.clone(),
        );
        if let Some(on_submit) = &settings.on_submit {
            processor = processor.with_on_submit(SequenceRef::named(on_submit.clone()));
        }
        processors.register(Arc::new(processor));

        if settings.auto_start {
            auto_start.push(settings.name.clone());
        }
    }

    info!(
        sequences = config.sequences.len(),
        proxies = config.proxies.len(),
        stores = stores.len(),
        processors = config.processors.len(),
        "Mediation engine assembled"
    );

    Ok(Engine {
        engine: Arc::new(MediationEngine::new(env)),
        processors,
        auto_start,
    })
}

fn build_proxy(registry: &MediatorRegistry, proxy: &ProxyConfig) -> Result<ProxyService> {
    let mut service = ProxyService::new(proxy.name.clone());

    if let Some(name) = &proxy.in_sequence {
        service = service.with_in_sequence(SequenceRef::named(name.clone()));
    } else if !proxy.in_mediators.is_empty() {
        let children = registry
            .build_all(&proxy.in_mediators)
            .with_context(|| format!("building in-sequence of proxy '{}'", proxy.name))?;
        service = service.with_in_sequence(SequenceRef::Inline(Arc::new(SequenceMediator::anonymous(children))));
    }
    if let Some(name) = &proxy.fault_sequence {
        service = service.with_fault_sequence(SequenceRef::named(name.clone()));
    }
    if let Some(endpoint) = &proxy.target_endpoint {
        service = service.with_target_endpoint(endpoint.clone());
    }
    Ok(service)
}

async fn open_store(store: &StoreConfig) -> Result<Arc<dyn MessageStore>> {
    let opened: Arc<dyn MessageStore> = match store.kind {
        StoreKind::Memory => {
            let memory = InMemoryMessageStore::new(store.name.clone());
            match store.capacity {
                Some(capacity) => Arc::new(memory.with_capacity(capacity)),
                None => Arc::new(memory),
            }
        }
        StoreKind::Priority => {
            let default_priority = store
                .default_priority
                .or_else(|| store.priorities.iter().min().copied())
                .unwrap_or(0);
            Arc::new(PriorityMessageStore::new(
                store.name.clone(),
                &store.priorities,
                default_priority,
            ))
        }
        StoreKind::File => {
            let path = store
                .path
                .as_ref()
                .with_context(|| format!("file store '{}' has no path", store.name))?;
            Arc::new(
                FileMessageStore::open(store.name.clone(), path)
                    .await
                    .with_context(|| format!("opening file store '{}'", store.name))?,
            )
        }
    };
    Ok(opened)
}

fn lookup(stores: &HashMap<String, Arc<dyn MessageStore>>, name: &str) -> Result<Arc<dyn MessageStore>> {
    stores
        .get(name)
        .cloned()
        .with_context(|| format!("unknown message store '{}'", name))
}

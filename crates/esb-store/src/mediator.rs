use std::sync::Arc;

use async_trait::async_trait;

use esb_common::MediationError;
use esb_mediation::registry::params;
use esb_mediation::{Mediator, MediatorRegistry, MessageContext};

use crate::registry::ProcessorRegistry;

/// Hands the current message to a processor's store and ends the pipeline
///
/// The processor is looked up per message, so sequences can reference
/// processors registered after they were built.
pub struct StoreMediator {
    name: String,
    processor: String,
    processors: Arc<ProcessorRegistry>,
}

impl StoreMediator {
    pub fn new(processor: impl Into<String>, processors: Arc<ProcessorRegistry>) -> Self {
        let processor = processor.into();
        Self {
            name: format!("store:{}", processor),
            processor,
            processors,
        }
    }
}

#[async_trait]
impl Mediator for StoreMediator {
    async fn mediate(&self, ctx: &mut MessageContext) -> Result<bool, MediationError> {
        let processor = self.processors.get(&self.processor).ok_or_else(|| {
            MediationError::configuration(format!("Message processor '{}' not found", self.processor))
        })?;
        processor.submit(ctx).await?;
        Ok(false)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Register the `store` tag, resolving processors through `processors`
pub fn register_store_mediator(registry: &mut MediatorRegistry, processors: Arc<ProcessorRegistry>) {
    registry.register("store", move |p, _| {
        let processor = params::required_str("store", p, "processor")?;
        Ok(Arc::new(StoreMediator::new(processor, processors.clone())) as Arc<dyn Mediator>)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryMessageStore;
    use crate::processor::{MessageProcessor, ProcessorConfig};
    use crate::store::MessageStore;
    use esb_common::{ConfigError, Envelope, MediatorSpec};
    use esb_mediation::{MediationEnvironment, SequenceRef};

    #[tokio::test]
    async fn test_store_mediator_submits_and_stops() {
        let env = MediationEnvironment::builder().build();
        let processors = Arc::new(ProcessorRegistry::new());
        let store = Arc::new(InMemoryMessageStore::new("queue"));
        processors.register(Arc::new(MessageProcessor::new(
            ProcessorConfig::new("forwarder"),
            store.clone(),
            Arc::new(InMemoryMessageStore::new("queue-dlc")),
            SequenceRef::named("deliver"),
            env.clone(),
        )));

        let mut registry = MediatorRegistry::new();
        register_store_mediator(&mut registry, processors);
        let mediator = registry
            .build(&MediatorSpec::new("store").with_param("processor", "forwarder"))
            .unwrap();

        let mut ctx = MessageContext::new(env, Envelope::text("order"));
        assert!(!mediator.mediate(&mut ctx).await.unwrap());
        assert_eq!(store.list_ids().await.unwrap(), vec![ctx.message_id().to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_processor_is_configuration_error() {
        let env = MediationEnvironment::builder().build();
        let mediator = StoreMediator::new("missing", Arc::new(ProcessorRegistry::new()));

        let mut ctx = MessageContext::new(env, Envelope::text("x"));
        let err = mediator.mediate(&mut ctx).await.unwrap_err();
        assert_eq!(err.kind(), "CONFIGURATION");
    }

    #[test]
    fn test_processor_parameter_required() {
        let mut registry = MediatorRegistry::new();
        register_store_mediator(&mut registry, Arc::new(ProcessorRegistry::new()));

        let err = registry.build(&MediatorSpec::new("store")).err().unwrap();
        assert!(matches!(err, ConfigError::MissingParameter { .. }));
    }
}

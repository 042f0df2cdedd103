use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use esb_common::{properties, CacheError, MediationError};

use crate::cache::{CacheManager, Lookup, DEFAULT_IN_MEMORY_SIZE, PER_HOST_CACHE_KEY};
use crate::codec::FixedSizeBuffer;
use crate::context::MessageContext;
use crate::mediator::Mediator;
use crate::sequence::SequenceRef;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheScope {
    /// One scope shared by every cache mediator on this node
    #[default]
    PerHost,
    /// A private scope per mediator instance
    PerMediator,
}

#[derive(Debug, Clone)]
pub struct CacheMediatorConfig {
    /// Identifies the scope of a per-mediator cache; generated when absent
    pub id: Option<String>,
    pub scope: CacheScope,
    /// Collectors only see responses routed back from a request-mode cache
    pub collector: bool,
    /// Lifetime of a cached response; zero never expires
    pub timeout: Duration,
    pub in_memory_size: usize,
    /// Messages whose serialized form exceeds this are not cached
    pub max_message_size: Option<usize>,
}

impl Default for CacheMediatorConfig {
    fn default() -> Self {
        Self {
            id: None,
            scope: CacheScope::PerHost,
            collector: false,
            timeout: Duration::from_secs(60),
            in_memory_size: DEFAULT_IN_MEMORY_SIZE,
            max_message_size: None,
        }
    }
}

/// Memoizes responses by request digest
///
/// A request-mode instance serves hits and registers misses; a collector
/// instance further down the response path captures the response for the
/// pending request.
pub struct CacheMediator {
    name: String,
    cache_key: String,
    config: CacheMediatorConfig,
    on_cache_hit: Option<SequenceRef>,
}

impl CacheMediator {
    pub fn new(config: CacheMediatorConfig) -> Self {
        let id = config
            .id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
        let cache_key = match config.scope {
            CacheScope::PerHost => PER_HOST_CACHE_KEY.to_string(),
            CacheScope::PerMediator => format!("{}_{}", PER_HOST_CACHE_KEY, id),
        };
        let name = if config.collector {
            format!("cache-collector:{}", id)
        } else {
            format!("cache:{}", id)
        };

        Self {
            name,
            cache_key,
            config,
            on_cache_hit: None,
        }
    }

    pub fn with_on_cache_hit(mut self, sequence: SequenceRef) -> Self {
        self.on_cache_hit = Some(sequence);
        self
    }

    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }

    pub fn config(&self) -> &CacheMediatorConfig {
        &self.config
    }

    fn timeout_millis(&self) -> i64 {
        i64::try_from(self.config.timeout.as_millis()).unwrap_or(i64::MAX)
    }

    fn exceeds_max_size(&self, ctx: &MessageContext) -> Result<bool, MediationError> {
        let Some(limit) = self.config.max_message_size.filter(|limit| *limit > 0) else {
            return Ok(false);
        };

        let mut buffer = FixedSizeBuffer::new(limit);
        match ctx.environment().codec().encode(&ctx.envelope, &mut buffer) {
            Ok(()) => Ok(false),
            Err(_) if buffer.overflowed() => Ok(true),
            Err(e) => Err(CacheError::Codec(format!("Error in checking the message size: {}", e)).into()),
        }
    }

    async fn process_request(
        &self,
        ctx: &mut MessageContext,
        manager: &CacheManager,
    ) -> Result<bool, MediationError> {
        if self.config.collector {
            return Err(MediationError::mediation(
                &self.name,
                "Request messages cannot be handled in a collector cache",
            ));
        }

        let request_hash = ctx.environment().digest().digest(ctx)?;
        trace!(message_id = %ctx.message_id(), request_hash = %request_hash, "Generated request hash");
        ctx.set_property(properties::REQUEST_HASH, request_hash.clone());

        match manager
            .lookup(&self.cache_key, &request_hash, self.timeout_millis())
            .await
        {
            Lookup::Hit(response) => {
                metrics::counter!("esb_cache_hits_total", "cache_key" => self.cache_key.clone())
                    .increment(1);
                debug!(message_id = %ctx.message_id(), cache_key = %self.cache_key, "Cache-hit");

                ctx.envelope = ctx.environment().codec().decode(&response)?;
                ctx.is_response = true;

                match &self.on_cache_hit {
                    Some(sequence) => {
                        let target = sequence.resolve(ctx.environment()).ok_or_else(|| {
                            MediationError::configuration(format!(
                                "On cache hit sequence {} cannot be found",
                                sequence.describe()
                            ))
                        })?;
                        debug!(sequence = %sequence.describe(), "Delegating message to the on cache hit sequence");
                        target.mediate(ctx).await?;
                    }
                    None => {
                        debug!(
                            message_id = %ctx.message_id(),
                            cache_key = %self.cache_key,
                            "Request message was served from the cache"
                        );
                        ctx.to = None;
                        let dispatcher = ctx.environment().dispatcher().clone();
                        dispatcher.send_back(ctx).await?;
                    }
                }
                Ok(false)
            }
            Lookup::Reset => {
                metrics::counter!("esb_cache_misses_total", "cache_key" => self.cache_key.clone())
                    .increment(1);
                Ok(true)
            }
            Lookup::Absent => {
                metrics::counter!("esb_cache_misses_total", "cache_key" => self.cache_key.clone())
                    .increment(1);
                manager
                    .admit(
                        &self.cache_key,
                        &request_hash,
                        self.timeout_millis(),
                        self.config.in_memory_size,
                    )
                    .await;
                Ok(true)
            }
        }
    }

    async fn process_response(
        &self,
        ctx: &mut MessageContext,
        manager: &CacheManager,
    ) -> Result<(), MediationError> {
        if !self.config.collector {
            return Err(MediationError::mediation(
                &self.name,
                "Response messages cannot be handled in a non collector cache",
            ));
        }

        let Some(request_hash) = ctx.property_str(properties::REQUEST_HASH).map(str::to_string) else {
            warn!(
                message_id = %ctx.message_id(),
                "A response message without a mapping to the request hash found. Unable to store the response in cache"
            );
            return Ok(());
        };

        let response = ctx.environment().codec().to_bytes(&ctx.envelope)?;
        if manager.store_response(&self.cache_key, &request_hash, response).await {
            debug!(
                message_id = %ctx.message_id(),
                cache_key = %self.cache_key,
                request_hash = %request_hash,
                "Stored response in the cache"
            );
        } else {
            warn!(
                message_id = %ctx.message_id(),
                request_hash = %request_hash,
                "A response message without a valid mapping to the request hash found. Unable to store the response in cache"
            );
        }
        Ok(())
    }
}

#[async_trait]
impl Mediator for CacheMediator {
    async fn mediate(&self, ctx: &mut MessageContext) -> Result<bool, MediationError> {
        trace!(message_id = %ctx.message_id(), envelope = ?ctx.envelope, "Start : Cache mediator");

        if self.exceeds_max_size(ctx)? {
            debug!(
                message_id = %ctx.message_id(),
                "Message size exceeds the upper bound for caching, request will not be cached"
            );
            return Ok(true);
        }

        let manager: Arc<CacheManager> = ctx.environment().cache_manager().clone();
        if ctx.is_response {
            self.process_response(ctx, &manager).await?;
            Ok(true)
        } else {
            self.process_request(ctx, &manager).await
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use esb_common::Envelope;
    use crate::environment::MediationEnvironment;

    fn collector() -> CacheMediator {
        CacheMediator::new(CacheMediatorConfig {
            id: Some("c".to_string()),
            collector: true,
            ..Default::default()
        })
    }

    #[test]
    fn test_cache_key_per_scope() {
        let host = CacheMediator::new(CacheMediatorConfig::default());
        assert_eq!(host.cache_key(), "esb.cache_key");

        let private = CacheMediator::new(CacheMediatorConfig {
            id: Some("quotes".to_string()),
            scope: CacheScope::PerMediator,
            ..Default::default()
        });
        assert_eq!(private.cache_key(), "esb.cache_key_quotes");
    }

    #[tokio::test]
    async fn test_collector_rejects_requests() {
        let env = MediationEnvironment::builder().build();
        let mut ctx = MessageContext::new(env, Envelope::text("req"));

        let err = collector().mediate(&mut ctx).await.unwrap_err();
        assert_eq!(err.kind(), "MEDIATION");
    }

    #[tokio::test]
    async fn test_request_cache_rejects_responses() {
        let env = MediationEnvironment::builder().build();
        let mut ctx = MessageContext::new(env, Envelope::text("resp"));
        ctx.is_response = true;

        let err = CacheMediator::new(CacheMediatorConfig::default())
            .mediate(&mut ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "MEDIATION");
    }

    #[tokio::test]
    async fn test_oversized_message_skips_cache() {
        let env = MediationEnvironment::builder().build();
        let mut ctx = MessageContext::new(env.clone(), Envelope::text("x".repeat(4096)));
        let cache = CacheMediator::new(CacheMediatorConfig {
            max_message_size: Some(128),
            ..Default::default()
        });

        assert!(cache.mediate(&mut ctx).await.unwrap());
        assert!(ctx.property(properties::REQUEST_HASH).is_none());
        assert_eq!(env.cache_manager().stats(cache.cache_key()).entries, 0);
    }
}

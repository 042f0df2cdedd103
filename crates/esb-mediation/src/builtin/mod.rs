//! Mediators shipped with the engine and their factories

mod flow;
mod log;
mod property;
mod send;

use std::sync::Arc;
use std::time::Duration;

use esb_common::{ConfigError, MediatorParams};

use crate::cache::{CacheMediator, CacheMediatorConfig, CacheScope};
use crate::mediator::Mediator;
use crate::registry::{params, MediatorRegistry};
use crate::sequence::{SequenceMediator, SequenceRefMediator};

pub use flow::{Direction, DirectionFilter, DropMediator, RespondMediator};
pub use log::{LogLevel, LogMediator};
pub use property::{PropertyAction, PropertyMediator};
pub use send::SendMediator;

pub fn register_builtins(registry: &mut MediatorRegistry) {
    registry.register("log", build_log);
    registry.register("property", build_property);
    registry.register("drop", |_, _| Ok(Arc::new(DropMediator) as Arc<dyn Mediator>));
    registry.register("respond", |_, _| Ok(Arc::new(RespondMediator) as Arc<dyn Mediator>));
    registry.register("send", build_send);
    registry.register("sequence", build_sequence);
    registry.register("in", |p, r| build_filter(Direction::Request, p, r));
    registry.register("out", |p, r| build_filter(Direction::Response, p, r));
    register_cache(registry, CacheMediatorConfig::default());
}

/// Register the `cache` tag with engine-wide defaults for unset parameters
pub fn register_cache(registry: &mut MediatorRegistry, defaults: CacheMediatorConfig) {
    registry.register("cache", move |p, r| build_cache(&defaults, p, r));
}

fn build_log(p: &MediatorParams, _: &MediatorRegistry) -> Result<Arc<dyn Mediator>, ConfigError> {
    let level = match params::optional_str("log", p, "level")? {
        Some(level) => level.parse::<LogLevel>().map_err(|reason: String| ConfigError::InvalidParameter {
            mediator: "log".to_string(),
            param: "level".to_string(),
            reason,
        })?,
        None => LogLevel::Info,
    };
    Ok(Arc::new(LogMediator::new(
        level,
        params::optional_str("log", p, "message")?,
        params::string_list("log", p, "properties")?,
    )))
}

fn build_property(p: &MediatorParams, _: &MediatorRegistry) -> Result<Arc<dyn Mediator>, ConfigError> {
    let name = params::required_str("property", p, "name")?;
    let action = match params::optional_str("property", p, "action")?.as_deref() {
        Some("remove") => PropertyAction::Remove,
        Some("set") | None => PropertyAction::Set(
            p.get("value")
                .cloned()
                .ok_or_else(|| ConfigError::missing("property", "value"))?,
        ),
        Some(other) => {
            return Err(ConfigError::InvalidParameter {
                mediator: "property".to_string(),
                param: "action".to_string(),
                reason: format!("unknown action {}", other),
            })
        }
    };
    Ok(Arc::new(PropertyMediator::new(name, action)))
}

fn build_send(p: &MediatorParams, r: &MediatorRegistry) -> Result<Arc<dyn Mediator>, ConfigError> {
    let endpoint = params::required_str("send", p, "endpoint")?;
    let mut send = SendMediator::new(endpoint);
    if let Some(receive) = r.sequence_ref("send", p, "receive")? {
        send = send.with_receive(receive);
    }
    Ok(Arc::new(send))
}

fn build_sequence(p: &MediatorParams, r: &MediatorRegistry) -> Result<Arc<dyn Mediator>, ConfigError> {
    if let Some(key) = params::optional_str("sequence", p, "key")? {
        return Ok(Arc::new(SequenceRefMediator::new(key)));
    }
    if !p.contains_key("mediators") {
        return Err(ConfigError::missing("sequence", "key"));
    }

    let name = params::optional_str("sequence", p, "name")?.unwrap_or_else(|| "anonymous".to_string());
    let mut sequence = SequenceMediator::new(name, r.children("sequence", p, "mediators")?);
    if let Some(on_error) = r.sequence_ref("sequence", p, "on_error")? {
        sequence = sequence.with_error_handler(on_error);
    }
    Ok(Arc::new(sequence))
}

fn build_filter(
    direction: Direction,
    p: &MediatorParams,
    r: &MediatorRegistry,
) -> Result<Arc<dyn Mediator>, ConfigError> {
    let tag = direction.tag();
    let children = r.children(tag, p, "mediators")?;
    Ok(Arc::new(DirectionFilter::new(direction, SequenceMediator::new(tag, children))))
}

fn build_cache(
    defaults: &CacheMediatorConfig,
    p: &MediatorParams,
    r: &MediatorRegistry,
) -> Result<Arc<dyn Mediator>, ConfigError> {
    let scope = match params::optional_str("cache", p, "scope")?.as_deref() {
        None => defaults.scope,
        Some("per_host") => CacheScope::PerHost,
        Some("per_mediator") => CacheScope::PerMediator,
        Some(other) => {
            return Err(ConfigError::InvalidParameter {
                mediator: "cache".to_string(),
                param: "scope".to_string(),
                reason: format!("unknown scope {}", other),
            })
        }
    };

    let config = CacheMediatorConfig {
        id: params::optional_str("cache", p, "id")?.or_else(|| defaults.id.clone()),
        scope,
        collector: params::optional_bool("cache", p, "collector")?.unwrap_or(defaults.collector),
        timeout: params::optional_u64("cache", p, "timeout_secs")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.timeout),
        in_memory_size: params::optional_u64("cache", p, "in_memory_size")?
            .map(|size| size as usize)
            .unwrap_or(defaults.in_memory_size),
        max_message_size: params::optional_u64("cache", p, "max_message_size")?
            .map(|size| size as usize)
            .or(defaults.max_message_size),
    };

    let mut cache = CacheMediator::new(config);
    if let Some(on_hit) = r.sequence_ref("cache", p, "on_cache_hit")? {
        cache = cache.with_on_cache_hit(on_hit);
    }
    Ok(Arc::new(cache))
}

//! Explicit mediator factory registry
//!
//! Configuration describes mediators as a tag plus a parameter table. The
//! registry maps each tag to a construction function. It is built once at
//! startup and extended only through [`MediatorRegistry::register`].

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use esb_common::{ConfigError, MediatorParams, MediatorSpec};

use crate::builtin;
use crate::mediator::Mediator;
use crate::sequence::{SequenceMediator, SequenceRef};

pub type MediatorFactory = Arc<
    dyn Fn(&MediatorParams, &MediatorRegistry) -> Result<Arc<dyn Mediator>, ConfigError> + Send + Sync,
>;

#[derive(Clone, Default)]
pub struct MediatorRegistry {
    factories: HashMap<String, MediatorFactory>,
}

impl MediatorRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every mediator shipped with this crate
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtin::register_builtins(&mut registry);
        registry
    }

    /// Register (or replace) the factory for `tag`
    pub fn register<F>(&mut self, tag: impl Into<String>, factory: F)
    where
        F: Fn(&MediatorParams, &MediatorRegistry) -> Result<Arc<dyn Mediator>, ConfigError>
            + Send
            + Sync
            + 'static,
    {
        let tag = tag.into();
        debug!(tag = %tag, "Registered mediator factory");
        self.factories.insert(tag, Arc::new(factory));
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.factories.contains_key(tag)
    }

    pub fn tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }

    pub fn build(&self, spec: &MediatorSpec) -> Result<Arc<dyn Mediator>, ConfigError> {
        let factory = self
            .factories
            .get(&spec.tag)
            .ok_or_else(|| ConfigError::UnknownMediator(spec.tag.clone()))?;
        factory(&spec.params, self)
    }

    pub fn build_all(&self, specs: &[MediatorSpec]) -> Result<Vec<Arc<dyn Mediator>>, ConfigError> {
        specs.iter().map(|spec| self.build(spec)).collect()
    }

    /// Build a named sequence with an optional error handler sequence
    pub fn build_sequence(
        &self,
        name: &str,
        specs: &[MediatorSpec],
        on_error: Option<&str>,
    ) -> Result<SequenceMediator, ConfigError> {
        let sequence = SequenceMediator::new(name, self.build_all(specs)?);
        Ok(match on_error {
            Some(handler) => sequence.with_error_handler(SequenceRef::named(handler)),
            None => sequence,
        })
    }

    /// Child mediators listed under `key`; missing key means no children
    pub fn children(
        &self,
        tag: &str,
        params: &MediatorParams,
        key: &str,
    ) -> Result<Vec<Arc<dyn Mediator>>, ConfigError> {
        match params.get(key) {
            None => Ok(Vec::new()),
            Some(value) => {
                let specs: Vec<MediatorSpec> = serde_json::from_value(value.clone())
                    .map_err(|e| invalid(tag, key, e.to_string()))?;
                self.build_all(&specs)
            }
        }
    }

    /// Sequence reference under `key`: a string names a registered sequence,
    /// an array of mediators builds an anonymous one
    pub fn sequence_ref(
        &self,
        tag: &str,
        params: &MediatorParams,
        key: &str,
    ) -> Result<Option<SequenceRef>, ConfigError> {
        match params.get(key) {
            None => Ok(None),
            Some(serde_json::Value::String(name)) => Ok(Some(SequenceRef::named(name.clone()))),
            Some(serde_json::Value::Array(_)) => {
                let children = self.children(tag, params, key)?;
                Ok(Some(SequenceRef::Inline(Arc::new(SequenceMediator::anonymous(children)))))
            }
            Some(_) => Err(invalid(tag, key, "expected a sequence name or a list of mediators")),
        }
    }
}

fn invalid(tag: &str, param: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidParameter {
        mediator: tag.to_string(),
        param: param.to_string(),
        reason: reason.into(),
    }
}

/// Typed accessors over a mediator's parameter table
pub mod params {
    use super::*;

    pub fn optional_str(
        tag: &str,
        params: &MediatorParams,
        key: &str,
    ) -> Result<Option<String>, ConfigError> {
        match params.get(key) {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(serde_json::Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(invalid(tag, key, "expected a string")),
        }
    }

    pub fn required_str(tag: &str, params: &MediatorParams, key: &str) -> Result<String, ConfigError> {
        optional_str(tag, params, key)?.ok_or_else(|| ConfigError::missing(tag, key))
    }

    pub fn optional_bool(
        tag: &str,
        params: &MediatorParams,
        key: &str,
    ) -> Result<Option<bool>, ConfigError> {
        match params.get(key) {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(serde_json::Value::Bool(b)) => Ok(Some(*b)),
            Some(_) => Err(invalid(tag, key, "expected a boolean")),
        }
    }

    pub fn optional_u64(
        tag: &str,
        params: &MediatorParams,
        key: &str,
    ) -> Result<Option<u64>, ConfigError> {
        match params.get(key) {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(value) => value
                .as_u64()
                .map(Some)
                .ok_or_else(|| invalid(tag, key, "expected a non-negative integer")),
        }
    }

    pub fn string_list(
        tag: &str,
        params: &MediatorParams,
        key: &str,
    ) -> Result<Vec<String>, ConfigError> {
        match params.get(key) {
            None | Some(serde_json::Value::Null) => Ok(Vec::new()),
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|_| invalid(tag, key, "expected a list of strings")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(value: serde_json::Value) -> MediatorSpec {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_builtin_tags_registered() {
        let registry = MediatorRegistry::with_builtins();
        for tag in ["log", "property", "drop", "send", "respond", "sequence", "cache", "in", "out"] {
            assert!(registry.contains(tag), "missing builtin {}", tag);
        }
    }

    #[test]
    fn test_unknown_tag_is_rejected() {
        let registry = MediatorRegistry::with_builtins();
        let err = registry.build(&MediatorSpec::new("xslt")).err().unwrap();
        assert!(matches!(err, ConfigError::UnknownMediator(tag) if tag == "xslt"));
    }

    #[test]
    fn test_missing_required_parameter() {
        let registry = MediatorRegistry::with_builtins();
        let err = registry.build(&MediatorSpec::new("send")).err().unwrap();
        assert!(matches!(err, ConfigError::MissingParameter { param, .. } if param == "endpoint"));
    }

    #[test]
    fn test_nested_children_are_built() {
        let registry = MediatorRegistry::with_builtins();
        let mediator = registry
            .build(&spec(json!({
                "type": "in",
                "mediators": [
                    {"type": "log", "message": "request"},
                    {"type": "drop"}
                ]
            })))
            .unwrap();
        assert_eq!(mediator.name(), "in");
    }

    #[test]
    fn test_custom_factory_registration() {
        let mut registry = MediatorRegistry::new();
        registry.register("noop", |_params, _registry| {
            Ok(Arc::new(SequenceMediator::new("noop", Vec::new())) as Arc<dyn Mediator>)
        });

        assert_eq!(registry.tags(), vec!["noop"]);
        assert_eq!(registry.build(&MediatorSpec::new("noop")).unwrap().name(), "noop");
    }

    #[test]
    fn test_sequence_ref_forms() {
        let registry = MediatorRegistry::with_builtins();
        let mut params = MediatorParams::new();
        params.insert("named".into(), json!("fault"));
        params.insert("inline".into(), json!([{"type": "drop"}]));
        params.insert("bad".into(), json!(42));

        assert!(matches!(
            registry.sequence_ref("t", &params, "named").unwrap(),
            Some(SequenceRef::Named(n)) if n == "fault"
        ));
        assert!(matches!(
            registry.sequence_ref("t", &params, "inline").unwrap(),
            Some(SequenceRef::Inline(_))
        ));
        assert!(registry.sequence_ref("t", &params, "bad").is_err());
        assert!(registry.sequence_ref("t", &params, "absent").unwrap().is_none());
    }
}

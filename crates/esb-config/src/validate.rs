use std::collections::HashSet;

use esb_common::ConfigError;

use crate::{EngineConfig, StoreKind};

impl EngineConfig {
    /// Check names are unique and every cross reference resolves
    pub fn validate(&self) -> Result<(), ConfigError> {
        unique("endpoint", self.endpoints.iter().map(|e| e.name.as_str()))?;
        unique("store", self.stores.iter().map(|s| s.name.as_str()))?;
        unique("processor", self.processors.iter().map(|p| p.name.as_str()))?;
        unique("sequence", self.sequences.iter().map(|s| s.name.as_str()))?;
        unique("proxy", self.proxies.iter().map(|p| p.name.as_str()))?;

        for endpoint in &self.endpoints {
            if endpoint.address.trim().is_empty() {
                return Err(ConfigError::invalid(format!(
                    "endpoint '{}' has an empty address",
                    endpoint.name
                )));
            }
        }

        for store in &self.stores {
            match store.kind {
                StoreKind::File if store.path.is_none() => {
                    return Err(ConfigError::invalid(format!(
                        "file store '{}' requires a path",
                        store.name
                    )));
                }
                StoreKind::Priority if store.priorities.is_empty() && store.default_priority.is_none() => {
                    return Err(ConfigError::invalid(format!(
                        "priority store '{}' requires priorities",
                        store.name
                    )));
                }
                _ => {}
            }
        }

        for sequence in &self.sequences {
            if let Some(on_error) = &sequence.on_error {
                self.require_sequence(on_error, &format!("sequence '{}'", sequence.name))?;
            }
        }

        for processor in &self.processors {
            let owner = format!("processor '{}'", processor.name);
            self.require_store(&processor.store, &owner)?;
            self.require_store(&processor.dead_letter_store, &owner)?;
            if processor.store == processor.dead_letter_store {
                return Err(ConfigError::invalid(format!(
                    "{} uses '{}' as both store and dead-letter store",
                    owner, processor.store
                )));
            }
            self.require_sequence(&processor.on_process, &owner)?;
            if let Some(on_submit) = &processor.on_submit {
                self.require_sequence(on_submit, &owner)?;
            }
            if processor.concurrency == 0 {
                return Err(ConfigError::invalid(format!("{} needs concurrency >= 1", owner)));
            }
            if processor.poll_interval_ms == 0 {
                return Err(ConfigError::invalid(format!("{} needs a non-zero poll interval", owner)));
            }
        }

        for proxy in &self.proxies {
            let owner = format!("proxy '{}'", proxy.name);
            if proxy.in_sequence.is_some() && !proxy.in_mediators.is_empty() {
                return Err(ConfigError::invalid(format!(
                    "{} sets both in_sequence and in_mediators",
                    owner
                )));
            }
            if let Some(in_sequence) = &proxy.in_sequence {
                self.require_sequence(in_sequence, &owner)?;
            }
            if let Some(fault_sequence) = &proxy.fault_sequence {
                self.require_sequence(fault_sequence, &owner)?;
            }
            if let Some(endpoint) = &proxy.target_endpoint {
                if !self.endpoints.iter().any(|e| &e.name == endpoint) {
                    return Err(ConfigError::invalid(format!(
                        "{} targets unknown endpoint '{}'",
                        owner, endpoint
                    )));
                }
            }
        }

        Ok(())
    }

    fn require_store(&self, name: &str, owner: &str) -> Result<(), ConfigError> {
        if self.store(name).is_none() {
            return Err(ConfigError::invalid(format!("{} references unknown store '{}'", owner, name)));
        }
        Ok(())
    }

    fn require_sequence(&self, name: &str, owner: &str) -> Result<(), ConfigError> {
        if self.sequence(name).is_none() {
            return Err(ConfigError::invalid(format!(
                "{} references unknown sequence '{}'",
                owner, name
            )));
        }
        Ok(())
    }
}

fn unique<'a>(kind: &str, names: impl Iterator<Item = &'a str>) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(ConfigError::invalid(format!("duplicate {} name '{}'", kind, name)));
        }
    }
    Ok(())
}

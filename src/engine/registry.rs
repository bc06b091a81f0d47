//! Engine Registry
//!
//! Process-wide lookup of engines by id, for hosts that run several.

use std::sync::Arc;

use dashmap::DashMap;
use log::info;

use super::{Engine, EngineBuilder};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};

#[derive(Default)]
pub struct EngineRegistry {
    engines: DashMap<String, Arc<Engine>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an engine from a configuration and registers it.
    pub fn new_instance(&self, config: EngineConfig) -> Result<Arc<Engine>> {
        self.new_instance_with(EngineBuilder::new(config))
    }

    /// Builds an engine from a prepared builder and registers it.
    pub fn new_instance_with(&self, builder: EngineBuilder) -> Result<Arc<Engine>> {
        let engine = Arc::new(builder.build()?);
        self.engines
            .insert(engine.id().to_string(), Arc::clone(&engine));
        info!("Registered engine {}", engine.id());
        Ok(engine)
    }

    pub fn get_instance(&self, id: &str) -> Result<Arc<Engine>> {
        self.engines
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| EngineError::EngineNotFound(id.to_string()))
    }

    /// Unregisters an engine and shuts it down.
    pub fn remove(&self, id: &str) -> Option<Arc<Engine>> {
        let (_, engine) = self.engines.remove(id)?;
        engine.shutdown();
        Some(engine)
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.engines.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instances_are_registered_by_id() {
        let registry = EngineRegistry::new();
        let first = registry.new_instance(EngineConfig::in_memory()).unwrap();
        let second = registry.new_instance(EngineConfig::in_memory()).unwrap();

        assert_ne!(first.id(), second.id());
        assert_eq!(registry.len(), 2);
        assert!(Arc::ptr_eq(&registry.get_instance(first.id()).unwrap(), &first));
    }

    #[test]
    fn test_unknown_id() {
        let registry = EngineRegistry::new();
        assert!(matches!(
            registry.get_instance("nope"),
            Err(EngineError::EngineNotFound(id)) if id == "nope"
        ));
    }

    #[test]
    fn test_remove_shuts_engine_down() {
        let registry = EngineRegistry::new();
        let engine = registry.new_instance(EngineConfig::in_memory()).unwrap();
        let id = engine.id().to_string();

        let removed = registry.remove(&id).unwrap();
        assert!(removed.context().queue.is_closed());
        assert!(registry.is_empty());
        assert!(registry.remove(&id).is_none());
    }

    #[test]
    fn test_invalid_config_not_registered() {
        let registry = EngineRegistry::new();
        let config = EngineConfig::in_memory().with_pool_sizes(1, 0);

        assert!(registry.new_instance(config).is_err());
        assert!(registry.ids().is_empty());
    }
}

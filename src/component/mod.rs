//! Job Components
//!
//! A component is the code behind a job type. Jobs name their component,
//! and the registry resolves that name when the executor runs the job.
//!
//! - [`shell`]: Runs a bash command

pub mod shell;

use std::collections::BTreeMap;
use std::error::Error;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::model::Job;
use crate::runtime::service::ExecutionService;

pub use shell::ShellComponent;

pub type ComponentResult = Result<(), Box<dyn Error + Send + Sync>>;

/// Describes one property a component reads from a job.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PropertyDefinition {
    pub name: String,
    pub required: bool,
    pub description: String,
}

/// Metadata describing a component, published to the store at seed time.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ComponentDefinition {
    pub name: String,
    pub description: String,
    pub properties: Vec<PropertyDefinition>,
}

impl ComponentDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            properties: Vec::new(),
        }
    }

    pub fn with_property(
        mut self,
        name: impl Into<String>,
        required: bool,
        description: impl Into<String>,
    ) -> Self {
        self.properties.push(PropertyDefinition {
            name: name.into(),
            required,
            description: description.into(),
        });
        self
    }

    /// Names of required properties missing from a job.
    pub fn missing_properties(&self, job: &Job) -> Vec<String> {
        self.properties
            .iter()
            .filter(|p| p.required && !job.properties.contains_key(&p.name))
            .map(|p| p.name.clone())
            .collect()
    }
}

/// Executes jobs of one type.
pub trait Component: Send + Sync {
    fn definition(&self) -> ComponentDefinition;

    /// Runs a job. Progress can be written to the execution's log.
    fn run(&self, job: &Job, execution: &ExecutionService) -> ComponentResult;
}

/// Name-indexed set of components.
#[derive(Clone, Default)]
pub struct ComponentRegistry {
    components: BTreeMap<String, Arc<dyn Component>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the components shipped with the engine.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(ShellComponent::new());
        registry
    }

    /// Adds a component, replacing any with the same name.
    pub fn register(&mut self, component: impl Component + 'static) {
        let name = component.definition().name;
        self.components.insert(name, Arc::new(component));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Component>> {
        self.components.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.components.contains_key(name)
    }

    pub fn definitions(&self) -> Vec<ComponentDefinition> {
        self.components.values().map(|c| c.definition()).collect()
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

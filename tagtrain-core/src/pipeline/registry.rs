//! Component registry: resolves factory names to component constructors.
//!
//! Pipelines never construct components directly: `add_pipe("parser")` and
//! snapshot loading both go through the registry, so a custom component only
//! needs registering once to be creatable, savable and reloadable.

use super::TrainableComponent;
use super::components::{MergeSubtokens, TokenClassifier};
use crate::error::CoreError;
use std::collections::BTreeMap;
use tracing::debug;

pub type ComponentFactory = fn() -> Box<dyn TrainableComponent>;

#[derive(Clone)]
pub struct ComponentRegistry {
    factories: BTreeMap<String, ComponentFactory>,
}

impl ComponentRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Registry with `tagger`, `parser`, `ner` and `merge_subtokens`.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        let defaults: [(&str, ComponentFactory); 4] = [
            ("tagger", || Box::new(TokenClassifier::tagger())),
            ("parser", || Box::new(TokenClassifier::parser())),
            ("ner", || Box::new(TokenClassifier::entity_recognizer())),
            (MergeSubtokens::NAME, || Box::new(MergeSubtokens)),
        ];
        for (name, factory) in defaults {
            registry.factories.insert(name.to_string(), factory);
        }
        registry
    }

    /// Register a factory. Errors if the name is taken.
    pub fn register(&mut self, name: &str, factory: ComponentFactory) -> Result<(), CoreError> {
        if self.factories.contains_key(name) {
            return Err(CoreError::AlreadyRegistered {
                name: name.to_string(),
            });
        }
        debug!(factory = %name, "Registering component factory");
        self.factories.insert(name.to_string(), factory);
        Ok(())
    }

    pub fn create(&self, name: &str) -> Result<Box<dyn TrainableComponent>, CoreError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| CoreError::UnknownFactory {
                name: name.to_string(),
            })?;
        Ok(factory())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

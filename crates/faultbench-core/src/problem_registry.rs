//! Problem catalog keyed by problem id.

use crate::config::ArenaConfig;
use crate::problem::ProblemDefinition;
use faultbench_proto::{Error, Result};
use std::collections::BTreeMap;

/// Registry of problem definitions.
#[derive(Debug, Default, Clone)]
pub struct ProblemRegistry {
    problems: BTreeMap<String, ProblemDefinition>,
}

impl ProblemRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the catalog from configuration, validating each definition.
    pub fn from_config(config: &ArenaConfig) -> Result<Self> {
        let mut registry = Self::new();
        for definition in &config.problems {
            registry.register(definition.clone())?;
        }
        Ok(registry)
    }

    /// Adds a definition. Duplicate ids are a configuration error.
    pub fn register(&mut self, definition: ProblemDefinition) -> Result<()> {
        definition.validate()?;
        if self.problems.contains_key(&definition.id) {
            return Err(Error::config(format!(
                "problem id '{}' is already registered",
                definition.id
            )));
        }
        self.problems.insert(definition.id.clone(), definition);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&ProblemDefinition> {
        self.problems.get(id)
    }

    /// Problem ids in sorted order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.problems.keys().map(String::as_str)
    }

    pub fn all(&self) -> impl Iterator<Item = &ProblemDefinition> {
        self.problems.values()
    }

    pub fn len(&self) -> usize {
        self.problems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.problems.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::DetectionOracle;
    use faultbench_proto::{FaultDescriptor, FaultKind, OracleName};

    fn definition(id: &str) -> ProblemDefinition {
        ProblemDefinition {
            id: id.to_string(),
            description: None,
            application: "astronomy-shop".to_string(),
            namespace: None,
            injector: "feature_flag".to_string(),
            fault: FaultDescriptor::new("cartFailure", FaultKind::FeatureFlag).target("cart"),
            workload: false,
            oracles: [(OracleName::Detection, DetectionOracle::new("Yes").into())]
                .into_iter()
                .collect(),
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = ProblemRegistry::new();
        registry.register(definition("payment_failure")).unwrap();
        registry.register(definition("cart_failure")).unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.ids().collect::<Vec<_>>(), vec!["cart_failure", "payment_failure"]);
        assert!(registry.get("cart_failure").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut registry = ProblemRegistry::new();
        registry.register(definition("cart_failure")).unwrap();
        let err = registry.register(definition("cart_failure")).unwrap_err();
        assert_eq!(err.class(), "ConfigurationError");
    }

    #[test]
    fn test_invalid_definition_rejected() {
        let mut def = definition("cart_failure");
        def.oracles.clear();
        let err = ProblemRegistry::new().register(def).unwrap_err();
        assert!(err.to_string().contains("has no oracles"));
    }
}

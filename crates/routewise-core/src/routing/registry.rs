//! Arm registry
//!
//! Holds the selectable arms and their static metadata. Arms are kept in
//! registration order for candidate listing and indexed by id in a sharded
//! map, so id lookups on the update path never wait on the order lock.

use std::collections::BTreeSet;
use std::sync::{Arc, PoisonError, RwLock};

use dashmap::DashMap;
use tracing::info;

use super::types::Arm;
use crate::error::{Error, Result};

/// Registry of selectable arms
#[derive(Debug, Default)]
pub struct ArmRegistry {
    /// Arms in registration order
    order: RwLock<Vec<Arc<Arm>>>,
    /// Arms by id
    by_id: DashMap<String, Arc<Arm>>,
}

impl ArmRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an arm
    ///
    /// Fails with `DuplicateArm` if the id is taken; the registry is left unchanged.
    pub fn register(&self, arm: Arm) -> Result<Arc<Arm>> {
        arm.validate()?;

        let mut order = self.order.write().unwrap_or_else(PoisonError::into_inner);
        if self.by_id.contains_key(&arm.id) {
            return Err(Error::DuplicateArm(arm.id));
        }

        let arm = Arc::new(arm);
        self.by_id.insert(arm.id.clone(), arm.clone());
        order.push(arm.clone());

        info!(arm_id = %arm.id, max_tokens = arm.max_tokens, "Registered arm");
        Ok(arm)
    }

    /// Remove an arm
    pub fn deregister(&self, arm_id: &str) -> Result<Arc<Arm>> {
        let mut order = self.order.write().unwrap_or_else(PoisonError::into_inner);
        let (_, arm) = self
            .by_id
            .remove(arm_id)
            .ok_or_else(|| Error::UnknownArm(arm_id.to_string()))?;
        order.retain(|a| a.id != arm_id);

        info!(arm_id = %arm_id, "Deregistered arm");
        Ok(arm)
    }

    /// Get an arm by id
    pub fn get(&self, arm_id: &str) -> Option<Arc<Arm>> {
        self.by_id.get(arm_id).map(|a| a.value().clone())
    }

    /// Whether an arm is registered
    pub fn contains(&self, arm_id: &str) -> bool {
        self.by_id.contains_key(arm_id)
    }

    /// Number of registered arms
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// All arms in registration order
    pub fn all(&self) -> Vec<Arc<Arm>> {
        self.order
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Ids of all arms in registration order
    pub fn ids(&self) -> Vec<String> {
        self.order
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|a| a.id.clone())
            .collect()
    }

    /// Arms carrying every tag in `filter_tags` whose context limit is at least
    /// `min_context`, in registration order.
    ///
    /// Returns an empty list, never an error, when nothing matches.
    pub fn list_candidates(&self, filter_tags: &BTreeSet<String>, min_context: usize) -> Vec<Arc<Arm>> {
        self.order
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|a| a.max_tokens >= min_context && a.has_capabilities(filter_tags))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn test_registry() -> ArmRegistry {
        let registry = ArmRegistry::new();
        registry
            .register(Arm::new("model-a").with_tags(["long-context"]).with_max_tokens(200_000))
            .unwrap();
        registry
            .register(Arm::new("model-b").with_tags(["vision"]).with_max_tokens(32_000))
            .unwrap();
        registry
            .register(
                Arm::new("model-c")
                    .with_tags(["vision", "long-context"])
                    .with_max_tokens(128_000),
            )
            .unwrap();
        registry
    }

    #[test]
    fn test_register_and_get() {
        let registry = test_registry();
        assert_eq!(registry.len(), 3);
        assert!(registry.contains("model-b"));
        assert_eq!(registry.get("model-c").unwrap().max_tokens, 128_000);
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_register_duplicate_leaves_registry_unchanged() {
        let registry = test_registry();
        let result = registry.register(Arm::new("model-a").with_max_tokens(1));
        assert!(matches!(result, Err(Error::DuplicateArm(id)) if id == "model-a"));
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.get("model-a").unwrap().max_tokens, 200_000);
    }

    #[test]
    fn test_register_rejects_invalid_arm() {
        let registry = ArmRegistry::new();
        assert!(matches!(
            registry.register(Arm::new("bad").with_max_tokens(0)),
            Err(Error::InvalidArm(_))
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_list_candidates_preserves_registration_order() {
        let registry = test_registry();

        let all = registry.list_candidates(&BTreeSet::new(), 0);
        let ids: Vec<&str> = all.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["model-a", "model-b", "model-c"]);

        let vision = registry.list_candidates(&tags(&["vision"]), 0);
        let ids: Vec<&str> = vision.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["model-b", "model-c"]);

        let large = registry.list_candidates(&tags(&["vision"]), 100_000);
        assert_eq!(large.len(), 1);
        assert_eq!(large[0].id, "model-c");
    }

    #[test]
    fn test_list_candidates_empty_is_not_an_error() {
        let registry = test_registry();
        assert!(registry.list_candidates(&tags(&["audio"]), 0).is_empty());
    }

    #[test]
    fn test_deregister() {
        let registry = test_registry();
        registry.deregister("model-b").unwrap();
        assert_eq!(registry.ids(), vec!["model-a", "model-c"]);
        assert!(matches!(
            registry.deregister("model-b"),
            Err(Error::UnknownArm(_))
        ));
    }

    #[test]
    fn test_register_deregister_register_is_idempotent() {
        let registry = ArmRegistry::new();
        let arm = Arm::new("model-a").with_tags(["vision"]);

        registry.register(arm.clone()).unwrap();
        registry.deregister("model-a").unwrap();
        registry.register(arm.clone()).unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.all()[0].as_ref(), &arm);
    }
}

//! Thread-safe hook registry.
//!
//! Maps each [`HookName`] to a priority-ordered list of [`HookSpec`]s.
//! Ordering is priority-descending with registration order as a stable
//! tiebreaker. The registry is process-wide: one instance is shared across
//! runs through [`global_registry`], but per-run data never lives here.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use crate::error::{HookError, Result};
use crate::types::{HookName, HookSpec};

#[derive(Default)]
pub struct HooksRegistry {
    hooks: RwLock<HashMap<HookName, Vec<HookSpec>>>,
}

impl HooksRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler spec.
    ///
    /// Rejects a duplicate `extension_id` on the same hook; the earlier
    /// registration stays in place.
    pub fn register(&self, spec: HookSpec) -> Result<()> {
        let mut hooks = self.hooks.write();
        let chain = hooks.entry(spec.hook_name).or_default();

        if chain.iter().any(|s| s.extension_id == spec.extension_id) {
            return Err(HookError::DuplicateRegistration {
                hook_name: spec.hook_name,
                extension_id: spec.extension_id,
            });
        }

        tracing::debug!(
            hook = %spec.hook_name,
            extension_id = %spec.extension_id,
            priority = spec.priority,
            "Registered hook handler"
        );

        chain.push(spec);
        // Stable sort keeps registration order within equal priorities.
        chain.sort_by(|a, b| b.priority.cmp(&a.priority));
        Ok(())
    }

    /// Remove one extension's handler from one hook.
    pub fn unregister(&self, hook_name: HookName, extension_id: &str) -> bool {
        let mut hooks = self.hooks.write();
        if let Some(chain) = hooks.get_mut(&hook_name) {
            let before = chain.len();
            chain.retain(|s| s.extension_id != extension_id);
            return chain.len() != before;
        }
        false
    }

    /// Remove an extension's handlers from every hook. Returns the count removed.
    pub fn unregister_extension(&self, extension_id: &str) -> usize {
        let mut hooks = self.hooks.write();
        let mut removed = 0;
        for chain in hooks.values_mut() {
            let before = chain.len();
            chain.retain(|s| s.extension_id != extension_id);
            removed += before - chain.len();
        }
        removed
    }

    /// Snapshot of the chain for a hook, in execution order.
    pub fn get_hooks(&self, hook_name: HookName) -> Vec<HookSpec> {
        self.hooks
            .read()
            .get(&hook_name)
            .cloned()
            .unwrap_or_default()
    }

    pub fn has_hooks(&self, hook_name: HookName) -> bool {
        self.hooks
            .read()
            .get(&hook_name)
            .map(|c| !c.is_empty())
            .unwrap_or(false)
    }

    pub fn hook_count(&self, hook_name: HookName) -> usize {
        self.hooks
            .read()
            .get(&hook_name)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn clear(&self) {
        self.hooks.write().clear();
    }
}

static GLOBAL: OnceLock<Arc<HooksRegistry>> = OnceLock::new();

/// The process-wide registry. Created on first use.
pub fn global_registry() -> Arc<HooksRegistry> {
    GLOBAL.get_or_init(|| Arc::new(HooksRegistry::new())).clone()
}

/// Drop every registration from the global registry.
///
/// Shared by the project-close path and tests that need a clean slate.
pub fn reset_global_registry() {
    if let Some(registry) = GLOBAL.get() {
        registry.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HookHandler, HookReturn};

    fn noop_spec(hook: HookName, id: &str, priority: i32) -> HookSpec {
        HookSpec::new(hook, id, HookHandler::sync(|_, _| Ok(HookReturn::Pass)))
            .with_priority(priority)
    }

    #[test]
    fn register_orders_by_priority_descending() {
        let registry = HooksRegistry::new();
        registry
            .register(noop_spec(HookName::BeforeRun, "low", 1))
            .unwrap();
        registry
            .register(noop_spec(HookName::BeforeRun, "high", 10))
            .unwrap();
        registry
            .register(noop_spec(HookName::BeforeRun, "mid", 5))
            .unwrap();

        let chain = registry.get_hooks(HookName::BeforeRun);
        let ids: Vec<_> = chain.iter().map(|s| s.extension_id.as_str()).collect();
        assert_eq!(ids, vec!["high", "mid", "low"]);
    }

    #[test]
    fn equal_priority_keeps_registration_order() {
        let registry = HooksRegistry::new();
        for id in ["first", "second", "third"] {
            registry
                .register(noop_spec(HookName::AfterRun, id, 0))
                .unwrap();
        }
        let ids: Vec<_> = registry
            .get_hooks(HookName::AfterRun)
            .iter()
            .map(|s| s.extension_id.clone())
            .collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }

    #[test]
    fn duplicate_extension_id_rejected() {
        let registry = HooksRegistry::new();
        registry
            .register(noop_spec(HookName::BeforeRun, "ext", 0))
            .unwrap();
        let err = registry
            .register(noop_spec(HookName::BeforeRun, "ext", 5))
            .unwrap_err();
        assert!(matches!(err, HookError::DuplicateRegistration { .. }));
        // Same id on a different hook is fine.
        registry
            .register(noop_spec(HookName::AfterRun, "ext", 0))
            .unwrap();
    }

    #[test]
    fn unregister_extension_sweeps_all_hooks() {
        let registry = HooksRegistry::new();
        registry
            .register(noop_spec(HookName::BeforeRun, "ext", 0))
            .unwrap();
        registry
            .register(noop_spec(HookName::AfterRun, "ext", 0))
            .unwrap();
        assert_eq!(registry.unregister_extension("ext"), 2);
        assert!(!registry.has_hooks(HookName::BeforeRun));
        assert!(!registry.has_hooks(HookName::AfterRun));
    }
}

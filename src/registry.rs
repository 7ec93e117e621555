use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use crate::config::ContextConfig;
use crate::context::ExecutionContext;
use crate::error::LiveError;

/// Table of named contexts. Contexts are created on first reference and
/// live until dropped explicitly.
#[derive(Debug, Default)]
pub struct ContextRegistry {
    defaults: ContextConfig,
    contexts: RwLock<BTreeMap<String, Arc<ExecutionContext>>>,
}

static GLOBAL: OnceLock<ContextRegistry> = OnceLock::new();

impl ContextRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry whose new contexts use `defaults`.
    pub fn with_config(defaults: ContextConfig) -> Self {
        ContextRegistry {
            defaults,
            contexts: RwLock::new(BTreeMap::new()),
        }
    }

    /// The process-wide registry.
    pub fn global() -> &'static ContextRegistry {
        GLOBAL.get_or_init(ContextRegistry::new)
    }

    /// Return the context called `name`, creating it if needed. Concurrent
    /// callers with the same name get the same context.
    pub fn get_or_create(&self, name: &str) -> Arc<ExecutionContext> {
        if let Some(ctx) = self.contexts.read().get(name) {
            return ctx.clone();
        }
        let mut contexts = self.contexts.write();
        contexts
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::debug!(context = name, "registry.create");
                Arc::new(ExecutionContext::with_config(name, self.defaults.clone()))
            })
            .clone()
    }

    pub fn get(&self, name: &str) -> Result<Arc<ExecutionContext>, LiveError> {
        self.contexts
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| LiveError::NotFound {
                context: name.to_string(),
            })
    }

    pub fn list(&self) -> BTreeSet<String> {
        self.contexts.read().keys().cloned().collect()
    }

    /// Remove a context from the table. Holders of its `Arc` keep a usable
    /// context; later lookups by name create a fresh one.
    pub fn drop_context(&self, name: &str) -> Result<(), LiveError> {
        match self.contexts.write().remove(name) {
            Some(_) => {
                tracing::debug!(context = name, "registry.drop");
                Ok(())
            }
            None => Err(LiveError::NotFound {
                context: name.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use std::thread;

    #[test]
    fn get_or_create_is_idempotent() {
        let registry = ContextRegistry::new();
        let a = registry.get_or_create("c1");
        let b = registry.get_or_create("c1");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.list().into_iter().collect::<Vec<_>>(), vec!["c1"]);
    }

    #[test]
    fn get_missing_is_not_found() {
        let registry = ContextRegistry::new();
        assert!(matches!(registry.get("nope"), Err(LiveError::NotFound { .. })));
        assert!(matches!(registry.drop_context("nope"), Err(LiveError::NotFound { .. })));
    }

    #[test]
    fn contexts_are_independent() {
        let registry = ContextRegistry::new();
        registry.get_or_create("a").run("(def x 1)").unwrap();
        registry.get_or_create("b").run("(def x 2)").unwrap();
        assert_eq!(registry.get("a").unwrap().lookup("x").unwrap(), Value::Int(1));
        assert_eq!(registry.get("b").unwrap().lookup("x").unwrap(), Value::Int(2));
    }

    #[test]
    fn drop_then_recreate_starts_empty() {
        let registry = ContextRegistry::new();
        let old = registry.get_or_create("c1");
        old.run("(def x 1)").unwrap();
        registry.drop_context("c1").unwrap();
        assert!(old.contains("x"));
        assert!(!registry.get_or_create("c1").contains("x"));
    }

    #[test]
    fn concurrent_get_or_create_yields_one_context() {
        let registry = Arc::new(ContextRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                thread::spawn(move || registry.get_or_create("shared"))
            })
            .collect();
        let contexts: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(contexts.iter().all(|c| Arc::ptr_eq(c, &contexts[0])));
        assert_eq!(registry.list().len(), 1);
    }

    #[test]
    fn registry_defaults_apply_to_new_contexts() {
        let registry = ContextRegistry::with_config(ContextConfig {
            recursion_limit: 7,
            ..ContextConfig::default()
        });
        assert_eq!(registry.get_or_create("c").config().recursion_limit, 7);
    }

    #[test]
    fn global_registry_is_shared() {
        let a = ContextRegistry::global().get_or_create("registry-test-global");
        let b = ContextRegistry::global().get("registry-test-global").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}

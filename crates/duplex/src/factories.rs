//! Factory Registry
//!
//! Module path to factory table. Bound types are additionally indexed by
//! their native type so native code can create objects by type.

use std::any::TypeId;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::info;

use duplex_types::TypeKey;

use crate::descriptor::{Bound, DescriptorSummary, TypeDescriptor};
use crate::error::{BridgeError, BridgeResult};
use crate::factory::{BindingFactory, ClassFactory};

#[derive(Default)]
pub struct FactoryRegistry {
    by_path: RefCell<HashMap<String, Rc<dyn ClassFactory>>>,
    by_type: RefCell<HashMap<TypeId, Rc<BindingFactory>>>,
}

impl FactoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under its module path
    pub fn register_factory(&self, factory: Rc<dyn ClassFactory>) -> BridgeResult<()> {
        let path = factory.module_path().to_string();
        let mut by_path = self.by_path.borrow_mut();
        if by_path.contains_key(&path) {
            return Err(BridgeError::DuplicateFactory(path));
        }
        info!(target: "duplex.factory", module = %path, "registered factory");
        by_path.insert(path, factory);
        Ok(())
    }

    /// Build the descriptor of `T` and register its factory. The descriptor
    /// is built once per type; registering a type again returns the existing
    /// factory.
    pub fn register_bound<T: Bound>(&self, module_path: Option<&str>) -> BridgeResult<Rc<BindingFactory>> {
        if let Some(existing) = self.by_type.borrow().get(&TypeId::of::<T>()) {
            return Ok(existing.clone());
        }

        let descriptor = Rc::new(TypeDescriptor::of::<T>(module_path)?);
        let factory = Rc::new(BindingFactory::new(descriptor));
        self.register_factory(factory.clone())?;
        self.by_type
            .borrow_mut()
            .insert(TypeId::of::<T>(), factory.clone());
        Ok(factory)
    }

    pub fn get(&self, module_path: &str) -> BridgeResult<Rc<dyn ClassFactory>> {
        self.by_path
            .borrow()
            .get(module_path)
            .cloned()
            .ok_or_else(|| BridgeError::FactoryNotFound(module_path.to_string()))
    }

    pub fn contains(&self, module_path: &str) -> bool {
        self.by_path.borrow().contains_key(module_path)
    }

    pub fn for_type(&self, type_key: TypeKey) -> BridgeResult<Rc<BindingFactory>> {
        self.by_type
            .borrow()
            .get(&type_key.id())
            .cloned()
            .ok_or_else(|| BridgeError::FactoryNotFound(type_key.name().to_string()))
    }

    pub fn descriptor_for(&self, type_key: TypeKey) -> Option<Rc<TypeDescriptor>> {
        self.by_type
            .borrow()
            .get(&type_key.id())
            .map(|factory| factory.type_descriptor().clone())
    }

    /// Registered module paths, sorted
    pub fn module_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.by_path.borrow().keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Summaries of every bound type, sorted by module path
    pub fn summaries(&self) -> Vec<DescriptorSummary> {
        let mut summaries: Vec<DescriptorSummary> = self
            .by_type
            .borrow()
            .values()
            .map(|factory| factory.type_descriptor().summary())
            .collect();
        summaries.sort_by(|a, b| a.module_path.cmp(&b.module_path));
        summaries
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Node, Point};

    #[test]
    fn test_register_bound_once() {
        let registry = FactoryRegistry::new();
        let first = registry.register_bound::<Node>(None).unwrap();
        let second = registry.register_bound::<Node>(None).unwrap();
        assert!(Rc::ptr_eq(&first, &second));
        assert!(Rc::ptr_eq(
            &registry.descriptor_for(TypeKey::of::<Node>()).unwrap(),
            first.type_descriptor()
        ));
    }

    #[test]
    fn test_unknown_path() {
        let registry = FactoryRegistry::new();
        match registry.get("missing.module") {
            Err(BridgeError::FactoryNotFound(path)) => assert_eq!(path, "missing.module"),
            _ => panic!("expected FactoryNotFound"),
        }
    }

    #[test]
    fn test_unknown_type_names_the_type() {
        let registry = FactoryRegistry::new();
        match registry.for_type(TypeKey::of::<Point>()) {
            Err(BridgeError::FactoryNotFound(name)) => assert!(name.ends_with("Point")),
            _ => panic!("expected FactoryNotFound"),
        }
    }

    #[test]
    fn test_duplicate_path() {
        let registry = FactoryRegistry::new();
        registry.register_bound::<Node>(None).unwrap();
        let clash = registry.register_bound::<Point>(Some("test.node"));
        assert!(matches!(clash, Err(BridgeError::DuplicateFactory(_))));
        assert!(registry.for_type(TypeKey::of::<Point>()).is_err());
    }

    #[test]
    fn test_summaries_sorted() {
        let registry = FactoryRegistry::new();
        registry.register_bound::<Point>(None).unwrap();
        registry.register_bound::<Node>(None).unwrap();
        let paths: Vec<String> = registry.summaries().into_iter().map(|s| s.module_path).collect();
        assert_eq!(paths, vec!["test.node", "test.point"]);
    }
}

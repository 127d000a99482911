//! Type Catalog
//!
//! Class tables name native types by string. The catalog maps those names to
//! the code that registers a factory for them.

use std::collections::HashMap;
use std::rc::Rc;

use tracing::debug;

use crate::bridge::Bridge;
use crate::descriptor::Bound;
use crate::error::{BridgeError, BridgeResult};
use crate::factory::ClassFactory;
use crate::libs::{BaseLib, Greeter};

type Registrar = Rc<dyn Fn(&Rc<Bridge>, &str) -> BridgeResult<()>>;

#[derive(Default)]
pub struct TypeCatalog {
    entries: HashMap<String, Registrar>,
}

impl TypeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with the libraries shipped with the crate
    pub fn with_builtins() -> Self {
        let mut catalog = Self::new();
        catalog
            .factory("BaseLib", |module_path| Rc::new(BaseLib::new(module_path)))
            .bound::<Greeter>("Greeter");
        catalog
    }

    /// Make a bound type available under `name`
    pub fn bound<T: Bound>(&mut self, name: &str) -> &mut Self {
        self.entries.insert(
            name.to_string(),
            Rc::new(|bridge: &Rc<Bridge>, module_path: &str| {
                bridge.register_at::<T>(module_path).map(|_| ())
            }),
        );
        self
    }

    /// Make a plain class factory available under `name`
    pub fn factory<F>(&mut self, name: &str, make: F) -> &mut Self
    where
        F: Fn(&str) -> Rc<dyn ClassFactory> + 'static,
    {
        self.entries.insert(
            name.to_string(),
            Rc::new(move |bridge: &Rc<Bridge>, module_path: &str| {
                bridge.register_factory(make(module_path))
            }),
        );
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Register the type named `type_name` under `module_path`
    pub fn register(&self, bridge: &Rc<Bridge>, type_name: &str, module_path: &str) -> BridgeResult<()> {
        let registrar = self
            .entries
            .get(type_name)
            .ok_or_else(|| BridgeError::FactoryNotFound(type_name.to_string()))?;
        registrar(bridge, module_path)?;
        debug!(target: "duplex.factory", native_type = type_name, module = module_path, "catalog entry registered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::config::ClassTable;
    use crate::testing;

    #[test]
    fn test_unknown_type_name() {
        let engine = testing::engine();
        let catalog = TypeCatalog::new();
        match catalog.register(engine.bridge(), "Missing", "some.path") {
            Err(BridgeError::FactoryNotFound(name)) => assert_eq!(name, "Missing"),
            _ => panic!("expected FactoryNotFound"),
        }
    }

    #[test]
    fn test_load_class_table() {
        let engine = testing::engine();
        let table = ClassTable::parse(
            Path::new("classes.toml"),
            r#"
"demo.greeter" = "Greeter"
"base.print" = "BaseLib"
"broken.entry" = "NoSuchType"
initLibs = "base.print;missing.lib"
"#,
        )
        .unwrap();

        let report = engine.load_class_table(&table, &TypeCatalog::with_builtins());
        let mut registered = report.registered.clone();
        registered.sort();
        assert_eq!(registered, vec!["base.print", "demo.greeter"]);
        assert_eq!(report.initialized, vec!["base.print"]);
        let mut failed: Vec<&str> = report.failures.iter().map(|(path, _)| path.as_str()).collect();
        failed.sort();
        assert_eq!(failed, vec!["broken.entry", "missing.lib"]);

        let kind: String = engine.eval("typeof print").unwrap();
        assert_eq!(kind, "function");
    }
}

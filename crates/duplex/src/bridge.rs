//! The Bridge
//!
//! Owns everything tied to one script context: the identity registry, the
//! factory registry, the module loader and cache, and the context itself.
//! Script callbacks hold the bridge weakly, so dropping the last strong
//! reference tears everything down in order: handles first, context last.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use rquickjs::{Context, Ctx, Function, Object, Value as JsValue};
use tracing::{debug, error, info, warn};

use duplex_types::{NativeRef, ObservableCollection, ObservableValue, TypeKey, Value};

use crate::catalog::TypeCatalog;
use crate::config::ClassTable;
use crate::descriptor::{Bound, DescriptorSummary};
use crate::error::{BridgeError, BridgeResult};
use crate::factories::FactoryRegistry;
use crate::factory::{BindingFactory, ClassFactory};
use crate::globals;
use crate::interop::{id_value, Caught};
use crate::modules::ModuleLoader;
use crate::registry::{CloseReport, IdentityRegistry, RootedHandle};
use crate::sync::{Channel, CollectionChannel, CollectionSource, PropertyChannel, PropertySource};

/// Writes a read-only, non-enumerable id onto a script object
const DEFINE_ID: &str = "(function (obj, id) { \
    Object.defineProperty(obj, '_id', { value: id, enumerable: false, writable: false, configurable: false }); \
})";

/// Outcome of loading a class table
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ClassTableReport {
    pub registered: Vec<String>,
    pub initialized: Vec<String>,
    /// Failed entries with the reason, by module path
    pub failures: Vec<(String, String)>,
}

pub struct Bridge {
    registry: IdentityRegistry,
    factories: FactoryRegistry,
    modules: RefCell<ModuleLoader>,
    module_cache: RefCell<HashMap<String, RootedHandle>>,
    loading: RefCell<Vec<String>>,
    standalone: RefCell<Vec<Channel>>,
    define_id: RootedHandle,
    active: RefCell<Option<Ctx<'static>>>,
    closed: Cell<bool>,
    // Must stay last: every rooted handle above is released before the
    // context goes away.
    context: Context,
}

impl Bridge {
    pub fn new(context: Context, modules: ModuleLoader) -> BridgeResult<Rc<Self>> {
        let define_id = context.with(|ctx| -> BridgeResult<RootedHandle> {
            let define: JsValue = ctx.eval(DEFINE_ID).caught(&ctx)?;
            Ok(RootedHandle::root(&ctx, define))
        })?;

        let bridge = Rc::new(Self {
            registry: IdentityRegistry::new(),
            factories: FactoryRegistry::new(),
            modules: RefCell::new(modules),
            module_cache: RefCell::new(HashMap::new()),
            loading: RefCell::new(Vec::new()),
            standalone: RefCell::new(Vec::new()),
            define_id,
            active: RefCell::new(None),
            closed: Cell::new(false),
            context,
        });
        bridge.enter(|ctx| globals::install(&bridge, ctx))?;
        Ok(bridge)
    }

    pub fn registry(&self) -> &IdentityRegistry {
        &self.registry
    }

    pub fn factories(&self) -> &FactoryRegistry {
        &self.factories
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    /// Run `f` with the script context. Reuses the context already entered
    /// further up the stack, so native code called from a script can enter
    /// again.
    pub fn enter<F, R>(&self, f: F) -> R
    where
        F: for<'js> FnOnce(&Ctx<'js>) -> R,
    {
        let active = self.active.borrow().clone();
        if let Some(ctx) = active {
            return f(&ctx);
        }
        self.context.with(|ctx| {
            let _scope = ActiveScope::open(&self.active, &ctx);
            f(&ctx)
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Modules
    // ─────────────────────────────────────────────────────────────────────────

    pub fn add_search_path(&self, path: impl Into<std::path::PathBuf>) {
        self.modules.borrow_mut().add_search_path(path);
    }

    /// Define an in-memory module, found after every search path
    pub fn define_module(&self, module_path: &str, source: impl Into<String>) {
        self.modules.borrow_mut().define(module_path, source);
    }

    /// Resolve, evaluate and cache a module. The export is the value the
    /// module body returns, or an empty object.
    pub fn require<'js>(&self, ctx: &Ctx<'js>, module_path: &str) -> BridgeResult<JsValue<'js>> {
        if self.closed.get() {
            return Err(BridgeError::Closed);
        }
        let script = self.modules.borrow().resolve(module_path)?;
        if let Some(cached) = self.module_cache.borrow().get(&script.key) {
            return cached.restore(ctx);
        }
        if self.loading.borrow().contains(&script.key) {
            return Err(BridgeError::Script(format!(
                "circular require of '{module_path}'"
            )));
        }

        self.loading.borrow_mut().push(script.key.clone());
        let evaluated = evaluate_module(ctx, module_path, &script.source);
        self.loading.borrow_mut().retain(|key| key != &script.key);
        let exports = evaluated?;

        debug!(target: "duplex.modules", module = module_path, key = %script.key, "module loaded");
        self.module_cache
            .borrow_mut()
            .insert(script.key, RootedHandle::root(ctx, exports.clone()));
        Ok(exports)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Ids
    // ─────────────────────────────────────────────────────────────────────────

    pub(crate) fn write_id<'js>(&self, ctx: &Ctx<'js>, object: &Object<'js>, id: u64) -> BridgeResult<()> {
        let define: Function = self
            .define_id
            .restore(ctx)?
            .into_function()
            .ok_or_else(|| BridgeError::InvalidType("id writer is not a function".into()))?;
        let _: () = define
            .call((object.clone(), id_value(ctx, id)))
            .caught(ctx)?;
        Ok(())
    }

    /// Id of a native object whose type is registered with this bridge
    pub fn id_of(&self, native: &NativeRef) -> Option<u64> {
        self.factories
            .descriptor_for(native.type_key())
            .and_then(|descriptor| descriptor.id_of(native))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Factories
    // ─────────────────────────────────────────────────────────────────────────

    /// Register a bound type under the module path it declares
    pub fn register<T: Bound>(&self) -> BridgeResult<Rc<BindingFactory>> {
        self.factories.register_bound::<T>(None)
    }

    /// Register a bound type under an explicit module path
    pub fn register_at<T: Bound>(&self, module_path: &str) -> BridgeResult<Rc<BindingFactory>> {
        self.factories.register_bound::<T>(Some(module_path))
    }

    pub fn register_factory(&self, factory: Rc<dyn ClassFactory>) -> BridgeResult<()> {
        self.factories.register_factory(factory)
    }

    /// Back end of the script `_initClass` hook
    pub fn init_class<'js>(
        self: &Rc<Self>,
        ctx: &Ctx<'js>,
        module_path: &str,
        class: Object<'js>,
        use_prototype: bool,
    ) -> BridgeResult<()> {
        let factory = self.factories.get(module_path)?;
        let target = if use_prototype {
            class.get::<_, Object>("prototype").caught(ctx)?
        } else {
            class
        };
        factory.init_class(self, ctx, target)
    }

    /// Back end of the script `_initObj` hook
    pub fn init_object<'js>(
        self: &Rc<Self>,
        ctx: &Ctx<'js>,
        module_path: &str,
        object: Object<'js>,
        args: Vec<JsValue<'js>>,
    ) -> BridgeResult<u64> {
        let factory = self.factories.get(module_path)?;
        factory.init_object(self, ctx, object, args)
    }

    /// Initialize a library eagerly, as the `initLibs` entry of a class table does
    pub fn init_lib(self: &Rc<Self>, module_path: &str) -> BridgeResult<()> {
        let factory = self.factories.get(module_path)?;
        self.enter(|ctx| {
            let target = Object::new(ctx.clone()).caught(ctx)?;
            factory.init_class(self, ctx, target)
        })
    }

    /// Create a native object through its script class
    pub fn create<T: Bound>(self: &Rc<Self>, args: &[Value]) -> BridgeResult<Rc<T>> {
        let type_key = TypeKey::of::<T>();
        let factory = self.factories.for_type(type_key)?;
        let native = factory.instantiate_from_native(self, args)?;
        native.downcast::<T>().ok_or_else(|| {
            BridgeError::InvalidType(format!(
                "factory for {} produced a {}",
                type_key.short_name(),
                native.type_key().short_name()
            ))
        })
    }

    pub fn create_by_path(self: &Rc<Self>, module_path: &str, args: &[Value]) -> BridgeResult<NativeRef> {
        self.factories.get(module_path)?.create_object(self, args)
    }

    pub fn summaries(&self) -> Vec<DescriptorSummary> {
        self.factories.summaries()
    }

    /// Register every class table entry through `catalog`, then initialize
    /// the `initLibs` modules. Failing entries are logged and skipped.
    pub fn load_class_table(self: &Rc<Self>, table: &ClassTable, catalog: &TypeCatalog) -> ClassTableReport {
        let mut report = ClassTableReport::default();
        for (module_path, type_name) in table.entries() {
            match catalog.register(self, type_name, module_path) {
                Ok(()) => report.registered.push(module_path.clone()),
                Err(e) => {
                    error!(
                        target: "duplex.factory",
                        module = %module_path,
                        native_type = %type_name,
                        error = %e,
                        "failed to register class table entry"
                    );
                    report.failures.push((module_path.clone(), e.to_string()));
                }
            }
        }

        for module_path in table.init_libs() {
            match self.init_lib(module_path) {
                Ok(()) => report.initialized.push(module_path.clone()),
                Err(e) => {
                    warn!(
                        target: "duplex.factory",
                        module = %module_path,
                        error = %e,
                        "failed to initialize library"
                    );
                    report.failures.push((module_path.clone(), e.to_string()));
                }
            }
        }

        info!(
            target: "duplex.factory",
            registered = report.registered.len(),
            initialized = report.initialized.len(),
            failures = report.failures.len(),
            "class table loaded"
        );
        report
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Standalone bindings
    // ─────────────────────────────────────────────────────────────────────────

    /// Keep a host-owned property in sync with an existing script `Binding`
    pub fn bind_property<'js>(
        self: &Rc<Self>,
        ctx: &Ctx<'js>,
        name: &str,
        property: Rc<dyn ObservableValue>,
        binding: Object<'js>,
    ) -> BridgeResult<Rc<PropertyChannel>> {
        if self.closed.get() {
            return Err(BridgeError::Closed);
        }
        let kind = property.kind();
        let channel =
            PropertyChannel::bind(self, ctx, name, kind, PropertySource::Standalone(property), binding)?;
        self.standalone
            .borrow_mut()
            .push(Channel::Property(channel.clone()));
        Ok(channel)
    }

    /// Keep a host-owned list in sync with an existing script `ArrayBinding`
    pub fn bind_list<'js>(
        self: &Rc<Self>,
        ctx: &Ctx<'js>,
        name: &str,
        list: Rc<dyn ObservableCollection>,
        binding: Object<'js>,
    ) -> BridgeResult<Rc<CollectionChannel>> {
        if self.closed.get() {
            return Err(BridgeError::Closed);
        }
        let kind = list.element_kind();
        let channel =
            CollectionChannel::bind(self, ctx, name, kind, CollectionSource::Standalone(list), binding)?;
        self.standalone
            .borrow_mut()
            .push(Channel::Collection(channel.clone()));
        Ok(channel)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Shutdown
    // ─────────────────────────────────────────────────────────────────────────

    /// Close every pair, detach every channel and release every rooted
    /// script value. Runs once.
    pub fn close(&self) -> BridgeResult<CloseReport> {
        if self.closed.replace(true) {
            warn!(target: "duplex.bridge", "bridge close requested twice");
            return Err(BridgeError::Closed);
        }

        let mut report = if self.registry.is_closed() {
            CloseReport::default()
        } else {
            self.registry.close()?
        };
        for channel in self.standalone.borrow_mut().drain(..) {
            if channel.detach() {
                report.released_handles += 1;
            }
        }
        for (_, module) in self.module_cache.borrow_mut().drain() {
            if module.release() {
                report.released_handles += 1;
            }
        }
        if self.define_id.release() {
            report.released_handles += 1;
        }

        info!(
            target: "duplex.bridge",
            released = report.released_handles,
            "bridge closed"
        );
        Ok(report)
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        if !self.closed.get() {
            if let Err(e) = self.close() {
                warn!(target: "duplex.bridge", error = %e, "failed to close bridge on drop");
            }
        }
    }
}

/// Wrap a module body in a function and run it
fn evaluate_module<'js>(ctx: &Ctx<'js>, module_path: &str, source: &str) -> BridgeResult<JsValue<'js>> {
    let wrapped = format!("(function () {{\n{source}\n}})");
    let annotate = |e: BridgeError| match e {
        BridgeError::Script(message) => BridgeError::Script(format!("{module_path}: {message}")),
        other => other,
    };

    let body: Function = ctx.eval(wrapped).caught(ctx).map_err(annotate)?;
    let exports: JsValue = body.call(()).caught(ctx).map_err(annotate)?;
    if exports.is_undefined() || exports.is_null() {
        return Ok(Object::new(ctx.clone()).caught(ctx)?.into_value());
    }
    Ok(exports)
}

/// Publishes the entered context to code further down the stack
struct ActiveScope<'a> {
    slot: &'a RefCell<Option<Ctx<'static>>>,
}

impl<'a> ActiveScope<'a> {
    fn open<'js>(slot: &'a RefCell<Option<Ctx<'static>>>, ctx: &Ctx<'js>) -> Self {
        // SAFETY: the erased context is only handed out while `Context::with`
        // is running on this thread. The scope is dropped inside that call and
        // clears the slot, so the context never escapes its real lifetime.
        let erased = unsafe { std::mem::transmute::<Ctx<'js>, Ctx<'static>>(ctx.clone()) };
        *slot.borrow_mut() = Some(erased);
        Self { slot }
    }
}

impl Drop for ActiveScope<'_> {
    fn drop(&mut self) {
        self.slot.borrow_mut().take();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, Node};

    #[test]
    fn test_nested_enter_reuses_context() {
        let engine = testing::engine();
        let bridge = engine.bridge();
        let value: i32 = bridge.enter(|outer| {
            outer.globals().set("shared", 41).unwrap();
            bridge.enter(|inner| inner.eval::<i32, _>("shared + 1").unwrap())
        });
        assert_eq!(value, 42);
    }

    #[test]
    fn test_require_caches_exports() {
        let engine = testing::engine();
        engine.bridge().define_module("counter", "globalThis.loads = (globalThis.loads || 0) + 1; return { n: 1 };");
        let same: bool = engine
            .eval("require('counter') === require('counter.js')")
            .unwrap();
        assert!(same);
        let loads: i32 = engine.eval("loads").unwrap();
        assert_eq!(loads, 1);
    }

    #[test]
    fn test_require_without_return_exports_object() {
        let engine = testing::engine();
        engine.bridge().define_module("empty", "let x = 1;");
        let kind: String = engine.eval("typeof require('empty')").unwrap();
        assert_eq!(kind, "object");
    }

    #[test]
    fn test_require_missing_module_throws() {
        let engine = testing::engine();
        let message: String = engine
            .eval("(() => { try { require('no.such.thing'); return ''; } catch (e) { return e.message; } })()")
            .unwrap();
        assert!(message.contains("no.such.thing"));
    }

    #[test]
    fn test_circular_require() {
        let engine = testing::engine();
        engine.bridge().define_module("loop.a", "return require('loop.b');");
        engine.bridge().define_module("loop.b", "return require('loop.a');");
        let message: String = engine
            .eval("(() => { try { require('loop.a'); return ''; } catch (e) { return e.message; } })()")
            .unwrap();
        assert!(message.contains("circular"));
    }

    #[test]
    fn test_require_from_search_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("lib")).unwrap();
        std::fs::write(dir.path().join("lib/answer.js"), "return { value: 42 };").unwrap();

        let engine = testing::engine();
        engine.bridge().add_search_path(dir.path());
        let value: i32 = engine.eval("require('lib.answer').value").unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_create_unregistered_type() {
        let engine = testing::engine();
        match engine.create::<testing::Unregistered>(&[]) {
            Err(BridgeError::FactoryNotFound(name)) => assert!(name.ends_with("Unregistered")),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_unknown_init_class_path() {
        let engine = testing::engine();
        let message: String = engine
            .eval("(() => { try { _initClass('nope', class {}); return ''; } catch (e) { return e.message; } })()")
            .unwrap();
        assert!(message.contains("nope"));
    }

    #[test]
    fn test_id_is_read_only() {
        let engine = testing::engine();
        let node = engine.create::<Node>(&[]).unwrap();
        let id = node.id.get().unwrap();
        let (after, enumerable): (f64, bool) = (
            testing::eval_on(&engine, id, "(() => { try { obj._id = 999; } catch (e) {} return obj._id; })()"),
            testing::eval_on(&engine, id, "Object.keys(obj).includes('_id')"),
        );
        assert_eq!(after as u64, id);
        assert!(!enumerable);
    }

    #[test]
    fn test_close_releases_everything() {
        let engine = testing::engine();
        let node = engine.create::<Node>(&[]).unwrap();
        let pair = engine.bridge().registry().pair(node.id.get().unwrap()).unwrap();

        let report = engine.close().unwrap();
        assert_eq!(node.closes.get(), 1);
        assert!(pair.script().is_released());
        assert!(pair.channels().is_empty());
        assert!(report.released_handles > 0);

        assert!(matches!(engine.close(), Err(BridgeError::Closed)));
        assert_eq!(node.closes.get(), 1);
        assert!(matches!(
            engine.create::<Node>(&[]),
            Err(BridgeError::FailedObjectCreation { .. })
        ));
    }

    #[test]
    fn test_create_by_path() {
        let engine = testing::engine();
        let native = engine.bridge().create_by_path("test.node", &[]).unwrap();
        assert!(native.is::<Node>());
        assert!(engine.bridge().create_by_path("nope", &[]).is_err());
    }
}

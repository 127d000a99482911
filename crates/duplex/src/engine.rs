//! Script Engine
//!
//! Owns the QuickJS runtime and the bridge living on top of it. One engine
//! per thread; everything here is `!Send`.

use std::path::Path;
use std::rc::Rc;

use rquickjs::context::EvalOptions;
use rquickjs::{Context, Ctx, FromJs, Runtime, Type, Value as JsValue};
use tracing::{debug, info};

use duplex_types::Value;

use crate::bridge::{Bridge, ClassTableReport};
use crate::catalog::TypeCatalog;
use crate::config::{ClassTable, EngineConfig};
use crate::descriptor::Bound;
use crate::error::{BridgeError, BridgeResult};
use crate::factory::BindingFactory;
use crate::interop::Caught;
use crate::libs;
use crate::modules::ModuleLoader;
use crate::registry::CloseReport;

/// Nesting limit when converting script values to JSON
const MAX_JSON_DEPTH: usize = 32;

pub struct ScriptEngine {
    // Dropped before the runtime
    bridge: Rc<Bridge>,
    runtime: Runtime,
    config: EngineConfig,
}

impl ScriptEngine {
    pub fn new(config: EngineConfig) -> BridgeResult<Self> {
        let runtime = Runtime::new()?;
        if let Some(limit) = config.memory_limit {
            runtime.set_memory_limit(limit);
        }
        if let Some(size) = config.max_stack_size {
            runtime.set_max_stack_size(size);
        }
        let context = Context::full(&runtime)?;

        let loader = ModuleLoader::new(config.search_paths.iter().cloned());
        let bridge = Bridge::new(context, loader)?;
        libs::define_builtin_modules(&bridge);

        debug!(
            target: "duplex.engine",
            search_paths = ?config.search_paths,
            "engine created"
        );
        Ok(Self {
            bridge,
            runtime,
            config,
        })
    }

    pub fn bridge(&self) -> &Rc<Bridge> {
        &self.bridge
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run `f` inside the script context
    pub fn with<F, R>(&self, f: F) -> R
    where
        F: for<'js> FnOnce(&Ctx<'js>) -> R,
    {
        self.bridge.enter(f)
    }

    /// Evaluate a script and convert its result
    pub fn eval<V>(&self, source: &str) -> BridgeResult<V>
    where
        V: for<'js> FromJs<'js>,
    {
        self.with(|ctx| ctx.eval::<V, _>(source).caught(ctx))
    }

    /// Evaluate a script and convert its result to JSON
    pub fn eval_json(&self, source: &str) -> BridgeResult<serde_json::Value> {
        self.with(|ctx| {
            let result: JsValue = ctx.eval(source).caught(ctx)?;
            js_to_json(ctx, result, 0)
        })
    }

    /// Evaluate a script file in the global scope
    pub fn eval_file(&self, path: &Path) -> BridgeResult<()> {
        let source = std::fs::read_to_string(path)?;
        info!(target: "duplex.engine", path = %path.display(), "evaluating script");
        self.with(|ctx| {
            let mut options = EvalOptions::default();
            options.global = true;
            options.strict = false;
            options.backtrace_barrier = true;

            let _: JsValue = ctx
                .eval_with_options(source, options)
                .caught(ctx)
                .map_err(|e| match e {
                    BridgeError::Script(message) => {
                        BridgeError::Script(format!("{}: {message}", path.display()))
                    }
                    other => other,
                })?;
            Ok(())
        })
    }

    /// Evaluate the configured rc file. Returns false when none is present.
    pub fn run_rc(&self) -> BridgeResult<bool> {
        match &self.config.rc_file {
            Some(path) if path.is_file() => {
                self.eval_file(path)?;
                Ok(true)
            }
            Some(path) => {
                debug!(target: "duplex.engine", path = %path.display(), "no rc file");
                Ok(false)
            }
            None => Ok(false),
        }
    }

    pub fn register<T: Bound>(&self) -> BridgeResult<Rc<BindingFactory>> {
        self.bridge.register::<T>()
    }

    pub fn create<T: Bound>(&self, args: &[Value]) -> BridgeResult<Rc<T>> {
        self.bridge.create::<T>(args)
    }

    pub fn load_class_table(&self, table: &ClassTable, catalog: &TypeCatalog) -> ClassTableReport {
        self.bridge.load_class_table(table, catalog)
    }

    /// Run garbage collection
    pub fn gc(&self) {
        self.runtime.run_gc();
    }

    pub fn close(&self) -> BridgeResult<CloseReport> {
        self.bridge.close()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Value Conversion
// ─────────────────────────────────────────────────────────────────────────────

fn js_to_json<'js>(ctx: &Ctx<'js>, js: JsValue<'js>, depth: usize) -> BridgeResult<serde_json::Value> {
    if depth > MAX_JSON_DEPTH {
        return Err(BridgeError::Unsupported(format!(
            "value nested deeper than {MAX_JSON_DEPTH} levels"
        )));
    }
    match js.type_of() {
        Type::Undefined | Type::Uninitialized | Type::Null => Ok(serde_json::Value::Null),
        Type::Bool => Ok(serde_json::Value::Bool(js.get().caught(ctx)?)),
        Type::Int => {
            let i: i32 = js.get().caught(ctx)?;
            Ok(serde_json::Value::from(i))
        }
        Type::Float => {
            let f: f64 = js.get().caught(ctx)?;
            Ok(serde_json::Number::from_f64(f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null))
        }
        Type::String => Ok(serde_json::Value::String(js.get().caught(ctx)?)),
        Type::Array => {
            let array: rquickjs::Array = js.get().caught(ctx)?;
            let mut values = Vec::with_capacity(array.len());
            for index in 0..array.len() {
                let item: JsValue = array.get(index).caught(ctx)?;
                values.push(js_to_json(ctx, item, depth + 1)?);
            }
            Ok(serde_json::Value::Array(values))
        }
        Type::Object => {
            let object: rquickjs::Object = js.get().caught(ctx)?;
            let mut fields = serde_json::Map::new();
            for prop in object.props::<String, JsValue>() {
                let (key, value) = prop.caught(ctx)?;
                fields.insert(key, js_to_json(ctx, value, depth + 1)?);
            }
            Ok(serde_json::Value::Object(fields))
        }
        other => Err(BridgeError::Unsupported(format!("cannot convert {other:?} to JSON"))),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn test_eval_primitives() {
        let engine = ScriptEngine::new(EngineConfig::in_memory()).unwrap();
        let n: i32 = engine.eval("40 + 2").unwrap();
        assert_eq!(n, 42);
        let s: String = engine.eval("'hello'").unwrap();
        assert_eq!(s, "hello");
    }

    #[test]
    fn test_eval_error_is_script_error() {
        let engine = ScriptEngine::new(EngineConfig::in_memory()).unwrap();
        let result = engine.eval::<i32>("throw new Error('boom')");
        match result {
            Err(BridgeError::Script(message)) => assert!(message.contains("boom")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_eval_json() {
        let engine = ScriptEngine::new(EngineConfig::in_memory()).unwrap();
        let value = engine.eval_json("({ name: 'test', values: [1, 2.5, null] })").unwrap();
        assert_eq!(value, serde_json::json!({ "name": "test", "values": [1, 2.5, null] }));
    }

    #[test]
    fn test_eval_json_rejects_functions() {
        let engine = ScriptEngine::new(EngineConfig::in_memory()).unwrap();
        assert!(matches!(
            engine.eval_json("(() => 1)"),
            Err(BridgeError::Unsupported(_))
        ));
    }

    #[test]
    fn test_eval_file_and_rc() {
        let dir = tempfile::tempdir().unwrap();
        let rc = dir.path().join("rc.js");
        std::fs::write(&rc, "var started = true;").unwrap();

        let mut config = EngineConfig::in_memory();
        config.rc_file = Some(rc);
        let engine = ScriptEngine::new(config).unwrap();
        assert!(engine.run_rc().unwrap());
        let started: bool = engine.eval("started").unwrap();
        assert!(started);
    }

    #[test]
    fn test_missing_rc_is_skipped() {
        let mut config = EngineConfig::in_memory();
        config.rc_file = Some("/nonexistent/rc.js".into());
        let engine = ScriptEngine::new(config).unwrap();
        assert!(!engine.run_rc().unwrap());
    }

    #[test]
    fn test_gc_keeps_paired_objects() {
        let engine = testing::engine();
        let node = engine.create::<testing::Node>(&[]).unwrap();
        engine.gc();
        let title: String = testing::eval_on(&engine, node.id.get().unwrap(), "obj.title.value");
        assert_eq!(title, "");
    }
}

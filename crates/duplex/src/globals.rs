//! Script Global Objects
//!
//! Registers `require`, the `_initClass` / `_initObj` registration hooks and
//! `console` in the script context.

use std::rc::{Rc, Weak};

use rquickjs::function::{Opt, Rest};
use rquickjs::{Ctx, Function, Object, Result as JsResult, Value as JsValue};

use crate::bridge::Bridge;
use crate::error::{BridgeError, BridgeResult};
use crate::interop::{display_value, id_value, throw, Caught};

/// Register every bridge global
pub(crate) fn install<'js>(bridge: &Rc<Bridge>, ctx: &Ctx<'js>) -> BridgeResult<()> {
    register_hooks(ctx, Rc::downgrade(bridge)).caught(ctx)?;
    register_console(ctx).caught(ctx)?;
    Ok(())
}

fn upgrade<'js>(ctx: &Ctx<'js>, bridge: &Weak<Bridge>) -> JsResult<Rc<Bridge>> {
    bridge.upgrade().ok_or_else(|| throw(ctx, &BridgeError::Closed))
}

fn register_hooks<'js>(ctx: &Ctx<'js>, bridge: Weak<Bridge>) -> JsResult<()> {
    let globals = ctx.globals();

    // require(path)
    let weak = bridge.clone();
    globals.set(
        "require",
        Function::new(ctx.clone(), move |ctx: Ctx<'js>, path: String| -> JsResult<JsValue<'js>> {
            let bridge = upgrade(&ctx, &weak)?;
            bridge.require(&ctx, &path).map_err(|e| throw(&ctx, &e))
        })?,
    )?;

    // _initClass(path, class, usePrototype = true)
    let weak = bridge.clone();
    globals.set(
        "_initClass",
        Function::new(
            ctx.clone(),
            move |ctx: Ctx<'js>, path: String, class: Object<'js>, use_prototype: Opt<bool>| -> JsResult<()> {
                let bridge = upgrade(&ctx, &weak)?;
                bridge
                    .init_class(&ctx, &path, class, use_prototype.0.unwrap_or(true))
                    .map_err(|e| throw(&ctx, &e))
            },
        )?,
    )?;

    // _initObj(path, obj, ...args) -> id
    let weak = bridge;
    globals.set(
        "_initObj",
        Function::new(
            ctx.clone(),
            move |ctx: Ctx<'js>, path: String, object: Object<'js>, args: Rest<JsValue<'js>>| -> JsResult<JsValue<'js>> {
                let bridge = upgrade(&ctx, &weak)?;
                let id = bridge
                    .init_object(&ctx, &path, object, args.0)
                    .map_err(|e| throw(&ctx, &e))?;
                Ok(id_value(&ctx, id))
            },
        )?,
    )?;

    Ok(())
}

fn join(args: &[JsValue<'_>]) -> String {
    args.iter().map(display_value).collect::<Vec<_>>().join(" ")
}

/// Register the console object with log, info, warn, error and debug
fn register_console<'js>(ctx: &Ctx<'js>) -> JsResult<()> {
    let globals = ctx.globals();

    if globals.get::<_, Object>("console").is_ok() {
        return Ok(());
    }

    let console = Object::new(ctx.clone())?;

    console.set("log", Function::new(ctx.clone(), |args: Rest<JsValue<'js>>| {
        tracing::info!(target: "duplex.js.console", "{}", join(&args.0));
    })?)?;

    console.set("info", Function::new(ctx.clone(), |args: Rest<JsValue<'js>>| {
        tracing::info!(target: "duplex.js.console", "{}", join(&args.0));
    })?)?;

    console.set("warn", Function::new(ctx.clone(), |args: Rest<JsValue<'js>>| {
        tracing::warn!(target: "duplex.js.console", "{}", join(&args.0));
    })?)?;

    console.set("error", Function::new(ctx.clone(), |args: Rest<JsValue<'js>>| {
        tracing::error!(target: "duplex.js.console", "{}", join(&args.0));
    })?)?;

    console.set("debug", Function::new(ctx.clone(), |args: Rest<JsValue<'js>>| {
        tracing::debug!(target: "duplex.js.console", "{}", join(&args.0));
    })?)?;

    globals.set("console", console)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::testing;

    #[test]
    fn test_globals_present() {
        let engine = testing::engine();
        let kinds: String = engine
            .eval("[typeof require, typeof _initClass, typeof _initObj, typeof console.log].join(',')")
            .unwrap();
        assert_eq!(kinds, "function,function,function,function");
    }

    #[test]
    fn test_console_log() {
        let engine = testing::engine();
        // This should not panic
        let _: () = engine.eval("console.log('Hello', 1, null, {})").unwrap();
    }

    #[test]
    fn test_init_class_on_class_itself() {
        let engine = testing::engine();
        let installed: bool = engine
            .eval("(() => { const C = function () {}; _initClass('test.node', C, false); return typeof C.describe === 'function' && C.prototype.describe === undefined; })()")
            .unwrap();
        assert!(installed);
    }
}

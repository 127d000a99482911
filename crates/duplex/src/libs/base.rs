//! Base library: `print`.

use std::rc::Rc;

use rquickjs::function::Rest;
use rquickjs::{Ctx, Function, Object, Value as JsValue};

use crate::bridge::Bridge;
use crate::error::BridgeResult;
use crate::factory::ClassFactory;
use crate::interop::{display_value, Caught};

/// Installs a global `print` that writes to the log
pub struct BaseLib {
    module_path: String,
}

impl BaseLib {
    pub fn new(module_path: impl Into<String>) -> Self {
        Self {
            module_path: module_path.into(),
        }
    }
}

impl ClassFactory for BaseLib {
    fn module_path(&self) -> &str {
        &self.module_path
    }

    fn init_class<'js>(&self, _bridge: &Rc<Bridge>, ctx: &Ctx<'js>, target: Object<'js>) -> BridgeResult<()> {
        let print = Function::new(ctx.clone(), |args: Rest<JsValue<'js>>| {
            let line = args.0.iter().map(display_value).collect::<Vec<_>>().join(" ");
            tracing::info!(target: "duplex.js", "{}", line);
        })
        .caught(ctx)?;
        target.set("print", print.clone()).caught(ctx)?;
        ctx.globals().set("print", print).caught(ctx)?;
        Ok(())
    }
}

//! Helpers for calling into the engine and surfacing errors on both sides.

use rquickjs::function::{Rest, This};
use rquickjs::{CatchResultExt, Ctx, Exception, FromJs, Function, Object, Type, Value as JsValue};

use crate::error::{BridgeError, BridgeResult};

/// Convert an engine result into a bridge result, taking the pending
/// exception out of the context.
pub(crate) trait Caught<T> {
    fn caught(self, ctx: &Ctx<'_>) -> BridgeResult<T>;
}

impl<T> Caught<T> for rquickjs::Result<T> {
    fn caught(self, ctx: &Ctx<'_>) -> BridgeResult<T> {
        self.catch(ctx).map_err(|e| BridgeError::Script(e.to_string()))
    }
}

/// Raise a bridge error as a script exception
pub(crate) fn throw(ctx: &Ctx<'_>, err: &BridgeError) -> rquickjs::Error {
    let message = err.to_string();
    match err {
        BridgeError::InvalidType(_) => Exception::throw_type(ctx, &message),
        _ => Exception::throw_message(ctx, &message),
    }
}

/// Call `target[name](...args)` with `target` as the receiver
pub(crate) fn call_method<'js, R: FromJs<'js>>(
    ctx: &Ctx<'js>,
    target: &Object<'js>,
    name: &str,
    args: Vec<JsValue<'js>>,
) -> BridgeResult<R> {
    let method: Function<'js> = target.get(name).caught(ctx)?;
    method.call((This(target.clone()), Rest(args))).caught(ctx)
}

/// Script number for a list index
pub(crate) fn index_value<'js>(ctx: &Ctx<'js>, index: usize) -> BridgeResult<JsValue<'js>> {
    let index = i32::try_from(index)
        .map_err(|_| BridgeError::Unsupported(format!("index {index} exceeds script range")))?;
    Ok(JsValue::new_int(ctx.clone(), index))
}

/// List index from a script number
pub(crate) fn read_index(raw: f64) -> BridgeResult<usize> {
    if raw < 0.0 || raw.fract() != 0.0 || raw > u32::MAX as f64 {
        return Err(BridgeError::InvalidType(format!("{raw} is not a list index")));
    }
    Ok(raw as usize)
}

/// Script number carrying an object id
pub(crate) fn id_value<'js>(ctx: &Ctx<'js>, id: u64) -> JsValue<'js> {
    match i32::try_from(id) {
        Ok(small) => JsValue::new_int(ctx.clone(), small),
        Err(_) => JsValue::new_float(ctx.clone(), id as f64),
    }
}

/// Human readable rendering used by `print` and `console`
pub(crate) fn display_value(value: &JsValue<'_>) -> String {
    match value.type_of() {
        Type::Undefined | Type::Uninitialized => "undefined".to_string(),
        Type::Null => "null".to_string(),
        Type::Bool => value.as_bool().map(|b| b.to_string()).unwrap_or_default(),
        Type::Int => value.as_int().map(|i| i.to_string()).unwrap_or_default(),
        Type::Float => value.as_float().map(|f| f.to_string()).unwrap_or_default(),
        Type::String => value.get::<String>().unwrap_or_default(),
        Type::Array => "[array]".to_string(),
        Type::Function | Type::Constructor => "[function]".to_string(),
        _ => "[object]".to_string(),
    }
}

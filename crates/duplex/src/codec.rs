//! Serialization Codec
//!
//! Converts single values crossing the boundary. Primitives are copied;
//! objects are never copied but resolved to their peer through the Identity
//! Registry, using the id every bound object carries on both sides.

use rquickjs::{Ctx, IntoJs, Object, Type, Value as JsValue};

use duplex_types::{Value, ValueKind};

use crate::bridge::Bridge;
use crate::error::{BridgeError, BridgeResult};

/// Reserved property holding the object id on the script side
pub const ID_KEY: &str = "_id";

/// Native value to script value
pub fn serialize<'js>(
    bridge: &Bridge,
    ctx: &Ctx<'js>,
    kind: &ValueKind,
    value: &Value,
) -> BridgeResult<JsValue<'js>> {
    match value {
        Value::Null => Ok(JsValue::new_null(ctx.clone())),
        Value::Bool(b) => Ok(JsValue::new_bool(ctx.clone(), *b)),
        Value::Int(i) => Ok(match i32::try_from(*i) {
            Ok(small) => JsValue::new_int(ctx.clone(), small),
            Err(_) => JsValue::new_float(ctx.clone(), *i as f64),
        }),
        Value::Float(f) => Ok(JsValue::new_float(ctx.clone(), *f)),
        Value::Text(s) => Ok(s.as_str().into_js(ctx)?),
        Value::Object(object) => {
            if let ValueKind::Object(expected) = kind {
                if object.type_key() != *expected {
                    return Err(BridgeError::InvalidType(format!(
                        "expected {}, found {}",
                        expected.short_name(),
                        object.type_key().short_name()
                    )));
                }
            }
            let id = bridge.id_of(object).ok_or_else(|| {
                BridgeError::serialize(format!(
                    "{} has no id registered with the bridge",
                    object.type_key().short_name()
                ))
            })?;
            bridge.registry().script_of(ctx, id).map_err(|e| {
                BridgeError::serialize_caused(format!("object {id} has no live script peer"), e)
            })
        }
    }
}

/// Script value to native value, checked against `kind`
pub fn deserialize<'js>(
    bridge: &Bridge,
    kind: &ValueKind,
    value: JsValue<'js>,
) -> BridgeResult<Value> {
    let native = match value.type_of() {
        Type::Undefined | Type::Uninitialized | Type::Null => Value::Null,
        Type::Bool => Value::Bool(value.get::<bool>()?),
        Type::Int => Value::Int(value.get::<i32>()? as i64),
        Type::Float => Value::Float(value.get::<f64>()?),
        Type::String => Value::Text(value.get::<String>()?),
        Type::Object | Type::Array => {
            let object: Object = value.get()?;
            let id = read_id(&object)?.ok_or_else(|| {
                BridgeError::serialize_caused(
                    "script object is not bound to a native object",
                    BridgeError::NoIdFound(format!("missing '{ID_KEY}'")),
                )
            })?;
            let native = bridge.registry().native_of(id).map_err(|e| {
                BridgeError::serialize_caused(format!("object {id} has no native peer"), e)
            })?;
            Value::Object(native)
        }
        other => {
            return Err(BridgeError::Unsupported(format!(
                "cannot pass a script {other:?} to native code"
            )));
        }
    };
    Ok(kind.coerce(native)?)
}

/// Read the id a script object carries, if any
pub fn read_id(object: &Object<'_>) -> BridgeResult<Option<u64>> {
    let raw: Option<f64> = object.get(ID_KEY)?;
    match raw {
        None => Ok(None),
        Some(id) if id >= 0.0 && id.fract() == 0.0 && id <= crate::registry::ID_LIMIT as f64 => {
            Ok(Some(id as u64))
        }
        Some(id) => Err(BridgeError::InvalidType(format!("malformed object id {id}"))),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use duplex_types::TypeKey;
    use crate::testing::{self, Node, Point};

    fn round_trip(engine: &crate::ScriptEngine, kind: ValueKind, value: Value) -> Value {
        let bridge = engine.bridge();
        engine.with(|ctx| {
            let js = serialize(bridge, ctx, &kind, &value).unwrap();
            deserialize(bridge, &kind, js).unwrap()
        })
    }

    #[test]
    fn test_primitives_round_trip() {
        let engine = testing::engine();
        assert_eq!(round_trip(&engine, ValueKind::Bool, Value::Bool(true)), Value::Bool(true));
        assert_eq!(round_trip(&engine, ValueKind::Int, Value::Int(-17)), Value::Int(-17));
        assert_eq!(
            round_trip(&engine, ValueKind::Int, Value::Int(1 << 40)),
            Value::Int(1 << 40)
        );
        assert_eq!(round_trip(&engine, ValueKind::Float, Value::Float(2.5)), Value::Float(2.5));
        assert_eq!(
            round_trip(&engine, ValueKind::Text, Value::from("héllo")),
            Value::from("héllo")
        );
        assert_eq!(round_trip(&engine, ValueKind::Text, Value::Null), Value::Null);
    }

    #[test]
    fn test_object_round_trip_keeps_identity() {
        let engine = testing::engine();
        let node = engine.create::<Node>(&[]).unwrap();
        let kind = ValueKind::Object(TypeKey::of::<Node>());
        let back = round_trip(&engine, kind, Value::from(node.clone()));
        assert!(std::rc::Rc::ptr_eq(&back.downcast::<Node>().unwrap(), &node));
    }

    #[test]
    fn test_serialize_unbound_object_fails() {
        let engine = testing::engine();
        let stray = std::rc::Rc::new(Node::default());
        let result = engine.with(|ctx| {
            serialize(engine.bridge(), ctx, &ValueKind::Any, &Value::from(stray))
                .map(|_| ())
        });
        assert!(matches!(result, Err(BridgeError::Serialize { .. })));
    }

    #[test]
    fn test_serialize_after_release_fails() {
        let engine = testing::engine();
        let node = engine.create::<Node>(&[]).unwrap();
        let pair = engine.bridge().registry().pair(node.id.get().unwrap()).unwrap();
        pair.script().release();

        let result = engine.with(|ctx| {
            serialize(engine.bridge(), ctx, &ValueKind::Any, &Value::from(node.clone()))
                .map(|_| ())
        });
        assert!(matches!(result, Err(BridgeError::Serialize { .. })));
    }

    #[test]
    fn test_deserialize_checks_kind() {
        let engine = testing::engine();
        let result = engine.with(|ctx| {
            let js: JsValue = ctx.eval("'text'").unwrap();
            deserialize(engine.bridge(), &ValueKind::Int, js)
        });
        assert!(matches!(result, Err(BridgeError::InvalidType(_))));
    }

    #[test]
    fn test_deserialize_object_without_id() {
        let engine = testing::engine();
        let result = engine.with(|ctx| {
            let js: JsValue = ctx.eval("({ plain: true })").unwrap();
            deserialize(engine.bridge(), &ValueKind::Any, js)
        });
        assert!(matches!(result, Err(BridgeError::Serialize { .. })));
    }

    #[test]
    fn test_deserialize_rejects_functions() {
        let engine = testing::engine();
        let result = engine.with(|ctx| {
            let js: JsValue = ctx.eval("(function () {})").unwrap();
            deserialize(engine.bridge(), &ValueKind::Any, js)
        });
        assert!(matches!(result, Err(BridgeError::Unsupported(_))));
    }

    #[test]
    fn test_deserialize_wrong_object_type() {
        let engine = testing::engine();
        engine.create::<Point>(&[Value::Int(1), Value::Int(2)]).unwrap();
        let result = engine.with(|ctx| {
            let id = engine.bridge().registry().ids()[0];
            let js = engine.bridge().registry().script_of(ctx, id).unwrap();
            deserialize(engine.bridge(), &ValueKind::Object(TypeKey::of::<Node>()), js)
        });
        assert!(matches!(result, Err(BridgeError::InvalidType(_))));
    }
}

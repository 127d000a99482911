//! Boundary values flowing between native code and scripts
//!
//! `Value` is the native-side form of anything a bound property, function
//! argument or collection element can hold. Object values are shared handles
//! to native domain objects; the bridge resolves them to their script peers
//! by id, never by copying.

use std::any::{Any, TypeId};
use std::fmt;
use std::rc::Rc;

use serde::{Serialize, Serializer};

use crate::ValueError;

// ─────────────────────────────────────────────────────────────────────────────
// Type Keys
// ─────────────────────────────────────────────────────────────────────────────

/// Runtime identity of a native type
#[derive(Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    pub fn of<T: Any>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Fully qualified type name
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Last path segment of the type name
    pub fn short_name(&self) -> &'static str {
        self.name.rsplit("::").next().unwrap_or(self.name)
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl std::hash::Hash for TypeKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeKey({})", self.name)
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl Serialize for TypeKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Native References
// ─────────────────────────────────────────────────────────────────────────────

/// Shared, type-erased handle to a native domain object
#[derive(Clone)]
pub struct NativeRef {
    object: Rc<dyn Any>,
    type_key: TypeKey,
}

impl NativeRef {
    pub fn new<T: Any>(object: Rc<T>) -> Self {
        Self {
            object,
            type_key: TypeKey::of::<T>(),
        }
    }

    pub fn type_key(&self) -> TypeKey {
        self.type_key
    }

    pub fn is<T: Any>(&self) -> bool {
        self.type_key.id == TypeId::of::<T>()
    }

    pub fn downcast<T: Any>(&self) -> Option<Rc<T>> {
        self.object.clone().downcast::<T>().ok()
    }

    pub fn as_any(&self) -> &dyn Any {
        &*self.object
    }

    /// Identity comparison: true when both refer to the same allocation
    pub fn ptr_eq(&self, other: &NativeRef) -> bool {
        std::ptr::addr_eq(Rc::as_ptr(&self.object), Rc::as_ptr(&other.object))
    }
}

impl fmt::Debug for NativeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "NativeRef({} @ {:p})",
            self.type_key.short_name(),
            Rc::as_ptr(&self.object)
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Value Kinds
// ─────────────────────────────────────────────────────────────────────────────

/// Declared kind of a property, parameter or collection element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "type", rename_all = "lowercase")]
pub enum ValueKind {
    Bool,
    Int,
    Float,
    Text,
    /// A bound native object of the given type
    Object(TypeKey),
    /// Anything the boundary can carry
    Any,
}

impl ValueKind {
    /// Check a value against this kind and normalize numbers.
    ///
    /// Null is accepted by every kind; whether the target can hold it is
    /// decided by the target's `Bindable` impl.
    pub fn coerce(&self, value: Value) -> Result<Value, ValueError> {
        match (self, value) {
            (_, Value::Null) => Ok(Value::Null),
            (ValueKind::Any, value) => Ok(value),
            (ValueKind::Bool, Value::Bool(b)) => Ok(Value::Bool(b)),
            (ValueKind::Int, Value::Int(i)) => Ok(Value::Int(i)),
            (ValueKind::Int, Value::Float(f)) if is_integral(f) => Ok(Value::Int(f as i64)),
            (ValueKind::Float, Value::Float(f)) => Ok(Value::Float(f)),
            (ValueKind::Float, Value::Int(i)) => Ok(Value::Float(i as f64)),
            (ValueKind::Text, Value::Text(s)) => Ok(Value::Text(s)),
            (ValueKind::Object(key), Value::Object(obj)) if obj.type_key() == *key => {
                Ok(Value::Object(obj))
            }
            (kind, value) => Err(ValueError::mismatch(kind, value.type_name())),
        }
    }
}

fn is_integral(f: f64) -> bool {
    f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKind::Bool => write!(f, "bool"),
            ValueKind::Int => write!(f, "int"),
            ValueKind::Float => write!(f, "float"),
            ValueKind::Text => write!(f, "text"),
            ValueKind::Object(key) => write!(f, "object {}", key.short_name()),
            ValueKind::Any => write!(f, "any"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Boundary Value
// ─────────────────────────────────────────────────────────────────────────────

/// A value crossing the native/script boundary
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Object(NativeRef),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as i64 (also converts from float if lossless)
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if is_integral(*f) => Some(*f as i64),
            _ => None,
        }
    }

    /// Get as f64 (also converts from int)
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&NativeRef> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Downcast an object value to a concrete native type
    pub fn downcast<T: Any>(&self) -> Option<Rc<T>> {
        self.as_object().and_then(NativeRef::downcast)
    }

    /// Name of the runtime kind, used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Object(obj) => obj.type_key().short_name(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Null
    }
}

impl<T: Any> From<Rc<T>> for Value {
    fn from(object: Rc<T>) -> Self {
        Value::Object(NativeRef::new(object))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Bindable
// ─────────────────────────────────────────────────────────────────────────────

/// Native types that can live in a bound property or list
pub trait Bindable: Clone + 'static {
    /// Kind declared to the script side
    fn kind() -> ValueKind;

    fn to_value(&self) -> Value;

    fn from_value(value: Value) -> Result<Self, ValueError>;

    /// Change detection: a write of a value that is `same` as the current one
    /// does not notify listeners.
    fn same(&self, other: &Self) -> bool;
}

impl Bindable for bool {
    fn kind() -> ValueKind {
        ValueKind::Bool
    }

    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        value
            .as_bool()
            .ok_or_else(|| ValueError::mismatch("bool", value.type_name()))
    }

    fn same(&self, other: &Self) -> bool {
        self == other
    }
}

impl Bindable for i64 {
    fn kind() -> ValueKind {
        ValueKind::Int
    }

    fn to_value(&self) -> Value {
        Value::Int(*self)
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        value
            .as_i64()
            .ok_or_else(|| ValueError::mismatch("int", value.type_name()))
    }

    fn same(&self, other: &Self) -> bool {
        self == other
    }
}

impl Bindable for i32 {
    fn kind() -> ValueKind {
        ValueKind::Int
    }

    fn to_value(&self) -> Value {
        Value::Int(*self as i64)
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        value
            .as_i64()
            .and_then(|i| i32::try_from(i).ok())
            .ok_or_else(|| ValueError::mismatch("int (32 bit)", value.type_name()))
    }

    fn same(&self, other: &Self) -> bool {
        self == other
    }
}

impl Bindable for f64 {
    fn kind() -> ValueKind {
        ValueKind::Float
    }

    fn to_value(&self) -> Value {
        Value::Float(*self)
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        value
            .as_f64()
            .ok_or_else(|| ValueError::mismatch("float", value.type_name()))
    }

    fn same(&self, other: &Self) -> bool {
        self == other || (self.is_nan() && other.is_nan())
    }
}

impl Bindable for String {
    fn kind() -> ValueKind {
        ValueKind::Text
    }

    fn to_value(&self) -> Value {
        Value::Text(self.clone())
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Text(s) => Ok(s),
            other => Err(ValueError::mismatch("text", other.type_name())),
        }
    }

    fn same(&self, other: &Self) -> bool {
        self == other
    }
}

impl Bindable for Option<String> {
    fn kind() -> ValueKind {
        ValueKind::Text
    }

    fn to_value(&self) -> Value {
        match self {
            Some(s) => Value::Text(s.clone()),
            None => Value::Null,
        }
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Null => Ok(None),
            Value::Text(s) => Ok(Some(s)),
            other => Err(ValueError::mismatch("text or null", other.type_name())),
        }
    }

    fn same(&self, other: &Self) -> bool {
        self == other
    }
}

/// Object-valued bindings are always nullable
impl<T: Any> Bindable for Option<Rc<T>> {
    fn kind() -> ValueKind {
        ValueKind::Object(TypeKey::of::<T>())
    }

    fn to_value(&self) -> Value {
        match self {
            Some(object) => Value::Object(NativeRef::new(object.clone())),
            None => Value::Null,
        }
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Null => Ok(None),
            Value::Object(obj) => obj.downcast::<T>().map(Some).ok_or_else(|| {
                ValueError::mismatch(TypeKey::of::<T>().short_name(), obj.type_key().short_name())
            }),
            other => Err(ValueError::mismatch(
                TypeKey::of::<T>().short_name(),
                other.type_name(),
            )),
        }
    }

    fn same(&self, other: &Self) -> bool {
        match (self, other) {
            (Some(a), Some(b)) => Rc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl Bindable for Value {
    fn kind() -> ValueKind {
        ValueKind::Any
    }

    fn to_value(&self) -> Value {
        self.clone()
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        Ok(value)
    }

    fn same(&self, other: &Self) -> bool {
        self == other
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

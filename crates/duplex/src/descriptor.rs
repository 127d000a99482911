//! Type Descriptor Builder
//!
//! A `TypeDescriptor` is the immutable binding metadata of one native type:
//! where its script class lives, how to reach its id slot, which functions
//! it exposes, which properties and lists it binds, and how it is
//! constructed. Types describe themselves through `Bound::describe`; the
//! Factory Registry builds each descriptor once and shares it.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

use rquickjs::{Ctx, Object, Value as JsValue};
use serde::Serialize;

use duplex_types::{
    Bindable, Closeable, NativeRef, ObjectId, ObservableCollection, ObservableList,
    ObservableValue, Property, TypeKey, Value, ValueKind,
};

use crate::bridge::Bridge;
use crate::error::{BridgeError, BridgeResult, DescriptorError};

/// Native types that can be bound to a script class
pub trait Bound: Any + Sized {
    fn describe(builder: DescriptorBuilder<Self>) -> DescriptorBuilder<Self>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Erased Accessors
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) trait IdAccess {
    fn slot<'a>(&self, target: &'a dyn Any) -> Option<&'a ObjectId>;
}

struct IdField<T> {
    accessor: fn(&T) -> &ObjectId,
}

impl<T: Any> IdAccess for IdField<T> {
    fn slot<'a>(&self, target: &'a dyn Any) -> Option<&'a ObjectId> {
        target.downcast_ref::<T>().map(self.accessor)
    }
}

pub(crate) trait PropertyAccess {
    fn observable<'a>(&self, target: &'a dyn Any) -> Option<&'a dyn ObservableValue>;
}

struct PropertyField<T, V> {
    accessor: fn(&T) -> &Property<V>,
}

impl<T: Any, V: Bindable> PropertyAccess for PropertyField<T, V> {
    fn observable<'a>(&self, target: &'a dyn Any) -> Option<&'a dyn ObservableValue> {
        let typed = target.downcast_ref::<T>()?;
        Some((self.accessor)(typed))
    }
}

pub(crate) trait CollectionAccess {
    fn collection<'a>(&self, target: &'a dyn Any) -> Option<&'a dyn ObservableCollection>;
}

struct CollectionField<T, V> {
    accessor: fn(&T) -> &ObservableList<V>,
}

impl<T: Any, V: Bindable> CollectionAccess for CollectionField<T, V> {
    fn collection<'a>(&self, target: &'a dyn Any) -> Option<&'a dyn ObservableCollection> {
        let typed = target.downcast_ref::<T>()?;
        Some((self.accessor)(typed))
    }
}

/// Closes a native object at registry shutdown
pub type Closer = Rc<dyn Fn(&dyn Any) -> anyhow::Result<()>>;

// ─────────────────────────────────────────────────────────────────────────────
// Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Positional arguments of a typed function call, already deserialized
#[derive(Debug, Clone, Default)]
pub struct CallArgs(Vec<Value>);

impl CallArgs {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Argument at `index`; missing arguments are null
    pub fn value(&self, index: usize) -> Value {
        self.0.get(index).cloned().unwrap_or_default()
    }

    pub fn get<V: Bindable>(&self, index: usize) -> BridgeResult<V> {
        let value = V::kind().coerce(self.value(index))?;
        V::from_value(value).map_err(|e| BridgeError::InvalidType(format!("argument {index}: {e}")))
    }

    pub fn into_vec(self) -> Vec<Value> {
        self.0
    }
}

/// Unconverted call handed to raw functions
pub struct RawCall<'js> {
    pub ctx: Ctx<'js>,
    pub receiver: Object<'js>,
    pub args: Vec<JsValue<'js>>,
}

/// A function receiving the receiver and the raw argument list
pub trait RawFunction {
    fn call<'js>(&self, target: &dyn Any, call: RawCall<'js>) -> BridgeResult<JsValue<'js>>;
}

struct RawAdapter<T, F> {
    function: F,
    _target: PhantomData<fn(&T)>,
}

impl<T, F> RawFunction for RawAdapter<T, F>
where
    T: Any,
    F: for<'js> Fn(&T, RawCall<'js>) -> BridgeResult<JsValue<'js>>,
{
    fn call<'js>(&self, target: &dyn Any, call: RawCall<'js>) -> BridgeResult<JsValue<'js>> {
        let typed = target.downcast_ref::<T>().ok_or_else(|| {
            BridgeError::InvalidType(format!("receiver is not a {}", TypeKey::of::<T>().short_name()))
        })?;
        (self.function)(typed, call)
    }
}

pub type TypedFunction = Rc<dyn Fn(&dyn Any, CallArgs) -> BridgeResult<Value>>;

#[derive(Clone)]
pub enum Invoker {
    Typed(TypedFunction),
    Raw(Rc<dyn RawFunction>),
}

/// Declared parameter of an exposed function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "param", content = "kind", rename_all = "lowercase")]
pub enum ParamKind {
    Value(ValueKind),
    /// The script receiver, unconverted
    Receiver,
    /// The whole argument list, unconverted
    Arguments,
}

/// A native function exposed on the script prototype
#[derive(Clone)]
pub struct FunctionDescriptor {
    name: String,
    raw: bool,
    params: Vec<ParamKind>,
    declaring_type: TypeKey,
    invoker: Invoker,
}

impl FunctionDescriptor {
    pub fn new(
        name: impl Into<String>,
        raw: bool,
        params: Vec<ParamKind>,
        declaring_type: TypeKey,
        invoker: Invoker,
    ) -> Self {
        Self {
            name: name.into(),
            raw,
            params,
            declaring_type,
            invoker,
        }
    }

    pub fn typed<T: Any>(
        name: impl Into<String>,
        params: &[ValueKind],
        function: impl Fn(&T, CallArgs) -> BridgeResult<Value> + 'static,
    ) -> Self {
        let invoker: TypedFunction = Rc::new(move |target: &dyn Any, args: CallArgs| {
            let typed = target.downcast_ref::<T>().ok_or_else(|| {
                BridgeError::InvalidType(format!(
                    "receiver is not a {}",
                    TypeKey::of::<T>().short_name()
                ))
            })?;
            function(typed, args)
        });
        Self::new(
            name,
            false,
            params.iter().copied().map(ParamKind::Value).collect(),
            TypeKey::of::<T>(),
            Invoker::Typed(invoker),
        )
    }

    pub fn raw<T, F>(name: impl Into<String>, function: F) -> Self
    where
        T: Any,
        F: for<'js> Fn(&T, RawCall<'js>) -> BridgeResult<JsValue<'js>> + 'static,
    {
        let adapter = RawAdapter {
            function,
            _target: PhantomData::<fn(&T)>,
        };
        Self::new(
            name,
            true,
            vec![ParamKind::Receiver, ParamKind::Arguments],
            TypeKey::of::<T>(),
            Invoker::Raw(Rc::new(adapter)),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_raw(&self) -> bool {
        self.raw
    }

    pub fn params(&self) -> &[ParamKind] {
        &self.params
    }

    pub fn declaring_type(&self) -> TypeKey {
        self.declaring_type
    }

    pub fn invoker(&self) -> &Invoker {
        &self.invoker
    }

    /// Raw functions take exactly (receiver, arguments); typed functions
    /// take converted values only.
    pub fn validate(&self) -> BridgeResult<()> {
        let shape_ok = if self.raw {
            matches!(self.invoker, Invoker::Raw(_))
                && self.params == [ParamKind::Receiver, ParamKind::Arguments]
        } else {
            matches!(self.invoker, Invoker::Typed(_))
                && self.params.iter().all(|p| matches!(p, ParamKind::Value(_)))
        };
        if shape_ok {
            Ok(())
        } else {
            Err(BridgeError::InvalidType(format!(
                "function '{}' does not match the {} calling convention",
                self.name,
                if self.raw { "raw" } else { "typed" }
            )))
        }
    }
}

impl fmt::Debug for FunctionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionDescriptor")
            .field("name", &self.name)
            .field("raw", &self.raw)
            .field("params", &self.params)
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Bindings and Constants
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub(crate) enum BindingAccess {
    Property(Rc<dyn PropertyAccess>),
    Collection(Rc<dyn CollectionAccess>),
}

/// A property or list kept in sync with a script binding
#[derive(Clone)]
pub struct BindingDescriptor {
    name: String,
    kind: ValueKind,
    access: BindingAccess,
}

impl BindingDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Kind of the property value, or of each list element
    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    pub fn is_collection(&self) -> bool {
        matches!(self.access, BindingAccess::Collection(_))
    }

    pub(crate) fn access(&self) -> &BindingAccess {
        &self.access
    }
}

impl fmt::Debug for BindingDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("collection", &self.is_collection())
            .finish()
    }
}

/// A value written once onto the script object at initialization
#[derive(Clone)]
pub struct ConstantDescriptor {
    name: String,
    value: Rc<dyn Fn(&dyn Any) -> Value>,
}

impl ConstantDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value_for(&self, target: &dyn Any) -> Value {
        (self.value)(target)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Constructors
// ─────────────────────────────────────────────────────────────────────────────

/// How a native instance is built when the script side constructs one
#[derive(Clone)]
pub enum ConstructorStrategy {
    /// Arguments are deserialized positionally against `params`
    Explicit {
        params: Vec<ValueKind>,
        construct: Rc<dyn Fn(CallArgs) -> BridgeResult<NativeRef>>,
    },
    /// The constructor receives the bridge
    RuntimeContext(Rc<dyn Fn(&Rc<Bridge>) -> BridgeResult<NativeRef>>),
    ZeroArgument(Rc<dyn Fn() -> BridgeResult<NativeRef>>),
}

impl ConstructorStrategy {
    pub fn label(&self) -> &'static str {
        match self {
            ConstructorStrategy::Explicit { .. } => "explicit",
            ConstructorStrategy::RuntimeContext(_) => "runtime-context",
            ConstructorStrategy::ZeroArgument(_) => "zero-argument",
        }
    }
}

impl fmt::Debug for ConstructorStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstructorStrategy::Explicit { params, .. } => {
                f.debug_struct("Explicit").field("params", params).finish()
            }
            other => f.write_str(other.label()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Type Descriptor
// ─────────────────────────────────────────────────────────────────────────────

pub struct TypeDescriptor {
    type_key: TypeKey,
    module_path: String,
    id: Rc<dyn IdAccess>,
    functions: Vec<FunctionDescriptor>,
    bindings: Vec<BindingDescriptor>,
    constants: Vec<ConstantDescriptor>,
    constructor: ConstructorStrategy,
    script_constructor: Option<String>,
    closer: Option<Closer>,
}

impl TypeDescriptor {
    /// Build the descriptor of `T`. A given module path takes precedence over
    /// the one the type declares.
    pub fn of<T: Bound>(module_path: Option<&str>) -> Result<Self, DescriptorError> {
        let builder = T::describe(DescriptorBuilder::new());
        match module_path {
            Some(path) => builder.module_path(path).build(),
            None => builder.build(),
        }
    }

    pub fn type_key(&self) -> TypeKey {
        self.type_key
    }

    pub fn module_path(&self) -> &str {
        &self.module_path
    }

    pub fn functions(&self) -> &[FunctionDescriptor] {
        &self.functions
    }

    pub fn bindings(&self) -> &[BindingDescriptor] {
        &self.bindings
    }

    pub fn constants(&self) -> &[ConstantDescriptor] {
        &self.constants
    }

    pub fn constructor(&self) -> &ConstructorStrategy {
        &self.constructor
    }

    /// Script expression evaluated to construct an instance from native code.
    /// `args` holds the serialized constructor arguments.
    pub fn script_constructor(&self) -> String {
        match &self.script_constructor {
            Some(expression) => expression.clone(),
            None => format!(
                "new (require({}))(...args)",
                serde_json::Value::String(self.module_path.clone())
            ),
        }
    }

    pub fn closer(&self) -> Option<&Closer> {
        self.closer.as_ref()
    }

    pub fn id_slot<'a>(&self, target: &'a dyn Any) -> Option<&'a ObjectId> {
        self.id.slot(target)
    }

    /// The id assigned to a native object of this type
    pub fn id_of(&self, native: &NativeRef) -> Option<u64> {
        self.id_slot(native.as_any()).and_then(ObjectId::get)
    }

    pub fn summary(&self) -> DescriptorSummary {
        DescriptorSummary {
            module_path: self.module_path.clone(),
            native_type: self.type_key.name(),
            constructor: self.constructor.label(),
            closeable: self.closer.is_some(),
            functions: self
                .functions
                .iter()
                .map(|f| FunctionSummary {
                    name: f.name.clone(),
                    raw: f.raw,
                    params: f.params.clone(),
                })
                .collect(),
            bindings: self
                .bindings
                .iter()
                .map(|b| BindingSummary {
                    name: b.name.clone(),
                    kind: b.kind,
                    collection: b.is_collection(),
                })
                .collect(),
            constants: self.constants.iter().map(|c| c.name.clone()).collect(),
        }
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("type", &self.type_key)
            .field("module_path", &self.module_path)
            .field("functions", &self.functions)
            .field("bindings", &self.bindings)
            .field("constructor", &self.constructor)
            .finish()
    }
}

/// Serializable overview of a descriptor
#[derive(Debug, Clone, Serialize)]
pub struct DescriptorSummary {
    pub module_path: String,
    pub native_type: &'static str,
    pub constructor: &'static str,
    pub closeable: bool,
    pub functions: Vec<FunctionSummary>,
    pub bindings: Vec<BindingSummary>,
    pub constants: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionSummary {
    pub name: String,
    pub raw: bool,
    pub params: Vec<ParamKind>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BindingSummary {
    pub name: String,
    pub kind: ValueKind,
    pub collection: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────────────────────────

/// Collects the binding metadata of `T`
pub struct DescriptorBuilder<T> {
    module_path: Option<String>,
    id: Option<fn(&T) -> &ObjectId>,
    functions: Vec<FunctionDescriptor>,
    bindings: Vec<BindingDescriptor>,
    constants: Vec<ConstantDescriptor>,
    constructor: Option<ConstructorStrategy>,
    script_constructor: Option<String>,
    closer: Option<Closer>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Any> DescriptorBuilder<T> {
    pub fn new() -> Self {
        Self {
            module_path: None,
            id: None,
            functions: Vec::new(),
            bindings: Vec::new(),
            constants: Vec::new(),
            constructor: None,
            script_constructor: None,
            closer: None,
            _marker: PhantomData,
        }
    }

    /// Module path of the script class paired with `T`
    pub fn module_path(mut self, path: impl Into<String>) -> Self {
        self.module_path = Some(path.into());
        self
    }

    pub fn id(mut self, accessor: fn(&T) -> &ObjectId) -> Self {
        self.id = Some(accessor);
        self
    }

    pub fn property<V: Bindable>(mut self, name: &str, accessor: fn(&T) -> &Property<V>) -> Self {
        self.bindings.push(BindingDescriptor {
            name: name.to_string(),
            kind: V::kind(),
            access: BindingAccess::Property(Rc::new(PropertyField { accessor })),
        });
        self
    }

    pub fn collection<V: Bindable>(
        mut self,
        name: &str,
        accessor: fn(&T) -> &ObservableList<V>,
    ) -> Self {
        self.bindings.push(BindingDescriptor {
            name: name.to_string(),
            kind: V::kind(),
            access: BindingAccess::Collection(Rc::new(CollectionField { accessor })),
        });
        self
    }

    pub fn constant(mut self, name: &str, value: fn(&T) -> Value) -> Self {
        let value = Rc::new(move |target: &dyn Any| {
            target.downcast_ref::<T>().map(value).unwrap_or_default()
        });
        self.constants.push(ConstantDescriptor {
            name: name.to_string(),
            value,
        });
        self
    }

    pub fn function(
        mut self,
        name: &str,
        params: &[ValueKind],
        function: impl Fn(&T, CallArgs) -> BridgeResult<Value> + 'static,
    ) -> Self {
        self.functions
            .push(FunctionDescriptor::typed::<T>(name, params, function));
        self
    }

    pub fn raw_function<F>(mut self, name: &str, function: F) -> Self
    where
        F: for<'js> Fn(&T, RawCall<'js>) -> BridgeResult<JsValue<'js>> + 'static,
    {
        self.functions.push(FunctionDescriptor::raw::<T, F>(name, function));
        self
    }

    /// Add a hand-built function descriptor
    pub fn declare(mut self, function: FunctionDescriptor) -> Self {
        self.functions.push(function);
        self
    }

    pub fn constructor(
        mut self,
        params: &[ValueKind],
        construct: impl Fn(CallArgs) -> BridgeResult<T> + 'static,
    ) -> Self {
        self.constructor = Some(ConstructorStrategy::Explicit {
            params: params.to_vec(),
            construct: Rc::new(move |args| construct(args).map(|t| NativeRef::new(Rc::new(t)))),
        });
        self
    }

    pub fn runtime_constructor(
        mut self,
        construct: impl Fn(&Rc<Bridge>) -> BridgeResult<T> + 'static,
    ) -> Self {
        self.constructor = Some(ConstructorStrategy::RuntimeContext(Rc::new(move |bridge| {
            construct(bridge).map(|t| NativeRef::new(Rc::new(t)))
        })));
        self
    }

    pub fn zero_arg_constructor(mut self, construct: impl Fn() -> T + 'static) -> Self {
        self.constructor = Some(ConstructorStrategy::ZeroArgument(Rc::new(move || {
            Ok(NativeRef::new(Rc::new(construct())))
        })));
        self
    }

    /// Override the expression used to construct instances from native code
    pub fn script_constructor(mut self, expression: impl Into<String>) -> Self {
        self.script_constructor = Some(expression.into());
        self
    }

    pub fn closeable(mut self) -> Self
    where
        T: Closeable,
    {
        self.closer = Some(Rc::new(|target: &dyn Any| match target.downcast_ref::<T>() {
            Some(typed) => typed.close(),
            None => Ok(()),
        }));
        self
    }

    pub fn build(self) -> Result<TypeDescriptor, DescriptorError> {
        let type_key = TypeKey::of::<T>();
        let id = self.id.ok_or(DescriptorError::MissingId(type_key.name()))?;
        let module_path = self
            .module_path
            .filter(|path| !path.trim().is_empty())
            .ok_or(DescriptorError::MissingModulePath(type_key.name()))?;
        let constructor = self
            .constructor
            .ok_or(DescriptorError::MissingConstructor(type_key.name()))?;

        let mut seen = std::collections::HashSet::new();
        let names = self
            .functions
            .iter()
            .map(|f| f.name.as_str())
            .chain(self.bindings.iter().map(|b| b.name.as_str()))
            .chain(self.constants.iter().map(|c| c.name.as_str()));
        for name in names {
            if !seen.insert(name) {
                return Err(DescriptorError::DuplicateMember {
                    type_name: type_key.name(),
                    member: name.to_string(),
                });
            }
        }

        Ok(TypeDescriptor {
            type_key,
            module_path,
            id: Rc::new(IdField { accessor: id }),
            functions: self.functions,
            bindings: self.bindings,
            constants: self.constants,
            constructor,
            script_constructor: self.script_constructor,
            closer: self.closer,
        })
    }
}

impl<T: Any> Default for DescriptorBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Node;

    struct Bare {
        id: ObjectId,
        name: Property<String>,
    }

    fn bare() -> Bare {
        Bare {
            id: ObjectId::new(),
            name: Property::new(String::new()),
        }
    }

    #[test]
    fn test_build_node_descriptor() {
        let descriptor = TypeDescriptor::of::<Node>(None).unwrap();
        assert_eq!(descriptor.module_path(), "test.node");
        assert!(descriptor.closer().is_some());
        assert!(descriptor.bindings().iter().any(|b| b.name() == "tags" && b.is_collection()));
        assert!(descriptor.functions().iter().all(|f| f.validate().is_ok()));
        assert_eq!(
            descriptor.script_constructor(),
            r#"new (require("test.node"))(...args)"#
        );
    }

    #[test]
    fn test_module_path_override() {
        let descriptor = TypeDescriptor::of::<Node>(Some("other.node")).unwrap();
        assert_eq!(descriptor.module_path(), "other.node");
    }

    #[test]
    fn test_missing_id_is_fatal() {
        let result = DescriptorBuilder::<Bare>::new()
            .module_path("bare")
            .zero_arg_constructor(bare)
            .build();
        assert!(matches!(result, Err(DescriptorError::MissingId(_))));
    }

    #[test]
    fn test_missing_module_path_is_fatal() {
        let result = DescriptorBuilder::<Bare>::new()
            .id(|b| &b.id)
            .zero_arg_constructor(bare)
            .build();
        assert!(matches!(result, Err(DescriptorError::MissingModulePath(_))));
    }

    #[test]
    fn test_missing_constructor_is_fatal() {
        let result = DescriptorBuilder::<Bare>::new()
            .module_path("bare")
            .id(|b| &b.id)
            .build();
        assert!(matches!(result, Err(DescriptorError::MissingConstructor(_))));
    }

    #[test]
    fn test_duplicate_member_is_fatal() {
        let result = DescriptorBuilder::<Bare>::new()
            .module_path("bare")
            .id(|b| &b.id)
            .property("name", |b| &b.name)
            .function("name", &[], |_, _| Ok(Value::Null))
            .zero_arg_constructor(bare)
            .build();
        assert!(matches!(result, Err(DescriptorError::DuplicateMember { .. })));
    }

    #[test]
    fn test_raw_shape_mismatch() {
        let broken = FunctionDescriptor::new(
            "broken",
            true,
            vec![ParamKind::Value(ValueKind::Text)],
            TypeKey::of::<Bare>(),
            Invoker::Typed(Rc::new(|_, _| Ok(Value::Null))),
        );
        assert!(matches!(broken.validate(), Err(BridgeError::InvalidType(_))));
    }

    #[test]
    fn test_id_slot_lookup() {
        let descriptor = DescriptorBuilder::<Bare>::new()
            .module_path("bare")
            .id(|b| &b.id)
            .zero_arg_constructor(bare)
            .build()
            .unwrap();
        let object = Rc::new(bare());
        let native = NativeRef::new(object.clone());
        assert_eq!(descriptor.id_of(&native), None);
        object.id.assign(5).unwrap();
        assert_eq!(descriptor.id_of(&native), Some(5));
        assert!(descriptor.id_slot(&42u8).is_none());
    }

    #[test]
    fn test_call_args() {
        let args = CallArgs::new(vec![Value::from("a"), Value::Float(3.0)]);
        assert_eq!(args.get::<String>(0).unwrap(), "a");
        assert_eq!(args.get::<i64>(1).unwrap(), 3);
        assert!(args.get::<String>(2).is_err());
        assert_eq!(args.get::<Option<String>>(2).unwrap(), None);
    }

    #[test]
    fn test_summary_serializes() {
        let descriptor = TypeDescriptor::of::<Node>(None).unwrap();
        let json = serde_json::to_value(descriptor.summary()).unwrap();
        assert_eq!(json["module_path"], "test.node");
        assert_eq!(json["constructor"], "zero-argument");
        assert!(json["bindings"].as_array().unwrap().iter().any(|b| b["name"] == "title"));
    }
}

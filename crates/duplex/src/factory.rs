//! Binding Factory
//!
//! `ClassFactory` is the contract for anything registered under a module
//! path. `BindingFactory` implements it for bound native types: it installs
//! the exposed functions on the script prototype and creates pairs from
//! either side of the boundary.

use std::rc::{Rc, Weak};

use rquickjs::function::{Rest, This};
use rquickjs::{Array, Ctx, Function, Object, Value as JsValue};
use tracing::{debug, info};

use duplex_types::{NativeRef, Value, ValueKind};

use crate::bridge::Bridge;
use crate::codec::{self, ID_KEY};
use crate::descriptor::{
    CallArgs, ConstructorStrategy, FunctionDescriptor, Invoker, ParamKind, RawCall, TypeDescriptor,
};
use crate::error::{BridgeError, BridgeResult};
use crate::interop::{throw, Caught};
use crate::registry::{BoundPair, RootedHandle};
use crate::sync;

/// Anything that can back a script module path
pub trait ClassFactory {
    fn module_path(&self) -> &str;

    /// Prepare a script class (or its prototype) for use
    fn init_class<'js>(&self, bridge: &Rc<Bridge>, ctx: &Ctx<'js>, target: Object<'js>) -> BridgeResult<()>;

    /// Pair a freshly constructed script object with a native one.
    /// Returns the assigned id.
    fn init_object<'js>(
        &self,
        _bridge: &Rc<Bridge>,
        _ctx: &Ctx<'js>,
        _object: Object<'js>,
        _args: Vec<JsValue<'js>>,
    ) -> BridgeResult<u64> {
        Err(BridgeError::Unsupported(format!(
            "'{}' does not construct objects",
            self.module_path()
        )))
    }

    /// Create a pair from native code
    fn create_object(&self, _bridge: &Rc<Bridge>, _args: &[Value]) -> BridgeResult<NativeRef> {
        Err(BridgeError::Unsupported(format!(
            "'{}' does not construct objects",
            self.module_path()
        )))
    }

    fn descriptor(&self) -> Option<&Rc<TypeDescriptor>> {
        None
    }
}

/// Factory for one bound native type, driven by its descriptor
pub struct BindingFactory {
    descriptor: Rc<TypeDescriptor>,
}

impl BindingFactory {
    pub fn new(descriptor: Rc<TypeDescriptor>) -> Self {
        Self { descriptor }
    }

    pub fn type_descriptor(&self) -> &Rc<TypeDescriptor> {
        &self.descriptor
    }

    fn type_name(&self) -> &'static str {
        self.descriptor.type_key().short_name()
    }

    /// Register one trampoline per exposed function on `prototype`
    pub fn install_on_prototype<'js>(
        &self,
        bridge: &Rc<Bridge>,
        ctx: &Ctx<'js>,
        prototype: &Object<'js>,
    ) -> BridgeResult<()> {
        for function in self.descriptor.functions() {
            function.validate()?;
            let trampoline = trampoline(ctx, Rc::downgrade(bridge), function.clone())?;
            prototype.set(function.name(), trampoline).caught(ctx)?;
        }
        debug!(
            target: "duplex.factory",
            module = self.descriptor.module_path(),
            functions = self.descriptor.functions().len(),
            "installed functions"
        );
        Ok(())
    }

    /// Construct the native peer of a script object created by a script
    /// constructor, and pair the two.
    pub fn instantiate_from_script<'js>(
        &self,
        bridge: &Rc<Bridge>,
        ctx: &Ctx<'js>,
        object: Object<'js>,
        args: Vec<JsValue<'js>>,
    ) -> BridgeResult<u64> {
        self.pair_script_object(bridge, ctx, object, args)
            .map_err(|e| BridgeError::creation(self.type_name(), e))
    }

    fn pair_script_object<'js>(
        &self,
        bridge: &Rc<Bridge>,
        ctx: &Ctx<'js>,
        object: Object<'js>,
        args: Vec<JsValue<'js>>,
    ) -> BridgeResult<u64> {
        if let Some(existing) = codec::read_id(&object)? {
            return Err(BridgeError::DuplicateId(existing));
        }

        let native = self.construct(bridge, args)?;
        if native.type_key() != self.descriptor.type_key() {
            return Err(BridgeError::InvalidType(format!(
                "constructor of '{}' produced a {}",
                self.descriptor.module_path(),
                native.type_key().short_name()
            )));
        }
        let slot = self.descriptor.id_slot(native.as_any()).ok_or_else(|| {
            BridgeError::NoIdFound(format!("{} exposes no id slot", self.type_name()))
        })?;
        if let Some(current) = slot.get() {
            return Err(BridgeError::DuplicateId(current));
        }

        // Everything that can fail runs before the pair is registered, so a
        // failed creation leaves no trace in the registry.
        for constant in self.descriptor.constants() {
            let value = constant.value_for(native.as_any());
            let script_value = codec::serialize(bridge, ctx, &ValueKind::Any, &value)?;
            object.set(constant.name(), script_value).caught(ctx)?;
        }
        let channels = sync::wire(bridge, ctx, &native, &self.descriptor, &object)?;

        let registered = self.register_pair(bridge, ctx, &native, &object);
        let (id, pair) = match registered {
            Ok(registered) => registered,
            Err(e) => {
                for channel in &channels {
                    channel.detach();
                }
                return Err(e);
            }
        };
        for channel in channels {
            pair.attach(channel);
        }

        info!(
            target: "duplex.factory",
            id,
            module = self.descriptor.module_path(),
            "paired object"
        );
        Ok(id)
    }

    fn register_pair<'js>(
        &self,
        bridge: &Bridge,
        ctx: &Ctx<'js>,
        native: &NativeRef,
        object: &Object<'js>,
    ) -> BridgeResult<(u64, Rc<BoundPair>)> {
        let slot = self.descriptor.id_slot(native.as_any()).ok_or_else(|| {
            BridgeError::NoIdFound(format!("{} exposes no id slot", self.type_name()))
        })?;
        let registry = bridge.registry();
        let id = registry.request_id()?;
        slot.assign(id)?;
        bridge.write_id(ctx, object, id)?;
        let pair = registry.put(
            id,
            native.clone(),
            RootedHandle::root(ctx, object.clone().into_value()),
            self.descriptor.clone(),
        )?;
        Ok((id, pair))
    }

    fn construct<'js>(&self, bridge: &Rc<Bridge>, args: Vec<JsValue<'js>>) -> BridgeResult<NativeRef> {
        match self.descriptor.constructor() {
            ConstructorStrategy::Explicit { params, construct } => {
                let mut args = args.into_iter();
                let mut values = Vec::with_capacity(params.len());
                for (index, kind) in params.iter().enumerate() {
                    let value = match args.next() {
                        Some(arg) => codec::deserialize(bridge, kind, arg).map_err(|e| {
                            BridgeError::InvalidType(format!("constructor argument {index}: {e}"))
                        })?,
                        None => Value::Null,
                    };
                    values.push(value);
                }
                construct(CallArgs::new(values))
            }
            ConstructorStrategy::RuntimeContext(construct) => construct(bridge),
            ConstructorStrategy::ZeroArgument(construct) => construct(),
        }
    }

    /// Evaluate the type's constructor expression and return the native peer
    /// of the resulting script object.
    pub fn instantiate_from_native(&self, bridge: &Rc<Bridge>, args: &[Value]) -> BridgeResult<NativeRef> {
        bridge
            .enter(|ctx| self.construct_in_script(bridge, ctx, args))
            .map_err(|e| BridgeError::creation(self.type_name(), e))
    }

    fn construct_in_script<'js>(
        &self,
        bridge: &Bridge,
        ctx: &Ctx<'js>,
        args: &[Value],
    ) -> BridgeResult<NativeRef> {
        let expression = self.descriptor.script_constructor();
        let constructor: Function = ctx
            .eval(format!("(function (args) {{ return ({expression}); }})"))
            .caught(ctx)?;

        let script_args = Array::new(ctx.clone()).caught(ctx)?;
        for (index, arg) in args.iter().enumerate() {
            let value = codec::serialize(bridge, ctx, &ValueKind::Any, arg)?;
            script_args.set(index, value).caught(ctx)?;
        }

        let result: JsValue = constructor.call((script_args,)).caught(ctx)?;
        if result.is_undefined() {
            return Err(BridgeError::InvalidType(format!(
                "constructor expression `{expression}` evaluated to undefined"
            )));
        }
        let object = result.into_object().ok_or_else(|| {
            BridgeError::InvalidType(format!(
                "constructor expression `{expression}` did not produce an object"
            ))
        })?;
        let id = codec::read_id(&object)?.ok_or_else(|| {
            BridgeError::NoIdFound(format!("constructed object carries no '{ID_KEY}'"))
        })?;
        bridge.registry().native_of(id)
    }
}

impl ClassFactory for BindingFactory {
    fn module_path(&self) -> &str {
        self.descriptor.module_path()
    }

    fn init_class<'js>(&self, bridge: &Rc<Bridge>, ctx: &Ctx<'js>, target: Object<'js>) -> BridgeResult<()> {
        self.install_on_prototype(bridge, ctx, &target)
    }

    fn init_object<'js>(
        &self,
        bridge: &Rc<Bridge>,
        ctx: &Ctx<'js>,
        object: Object<'js>,
        args: Vec<JsValue<'js>>,
    ) -> BridgeResult<u64> {
        self.instantiate_from_script(bridge, ctx, object, args)
    }

    fn create_object(&self, bridge: &Rc<Bridge>, args: &[Value]) -> BridgeResult<NativeRef> {
        self.instantiate_from_native(bridge, args)
    }

    fn descriptor(&self) -> Option<&Rc<TypeDescriptor>> {
        Some(&self.descriptor)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Trampolines
// ─────────────────────────────────────────────────────────────────────────────

fn trampoline<'js>(
    ctx: &Ctx<'js>,
    bridge: Weak<Bridge>,
    function: FunctionDescriptor,
) -> BridgeResult<Function<'js>> {
    Function::new(
        ctx.clone(),
        move |ctx: Ctx<'js>, this: This<Object<'js>>, args: Rest<JsValue<'js>>| -> rquickjs::Result<JsValue<'js>> {
            invoke(&bridge, &function, &ctx, this.0, args.0).map_err(|e| throw(&ctx, &e))
        },
    )
    .caught(ctx)
}

fn invoke<'js>(
    bridge: &Weak<Bridge>,
    function: &FunctionDescriptor,
    ctx: &Ctx<'js>,
    receiver: Object<'js>,
    args: Vec<JsValue<'js>>,
) -> BridgeResult<JsValue<'js>> {
    let bridge = bridge.upgrade().ok_or(BridgeError::Closed)?;
    let id = codec::read_id(&receiver)?.ok_or_else(|| {
        BridgeError::NoIdFound(format!("receiver of '{}' carries no '{ID_KEY}'", function.name()))
    })?;
    let native = bridge.registry().native_of(id)?;
    if native.type_key() != function.declaring_type() {
        return Err(BridgeError::InvalidType(format!(
            "'{}' is declared on {}, not {}",
            function.name(),
            function.declaring_type().short_name(),
            native.type_key().short_name()
        )));
    }

    match function.invoker() {
        Invoker::Raw(raw) => raw.call(
            native.as_any(),
            RawCall {
                ctx: ctx.clone(),
                receiver,
                args,
            },
        ),
        Invoker::Typed(typed) => {
            let mut args = args.into_iter();
            let mut values = Vec::with_capacity(function.params().len());
            for (index, param) in function.params().iter().enumerate() {
                let ParamKind::Value(kind) = param else {
                    return Err(BridgeError::InvalidType(format!(
                        "'{}' mixes raw and typed parameters",
                        function.name()
                    )));
                };
                let arg = args.next().unwrap_or_else(|| JsValue::new_undefined(ctx.clone()));
                let value = codec::deserialize(&bridge, kind, arg).map_err(|e| {
                    BridgeError::InvalidType(format!(
                        "argument {index} of '{}': {e}",
                        function.name()
                    ))
                })?;
                values.push(value);
            }
            let result = typed(native.as_any(), CallArgs::new(values))?;
            codec::serialize(&bridge, ctx, &ValueKind::Any, &result)
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

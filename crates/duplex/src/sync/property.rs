//! Scalar property channel.

use std::cell::Cell;
use std::rc::{Rc, Weak};

use rquickjs::{Ctx, Function, Object, Value as JsValue};
use tracing::{debug, warn};

use duplex_types::{ListenerId, NativeRef, ObservableValue, Value, ValueKind};

use super::Propagation;
use crate::bridge::Bridge;
use crate::codec;
use crate::descriptor::PropertyAccess;
use crate::error::{BridgeError, BridgeResult};
use crate::interop::{call_method, throw, Caught};
use crate::registry::RootedHandle;

/// Native side of a property channel
pub(crate) enum PropertySource {
    /// A property field of a bound native object
    Field {
        target: NativeRef,
        access: Rc<dyn PropertyAccess>,
    },
    /// A free-standing property owned by the host
    Standalone(Rc<dyn ObservableValue>),
}

impl PropertySource {
    fn with<R>(&self, f: impl FnOnce(&dyn ObservableValue) -> R) -> BridgeResult<R> {
        match self {
            PropertySource::Field { target, access } => access
                .observable(target.as_any())
                .map(f)
                .ok_or_else(|| {
                    BridgeError::InvalidType(format!(
                        "{} has no such property",
                        target.type_key().short_name()
                    ))
                }),
            PropertySource::Standalone(property) => Ok(f(property.as_ref())),
        }
    }
}

/// Two-way channel between one native property and one script `Binding`
pub struct PropertyChannel {
    name: String,
    kind: ValueKind,
    source: PropertySource,
    binding: RootedHandle,
    guard: Cell<bool>,
    detached: Cell<bool>,
    native_listener: Cell<Option<ListenerId>>,
    bridge: Weak<Bridge>,
}

impl PropertyChannel {
    /// Push the native value into `binding` and start listening on both sides
    pub(crate) fn bind<'js>(
        bridge: &Rc<Bridge>,
        ctx: &Ctx<'js>,
        name: &str,
        kind: ValueKind,
        source: PropertySource,
        binding: Object<'js>,
    ) -> BridgeResult<Rc<Self>> {
        let channel = Rc::new(Self {
            name: name.to_string(),
            kind,
            source,
            binding: RootedHandle::root(ctx, binding.clone().into_value()),
            guard: Cell::new(false),
            detached: Cell::new(false),
            native_listener: Cell::new(None),
            bridge: Rc::downgrade(bridge),
        });

        let current = channel.source.with(|property| property.value())?;
        channel.write_script(bridge, ctx, &current)?;

        let weak = Rc::downgrade(&channel);
        let listener = Function::new(
            ctx.clone(),
            move |ctx: Ctx<'js>, _old: JsValue<'js>, new: JsValue<'js>| -> rquickjs::Result<()> {
                match weak.upgrade() {
                    Some(channel) => channel.on_script_change(&ctx, new),
                    None => Ok(()),
                }
            },
        )
        .caught(ctx)?;
        call_method::<()>(ctx, &binding, "addListener", vec![listener.into_value()])?;

        let weak = Rc::downgrade(&channel);
        let validator = Function::new(
            ctx.clone(),
            move |ctx: Ctx<'js>, value: JsValue<'js>| -> rquickjs::Result<()> {
                match weak.upgrade() {
                    Some(channel) => channel.validate(&ctx, value),
                    None => Ok(()),
                }
            },
        )
        .caught(ctx)?;
        call_method::<()>(ctx, &binding, "setValidator", vec![validator.into_value()])?;

        let weak = Rc::downgrade(&channel);
        let id = channel.source.with(|property| {
            property.subscribe(Rc::new(move |value: &Value| {
                if let Some(channel) = weak.upgrade() {
                    channel.on_native_change(value);
                }
            }))
        })?;
        channel.native_listener.set(Some(id));

        debug!(target: "duplex.sync", property = name, "property channel bound");
        Ok(channel)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    /// True only while a propagation step is running
    pub fn is_propagating(&self) -> bool {
        self.guard.get()
    }

    pub fn is_detached(&self) -> bool {
        self.detached.get()
    }

    /// Serialize the current native value into the script binding
    pub fn push_to_script(&self) -> BridgeResult<()> {
        let bridge = self.bridge.upgrade().ok_or(BridgeError::Closed)?;
        let current = self.source.with(|property| property.value())?;
        let _step = Propagation::begin(&self.guard);
        bridge.enter(|ctx| self.write_script(&bridge, ctx, &current))
    }

    fn write_script<'js>(&self, bridge: &Bridge, ctx: &Ctx<'js>, value: &Value) -> BridgeResult<()> {
        let binding = self.binding.restore_object(ctx)?;
        let script_value = codec::serialize(bridge, ctx, &self.kind, value)?;
        call_method::<()>(ctx, &binding, "setValue", vec![script_value])
    }

    fn on_native_change(&self, value: &Value) {
        if self.detached.get() {
            return;
        }
        if self.guard.get() {
            self.guard.set(false);
            return;
        }
        let Some(bridge) = self.bridge.upgrade() else {
            return;
        };

        let _step = Propagation::begin(&self.guard);
        if let Err(e) = bridge.enter(|ctx| self.write_script(&bridge, ctx, value)) {
            warn!(
                target: "duplex.sync",
                property = %self.name,
                error = %e,
                "failed to push native change to script"
            );
        }
    }

    /// Reject script values the native property cannot hold before the
    /// binding stores them.
    fn validate<'js>(&self, ctx: &Ctx<'js>, value: JsValue<'js>) -> rquickjs::Result<()> {
        if self.detached.get() || self.guard.get() {
            return Ok(());
        }
        let Some(bridge) = self.bridge.upgrade() else {
            return Ok(());
        };
        match codec::deserialize(&bridge, &self.kind, value) {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(
                    target: "duplex.sync",
                    property = %self.name,
                    error = %e,
                    "rejected script value"
                );
                let e = match e {
                    BridgeError::InvalidType(_) => e,
                    other => BridgeError::InvalidType(other.to_string()),
                };
                Err(throw(ctx, &e))
            }
        }
    }

    fn on_script_change<'js>(&self, ctx: &Ctx<'js>, value: JsValue<'js>) -> rquickjs::Result<()> {
        if self.detached.get() {
            return Ok(());
        }
        if self.guard.get() {
            self.guard.set(false);
            return Ok(());
        }
        let Some(bridge) = self.bridge.upgrade() else {
            return Ok(());
        };

        let _step = Propagation::begin(&self.guard);
        let result = codec::deserialize(&bridge, &self.kind, value).and_then(|native| {
            self.source
                .with(|property| property.set_value(native))?
                .map_err(BridgeError::from)
        });
        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(
                    target: "duplex.sync",
                    property = %self.name,
                    error = %e,
                    "rejected script value, restoring native value"
                );
                let restored = self
                    .source
                    .with(|property| property.value())
                    .and_then(|current| self.write_script(&bridge, ctx, &current));
                if let Err(reset) = restored {
                    warn!(
                        target: "duplex.sync",
                        property = %self.name,
                        error = %reset,
                        "failed to restore script binding"
                    );
                }
                let e = match e {
                    BridgeError::InvalidType(_) => e,
                    other => BridgeError::InvalidType(other.to_string()),
                };
                Err(throw(ctx, &e))
            }
        }
    }

    pub(crate) fn detach(&self) -> bool {
        if self.detached.replace(true) {
            return false;
        }
        if let Some(id) = self.native_listener.take() {
            let _ = self.source.with(|property| property.unsubscribe(id));
        }
        self.binding.release()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

//! Property/Collection Synchronizer
//!
//! Every bound property or list gets one channel that keeps the native value
//! and its script binding equal. Channels run independently of each other;
//! a failing channel heals itself without touching the rest of the object.

mod collection;
mod property;

use std::cell::Cell;
use std::rc::Rc;

use rquickjs::{Ctx, Function, Object, Value as JsValue};

use duplex_types::NativeRef;

pub use collection::CollectionChannel;
pub use property::PropertyChannel;

pub(crate) use collection::CollectionSource;
pub(crate) use property::PropertySource;

use crate::bridge::Bridge;
use crate::descriptor::{BindingAccess, BindingDescriptor, TypeDescriptor};
use crate::error::{BridgeError, BridgeResult};
use crate::interop::Caught;

/// Module providing the script-side binding classes
pub const BINDING_MODULE: &str = "binding";

#[derive(Clone)]
pub enum Channel {
    Property(Rc<PropertyChannel>),
    Collection(Rc<CollectionChannel>),
}

impl Channel {
    pub fn name(&self) -> &str {
        match self {
            Channel::Property(channel) => channel.name(),
            Channel::Collection(channel) => channel.name(),
        }
    }

    /// Stop propagating and release the script binding.
    /// Returns false if the channel was already detached.
    pub fn detach(&self) -> bool {
        match self {
            Channel::Property(channel) => channel.detach(),
            Channel::Collection(channel) => channel.detach(),
        }
    }

    pub fn as_property(&self) -> Option<&Rc<PropertyChannel>> {
        match self {
            Channel::Property(channel) => Some(channel),
            Channel::Collection(_) => None,
        }
    }

    pub fn as_collection(&self) -> Option<&Rc<CollectionChannel>> {
        match self {
            Channel::Collection(channel) => Some(channel),
            Channel::Property(_) => None,
        }
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Property(channel) => write!(f, "Channel::Property({})", channel.name()),
            Channel::Collection(channel) => write!(f, "Channel::Collection({})", channel.name()),
        }
    }
}

/// Marks one propagation step in progress. The flag is cleared on drop, so
/// it never outlives the step, whether the step succeeds or fails.
pub(crate) struct Propagation<'a> {
    flag: &'a Cell<bool>,
}

impl<'a> Propagation<'a> {
    pub(crate) fn begin(flag: &'a Cell<bool>) -> Self {
        flag.set(true);
        Self { flag }
    }
}

impl Drop for Propagation<'_> {
    fn drop(&mut self) {
        self.flag.set(false);
    }
}

/// Create a script binding object through the binding module
pub(crate) fn create_binding<'js>(
    bridge: &Bridge,
    ctx: &Ctx<'js>,
    collection: bool,
) -> BridgeResult<Object<'js>> {
    let module = bridge
        .require(ctx, BINDING_MODULE)?
        .into_object()
        .ok_or_else(|| BridgeError::InvalidType(format!("module '{BINDING_MODULE}' is not an object")))?;
    let factory = if collection { "createArrayBinding" } else { "createBinding" };
    let create: Function = module.get(factory).caught(ctx)?;
    let binding: Object = create
        .call((JsValue::new_null(ctx.clone()),))
        .caught(ctx)?;
    Ok(binding)
}

/// Wire every binding `descriptor` declares between `native` and `object`.
/// On failure the channels built so far are detached again.
pub(crate) fn wire<'js>(
    bridge: &Rc<Bridge>,
    ctx: &Ctx<'js>,
    native: &NativeRef,
    descriptor: &TypeDescriptor,
    object: &Object<'js>,
) -> BridgeResult<Vec<Channel>> {
    let mut channels = Vec::with_capacity(descriptor.bindings().len());
    for binding in descriptor.bindings() {
        match wire_one(bridge, ctx, native, binding, object) {
            Ok(channel) => channels.push(channel),
            Err(e) => {
                for channel in &channels {
                    channel.detach();
                }
                return Err(e);
            }
        }
    }
    Ok(channels)
}

fn wire_one<'js>(
    bridge: &Rc<Bridge>,
    ctx: &Ctx<'js>,
    native: &NativeRef,
    binding: &BindingDescriptor,
    object: &Object<'js>,
) -> BridgeResult<Channel> {
    let script_binding = create_binding(bridge, ctx, binding.is_collection())?;
    object.set(binding.name(), script_binding.clone()).caught(ctx)?;

    Ok(match binding.access() {
        BindingAccess::Property(access) => Channel::Property(PropertyChannel::bind(
            bridge,
            ctx,
            binding.name(),
            binding.kind(),
            PropertySource::Field {
                target: native.clone(),
                access: access.clone(),
            },
            script_binding,
        )?),
        BindingAccess::Collection(access) => Channel::Collection(CollectionChannel::bind(
            bridge,
            ctx,
            binding.name(),
            binding.kind(),
            CollectionSource::Field {
                target: native.clone(),
                access: access.clone(),
            },
            script_binding,
        )?),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, Node};

    #[test]
    fn test_propagation_clears_on_drop() {
        let flag = Cell::new(false);
        {
            let _step = Propagation::begin(&flag);
            assert!(flag.get());
        }
        assert!(!flag.get());
    }

    #[test]
    fn test_propagation_clears_on_error_path() {
        fn failing(flag: &Cell<bool>) -> Result<(), &'static str> {
            let _step = Propagation::begin(flag);
            Err("boom")
        }
        let flag = Cell::new(false);
        assert!(failing(&flag).is_err());
        assert!(!flag.get());
    }

    #[test]
    fn test_wire_attaches_every_binding() {
        let engine = testing::engine();
        let node = engine.create::<Node>(&[]).unwrap();
        let pair = engine.bridge().registry().pair(node.id.get().unwrap()).unwrap();

        let names: Vec<String> = pair.channels().iter().map(|c| c.name().to_string()).collect();
        assert_eq!(names, vec!["title", "count", "link", "tags"]);
        assert!(pair.channel("tags").unwrap().as_collection().is_some());
        assert!(pair.channel("title").unwrap().as_property().is_some());
    }

    #[test]
    fn test_detach_once() {
        let engine = testing::engine();
        let node = engine.create::<Node>(&[]).unwrap();
        let pair = engine.bridge().registry().pair(node.id.get().unwrap()).unwrap();
        let channel = pair.channel("title").unwrap();
        assert!(channel.detach());
        assert!(!channel.detach());

        node.title.set("after detach".to_string());
        let script_title: String = testing::eval_on(&engine, node.id.get().unwrap(), "obj.title.value");
        assert_ne!(script_title, "after detach");
    }
}

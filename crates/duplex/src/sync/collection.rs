//! Ordered collection channel.
//!
//! Changes travel as ranges instead of whole lists. Whenever a change cannot
//! be mirrored the script array is reset from the native list, which is the
//! source of truth.

use std::cell::Cell;
use std::rc::{Rc, Weak};

use rquickjs::{Array, Ctx, Function, Object, Value as JsValue};
use tracing::{debug, error, warn};

use duplex_types::{ChangeKind, ListChange, ListenerId, NativeRef, ObservableCollection, Value, ValueKind};

use super::Propagation;
use crate::bridge::Bridge;
use crate::codec;
use crate::descriptor::CollectionAccess;
use crate::error::{BridgeError, BridgeResult};
use crate::interop::{call_method, index_value, read_index, Caught};
use crate::registry::RootedHandle;

/// Native side of a collection channel
pub(crate) enum CollectionSource {
    Field {
        target: NativeRef,
        access: Rc<dyn CollectionAccess>,
    },
    Standalone(Rc<dyn ObservableCollection>),
}

impl CollectionSource {
    fn with<R>(&self, f: impl FnOnce(&dyn ObservableCollection) -> R) -> BridgeResult<R> {
        match self {
            CollectionSource::Field { target, access } => access
                .collection(target.as_any())
                .map(f)
                .ok_or_else(|| {
                    BridgeError::InvalidType(format!(
                        "{} has no such list",
                        target.type_key().short_name()
                    ))
                }),
            CollectionSource::Standalone(list) => Ok(f(list.as_ref())),
        }
    }
}

/// A change record read from the script side
#[derive(Debug, Clone, PartialEq)]
struct ScriptChange {
    kind: String,
    from: usize,
    to: usize,
}

/// Two-way channel between one native list and one script `ArrayBinding`
pub struct CollectionChannel {
    name: String,
    kind: ValueKind,
    source: CollectionSource,
    array: RootedHandle,
    applying: Cell<bool>,
    // Native changes seen while a script change was being applied
    native_moved: Cell<bool>,
    detached: Cell<bool>,
    resets: Cell<u64>,
    native_listener: Cell<Option<ListenerId>>,
    bridge: Weak<Bridge>,
}

impl CollectionChannel {
    /// Reset `array` to the native list and start listening on both sides
    pub(crate) fn bind<'js>(
        bridge: &Rc<Bridge>,
        ctx: &Ctx<'js>,
        name: &str,
        kind: ValueKind,
        source: CollectionSource,
        array: Object<'js>,
    ) -> BridgeResult<Rc<Self>> {
        let channel = Rc::new(Self {
            name: name.to_string(),
            kind,
            source,
            array: RootedHandle::root(ctx, array.clone().into_value()),
            applying: Cell::new(false),
            native_moved: Cell::new(false),
            detached: Cell::new(false),
            resets: Cell::new(0),
            native_listener: Cell::new(None),
            bridge: Rc::downgrade(bridge),
        });

        channel.reset_script(bridge, ctx)?;

        let weak = Rc::downgrade(&channel);
        let listener = Function::new(
            ctx.clone(),
            move |ctx: Ctx<'js>,
                  _old: JsValue<'js>,
                  new: Array<'js>,
                  changes: Array<'js>|
                  -> rquickjs::Result<()> {
                if let Some(channel) = weak.upgrade() {
                    channel.on_script_change(&ctx, new, changes);
                }
                Ok(())
            },
        )
        .caught(ctx)?;
        call_method::<()>(ctx, &array, "addListener", vec![listener.into_value()])?;

        let weak = Rc::downgrade(&channel);
        let id = channel.source.with(|list| {
            list.subscribe(Rc::new(move |change: &ListChange| {
                if let Some(channel) = weak.upgrade() {
                    channel.on_native_change(change);
                }
            }))
        })?;
        channel.native_listener.set(Some(id));

        debug!(target: "duplex.sync", list = name, "collection channel bound");
        Ok(channel)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Kind of every element
    pub fn element_kind(&self) -> ValueKind {
        self.kind
    }

    /// Number of full resets performed, including the initial one
    pub fn resets(&self) -> u64 {
        self.resets.get()
    }

    pub fn is_propagating(&self) -> bool {
        self.applying.get()
    }

    pub fn is_detached(&self) -> bool {
        self.detached.get()
    }

    /// Replace the script array with the serialized native list
    pub fn reset(&self) -> BridgeResult<()> {
        let bridge = self.bridge.upgrade().ok_or(BridgeError::Closed)?;
        bridge.enter(|ctx| self.reset_script(&bridge, ctx))
    }

    fn reset_script<'js>(&self, bridge: &Bridge, ctx: &Ctx<'js>) -> BridgeResult<()> {
        let array = self.array.restore_object(ctx)?;
        let values = self.source.with(|list| list.values())?;
        let items = Array::new(ctx.clone()).caught(ctx)?;
        for (index, value) in values.iter().enumerate() {
            items
                .set(index, codec::serialize(bridge, ctx, &self.kind, value)?)
                .caught(ctx)?;
        }

        let _step = Propagation::begin(&self.applying);
        call_method::<()>(ctx, &array, "setAll", vec![items.into_value()])?;
        self.resets.set(self.resets.get() + 1);
        debug!(target: "duplex.sync", list = %self.name, len = values.len(), "script array reset");
        Ok(())
    }

    fn serialize_range<'js>(
        &self,
        bridge: &Bridge,
        ctx: &Ctx<'js>,
        from: usize,
        to: usize,
    ) -> BridgeResult<Vec<JsValue<'js>>> {
        let values = self.source.with(|list| list.values_in(from, to))??;
        values
            .iter()
            .map(|value| codec::serialize(bridge, ctx, &self.kind, value))
            .collect()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Native to script
    // ─────────────────────────────────────────────────────────────────────────

    fn on_native_change(&self, change: &ListChange) {
        if self.detached.get() {
            return;
        }
        if self.applying.get() {
            self.native_moved.set(true);
            return;
        }
        let Some(bridge) = self.bridge.upgrade() else {
            return;
        };

        bridge.enter(|ctx| {
            let applied = {
                let _step = Propagation::begin(&self.applying);
                self.apply_native(&bridge, ctx, change)
            };
            if let Err(e) = applied {
                if change.kind == ChangeKind::Permuted {
                    error!(
                        target: "duplex.sync",
                        list = %self.name,
                        error = %e,
                        "list permutations cannot be mirrored, resetting"
                    );
                } else {
                    warn!(
                        target: "duplex.sync",
                        list = %self.name,
                        error = %e,
                        "failed to mirror native change, resetting"
                    );
                }
                if let Err(e) = self.reset_script(&bridge, ctx) {
                    error!(target: "duplex.sync", list = %self.name, error = %e, "reset failed");
                }
            }
        });
    }

    fn apply_native<'js>(&self, bridge: &Bridge, ctx: &Ctx<'js>, change: &ListChange) -> BridgeResult<()> {
        let array = self.array.restore_object(ctx)?;
        match change.kind {
            ChangeKind::Added => {
                let mut args = vec![index_value(ctx, change.from)?, index_value(ctx, 0)?];
                args.extend(self.serialize_range(bridge, ctx, change.from, change.to)?);
                call_method::<()>(ctx, &array, "splice", args)
            }
            ChangeKind::Removed => {
                let args = vec![index_value(ctx, change.from)?, index_value(ctx, change.len())?];
                call_method::<()>(ctx, &array, "splice", args)
            }
            ChangeKind::Updated => {
                let items = Array::new(ctx.clone()).caught(ctx)?;
                for (offset, item) in self
                    .serialize_range(bridge, ctx, change.from, change.to)?
                    .into_iter()
                    .enumerate()
                {
                    items.set(offset, item).caught(ctx)?;
                }
                let args = vec![index_value(ctx, change.from)?, items.into_value()];
                call_method::<()>(ctx, &array, "setRange", args)
            }
            ChangeKind::Permuted => Err(BridgeError::Unsupported(format!(
                "permutation of '{}' cannot be mirrored",
                self.name
            ))),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Script to native
    // ─────────────────────────────────────────────────────────────────────────

    fn on_script_change<'js>(&self, ctx: &Ctx<'js>, new: Array<'js>, changes: Array<'js>) {
        if self.detached.get() || self.applying.get() {
            return;
        }
        let Some(bridge) = self.bridge.upgrade() else {
            return;
        };

        self.native_moved.set(false);
        let applied = {
            let _step = Propagation::begin(&self.applying);
            self.apply_script_changes(&bridge, ctx, &new, &changes)
        };
        let applied = match applied {
            // Listeners on the native list may have edited it again while the
            // change was applied; those edits were swallowed with the echo.
            Ok(()) if self.native_moved.take() => match self.matches_native(&bridge, ctx) {
                Ok(true) => Ok(()),
                Ok(false) => {
                    debug!(
                        target: "duplex.sync",
                        list = %self.name,
                        "native list moved during script change, resetting"
                    );
                    self.reset_script(&bridge, ctx)
                }
                Err(e) => Err(e),
            },
            other => other,
        };
        if let Err(e) = applied {
            warn!(
                target: "duplex.sync",
                list = %self.name,
                error = %e,
                "failed to apply script change, resetting"
            );
            if let Err(e) = self.reset_script(&bridge, ctx) {
                error!(target: "duplex.sync", list = %self.name, error = %e, "reset failed");
            }
        }
    }

    fn apply_script_changes<'js>(
        &self,
        bridge: &Bridge,
        ctx: &Ctx<'js>,
        new: &Array<'js>,
        changes: &Array<'js>,
    ) -> BridgeResult<()> {
        for index in 0..changes.len() {
            let record: Object = changes.get(index).caught(ctx)?;
            let change = ScriptChange {
                kind: record.get("type").caught(ctx)?,
                from: read_index(record.get("from").caught(ctx)?)?,
                to: read_index(record.get("to").caught(ctx)?)?,
            };
            self.apply_script(bridge, ctx, new, &change)?;
        }
        Ok(())
    }

    fn apply_script<'js>(
        &self,
        bridge: &Bridge,
        ctx: &Ctx<'js>,
        new: &Array<'js>,
        change: &ScriptChange,
    ) -> BridgeResult<()> {
        match change.kind.as_str() {
            "add" => {
                let values = self.read_range(bridge, ctx, new, change.from, change.to)?;
                self.source.with(|list| list.insert_values(change.from, values))??;
            }
            "remove" => {
                self.source.with(|list| list.remove_values(change.from, change.to))??;
            }
            "update" => {
                let values = self.read_range(bridge, ctx, new, change.from, change.to)?;
                self.source.with(|list| list.update_values(change.from, values))??;
            }
            "reset" => {
                let values = self.read_range(bridge, ctx, new, 0, new.len())?;
                self.source.with(|list| list.replace_values(values))??;
            }
            other => {
                return Err(BridgeError::Unsupported(format!(
                    "'{other}' changes cannot be applied to a native list"
                )));
            }
        }
        Ok(())
    }

    /// Whether the script array holds exactly the native elements
    fn matches_native<'js>(&self, bridge: &Bridge, ctx: &Ctx<'js>) -> BridgeResult<bool> {
        let array = self.array.restore_object(ctx)?;
        let items: Array = call_method(ctx, &array, "toArray", Vec::new())?;
        let native = self.source.with(|list| list.values())?;
        if items.len() != native.len() {
            return Ok(false);
        }
        Ok(self.read_range(bridge, ctx, &items, 0, items.len())? == native)
    }

    fn read_range<'js>(
        &self,
        bridge: &Bridge,
        ctx: &Ctx<'js>,
        new: &Array<'js>,
        from: usize,
        to: usize,
    ) -> BridgeResult<Vec<Value>> {
        if from > to || to > new.len() {
            return Err(BridgeError::InvalidType(format!(
                "change range {from}..{to} exceeds array length {}",
                new.len()
            )));
        }
        (from..to)
            .map(|index| {
                let item: JsValue = new.get(index).caught(ctx)?;
                codec::deserialize(bridge, &self.kind, item)
            })
            .collect()
    }

    pub(crate) fn detach(&self) -> bool {
        if self.detached.replace(true) {
            return false;
        }
        if let Some(id) = self.native_listener.take() {
            let _ = self.source.with(|list| list.unsubscribe(id));
        }
        self.array.release()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use duplex_types::ObservableList;

    use crate::testing::{self, eval_on, Node};

    fn tags_channel(engine: &crate::ScriptEngine, node: &Node) -> Rc<super::CollectionChannel> {
        let pair = engine.bridge().registry().pair(node.id.get().unwrap()).unwrap();
        pair.channel("tags").unwrap().as_collection().unwrap().clone()
    }

    fn script_tags(engine: &crate::ScriptEngine, node: &Node) -> String {
        eval_on(engine, node.id.get().unwrap(), "JSON.stringify(obj.tags.toArray())")
    }

    fn tagged(engine: &crate::ScriptEngine, tags: &[&str]) -> Rc<Node> {
        let node = engine.create::<Node>(&[]).unwrap();
        node.tags
            .replace_all(tags.iter().map(|t| t.to_string()).collect());
        node
    }

    #[test]
    fn test_setup_resets_script_array() {
        let engine = testing::engine();
        let node = tagged(&engine, &["a", "b"]);
        assert_eq!(script_tags(&engine, &node), r#"["a","b"]"#);
        assert!(tags_channel(&engine, &node).resets() >= 1);
    }

    #[test]
    fn test_script_removal_reaches_native() {
        let engine = testing::engine();
        let node = tagged(&engine, &["a", "b", "c"]);

        let _: () = eval_on(&engine, node.id.get().unwrap(), "obj.tags.remove(1)");
        assert_eq!(node.tags.to_vec(), vec!["a", "c"]);
        assert!(!tags_channel(&engine, &node).is_propagating());
    }

    #[test]
    fn test_native_append_reaches_script() {
        let engine = testing::engine();
        let node = tagged(&engine, &["a", "b", "c"]);

        node.tags.push("d".to_string());
        let length: i32 = eval_on(&engine, node.id.get().unwrap(), "obj.tags.length");
        let last: String = eval_on(&engine, node.id.get().unwrap(), "obj.tags.get(3)");
        assert_eq!(length, 4);
        assert_eq!(last, "d");
    }

    #[test]
    fn test_native_edits_mirror_in_place() {
        let engine = testing::engine();
        let node = tagged(&engine, &["a", "b", "c", "d"]);
        let resets = tags_channel(&engine, &node).resets();

        node.tags.remove_range(1, 3).unwrap();
        assert_eq!(script_tags(&engine, &node), r#"["a","d"]"#);
        node.tags.insert(1, "x".to_string()).unwrap();
        node.tags.set(0, "z".to_string()).unwrap();
        assert_eq!(script_tags(&engine, &node), r#"["z","x","d"]"#);
        assert_eq!(tags_channel(&engine, &node).resets(), resets);
    }

    #[test]
    fn test_script_splice_and_set() {
        let engine = testing::engine();
        let node = tagged(&engine, &["a", "b", "c"]);
        let id = node.id.get().unwrap();

        let _: () = eval_on(&engine, id, "obj.tags.splice(1, 1, 'x', 'y')");
        assert_eq!(node.tags.to_vec(), vec!["a", "x", "y", "c"]);
        let _: () = eval_on(&engine, id, "obj.tags.set(0, 'first')");
        assert_eq!(node.tags.to_vec(), vec!["first", "x", "y", "c"]);
        let _: () = eval_on(&engine, id, "obj.tags.setAll(['only'])");
        assert_eq!(node.tags.to_vec(), vec!["only"]);
    }

    #[test]
    fn test_script_push_mirrors_without_reset() {
        let engine = testing::engine();
        let node = tagged(&engine, &["a", "b"]);
        let resets = tags_channel(&engine, &node).resets();

        let _: () = eval_on(&engine, node.id.get().unwrap(), "obj.tags.push('c')");
        assert_eq!(node.tags.to_vec(), vec!["a", "b", "c"]);
        assert_eq!(tags_channel(&engine, &node).resets(), resets);
    }

    #[test]
    fn test_native_listener_editing_after_script_change() {
        let engine = testing::engine();
        let node = tagged(&engine, &["a", "b"]);

        let weak = Rc::downgrade(&node);
        node.tags.add_listener(move |_| {
            if let Some(node) = weak.upgrade() {
                if node.tags.len() > 2 {
                    node.tags.remove(0).unwrap();
                }
            }
        });

        let _: () = eval_on(&engine, node.id.get().unwrap(), "obj.tags.push('c')");
        assert_eq!(node.tags.to_vec(), vec!["b", "c"]);
        assert_eq!(script_tags(&engine, &node), r#"["b","c"]"#);
        assert!(!tags_channel(&engine, &node).is_propagating());

        // Later edits from either side still travel as ranges
        node.tags.push("d".to_string());
        let _: () = eval_on(&engine, node.id.get().unwrap(), "obj.tags.set(0, 'z')");
        assert_eq!(node.tags.to_vec(), vec!["z", "d"]);
        assert_eq!(script_tags(&engine, &node), r#"["z","d"]"#);
    }

    #[test]
    fn test_native_permutation_resets() {
        let engine = testing::engine();
        let node = tagged(&engine, &["c", "a", "b"]);
        let resets = tags_channel(&engine, &node).resets();

        node.tags.sort_by(|a, b| a.cmp(b));
        assert_eq!(script_tags(&engine, &node), r#"["a","b","c"]"#);
        assert_eq!(tags_channel(&engine, &node).resets(), resets + 1);
    }

    #[test]
    fn test_script_permutation_rejected() {
        let engine = testing::engine();
        let node = tagged(&engine, &["c", "a", "b"]);

        let _: () = eval_on(&engine, node.id.get().unwrap(), "obj.tags.sort()");
        assert_eq!(node.tags.to_vec(), vec!["c", "a", "b"]);
        assert_eq!(script_tags(&engine, &node), r#"["c","a","b"]"#);
    }

    #[test]
    fn test_bad_element_resets_without_throwing() {
        let engine = testing::engine();
        let node = tagged(&engine, &["a"]);
        let resets = tags_channel(&engine, &node).resets();

        let outcome: String = eval_on(
            &engine,
            node.id.get().unwrap(),
            "(() => { try { obj.tags.push(42); return 'ok'; } catch (e) { return 'threw'; } })()",
        );
        assert_eq!(outcome, "ok");
        assert_eq!(node.tags.to_vec(), vec!["a"]);
        assert_eq!(script_tags(&engine, &node), r#"["a"]"#);
        assert_eq!(tags_channel(&engine, &node).resets(), resets + 1);
        assert!(!tags_channel(&engine, &node).is_propagating());
    }

    #[test]
    fn test_standalone_list() {
        let engine = testing::engine();
        let list = Rc::new(ObservableList::from_vec(vec![1i64, 2]));

        engine
            .with(|ctx| {
                let binding = crate::sync::create_binding(engine.bridge(), ctx, true)?;
                ctx.globals().set("numbers", binding.clone())?;
                engine.bridge().bind_list(ctx, "numbers", list.clone(), binding)
            })
            .unwrap();

        let _: () = engine.eval("numbers.push(3)").unwrap();
        assert_eq!(list.to_vec(), vec![1, 2, 3]);
        list.remove(0).unwrap();
        let json: String = engine.eval("JSON.stringify(numbers.toArray())").unwrap();
        assert_eq!(json, "[2,3]");
    }
}

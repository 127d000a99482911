//! Shared test fixtures: bound types, their script modules and an engine
//! with everything registered.

use std::cell::Cell;
use std::rc::Rc;

use rquickjs::{FromJs, Function};

use duplex_types::{Closeable, NativeRef, ObjectId, ObservableList, Property, TypeKey, Value, ValueKind};

use crate::config::EngineConfig;
use crate::descriptor::{Bound, DescriptorBuilder, TypeDescriptor};
use crate::engine::ScriptEngine;
use crate::error::BridgeResult;

fn class_module(module_path: &str, class: &str) -> String {
    format!(
        "class {class} {{ constructor(...args) {{ _initObj(\"{module_path}\", this, ...args); }} }}\n\
         _initClass(\"{module_path}\", {class});\n\
         return {class};"
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Node
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct Node {
    pub id: ObjectId,
    pub title: Property<String>,
    pub count: Property<i64>,
    pub link: Property<Option<Rc<Node>>>,
    pub tags: ObservableList<String>,
    pub closes: Cell<u32>,
    pub fail_close: Cell<bool>,
}

impl Bound for Node {
    fn describe(builder: DescriptorBuilder<Self>) -> DescriptorBuilder<Self> {
        builder
            .module_path("test.node")
            .id(|node| &node.id)
            .property("title", |node| &node.title)
            .property("count", |node| &node.count)
            .property("link", |node| &node.link)
            .collection("tags", |node| &node.tags)
            .constant("kind", |_| Value::from("node"))
            .function("rename", &[ValueKind::Text], |node, args| {
                node.title.set(args.get(0)?);
                Ok(Value::Null)
            })
            .function("describe", &[], |node, _| {
                Ok(Value::from(format!("{} ({})", node.title.get(), node.count.get())))
            })
            .function("linkTo", &[ValueKind::Object(TypeKey::of::<Node>())], |node, args| {
                let peer: Option<Rc<Node>> = args.get(0)?;
                let linked = peer.is_some();
                node.link.set(peer);
                Ok(Value::Bool(linked))
            })
            .raw_function("self", |_, call| Ok(call.receiver.into_value()))
            .zero_arg_constructor(Node::default)
            .closeable()
    }
}

impl Closeable for Node {
    fn close(&self) -> anyhow::Result<()> {
        self.closes.set(self.closes.get() + 1);
        if self.fail_close.get() {
            anyhow::bail!("node refused to close");
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Point, Canvas, Ghost, Unregistered, Broken
// ─────────────────────────────────────────────────────────────────────────────

/// Built through an explicit two-argument constructor
#[derive(Debug)]
pub struct Point {
    pub id: ObjectId,
    pub x: i64,
    pub y: i64,
}

impl Bound for Point {
    fn describe(builder: DescriptorBuilder<Self>) -> DescriptorBuilder<Self> {
        builder
            .module_path("test.point")
            .id(|point| &point.id)
            .function("sum", &[], |point, _| Ok(Value::Int(point.x + point.y)))
            .constructor(&[ValueKind::Int, ValueKind::Int], |args| {
                Ok(Point {
                    id: ObjectId::new(),
                    x: args.get(0)?,
                    y: args.get(1)?,
                })
            })
    }
}

/// Built through the runtime-context constructor
#[derive(Debug)]
pub struct Canvas {
    pub id: ObjectId,
    pub bridge_was_open: bool,
}

impl Bound for Canvas {
    fn describe(builder: DescriptorBuilder<Self>) -> DescriptorBuilder<Self> {
        builder
            .module_path("test.canvas")
            .id(|canvas| &canvas.id)
            .runtime_constructor(|bridge| {
                Ok(Canvas {
                    id: ObjectId::new(),
                    bridge_was_open: !bridge.is_closed(),
                })
            })
    }
}

/// Its constructor expression produces nothing
#[derive(Debug, Default)]
pub struct Ghost {
    pub id: ObjectId,
}

impl Bound for Ghost {
    fn describe(builder: DescriptorBuilder<Self>) -> DescriptorBuilder<Self> {
        builder
            .module_path("test.ghost")
            .id(|ghost| &ghost.id)
            .zero_arg_constructor(Ghost::default)
            .script_constructor("undefined")
    }
}

/// Never registered with the test engine
#[derive(Debug, Default)]
pub struct Unregistered {
    pub id: ObjectId,
}

impl Bound for Unregistered {
    fn describe(builder: DescriptorBuilder<Self>) -> DescriptorBuilder<Self> {
        builder
            .module_path("test.unregistered")
            .id(|object| &object.id)
            .zero_arg_constructor(Unregistered::default)
    }
}

/// Its constant refers to an object no registry knows, so pairing fails
/// after the native peer is constructed.
#[derive(Debug, Default)]
pub struct Broken {
    pub id: ObjectId,
    pub label: Property<String>,
}

impl Bound for Broken {
    fn describe(builder: DescriptorBuilder<Self>) -> DescriptorBuilder<Self> {
        builder
            .module_path("test.broken")
            .id(|broken| &broken.id)
            .property("label", |broken| &broken.label)
            .constant("peer", |_| Value::Object(NativeRef::new(Rc::new(Unregistered::default()))))
            .zero_arg_constructor(Broken::default)
            .closeable()
    }
}

impl Closeable for Broken {
    fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Register `Broken` and its script module with `engine`
pub fn prepare_broken(engine: &ScriptEngine) -> BridgeResult<()> {
    engine
        .bridge()
        .define_module("test.broken", class_module("test.broken", "Broken"));
    engine.register::<Broken>()?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────────────────────────────────────

/// Define the fixture modules and register the fixture types
pub fn prepare(engine: &ScriptEngine) -> BridgeResult<()> {
    let bridge = engine.bridge();
    bridge.define_module("test.node", class_module("test.node", "Node"));
    bridge.define_module("test.point", class_module("test.point", "Point"));
    bridge.define_module("test.canvas", class_module("test.canvas", "Canvas"));
    engine.register::<Node>()?;
    engine.register::<Point>()?;
    engine.register::<Canvas>()?;
    engine.register::<Ghost>()?;
    Ok(())
}

pub fn engine() -> ScriptEngine {
    let engine = ScriptEngine::new(EngineConfig::in_memory()).unwrap();
    prepare(&engine).unwrap();
    engine
}

pub fn node_descriptor() -> Rc<TypeDescriptor> {
    Rc::new(TypeDescriptor::of::<Node>(None).unwrap())
}

/// Evaluate `expr` with `obj` bound to the script object of `id`
pub fn eval_on<V>(engine: &ScriptEngine, id: u64, expr: &str) -> V
where
    V: for<'js> FromJs<'js>,
{
    engine.with(|ctx| {
        let object = engine.bridge().registry().script_of(ctx, id).unwrap();
        let function: Function = ctx
            .eval(format!("(function (obj) {{ return ({expr}); }})"))
            .unwrap();
        function.call((object,)).unwrap()
    })
}

//! Demo bound type used by the CLI and the default class table.

use duplex_types::{ObjectId, ObservableList, Property, Value, ValueKind};

use crate::descriptor::{Bound, DescriptorBuilder};

pub const GREETER_MODULE: &str = "demo.greeter";

pub(crate) const GREETER_SOURCE: &str = r#"
class Greeter {
    constructor(...args) {
        _initObj("demo.greeter", this, ...args);
    }
}
_initClass("demo.greeter", Greeter);
return Greeter;
"#;

/// Greets people and remembers who it greeted
#[derive(Debug)]
pub struct Greeter {
    pub id: ObjectId,
    pub greeting: Property<String>,
    pub greeted: ObservableList<String>,
}

impl Default for Greeter {
    fn default() -> Self {
        Self {
            id: ObjectId::new(),
            greeting: Property::new("Hello".to_string()),
            greeted: ObservableList::new(),
        }
    }
}

impl Greeter {
    pub fn greet(&self, name: &str) -> String {
        self.greeted.push(name.to_string());
        format!("{}, {name}!", self.greeting.get())
    }
}

impl Bound for Greeter {
    fn describe(builder: DescriptorBuilder<Self>) -> DescriptorBuilder<Self> {
        builder
            .module_path(GREETER_MODULE)
            .id(|greeter| &greeter.id)
            .property("greeting", |greeter| &greeter.greeting)
            .collection("greeted", |greeter| &greeter.greeted)
            .function("greet", &[ValueKind::Text], |greeter, args| {
                let name: String = args.get(0)?;
                Ok(Value::from(greeter.greet(&name)))
            })
            .zero_arg_constructor(Greeter::default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn test_greet_from_script() {
        let engine = testing::engine();
        engine.register::<Greeter>().unwrap();
        let message: String = engine
            .eval(
                "(() => { const Greeter = require('demo.greeter'); const g = new Greeter(); \
                 g.greeting.value = 'Hi'; return g.greet('Ada') + ' ' + g.greeted.length; })()",
            )
            .unwrap();
        assert_eq!(message, "Hi, Ada! 1");
    }

    #[test]
    fn test_greet_from_native() {
        let engine = testing::engine();
        engine.register::<Greeter>().unwrap();
        let greeter = engine.create::<Greeter>(&[]).unwrap();
        greeter.greet("Grace");
        let last: String = testing::eval_on(&engine, greeter.id.get().unwrap(), "obj.greeted.get(0)");
        assert_eq!(last, "Grace");
    }
}

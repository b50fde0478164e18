// Serialization integration tests
//
// Strategy selection across object graphs, inherited property names, and a
// custom writer driven through the Serializer trait.

mod common;

use hopper::{
    Array, ArrayKey, ClassBuilder, Context, Error, ObjectId, PropertyDecl, SerializeMode,
    Serializer, Value,
};

fn ser(ctx: &mut Context, v: &Value) -> String {
    ctx.serialize_to_string(v, SerializeMode::Serialize).unwrap()
}

fn debug_ser(ctx: &mut Context, v: &Value) -> String {
    ctx.serialize_to_string(v, SerializeMode::DebuggerSerialize)
        .unwrap()
}

#[test]
fn test_default_enumeration_with_inherited_and_dynamic() {
    let mut ctx = Context::new();
    let (_, b) = common::define_a_b(&mut ctx);
    let obj = ctx.new_instance(b).unwrap();
    ctx.set_prop(obj, None, "extra", Value::Int(3)).unwrap();

    assert_eq!(
        ser(&mut ctx, &Value::Object(obj)),
        "O:1:\"B\":3:{s:4:\"\0*\0y\";i:2;s:4:\"\0A\0x\";i:1;s:5:\"extra\";i:3;}"
    );
}

#[test]
fn test_siblings_expand_but_cycles_do_not() {
    let mut ctx = Context::new();
    let obj = ctx.new_instance(ctx.std_class()).unwrap();
    ctx.set_prop(obj, None, "p", Value::Int(1)).unwrap();

    let first = ctx.dup(&Value::Object(obj));
    let second = ctx.dup(&Value::Object(obj));
    let pair = Value::Array(Array::list([first, second]));
    let body = "O:8:\"stdClass\":1:{s:1:\"p\";i:1;}";
    assert_eq!(ser(&mut ctx, &pair), format!("a:2:{{i:0;{body}i:1;{body}}}"));
    ctx.release(pair);

    // Two objects pointing at each other stop at the first repeat.
    let other = ctx.new_instance(ctx.std_class()).unwrap();
    let back = ctx.dup(&Value::Object(obj));
    ctx.set_prop(other, None, "back", back).unwrap();
    let fwd = ctx.dup(&Value::Object(other));
    ctx.set_prop(obj, None, "next", fwd).unwrap();
    assert_eq!(
        ser(&mut ctx, &Value::Object(obj)),
        "O:8:\"stdClass\":2:{s:1:\"p\";i:1;s:4:\"next\";O:8:\"stdClass\":1:{s:4:\"back\";N;}}"
    );
}

#[test]
fn test_strategies_mix_inside_one_graph() {
    let mut ctx = Context::new();
    let mut token = ClassBuilder::new("Token");
    token
        .implements("Serializable")
        .add_method("serialize", |_, _, _| Ok(Value::str("xyz")));
    let token = token.register(&mut ctx).unwrap();

    let mut socket = ClassBuilder::new("Socket");
    socket.native(8);
    let socket = socket.register(&mut ctx).unwrap();

    let mut holder = ClassBuilder::new("Holder");
    holder
        .add_property(PropertyDecl::public("token"))
        .add_property(PropertyDecl::public("socket"))
        .add_property(PropertyDecl::public("skipped").with_default(1))
        .add_method("__sleep", |_, _, _| {
            Ok(Value::Array(Array::list([Value::str("token"), Value::str("socket")])))
        });
    let holder = holder.register(&mut ctx).unwrap();

    let h = ctx.new_instance(holder).unwrap();
    let t = ctx.new_instance(token).unwrap();
    let s = ctx.new_instance(socket).unwrap();
    ctx.set_prop(h, None, "token", Value::Object(t)).unwrap();
    ctx.set_prop(h, None, "socket", Value::Object(s)).unwrap();

    assert_eq!(
        ser(&mut ctx, &Value::Object(h)),
        "O:6:\"Holder\":2:{s:5:\"token\";C:5:\"Token\":3:{xyz}\
         s:6:\"socket\";O:26:\"__PHP_Unserializable_Class\":1:\
         {s:31:\"__PHP_Unserializable_Class_Name\";s:6:\"Socket\";}}"
    );
    assert_eq!(
        debug_ser(&mut ctx, &Value::Object(h)),
        "O:6:\"Holder\":2:{s:5:\"token\";C:5:\"Token\":3:{xyz}s:6:\"socket\";s:6:\"Socket\";}"
    );
    assert!(ctx.diagnostics().is_empty());
}

#[test]
fn test_serialize_fault_propagates_in_strict_mode_only() {
    let mut ctx = Context::new();
    let mut b = ClassBuilder::new("Fragile");
    b.implements("Serializable")
        .add_method("serialize", |_, _, _| Err(Error::exception("RuntimeException", "nope")));
    let class = b.register(&mut ctx).unwrap();
    let obj = ctx.new_instance(class).unwrap();
    let list = Value::Array(Array::list([Value::Int(1), Value::Object(obj)]));

    let err = ctx
        .serialize_to_string(&list, SerializeMode::Serialize)
        .unwrap_err();
    assert_eq!(err, Error::exception("RuntimeException", "nope"));
    assert!(ctx.diagnostics().is_empty());

    assert_eq!(debug_ser(&mut ctx, &list), "a:2:{i:0;i:1;i:1;N;}");
    let diags = ctx.take_diagnostics();
    assert_eq!(diags.len(), 1);
    assert_eq!(diags[0].message, "Fragile::serialize() throws exception");
}

#[test]
fn test_sleep_resolves_names_from_the_object_class() {
    let mut ctx = Context::new();
    let mut base = ClassBuilder::new("Base");
    base.add_property(PropertyDecl::private("secret").with_default("s"))
        .add_property(PropertyDecl::protected("shared").with_default(1));
    base.register(&mut ctx).unwrap();

    let mut child = ClassBuilder::new("Child");
    child.extends("Base").add_method("__sleep", |_, _, _| {
        Ok(Value::Array(Array::list([Value::str("shared"), Value::str("secret")])))
    });
    let child = child.register(&mut ctx).unwrap();
    let obj = ctx.new_instance(child).unwrap();

    assert_eq!(
        ser(&mut ctx, &Value::Object(obj)),
        "O:5:\"Child\":2:{s:9:\"\0*\0shared\";i:1;s:6:\"secret\";N;}"
    );
    let diags = ctx.take_diagnostics();
    assert_eq!(diags.len(), 1);
    assert_eq!(
        diags[0].message,
        "\"secret\" returned as member variable from __sleep() but does not exist"
    );
}

#[test]
fn test_sleep_must_return_an_array() {
    let mut ctx = Context::new();
    let mut b = ClassBuilder::new("Odd");
    b.add_method("__sleep", |_, _, _| Ok(Value::str("not a list")));
    let class = b.register(&mut ctx).unwrap();
    let obj = ctx.new_instance(class).unwrap();

    assert_eq!(ser(&mut ctx, &Value::Object(obj)), "N;");
    assert_eq!(ctx.take_diagnostics().len(), 1);
}

#[test]
fn test_debug_display_fault_keeps_the_record() {
    let mut ctx = Context::new();
    let mut b = ClassBuilder::new("Shy");
    b.add_property(PropertyDecl::public("v").with_default(1))
        .add_method("__toDebugDisplay", |_, _, _| {
            Err(Error::exception("Exception", "hidden"))
        });
    let class = b.register(&mut ctx).unwrap();
    let obj = ctx.new_instance(class).unwrap();

    assert_eq!(
        debug_ser(&mut ctx, &Value::Object(obj)),
        "O:3:\"Shy\":1:{s:1:\"v\";i:1;}"
    );
    assert_eq!(
        ctx.take_diagnostics()[0].message,
        "Shy::__toDebugDisplay() throws exception"
    );
}

// ============================================================================
// Custom writer
// ============================================================================

/// Records the calls the bridge makes instead of producing text.
#[derive(Default)]
struct EventLog {
    events: Vec<String>,
    depth: usize,
    max_seen: usize,
}

impl Serializer for EventLog {
    fn mode(&self) -> SerializeMode {
        SerializeMode::Serialize
    }

    fn write_null(&mut self) {
        self.events.push("null".into());
    }

    fn write_bool(&mut self, b: bool) {
        self.events.push(format!("bool {b}"));
    }

    fn write_int(&mut self, i: i64) {
        self.events.push(format!("int {i}"));
    }

    fn write_double(&mut self, d: f64) {
        self.events.push(format!("double {d}"));
    }

    fn write_string(&mut self, s: &str) {
        self.events.push(format!("string {s}"));
    }

    fn write_serializable_record(&mut self, class: &str, bytes: &str) {
        self.events.push(format!("custom {class} {bytes}"));
    }

    fn set_record_info(&mut self, class: &str, _id: ObjectId, tag: char) {
        self.events.push(format!("record {tag} {class}"));
    }

    fn begin_array(&mut self, len: usize) {
        self.events.push(format!("begin {len}"));
    }

    fn write_key(&mut self, key: &ArrayKey) {
        self.events.push(format!("key {key}"));
    }

    fn end_array(&mut self) {
        self.events.push("end".into());
    }

    fn enter_level(&mut self, _obj: ObjectId) -> bool {
        self.depth += 1;
        self.max_seen = self.max_seen.max(self.depth);
        false
    }

    fn exit_level(&mut self, _obj: ObjectId) {
        self.depth -= 1;
    }

    fn write_overflow(&mut self, _obj: ObjectId) {
        self.events.push("overflow".into());
    }
}

#[test]
fn test_custom_writer_sees_balanced_levels() {
    let mut ctx = Context::new();
    let outer = ctx.new_instance(ctx.std_class()).unwrap();
    let inner = ctx.new_instance(ctx.std_class()).unwrap();
    ctx.set_prop(inner, None, "flag", Value::Bool(true)).unwrap();
    ctx.set_prop(outer, None, "inner", Value::Object(inner)).unwrap();

    let mut log = EventLog::default();
    ctx.serialize(&Value::Object(outer), &mut log).unwrap();

    assert_eq!(log.depth, 0);
    assert_eq!(log.max_seen, 2);
    assert_eq!(
        log.events,
        vec![
            "record O stdClass",
            "begin 1",
            "key inner",
            "record O stdClass",
            "begin 1",
            "key flag",
            "bool true",
            "end",
            "end",
        ]
    );
}

// Common test utilities for integration tests
//
// Shared class fixtures and hook recorders used across the integration
// tests.

#![allow(dead_code)]

use hopper::{ClassBuilder, ClassId, Context, PropertyDecl, Value};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

/// Ordered record of hook invocations.
pub type CallLog = Rc<RefCell<Vec<String>>>;

/// Side table a magic class stores its "virtual" properties in.
pub type Backing = Rc<RefCell<HashMap<String, Value>>>;

pub fn new_log() -> CallLog {
    Rc::new(RefCell::new(Vec::new()))
}

pub fn calls(log: &CallLog) -> Vec<String> {
    log.borrow().clone()
}

pub fn key_of(args: &[Value]) -> String {
    args.first()
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Registers `A { private $x = 1; }` and `B extends A { protected $y = 2; }`.
pub fn define_a_b(ctx: &mut Context) -> (ClassId, ClassId) {
    let mut a = ClassBuilder::new("A");
    a.add_property(PropertyDecl::private("x").with_default(1));
    let a = a.register(ctx).expect("register A");

    let mut b = ClassBuilder::new("B");
    b.extends("A")
        .add_property(PropertyDecl::protected("y").with_default(2));
    let b = b.register(ctx).expect("register B");
    (a, b)
}

/// Registers a class with all four property hooks backed by `backing`.
///
/// `__get` of an unknown key returns `"magic:<key>"`.
pub fn define_magic_bag(ctx: &mut Context, name: &str, log: &CallLog, backing: &Backing) -> ClassId {
    let mut b = ClassBuilder::new(name);
    b.add_property(PropertyDecl::private("hidden").with_default("h"));

    let (l, store) = (Rc::clone(log), Rc::clone(backing));
    b.add_method("__get", move |_, _, args| {
        let key = key_of(args);
        l.borrow_mut().push(format!("__get({key})"));
        Ok(store
            .borrow()
            .get(&key)
            .cloned()
            .unwrap_or_else(|| Value::str(&format!("magic:{key}"))))
    });

    let (l, store) = (Rc::clone(log), Rc::clone(backing));
    b.add_method("__set", move |_, _, args| {
        let key = key_of(args);
        l.borrow_mut().push(format!("__set({key})"));
        store.borrow_mut().insert(key, args[1].clone());
        Ok(Value::Null)
    });

    let (l, store) = (Rc::clone(log), Rc::clone(backing));
    b.add_method("__isset", move |_, _, args| {
        let key = key_of(args);
        l.borrow_mut().push(format!("__isset({key})"));
        Ok(Value::Bool(store.borrow().contains_key(&key)))
    });

    let (l, store) = (Rc::clone(log), Rc::clone(backing));
    b.add_method("__unset", move |_, _, args| {
        let key = key_of(args);
        l.borrow_mut().push(format!("__unset({key})"));
        store.borrow_mut().remove(&key);
        Ok(Value::Null)
    });

    b.register(ctx).expect("register magic bag")
}

/// Registers a class whose finalizer bumps `hits`.
pub fn define_counted_finalizer(ctx: &mut Context, name: &str, hits: &Rc<Cell<u32>>) -> ClassId {
    let hits = Rc::clone(hits);
    let mut b = ClassBuilder::new(name);
    b.add_property(PropertyDecl::public("label").with_default("orig"))
        .add_method("__destruct", move |_, _, _| {
            hits.set(hits.get() + 1);
            Ok(Value::Null)
        });
    b.register(ctx).expect("register finalizer class")
}

use std::{cell::Cell, rc::Rc};

use assert_call::{call, CallRecorder};
use serde_json::{json, Value};

use crate::{
    utils::test_helpers::record, EmitOptions, Field, FieldError, FieldResult, FieldState,
    StateProxy, VALUE_KEY,
};

#[derive(Default)]
struct AgeProxy {
    age: Cell<i64>,
}
impl StateProxy for AgeProxy {
    fn get(&self, _state: &FieldState) -> FieldState {
        call!("get");
        FieldState::new().with("age", self.age.get())
    }
    fn handle(&self, updates: &FieldState, prev_state: &FieldState) -> FieldResult<()> {
        call!("handle {}", prev_state.to_value());
        if let Some(age) = updates.get("age").and_then(Value::as_i64) {
            self.age.set(age);
        }
        Ok(())
    }
    fn should_be_handled(&self, updates: &FieldState, _prev_state: &FieldState) -> bool {
        updates.contains_key("age")
    }
}

#[test]
fn custom_proxy_extends_state() {
    let mut cr = CallRecorder::new();
    let field = Field::scalar(10);
    let _s = record(&field, "field");

    let proxy = Rc::new(AgeProxy::default());
    field
        .add_proxy_with(proxy.clone(), EmitOptions::SILENT)
        .unwrap();
    field.reset_prev_state();
    cr.verify("get");
    assert!(field.has_proxy(&*proxy));
    assert_eq!(field.state().to_value(), json!({ "value": 10, "age": 0 }));

    field.update([("age", 100)]).unwrap();
    cr.verify([
        r#"handle {"age":0,"value":10}"#,
        "get",
        r#"field: {"age":0,"value":10} -> {"age":100,"value":10}"#,
    ]);
}

#[test]
fn proxy_ignores_unrelated_updates() {
    let mut cr = CallRecorder::new();
    let field = Field::scalar(10);
    field.add_proxy(Rc::new(AgeProxy::default())).unwrap();
    let _s = record(&field, "field");
    cr.verify("get");

    field.update([("value", 1000)]).unwrap();
    cr.verify(r#"field: {"age":0,"value":10} -> {"age":0,"value":1000}"#);
}

#[test]
fn add_and_remove_emit() {
    let mut cr = CallRecorder::new();
    let field = Field::scalar(1);
    let _s = record(&field, "field");
    let proxy = Rc::new(AgeProxy::default());

    field.add_proxy(proxy.clone()).unwrap();
    cr.verify(["get", r#"field: {"value":1} -> {"age":0,"value":1}"#]);

    field.remove_proxy(&*proxy).unwrap();
    cr.verify(r#"field: {"age":0,"value":1} -> {"value":1}"#);
    assert!(!field.has_proxy(&*proxy));
}

struct Fixed(&'static str, i64);
impl StateProxy for Fixed {
    fn get(&self, _state: &FieldState) -> FieldState {
        FieldState::new().with(self.0, self.1)
    }
}

#[test]
fn duplicate_proxy_is_rejected() {
    let field = Field::scalar(1);
    let proxy = Rc::new(Fixed("x", 1));
    field.add_proxy(proxy.clone()).unwrap();
    assert!(matches!(
        field.add_proxy(proxy.clone()),
        Err(FieldError::DuplicateProxy { .. })
    ));

    // another instance of the same type is a different proxy
    field.add_proxy(Rc::new(Fixed("x", 1))).unwrap();
}

#[test]
fn unknown_proxy_is_rejected() {
    let field = Field::scalar(1);
    let proxy = Fixed("x", 1);
    assert!(matches!(
        field.remove_proxy(&proxy),
        Err(FieldError::ProxyNotFound { .. })
    ));
    assert!(matches!(
        field.refresh_proxy(&proxy),
        Err(FieldError::ProxyNotFound { .. })
    ));
}

#[test]
fn later_proxy_wins() {
    let field = Field::scalar(1);
    field.add_proxy(Rc::new(Fixed("x", 1))).unwrap();
    field.add_proxy(Rc::new(Fixed("x", 2))).unwrap();
    assert_eq!(field.state().get("x"), Some(&json!(2)));

    field.add_proxy(Rc::new(Fixed(VALUE_KEY, 3))).unwrap();
    assert_eq!(field.state().value(), Some(&json!(3)));
}

struct Toggle {
    enabled: Cell<bool>,
}
impl StateProxy for Toggle {
    fn get(&self, _state: &FieldState) -> FieldState {
        FieldState::new().with("extra", true)
    }
    fn should_be_excluded(&self, _state: &FieldState) -> bool {
        !self.enabled.get()
    }
}

#[test]
fn excluded_proxy() {
    let mut cr = CallRecorder::new();
    let field = Field::scalar(1);
    let proxy = Rc::new(Toggle {
        enabled: Cell::new(false),
    });
    field.add_proxy(proxy.clone()).unwrap();
    let _s = record(&field, "field");
    assert_eq!(field.state().to_value(), json!({ "value": 1 }));

    proxy.enabled.set(true);
    assert!(field.refresh_proxy(&*proxy).unwrap());
    assert!(!field.refresh_proxy(&*proxy).unwrap());
    assert_eq!(field.state().to_value(), json!({ "value": 1 }));

    field.compute_state().unwrap();
    assert_eq!(field.state().to_value(), json!({ "value": 1, "extra": true }));
    cr.verify(());

    field.emit_next().unwrap();
    cr.verify(r#"field: {"value":1} -> {"extra":true,"value":1}"#);
}

struct Limit;
impl StateProxy for Limit {
    fn get(&self, _state: &FieldState) -> FieldState {
        FieldState::new()
    }
    fn should_be_handled(&self, updates: &FieldState, _prev_state: &FieldState) -> bool {
        updates.value().is_some()
    }
    fn validate(&self, updates: &FieldState, prev_state: &FieldState) -> FieldResult<()> {
        match updates.value().and_then(Value::as_i64) {
            Some(value) if value <= 100 => Ok(()),
            _ => Err(FieldError::type_mismatch(
                VALUE_KEY,
                "a number up to 100",
                prev_state.path().map(str::to_owned),
            )),
        }
    }
}

#[test]
fn rejected_update_changes_nothing() {
    let mut cr = CallRecorder::new();
    let field = Field::scalar(1);
    field.add_proxy(Rc::new(Limit)).unwrap();
    let _s = record(&field, "field");

    assert_eq!(
        field.update([("value", 1000)]),
        Err(FieldError::TypeMismatch {
            key: "value".into(),
            expected: "a number up to 100",
            path: None,
        })
    );
    assert_eq!(field.state().value(), Some(&json!(1)));
    cr.verify(());

    field.update([("value", 100)]).unwrap();
    cr.verify(r#"field: {"value":1} -> {"value":100}"#);
}

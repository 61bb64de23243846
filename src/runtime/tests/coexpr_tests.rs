//! Tests for co-expressions: delivery order, frame duplication,
//! abandonment and error forwarding

use std::time::Duration;

use super::helpers::{call, link, link_with, wait_for};
use crate::config::Config;
use crate::runtime::operators::invoke;
use crate::runtime::{Outcome, Program, Value};

fn coexpr(program: &Program, name: &str) -> Value {
    match call(program, name, vec![]).expect("create raised") {
        Outcome::Return(value @ Value::CoExpr(_)) => value,
        other => panic!("expected a co-expression, got {other:?}"),
    }
}

fn next(co: &Value) -> Option<f64> {
    let outcome = invoke("@", vec![co.clone()]).expect("activation raised");
    outcome.value().map(|v| v.as_number().expect("expected a number"))
}

const COUNTER: &str = r#"{
    "procedures": [{
        "name": "counter", "temps": 2, "entry": "L0",
        "chunks": [
            {"label": "L0", "body": [
                {"t": "Create", "lhs": 0, "entry": "body"},
                {"t": "Succeed", "expr": 0}
            ]},
            {"label": "body", "body": [
                {"t": "Literal", "lhs": 1, "value": {"k": "Num", "v": 1}},
                {"t": "CoReturn", "value": 1, "resume": "two"}
            ]},
            {"label": "two", "body": [
                {"t": "Literal", "lhs": 1, "value": {"k": "Num", "v": 2}},
                {"t": "CoReturn", "value": 1, "resume": "three"}
            ]},
            {"label": "three", "body": [
                {"t": "Literal", "lhs": 1, "value": {"k": "Num", "v": 3}},
                {"t": "CoReturn", "value": 1, "resume": "end"}
            ]},
            {"label": "end", "body": [{"t": "CoFail"}]}
        ]
    }]
}"#;

#[test]
fn test_values_arrive_in_order_then_fail() {
    let program = link(COUNTER);
    let co = coexpr(&program, "counter");
    assert_eq!(next(&co), Some(1.0));
    assert_eq!(next(&co), Some(2.0));
    assert_eq!(next(&co), Some(3.0));
    assert_eq!(next(&co), None);
    assert_eq!(next(&co), None);
}

#[test]
fn test_independent_coexpressions() {
    let program = link(COUNTER);
    let a = coexpr(&program, "counter");
    let b = coexpr(&program, "counter");
    assert_eq!(next(&a), Some(1.0));
    assert_eq!(next(&a), Some(2.0));
    assert_eq!(next(&b), Some(1.0));
    assert_eq!(next(&a), Some(3.0));
}

#[test]
fn test_locals_copied_statics_shared() {
    let program = link(
        r#"{
        "procedures": [{
            "name": "snapshot", "locals": ["x"], "statics": ["s"], "temps": 5, "entry": "L0",
            "chunks": [
                {"label": "L0", "body": [
                    {"t": "Var", "lhs": 0, "name": "x"},
                    {"t": "Literal", "lhs": 1, "value": {"k": "Num", "v": 1}},
                    {"t": "Operator", "op": ":=", "args": [0, 1]},
                    {"t": "Create", "lhs": 3, "entry": "body"},
                    {"t": "Literal", "lhs": 1, "value": {"k": "Num", "v": 5}},
                    {"t": "Operator", "op": ":=", "args": [0, 1]},
                    {"t": "Var", "lhs": 4, "name": "s"},
                    {"t": "Literal", "lhs": 1, "value": {"k": "Num", "v": 7}},
                    {"t": "Operator", "op": ":=", "args": [4, 1]},
                    {"t": "Succeed", "expr": 3}
                ]},
                {"label": "body", "body": [
                    {"t": "Var", "lhs": 0, "name": "x"},
                    {"t": "CoReturn", "value": 0, "resume": "shared"}
                ]},
                {"label": "shared", "body": [
                    {"t": "Var", "lhs": 4, "name": "s"},
                    {"t": "CoReturn", "value": 4, "resume": "end"}
                ]},
                {"label": "end", "body": [{"t": "CoFail"}]}
            ]
        }]
    }"#,
    );
    let co = coexpr(&program, "snapshot");
    assert_eq!(next(&co), Some(1.0), "local copied at creation");
    assert_eq!(next(&co), Some(7.0), "static shared with creator");
    assert_eq!(next(&co), None);
}

#[test]
fn test_dynamic_variables_visible_in_task() {
    let program = link(
        r#"{
        "procedures": [{
            "name": "inherit", "temps": 3, "entry": "L0",
            "chunks": [
                {"label": "L0", "body": [
                    {"t": "EnterScope", "scope": "d", "dynamics": ["level"]},
                    {"t": "DynVar", "lhs": 0, "name": "level", "lvalue": true},
                    {"t": "Literal", "lhs": 1, "value": {"k": "Num", "v": 3}},
                    {"t": "Operator", "op": ":=", "args": [0, 1]},
                    {"t": "Create", "lhs": 2, "entry": "body"},
                    {"t": "ExitScope", "scope": "d"},
                    {"t": "Succeed", "expr": 2}
                ]},
                {"label": "body", "body": [
                    {"t": "DynVar", "lhs": 0, "name": "level"},
                    {"t": "CoReturn", "value": 0, "resume": "end"}
                ]},
                {"label": "end", "body": [{"t": "CoFail"}]}
            ]
        }]
    }"#,
    );
    let co = coexpr(&program, "inherit");
    assert_eq!(next(&co), Some(3.0));
}

const FOREVER: &str = r#"{
    "procedures": [{
        "name": "forever", "temps": 2, "entry": "L0",
        "chunks": [
            {"label": "L0", "body": [
                {"t": "Create", "lhs": 0, "entry": "body"},
                {"t": "Succeed", "expr": 0}
            ]},
            {"label": "body", "body": [
                {"t": "Literal", "lhs": 1, "value": {"k": "Num", "v": 1}},
                {"t": "CoReturn", "value": 1, "resume": "body"}
            ]}
        ]
    }]
}"#;

#[test]
fn test_abandoned_producer_terminates() {
    let program = link(FOREVER);
    let pool = std::sync::Arc::clone(program.env().pool());

    let co = coexpr(&program, "forever");
    assert_eq!(next(&co), Some(1.0));
    assert_eq!(next(&co), Some(1.0));
    assert_eq!(pool.active(), 1);
    drop(co);
    assert!(wait_for(Duration::from_secs(5), || pool.active() == 0));

    let unused = coexpr(&program, "forever");
    drop(unused);
    assert!(wait_for(Duration::from_secs(5), || pool.active() == 0));
}

#[test]
fn test_live_coexpressions_are_bounded() {
    let config = Config {
        max_tasks: 2,
        ..Config::default()
    };
    let program = link_with(config, COUNTER);
    let pool = std::sync::Arc::clone(program.env().pool());

    let first = coexpr(&program, "counter");
    let second = coexpr(&program, "counter");
    assert_eq!(next(&second), Some(1.0));

    let err = call(&program, "counter", vec![]).unwrap_err();
    assert!(!err.is_malfunction());
    assert!(err.message().starts_with("too many live co-expressions"));
    assert_eq!(err.trace()[0].procedure, "counter");

    drop(first);
    assert!(wait_for(Duration::from_secs(5), || pool.active() < 2));
    let third = coexpr(&program, "counter");
    assert_eq!(next(&third), Some(1.0));
    assert_eq!(next(&second), Some(2.0));
}

#[test]
fn test_closed_coexpression_fails() {
    let program = link(FOREVER);
    let co = coexpr(&program, "forever");
    assert_eq!(next(&co), Some(1.0));
    call(&program, "close", vec![co.clone()]).unwrap();
    assert_eq!(next(&co), None);
}

#[test]
fn test_error_in_task_is_forwarded_once() {
    let program = link(
        r#"{
        "procedures": [{
            "name": "faulty", "temps": 4, "entry": "L0",
            "chunks": [
                {"label": "L0", "body": [
                    {"t": "Create", "lhs": 0, "entry": "body"},
                    {"t": "Succeed", "expr": 0}
                ]},
                {"label": "body", "body": [
                    {"t": "Coord", "coord": "faulty.gd:4"},
                    {"t": "Literal", "lhs": 1, "value": {"k": "Str", "v": "x"}},
                    {"t": "Literal", "lhs": 2, "value": {"k": "Num", "v": 1}},
                    {"t": "Operator", "lhs": 3, "op": "+", "args": [1, 2]},
                    {"t": "CoReturn", "value": 3, "resume": "body"}
                ]}
            ]
        }]
    }"#,
    );
    let co = coexpr(&program, "faulty");
    let err = invoke("@", vec![co.clone()]).unwrap_err();
    assert!(!err.is_malfunction());
    let trace = err.trace();
    assert_eq!(trace.len(), 2);
    assert_eq!(trace[0].procedure, "faulty");
    assert_eq!(trace[0].coord, "faulty.gd:4");
    assert!(trace[1].procedure.starts_with("co-expression #"));

    assert_eq!(next(&co), None);
}

#[test]
fn test_coreturn_outside_coexpression_is_malfunction() {
    let program = link(
        r#"{
        "procedures": [{
            "name": "stray", "temps": 1, "entry": "L0",
            "chunks": [
                {"label": "L0", "body": [
                    {"t": "Literal", "lhs": 0, "value": {"k": "Num", "v": 1}},
                    {"t": "CoReturn", "value": 0, "resume": "L0"}
                ]}
            ]
        }]
    }"#,
    );
    assert!(call(&program, "stray", vec![]).unwrap_err().is_malfunction());
}

//! Tests for exception propagation, recovery and diagnostics
//!
//! Exceptions accrete one traceback frame per activation and can be caught
//! by a recovery procedure; malfunctions never reach user recovery.

use super::helpers::{call, link, number};
use crate::runtime::{Raised, Value};

const PROGRAM: &str = r#"{
    "procedures": [
        {
            "name": "inner", "params": ["x"], "temps": 3, "entry": "L0",
            "chunks": [{"label": "L0", "body": [
                {"t": "Coord", "coord": "demo.gd:2"},
                {"t": "Var", "lhs": 0, "name": "x"},
                {"t": "Literal", "lhs": 1, "value": {"k": "Num", "v": 1}},
                {"t": "Operator", "lhs": 2, "op": "+", "args": [0, 1]},
                {"t": "Succeed", "expr": 2}
            ]}]
        },
        {
            "name": "outer", "temps": 3, "entry": "L0",
            "chunks": [{"label": "L0", "body": [
                {"t": "Coord", "coord": "demo.gd:7"},
                {"t": "Var", "lhs": 0, "name": "inner"},
                {"t": "Literal", "lhs": 1, "value": {"k": "Str", "v": "abc"}},
                {"t": "Call", "lhs": 2, "callee": 0, "args": [1]},
                {"t": "Succeed", "expr": 2}
            ]}]
        },
        {
            "name": "handler", "params": ["cause", "offending"], "temps": 1, "entry": "L0",
            "chunks": [{"label": "L0", "body": [
                {"t": "Var", "lhs": 0, "name": "cause"},
                {"t": "Succeed", "expr": 0}
            ]}]
        },
        {
            "name": "guarded", "temps": 3, "entry": "L0",
            "chunks": [{"label": "L0", "body": [
                {"t": "Var", "lhs": 0, "name": "handler"},
                {"t": "Catch", "handler": 0},
                {"t": "Var", "lhs": 1, "name": "outer"},
                {"t": "Call", "lhs": 2, "callee": 1},
                {"t": "Succeed", "expr": 2}
            ]}]
        },
        {
            "name": "thrower", "temps": 4, "entry": "L0",
            "chunks": [{"label": "L0", "body": [
                {"t": "Var", "lhs": 0, "name": "handler"},
                {"t": "Catch", "handler": 0},
                {"t": "Var", "lhs": 1, "name": "throw"},
                {"t": "Literal", "lhs": 2, "value": {"k": "Num", "v": 42}},
                {"t": "Call", "lhs": 3, "callee": 1, "args": [2]},
                {"t": "Succeed", "expr": 3}
            ]}]
        },
        {
            "name": "reraise", "params": ["cause"], "temps": 3, "entry": "L0",
            "chunks": [{"label": "L0", "body": [
                {"t": "Var", "lhs": 0, "name": "cause"},
                {"t": "Literal", "lhs": 1, "value": {"k": "Num", "v": 2}},
                {"t": "Operator", "lhs": 2, "op": "*", "args": [0, 1]},
                {"t": "Succeed", "expr": 2}
            ]}]
        },
        {
            "name": "shielded", "temps": 3, "entry": "L0",
            "chunks": [{"label": "L0", "body": [
                {"t": "Var", "lhs": 0, "name": "reraise"},
                {"t": "Catch", "handler": 0},
                {"t": "Var", "lhs": 1, "name": "outer"},
                {"t": "Call", "lhs": 2, "callee": 1},
                {"t": "Succeed", "expr": 2}
            ]}]
        },
        {
            "name": "broken", "temps": 2, "entry": "L0",
            "chunks": [{"label": "L0", "body": [
                {"t": "Var", "lhs": 0, "name": "handler"},
                {"t": "Catch", "handler": 0},
                {"t": "Var", "lhs": 1, "name": "undeclared"},
                {"t": "Succeed", "expr": 1}
            ]}]
        }
    ]
}"#;

#[test]
fn test_exception_accretes_traceback() {
    let program = link(PROGRAM);
    let err = call(&program, "outer", vec![]).unwrap_err();
    let Raised::Exception(exception) = &err else {
        unreachable!("Expected an exception, got {err:?}");
    };
    assert_eq!(exception.message, "numeric value expected");
    assert_eq!(exception.offending[0].as_str(), Some("abc"));

    let procedures: Vec<&str> = err.trace().iter().map(|f| f.procedure.as_str()).collect();
    assert_eq!(procedures, vec!["inner", "outer"]);
    assert_eq!(err.trace()[0].coord, "demo.gd:2");
    assert_eq!(err.trace()[0].args, vec!["\"abc\"".to_string()]);
    assert_eq!(err.trace()[0].offender.as_deref(), Some("\"abc\""));
    assert_eq!(err.trace()[1].coord, "demo.gd:7");
    assert_eq!(err.exit_code(), 1);
}

#[test]
fn test_recovery_receives_cause() {
    let program = link(PROGRAM);
    let outcome = call(&program, "guarded", vec![]).unwrap();
    assert_eq!(
        outcome.value().and_then(Value::as_str),
        Some("numeric value expected")
    );
}

#[test]
fn test_thrown_value_is_the_cause() {
    let program = link(PROGRAM);
    assert_eq!(number(call(&program, "thrower", vec![])), 42.0);
}

#[test]
fn test_error_in_recovery_keeps_catching_frame() {
    let program = link(PROGRAM);
    let err = call(&program, "shielded", vec![]).unwrap_err();
    assert!(!err.is_malfunction());
    let procedures: Vec<&str> = err.trace().iter().map(|f| f.procedure.as_str()).collect();
    assert_eq!(procedures, vec!["reraise", "shielded"]);
}

#[test]
fn test_malfunction_bypasses_recovery() {
    let program = link(PROGRAM);
    let err = call(&program, "broken", vec![]).unwrap_err();
    assert!(err.is_malfunction());
    assert_eq!(err.trace().len(), 1);
    assert_eq!(err.trace()[0].procedure, "broken");
    assert_eq!(err.exit_code(), 2);
}

#[test]
fn test_report_lists_message_and_traceback() {
    let program = link(PROGRAM);
    let err = call(&program, "outer", vec![]).unwrap_err();
    let report = err.report(1);
    assert!(report.starts_with("Run-time error: numeric value expected"));
    assert!(report.contains("Offending value: \"abc\""));
    assert!(report.contains("inner(\"abc\") at demo.gd:2"));
    assert!(report.contains("... 1 more"));
    assert!(!report.contains("outer()"));
}

#[test]
fn test_calling_non_procedure_is_exception() {
    let program = link(PROGRAM);
    let err = crate::runtime::engine::call(program.env(), &Value::from(3.0), vec![], &[]).unwrap_err();
    assert_eq!(err.message(), "procedure expected");
}

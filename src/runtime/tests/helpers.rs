//! Test helpers for runtime tests
//!
//! Programs are written as JSON IR, deserialized, and linked into a fresh
//! `Program` with the standard library installed.

use std::time::{Duration, Instant};

use crate::config::Config;
use crate::runtime::engine;
use crate::runtime::{Program, ProgramIr, Raised, Step, Value};

/// Deserialize program IR and link it into a new program
pub fn link(source: &str) -> Program {
    link_with(Config::default(), source)
}

/// Like [`link`], under a non-default configuration
pub fn link_with(config: Config, source: &str) -> Program {
    let ir: ProgramIr = serde_json::from_str(source).expect("Program IR deserialization failed");
    let json = serde_json::to_string(&ir).expect("Program IR serialization failed");
    let ir: ProgramIr = serde_json::from_str(&json).expect("Program IR round trip failed");
    let mut program = Program::new(config).expect("Runtime start failed");
    program.link(ir).expect("Link failed");
    program
}

/// Link a program, returning the link error
pub fn link_err(source: &str) -> Raised {
    let ir: ProgramIr = serde_json::from_str(source).expect("Program IR deserialization failed");
    let mut program = Program::new(Config::default()).expect("Runtime start failed");
    program.link(ir).expect_err("Link unexpectedly succeeded")
}

/// Call a global by name with positional arguments
pub fn call(program: &Program, name: &str, args: Vec<Value>) -> Step {
    let callee = program
        .registry()
        .get(name)
        .unwrap_or_else(|| panic!("no global {name}"))
        .get();
    engine::call(program.env(), &callee, args, &[])
}

/// Value of a global after initialization
pub fn global(program: &Program, name: &str) -> Value {
    program
        .registry()
        .get(name)
        .unwrap_or_else(|| panic!("no global {name}"))
        .get()
}

/// Single numeric result of a call
pub fn number(step: Step) -> f64 {
    let outcome = step.expect("call raised");
    outcome
        .value()
        .and_then(|v| v.clone().deref().as_number())
        .unwrap_or_else(|| panic!("expected a number, got {outcome:?}"))
}

pub fn numbers(values: &[Value]) -> Vec<f64> {
    values
        .iter()
        .map(|v| v.clone().deref().as_number().expect("expected a number"))
        .collect()
}

/// Poll `condition` until it holds or `timeout` passes
pub fn wait_for(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

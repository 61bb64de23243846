//! Standard library registration
//!
//! Library callables are registered into the root namespace before any
//! program is linked. Most are written against the calling contract
//! directly; the numeric helpers are plain host functions wrapped by
//! [`Native::unary`] and [`Native::binary`].

use std::io::Write;
use std::sync::Arc;

use super::channel::Channel;
use super::env::Environment;
use super::error::Raised;
use super::namespace::Registry;
use super::outcome::{Outcome, Step};
use super::procedure::{Callable, Native};
use super::program;
use super::value::Value;

/// Largest list length or string length the library will build
const MAX_SIZE: usize = 1 << 24;

pub fn install(registry: &Registry) -> Result<(), Raised> {
    let library: Vec<Arc<dyn Callable>> = vec![
        Native::new("write", |_env, args| write(args, true)),
        Native::new("writes", |_env, args| write(args, false)),
        Native::new("channel", channel),
        Native::new("send", send),
        Native::new("receive", receive),
        Native::new("close", close),
        Native::new("throw", throw),
        Native::new("exit", exit),
        Native::new("list", list),
        Native::unary("abs", f64::abs),
        Native::unary("sqrt", sqrt),
        Native::unary("string", string),
        Native::unary("number", number),
        Native::binary("max", f64::max),
        Native::binary("min", f64::min),
        Native::binary("repl", repl),
    ];
    for callable in library {
        registry.register(callable)?;
    }
    Ok(())
}

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or(Value::Nil)
}

fn write(args: Vec<Value>, newline: bool) -> Step {
    let mut out = std::io::stdout().lock();
    let mut emit = || -> std::io::Result<()> {
        for value in &args {
            write!(out, "{value}")?;
        }
        if newline {
            writeln!(out)?;
        }
        Ok(())
    };
    emit().map_err(|err| Raised::exception(format!("write failed: {err}"), Vec::new()))?;
    Ok(Outcome::Return(args.last().cloned().unwrap_or(Value::Nil)))
}

fn channel(env: &Arc<Environment>, args: Vec<Value>) -> Step {
    let capacity = match arg(&args, 0) {
        Value::Nil => 0,
        n => n.to_number()?.max(0.0) as usize,
    };
    let handle = env.pool().handle().clone();
    Ok(Outcome::Return(Value::Channel(Channel::new(handle, capacity))))
}

fn channel_arg(args: &[Value]) -> Result<Channel, Raised> {
    match arg(args, 0) {
        Value::Channel(channel) => Ok(channel),
        other => Err(Raised::exception("channel expected", vec![other])),
    }
}

fn send(_env: &Arc<Environment>, args: Vec<Value>) -> Step {
    let value = arg(&args, 1);
    channel_arg(&args)?.send(value.clone())?;
    Ok(Outcome::Return(value))
}

/// Fails once the channel is closed and drained
fn receive(_env: &Arc<Environment>, args: Vec<Value>) -> Step {
    Ok(channel_arg(&args)?
        .receive()
        .map_or(Outcome::Fail, Outcome::Return))
}

/// Close a channel, or abandon a co-expression
fn close(_env: &Arc<Environment>, args: Vec<Value>) -> Step {
    match arg(&args, 0) {
        Value::Channel(channel) => channel.close(),
        Value::CoExpr(co) => co.close(),
        other => return Err(Raised::exception("channel expected", vec![other])),
    }
    Ok(Outcome::Return(arg(&args, 0)))
}

fn throw(_env: &Arc<Environment>, mut args: Vec<Value>) -> Step {
    let cause = if args.is_empty() {
        Value::Nil
    } else {
        args.remove(0)
    };
    Err(Raised::throw(cause, args))
}

fn exit(_env: &Arc<Environment>, args: Vec<Value>) -> Step {
    let code = match arg(&args, 0) {
        Value::Nil => 0,
        n => n.to_number()? as i32,
    };
    program::shutdown(code)
}

/// `list(n, x)`: n copies of x
fn list(_env: &Arc<Environment>, args: Vec<Value>) -> Step {
    let size = match arg(&args, 0) {
        Value::Nil => 0,
        n => n.to_number()?.max(0.0) as usize,
    };
    if size > MAX_SIZE {
        return Err(Raised::exception("list size too large", vec![arg(&args, 0)]));
    }
    let fill = arg(&args, 1);
    Ok(Outcome::Return(Value::from(vec![fill; size])))
}

fn sqrt(x: f64) -> Result<f64, Raised> {
    if x < 0.0 {
        return Err(Raised::exception("square root of negative number", vec![Value::from(x)]));
    }
    Ok(x.sqrt())
}

fn string(s: String) -> String {
    s
}

/// `repl(s, n)`: s repeated n times
fn repl(s: String, n: i64) -> Result<String, Raised> {
    if n < 0 {
        return Err(Raised::exception("negative repeat count", vec![Value::from(n as f64)]));
    }
    match usize::try_from(n).ok().and_then(|n| n.checked_mul(s.len())) {
        Some(len) if len <= MAX_SIZE => Ok(s.repeat(n as usize)),
        _ => Err(Raised::exception("string size too large", vec![Value::from(n as f64)])),
    }
}

/// Fails when the value has no numeric reading
fn number(value: Value) -> Option<f64> {
    value.to_number().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::procedure::{FromValue, IntoOutcome};

    #[test]
    fn test_install_registers_library() {
        let registry = Registry::new();
        install(&registry).unwrap();
        for name in ["write", "channel", "receive", "sqrt"] {
            assert!(registry.get(name).is_some(), "{name}");
        }
        assert!(install(&registry).unwrap_err().is_malfunction());
    }

    #[test]
    fn test_wrapped_conversions() {
        assert_eq!(f64::from_value(Value::from("2.5")).unwrap(), 2.5);
        assert!(sqrt(-1.0).is_err());
        assert!(number(Value::from("x")).into_outcome().unwrap().is_fail());
        let value = string(String::from_value(Value::from(4.0)).unwrap());
        assert_eq!(value, "4");
    }

    #[test]
    fn test_binary_wrappers() {
        let registry = Registry::new();
        install(&registry).unwrap();
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let env = Environment::root(crate::runtime::coexpr::TaskPool::new(
            runtime.handle().clone(),
            1,
            1,
        ));
        let repl = registry.get("repl").unwrap().get().as_callable().unwrap();
        let outcome = Arc::clone(&repl)
            .call(&env, vec![Value::from("ab"), Value::from("3")], &[])
            .unwrap();
        assert_eq!(outcome.value().and_then(Value::as_str), Some("ababab"));
        assert!(super::repl("x".to_string(), -1).is_err());

        let err = repl
            .call(&env, vec![Value::from("ab"), Value::from(1e19)], &[])
            .unwrap_err();
        assert_eq!(err.message(), "string size too large");
        assert_eq!(super::repl(String::new(), 1 << 40).unwrap(), "");

        let list = registry.get("list").unwrap().get().as_callable().unwrap();
        let err = list.call(&env, vec![Value::from(1e12)], &[]).unwrap_err();
        assert_eq!(err.message(), "list size too large");

        let max = registry.get("max").unwrap().get().as_callable().unwrap();
        let outcome = max.call(&env, vec![Value::from(2.0), Value::from(9.0)], &[]).unwrap();
        assert_eq!(outcome.value().and_then(Value::as_number), Some(9.0));
    }
}

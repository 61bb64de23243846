//! Operator dispatcher
//!
//! Operators are looked up by `<arity><name>` in a table built once. Each
//! entry lists the argument positions passed without dereferencing, so
//! assignment and indexing see the variable rather than its value.
//!
//! Two implementation shapes exist:
//! - `Value`: always produces a value (arithmetic); errors raise exceptions
//! - `Outcome`: may fail or suspend (comparisons, indexing, generators)

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use super::error::Raised;
use super::outcome::{Continuation, Outcome, Step};
use super::value::{List, Value};

pub type ValueFn = fn(&[Value]) -> Result<Value, Raised>;
pub type OutcomeFn = fn(&[Value]) -> Step;

#[derive(Clone, Copy)]
pub enum Implementation {
    Value(ValueFn),
    Outcome(OutcomeFn),
}

/// One dispatch table entry
pub struct Operator {
    pub name: &'static str,
    pub arity: usize,
    /// Argument positions passed as variables, not dereferenced
    pub raw: &'static [usize],
    imp: Implementation,
}

impl Operator {
    const fn value(name: &'static str, arity: usize, raw: &'static [usize], f: ValueFn) -> Self {
        Operator { name, arity, raw, imp: Implementation::Value(f) }
    }

    const fn outcome(name: &'static str, arity: usize, raw: &'static [usize], f: OutcomeFn) -> Self {
        Operator { name, arity, raw, imp: Implementation::Outcome(f) }
    }

    pub fn key(&self) -> String {
        format!("{}{}", self.arity, self.name)
    }
}

static OPERATORS: OnceLock<HashMap<String, Operator>> = OnceLock::new();

fn table() -> &'static HashMap<String, Operator> {
    OPERATORS.get_or_init(|| {
        [
            // arithmetic
            Operator::value("+", 2, &[], add),
            Operator::value("-", 2, &[], sub),
            Operator::value("*", 2, &[], mul),
            Operator::value("/", 2, &[], div),
            Operator::value("%", 2, &[], rem),
            Operator::value("^", 2, &[], pow),
            Operator::value("-", 1, &[], neg),
            Operator::value("+", 1, &[], plus),
            // numeric comparison
            Operator::outcome("<", 2, &[], num_lt),
            Operator::outcome("<=", 2, &[], num_le),
            Operator::outcome(">", 2, &[], num_gt),
            Operator::outcome(">=", 2, &[], num_ge),
            Operator::outcome("=", 2, &[], num_eq),
            Operator::outcome("~=", 2, &[], num_ne),
            // strings
            Operator::value("||", 2, &[], concat),
            Operator::outcome("==", 2, &[], str_eq),
            Operator::outcome("~==", 2, &[], str_ne),
            // variables
            Operator::value(":=", 2, &[0], assign),
            Operator::value(":=:", 2, &[0, 1], swap),
            Operator::outcome("[]", 2, &[0], index),
            Operator::outcome("[:]", 3, &[0], slice),
            Operator::outcome("===", 2, &[0], same),
            Operator::outcome("~===", 2, &[0], not_same),
            // misc
            Operator::value("*", 1, &[], size),
            Operator::outcome("/", 1, &[], is_nil),
            Operator::outcome("\\", 1, &[], not_nil),
            Operator::outcome("!", 1, &[], elements),
            Operator::outcome("to", 2, &[], to),
            Operator::outcome("@", 1, &[], activate),
        ]
        .into_iter()
        .map(|op| (op.key(), op))
        .collect()
    })
}

/// Dispatch table entry for `name` at `arity`
///
/// A missing entry is an implementation gap, not a language failure.
pub fn lookup(name: &str, arity: usize) -> Result<&'static Operator, Raised> {
    table()
        .get(&format!("{arity}{name}"))
        .ok_or_else(|| Raised::malfunction(format!("no operator {name} of arity {arity}")))
}

/// Invoke an operator under the suspension protocol
pub fn invoke(name: &str, args: Vec<Value>) -> Step {
    let op = lookup(name, args.len())?;
    let args: Vec<Value> = args
        .into_iter()
        .enumerate()
        .map(|(i, arg)| if op.raw.contains(&i) { arg } else { arg.deref() })
        .collect();
    match op.imp {
        Implementation::Value(f) => Ok(Outcome::Return(f(&args)?)),
        Implementation::Outcome(f) => f(&args),
    }
}

/* ===================== Arithmetic ===================== */

fn numbers(args: &[Value]) -> Result<(f64, f64), Raised> {
    Ok((args[0].to_number()?, args[1].to_number()?))
}

fn add(args: &[Value]) -> Result<Value, Raised> {
    let (a, b) = numbers(args)?;
    Ok(Value::Number(a + b))
}

fn sub(args: &[Value]) -> Result<Value, Raised> {
    let (a, b) = numbers(args)?;
    Ok(Value::Number(a - b))
}

fn mul(args: &[Value]) -> Result<Value, Raised> {
    let (a, b) = numbers(args)?;
    Ok(Value::Number(a * b))
}

fn div(args: &[Value]) -> Result<Value, Raised> {
    let (a, b) = numbers(args)?;
    if b == 0.0 {
        return Err(Raised::exception("division by zero", args.to_vec()));
    }
    Ok(Value::Number(a / b))
}

fn rem(args: &[Value]) -> Result<Value, Raised> {
    let (a, b) = numbers(args)?;
    if b == 0.0 {
        return Err(Raised::exception("division by zero", args.to_vec()));
    }
    Ok(Value::Number(a % b))
}

fn pow(args: &[Value]) -> Result<Value, Raised> {
    let (a, b) = numbers(args)?;
    Ok(Value::Number(a.powf(b)))
}

fn neg(args: &[Value]) -> Result<Value, Raised> {
    Ok(Value::Number(-args[0].to_number()?))
}

fn plus(args: &[Value]) -> Result<Value, Raised> {
    Ok(Value::Number(args[0].to_number()?))
}

/* ===================== Comparison ===================== */

/// Succeed with the right operand, or fail
fn compare_numbers(args: &[Value], holds: fn(f64, f64) -> bool) -> Step {
    let (a, b) = numbers(args)?;
    Ok(if holds(a, b) {
        Outcome::Return(Value::Number(b))
    } else {
        Outcome::Fail
    })
}

fn num_lt(args: &[Value]) -> Step {
    compare_numbers(args, |a, b| a < b)
}

fn num_le(args: &[Value]) -> Step {
    compare_numbers(args, |a, b| a <= b)
}

fn num_gt(args: &[Value]) -> Step {
    compare_numbers(args, |a, b| a > b)
}

fn num_ge(args: &[Value]) -> Step {
    compare_numbers(args, |a, b| a >= b)
}

fn num_eq(args: &[Value]) -> Step {
    compare_numbers(args, |a, b| a == b)
}

fn num_ne(args: &[Value]) -> Step {
    compare_numbers(args, |a, b| a != b)
}

/* ===================== Strings ===================== */

fn concat(args: &[Value]) -> Result<Value, Raised> {
    let a = args[0].to_text()?;
    let b = args[1].to_text()?;
    Ok(Value::from(format!("{a}{b}")))
}

fn compare_strings(args: &[Value], equal: bool) -> Step {
    let a = args[0].to_text()?;
    let b = args[1].to_text()?;
    Ok(if (a == b) == equal {
        Outcome::Return(Value::Str(b))
    } else {
        Outcome::Fail
    })
}

fn str_eq(args: &[Value]) -> Step {
    compare_strings(args, true)
}

fn str_ne(args: &[Value]) -> Step {
    compare_strings(args, false)
}

/* ===================== Variables ===================== */

fn variable_expected(value: &Value) -> Raised {
    Raised::exception("variable expected", vec![value.clone()])
}

fn assign(args: &[Value]) -> Result<Value, Raised> {
    match &args[0] {
        Value::Ref(cell) => {
            cell.set(args[1].clone());
            Ok(args[0].clone())
        }
        other => Err(variable_expected(other)),
    }
}

fn swap(args: &[Value]) -> Result<Value, Raised> {
    match (&args[0], &args[1]) {
        (Value::Ref(a), Value::Ref(b)) => {
            let old = a.replace(b.get());
            b.set(old);
            Ok(args[0].clone())
        }
        (Value::Ref(_), other) | (other, _) => Err(variable_expected(other)),
    }
}

/// Zero-based element index for a 1-based subscript; negative counts
/// back from the end
fn element(i: f64, len: usize) -> Option<usize> {
    let i = i.trunc() as i64;
    let len = len as i64;
    let k = if i > 0 { i - 1 } else { len + i };
    (i != 0 && (0..len).contains(&k)).then(|| k as usize)
}

/// 1-based position between elements: 1..=len+1, with 0 and negatives
/// counting from the end
fn position(p: f64, len: usize) -> Option<usize> {
    let p = p.trunc() as i64;
    let len = len as i64;
    let k = if p > 0 { p } else { len + 1 + p };
    (1..=len + 1).contains(&k).then(|| k as usize)
}

fn index(args: &[Value]) -> Step {
    let subscript = &args[1];
    match args[0].clone().deref() {
        Value::List(list) => {
            let cell = element(subscript.to_number()?, list.len()).and_then(|k| list.cell(k));
            Ok(cell.map_or(Outcome::Fail, |c| Outcome::Return(Value::Ref(c))))
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            Ok(match element(subscript.to_number()?, chars.len()) {
                Some(k) => Outcome::Return(Value::from(chars[k].to_string())),
                None => Outcome::Fail,
            })
        }
        Value::Record(record) => {
            let cell = match subscript {
                Value::Str(name) => record.field(name),
                other => {
                    let k = element(other.to_number()?, record.len());
                    k.and_then(|k| record.field_at(k))
                }
            };
            Ok(cell.map_or(Outcome::Fail, |c| Outcome::Return(Value::Ref(c))))
        }
        other => Err(Raised::exception("cannot index value", vec![other])),
    }
}

fn slice(args: &[Value]) -> Step {
    let bounds = |len: usize| -> Result<Option<(usize, usize)>, Raised> {
        let i = position(args[1].to_number()?, len);
        let j = position(args[2].to_number()?, len);
        Ok(i.zip(j).map(|(i, j)| (i.min(j) - 1, i.max(j) - 1)))
    };
    match args[0].clone().deref() {
        Value::List(list) => {
            let values = list.values();
            Ok(match bounds(values.len())? {
                Some((from, to)) => Outcome::Return(Value::from(values[from..to].to_vec())),
                None => Outcome::Fail,
            })
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            Ok(match bounds(chars.len())? {
                Some((from, to)) => Outcome::Return(Value::from(chars[from..to].iter().collect::<String>())),
                None => Outcome::Fail,
            })
        }
        other => Err(Raised::exception("cannot slice value", vec![other])),
    }
}

fn same(args: &[Value]) -> Step {
    let a = args[0].clone().deref();
    Ok(if a.identical(&args[1]) {
        Outcome::Return(args[1].clone())
    } else {
        Outcome::Fail
    })
}

fn not_same(args: &[Value]) -> Step {
    let a = args[0].clone().deref();
    Ok(if a.identical(&args[1]) {
        Outcome::Fail
    } else {
        Outcome::Return(args[1].clone())
    })
}

/* ===================== Miscellaneous ===================== */

fn size(args: &[Value]) -> Result<Value, Raised> {
    let n = match &args[0] {
        Value::List(list) => list.len(),
        Value::Str(s) => s.chars().count(),
        Value::Record(record) => record.len(),
        other => return Err(Raised::exception("size of value not defined", vec![other.clone()])),
    };
    Ok(Value::Number(n as f64))
}

fn is_nil(args: &[Value]) -> Step {
    Ok(if args[0].is_nil() {
        Outcome::Return(Value::Nil)
    } else {
        Outcome::Fail
    })
}

fn not_nil(args: &[Value]) -> Step {
    Ok(if args[0].is_nil() {
        Outcome::Fail
    } else {
        Outcome::Return(args[0].clone())
    })
}

/* ===================== Generators ===================== */

fn cells_from(list: List, k: usize) -> Step {
    Ok(match list.cell(k) {
        Some(cell) => Outcome::Suspend(
            Value::Ref(cell),
            Continuation::new(move || cells_from(list, k + 1)),
        ),
        None => Outcome::Fail,
    })
}

fn values_from(items: Arc<Vec<Value>>, k: usize) -> Step {
    Ok(match items.get(k).cloned() {
        Some(value) => Outcome::Suspend(value, Continuation::new(move || values_from(items, k + 1))),
        None => Outcome::Fail,
    })
}

/// Generate each element: list and record elements as variables, string
/// characters as values
fn elements(args: &[Value]) -> Step {
    match &args[0] {
        Value::List(list) => cells_from(list.clone(), 0),
        Value::Record(record) => {
            let cells = (0..record.len())
                .filter_map(|k| record.field_at(k))
                .map(Value::Ref)
                .collect();
            values_from(Arc::new(cells), 0)
        }
        Value::Str(s) => {
            let chars = s.chars().map(|c| Value::from(c.to_string())).collect();
            values_from(Arc::new(chars), 0)
        }
        other => Err(Raised::exception("cannot generate elements of value", vec![other.clone()])),
    }
}

fn count(from: f64, to: f64) -> Step {
    Ok(if from > to {
        Outcome::Fail
    } else {
        Outcome::Suspend(
            Value::Number(from),
            Continuation::new(move || count(from + 1.0, to)),
        )
    })
}

fn to(args: &[Value]) -> Step {
    let (from, to) = numbers(args)?;
    count(from, to)
}

/// Next value of a co-expression, or next value received from a channel
fn activate(args: &[Value]) -> Step {
    match &args[0] {
        Value::CoExpr(co) => co.activate(),
        Value::Channel(channel) => Ok(channel.receive().map_or(Outcome::Fail, Outcome::Return)),
        other => Err(Raised::exception("co-expression expected", vec![other.clone()])),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_entry_is_keyed_by_arity_and_name() {
        for (key, op) in table() {
            assert_eq!(key, &op.key());
            assert!(op.raw.iter().all(|&i| i < op.arity), "{key}");
        }
    }

    #[test]
    fn test_element_and_position() {
        assert_eq!(element(1.0, 3), Some(0));
        assert_eq!(element(-1.0, 3), Some(2));
        assert_eq!(element(0.0, 3), None);
        assert_eq!(element(4.0, 3), None);
        assert_eq!(position(0.0, 3), Some(4));
        assert_eq!(position(-3.0, 3), Some(1));
        assert_eq!(position(5.0, 3), None);
    }
}

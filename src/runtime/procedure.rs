//! Procedures and the calling contract
//!
//! - `ProcedureIr`: procedure metadata as handed over by the front-end
//! - `ProcedureInfo`: the linked, immutable form shared by all activations
//! - `Callable`: the one signature every invocable value presents
//! - `Native`: host functions wrapped to present that signature

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::engine;
use super::env::Environment;
use super::error::Raised;
use super::frame::Frame;
use super::instruction::{Instruction, Label};
use super::namespace::{qualify, Namespace};
use super::outcome::{Outcome, Step};
use super::value::{Cell, Record, Value};

/* ===================== Calling Contract ===================== */

/// Anything that can be invoked under the suspension protocol
///
/// `names` labels the trailing `names.len()` arguments as keyword arguments.
pub trait Callable: Send + Sync {
    fn name(&self) -> &str;

    fn call(self: Arc<Self>, env: &Arc<Environment>, args: Vec<Value>, names: &[String]) -> Step;
}

/* ===================== Procedure Metadata ===================== */

/// One labelled instruction chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub label: Label,
    pub body: Vec<Instruction>,
}

/// Procedure as produced by the front-end
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcedureIr {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub params: Vec<String>,
    #[serde(default)]
    pub locals: Vec<String>,
    #[serde(default)]
    pub statics: Vec<String>,
    #[serde(default)]
    pub variadic: bool,
    /// Number of temporary slots
    #[serde(default)]
    pub temps: usize,
    pub entry: Label,
    pub chunks: Vec<Chunk>,
    /// Global names this procedure refers to
    #[serde(default)]
    pub deps: Vec<String>,
}

/// Linked procedure metadata, immutable after link time
#[derive(Debug)]
pub struct ProcedureInfo {
    pub name: String,
    pub qualified: String,
    pub namespace: String,
    pub params: Vec<String>,
    pub locals: Vec<String>,
    pub statics: Vec<String>,
    pub variadic: bool,
    pub temps: usize,
    pub entry: Label,
    pub deps: Vec<String>,
    chunks: HashMap<Label, Vec<Instruction>>,
}

impl ProcedureInfo {
    /// Validate and index the front-end's chunks
    ///
    /// Duplicate chunk labels, transfers to undeclared labels and slots
    /// beyond the temporary count are malformed IR.
    pub fn from_ir(ir: ProcedureIr) -> Result<Self, Raised> {
        let qualified = qualify(&ir.namespace, &ir.name);
        let mut chunks = HashMap::with_capacity(ir.chunks.len());
        for chunk in ir.chunks {
            if chunks.contains_key(&chunk.label) {
                return Err(Raised::malfunction(format!(
                    "duplicate chunk label {} in {qualified}",
                    chunk.label
                )));
            }
            chunks.insert(chunk.label, chunk.body);
        }

        if !chunks.contains_key(&ir.entry) {
            return Err(Raised::malfunction(format!(
                "entry label {} not declared in {qualified}",
                ir.entry
            )));
        }

        for (label, body) in &chunks {
            for insn in body {
                if let Some(missing) = insn.labels().into_iter().find(|l| !chunks.contains_key(*l)) {
                    return Err(Raised::malfunction(format!(
                        "chunk {label} of {qualified} refers to undeclared label {missing}"
                    )));
                }
                if let Some(slot) = insn.slots().into_iter().find(|s| *s >= ir.temps) {
                    return Err(Raised::malfunction(format!(
                        "chunk {label} of {qualified} uses slot {slot} of {}",
                        ir.temps
                    )));
                }
            }
        }

        Ok(ProcedureInfo {
            name: ir.name,
            qualified,
            namespace: ir.namespace,
            params: ir.params,
            locals: ir.locals,
            statics: ir.statics,
            variadic: ir.variadic,
            temps: ir.temps,
            entry: ir.entry,
            deps: ir.deps,
            chunks,
        })
    }

    pub fn chunk(&self, label: &str) -> Result<&[Instruction], Raised> {
        self.chunks.get(label).map(Vec::as_slice).ok_or_else(|| {
            Raised::malfunction(format!("no chunk {label} in {}", self.qualified))
        })
    }
}

/* ===================== Procedures ===================== */

/// A linked procedure: metadata, shared statics and its lookup scopes
pub struct Procedure {
    pub info: ProcedureInfo,
    statics: HashMap<String, Cell>,
    namespace: Arc<Namespace>,
    root: Arc<Namespace>,
}

impl Procedure {
    pub fn new(info: ProcedureInfo, namespace: Arc<Namespace>, root: Arc<Namespace>) -> Arc<Self> {
        let statics = info
            .statics
            .iter()
            .map(|name| (name.clone(), Cell::new(Value::Nil)))
            .collect();
        Arc::new(Procedure {
            info,
            statics,
            namespace,
            root,
        })
    }

    /// Static variable, shared by every activation
    pub fn static_cell(&self, name: &str) -> Option<&Cell> {
        self.statics.get(name)
    }

    /// Global lookup: owning namespace first, then the root namespace
    pub fn global(&self, name: &str) -> Option<Cell> {
        self.namespace.get(name).or_else(|| self.root.get(name))
    }

    /// Bind call arguments to fresh parameter and local cells
    fn bind(&self, mut args: Vec<Value>, names: &[String]) -> Result<HashMap<String, Cell>, Raised> {
        let info = &self.info;
        if names.len() > args.len() {
            return Err(Raised::malfunction(format!(
                "call to {} names {} arguments but passes {}",
                info.qualified,
                names.len(),
                args.len()
            )));
        }
        let keyword = args.split_off(args.len() - names.len());
        let mut positional = args;

        let mut vars = HashMap::with_capacity(info.params.len() + info.locals.len());
        let fixed = if info.variadic {
            info.params.len().saturating_sub(1)
        } else {
            info.params.len()
        };
        let surplus = if info.variadic && positional.len() > fixed {
            positional.split_off(fixed)
        } else {
            Vec::new()
        };

        let mut given = positional.into_iter();
        for param in &info.params[..fixed] {
            vars.insert(param.clone(), Cell::new(given.next().unwrap_or(Value::Nil)));
        }
        if info.variadic {
            if let Some(rest) = info.params.last() {
                vars.insert(rest.clone(), Cell::new(Value::from(surplus)));
            }
        }

        for (name, value) in names.iter().zip(keyword) {
            match vars.get(name) {
                Some(cell) => cell.set(value),
                None => {
                    return Err(Raised::exception(
                        format!("{} has no parameter named {name}", info.qualified),
                        vec![value],
                    ))
                }
            }
        }

        for local in &info.locals {
            vars.insert(local.clone(), Cell::new(Value::Nil));
        }
        Ok(vars)
    }
}

impl Callable for Procedure {
    fn name(&self) -> &str {
        &self.info.qualified
    }

    fn call(self: Arc<Self>, env: &Arc<Environment>, args: Vec<Value>, names: &[String]) -> Step {
        let vars = self.bind(args.clone(), names)?;
        let entry = self.info.entry.clone();
        let frame = Frame::new(Arc::clone(env), self, args, vars);
        engine::activate(frame, entry)
    }
}

impl fmt::Debug for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Procedure({})", self.info.qualified)
    }
}

/* ===================== Records ===================== */

/// Record constructor declared by the program
#[derive(Debug)]
pub struct RecordType {
    pub name: String,
    pub fields: Vec<String>,
}

impl Callable for RecordType {
    fn name(&self) -> &str {
        &self.name
    }

    fn call(self: Arc<Self>, _env: &Arc<Environment>, args: Vec<Value>, names: &[String]) -> Step {
        let mut values: Vec<Value> = vec![Value::Nil; self.fields.len()];
        let positional = args.len().saturating_sub(names.len());
        for (i, value) in args.into_iter().enumerate() {
            let index = if i < positional {
                Some(i)
            } else {
                let name = &names[i - positional];
                let index = self.fields.iter().position(|f| f == name);
                if index.is_none() {
                    return Err(Raised::exception(
                        format!("record {} has no field {name}", self.name),
                        vec![value],
                    ));
                }
                index
            };
            if let Some(slot) = index.and_then(|i| values.get_mut(i)) {
                *slot = value;
            }
        }
        let fields = self.fields.iter().cloned().zip(values).collect();
        Ok(Outcome::Return(Value::Record(Record::new(&self.name, fields))))
    }
}

/* ===================== Native Functions ===================== */

type NativeFn = dyn Fn(&Arc<Environment>, Vec<Value>) -> Step + Send + Sync;

/// Host function presenting the standard calling contract
pub struct Native {
    name: String,
    func: Box<NativeFn>,
}

impl Native {
    pub fn new<F>(name: &str, func: F) -> Arc<Self>
    where
        F: Fn(&Arc<Environment>, Vec<Value>) -> Step + Send + Sync + 'static,
    {
        Arc::new(Native {
            name: name.to_string(),
            func: Box::new(func),
        })
    }

    /// Wrap a one-argument host function with automatic conversion
    pub fn unary<A, R>(name: &str, f: fn(A) -> R) -> Arc<Self>
    where
        A: FromValue + 'static,
        R: IntoOutcome + 'static,
    {
        Native::new(name, move |_env, args| {
            let mut args = args.into_iter();
            let a = A::from_value(args.next().unwrap_or(Value::Nil))?;
            f(a).into_outcome()
        })
    }

    /// Wrap a two-argument host function with automatic conversion
    pub fn binary<A, B, R>(name: &str, f: fn(A, B) -> R) -> Arc<Self>
    where
        A: FromValue + 'static,
        B: FromValue + 'static,
        R: IntoOutcome + 'static,
    {
        Native::new(name, move |_env, args| {
            let mut args = args.into_iter();
            let a = A::from_value(args.next().unwrap_or(Value::Nil))?;
            let b = B::from_value(args.next().unwrap_or(Value::Nil))?;
            f(a, b).into_outcome()
        })
    }
}

impl Callable for Native {
    fn name(&self) -> &str {
        &self.name
    }

    fn call(self: Arc<Self>, env: &Arc<Environment>, args: Vec<Value>, names: &[String]) -> Step {
        if !names.is_empty() {
            return Err(Raised::exception(
                format!("{} does not accept keyword arguments", self.name),
                Vec::new(),
            ));
        }
        let args = args.into_iter().map(Value::deref).collect();
        (self.func)(env, args)
    }
}

/// Conversion from a runtime value into a host argument
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self, Raised>;
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self, Raised> {
        Ok(value.deref())
    }
}

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self, Raised> {
        value.to_number()
    }
}

impl FromValue for i64 {
    fn from_value(value: Value) -> Result<Self, Raised> {
        Ok(value.to_number()?.trunc() as i64)
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self, Raised> {
        Ok(value.to_text()?.to_string())
    }
}

/// Conversion from a host result into a protocol outcome
pub trait IntoOutcome {
    fn into_outcome(self) -> Step;
}

impl IntoOutcome for Value {
    fn into_outcome(self) -> Step {
        Ok(Outcome::Return(self))
    }
}

impl IntoOutcome for f64 {
    fn into_outcome(self) -> Step {
        Ok(Outcome::Return(Value::Number(self)))
    }
}

impl IntoOutcome for String {
    fn into_outcome(self) -> Step {
        Ok(Outcome::Return(Value::from(self)))
    }
}

/// `None` fails
impl<T: IntoOutcome> IntoOutcome for Option<T> {
    fn into_outcome(self) -> Step {
        match self {
            Some(v) => v.into_outcome(),
            None => Ok(Outcome::Fail),
        }
    }
}

impl<T: IntoOutcome> IntoOutcome for Result<T, Raised> {
    fn into_outcome(self) -> Step {
        self?.into_outcome()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::instruction::Literal;

    fn ir(chunks: Vec<Chunk>, temps: usize) -> ProcedureIr {
        ProcedureIr {
            name: "p".to_string(),
            namespace: String::new(),
            params: Vec::new(),
            locals: Vec::new(),
            statics: Vec::new(),
            variadic: false,
            temps,
            entry: "L0".to_string(),
            chunks,
            deps: Vec::new(),
        }
    }

    #[test]
    fn test_duplicate_chunk_label_is_malfunction() {
        let chunk = Chunk {
            label: "L0".to_string(),
            body: vec![Instruction::Fail],
        };
        let err = ProcedureInfo::from_ir(ir(vec![chunk.clone(), chunk], 0)).unwrap_err();
        assert!(err.is_malfunction());
        assert!(err.message().contains("duplicate"));
    }

    #[test]
    fn test_undeclared_label_is_malfunction() {
        let chunk = Chunk {
            label: "L0".to_string(),
            body: vec![Instruction::Goto {
                target: "nowhere".to_string(),
            }],
        };
        let err = ProcedureInfo::from_ir(ir(vec![chunk], 0)).unwrap_err();
        assert!(err.is_malfunction());
    }

    #[test]
    fn test_slot_out_of_range_is_malfunction() {
        let chunk = Chunk {
            label: "L0".to_string(),
            body: vec![
                Instruction::Literal {
                    lhs: 3,
                    value: Literal::Nil,
                },
                Instruction::Fail,
            ],
        };
        assert!(ProcedureInfo::from_ir(ir(vec![chunk], 2)).is_err());
    }
}

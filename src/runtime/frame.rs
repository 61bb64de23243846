//! Activation frames
//!
//! A frame is split in two partitions:
//! - owned: parameters, locals and scoped locals, plus temporaries; copied
//!   when a co-expression is spawned
//! - shared: statics (held by the procedure) and globals (held by the
//!   namespaces); always reached by reference

use std::collections::HashMap;
use std::sync::Arc;

use super::coexpr::CoOutput;
use super::env::Environment;
use super::error::{Raised, TraceFrame};
use super::instruction::{Label, Slot};
use super::outcome::Continuation;
use super::procedure::Procedure;
use super::value::{Cell, Value};

/* ===================== Temporaries ===================== */

/// Content of one temporary slot
#[derive(Default)]
pub enum Temp {
    #[default]
    Empty,
    Value(Value),
    Next(Continuation),
    Label(Label),
}

/// Bindings displaced by a nested scope, restored when it exits
struct SavedScope {
    scope: String,
    shadowed: Vec<(String, Option<Cell>)>,
    env: Option<Arc<Environment>>,
}

/* ===================== Frame ===================== */

/// One procedure activation
pub struct Frame {
    pub env: Arc<Environment>,
    pub procedure: Arc<Procedure>,
    pub args: Vec<Value>,
    vars: HashMap<String, Cell>,
    scopes: Vec<SavedScope>,
    temps: Vec<Temp>,
    /// Current source location
    pub coord: String,
    /// Value that triggered the last error, for diagnostics
    pub offender: Option<Value>,
    /// Output queue when this frame runs a co-expression
    pub output: Option<CoOutput>,
    /// Recovery procedure installed by `Catch`
    pub recovery: Option<Value>,
}

impl Frame {
    pub fn new(
        env: Arc<Environment>,
        procedure: Arc<Procedure>,
        args: Vec<Value>,
        vars: HashMap<String, Cell>,
    ) -> Self {
        let temps = std::iter::repeat_with(Temp::default)
            .take(procedure.info.temps)
            .collect();
        Frame {
            env,
            procedure,
            args,
            vars,
            scopes: Vec::new(),
            temps,
            coord: String::new(),
            offender: None,
            output: None,
            recovery: None,
        }
    }

    fn slot_mut(&mut self, slot: Slot) -> Result<&mut Temp, Raised> {
        let name = &self.procedure.info.qualified;
        let len = self.temps.len();
        self.temps.get_mut(slot).ok_or_else(|| {
            Raised::malfunction(format!("slot {slot} out of range ({len}) in {name}"))
        })
    }

    /// Value held in a slot, as stored (variables are not dereferenced)
    pub fn value(&self, slot: Slot) -> Result<Value, Raised> {
        match self.temps.get(slot) {
            Some(Temp::Value(v)) => Ok(v.clone()),
            _ => Err(Raised::malfunction(format!(
                "slot {slot} holds no value in {}",
                self.procedure.info.qualified
            ))),
        }
    }

    pub fn set(&mut self, slot: Slot, value: Value) -> Result<(), Raised> {
        *self.slot_mut(slot)? = Temp::Value(value);
        Ok(())
    }

    /// Store a continuation, or clear the slot
    pub fn set_next(&mut self, slot: Slot, next: Option<Continuation>) -> Result<(), Raised> {
        *self.slot_mut(slot)? = match next {
            Some(k) => Temp::Next(k),
            None => Temp::Empty,
        };
        Ok(())
    }

    /// Take the continuation out of a slot, leaving it empty
    pub fn take_next(&mut self, slot: Slot) -> Result<Option<Continuation>, Raised> {
        match std::mem::take(self.slot_mut(slot)?) {
            Temp::Next(k) => Ok(Some(k)),
            Temp::Empty => Ok(None),
            other => {
                *self.slot_mut(slot)? = other;
                Err(Raised::malfunction(format!(
                    "slot {slot} holds no continuation in {}",
                    self.procedure.info.qualified
                )))
            }
        }
    }

    pub fn set_label(&mut self, slot: Slot, label: Label) -> Result<(), Raised> {
        *self.slot_mut(slot)? = Temp::Label(label);
        Ok(())
    }

    pub fn label(&self, slot: Slot) -> Result<&Label, Raised> {
        match self.temps.get(slot) {
            Some(Temp::Label(l)) => Ok(l),
            _ => Err(Raised::malfunction(format!(
                "slot {slot} holds no label in {}",
                self.procedure.info.qualified
            ))),
        }
    }

    /* ===================== Name Resolution ===================== */

    /// Resolve a name to its storage cell: frame bindings, statics, the
    /// procedure's namespace, then the root namespace
    pub fn lookup(&self, name: &str) -> Result<Value, Raised> {
        if let Some(cell) = self.vars.get(name) {
            return Ok(Value::Ref(cell.clone()));
        }
        if let Some(cell) = self.procedure.static_cell(name) {
            return Ok(Value::Ref(cell.clone()));
        }
        if let Some(cell) = self.procedure.global(name) {
            return Ok(Value::Ref(cell));
        }
        Err(Raised::malfunction(format!(
            "unresolved name {name} in {}",
            self.procedure.info.qualified
        )))
    }

    /* ===================== Scopes ===================== */

    /// Open a nested block with fresh locals and optional dynamic variables
    pub fn enter_scope(&mut self, scope: &str, names: &[String], dynamics: &[String]) {
        let shadowed = names
            .iter()
            .map(|name| {
                let previous = self.vars.insert(name.clone(), Cell::new(Value::Nil));
                (name.clone(), previous)
            })
            .collect();
        let env = if dynamics.is_empty() {
            None
        } else {
            let nested = Environment::nested(&self.env, dynamics);
            Some(std::mem::replace(&mut self.env, nested))
        };
        self.scopes.push(SavedScope {
            scope: scope.to_string(),
            shadowed,
            env,
        });
    }

    /// Close the innermost block, which must be `scope`
    pub fn exit_scope(&mut self, scope: &str) -> Result<(), Raised> {
        let saved = match self.scopes.pop() {
            Some(saved) if saved.scope == scope => saved,
            Some(saved) => {
                return Err(Raised::malfunction(format!(
                    "exit from scope {scope} while {} is innermost in {}",
                    saved.scope, self.procedure.info.qualified
                )))
            }
            None => {
                return Err(Raised::malfunction(format!(
                    "exit from scope {scope} with no open scope in {}",
                    self.procedure.info.qualified
                )))
            }
        };
        for (name, previous) in saved.shadowed {
            match previous {
                Some(cell) => self.vars.insert(name, cell),
                None => self.vars.remove(&name),
            };
        }
        if let Some(env) = saved.env {
            self.env = env;
        }
        Ok(())
    }

    /* ===================== Duplication ===================== */

    /// Copy for a newly spawned co-expression task
    ///
    /// Parameters, locals and temporaries get independent storage holding
    /// the current values; statics and globals stay shared through the
    /// procedure. Pending continuations are not carried over.
    pub fn dup(&self, env: Arc<Environment>, output: CoOutput) -> Frame {
        let vars = self
            .vars
            .iter()
            .map(|(name, cell)| (name.clone(), cell.duplicate()))
            .collect();
        let scopes = self
            .scopes
            .iter()
            .map(|saved| SavedScope {
                scope: saved.scope.clone(),
                shadowed: saved
                    .shadowed
                    .iter()
                    .map(|(name, cell)| (name.clone(), cell.as_ref().map(Cell::duplicate)))
                    .collect(),
                env: saved.env.clone(),
            })
            .collect();
        let temps = self
            .temps
            .iter()
            .map(|temp| match temp {
                Temp::Value(v) => Temp::Value(v.clone()),
                Temp::Label(l) => Temp::Label(l.clone()),
                Temp::Empty | Temp::Next(_) => Temp::Empty,
            })
            .collect();
        Frame {
            env,
            procedure: Arc::clone(&self.procedure),
            args: self.args.clone(),
            vars,
            scopes,
            temps,
            coord: self.coord.clone(),
            offender: None,
            output: Some(output),
            recovery: self.recovery.clone(),
        }
    }

    /// Traceback entry describing this activation
    pub fn trace_frame(&self) -> TraceFrame {
        TraceFrame {
            procedure: self.procedure.info.qualified.clone(),
            args: self.args.iter().map(Value::image).collect(),
            coord: self.coord.clone(),
            offender: self.offender.as_ref().map(Value::image),
        }
    }
}

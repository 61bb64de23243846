//! # Execution Engine
//!
//! Walks the instruction chunks of one activation until it fails, returns,
//! or suspends. Suspension moves the frame into a continuation bound to the
//! resume label; invoking it re-enters [`run`] at that label with every
//! temporary and binding intact.
//!
//! ## Control Transfer
//!
//! Every chunk must end in an instruction that transfers control (`Goto`,
//! `Succeed`, `Fail`, `CoFail`, ...). Falling off the end is a malfunction.
//!
//! ## Errors
//!
//! A raised exception first goes to the activation's recovery procedure if
//! one was installed with `Catch`; its result becomes the activation's
//! result. Malfunctions skip recovery. Whatever propagates picks up one
//! traceback frame per activation.

use std::sync::Arc;

use tracing::{debug, trace};

use super::channel::Channel;
use super::coexpr;
use super::env::Environment;
use super::error::Raised;
use super::frame::Frame;
use super::instruction::{Instruction, Label, Literal, SelectCase, Slot};
use super::operators;
use super::outcome::{Continuation, Outcome, Step};
use super::select::{self, Choice, WaitCase};
use super::value::Value;

/* ===================== Control Flow ===================== */

/// How a run of the dispatch loop ended
#[derive(Debug)]
pub enum Flow {
    Fail,
    Return(Value),
    /// Produced a value; resume at the label
    Suspend(Value, Label),
}

/// What the dispatch loop does after one instruction
enum Next {
    Continue,
    Goto(Label),
    Done(Flow),
}

/// Run an activation from `label`, under the suspension protocol
pub fn activate(mut frame: Frame, label: Label) -> Step {
    trace!(procedure = %frame.procedure.info.qualified, %label, "activate");
    match run(&mut frame, label) {
        Ok(Flow::Fail) => Ok(Outcome::Fail),
        Ok(Flow::Return(value)) => Ok(Outcome::Return(value)),
        Ok(Flow::Suspend(value, resume)) => Ok(Outcome::Suspend(
            value,
            Continuation::new(move || activate(frame, resume)),
        )),
        Err(raised) => recover(frame, raised),
    }
}

/// Hand an exception to the installed recovery procedure, or propagate
fn recover(mut frame: Frame, raised: Raised) -> Step {
    if let Raised::Exception(exception) = &raised {
        if frame.offender.is_none() {
            frame.offender = exception.offending.first().cloned();
        }
        if let Some(handler) = frame.recovery.take() {
            debug!(
                procedure = %frame.procedure.info.qualified,
                cause = %exception.cause,
                "recovering from exception"
            );
            let mut args = vec![exception.cause.clone()];
            args.extend(exception.offending.iter().cloned());
            return call(&frame.env, &handler, args, &[])
                .map_err(|raised| raised.with_frame(frame.trace_frame()));
        }
    }
    Err(raised.with_frame(frame.trace_frame()))
}

/// Invoke a callable value
pub fn call(env: &Arc<Environment>, callee: &Value, args: Vec<Value>, names: &[String]) -> Step {
    match callee.clone().deref().as_callable() {
        Some(callable) => callable.call(env, args, names),
        None => Err(Raised::exception(
            "procedure expected",
            vec![callee.clone().deref()],
        )),
    }
}

/// The dispatch loop
pub fn run(frame: &mut Frame, mut label: Label) -> Result<Flow, Raised> {
    let procedure = Arc::clone(&frame.procedure);
    loop {
        let chunk = procedure.info.chunk(&label)?;
        let mut target = None;
        for insn in chunk {
            match step(frame, insn)? {
                Next::Continue => {}
                Next::Goto(next) => {
                    target = Some(next);
                    break;
                }
                Next::Done(flow) => return Ok(flow),
            }
        }
        match target {
            Some(next) => {
                trace!(from = %label, to = %next, "goto");
                label = next;
            }
            None => {
                return Err(Raised::malfunction(format!(
                    "fell off the end of chunk {label} in {}",
                    procedure.info.qualified
                )))
            }
        }
    }
}

/// Failure of an instruction: jump to its fail label or fail the activation
fn failed(fail_label: &Option<Label>) -> Next {
    match fail_label {
        Some(label) => Next::Goto(label.clone()),
        None => Next::Done(Flow::Fail),
    }
}

/// Store an outcome into the destination slots
fn deliver(
    frame: &mut Frame,
    lhs: Option<Slot>,
    lhs_next: Option<Slot>,
    outcome: Outcome,
    fail_label: &Option<Label>,
) -> Result<Next, Raised> {
    let (value, next) = outcome.into_parts();
    match value {
        Some(value) => {
            if let Some(slot) = lhs {
                frame.set(slot, value)?;
            }
            if let Some(slot) = lhs_next {
                frame.set_next(slot, next)?;
            }
            Ok(Next::Continue)
        }
        None => {
            if let Some(slot) = lhs_next {
                frame.set_next(slot, None)?;
            }
            Ok(failed(fail_label))
        }
    }
}

fn literal(value: &Literal) -> Value {
    match value {
        Literal::Nil => Value::Nil,
        Literal::Num(n) => Value::Number(*n),
        Literal::Str(s) => Value::from(s.as_str()),
    }
}

/* ===================== Instructions ===================== */

fn step(frame: &mut Frame, insn: &Instruction) -> Result<Next, Raised> {
    match insn {
        Instruction::Literal { lhs, value } => {
            frame.set(*lhs, literal(value))?;
        }

        Instruction::Var { lhs, name } => {
            let value = frame.lookup(name)?;
            frame.set(*lhs, value)?;
        }

        Instruction::DynVar { lhs, name, lvalue } => {
            let value = frame.env.resolve(name, *lvalue)?;
            frame.set(*lhs, value)?;
        }

        Instruction::Field {
            lhs,
            expr,
            field,
            lvalue,
            fail_label,
        } => {
            let record = match frame.value(*expr)?.deref() {
                Value::Record(record) => record,
                other => return Err(Raised::exception("record expected", vec![other])),
            };
            match record.field(field) {
                Some(cell) if *lvalue => frame.set(*lhs, Value::Ref(cell))?,
                Some(cell) => frame.set(*lhs, cell.get())?,
                None => return Ok(failed(fail_label)),
            }
        }

        Instruction::Call {
            lhs,
            lhs_next,
            callee,
            args,
            names,
            fail_label,
        } => {
            let callee = frame.value(*callee)?;
            let args = args
                .iter()
                .map(|slot| frame.value(*slot).map(Value::deref))
                .collect::<Result<Vec<_>, _>>()?;
            let outcome = call(&frame.env, &callee, args, names)?;
            return deliver(frame, *lhs, *lhs_next, outcome, fail_label);
        }

        Instruction::Operator {
            lhs,
            lhs_next,
            op,
            args,
            fail_label,
        } => {
            let args = args
                .iter()
                .map(|slot| frame.value(*slot))
                .collect::<Result<Vec<_>, _>>()?;
            let outcome = operators::invoke(op, args)?;
            return deliver(frame, *lhs, *lhs_next, outcome, fail_label);
        }

        Instruction::Resume {
            lhs,
            lhs_next,
            next,
            fail_label,
        } => {
            let outcome = match frame.take_next(*next)? {
                Some(k) => k.resume()?,
                None => Outcome::Fail,
            };
            return deliver(frame, *lhs, *lhs_next, outcome, fail_label);
        }

        Instruction::Move { lhs, rhs } => {
            let value = frame.value(*rhs)?;
            frame.set(*lhs, value)?;
        }

        Instruction::Deref { lhs, value } => {
            let value = frame.value(*value)?.deref();
            frame.set(*lhs, value)?;
        }

        Instruction::MoveLabel { lhs, label } => {
            frame.set_label(*lhs, label.clone())?;
        }

        Instruction::Goto { target } => return Ok(Next::Goto(target.clone())),

        Instruction::IndirectGoto { target, targets } => {
            let label = frame.label(*target)?;
            if !targets.contains(label) {
                return Err(Raised::malfunction(format!(
                    "indirect goto to {label} outside its target set in {}",
                    frame.procedure.info.qualified
                )));
            }
            return Ok(Next::Goto(label.clone()));
        }

        Instruction::Succeed { expr, resume } => {
            let value = match expr {
                Some(slot) => frame.value(*slot)?.deref(),
                None => Value::Nil,
            };
            return Ok(Next::Done(match resume {
                Some(label) => Flow::Suspend(value, label.clone()),
                None => Flow::Return(value),
            }));
        }

        Instruction::Fail => return Ok(Next::Done(Flow::Fail)),

        Instruction::EnterScope {
            scope,
            names,
            dynamics,
        } => frame.enter_scope(scope, names, dynamics),

        Instruction::ExitScope { scope } => frame.exit_scope(scope)?,

        Instruction::Create { lhs, entry } => {
            let co = coexpr::create(frame, entry.clone())?;
            frame.set(*lhs, Value::CoExpr(co))?;
        }

        Instruction::CoReturn { value, resume } => {
            let value = frame.value(*value)?.deref();
            let output = frame.output.as_mut().ok_or_else(|| {
                Raised::malfunction("co-expression return outside a co-expression")
            })?;
            if output.deliver(value) {
                return Ok(Next::Goto(resume.clone()));
            }
            debug!(id = output.id(), "consumer abandoned co-expression");
            frame.output = None;
            return Ok(Next::Done(Flow::Fail));
        }

        Instruction::CoFail => {
            if frame.output.take().is_none() {
                return Err(Raised::malfunction(
                    "co-expression failure outside a co-expression",
                ));
            }
            return Ok(Next::Done(Flow::Fail));
        }

        Instruction::Select { cases, fail_label } => {
            return select(frame, cases, fail_label);
        }

        Instruction::Catch { handler } => {
            frame.recovery = Some(frame.value(*handler)?.deref());
        }

        Instruction::Coord { coord } => {
            frame.coord = coord.clone();
        }
    }
    Ok(Next::Continue)
}

fn channel_operand(frame: &Frame, slot: Slot) -> Result<Channel, Raised> {
    match frame.value(slot)?.deref() {
        Value::Channel(channel) => Ok(channel),
        other => Err(Raised::exception("channel expected", vec![other])),
    }
}

fn select(frame: &mut Frame, cases: &[SelectCase], fail_label: &Option<Label>) -> Result<Next, Raised> {
    let waits = cases
        .iter()
        .map(|case| {
            Ok(match case {
                SelectCase::Send { channel, value, .. } => {
                    WaitCase::Send(channel_operand(frame, *channel)?, frame.value(*value)?.deref())
                }
                SelectCase::Receive { channel, .. } => {
                    WaitCase::Receive(channel_operand(frame, *channel)?)
                }
                SelectCase::Default { .. } => WaitCase::Default,
            })
        })
        .collect::<Result<Vec<_>, Raised>>()?;

    let handle = frame.env.pool().handle().clone();
    match select::choose(&handle, waits) {
        Choice::Case(index, received) => {
            let case = &cases[index];
            if let (SelectCase::Receive { lhs, .. }, Some(value)) = (case, received) {
                match frame.value(*lhs) {
                    Ok(Value::Ref(cell)) => cell.set(value),
                    _ => frame.set(*lhs, value)?,
                }
            }
            Ok(Next::Goto(case.body().clone()))
        }
        Choice::Fail => Ok(failed(fail_label)),
    }
}

//! Suspension protocol
//!
//! The `(value, continuation)` pair every callable and operator returns:
//! - no value, no continuation: failure
//! - a value, no continuation: a simple return
//! - a value and a continuation: suspension; invoking the continuation
//!   produces the next result by the same rules

use std::fmt;

use super::error::Raised;
use super::value::Value;

/// The universal return type: an outcome, or a raised error
pub type Step = Result<Outcome, Raised>;

/* ===================== Outcome ===================== */

/// Result of one call, operator invocation or resumption
pub enum Outcome {
    /// No value and nothing left to resume
    Fail,
    /// A single value; the producer cannot be resumed
    Return(Value),
    /// A value plus a handle that yields the next outcome
    Suspend(Value, Continuation),
}

impl Outcome {
    /// Split into the raw protocol pair
    pub fn into_parts(self) -> (Option<Value>, Option<Continuation>) {
        match self {
            Outcome::Fail => (None, None),
            Outcome::Return(v) => (Some(v), None),
            Outcome::Suspend(v, k) => (Some(v), Some(k)),
        }
    }

    /// Rebuild an outcome from the raw pair
    ///
    /// A continuation without a value is not a valid pair and is treated as
    /// failure; the continuation is dropped.
    pub fn from_parts(value: Option<Value>, next: Option<Continuation>) -> Self {
        match (value, next) {
            (Some(v), Some(k)) => Outcome::Suspend(v, k),
            (Some(v), None) => Outcome::Return(v),
            (None, _) => Outcome::Fail,
        }
    }

    pub fn is_fail(&self) -> bool {
        matches!(self, Outcome::Fail)
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Outcome::Fail => None,
            Outcome::Return(v) | Outcome::Suspend(v, _) => Some(v),
        }
    }

    /// Drain a generator, collecting every value it produces
    pub fn collect(self) -> Result<Vec<Value>, Raised> {
        let mut values = Vec::new();
        let mut current = self;
        loop {
            match current {
                Outcome::Fail => return Ok(values),
                Outcome::Return(v) => {
                    values.push(v);
                    return Ok(values);
                }
                Outcome::Suspend(v, k) => {
                    values.push(v);
                    current = k.resume()?;
                }
            }
        }
    }
}

impl fmt::Debug for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Fail => write!(f, "Fail"),
            Outcome::Return(v) => write!(f, "Return({v:?})"),
            Outcome::Suspend(v, _) => write!(f, "Suspend({v:?}, ..)"),
        }
    }
}

/* ===================== Continuation ===================== */

/// A zero-argument resumable handle
///
/// Owns only closed-over state. Resuming consumes the handle, so a
/// continuation can never be invoked twice; the next handle (if any) comes
/// back inside the returned outcome.
pub struct Continuation(Box<dyn FnOnce() -> Step + Send>);

impl Continuation {
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() -> Step + Send + 'static,
    {
        Continuation(Box::new(f))
    }

    /// Produce the next outcome
    pub fn resume(self) -> Step {
        (self.0)()
    }
}

/// Resume a continuation held in an optional slot
///
/// An empty slot (never filled, or already exhausted) fails instead of
/// erroring.
pub fn resume_slot(slot: &mut Option<Continuation>) -> Step {
    match slot.take() {
        Some(k) => {
            let outcome = k.resume()?;
            let (value, next) = outcome.into_parts();
            *slot = next;
            Ok(match value {
                Some(v) => Outcome::Return(v),
                None => Outcome::Fail,
            })
        }
        None => Ok(Outcome::Fail),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn countdown(n: i64) -> Step {
        if n == 0 {
            return Ok(Outcome::Fail);
        }
        Ok(Outcome::Suspend(
            Value::from(n as f64),
            Continuation::new(move || countdown(n - 1)),
        ))
    }

    #[test]
    fn test_parts_round_trip_failure() {
        let (v, k) = Outcome::Fail.into_parts();
        assert!(v.is_none());
        assert!(k.is_none());
        assert!(Outcome::from_parts(None, None).is_fail());
    }

    #[test]
    fn test_resume_slot_exhausts_then_keeps_failing() {
        let (first, next) = countdown(2).unwrap().into_parts();
        assert_eq!(first.unwrap().as_number(), Some(2.0));

        let mut slot = next;
        let second = resume_slot(&mut slot).unwrap();
        assert_eq!(second.value().and_then(Value::as_number), Some(1.0));
        assert!(resume_slot(&mut slot).unwrap().is_fail());
        assert!(slot.is_none());
        assert!(resume_slot(&mut slot).unwrap().is_fail());
    }

    #[test]
    fn test_collect_drains_generator() {
        let values = countdown(3).unwrap().collect().unwrap();
        let numbers: Vec<f64> = values.iter().filter_map(Value::as_number).collect();
        assert_eq!(numbers, vec![3.0, 2.0, 1.0]);
    }
}

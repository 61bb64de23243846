//! # Runtime - Goal-Directed Execution Core
//!
//! Interprets linked procedure IR under the suspension protocol: every
//! activation fails, returns one value, or suspends with a continuation that
//! yields further values when invoked.
//!
//! ## Core Principles
//!
//! 1. **One calling convention**: every callable and operator returns a [`Step`]
//! 2. **Frames move into continuations**: a suspended activation is resumed by
//!    re-entering the dispatch loop at a saved label with the same frame
//! 3. **Co-expressions are tasks**: `create` spawns an independent task that
//!    talks to its consumer over rendezvous queues
//! 4. **Malfunctions are not exceptions**: internal invariant violations are
//!    never handed to user recovery procedures

pub mod channel;
pub mod coexpr;
pub mod engine;
pub mod env;
pub mod error;
pub mod frame;
pub mod init;
pub mod instruction;
pub mod namespace;
pub mod operators;
pub mod outcome;
pub mod procedure;
pub mod program;
pub mod select;
pub mod stdlib;
pub mod value;

#[cfg(test)]
mod tests;

// Re-export commonly used items
pub use env::Environment;
pub use error::{Exception, Malfunction, Raised, TraceFrame};
pub use instruction::{Instruction, Label, Literal, SelectCase, Slot};
pub use namespace::{Namespace, Registry};
pub use outcome::{Continuation, Outcome, Step};
pub use procedure::{Callable, Native, Procedure, ProcedureInfo, ProcedureIr};
pub use program::{shutdown, Program, ProgramIr};
pub use value::{Cell, Value};

pub mod cli;
pub mod config;
pub mod runtime;

// Re-export main types
pub use config::Config;
pub use runtime::{Outcome, Program, Raised, Step, Value};

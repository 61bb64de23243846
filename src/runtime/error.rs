//! Raised errors
//!
//! Two kinds travel the `Err` side of a [`Step`](super::Step):
//! - `Exception`: a language-level error a recovery procedure may catch
//! - `Malfunction`: an internal invariant violation, never user-catchable
//!
//! Both accrete one traceback frame per activation they pass through.

use std::fmt;

use thiserror::Error;

use super::value::Value;

/// Raised error
#[derive(Debug, Clone, Error)]
pub enum Raised {
    #[error("{0}")]
    Exception(Box<Exception>),

    #[error("{0}")]
    Malfunction(Box<Malfunction>),
}

/// Language-level exception
#[derive(Debug, Clone)]
pub struct Exception {
    /// Underlying cause, handed to a recovery procedure
    pub cause: Value,
    pub message: String,
    pub offending: Vec<Value>,
    /// Innermost activation first
    pub trace: Vec<TraceFrame>,
}

/// Internal invariant violation
#[derive(Debug, Clone)]
pub struct Malfunction {
    pub message: String,
    pub trace: Vec<TraceFrame>,
}

/// One activation an error passed through
#[derive(Debug, Clone, PartialEq)]
pub struct TraceFrame {
    pub procedure: String,
    pub args: Vec<String>,
    pub coord: String,
    pub offender: Option<String>,
}

impl Raised {
    /// Exception whose cause is its own message
    pub fn exception(message: impl Into<String>, offending: Vec<Value>) -> Self {
        let message = message.into();
        Raised::Exception(Box::new(Exception {
            cause: Value::from(message.as_str()),
            message,
            offending,
            trace: Vec::new(),
        }))
    }

    /// Exception carrying an arbitrary user value as its cause
    pub fn throw(cause: Value, offending: Vec<Value>) -> Self {
        Raised::Exception(Box::new(Exception {
            message: cause.to_string(),
            cause,
            offending,
            trace: Vec::new(),
        }))
    }

    pub fn malfunction(message: impl Into<String>) -> Self {
        Raised::Malfunction(Box::new(Malfunction {
            message: message.into(),
            trace: Vec::new(),
        }))
    }

    pub fn is_malfunction(&self) -> bool {
        matches!(self, Raised::Malfunction(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Raised::Exception(e) => &e.message,
            Raised::Malfunction(m) => &m.message,
        }
    }

    pub fn trace(&self) -> &[TraceFrame] {
        match self {
            Raised::Exception(e) => &e.trace,
            Raised::Malfunction(m) => &m.trace,
        }
    }

    /// Record the activation this error is leaving
    pub fn push_frame(&mut self, frame: TraceFrame) {
        match self {
            Raised::Exception(e) => e.trace.push(frame),
            Raised::Malfunction(m) => m.trace.push(frame),
        }
    }

    pub fn with_frame(mut self, frame: TraceFrame) -> Self {
        self.push_frame(frame);
        self
    }

    /// Multi-line diagnostic report for the top-level catcher
    pub fn report(&self, limit: usize) -> String {
        let mut out = match self {
            Raised::Exception(e) => {
                let mut s = format!("Run-time error: {}", e.message);
                for v in &e.offending {
                    s.push_str(&format!("\nOffending value: {}", v.image()));
                }
                s
            }
            Raised::Malfunction(m) => format!("Internal malfunction: {}", m.message),
        };
        let trace = self.trace();
        if !trace.is_empty() {
            out.push_str("\nTraceback:");
            for frame in trace.iter().take(limit) {
                out.push_str(&format!("\n  {frame}"));
            }
            if trace.len() > limit {
                out.push_str(&format!("\n  ... {} more", trace.len() - limit));
            }
        }
        out
    }

    /// Process exit code used when this error reaches the top level
    pub fn exit_code(&self) -> i32 {
        match self {
            Raised::Exception(_) => 1,
            Raised::Malfunction(_) => 2,
        }
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if !self.offending.is_empty() {
            let images: Vec<String> = self.offending.iter().map(Value::image).collect();
            write!(f, " (offending: {})", images.join(", "))?;
        }
        Ok(())
    }
}

impl fmt::Display for Malfunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malfunction: {}", self.message)
    }
}

impl fmt::Display for TraceFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.procedure, self.args.join(", "))?;
        if !self.coord.is_empty() {
            write!(f, " at {}", self.coord)?;
        }
        if let Some(offender) = &self.offender {
            write!(f, " [offending {offender}]")?;
        }
        Ok(())
    }
}

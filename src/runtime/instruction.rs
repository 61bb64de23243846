//! Instruction set
//!
//! The closed set of IR operations a procedure's chunks are built from.
//! Operands are numeric temporary slots, allocated append-only by the
//! front-end; each variant carries only the operands it uses.

use serde::{Deserialize, Serialize};

/// Index of a temporary slot in the frame
pub type Slot = usize;

/// Name of an instruction chunk
pub type Label = String;

/// Constant operand
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "k", content = "v")]
pub enum Literal {
    Nil,
    Num(f64),
    Str(String),
}

/// IR instruction
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum Instruction {
    /// Copy a constant into a slot
    Literal { lhs: Slot, value: Literal },

    /// Resolve a name: frame bindings, statics, namespace, root namespace
    Var { lhs: Slot, name: String },

    /// Resolve a dynamic variable through the environment chain
    DynVar {
        lhs: Slot,
        name: String,
        #[serde(default)]
        lvalue: bool,
    },

    /// Field of a record
    Field {
        lhs: Slot,
        expr: Slot,
        field: String,
        #[serde(default)]
        lvalue: bool,
        #[serde(default)]
        fail_label: Option<Label>,
    },

    /// Call a procedure; `lhs_next` receives the continuation if it suspends
    Call {
        #[serde(default)]
        lhs: Option<Slot>,
        #[serde(default)]
        lhs_next: Option<Slot>,
        callee: Slot,
        #[serde(default)]
        args: Vec<Slot>,
        #[serde(default)]
        names: Vec<String>,
        #[serde(default)]
        fail_label: Option<Label>,
    },

    /// Invoke an operator through the dispatcher
    Operator {
        #[serde(default)]
        lhs: Option<Slot>,
        #[serde(default)]
        lhs_next: Option<Slot>,
        op: String,
        #[serde(default)]
        args: Vec<Slot>,
        #[serde(default)]
        fail_label: Option<Label>,
    },

    /// Resume the continuation held in `next`
    Resume {
        #[serde(default)]
        lhs: Option<Slot>,
        #[serde(default)]
        lhs_next: Option<Slot>,
        next: Slot,
        #[serde(default)]
        fail_label: Option<Label>,
    },

    /// Copy a slot as-is (variables stay variables)
    Move { lhs: Slot, rhs: Slot },

    /// Copy a slot, dereferencing variables
    Deref { lhs: Slot, value: Slot },

    /// Store a label for a later IndirectGoto
    MoveLabel { lhs: Slot, label: Label },

    Goto { target: Label },

    /// Jump to the label held in `target`, which must be one of `targets`
    IndirectGoto { target: Slot, targets: Vec<Label> },

    /// Produce a value; with `resume` the activation suspends and continues
    /// at that label when resumed
    Succeed {
        #[serde(default)]
        expr: Option<Slot>,
        #[serde(default)]
        resume: Option<Label>,
    },

    Fail,

    /// Open a nested block: fresh local cells, and a nested environment when
    /// dynamic variables are declared
    EnterScope {
        scope: String,
        #[serde(default)]
        names: Vec<String>,
        #[serde(default)]
        dynamics: Vec<String>,
    },

    ExitScope { scope: String },

    /// Spawn a co-expression task running from `entry`
    Create { lhs: Slot, entry: Label },

    /// Inside a co-expression: deliver a value, then continue at `resume`
    /// once the consumer asks for the next one
    CoReturn { value: Slot, resume: Label },

    /// Inside a co-expression: close the output and terminate
    CoFail,

    Select {
        cases: Vec<SelectCase>,
        #[serde(default)]
        fail_label: Option<Label>,
    },

    /// Install a recovery procedure for this activation
    Catch { handler: Slot },

    /// Update the frame's source location
    Coord { coord: String },
}

/// One arm of a select instruction
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum SelectCase {
    Send { channel: Slot, value: Slot, body: Label },
    Receive { channel: Slot, lhs: Slot, body: Label },
    Default { body: Label },
}

impl SelectCase {
    pub fn body(&self) -> &Label {
        match self {
            SelectCase::Send { body, .. }
            | SelectCase::Receive { body, .. }
            | SelectCase::Default { body } => body,
        }
    }
}

impl Instruction {
    /// Every label this instruction may transfer control to
    pub fn labels(&self) -> Vec<&Label> {
        match self {
            Instruction::Field { fail_label, .. }
            | Instruction::Call { fail_label, .. }
            | Instruction::Operator { fail_label, .. }
            | Instruction::Resume { fail_label, .. } => fail_label.iter().collect(),
            Instruction::MoveLabel { label, .. } => vec![label],
            Instruction::Goto { target } => vec![target],
            Instruction::IndirectGoto { targets, .. } => targets.iter().collect(),
            Instruction::Succeed { resume, .. } => resume.iter().collect(),
            Instruction::Create { entry, .. } => vec![entry],
            Instruction::CoReturn { resume, .. } => vec![resume],
            Instruction::Select { cases, fail_label } => cases
                .iter()
                .map(SelectCase::body)
                .chain(fail_label.iter())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Every temporary slot this instruction reads or writes
    pub fn slots(&self) -> Vec<Slot> {
        match self {
            Instruction::Literal { lhs, .. }
            | Instruction::Var { lhs, .. }
            | Instruction::DynVar { lhs, .. }
            | Instruction::MoveLabel { lhs, .. }
            | Instruction::Create { lhs, .. } => vec![*lhs],
            Instruction::Field { lhs, expr, .. } => vec![*lhs, *expr],
            Instruction::Call {
                lhs,
                lhs_next,
                callee,
                args,
                ..
            } => lhs
                .iter()
                .chain(lhs_next.iter())
                .chain(std::iter::once(callee))
                .chain(args.iter())
                .copied()
                .collect(),
            Instruction::Operator {
                lhs, lhs_next, args, ..
            } => lhs
                .iter()
                .chain(lhs_next.iter())
                .chain(args.iter())
                .copied()
                .collect(),
            Instruction::Resume {
                lhs, lhs_next, next, ..
            } => lhs
                .iter()
                .chain(lhs_next.iter())
                .chain(std::iter::once(next))
                .copied()
                .collect(),
            Instruction::Move { lhs, rhs } => vec![*lhs, *rhs],
            Instruction::Deref { lhs, value } => vec![*lhs, *value],
            Instruction::IndirectGoto { target, .. } => vec![*target],
            Instruction::Succeed { expr, .. } => expr.iter().copied().collect(),
            Instruction::CoReturn { value, .. } => vec![*value],
            Instruction::Catch { handler } => vec![*handler],
            Instruction::Select { cases, .. } => cases
                .iter()
                .flat_map(|case| match case {
                    SelectCase::Send { channel, value, .. } => vec![*channel, *value],
                    SelectCase::Receive { channel, lhs, .. } => vec![*channel, *lhs],
                    SelectCase::Default { .. } => Vec::new(),
                })
                .collect(),
            Instruction::Goto { .. }
            | Instruction::Fail
            | Instruction::EnterScope { .. }
            | Instruction::ExitScope { .. }
            | Instruction::CoFail
            | Instruction::Coord { .. } => Vec::new(),
        }
    }
}

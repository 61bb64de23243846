//! Runtime value types
//!
//! The minimal value set the operator dispatcher works over, plus the
//! storage [`Cell`] that variables, list elements and record fields live in.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use super::channel::Channel;
use super::coexpr::CoExpression;
use super::error::Raised;
use super::procedure::Callable;

/* ===================== Storage Cells ===================== */

/// A shared, assignable storage location
///
/// Cloning a cell clones the handle, not the contents.
#[derive(Clone)]
pub struct Cell(Arc<RwLock<Value>>);

impl Cell {
    pub fn new(value: Value) -> Self {
        Cell(Arc::new(RwLock::new(value)))
    }

    pub fn get(&self) -> Value {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn set(&self, value: Value) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = value;
    }

    /// Replace the contents, returning the old value
    pub fn replace(&self, value: Value) -> Value {
        std::mem::replace(
            &mut *self.0.write().unwrap_or_else(PoisonError::into_inner),
            value,
        )
    }

    /// Fresh cell holding a copy of the current contents
    pub fn duplicate(&self) -> Cell {
        Cell::new(self.get())
    }

    pub fn same(&self, other: &Cell) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cell({:?})", self.get())
    }
}

/* ===================== Values ===================== */

/// Runtime value type
#[derive(Clone)]
pub enum Value {
    Nil,
    Number(f64),
    Str(Arc<str>),
    List(List),
    Record(Record),
    Proc(Arc<dyn Callable>),
    CoExpr(CoExpression),
    Channel(Channel),
    /// An assignable location (lvalue); consumers dereference it
    Ref(Cell),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Record(_) => "record",
            Value::Proc(_) => "procedure",
            Value::CoExpr(_) => "co-expression",
            Value::Channel(_) => "channel",
            Value::Ref(_) => "variable",
        }
    }

    /// Strip any number of variable references
    pub fn deref(self) -> Value {
        let mut current = self;
        while let Value::Ref(cell) = current {
            current = cell.get();
        }
        current
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_callable(&self) -> Option<Arc<dyn Callable>> {
        match self {
            Value::Proc(p) => Some(Arc::clone(p)),
            _ => None,
        }
    }

    /// Numeric coercion: numbers pass through, strings are parsed
    pub fn to_number(&self) -> Result<f64, Raised> {
        match self {
            Value::Number(n) => Ok(*n),
            Value::Str(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| Raised::exception("numeric value expected", vec![self.clone()])),
            Value::Ref(cell) => cell.get().to_number(),
            _ => Err(Raised::exception("numeric value expected", vec![self.clone()])),
        }
    }

    /// String coercion: strings pass through, numbers are formatted
    pub fn to_text(&self) -> Result<Arc<str>, Raised> {
        match self {
            Value::Str(s) => Ok(Arc::clone(s)),
            Value::Number(_) => Ok(Arc::from(self.to_string())),
            Value::Ref(cell) => cell.get().to_text(),
            _ => Err(Raised::exception("string value expected", vec![self.clone()])),
        }
    }

    /// Identity comparison: scalars by value, everything else by reference
    pub fn identical(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => Arc::ptr_eq(&a.0, &b.0),
            (Value::Record(a), Value::Record(b)) => Arc::ptr_eq(&a.fields, &b.fields),
            (Value::Proc(a), Value::Proc(b)) => Arc::ptr_eq(a, b),
            (Value::CoExpr(a), Value::CoExpr(b)) => a.id() == b.id(),
            (Value::Channel(a), Value::Channel(b)) => a.id() == b.id(),
            (Value::Ref(a), Value::Ref(b)) => a.same(b),
            _ => false,
        }
    }

    /// Printable image, with strings quoted
    pub fn image(&self) -> String {
        match self {
            Value::Str(s) => format!("{s:?}"),
            Value::List(list) => {
                let items: Vec<String> = list.values().iter().map(Value::image).collect();
                format!("[{}]", items.join(", "))
            }
            Value::Ref(cell) => format!("(variable = {})", cell.get().image()),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Number(n) => {
                if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{n}")
                }
            }
            Value::Str(s) => write!(f, "{s}"),
            Value::List(list) => write!(f, "list({})", list.len()),
            Value::Record(r) => write!(f, "record {}", r.name),
            Value::Proc(p) => write!(f, "procedure {}", p.name()),
            Value::CoExpr(c) => write!(f, "co-expression #{}", c.id()),
            Value::Channel(c) => write!(f, "channel #{}", c.id()),
            Value::Ref(cell) => write!(f, "{}", cell.get()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.image())
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(List::new(items))
    }
}

/* ===================== Lists ===================== */

/// Mutable list; every element is its own cell so indexing yields lvalues
#[derive(Clone)]
pub struct List(Arc<RwLock<Vec<Cell>>>);

impl List {
    pub fn new(items: Vec<Value>) -> Self {
        List(Arc::new(RwLock::new(items.into_iter().map(Cell::new).collect())))
    }

    pub fn len(&self) -> usize {
        self.0.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn cell(&self, index: usize) -> Option<Cell> {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(index)
            .cloned()
    }

    pub fn values(&self) -> Vec<Value> {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(Cell::get)
            .collect()
    }

    pub fn push(&self, value: Value) {
        self.0
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Cell::new(value));
    }
}

/* ===================== Records ===================== */

/// Record instance with named field cells
#[derive(Clone)]
pub struct Record {
    pub name: Arc<str>,
    fields: Arc<Vec<(String, Cell)>>,
}

impl Record {
    pub fn new(name: &str, fields: Vec<(String, Value)>) -> Self {
        Record {
            name: Arc::from(name),
            fields: Arc::new(
                fields
                    .into_iter()
                    .map(|(n, v)| (n, Cell::new(v)))
                    .collect(),
            ),
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Field cell by declaration position
    pub fn field_at(&self, index: usize) -> Option<Cell> {
        self.fields.get(index).map(|(_, cell)| cell.clone())
    }

    pub fn field(&self, name: &str) -> Option<Cell> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, cell)| cell.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_coerces_to_number() {
        assert_eq!(Value::from(" 3 ").to_number().unwrap(), 3.0);
        assert!(Value::from("abc").to_number().is_err());
    }

    #[test]
    fn test_deref_strips_nested_refs() {
        let inner = Cell::new(Value::from(7.0));
        let outer = Cell::new(Value::Ref(inner));
        assert_eq!(Value::Ref(outer).deref().as_number(), Some(7.0));
    }

    #[test]
    fn test_number_display() {
        assert_eq!(Value::from(7.0).to_string(), "7");
        assert_eq!(Value::from(2.5).to_string(), "2.5");
    }

    #[test]
    fn test_list_cells_are_shared() {
        let list = List::new(vec![Value::from(1.0)]);
        let alias = list.clone();
        list.cell(0).unwrap().set(Value::from(9.0));
        assert_eq!(alias.values()[0].as_number(), Some(9.0));
    }
}

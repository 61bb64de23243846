//! Environment tree for dynamic variables
//!
//! One node per task and one per nested dynamic-variable scope. Lookup walks
//! toward the root, so a spawned task sees every dynamic variable visible at
//! its creation point. Nodes are shared across tasks and dropped when no
//! longer referenced.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use super::coexpr::TaskPool;
use super::error::Raised;
use super::value::{Cell, Value};

pub struct Environment {
    parent: Option<Arc<Environment>>,
    task_id: u64,
    /// `None` marks a declared but not yet assigned variable
    vars: RwLock<HashMap<String, Option<Cell>>>,
    pool: Arc<TaskPool>,
}

impl Environment {
    /// Root environment for the main task (id 0)
    pub fn root(pool: Arc<TaskPool>) -> Arc<Self> {
        Arc::new(Environment {
            parent: None,
            task_id: 0,
            vars: RwLock::new(HashMap::new()),
            pool,
        })
    }

    /// Environment for a newly spawned task
    pub fn for_task(parent: &Arc<Environment>, task_id: u64) -> Arc<Self> {
        Arc::new(Environment {
            parent: Some(Arc::clone(parent)),
            task_id,
            vars: RwLock::new(HashMap::new()),
            pool: Arc::clone(&parent.pool),
        })
    }

    /// Nested scope declaring the given dynamic variables, uninitialized
    pub fn nested(parent: &Arc<Environment>, names: &[String]) -> Arc<Self> {
        Arc::new(Environment {
            parent: Some(Arc::clone(parent)),
            task_id: parent.task_id,
            vars: RwLock::new(names.iter().map(|n| (n.clone(), None)).collect()),
            pool: Arc::clone(&parent.pool),
        })
    }

    pub fn task_id(&self) -> u64 {
        self.task_id
    }

    pub fn parent(&self) -> Option<&Arc<Environment>> {
        self.parent.as_ref()
    }

    pub fn pool(&self) -> &Arc<TaskPool> {
        &self.pool
    }

    /// Bind a dynamic variable at this node
    pub fn declare(&self, name: &str, value: Value) -> Cell {
        let cell = Cell::new(value);
        self.vars
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), Some(cell.clone()));
        cell
    }

    /// Find the nearest initialized cell for `name`
    pub fn lookup(&self, name: &str) -> Option<Cell> {
        let mut node = Some(self);
        while let Some(env) = node {
            let vars = env.vars.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(slot) = vars.get(name) {
                return slot.clone();
            }
            node = env.parent.as_deref();
        }
        None
    }

    /// Resolve a dynamic-variable reference
    ///
    /// With `lvalue` false a concrete value is required and an unassigned
    /// variable is a malfunction. With `lvalue` true the storage cell is
    /// returned, created on first assignment at the declaring node (or at
    /// this node when the name was never declared).
    pub fn resolve(&self, name: &str, lvalue: bool) -> Result<Value, Raised> {
        let mut node = Some(self);
        while let Some(env) = node {
            let found = env
                .vars
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(name)
                .cloned();
            match found {
                Some(Some(cell)) => {
                    return Ok(if lvalue { Value::Ref(cell) } else { cell.get() });
                }
                Some(None) if lvalue => return Ok(Value::Ref(env.declare(name, Value::Nil))),
                Some(None) => {
                    return Err(Raised::malfunction(format!(
                        "dynamic variable %{name} used before assignment"
                    )))
                }
                None => node = env.parent.as_deref(),
            }
        }
        if lvalue {
            Ok(Value::Ref(self.declare(name, Value::Nil)))
        } else {
            Err(Raised::malfunction(format!(
                "dynamic variable %{name} is not declared"
            )))
        }
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("task_id", &self.task_id)
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}

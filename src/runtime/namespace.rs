//! Namespaces and the global registry
//!
//! A namespace is a write-once-at-link-time table of globals (procedures,
//! records, initialized variables). The unnamed namespace is the root lookup
//! scope. The registry owns every namespace for one loaded program.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use indexmap::IndexMap;
use tracing::debug;

use super::error::Raised;
use super::procedure::Callable;
use super::value::{Cell, Value};

/// Separator used in qualified names
pub const QUALIFIER: &str = "::";

/// Qualified name for cross-namespace reference
pub fn qualify(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{namespace}{QUALIFIER}{name}")
    }
}

/* ===================== Namespace ===================== */

#[derive(Debug)]
pub struct Namespace {
    name: String,
    entries: RwLock<IndexMap<String, Cell>>,
}

impl Namespace {
    pub fn new(name: &str) -> Self {
        Namespace {
            name: name.to_string(),
            entries: RwLock::new(IndexMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declare a global; a second declaration of the same name is fatal
    pub fn declare(&self, name: &str, value: Value) -> Result<Cell, Raised> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.contains_key(name) {
            return Err(Raised::malfunction(format!(
                "duplicate declaration of {}",
                qualify(&self.name, name)
            )));
        }
        let cell = Cell::new(value);
        entries.insert(name.to_string(), cell.clone());
        Ok(cell)
    }

    /// Storage cell for `name`, if declared
    pub fn get(&self, name: &str) -> Option<Cell> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn qualified(&self, name: &str) -> String {
        qualify(&self.name, name)
    }

    /// Declared names in declaration order
    pub fn names(&self) -> Vec<String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

/* ===================== Registry ===================== */

/// All namespaces of one loaded program
#[derive(Debug)]
pub struct Registry {
    root: Arc<Namespace>,
    namespaces: RwLock<HashMap<String, Arc<Namespace>>>,
}

impl Registry {
    pub fn new() -> Self {
        let root = Arc::new(Namespace::new(""));
        let mut namespaces = HashMap::new();
        namespaces.insert(String::new(), Arc::clone(&root));
        Registry {
            root,
            namespaces: RwLock::new(namespaces),
        }
    }

    pub fn root(&self) -> &Arc<Namespace> {
        &self.root
    }

    /// Namespace by name, created on first use
    pub fn namespace(&self, name: &str) -> Arc<Namespace> {
        if let Some(ns) = self
            .namespaces
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return Arc::clone(ns);
        }
        let mut namespaces = self.namespaces.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            namespaces
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Namespace::new(name))),
        )
    }

    /// Declare `name` in `namespace`
    ///
    /// Outside the root namespace the entry is also reachable from the root
    /// under its qualified name; both names share one cell.
    pub fn declare(&self, namespace: &str, name: &str, value: Value) -> Result<Cell, Raised> {
        let ns = self.namespace(namespace);
        let cell = ns.declare(name, value)?;
        if !namespace.is_empty() {
            let mut entries = self.root.entries.write().unwrap_or_else(PoisonError::into_inner);
            let qualified = ns.qualified(name);
            if entries.contains_key(&qualified) {
                return Err(Raised::malfunction(format!(
                    "duplicate declaration of {qualified}"
                )));
            }
            entries.insert(qualified, cell.clone());
        }
        debug!(namespace, name, "declared global");
        Ok(cell)
    }

    /// Register a library callable in the root namespace
    pub fn register(&self, callable: Arc<dyn Callable>) -> Result<Cell, Raised> {
        let name = callable.name().to_string();
        self.declare("", &name, Value::Proc(callable))
    }

    /// Look up a possibly qualified name from the root
    pub fn get(&self, name: &str) -> Option<Cell> {
        self.root.get(name)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_declaration_is_fatal() {
        let ns = Namespace::new("");
        ns.declare("x", Value::Nil).unwrap();
        let err = ns.declare("x", Value::Nil).unwrap_err();
        assert!(err.is_malfunction());
    }

    #[test]
    fn test_get_absent_is_empty() {
        let registry = Registry::new();
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_qualified_name_reachable_from_root() {
        let registry = Registry::new();
        let cell = registry.declare("geo", "area", Value::from(4.0)).unwrap();
        assert_eq!(registry.root().qualified("x"), "x");
        assert_eq!(registry.namespace("geo").qualified("area"), "geo::area");
        let via_root = registry.get("geo::area").unwrap();
        assert!(via_root.same(&cell));
        assert!(registry.namespace("geo").get("area").is_some());
        assert!(registry.get("area").is_none());
    }

    #[test]
    fn test_names_keep_declaration_order() {
        let ns = Namespace::new("m");
        for name in ["c", "a", "b"] {
            ns.declare(name, Value::Nil).unwrap();
        }
        assert_eq!(ns.names(), vec!["c", "a", "b"]);
    }
}

//! Dependency-ordered initialization
//!
//! Orders global initializers and procedures so that every initializer runs
//! after the globals it reaches, whatever the declaration order.
//!
//! Each pending item gets a status from a depth-first walk of its
//! dependencies, stopping at items already done:
//! - reaching a pending global initializer, or its own initializer:
//!   `WaitingOnGlobal`
//! - reaching only pending procedures: `WaitingOnProcedure`
//! - reaching nothing pending: `Ready`
//!
//! The first `Ready` item in declaration order is scheduled next, then the
//! scan restarts from the front. Procedures may reference each other in
//! cycles, so when nothing is `Ready` the first `WaitingOnProcedure` item is
//! taken instead. When only `WaitingOnGlobal` items remain, initializers
//! form a cycle.

use std::collections::HashMap;

use tracing::debug;

use super::error::Raised;
use super::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Unvisited,
    WaitingOnGlobal,
    WaitingOnProcedure,
    Ready,
    Done,
}

/// A global initializer (`init` present) or a procedure ordering marker
#[derive(Debug, Clone)]
pub struct DependencyItem<T> {
    pub name: String,
    pub init: Option<T>,
    pub deps: Vec<String>,
    status: Status,
    visit: u64,
}

impl<T> DependencyItem<T> {
    pub fn new(name: impl Into<String>, init: Option<T>, deps: Vec<String>) -> Self {
        DependencyItem {
            name: name.into(),
            init,
            deps,
            status: Status::Unvisited,
            visit: 0,
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }
}

/// Status of `root` given the current statuses of every item
fn evaluate<T>(items: &mut [DependencyItem<T>], index: &HashMap<String, usize>, root: usize, stamp: u64) -> Status {
    let resolve = |deps: &[String]| -> Vec<usize> {
        deps.iter().filter_map(|d| index.get(d).copied()).collect()
    };

    let mut status = Status::Ready;
    let mut pending = resolve(&items[root].deps);
    while let Some(i) = pending.pop() {
        // An initializer that reaches itself waits on its own value
        if i == root {
            if items[root].init.is_some() {
                return Status::WaitingOnGlobal;
            }
            continue;
        }
        let item = &mut items[i];
        if item.visit == stamp || item.status == Status::Done {
            continue;
        }
        item.visit = stamp;
        if item.init.is_some() {
            return Status::WaitingOnGlobal;
        }
        status = Status::WaitingOnProcedure;
        pending.extend(resolve(&item.deps));
    }
    status
}

/// Reorder `items` into a valid initialization order
///
/// Dependency names that match no item are ignored. Ties between equally
/// ready items keep declaration order.
pub fn schedule<T>(mut items: Vec<DependencyItem<T>>) -> Result<Vec<DependencyItem<T>>, Raised> {
    let mut index = HashMap::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        index.entry(item.name.clone()).or_insert(i);
    }

    let mut order = Vec::with_capacity(items.len());
    let mut stamp = 0;
    while order.len() < items.len() {
        let mut ready = None;
        let mut fallback = None;
        for i in 0..items.len() {
            if items[i].status == Status::Done {
                continue;
            }
            stamp += 1;
            let status = evaluate(&mut items, &index, i, stamp);
            items[i].status = status;
            match status {
                Status::Ready => {
                    ready = Some(i);
                    break;
                }
                Status::WaitingOnProcedure if fallback.is_none() => fallback = Some(i),
                _ => {}
            }
        }

        let Some(next) = ready.or(fallback) else {
            let blocked: Vec<String> = items
                .iter()
                .filter(|item| item.status == Status::WaitingOnGlobal)
                .map(|item| item.name.clone())
                .collect();
            return Err(Raised::exception(
                format!("circular dependency among initializers: {}", blocked.join(", ")),
                blocked.into_iter().map(Value::from).collect(),
            ));
        };
        debug!(name = %items[next].name, status = ?items[next].status, "scheduled");
        items[next].status = Status::Done;
        order.push(next);
    }

    let mut slots: Vec<Option<DependencyItem<T>>> = items.into_iter().map(Some).collect();
    Ok(order.into_iter().filter_map(|i| slots[i].take()).collect())
}

/// Execute the initializers of a scheduled list, in order
///
/// Procedure markers carry no initializer and are skipped.
pub fn run<T, F>(order: Vec<DependencyItem<T>>, mut execute: F) -> Result<(), Raised>
where
    F: FnMut(&str, T) -> Result<(), Raised>,
{
    for item in order {
        if let Some(init) = item.init {
            debug!(name = %item.name, "running initializer");
            execute(&item.name, init)?;
        }
    }
    Ok(())
}

//! Program lifecycle
//!
//! Load → link → initialize → run → shutdown:
//! - `Program::new` builds the task runtime, the registry with the standard
//!   library installed, and the root environment
//! - `link` declares records, procedures and globals from front-end IR
//! - `initialize` runs global initializers in dependency order
//! - `run_main` calls `main` with the command-line arguments

use std::io::Write;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, info};

use super::coexpr::TaskPool;
use super::env::Environment;
use super::error::Raised;
use super::init::{self, DependencyItem};
use super::namespace::{qualify, Registry};
use super::outcome::Outcome;
use super::procedure::{Callable, Procedure, ProcedureInfo, ProcedureIr, RecordType};
use super::stdlib;
use super::value::{Cell, Value};
use crate::config::Config;

/* ===================== Program IR ===================== */

/// Global variable, optionally initialized by a procedure's first result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalDecl {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub init: Option<ProcedureIr>,
    #[serde(default)]
    pub deps: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordDecl {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub fields: Vec<String>,
}

/// Everything the front-end hands over for one program
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgramIr {
    #[serde(default)]
    pub procedures: Vec<ProcedureIr>,
    #[serde(default)]
    pub globals: Vec<GlobalDecl>,
    #[serde(default)]
    pub records: Vec<RecordDecl>,
}

/// Initializer attached to a global
#[derive(Clone)]
pub struct GlobalInit {
    cell: Cell,
    procedure: Arc<Procedure>,
}

/* ===================== Program ===================== */

pub struct Program {
    runtime: Option<Runtime>,
    registry: Registry,
    env: Arc<Environment>,
    config: Config,
    /// Procedures and globals in declaration order, awaiting initialization
    items: Vec<DependencyItem<GlobalInit>>,
}

impl Program {
    pub fn new(config: Config) -> std::io::Result<Self> {
        let runtime = Builder::new_multi_thread()
            .thread_name("goalvm")
            .max_blocking_threads(config.max_tasks.max(1))
            .enable_all()
            .build()?;
        let pool = TaskPool::new(
            runtime.handle().clone(),
            config.queue_capacity,
            config.max_tasks,
        );
        let registry = Registry::new();
        stdlib::install(&registry).map_err(std::io::Error::other)?;
        Ok(Program {
            env: Environment::root(pool),
            runtime: Some(runtime),
            registry,
            config,
            items: Vec::new(),
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn env(&self) -> &Arc<Environment> {
        &self.env
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Declare everything in `ir`; any malformed IR is a malfunction
    pub fn link(&mut self, ir: ProgramIr) -> Result<(), Raised> {
        for record in ir.records {
            let constructor = Arc::new(RecordType {
                name: qualify(&record.namespace, &record.name),
                fields: record.fields,
            });
            self.registry
                .declare(&record.namespace, &record.name, Value::Proc(constructor))?;
        }

        for ir in ir.procedures {
            let procedure = self.procedure(ir)?;
            let info = &procedure.info;
            self.registry.declare(
                &info.namespace,
                &info.name,
                Value::Proc(Arc::clone(&procedure) as Arc<dyn Callable>),
            )?;
            self.items.push(DependencyItem::new(
                info.qualified.clone(),
                None,
                info.deps.clone(),
            ));
        }

        for global in ir.globals {
            let cell = self
                .registry
                .declare(&global.namespace, &global.name, Value::Nil)?;
            let init = match global.init {
                Some(ir) => Some(GlobalInit {
                    cell,
                    procedure: self.procedure(ir)?,
                }),
                None => None,
            };
            self.items.push(DependencyItem::new(
                qualify(&global.namespace, &global.name),
                init,
                global.deps,
            ));
        }

        debug!(items = self.items.len(), "linked program");
        Ok(())
    }

    fn procedure(&self, ir: ProcedureIr) -> Result<Arc<Procedure>, Raised> {
        let namespace = self.registry.namespace(&ir.namespace);
        let info = ProcedureInfo::from_ir(ir)?;
        Ok(Procedure::new(info, namespace, Arc::clone(self.registry.root())))
    }

    /// Names of linked procedures and globals in initialization order
    pub fn initialization_order(&self) -> Result<Vec<String>, Raised> {
        let order = init::schedule(self.items.clone())?;
        Ok(order.into_iter().map(|item| item.name).collect())
    }

    /// Run every global initializer, in dependency order
    ///
    /// A global whose initializer fails keeps its nil value.
    pub fn initialize(&mut self) -> Result<(), Raised> {
        let order = init::schedule(std::mem::take(&mut self.items))?;
        let env = Arc::clone(&self.env);
        init::run(order, |name, global| {
            let outcome = Arc::clone(&global.procedure).call(&env, Vec::new(), &[])?;
            match outcome.into_parts().0 {
                Some(value) => global.cell.set(value.deref()),
                None => debug!(name, "initializer failed"),
            }
            Ok(())
        })
    }

    /// Call `main` with the argument list; its first result, if any
    pub fn run_main(&self, args: Vec<String>) -> Result<Option<Value>, Raised> {
        let main = self
            .registry
            .get("main")
            .ok_or_else(|| Raised::malfunction("no procedure main"))?
            .get();
        let callable = main
            .as_callable()
            .ok_or_else(|| Raised::malfunction("main is not a procedure"))?;
        info!(args = args.len(), "running main");
        let args = Value::from(args.into_iter().map(Value::from).collect::<Vec<_>>());
        let outcome = callable.call(&self.env, vec![args], &[])?;
        Ok(match outcome {
            Outcome::Fail => None,
            Outcome::Return(value) | Outcome::Suspend(value, _) => Some(value.deref()),
        })
    }
}

impl Drop for Program {
    fn drop(&mut self) {
        // Producers blocked on abandoned co-expressions must not hold up exit
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// Flush standard output and error, then terminate the process
pub fn shutdown(code: i32) -> ! {
    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();
    std::process::exit(code)
}

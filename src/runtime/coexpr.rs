//! Co-expression subsystem
//!
//! `create` spawns a producer task running a duplicated frame from an entry
//! label. Producer and consumer talk over two bounded queues:
//!
//! - requests (consumer -> producer): one `()` per activation
//! - results (producer -> consumer): one value, or a forwarded error
//!
//! The producer only computes after a request arrives, so each activation
//! observes exactly one step of the producer. Dropping every handle to a
//! co-expression closes the request queue, and the producer terminates at
//! its next yield point.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tracing::{debug, warn};

use super::engine;
use super::env::Environment;
use super::error::{Raised, TraceFrame};
use super::frame::Frame;
use super::instruction::Label;
use super::outcome::{Outcome, Step};
use super::value::Value;

type Delivery = Result<Value, Raised>;

/* ===================== Task Pool ===================== */

/// Spawner and id source for co-expression tasks
///
/// Each live producer occupies one blocking thread of the runtime, so the
/// pool admits at most `limit` of them at a time.
pub struct TaskPool {
    handle: Handle,
    next_id: AtomicU64,
    active: Arc<AtomicUsize>,
    capacity: usize,
    limit: usize,
}

impl TaskPool {
    /// `capacity` bounds each co-expression's result queue and `limit` the
    /// number of live producers; 0 is raised to 1 for both
    pub fn new(handle: Handle, capacity: usize, limit: usize) -> Arc<Self> {
        Arc::new(TaskPool {
            handle,
            next_id: AtomicU64::new(1),
            active: Arc::new(AtomicUsize::new(0)),
            capacity: capacity.max(1),
            limit: limit.max(1),
        })
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Fresh task identifier; the main task is 0
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Number of producer tasks that have not yet terminated
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Claim a producer slot; an exception once `limit` producers are live
    fn reserve(&self) -> Result<(), Raised> {
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.limit).then(|| n + 1)
            })
            .map(|_| ())
            .map_err(|n| {
                Raised::exception(
                    format!("too many live co-expressions ({n} of {})", self.limit),
                    Vec::new(),
                )
            })
    }

    /// Run a producer in a slot claimed by `reserve`
    fn spawn<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let active = Arc::clone(&self.active);
        self.handle.spawn_blocking(move || {
            task();
            active.fetch_sub(1, Ordering::AcqRel);
        });
    }
}

impl fmt::Debug for TaskPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskPool")
            .field("capacity", &self.capacity)
            .field("active", &self.active())
            .field("limit", &self.limit)
            .finish()
    }
}

/* ===================== Producer Side ===================== */

/// Output queue of a frame running as a co-expression
pub struct CoOutput {
    id: u64,
    results: Sender<Delivery>,
    requests: Receiver<()>,
}

impl CoOutput {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Block until the consumer asks for a value; false once it is gone
    pub fn await_request(&mut self) -> bool {
        self.requests.blocking_recv().is_some()
    }

    /// Hand one value to the consumer and wait for the next request
    ///
    /// Returns false when the consumer has abandoned the co-expression,
    /// either before the value was taken or while waiting.
    pub fn deliver(&mut self, value: Value) -> bool {
        self.results.blocking_send(Ok(value)).is_ok() && self.await_request()
    }
}

/// Spawn a co-expression running `frame`'s procedure from `entry`
///
/// Raises an exception when the pool has no free producer slot.
pub fn create(frame: &Frame, entry: Label) -> Result<CoExpression, Raised> {
    let pool = Arc::clone(frame.env.pool());
    pool.reserve()?;
    let id = pool.next_id();
    let (request_tx, request_rx) = mpsc::channel(1);
    let (result_tx, result_rx) = mpsc::channel(pool.capacity());

    let output = CoOutput {
        id,
        results: result_tx.clone(),
        requests: request_rx,
    };
    let env = Environment::for_task(&frame.env, id);
    let task = frame.dup(env, output);

    debug!(id, procedure = %frame.procedure.info.qualified, %entry, "spawning co-expression");
    pool.spawn(move || produce(task, entry, result_tx));

    Ok(CoExpression {
        id,
        link: Arc::new(Mutex::new(CoLink {
            requests: Some(request_tx),
            results: result_rx,
            exhausted: false,
        })),
    })
}

/// Body of a producer task
fn produce(mut frame: Frame, entry: Label, results: Sender<Delivery>) {
    let id = frame.output.as_ref().map_or(0, CoOutput::id);
    let procedure = frame.procedure.info.qualified.clone();

    let started = frame.output.as_mut().is_some_and(CoOutput::await_request);
    if !started {
        debug!(id, "co-expression abandoned before first activation");
        return;
    }

    let last = match engine::activate(frame, entry) {
        Ok(Outcome::Fail) => None,
        Ok(Outcome::Return(value)) => Some(Ok(value.deref())),
        Ok(Outcome::Suspend(value, _)) => {
            warn!(id, %procedure, "co-expression body suspended; later values dropped");
            Some(Ok(value.deref()))
        }
        Err(raised) => Some(Err(raised.with_frame(TraceFrame {
            procedure: format!("co-expression #{id}"),
            args: Vec::new(),
            coord: String::new(),
            offender: None,
        }))),
    };
    if let Some(delivery) = last {
        if results.blocking_send(delivery).is_err() {
            debug!(id, "co-expression result dropped by departed consumer");
        }
    }
    debug!(id, "co-expression terminated");
}

/* ===================== Consumer Side ===================== */

struct CoLink {
    requests: Option<Sender<()>>,
    results: Receiver<Delivery>,
    exhausted: bool,
}

/// Consumer handle to a co-expression task
///
/// Clones share one link, so values are never duplicated between them.
#[derive(Clone)]
pub struct CoExpression {
    id: u64,
    link: Arc<Mutex<CoLink>>,
}

impl CoExpression {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Ask the producer for its next value
    ///
    /// Fails once the producer has terminated, and keeps failing after that.
    /// An error raised inside the producer is re-raised here, once.
    pub fn activate(&self) -> Step {
        let mut link = self.link.lock().unwrap_or_else(PoisonError::into_inner);
        if link.exhausted {
            return Ok(Outcome::Fail);
        }
        let asked = link
            .requests
            .as_ref()
            .is_some_and(|tx| tx.blocking_send(()).is_ok());
        let delivery = if asked {
            link.results.blocking_recv()
        } else {
            // The producer is gone; anything it left queued is still owed
            link.results.try_recv().ok()
        };
        match delivery {
            Some(Ok(value)) => Ok(Outcome::Return(value)),
            Some(Err(raised)) => {
                link.finish();
                Err(raised)
            }
            None => {
                link.finish();
                Ok(Outcome::Fail)
            }
        }
    }

    /// Abandon the co-expression; its producer terminates at its next yield
    pub fn close(&self) {
        self.link
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .finish();
    }
}

impl CoLink {
    fn finish(&mut self) {
        self.exhausted = true;
        self.requests = None;
        self.results.close();
    }
}

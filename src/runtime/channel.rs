//! Channels
//!
//! First-class bounded queues, the values a select statement waits on.
//! Every blocking operation drives the queue through the runtime handle the
//! channel was created with, so channels work from any task thread.
//!
//! Receivers queue on an async lock around the receiving half, so any
//! number of tasks may wait on one channel and each is woken in turn.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::sync::Mutex as AsyncMutex;

use super::error::Raised;
use super::value::Value;

static NEXT_CHANNEL: AtomicU64 = AtomicU64::new(1);

#[derive(Clone)]
pub struct Channel {
    id: u64,
    handle: Handle,
    tx: Arc<Mutex<Option<Sender<Value>>>>,
    rx: Arc<AsyncMutex<Receiver<Value>>>,
}

impl Channel {
    /// Channel buffering up to `capacity` values; 0 is raised to 1
    pub fn new(handle: Handle, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Channel {
            id: NEXT_CHANNEL.fetch_add(1, Ordering::Relaxed),
            handle,
            tx: Arc::new(Mutex::new(Some(tx))),
            rx: Arc::new(AsyncMutex::new(rx)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Sending half, absent once the channel is closed
    pub fn sender(&self) -> Option<Sender<Value>> {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn is_closed(&self) -> bool {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Block until the value is queued
    pub fn send(&self, value: Value) -> Result<(), Raised> {
        let closed = || Raised::exception("send on closed channel", Vec::new());
        let tx = self.sender().ok_or_else(closed)?;
        self.handle
            .block_on(tx.send(value))
            .map_err(|err| Raised::exception("send on closed channel", vec![err.0]))
    }

    /// Block until a value arrives; `None` once closed and drained
    pub fn receive(&self) -> Option<Value> {
        self.handle.block_on(self.recv())
    }

    /// Wait for this receiver's turn, then for a value
    ///
    /// Dropping the future before it completes gives up the turn without
    /// losing a value.
    pub fn recv(&self) -> impl Future<Output = Option<Value>> + Send + 'static {
        let rx = Arc::clone(&self.rx);
        async move { rx.lock_owned().await.recv().await }
    }

    /// Refuse further sends; queued values can still be received
    pub fn close(&self) {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receive_after_close_drains_then_fails() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let channel = Channel::new(runtime.handle().clone(), 2);
        channel.send(Value::from(1.0)).unwrap();
        channel.close();
        assert!(channel.is_closed());
        assert!(channel.send(Value::from(2.0)).is_err());
        assert_eq!(channel.receive().and_then(|v| v.as_number()), Some(1.0));
        assert!(channel.receive().is_none());
    }

    #[test]
    fn test_every_blocked_receiver_is_woken() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let channel = Channel::new(runtime.handle().clone(), 1);
        let (done_tx, done_rx) = std::sync::mpsc::channel();
        for _ in 0..2 {
            let receiver = channel.clone();
            let done = done_tx.clone();
            std::thread::spawn(move || {
                let value = receiver.receive().and_then(|v| v.as_number());
                done.send(value).unwrap();
            });
        }
        std::thread::sleep(std::time::Duration::from_millis(50));
        channel.send(Value::from(1.0)).unwrap();
        channel.send(Value::from(2.0)).unwrap();

        let timeout = std::time::Duration::from_secs(5);
        let mut got = vec![
            done_rx.recv_timeout(timeout).unwrap(),
            done_rx.recv_timeout(timeout).unwrap(),
        ];
        got.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(got, vec![Some(1.0), Some(2.0)]);
    }
}

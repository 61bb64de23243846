//! Select statement executor
//!
//! One wait-set arm per case. A pass polls every live arm starting from a
//! rotating offset, so no ready case is starved. A receive arm whose queue
//! is closed and drained is disabled and the choice retried without it; a
//! send arm on a closed channel is disabled the same way. Receive arms wait
//! their turn on the channel like any other receiver, and give it up when
//! another case is chosen.

use std::future::{poll_fn, Future};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::Poll;

use tokio::runtime::Handle;
use tokio_util::sync::PollSender;
use tracing::{debug, warn};

use super::channel::Channel;
use super::value::Value;

static ROTATION: AtomicUsize = AtomicUsize::new(0);

/// A select case with its operands resolved
pub enum WaitCase {
    Send(Channel, Value),
    Receive(Channel),
    Default,
}

/// Result of one select
#[derive(Debug)]
pub enum Choice {
    /// Index of the chosen case, with the received value for a receive
    Case(usize, Option<Value>),
    /// Every case was disabled and there is no default
    Fail,
}

type Receiving = Pin<Box<dyn Future<Output = Option<Value>> + Send>>;

enum Arm {
    Send(u64, PollSender<Value>, Option<Value>),
    Receive(u64, Receiving),
    Default,
    Disabled,
}

/// Choose one ready case, blocking until one is ready unless a default exists
pub fn choose(handle: &Handle, cases: Vec<WaitCase>) -> Choice {
    let default = cases.iter().position(|c| matches!(c, WaitCase::Default));
    let mut arms: Vec<Arm> = cases
        .into_iter()
        .map(|case| match case {
            WaitCase::Send(channel, value) => match channel.sender() {
                Some(tx) => Arm::Send(channel.id(), PollSender::new(tx), Some(value)),
                None => {
                    warn!(channel = channel.id(), "select send case on closed channel disabled");
                    Arm::Disabled
                }
            },
            WaitCase::Receive(channel) => Arm::Receive(channel.id(), Box::pin(channel.recv())),
            WaitCase::Default => Arm::Default,
        })
        .collect();

    let count = arms.len();
    let start = ROTATION.fetch_add(1, Ordering::Relaxed);

    let choice = handle.block_on(poll_fn(|cx| {
        for k in 0..count {
            let index = (start + k) % count;
            let mut disable = false;
            match &mut arms[index] {
                Arm::Receive(id, receiving) => match receiving.as_mut().poll(cx) {
                    Poll::Ready(Some(value)) => {
                        return Poll::Ready(Choice::Case(index, Some(value)))
                    }
                    Poll::Ready(None) => {
                        debug!(channel = *id, "select receive case on closed channel disabled");
                        disable = true;
                    }
                    Poll::Pending => {}
                },
                Arm::Send(id, tx, value) => match tx.poll_reserve(cx) {
                    Poll::Ready(Ok(())) => match value.take().map(|item| tx.send_item(item)) {
                        Some(Ok(())) => return Poll::Ready(Choice::Case(index, None)),
                        _ => disable = true,
                    },
                    Poll::Ready(Err(_)) => {
                        warn!(channel = *id, "select send case on closed channel disabled");
                        disable = true;
                    }
                    Poll::Pending => {}
                },
                Arm::Default | Arm::Disabled => {}
            }
            if disable {
                arms[index] = Arm::Disabled;
            }
        }

        if let Some(index) = default {
            return Poll::Ready(Choice::Case(index, None));
        }
        if arms.iter().all(|arm| matches!(arm, Arm::Disabled)) {
            return Poll::Ready(Choice::Fail);
        }
        Poll::Pending
    }));

    debug!(?choice, "select");
    choice
}

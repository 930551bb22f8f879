//! Pending request slots and the caller-side handles that observe them.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::{Error, ErrorContext, Result};

/// What a collapsed request resolves to.
///
/// `Ok(Some(value))` is a delivered response, `Ok(None)` means the batch
/// explicitly returned no value for this request.
pub type Outcome<R> = Result<Option<R>>;

/// One caller's argument plus the single-assignment cell its result goes to.
pub struct PendingRequestSlot<A, R> {
    position: usize,
    argument: A,
    resolver: SlotResolver<R>,
}

impl<A, R> PendingRequestSlot<A, R> {
    /// Create a slot at `position` and the handle its caller will await.
    pub fn new(position: usize, argument: A) -> (Self, ResponseHandle<R>) {
        let (tx, rx) = oneshot::channel();
        let slot = Self {
            position,
            argument,
            resolver: SlotResolver {
                position,
                sender: tx,
            },
        };
        let handle = ResponseHandle {
            position,
            receiver: rx,
        };
        (slot, handle)
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn argument(&self) -> &A {
        &self.argument
    }

    /// Split the slot into its argument and the write side of its result cell.
    pub fn into_parts(self) -> (A, SlotResolver<R>) {
        (self.argument, self.resolver)
    }
}

impl<A: std::fmt::Debug, R> std::fmt::Debug for PendingRequestSlot<A, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequestSlot")
            .field("position", &self.position)
            .field("argument", &self.argument)
            .finish()
    }
}

/// Write side of a slot. Consumed on resolution, so a slot resolves at most once.
pub struct SlotResolver<R> {
    position: usize,
    sender: oneshot::Sender<Outcome<R>>,
}

impl<R> SlotResolver<R> {
    pub fn position(&self) -> usize {
        self.position
    }

    /// Deliver the outcome. Returns `false` when the caller already stopped waiting.
    pub fn resolve(self, outcome: Outcome<R>) -> bool {
        self.sender.send(outcome).is_ok()
    }

    pub fn is_abandoned(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Caller-side handle for a submitted request.
///
/// Awaiting it yields the slot's outcome once the owning window has executed.
/// Dropping it (for example on a caller timeout) leaves the window untouched.
#[derive(Debug)]
pub struct ResponseHandle<R> {
    position: usize,
    receiver: oneshot::Receiver<Outcome<R>>,
}

impl<R> ResponseHandle<R> {
    /// Position of the request inside its window.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Wait at most `timeout` for the outcome.
    ///
    /// Expiry only affects this caller: the slot still resolves normally and
    /// its result is discarded.
    pub async fn wait_timeout(self, timeout: Duration) -> Outcome<R> {
        match tokio::time::timeout(timeout, self).await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::Timeout { elapsed: timeout }),
        }
    }

    /// Block the current thread until the outcome is available.
    ///
    /// For callers on plain threads; panics if called from within an async context.
    pub fn blocking_wait(self) -> Outcome<R> {
        self.receiver.blocking_recv().unwrap_or_else(|_| Err(dropped()))
    }
}

impl<R> Future for ResponseHandle<R> {
    type Output = Outcome<R>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().receiver)
            .poll(cx)
            .map(|res| res.unwrap_or_else(|_| Err(dropped())))
    }
}

fn dropped() -> Error {
    Error::runtime_with_context(
        "collapsed request was dropped before resolution",
        ErrorContext::new().with_source("response_handle"),
    )
}

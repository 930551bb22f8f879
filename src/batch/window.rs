//! Request windows.

use std::sync::Arc;

use tokio::task::AbortHandle;
use tokio::time::{Duration, Instant};

use super::slot::{PendingRequestSlot, ResponseHandle, SlotResolver};

/// What caused a window to seal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SealTrigger {
    /// The window reached its capacity.
    Size,
    /// The window deadline elapsed.
    Timer,
    /// Sealed explicitly (flush or teardown).
    Flush,
}

impl std::fmt::Display for SealTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SealTrigger::Size => write!(f, "size"),
            SealTrigger::Timer => write!(f, "timer"),
            SealTrigger::Flush => write!(f, "flush"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendResult {
    Added { count: usize },
    Full { count: usize },
}

impl AppendResult {
    pub fn should_seal(&self) -> bool {
        matches!(self, AppendResult::Full { .. })
    }

    pub fn count(&self) -> usize {
        match self {
            AppendResult::Added { count } | AppendResult::Full { count } => *count,
        }
    }
}

/// An open, growing window of requests sharing one collapsing key.
///
/// Appending requires `&mut self`; the owner serializes appends with the
/// seal check. Sealing consumes the window, so a sealed window cannot admit
/// new slots.
pub struct RequestWindow<A, R> {
    id: u64,
    key: Arc<str>,
    slots: Vec<PendingRequestSlot<A, R>>,
    opened_at: Instant,
    deadline: Instant,
    capacity: Option<usize>,
    timer: Option<AbortHandle>,
}

impl<A, R> RequestWindow<A, R> {
    pub fn new(id: u64, key: Arc<str>, duration: Duration, capacity: Option<usize>) -> Self {
        let opened_at = Instant::now();
        Self {
            id,
            key,
            slots: Vec::with_capacity(capacity.unwrap_or(0).min(1024)),
            opened_at,
            deadline: opened_at + duration,
            capacity,
            timer: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.capacity.map_or(false, |cap| self.slots.len() >= cap)
    }

    /// Attach the deadline timer so sealing by size can cancel it.
    pub fn set_timer(&mut self, timer: AbortHandle) {
        self.timer = Some(timer);
    }

    /// Append a request at the next position.
    pub fn append(&mut self, argument: A) -> (ResponseHandle<R>, AppendResult) {
        let (slot, handle) = PendingRequestSlot::new(self.slots.len(), argument);
        self.slots.push(slot);
        let count = self.slots.len();
        let result = if self.is_full() {
            AppendResult::Full { count }
        } else {
            AppendResult::Added { count }
        };
        (handle, result)
    }

    pub fn seal(mut self, trigger: SealTrigger) -> SealedWindow<A, R> {
        if trigger != SealTrigger::Timer {
            if let Some(timer) = self.timer.take() {
                timer.abort();
            }
        }
        SealedWindow {
            id: self.id,
            key: self.key,
            slots: self.slots,
            trigger,
            opened_at: self.opened_at,
        }
    }
}

/// A window that no longer accepts requests and is ready for execution.
pub struct SealedWindow<A, R> {
    id: u64,
    key: Arc<str>,
    slots: Vec<PendingRequestSlot<A, R>>,
    trigger: SealTrigger,
    opened_at: Instant,
}

impl<A, R> SealedWindow<A, R> {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn trigger(&self) -> SealTrigger {
        self.trigger
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Time the window spent open.
    pub fn age(&self) -> Duration {
        self.opened_at.elapsed()
    }

    /// Ordered arguments and their resolvers, both in position order.
    pub fn into_parts(self) -> (Vec<A>, Vec<SlotResolver<R>>) {
        self.slots.into_iter().map(PendingRequestSlot::into_parts).unzip()
    }
}

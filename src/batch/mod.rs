//! Windowing, execution and demultiplexing of collapsed requests.
//!
//! # Collapsed Batch Module
//!
//! Requests that share a collapsing key are appended to a [`RequestWindow`].
//! Once the window seals it becomes a [`SealedWindow`], which a
//! [`BatchExecutor`] runs through the external [`BatchCommand`] exactly once.
//! The [`ResponseDemultiplexer`] then hands response `i` to the request at
//! position `i`.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`PendingRequestSlot`] | One caller's argument plus its single-assignment result cell |
//! | [`ResponseHandle`] | Caller-side future resolving to the slot's outcome |
//! | [`RequestWindow`] | Ordered, growing set of slots with a deadline and capacity |
//! | [`BatchCommand`] | The downstream batch capability |
//! | [`BatchExecutor`] | Invokes the command and enforces the response contract |
//! | [`ResponseDemultiplexer`] | Positional routing of responses to slots |
//!
//! ## Response Contract
//!
//! The command must return at least as many entries as it received
//! arguments. A shorter list fails every request in the window with
//! [`crate::Error::ContractViolation`]; a command error fails every request
//! with the same [`crate::Error::BatchExecution`]. A `None` entry resolves
//! its caller with `Ok(None)`.
//!
//! ```rust
//! use request_collapser::batch::{batch_fn, BatchCommand};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let lookup = batch_fn(|ids: Vec<u32>| async move {
//!     Ok(ids.into_iter().map(|id| (id % 2 == 0).then(|| format!("user-{}", id))).collect())
//! });
//! let responses = lookup.execute(&[1, 2]).await?;
//! assert_eq!(responses, vec![None, Some("user-2".to_string())]);
//! # Ok(())
//! # }
//! ```

mod command;
mod demux;
mod executor;
mod slot;
mod window;

pub use command::{batch_fn, BatchCommand, BatchFn};
pub use demux::{DemuxSummary, ResponseDemultiplexer};
pub use executor::{BatchExecutor, ExecutionOutcome};
pub use slot::{Outcome, PendingRequestSlot, ResponseHandle, SlotResolver};
pub use window::{AppendResult, RequestWindow, SealTrigger, SealedWindow};

//! Per-key request collapsing.
//!
//! A [`RequestCollapser`] accepts requests for one collapsing key and groups
//! them into windows. A window seals when its deadline elapses or when it
//! reaches `max_batch_size`, whichever happens first; only the party that
//! takes the window out of the collapser hands it off, so a window is
//! executed once. A new window opens on the next submission, while the
//! previous one may still be executing.

mod config;
mod core;
mod metrics;

pub use self::core::RequestCollapser;
pub use config::{CollapserConfig, CollapsingKey, Scope};
pub use metrics::{CollapserMetrics, MetricsSnapshot};

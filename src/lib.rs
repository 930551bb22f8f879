//! # request-collapser
//!
//! Request collapsing runtime: many independently issued requests that share a
//! collapsing key are executed together as one downstream batch call, and the
//! batch result is routed back to each caller by position.
//!
//! ## Overview
//!
//! Callers submit an argument and receive a [`batch::ResponseHandle`]. Requests
//! for the same key accumulate in a window that seals when its time window
//! elapses or when it reaches the configured maximum batch size. The sealed
//! window is executed once through a [`batch::BatchCommand`]; response `i`
//! resolves request `i`.
//!
//! ## Core Guarantees
//!
//! - **Single hand-off**: a window is sealed and executed exactly once, whether
//!   the timer or a size-triggering submission gets there first
//! - **Positional routing**: the response list must be at least as long as the
//!   request list, otherwise every request fails with a contract violation
//! - **Atomic failures**: a failing batch fails every request in it with the same error
//! - **Caller isolation**: a caller giving up (timeout, drop) never affects the window
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use request_collapser::batch::batch_fn;
//! use request_collapser::{CollapserConfig, CollapserRegistry, Scope};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> request_collapser::Result<()> {
//!     let registry: CollapserRegistry<u64, String> = CollapserRegistry::new().with_command(
//!         "user-lookup",
//!         Arc::new(batch_fn(|ids: Vec<u64>| async move {
//!             Ok(ids.into_iter().map(|id| Some(format!("user-{}", id))).collect())
//!         })),
//!     );
//!
//!     let config = CollapserConfig::new("user-lookup")
//!         .with_scope(Scope::Global)
//!         .with_window_duration_ms(10)
//!         .with_max_batch_size(100);
//!     let collapser = registry.get_or_create(&config, None)?;
//!
//!     let (a, b) = tokio::join!(collapser.execute(1), collapser.execute(2));
//!     assert_eq!(a?, Some("user-1".to_string()));
//!     assert_eq!(b?, Some("user-2".to_string()));
//!
//!     registry.shutdown().await
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`batch`] | Slots, windows, batch command, executor and demultiplexer |
//! | [`collapser`] | Per-key collapser, configuration and metrics |
//! | [`registry`] | Key to collapser lookup and request contexts |

pub mod batch;
pub mod collapser;
pub mod registry;

pub use collapser::{CollapserConfig, CollapsingKey, MetricsSnapshot, RequestCollapser, Scope};
pub use registry::{CollapserRegistry, RequestContext};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};

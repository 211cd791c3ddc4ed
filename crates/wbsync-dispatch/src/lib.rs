//! wbsync dispatch
//!
//! Ordering layer between the document and the single-writer backend:
//!
//! - [`DispatchQueue`]: FIFO, non-overlapping execution with per-operation
//!   failure isolation and [`drain_to_stability`](DispatchQueue::drain_to_stability)
//! - [`DeltaBatcher`]: plans range/point writes for a change event and
//!   submits each one to the queue
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use wbsync_dispatch::{DeltaBatcher, DispatchQueue};
//!
//! let queue = Arc::new(DispatchQueue::new());
//! let batcher = DeltaBatcher::new(backend, Arc::clone(&queue));
//!
//! batcher.batch(&event.deltas);
//! queue.settle(1).await; // consistency checkpoint
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

mod batcher;
mod error;
mod queue;

pub use batcher::{plan_writes, DeltaBatcher, WriteCompletion, WriteResult, MAX_RANGE_WRITE_AREA};
pub use error::OpError;
pub use queue::{yield_once, Completion, DispatchQueue, QueueStats};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! wbsync backend capability
//!
//! The synchronization core talks to durable workbook state only through
//! [`WorkbookBackend`]. The implementation is chosen once at startup with
//! [`select_backend`]:
//!
//! - [`LocalBackend`]: in-process store persisted as JSON files
//! - [`DetachedBackend`]: no host at all; writes are accepted and dropped
//!
//! # Example
//!
//! ```rust,ignore
//! use wbsync_backend::{select_backend, BackendSelection};
//!
//! let backend = select_backend(BackendSelection::Local);
//! let descriptor = backend.new_workbook().await?;
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

mod backend;
mod detached;
mod error;
mod local;

pub use backend::{FileStat, SharedBackend, WorkbookBackend};
pub use detached::DetachedBackend;
pub use error::BackendError;
pub use local::{LocalBackend, DEFAULT_SHEET_NAME, MAX_RANGE_CELLS_PER_CALL};

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Which backend implementation to run against
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendSelection {
    /// In-process JSON-file backend
    #[default]
    Local,
    /// No host; writes are discarded
    Detached,
}

/// Build the backend for a selection
#[must_use]
pub fn select_backend(selection: BackendSelection) -> SharedBackend {
    match selection {
        BackendSelection::Local => Arc::new(LocalBackend::new()),
        BackendSelection::Detached => Arc::new(DetachedBackend::new()),
    }
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_picks_named_backend() {
        assert_eq!(select_backend(BackendSelection::Local).name(), "local");
        assert_eq!(select_backend(BackendSelection::Detached).name(), "detached");
    }

    #[test]
    fn selection_parses_lowercase() {
        let sel: BackendSelection = serde_json::from_str("\"detached\"").unwrap();
        assert_eq!(sel, BackendSelection::Detached);
    }
}

//! wbsync core
//!
//! Keeps a locally held document consistent with a single-writer workbook
//! backend while the user edits, and swaps the active workbook under that
//! live traffic.
//!
//! - [`start_sync`]: forwards document changes through the delta batcher
//! - [`WorkbookCoordinator`]: Open / New / Save / Save-As with drain,
//!   cache rescoping and rollback
//! - [`DocumentController`]: the document interface the core consumes, with
//!   [`InMemoryDocument`] as the in-process implementation
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use wbsync_backend::{select_backend, BackendSelection};
//! use wbsync_core::{AutoApprove, InMemoryDocument, SyncConfig, WorkbookCoordinator};
//! use wbsync_model::CellState;
//!
//! let coordinator = WorkbookCoordinator::new(
//!     select_backend(BackendSelection::Local),
//!     Arc::new(InMemoryDocument::new()),
//!     Arc::new(AutoApprove::new()),
//!     SyncConfig::default(),
//! )?;
//! coordinator.handle_new_workbook().await?;
//! coordinator
//!     .document()
//!     .set_cell_value("Sheet1", 0, 0, CellState::value(42));
//! coordinator.drain_backend_sync().await;
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod config;
pub mod coordinator;
pub mod document;
pub mod error;
pub mod hooks;
pub mod loader;
pub mod phase;
pub mod refresh;
pub mod simulator;
pub mod sync;

pub use config::SyncConfig;
pub use coordinator::{ActiveWorkbook, SaveOutcome, TransitionOutcome, WorkbookCoordinator};
pub use document::{
    ChangeEvent, ChangeListener, ChangeSource, DocumentController, InMemoryDocument, ListenerId,
};
pub use error::{SyncError, SyncResult};
pub use hooks::{AutoApprove, BeforeCloseHook, HookError, ShellPrompts, WorkbookScopedService};
pub use phase::{allowed_transitions, validate_transition, TransitionPhase};
pub use refresh::{RefreshMetadataStore, RefreshSchedule};
pub use sync::{start_sync, SyncHandle};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

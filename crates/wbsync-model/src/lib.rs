//! wbsync data model
//!
//! Types shared by every layer of the workbook synchronization core:
//!
//! - [`CellDelta`]: per-cell change produced by the document controller
//! - [`WriteCommand`]: range or point write derived from deltas
//! - [`WorkbookDescriptor`]: backend view of the active workbook
//! - [`WorkbookSignature`]: cache-scoping identity of a loaded workbook
//! - [`DocumentSnapshot`]: bulk state loaded into the document

#![warn(missing_docs)]
#![warn(unreachable_pub)]

mod cell;
mod command;
mod snapshot;
mod workbook;

pub use cell::{CellDelta, CellEdit, CellState};
pub use command::{CellRect, WriteCommand};
pub use snapshot::{DefinedName, DocumentSnapshot, SheetSnapshot, SnapshotCell, TableInfo};
pub use workbook::{SheetInfo, WorkbookDescriptor, WorkbookId, WorkbookSignature};

/// Re-exported so callers can build cell values without a direct dependency
pub use serde_json::Value as CellValue;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Backend capability trait
//!
//! The backend is the single-writer service holding durable workbook state.
//! Every command is a suspension point; callers that need ordering go through
//! the dispatch queue rather than calling write commands directly.

use crate::error::BackendError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use wbsync_model::{
    CellEdit, CellRect, CellState, DefinedName, TableInfo, WorkbookDescriptor, WriteCommand,
};

/// File metadata reported by `stat_file`
///
/// Either field may be missing when the host cannot report it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStat {
    /// Modification time, milliseconds since the Unix epoch
    pub mod_time_ms: Option<i64>,
    /// File size in bytes
    pub size_bytes: Option<u64>,
}

impl FileStat {
    /// Stat with both fields present
    #[inline]
    #[must_use]
    pub fn new(mod_time_ms: i64, size_bytes: u64) -> Self {
        Self {
            mod_time_ms: Some(mod_time_ms),
            size_bytes: Some(size_bytes),
        }
    }

    /// Both fields, when present
    #[inline]
    #[must_use]
    pub fn complete(&self) -> Option<(i64, u64)> {
        Some((self.mod_time_ms?, self.size_bytes?))
    }
}

/// Remote workbook command surface
#[async_trait]
pub trait WorkbookBackend: Send + Sync {
    /// Short backend name for logs and errors
    fn name(&self) -> &'static str;

    /// Read a rectangle of cells, row-major
    async fn get_range(
        &self,
        sheet_id: &str,
        rect: CellRect,
    ) -> Result<Vec<Vec<CellState>>, BackendError>;

    /// Write one cell
    async fn set_cell(
        &self,
        sheet_id: &str,
        row: u32,
        col: u32,
        edit: CellEdit,
    ) -> Result<(), BackendError>;

    /// Write a dense rectangle; `values` must match `rect`
    async fn set_range(
        &self,
        sheet_id: &str,
        rect: CellRect,
        values: Vec<Vec<CellEdit>>,
    ) -> Result<(), BackendError>;

    /// Open the workbook stored at `path`, replacing the current one
    ///
    /// On failure the current workbook stays loaded.
    async fn open_workbook(&self, path: &str) -> Result<WorkbookDescriptor, BackendError>;

    /// Replace the current workbook with an empty one
    async fn new_workbook(&self) -> Result<WorkbookDescriptor, BackendError>;

    /// Save in place (`None`) or to `path`, which becomes the new save path
    async fn save_workbook(&self, path: Option<&str>) -> Result<(), BackendError>;

    /// File metadata for cache signatures
    async fn stat_file(&self, _path: &str) -> Result<FileStat, BackendError> {
        Err(BackendError::unsupported(self.name(), "stat_file"))
    }

    /// Workbook defined names
    async fn list_defined_names(&self) -> Result<Vec<DefinedName>, BackendError> {
        Ok(Vec::new())
    }

    /// Workbook tables
    async fn list_tables(&self) -> Result<Vec<TableInfo>, BackendError> {
        Ok(Vec::new())
    }

    /// Bounding rectangle of non-empty cells, `None` for an empty sheet
    async fn get_sheet_used_range(&self, sheet_id: &str)
        -> Result<Option<CellRect>, BackendError>;

    /// Execute a derived write command
    async fn apply_write(&self, command: WriteCommand) -> Result<(), BackendError> {
        match command {
            WriteCommand::RangeWrite {
                sheet_id,
                rect,
                values,
            } => self.set_range(&sheet_id, rect, values).await,
            WriteCommand::PointWrite {
                sheet_id,
                row,
                col,
                edit,
            } => self.set_cell(&sheet_id, row, col, edit).await,
        }
    }
}

/// Shared handle to the selected backend
pub type SharedBackend = Arc<dyn WorkbookBackend>;

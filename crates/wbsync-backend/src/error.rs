//! Error types for backend commands

use std::path::PathBuf;
use wbsync_model::CellRect;

/// Errors returned by a [`WorkbookBackend`](crate::WorkbookBackend) command
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The backend does not implement this command
    #[error("{operation} is not supported by the {backend} backend")]
    Unsupported {
        /// Backend name
        backend: &'static str,
        /// Command name
        operation: &'static str,
    },

    /// No workbook is loaded
    #[error("no workbook is open")]
    NoWorkbook,

    /// Unknown sheet id
    #[error("sheet not found: {0}")]
    SheetNotFound(String),

    /// Start exceeds end on some axis
    #[error("invalid range {0}")]
    InvalidRange(CellRect),

    /// Range exceeds the per-call cell limit
    #[error("range {rect} covers {cells} cells (limit {limit})")]
    RangeTooLarge {
        /// Requested range
        rect: CellRect,
        /// Cells covered
        cells: u64,
        /// Per-call limit
        limit: u64,
    },

    /// Values grid does not match the target rectangle
    #[error("values shape {rows}x{cols} does not match range {rect}")]
    ShapeMismatch {
        /// Target range
        rect: CellRect,
        /// Rows supplied
        rows: usize,
        /// Columns in the first mismatching row
        cols: usize,
    },

    /// Save requested without a path and the workbook has none
    #[error("no save path provided")]
    NoSavePath,

    /// Filesystem failure
    #[error("io error on {path}: {source}")]
    Io {
        /// Path involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Workbook file could not be (de)serialized
    #[error("invalid workbook file {path}: {source}")]
    Serialization {
        /// Path involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },

    /// Remote host refused the command
    #[error("backend rejected command: {0}")]
    Rejected(String),
}

impl BackendError {
    /// Unsupported-command error
    #[inline]
    #[must_use]
    pub fn unsupported(backend: &'static str, operation: &'static str) -> Self {
        Self::Unsupported { backend, operation }
    }

    /// IO error for path
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the error only means "this host lacks the capability"
    #[inline]
    #[must_use]
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }
}

//! Cache errors

use wbsync_model::WorkbookSignature;

/// Errors from signature-scoped caches
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    /// Entries computed under one workbook were offered to a cache scoped to another
    #[error("signature mismatch: cache holds {expected:?}, entries carry {actual}")]
    SignatureMismatch {
        /// Signature the cache is currently scoped to (none before the first reset)
        expected: Option<WorkbookSignature>,
        /// Signature the entries were computed under
        actual: WorkbookSignature,
    },
}

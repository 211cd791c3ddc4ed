//! Error taxonomy for the synchronization core
//!
//! Routine write failures never reach this type: they are isolated and
//! logged by the dispatch queue. What remains are workbook-identity errors,
//! which always propagate to the caller.

use crate::phase::TransitionPhase;
use wbsync_backend::BackendError;
use wbsync_cache::CacheError;

/// Result alias for coordinator operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors surfaced by transitions and configuration
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// A backend command failed during a transition or save
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// A cache refused an operation
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    /// Save requested with no workbook loaded
    #[error("no active workbook")]
    NoActiveWorkbook,

    /// Another transition is still running
    #[error("a workbook transition is already in progress")]
    TransitionInProgress,

    /// Coordinator attempted a phase change its state machine forbids
    #[error("illegal transition phase change: {from} -> {to}")]
    IllegalPhase {
        /// Phase before the attempted change
        from: TransitionPhase,
        /// Requested phase
        to: TransitionPhase,
    },

    /// A transition failed after the backend swapped workbooks, and putting
    /// the previous workbook back into the backend failed too
    #[error("{transition}; restoring the previous workbook also failed: {restore}")]
    RestoreFailed {
        /// Why the transition failed
        transition: Box<SyncError>,
        /// Why the restore failed
        restore: Box<SyncError>,
    },

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Whether the shell should raise an alert for this error
    ///
    /// Every transition failure is user visible; configuration errors are
    /// reported at startup instead.
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, SyncError::Config(_))
    }

    /// Whether the error indicates a coordinator bug rather than a failed command
    pub fn is_internal(&self) -> bool {
        matches!(self, SyncError::IllegalPhase { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_errors_convert_and_are_visible() {
        let err: SyncError = BackendError::NoSavePath.into();
        assert!(matches!(err, SyncError::Backend(BackendError::NoSavePath)));
        assert!(err.is_user_visible());
        assert!(!err.is_internal());
    }

    #[test]
    fn config_errors_are_not_alerts() {
        let err = SyncError::Config("load_chunk_rows must be positive".into());
        assert!(!err.is_user_visible());
        assert_eq!(
            err.to_string(),
            "configuration error: load_chunk_rows must be positive"
        );
    }

    #[test]
    fn illegal_phase_message() {
        let err = SyncError::IllegalPhase {
            from: TransitionPhase::Idle,
            to: TransitionPhase::Loading,
        };
        assert!(err.is_internal());
        assert_eq!(
            err.to_string(),
            "illegal transition phase change: idle -> loading"
        );
    }

    #[test]
    fn restore_failure_reports_both_causes() {
        let err = SyncError::RestoreFailed {
            transition: Box::new(BackendError::Rejected("reads disabled".into()).into()),
            restore: Box::new(BackendError::NoWorkbook.into()),
        };
        assert!(err.is_user_visible());
        let message = err.to_string();
        assert!(message.contains("reads disabled"));
        assert!(message.contains("no workbook is open"));
    }
}

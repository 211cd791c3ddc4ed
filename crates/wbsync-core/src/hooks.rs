//! Shell-facing capabilities used during transitions
//!
//! The coordinator never talks to UI directly: prompts, the outgoing
//! workbook's before-close hook and workbook-scoped background services are
//! injected behind these traits.

use async_trait::async_trait;
use wbsync_model::WorkbookId;

/// User prompts
#[async_trait]
pub trait ShellPrompts: Send + Sync {
    /// Ask whether unsaved changes may be discarded
    async fn confirm_discard_changes(&self) -> bool;

    /// Ask for a save location; `None` cancels
    async fn choose_save_path(&self, suggested: Option<&str>) -> Option<String>;
}

/// Error reported by a before-close hook
#[derive(Debug, Clone, thiserror::Error)]
#[error("before-close hook failed: {0}")]
pub struct HookError(pub String);

/// Work to run before a workbook is closed (e.g. a `Workbook_BeforeClose` macro)
///
/// Runs after the queue has drained; anything it enqueues is drained again
/// before the workbook closes. Errors are logged and never block the close.
#[async_trait]
pub trait BeforeCloseHook: Send + Sync {
    /// Run for the workbook about to close
    async fn before_close(&self, workbook: &WorkbookId) -> Result<(), HookError>;
}

/// Background service keyed by workbook identity (refresh scheduler, autosave...)
pub trait WorkbookScopedService: Send + Sync {
    /// Service name for logs
    fn name(&self) -> &str;

    /// Restart under `workbook`
    fn restart(&self, workbook: &WorkbookId);
}

/// Prompts for unattended runs: always discards, saves to a fixed path if given
#[derive(Debug, Clone, Default)]
pub struct AutoApprove {
    save_path: Option<String>,
}

impl AutoApprove {
    /// Approve discards, cancel save-as prompts
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Approve discards, answer save-as prompts with `path`
    #[must_use]
    pub fn with_save_path(path: impl Into<String>) -> Self {
        Self {
            save_path: Some(path.into()),
        }
    }
}

#[async_trait]
impl ShellPrompts for AutoApprove {
    async fn confirm_discard_changes(&self) -> bool {
        true
    }

    async fn choose_save_path(&self, _suggested: Option<&str>) -> Option<String> {
        self.save_path.clone()
    }
}

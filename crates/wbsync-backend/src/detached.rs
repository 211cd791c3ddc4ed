//! Backend for shells running without any workbook host
//!
//! Accepts and discards writes so editing keeps working; anything that needs
//! durable storage reports `Unsupported`.

use crate::backend::WorkbookBackend;
use crate::error::BackendError;
use crate::local::DEFAULT_SHEET_NAME;
use async_trait::async_trait;
use wbsync_model::{CellEdit, CellRect, CellState, SheetInfo, WorkbookDescriptor};

/// No-op backend
#[derive(Debug, Clone, Copy, Default)]
pub struct DetachedBackend;

impl DetachedBackend {
    /// Create detached backend
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl WorkbookBackend for DetachedBackend {
    fn name(&self) -> &'static str {
        "detached"
    }

    async fn get_range(
        &self,
        _sheet_id: &str,
        rect: CellRect,
    ) -> Result<Vec<Vec<CellState>>, BackendError> {
        if !rect.is_valid() {
            return Err(BackendError::InvalidRange(rect));
        }
        Ok(vec![
            vec![CellState::empty(); rect.col_count() as usize];
            rect.row_count() as usize
        ])
    }

    async fn set_cell(
        &self,
        _sheet_id: &str,
        _row: u32,
        _col: u32,
        _edit: CellEdit,
    ) -> Result<(), BackendError> {
        Ok(())
    }

    async fn set_range(
        &self,
        _sheet_id: &str,
        _rect: CellRect,
        _values: Vec<Vec<CellEdit>>,
    ) -> Result<(), BackendError> {
        Ok(())
    }

    async fn open_workbook(&self, _path: &str) -> Result<WorkbookDescriptor, BackendError> {
        Err(BackendError::unsupported(self.name(), "open_workbook"))
    }

    async fn new_workbook(&self) -> Result<WorkbookDescriptor, BackendError> {
        Ok(WorkbookDescriptor::unsaved(vec![SheetInfo::new(
            DEFAULT_SHEET_NAME,
            DEFAULT_SHEET_NAME,
        )]))
    }

    async fn save_workbook(&self, _path: Option<&str>) -> Result<(), BackendError> {
        Err(BackendError::unsupported(self.name(), "save_workbook"))
    }

    async fn get_sheet_used_range(
        &self,
        _sheet_id: &str,
    ) -> Result<Option<CellRect>, BackendError> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_are_accepted_and_storage_is_unsupported() {
        let backend = DetachedBackend::new();
        assert!(backend.set_cell("Sheet1", 0, 0, CellEdit::empty()).await.is_ok());
        assert!(backend.new_workbook().await.is_ok());

        let err = backend.save_workbook(Some("/tmp/x.json")).await.unwrap_err();
        assert!(err.is_unsupported());
        assert!(backend.stat_file("/tmp/x.json").await.unwrap_err().is_unsupported());
    }
}

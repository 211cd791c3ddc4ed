//! Bulk document state and workbook metadata

use crate::cell::CellState;
use crate::command::CellRect;
use serde::{Deserialize, Serialize};

/// One non-empty cell inside a sheet snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotCell {
    /// Row
    pub row: u32,
    /// Column
    pub col: u32,
    /// Content
    #[serde(flatten)]
    pub state: CellState,
}

/// Sparse content of one sheet
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SheetSnapshot {
    /// Sheet id
    pub id: String,
    /// Display name
    pub name: String,
    /// Non-empty cells
    pub cells: Vec<SnapshotCell>,
}

impl SheetSnapshot {
    /// Empty sheet
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            cells: Vec::new(),
        }
    }

    /// Append a cell, skipping empty content
    pub fn push(&mut self, row: u32, col: u32, state: CellState) {
        if !state.is_empty() {
            self.cells.push(SnapshotCell { row, col, state });
        }
    }
}

/// Whole-document state handed to `apply_state`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    /// Sheets in display order
    pub sheets: Vec<SheetSnapshot>,
}

impl DocumentSnapshot {
    /// Total number of non-empty cells
    #[must_use]
    pub fn cell_count(&self) -> usize {
        self.sheets.iter().map(|s| s.cells.len()).sum()
    }
}

/// Workbook-level defined name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefinedName {
    /// Name as typed in formulas
    pub name: String,
    /// Reference text, e.g. `Sheet1!$A$1:$B$4`
    pub refers_to: String,
    /// Owning sheet for sheet-scoped names
    #[serde(default)]
    pub sheet_id: Option<String>,
}

/// Structured table on a sheet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableInfo {
    /// Table name
    pub name: String,
    /// Sheet holding the table
    pub sheet_id: String,
    /// Covered cells, header row included
    pub rect: CellRect,
    /// Column headers
    #[serde(default)]
    pub columns: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_skips_empty_cells() {
        let mut sheet = SheetSnapshot::new("s", "S");
        sheet.push(0, 0, CellState::empty());
        sheet.push(0, 1, CellState::value(3));
        sheet.push(1, 1, CellState::formula("=B1"));

        let doc = DocumentSnapshot { sheets: vec![sheet] };
        assert_eq!(doc.cell_count(), 2);
    }
}

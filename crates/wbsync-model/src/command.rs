//! Backend write commands
//!
//! Derived from cell deltas, submitted once to the dispatch queue and
//! discarded after execution.

use crate::cell::CellEdit;
use serde::{Deserialize, Serialize};

/// Inclusive rectangle of cells on one sheet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellRect {
    /// First row (inclusive)
    pub start_row: u32,
    /// First column (inclusive)
    pub start_col: u32,
    /// Last row (inclusive)
    pub end_row: u32,
    /// Last column (inclusive)
    pub end_col: u32,
}

impl CellRect {
    /// Create rectangle from inclusive bounds
    #[inline]
    #[must_use]
    pub fn new(start_row: u32, start_col: u32, end_row: u32, end_col: u32) -> Self {
        Self {
            start_row,
            start_col,
            end_row,
            end_col,
        }
    }

    /// Single-cell rectangle
    #[inline]
    #[must_use]
    pub fn cell(row: u32, col: u32) -> Self {
        Self::new(row, col, row, col)
    }

    /// True when start does not exceed end on both axes
    #[inline]
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.start_row <= self.end_row && self.start_col <= self.end_col
    }

    /// Number of rows (0 for an inverted rectangle)
    #[inline]
    #[must_use]
    pub fn row_count(&self) -> u64 {
        if self.end_row < self.start_row {
            return 0;
        }
        u64::from(self.end_row - self.start_row) + 1
    }

    /// Number of columns (0 for an inverted rectangle)
    #[inline]
    #[must_use]
    pub fn col_count(&self) -> u64 {
        if self.end_col < self.start_col {
            return 0;
        }
        u64::from(self.end_col - self.start_col) + 1
    }

    /// Number of cells covered
    #[inline]
    #[must_use]
    pub fn area(&self) -> u64 {
        self.row_count() * self.col_count()
    }

    /// Whether the cell lies inside the rectangle
    #[inline]
    #[must_use]
    pub fn contains(&self, row: u32, col: u32) -> bool {
        (self.start_row..=self.end_row).contains(&row)
            && (self.start_col..=self.end_col).contains(&col)
    }

    /// Smallest rectangle covering both
    #[must_use]
    pub fn union(&self, other: &CellRect) -> CellRect {
        CellRect {
            start_row: self.start_row.min(other.start_row),
            start_col: self.start_col.min(other.start_col),
            end_row: self.end_row.max(other.end_row),
            end_col: self.end_col.max(other.end_col),
        }
    }
}

impl std::fmt::Display for CellRect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "R{}C{}:R{}C{}",
            self.start_row, self.start_col, self.end_row, self.end_col
        )
    }
}

/// A single backend write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum WriteCommand {
    /// Dense rectangular write; `values` is row-major and matches `rect`
    #[serde(rename_all = "camelCase")]
    RangeWrite {
        /// Target sheet
        sheet_id: String,
        /// Covered rectangle
        rect: CellRect,
        /// Row-major payloads
        values: Vec<Vec<CellEdit>>,
    },
    /// Single-cell write
    #[serde(rename_all = "camelCase")]
    PointWrite {
        /// Target sheet
        sheet_id: String,
        /// Row
        row: u32,
        /// Column
        col: u32,
        /// Payload
        edit: CellEdit,
    },
}

impl WriteCommand {
    /// Target sheet id
    #[inline]
    #[must_use]
    pub fn sheet_id(&self) -> &str {
        match self {
            Self::RangeWrite { sheet_id, .. } | Self::PointWrite { sheet_id, .. } => sheet_id,
        }
    }

    /// Number of cells touched
    #[must_use]
    pub fn cell_count(&self) -> u64 {
        match self {
            Self::RangeWrite { rect, .. } => rect.area(),
            Self::PointWrite { .. } => 1,
        }
    }

    /// Whether this is a rectangular write
    #[inline]
    #[must_use]
    pub fn is_range(&self) -> bool {
        matches!(self, Self::RangeWrite { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_area_and_contains() {
        let rect = CellRect::new(2, 3, 3, 4);
        assert_eq!(rect.row_count(), 2);
        assert_eq!(rect.col_count(), 2);
        assert_eq!(rect.area(), 4);
        assert!(rect.contains(3, 4));
        assert!(!rect.contains(1, 4));
        assert!(!rect.contains(3, 5));
    }

    #[test]
    fn inverted_rect_is_empty() {
        let rect = CellRect::new(5, 0, 4, 0);
        assert!(!rect.is_valid());
        assert_eq!(rect.area(), 0);
    }

    #[test]
    fn rect_union_covers_both() {
        let a = CellRect::cell(0, 0);
        let b = CellRect::cell(5, 5);
        assert_eq!(a.union(&b), CellRect::new(0, 0, 5, 5));
        assert_eq!(a.union(&b).area(), 36);
    }

    #[test]
    fn command_serializes_with_kind_tag() {
        let cmd = WriteCommand::PointWrite {
            sheet_id: "S".to_string(),
            row: 1,
            col: 2,
            edit: CellEdit::empty(),
        };
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["kind"], "pointWrite");
        assert_eq!(json["sheetId"], "S");
        assert_eq!(cmd.cell_count(), 1);
        assert!(!cmd.is_range());
    }
}

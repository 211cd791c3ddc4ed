//! Cell-level types
//!
//! - [`CellState`]: value-or-formula content of one cell
//! - [`CellEdit`]: the payload written to the backend for one cell
//! - [`CellDelta`]: a before/after change reported by the document

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Content of a single cell as held by the document or the backend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellState {
    /// Literal value (`Null` when the cell has no literal)
    #[serde(default)]
    pub value: Value,
    /// Formula text, including the leading `=`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
}

impl CellState {
    /// Empty cell
    #[inline]
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Cell holding a literal value
    #[inline]
    #[must_use]
    pub fn value(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            formula: None,
        }
    }

    /// Cell holding a formula
    #[inline]
    #[must_use]
    pub fn formula(formula: impl Into<String>) -> Self {
        Self {
            value: Value::Null,
            formula: Some(formula.into()),
        }
    }

    /// Formula text if present and non-empty
    #[inline]
    #[must_use]
    pub fn non_empty_formula(&self) -> Option<&str> {
        self.formula.as_deref().filter(|f| !f.is_empty())
    }

    /// True when the cell has neither a value nor a formula
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.value.is_null() && self.non_empty_formula().is_none()
    }
}

/// Payload of a single-cell write
///
/// A formula and a literal value are mutually exclusive: at most one of
/// `value` (non-null) and `formula` is set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellEdit {
    /// Literal to write (`Null` clears the literal)
    pub value: Value,
    /// Formula to write
    pub formula: Option<String>,
}

impl CellEdit {
    /// Edit that clears the cell
    #[inline]
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build the write payload for the target state of a cell.
    ///
    /// A non-empty formula wins and drops the literal; otherwise the literal
    /// is written and the formula cleared.
    #[must_use]
    pub fn from_state(state: &CellState) -> Self {
        match state.non_empty_formula() {
            Some(formula) => Self {
                value: Value::Null,
                formula: Some(formula.to_string()),
            },
            None => Self {
                value: state.value.clone(),
                formula: None,
            },
        }
    }

    /// Cell state this edit produces once applied
    #[must_use]
    pub fn into_state(self) -> CellState {
        CellState {
            value: self.value,
            formula: self.formula,
        }
    }
}

/// One cell's change, as emitted by the document controller
///
/// Coordinates are signed because the producer is untrusted: negative
/// coordinates mark a malformed delta that the batcher drops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellDelta {
    /// Sheet the cell belongs to
    pub sheet_id: String,
    /// Zero-based row
    pub row: i64,
    /// Zero-based column
    pub col: i64,
    /// State before the mutation
    #[serde(default)]
    pub before: CellState,
    /// State after the mutation
    #[serde(default)]
    pub after: CellState,
}

impl CellDelta {
    /// Delta from an empty cell to `after`
    #[must_use]
    pub fn new(sheet_id: impl Into<String>, row: i64, col: i64, after: CellState) -> Self {
        Self {
            sheet_id: sheet_id.into(),
            row,
            col,
            before: CellState::empty(),
            after,
        }
    }

    /// With an explicit before state
    #[inline]
    #[must_use]
    pub fn with_before(mut self, before: CellState) -> Self {
        self.before = before;
        self
    }

    /// Validated `(row, col)`, or `None` when either coordinate is out of range
    #[must_use]
    pub fn coords(&self) -> Option<(u32, u32)> {
        let row = u32::try_from(self.row).ok()?;
        let col = u32::try_from(self.col).ok()?;
        Some((row, col))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn edit_prefers_formula_over_value() {
        let state = CellState {
            value: json!(42),
            formula: Some("=A1*2".to_string()),
        };
        let edit = CellEdit::from_state(&state);

        assert_eq!(edit.value, Value::Null);
        assert_eq!(edit.formula.as_deref(), Some("=A1*2"));
    }

    #[test]
    fn edit_with_empty_formula_keeps_value() {
        let state = CellState {
            value: json!("hello"),
            formula: Some(String::new()),
        };
        let edit = CellEdit::from_state(&state);

        assert_eq!(edit.value, json!("hello"));
        assert!(edit.formula.is_none());
    }

    #[test]
    fn delta_coords_reject_negative() {
        let ok = CellDelta::new("S", 2, 3, CellState::value(1));
        let bad_row = CellDelta::new("S", -1, 3, CellState::value(1));
        let bad_col = CellDelta::new("S", 0, -7, CellState::value(1));

        assert_eq!(ok.coords(), Some((2, 3)));
        assert_eq!(bad_row.coords(), None);
        assert_eq!(bad_col.coords(), None);
    }

    #[test]
    fn delta_coords_reject_overflow() {
        let huge = CellDelta::new("S", i64::from(u32::MAX) + 1, 0, CellState::empty());
        assert_eq!(huge.coords(), None);
    }

    #[test]
    fn delta_deserializes_camel_case() {
        let delta: CellDelta = serde_json::from_value(json!({
            "sheetId": "Sheet1",
            "row": 4,
            "col": 1,
            "after": { "value": "x" }
        }))
        .unwrap();

        assert_eq!(delta.sheet_id, "Sheet1");
        assert_eq!(delta.after, CellState::value("x"));
        assert!(delta.before.is_empty());
    }

    #[test]
    fn state_emptiness() {
        assert!(CellState::empty().is_empty());
        assert!(CellState::formula("").is_empty());
        assert!(!CellState::value(0).is_empty());
        assert!(!CellState::formula("=1").is_empty());
    }
}

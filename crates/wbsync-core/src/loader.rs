//! Chunked bulk transfer between backend and document
//!
//! [`load_snapshot`] reads a workbook into a snapshot; [`replay_snapshot`]
//! writes a snapshot back over a freshly opened workbook.

use std::collections::BTreeMap;
use wbsync_backend::{BackendError, WorkbookBackend};
use wbsync_model::{
    CellEdit, CellRect, CellState, DocumentSnapshot, SheetSnapshot, WorkbookDescriptor,
};

/// Split `used` into row-major chunks of at most `rows` x `cols` cells
pub fn chunk_rect(used: CellRect, rows: u32, cols: u32) -> Vec<CellRect> {
    let rows = rows.max(1);
    let cols = cols.max(1);
    let mut chunks = Vec::new();

    let mut row = used.start_row;
    while row <= used.end_row {
        let end_row = row.saturating_add(rows - 1).min(used.end_row);
        let mut col = used.start_col;
        while col <= used.end_col {
            let end_col = col.saturating_add(cols - 1).min(used.end_col);
            chunks.push(CellRect::new(row, col, end_row, end_col));
            match end_col.checked_add(1) {
                Some(next) => col = next,
                None => break,
            }
        }
        match end_row.checked_add(1) {
            Some(next) => row = next,
            None => break,
        }
    }
    chunks
}

/// Read every sheet of `descriptor` into a snapshot
///
/// Sheets are read over their used range only, one chunk per backend call.
pub async fn load_snapshot(
    backend: &dyn WorkbookBackend,
    descriptor: &WorkbookDescriptor,
    chunk_rows: u32,
    chunk_cols: u32,
) -> Result<DocumentSnapshot, BackendError> {
    let mut sheets = Vec::with_capacity(descriptor.sheets.len());
    let mut reads = 0usize;

    for info in &descriptor.sheets {
        let mut sheet = SheetSnapshot::new(info.id.as_str(), info.name.as_str());
        if let Some(used) = backend.get_sheet_used_range(&info.id).await? {
            for chunk in chunk_rect(used, chunk_rows, chunk_cols) {
                let values = backend.get_range(&info.id, chunk).await?;
                reads += 1;
                for (row, row_values) in (chunk.start_row..).zip(values) {
                    for (col, state) in (chunk.start_col..).zip(row_values) {
                        sheet.push(row, col, state);
                    }
                }
            }
        }
        sheets.push(sheet);
    }

    let snapshot = DocumentSnapshot { sheets };
    tracing::debug!(
        sheets = snapshot.sheets.len(),
        cells = snapshot.cell_count(),
        reads,
        "workbook content loaded"
    );
    Ok(snapshot)
}

/// Make the backend's sheets hold exactly `snapshot`
///
/// Writes every cell in the union of each sheet's used range and the
/// snapshot's cells, so backend cells missing from the snapshot are cleared.
/// Sheets the backend's `descriptor` does not list are skipped. Returns the
/// number of range writes issued.
pub async fn replay_snapshot(
    backend: &dyn WorkbookBackend,
    descriptor: &WorkbookDescriptor,
    snapshot: &DocumentSnapshot,
    chunk_rows: u32,
    chunk_cols: u32,
) -> Result<usize, BackendError> {
    let mut writes = 0usize;

    for sheet in &snapshot.sheets {
        if descriptor.sheet(&sheet.id).is_none() {
            tracing::warn!(sheet = %sheet.id, "sheet missing from backend workbook; not replayed");
            continue;
        }

        let cells: BTreeMap<(u32, u32), &CellState> = sheet
            .cells
            .iter()
            .map(|c| ((c.row, c.col), &c.state))
            .collect();
        let used = backend.get_sheet_used_range(&sheet.id).await?;
        let Some(rect) = cells
            .keys()
            .map(|&(row, col)| CellRect::cell(row, col))
            .chain(used)
            .reduce(|acc, r| acc.union(&r))
        else {
            continue;
        };

        for chunk in chunk_rect(rect, chunk_rows, chunk_cols) {
            let values: Vec<Vec<CellEdit>> = (chunk.start_row..=chunk.end_row)
                .map(|row| {
                    (chunk.start_col..=chunk.end_col)
                        .map(|col| {
                            cells
                                .get(&(row, col))
                                .map_or_else(CellEdit::empty, |state| CellEdit::from_state(state))
                        })
                        .collect()
                })
                .collect();
            backend.set_range(&sheet.id, chunk, values).await?;
            writes += 1;
        }
    }

    tracing::debug!(cells = snapshot.cell_count(), writes, "snapshot replayed into backend");
    Ok(writes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wbsync_backend::LocalBackend;
    use wbsync_model::{CellEdit, CellState};

    #[test]
    fn chunks_cover_rect_exactly() {
        let used = CellRect::new(0, 0, 9, 4);
        let chunks = chunk_rect(used, 4, 3);
        // rows 0-3, 4-7, 8-9 x cols 0-2, 3-4
        assert_eq!(chunks.len(), 6);
        assert_eq!(chunks[0], CellRect::new(0, 0, 3, 2));
        assert_eq!(chunks[1], CellRect::new(0, 3, 3, 4));
        assert_eq!(chunks[5], CellRect::new(8, 3, 9, 4));
        let total: u64 = chunks.iter().map(CellRect::area).sum();
        assert_eq!(total, used.area());
    }

    #[test]
    fn single_cell_is_one_chunk() {
        let used = CellRect::cell(7, 7);
        assert_eq!(chunk_rect(used, 500, 100), vec![used]);
    }

    #[tokio::test]
    async fn loads_cells_across_chunks() {
        let backend = LocalBackend::new();
        let desc = backend.new_workbook().await.unwrap();
        for (row, col) in [(0, 0), (5, 1), (11, 6)] {
            backend
                .set_cell(
                    "Sheet1",
                    row,
                    col,
                    CellEdit::from_state(&CellState::value(format!("{row}:{col}"))),
                )
                .await
                .unwrap();
        }

        let snapshot = load_snapshot(&backend, &desc, 4, 4).await.unwrap();
        assert_eq!(snapshot.cell_count(), 3);
        let cells = &snapshot.sheets[0].cells;
        assert!(cells
            .iter()
            .any(|c| c.row == 11 && c.col == 6 && c.state == CellState::value("11:6")));
    }

    #[tokio::test]
    async fn replay_overwrites_and_clears() {
        let backend = LocalBackend::new();
        let desc = backend.new_workbook().await.unwrap();
        for (row, col, value) in [(0, 0, "stale"), (9, 9, "gone")] {
            backend
                .set_cell("Sheet1", row, col, CellEdit::from_state(&CellState::value(value)))
                .await
                .unwrap();
        }

        let mut sheet = SheetSnapshot::new("Sheet1", "Sheet1");
        sheet.push(0, 0, CellState::value("fresh"));
        sheet.push(2, 3, CellState::formula("=A1"));
        let mut other = SheetSnapshot::new("Elsewhere", "Elsewhere");
        other.push(0, 0, CellState::value(1));
        let snapshot = DocumentSnapshot {
            sheets: vec![sheet, other],
        };

        let writes = replay_snapshot(&backend, &desc, &snapshot, 4, 4).await.unwrap();
        assert_eq!(writes, 9);
        assert_eq!(backend.cell("Sheet1", 0, 0), Some(CellState::value("fresh")));
        assert_eq!(backend.cell("Sheet1", 2, 3), Some(CellState::formula("=A1")));
        assert_eq!(backend.cell("Sheet1", 9, 9), None);

        let reloaded = load_snapshot(&backend, &desc, 4, 4).await.unwrap();
        assert_eq!(reloaded.cell_count(), 2);
    }

    #[tokio::test]
    async fn empty_sheet_loads_without_reads() {
        let backend = LocalBackend::new();
        let desc = backend.new_workbook().await.unwrap();
        let snapshot = load_snapshot(&backend, &desc, 10, 10).await.unwrap();
        assert_eq!(snapshot.sheets.len(), 1);
        assert_eq!(snapshot.cell_count(), 0);
    }
}

//! Delta batcher
//!
//! Turns one change event's cell deltas into backend writes. Per sheet, the
//! deltas either densely fill their bounding rectangle (one `RangeWrite`) or
//! they do not (one `PointWrite` per delta, in delta order).

use crate::error::OpError;
use crate::queue::{Completion, DispatchQueue};
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;
use wbsync_backend::{BackendError, SharedBackend};
use wbsync_model::{CellDelta, CellEdit, CellRect, WriteCommand};

/// Largest rectangle collapsed into a single range write
pub const MAX_RANGE_WRITE_AREA: u64 = 10_000;

/// Completion of one submitted write
pub type WriteCompletion = Completion<(), BackendError>;

/// Result of awaiting a [`WriteCompletion`]
pub type WriteResult = Result<(), OpError<BackendError>>;

/// Plan the backend writes for one change event.
///
/// Deltas with out-of-range coordinates are dropped. Sheets appear in
/// first-seen order.
#[must_use]
pub fn plan_writes(deltas: &[CellDelta], max_range_area: u64) -> Vec<WriteCommand> {
    let mut by_sheet: IndexMap<&str, Vec<(u32, u32, &CellDelta)>> = IndexMap::new();
    let mut malformed = 0usize;

    for delta in deltas {
        match delta.coords() {
            Some((row, col)) => by_sheet
                .entry(delta.sheet_id.as_str())
                .or_default()
                .push((row, col, delta)),
            None => malformed += 1,
        }
    }
    if malformed > 0 {
        tracing::debug!(malformed, "discarded malformed cell deltas");
    }

    let mut commands = Vec::new();
    for (sheet_id, cells) in by_sheet {
        plan_sheet(sheet_id, &cells, max_range_area, &mut commands);
    }
    commands
}

fn plan_sheet(
    sheet_id: &str,
    cells: &[(u32, u32, &CellDelta)],
    max_range_area: u64,
    out: &mut Vec<WriteCommand>,
) {
    let Some(rect) = cells
        .iter()
        .map(|&(row, col, _)| CellRect::cell(row, col))
        .reduce(|acc, r| acc.union(&r))
    else {
        return;
    };

    let area = rect.area();
    if area == cells.len() as u64 && area > 1 && area <= max_range_area {
        out.push(range_write(sheet_id, rect, cells));
        return;
    }

    out.extend(cells.iter().map(|&(row, col, delta)| WriteCommand::PointWrite {
        sheet_id: sheet_id.to_string(),
        row,
        col,
        edit: CellEdit::from_state(&delta.after),
    }));
}

fn range_write(sheet_id: &str, rect: CellRect, cells: &[(u32, u32, &CellDelta)]) -> WriteCommand {
    let rows = rect.row_count() as usize;
    let cols = rect.col_count() as usize;
    let mut grid: Vec<Vec<Option<CellEdit>>> = vec![vec![None; cols]; rows];

    for &(row, col, delta) in cells {
        let r = (row - rect.start_row) as usize;
        let c = (col - rect.start_col) as usize;
        grid[r][c] = Some(CellEdit::from_state(&delta.after));
    }

    // Only reachable when a sheet's deltas repeat a coordinate: the count
    // matches the area but some cell has no delta.
    let mut gaps = 0usize;
    let values: Vec<Vec<CellEdit>> = grid
        .into_iter()
        .map(|row| {
            row.into_iter()
                .map(|cell| {
                    cell.unwrap_or_else(|| {
                        gaps += 1;
                        CellEdit::empty()
                    })
                })
                .collect()
        })
        .collect();
    if gaps > 0 {
        tracing::warn!(sheet_id, %rect, gaps, "range write has cells without deltas; writing them empty");
    }

    WriteCommand::RangeWrite {
        sheet_id: sheet_id.to_string(),
        rect,
        values,
    }
}

/// Submits planned writes to the dispatch queue
#[derive(Clone)]
pub struct DeltaBatcher {
    backend: SharedBackend,
    queue: Arc<DispatchQueue>,
    max_range_area: u64,
}

impl DeltaBatcher {
    /// Create batcher writing to `backend` through `queue`
    #[must_use]
    pub fn new(backend: SharedBackend, queue: Arc<DispatchQueue>) -> Self {
        Self {
            backend,
            queue,
            max_range_area: MAX_RANGE_WRITE_AREA,
        }
    }

    /// With a custom range-write area bound
    #[inline]
    #[must_use]
    pub fn with_max_range_area(mut self, max_range_area: u64) -> Self {
        self.max_range_area = max_range_area;
        self
    }

    /// Plan and submit writes for one change event
    ///
    /// Each command is enqueued on its own, so a failing command never blocks
    /// the others. The completions may be dropped.
    pub fn batch(&self, deltas: &[CellDelta]) -> Vec<WriteCompletion> {
        let commands = plan_writes(deltas, self.max_range_area);
        tracing::debug!(
            deltas = deltas.len(),
            commands = commands.len(),
            ranges = commands.iter().filter(|c| c.is_range()).count(),
            "batched cell deltas"
        );
        commands.into_iter().map(|c| self.submit(c)).collect()
    }

    /// Enqueue one write command
    pub fn submit(&self, command: WriteCommand) -> WriteCompletion {
        let backend = Arc::clone(&self.backend);
        self.queue
            .enqueue(move || async move { backend.apply_write(command).await })
    }

    /// Queue the batcher submits to
    #[inline]
    #[must_use]
    pub fn queue(&self) -> &Arc<DispatchQueue> {
        &self.queue
    }
}

impl fmt::Debug for DeltaBatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeltaBatcher")
            .field("backend", &self.backend.name())
            .field("max_range_area", &self.max_range_area)
            .finish_non_exhaustive()
    }
}

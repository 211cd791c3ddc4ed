//! Document controller interface
//!
//! The document holds the cell state the user sees and emits a change event
//! for every mutation. Listeners are invoked synchronously, in subscription
//! order, so writes they enqueue are ordered with the mutation that caused them.

use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use wbsync_model::{CellDelta, CellState, DocumentSnapshot, SheetInfo, SheetSnapshot};

/// Where a change came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeSource {
    /// Local user edit
    User,
    /// Mutation applied on behalf of another party (macro, collaborator)
    External,
    /// Bulk load of backend content; never forwarded back to the backend
    Load,
}

/// One mutation's worth of cell deltas
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    /// Origin of the mutation
    pub source: ChangeSource,
    /// Changed cells, in mutation order
    pub deltas: Vec<CellDelta>,
}

/// Subscription handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Change listener
pub type ChangeListener = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

/// Cell state holder consumed by the synchronization core
pub trait DocumentController: Send + Sync {
    /// Register a change listener
    fn subscribe(&self, listener: ChangeListener) -> ListenerId;

    /// Remove a listener; `false` if it was not registered
    fn unsubscribe(&self, id: ListenerId) -> bool;

    /// Current cell content (empty when unset)
    fn get_cell(&self, sheet_id: &str, row: u32, col: u32) -> CellState;

    /// Set one cell as a user edit
    fn set_cell_value(&self, sheet_id: &str, row: u32, col: u32, state: CellState) {
        self.apply_edits(ChangeSource::User, sheet_id, vec![(row, col, state)]);
    }

    /// Set several cells of one sheet as a single change event
    fn apply_edits(&self, source: ChangeSource, sheet_id: &str, edits: Vec<(u32, u32, CellState)>);

    /// Clear the unsaved-changes flag
    fn mark_saved(&self);

    /// Whether there are unsaved changes
    fn is_dirty(&self) -> bool;

    /// Replace all content with `snapshot`
    fn apply_state(&self, snapshot: DocumentSnapshot);

    /// Sheets in display order
    fn sheets(&self) -> Vec<SheetInfo>;

    /// Full content
    fn snapshot(&self) -> DocumentSnapshot;
}

#[derive(Debug, Default)]
struct Sheet {
    name: String,
    cells: BTreeMap<(u32, u32), CellState>,
}

#[derive(Debug, Default)]
struct DocumentState {
    sheets: IndexMap<String, Sheet>,
    dirty: bool,
}

/// In-process document
#[derive(Default)]
pub struct InMemoryDocument {
    state: Mutex<DocumentState>,
    listeners: Mutex<Vec<(ListenerId, ChangeListener)>>,
    next_listener: AtomicU64,
}

impl InMemoryDocument {
    /// Empty document with no sheets
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered listeners
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    fn emit(&self, event: &ChangeEvent) {
        // Snapshot so listeners may call back into the document.
        let listeners: Vec<ChangeListener> =
            self.listeners.lock().iter().map(|(_, l)| Arc::clone(l)).collect();
        for listener in listeners {
            listener(event);
        }
    }
}

impl DocumentController for InMemoryDocument {
    fn subscribe(&self, listener: ChangeListener) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, listener));
        id
    }

    fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    fn get_cell(&self, sheet_id: &str, row: u32, col: u32) -> CellState {
        self.state
            .lock()
            .sheets
            .get(sheet_id)
            .and_then(|s| s.cells.get(&(row, col)).cloned())
            .unwrap_or_default()
    }

    fn apply_edits(&self, source: ChangeSource, sheet_id: &str, edits: Vec<(u32, u32, CellState)>) {
        if edits.is_empty() {
            return;
        }

        let deltas = {
            let mut state = self.state.lock();
            let sheet = state
                .sheets
                .entry(sheet_id.to_string())
                .or_insert_with(|| Sheet {
                    name: sheet_id.to_string(),
                    cells: BTreeMap::new(),
                });

            let deltas: Vec<CellDelta> = edits
                .into_iter()
                .map(|(row, col, after)| {
                    let before = if after.is_empty() {
                        sheet.cells.remove(&(row, col))
                    } else {
                        sheet.cells.insert((row, col), after.clone())
                    };
                    CellDelta::new(sheet_id, i64::from(row), i64::from(col), after)
                        .with_before(before.unwrap_or_default())
                })
                .collect();

            if source != ChangeSource::Load {
                state.dirty = true;
            }
            deltas
        };

        self.emit(&ChangeEvent { source, deltas });
    }

    fn mark_saved(&self) {
        self.state.lock().dirty = false;
    }

    fn is_dirty(&self) -> bool {
        self.state.lock().dirty
    }

    fn apply_state(&self, snapshot: DocumentSnapshot) {
        let mut deltas = Vec::new();
        {
            let mut state = self.state.lock();
            state.sheets.clear();
            for sheet in snapshot.sheets {
                let mut cells = BTreeMap::new();
                for cell in sheet.cells {
                    deltas.push(CellDelta::new(
                        sheet.id.as_str(),
                        i64::from(cell.row),
                        i64::from(cell.col),
                        cell.state.clone(),
                    ));
                    cells.insert((cell.row, cell.col), cell.state);
                }
                state.sheets.insert(
                    sheet.id,
                    Sheet {
                        name: sheet.name,
                        cells,
                    },
                );
            }
        }

        self.emit(&ChangeEvent {
            source: ChangeSource::Load,
            deltas,
        });
    }

    fn sheets(&self) -> Vec<SheetInfo> {
        self.state
            .lock()
            .sheets
            .iter()
            .map(|(id, s)| SheetInfo::new(id.as_str(), s.name.as_str()))
            .collect()
    }

    fn snapshot(&self) -> DocumentSnapshot {
        let state = self.state.lock();
        let sheets = state
            .sheets
            .iter()
            .map(|(id, sheet)| {
                let mut snap = SheetSnapshot::new(id.as_str(), sheet.name.as_str());
                for (&(row, col), cell) in &sheet.cells {
                    snap.push(row, col, cell.clone());
                }
                snap
            })
            .collect();
        DocumentSnapshot { sheets }
    }
}

impl fmt::Debug for InMemoryDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("InMemoryDocument")
            .field("sheets", &state.sheets.len())
            .field("dirty", &state.dirty)
            .field("listeners", &self.listeners.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder(doc: &InMemoryDocument) -> Arc<Mutex<Vec<ChangeEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        doc.subscribe(Arc::new(move |e: &ChangeEvent| sink.lock().push(e.clone())));
        events
    }

    #[test]
    fn user_edit_emits_delta_with_before() {
        let doc = InMemoryDocument::new();
        let events = recorder(&doc);

        doc.set_cell_value("S", 1, 2, CellState::value(1));
        doc.set_cell_value("S", 1, 2, CellState::value(2));

        let events = events.lock();
        assert_eq!(events.len(), 2);
        let delta = &events[1].deltas[0];
        assert_eq!(delta.before, CellState::value(1));
        assert_eq!(delta.after, CellState::value(2));
        assert_eq!(events[1].source, ChangeSource::User);
        assert!(doc.is_dirty());
    }

    #[test]
    fn clearing_removes_cell() {
        let doc = InMemoryDocument::new();
        doc.set_cell_value("S", 0, 0, CellState::value("x"));
        doc.set_cell_value("S", 0, 0, CellState::empty());
        assert!(doc.get_cell("S", 0, 0).is_empty());
        assert_eq!(doc.snapshot().cell_count(), 0);
    }

    #[test]
    fn apply_state_replaces_content_without_dirtying() {
        let doc = InMemoryDocument::new();
        doc.set_cell_value("Old", 0, 0, CellState::value(1));
        doc.mark_saved();
        let events = recorder(&doc);

        let mut sheet = SheetSnapshot::new("New", "New Sheet");
        sheet.push(3, 3, CellState::formula("=1+1"));
        doc.apply_state(DocumentSnapshot { sheets: vec![sheet] });

        assert!(!doc.is_dirty());
        assert!(doc.get_cell("Old", 0, 0).is_empty());
        assert_eq!(doc.get_cell("New", 3, 3), CellState::formula("=1+1"));
        assert_eq!(doc.sheets(), vec![SheetInfo::new("New", "New Sheet")]);
        assert_eq!(events.lock()[0].source, ChangeSource::Load);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let doc = InMemoryDocument::new();
        let count = Arc::new(AtomicU64::new(0));
        let c = Arc::clone(&count);
        let id = doc.subscribe(Arc::new(move |_: &ChangeEvent| {
            c.fetch_add(1, Ordering::SeqCst);
        }));

        doc.set_cell_value("S", 0, 0, CellState::value(1));
        assert!(doc.unsubscribe(id));
        assert!(!doc.unsubscribe(id));
        doc.set_cell_value("S", 0, 1, CellState::value(2));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(doc.listener_count(), 0);
    }

    #[test]
    fn batch_edit_is_one_event() {
        let doc = InMemoryDocument::new();
        let events = recorder(&doc);
        doc.apply_edits(
            ChangeSource::External,
            "S",
            vec![
                (0, 0, CellState::value(1)),
                (0, 1, CellState::value(2)),
            ],
        );
        let events = events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].deltas.len(), 2);
        assert_eq!(events[0].source, ChangeSource::External);
    }
}

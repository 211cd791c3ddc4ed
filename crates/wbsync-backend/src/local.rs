//! In-process backend
//!
//! Holds one workbook in memory and persists it as a JSON document. Used when
//! the shell runs without a remote host, and as the reference implementation
//! in tests and the simulator.

use crate::backend::{FileStat, WorkbookBackend};
use crate::error::BackendError;
use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tempfile::NamedTempFile;
use wbsync_model::{
    CellEdit, CellRect, CellState, DefinedName, DocumentSnapshot, SheetInfo, SheetSnapshot,
    SnapshotCell, TableInfo, WorkbookDescriptor,
};

/// Maximum cells a single `get_range`/`set_range` call may cover
pub const MAX_RANGE_CELLS_PER_CALL: u64 = 250_000;

/// Name given to the sheet of a new workbook
pub const DEFAULT_SHEET_NAME: &str = "Sheet1";

/// On-disk workbook layout
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredWorkbook {
    sheets: Vec<SheetSnapshot>,
    #[serde(default)]
    defined_names: Vec<DefinedName>,
    #[serde(default)]
    tables: Vec<TableInfo>,
}

#[derive(Debug, Clone, Default)]
struct LocalSheet {
    name: String,
    cells: BTreeMap<(u32, u32), CellState>,
}

impl LocalSheet {
    fn write(&mut self, row: u32, col: u32, edit: CellEdit) {
        let state = edit.into_state();
        if state.is_empty() {
            self.cells.remove(&(row, col));
        } else {
            self.cells.insert((row, col), state);
        }
    }

    fn used_range(&self) -> Option<CellRect> {
        self.cells
            .keys()
            .map(|&(row, col)| CellRect::cell(row, col))
            .reduce(|acc, r| acc.union(&r))
    }
}

#[derive(Debug, Clone, Default)]
struct LocalWorkbook {
    path: Option<String>,
    origin_path: Option<String>,
    sheets: IndexMap<String, LocalSheet>,
    defined_names: Vec<DefinedName>,
    tables: Vec<TableInfo>,
}

impl LocalWorkbook {
    fn empty() -> Self {
        let mut sheets = IndexMap::new();
        sheets.insert(
            DEFAULT_SHEET_NAME.to_string(),
            LocalSheet {
                name: DEFAULT_SHEET_NAME.to_string(),
                cells: BTreeMap::new(),
            },
        );
        Self {
            sheets,
            ..Self::default()
        }
    }

    fn from_stored(stored: StoredWorkbook, path: &str) -> Self {
        let sheets = stored
            .sheets
            .into_iter()
            .map(|sheet| {
                let cells = sheet
                    .cells
                    .into_iter()
                    .filter(|c| !c.state.is_empty())
                    .map(|c| ((c.row, c.col), c.state))
                    .collect();
                (
                    sheet.id,
                    LocalSheet {
                        name: sheet.name,
                        cells,
                    },
                )
            })
            .collect();
        Self {
            path: Some(path.to_string()),
            origin_path: None,
            sheets,
            defined_names: stored.defined_names,
            tables: stored.tables,
        }
    }

    fn to_snapshot(&self) -> DocumentSnapshot {
        DocumentSnapshot {
            sheets: self
                .sheets
                .iter()
                .map(|(id, sheet)| SheetSnapshot {
                    id: id.clone(),
                    name: sheet.name.clone(),
                    cells: sheet
                        .cells
                        .iter()
                        .map(|(&(row, col), state)| SnapshotCell {
                            row,
                            col,
                            state: state.clone(),
                        })
                        .collect(),
                })
                .collect(),
        }
    }

    fn to_stored(&self) -> StoredWorkbook {
        StoredWorkbook {
            sheets: self.to_snapshot().sheets,
            defined_names: self.defined_names.clone(),
            tables: self.tables.clone(),
        }
    }

    fn descriptor(&self) -> WorkbookDescriptor {
        WorkbookDescriptor {
            path: self.path.clone(),
            origin_path: self.origin_path.clone(),
            sheets: self
                .sheets
                .iter()
                .map(|(id, sheet)| SheetInfo::new(id.clone(), sheet.name.clone()))
                .collect(),
        }
    }

    fn sheet(&self, sheet_id: &str) -> Result<&LocalSheet, BackendError> {
        self.sheets
            .get(sheet_id)
            .ok_or_else(|| BackendError::SheetNotFound(sheet_id.to_string()))
    }

    fn sheet_mut(&mut self, sheet_id: &str) -> Result<&mut LocalSheet, BackendError> {
        self.sheets
            .get_mut(sheet_id)
            .ok_or_else(|| BackendError::SheetNotFound(sheet_id.to_string()))
    }
}

fn check_range(rect: CellRect) -> Result<(), BackendError> {
    if !rect.is_valid() {
        return Err(BackendError::InvalidRange(rect));
    }
    let cells = rect.area();
    if cells > MAX_RANGE_CELLS_PER_CALL {
        return Err(BackendError::RangeTooLarge {
            rect,
            cells,
            limit: MAX_RANGE_CELLS_PER_CALL,
        });
    }
    Ok(())
}

/// Write `bytes` to a temp file next to `path`, then rename into place.
fn write_file_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.as_file_mut().write_all(bytes)?;
    tmp.as_file_mut().flush()?;
    tmp.as_file().sync_all()?;

    match tmp.persist(path) {
        Ok(_) => Ok(()),
        Err(err) if err.error.kind() == std::io::ErrorKind::AlreadyExists => {
            let _ = std::fs::remove_file(path);
            err.file.persist(path).map(|_| ()).map_err(|e| e.error)
        }
        Err(err) => Err(err.error),
    }
}

/// Single-writer in-process workbook store
#[derive(Debug, Default)]
pub struct LocalBackend {
    workbook: Mutex<Option<LocalWorkbook>>,
}

impl LocalBackend {
    /// Backend with no workbook loaded
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Descriptor of the loaded workbook
    #[must_use]
    pub fn descriptor(&self) -> Option<WorkbookDescriptor> {
        self.workbook.lock().as_ref().map(LocalWorkbook::descriptor)
    }

    /// Full content of the loaded workbook
    #[must_use]
    pub fn snapshot(&self) -> Option<DocumentSnapshot> {
        self.workbook.lock().as_ref().map(LocalWorkbook::to_snapshot)
    }

    /// Stored content of one cell (empty cells read as `None`)
    #[must_use]
    pub fn cell(&self, sheet_id: &str, row: u32, col: u32) -> Option<CellState> {
        let guard = self.workbook.lock();
        guard
            .as_ref()?
            .sheets
            .get(sheet_id)?
            .cells
            .get(&(row, col))
            .cloned()
    }

    /// Register a defined name on the loaded workbook
    pub fn define_name(&self, name: DefinedName) -> Result<(), BackendError> {
        let mut guard = self.workbook.lock();
        let workbook = guard.as_mut().ok_or(BackendError::NoWorkbook)?;
        workbook.defined_names.retain(|n| n.name != name.name);
        workbook.defined_names.push(name);
        Ok(())
    }

    /// Register a table on the loaded workbook
    pub fn add_table(&self, table: TableInfo) -> Result<(), BackendError> {
        let mut guard = self.workbook.lock();
        let workbook = guard.as_mut().ok_or(BackendError::NoWorkbook)?;
        workbook.sheet(&table.sheet_id)?;
        workbook.tables.retain(|t| t.name != table.name);
        workbook.tables.push(table);
        Ok(())
    }

    /// Add an empty sheet, returning its info
    pub fn add_sheet(&self, id: &str, name: &str) -> Result<SheetInfo, BackendError> {
        let mut guard = self.workbook.lock();
        let workbook = guard.as_mut().ok_or(BackendError::NoWorkbook)?;
        workbook.sheets.entry(id.to_string()).or_insert_with(|| LocalSheet {
            name: name.to_string(),
            cells: BTreeMap::new(),
        });
        Ok(SheetInfo::new(id, name))
    }
}

#[async_trait]
impl WorkbookBackend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn get_range(
        &self,
        sheet_id: &str,
        rect: CellRect,
    ) -> Result<Vec<Vec<CellState>>, BackendError> {
        check_range(rect)?;
        let guard = self.workbook.lock();
        let sheet = guard.as_ref().ok_or(BackendError::NoWorkbook)?.sheet(sheet_id)?;

        Ok((rect.start_row..=rect.end_row)
            .map(|row| {
                (rect.start_col..=rect.end_col)
                    .map(|col| sheet.cells.get(&(row, col)).cloned().unwrap_or_default())
                    .collect()
            })
            .collect())
    }

    async fn set_cell(
        &self,
        sheet_id: &str,
        row: u32,
        col: u32,
        edit: CellEdit,
    ) -> Result<(), BackendError> {
        let mut guard = self.workbook.lock();
        let sheet = guard
            .as_mut()
            .ok_or(BackendError::NoWorkbook)?
            .sheet_mut(sheet_id)?;
        sheet.write(row, col, edit);
        Ok(())
    }

    async fn set_range(
        &self,
        sheet_id: &str,
        rect: CellRect,
        values: Vec<Vec<CellEdit>>,
    ) -> Result<(), BackendError> {
        check_range(rect)?;
        let expected_rows = rect.row_count() as usize;
        let expected_cols = rect.col_count() as usize;
        if values.len() != expected_rows {
            return Err(BackendError::ShapeMismatch {
                rect,
                rows: values.len(),
                cols: values.first().map_or(0, Vec::len),
            });
        }
        if let Some(bad) = values.iter().find(|r| r.len() != expected_cols) {
            return Err(BackendError::ShapeMismatch {
                rect,
                rows: values.len(),
                cols: bad.len(),
            });
        }

        let mut guard = self.workbook.lock();
        let sheet = guard
            .as_mut()
            .ok_or(BackendError::NoWorkbook)?
            .sheet_mut(sheet_id)?;
        for (row, row_values) in (rect.start_row..).zip(values) {
            for (col, edit) in (rect.start_col..).zip(row_values) {
                sheet.write(row, col, edit);
            }
        }
        Ok(())
    }

    async fn open_workbook(&self, path: &str) -> Result<WorkbookDescriptor, BackendError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| BackendError::io(path, e))?;
        let stored: StoredWorkbook =
            serde_json::from_slice(&bytes).map_err(|source| BackendError::Serialization {
                path: PathBuf::from(path),
                source,
            })?;

        let workbook = LocalWorkbook::from_stored(stored, path);
        let descriptor = workbook.descriptor();
        *self.workbook.lock() = Some(workbook);

        tracing::debug!(path, sheets = descriptor.sheets.len(), "local workbook opened");
        Ok(descriptor)
    }

    async fn new_workbook(&self) -> Result<WorkbookDescriptor, BackendError> {
        let workbook = LocalWorkbook::empty();
        let descriptor = workbook.descriptor();
        *self.workbook.lock() = Some(workbook);
        Ok(descriptor)
    }

    async fn save_workbook(&self, path: Option<&str>) -> Result<(), BackendError> {
        let (target, stored) = {
            let guard = self.workbook.lock();
            let workbook = guard.as_ref().ok_or(BackendError::NoWorkbook)?;
            let target = path
                .map(str::to_string)
                .or_else(|| workbook.path.clone())
                .ok_or(BackendError::NoSavePath)?;
            (target, workbook.to_stored())
        };

        let bytes =
            serde_json::to_vec_pretty(&stored).map_err(|source| BackendError::Serialization {
                path: PathBuf::from(&target),
                source,
            })?;

        let write_path = PathBuf::from(&target);
        tokio::task::spawn_blocking(move || write_file_atomic(&write_path, &bytes))
            .await
            .map_err(|e| BackendError::io(&target, std::io::Error::other(e)))?
            .map_err(|e| BackendError::io(&target, e))?;

        if let Some(workbook) = self.workbook.lock().as_mut() {
            workbook.path = Some(target.clone());
        }
        tracing::debug!(path = %target, "local workbook saved");
        Ok(())
    }

    async fn stat_file(&self, path: &str) -> Result<FileStat, BackendError> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| BackendError::io(path, e))?;
        let mod_time_ms = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .and_then(|d| i64::try_from(d.as_millis()).ok());

        Ok(FileStat {
            mod_time_ms,
            size_bytes: Some(meta.len()),
        })
    }

    async fn list_defined_names(&self) -> Result<Vec<DefinedName>, BackendError> {
        let guard = self.workbook.lock();
        Ok(guard
            .as_ref()
            .ok_or(BackendError::NoWorkbook)?
            .defined_names
            .clone())
    }

    async fn list_tables(&self) -> Result<Vec<TableInfo>, BackendError> {
        let guard = self.workbook.lock();
        Ok(guard.as_ref().ok_or(BackendError::NoWorkbook)?.tables.clone())
    }

    async fn get_sheet_used_range(
        &self,
        sheet_id: &str,
    ) -> Result<Option<CellRect>, BackendError> {
        let guard = self.workbook.lock();
        let sheet = guard.as_ref().ok_or(BackendError::NoWorkbook)?.sheet(sheet_id)?;
        Ok(sheet.used_range())
    }
}

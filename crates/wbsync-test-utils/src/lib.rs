//! Testing utilities for the wbsync workspace
//!
//! Recording and failure-injecting doubles for the backend and shell
//! capabilities, plus a ready-wired coordinator harness.

#![allow(missing_docs)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wbsync_backend::{BackendError, FileStat, LocalBackend, WorkbookBackend};
use wbsync_core::{
    BeforeCloseHook, HookError, InMemoryDocument, ShellPrompts, SyncConfig, WorkbookCoordinator,
    WorkbookScopedService,
};
use wbsync_model::{
    CellDelta, CellEdit, CellRect, CellState, DefinedName, TableInfo, WorkbookDescriptor,
    WorkbookId,
};

// ----------------------------------------------------------------------
// Backend
// ----------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    GetRange { sheet: String, rect: CellRect },
    SetCell { sheet: String, row: u32, col: u32 },
    SetRange { sheet: String, rect: CellRect },
    Open(String),
    New,
    Save(Option<String>),
    Stat(String),
    ListDefinedNames,
    ListTables,
    UsedRange(String),
}

impl BackendCall {
    pub fn is_write(&self) -> bool {
        matches!(self, BackendCall::SetCell { .. } | BackendCall::SetRange { .. })
    }

    pub fn is_read(&self) -> bool {
        matches!(
            self,
            BackendCall::GetRange { .. } | BackendCall::UsedRange(_)
        )
    }
}

/// [`LocalBackend`] wrapper that logs every call and can be told to fail
#[derive(Debug, Default)]
pub struct RecordingBackend {
    inner: LocalBackend,
    calls: Mutex<Vec<BackendCall>>,
    failing_sheets: Mutex<HashSet<String>>,
    fail_open: AtomicBool,
    fail_reads: AtomicBool,
    failing_reads_left: AtomicUsize,
    fail_save: AtomicBool,
    stat_override: Mutex<Option<FileStat>>,
    write_delay: Mutex<Option<Duration>>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn local(&self) -> &LocalBackend {
        &self.inner
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn writes(&self) -> Vec<BackendCall> {
        self.calls().into_iter().filter(BackendCall::is_write).collect()
    }

    /// Index of the first call matching `pred`
    pub fn position(&self, pred: impl Fn(&BackendCall) -> bool) -> Option<usize> {
        self.calls.lock().iter().position(pred)
    }

    pub fn fail_writes_to(&self, sheet: &str) {
        self.failing_sheets.lock().insert(sheet.to_string());
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Fail only the next `count` reads
    pub fn fail_next_reads(&self, count: usize) {
        self.failing_reads_left.store(count, Ordering::SeqCst);
    }

    pub fn set_fail_save(&self, fail: bool) {
        self.fail_save.store(fail, Ordering::SeqCst);
    }

    pub fn set_stat(&self, stat: Option<FileStat>) {
        *self.stat_override.lock() = stat;
    }

    pub fn set_write_delay(&self, delay: Option<Duration>) {
        *self.write_delay.lock() = delay;
    }

    fn record(&self, call: BackendCall) {
        self.calls.lock().push(call);
    }

    async fn before_write(&self, sheet: &str) -> Result<(), BackendError> {
        let delay = *self.write_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing_sheets.lock().contains(sheet) {
            return Err(BackendError::Rejected(format!("writes to {sheet} rejected")));
        }
        Ok(())
    }

    fn check_read(&self) -> Result<(), BackendError> {
        let counted = self
            .failing_reads_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if counted || self.fail_reads.load(Ordering::SeqCst) {
            return Err(BackendError::Rejected("reads disabled".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl WorkbookBackend for RecordingBackend {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn get_range(
        &self,
        sheet_id: &str,
        rect: CellRect,
    ) -> Result<Vec<Vec<CellState>>, BackendError> {
        self.record(BackendCall::GetRange {
            sheet: sheet_id.to_string(),
            rect,
        });
        self.check_read()?;
        self.inner.get_range(sheet_id, rect).await
    }

    async fn set_cell(
        &self,
        sheet_id: &str,
        row: u32,
        col: u32,
        edit: CellEdit,
    ) -> Result<(), BackendError> {
        self.record(BackendCall::SetCell {
            sheet: sheet_id.to_string(),
            row,
            col,
        });
        self.before_write(sheet_id).await?;
        self.inner.set_cell(sheet_id, row, col, edit).await
    }

    async fn set_range(
        &self,
        sheet_id: &str,
        rect: CellRect,
        values: Vec<Vec<CellEdit>>,
    ) -> Result<(), BackendError> {
        self.record(BackendCall::SetRange {
            sheet: sheet_id.to_string(),
            rect,
        });
        self.before_write(sheet_id).await?;
        self.inner.set_range(sheet_id, rect, values).await
    }

    async fn open_workbook(&self, path: &str) -> Result<WorkbookDescriptor, BackendError> {
        self.record(BackendCall::Open(path.to_string()));
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(BackendError::Rejected(format!("open {path} rejected")));
        }
        self.inner.open_workbook(path).await
    }

    async fn new_workbook(&self) -> Result<WorkbookDescriptor, BackendError> {
        self.record(BackendCall::New);
        self.inner.new_workbook().await
    }

    async fn save_workbook(&self, path: Option<&str>) -> Result<(), BackendError> {
        self.record(BackendCall::Save(path.map(str::to_string)));
        if self.fail_save.load(Ordering::SeqCst) {
            return Err(BackendError::Rejected("save rejected".into()));
        }
        self.inner.save_workbook(path).await
    }

    async fn stat_file(&self, path: &str) -> Result<FileStat, BackendError> {
        self.record(BackendCall::Stat(path.to_string()));
        let stat = *self.stat_override.lock();
        match stat {
            Some(stat) => Ok(stat),
            None => self.inner.stat_file(path).await,
        }
    }

    async fn list_defined_names(&self) -> Result<Vec<DefinedName>, BackendError> {
        self.record(BackendCall::ListDefinedNames);
        self.inner.list_defined_names().await
    }

    async fn list_tables(&self) -> Result<Vec<TableInfo>, BackendError> {
        self.record(BackendCall::ListTables);
        self.inner.list_tables().await
    }

    async fn get_sheet_used_range(
        &self,
        sheet_id: &str,
    ) -> Result<Option<CellRect>, BackendError> {
        self.record(BackendCall::UsedRange(sheet_id.to_string()));
        self.check_read()?;
        self.inner.get_sheet_used_range(sheet_id).await
    }
}

// ----------------------------------------------------------------------
// Shell doubles
// ----------------------------------------------------------------------

/// Prompts answered from scripted queues; empty queues approve / cancel
#[derive(Debug, Default)]
pub struct ScriptedPrompts {
    confirms: Mutex<VecDeque<bool>>,
    save_paths: Mutex<VecDeque<Option<String>>>,
    confirm_asked: AtomicUsize,
    save_asked: AtomicUsize,
}

impl ScriptedPrompts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer_confirm(&self, answer: bool) {
        self.confirms.lock().push_back(answer);
    }

    pub fn answer_save_path(&self, answer: Option<&str>) {
        self.save_paths.lock().push_back(answer.map(str::to_string));
    }

    pub fn confirm_asked(&self) -> usize {
        self.confirm_asked.load(Ordering::SeqCst)
    }

    pub fn save_asked(&self) -> usize {
        self.save_asked.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ShellPrompts for ScriptedPrompts {
    async fn confirm_discard_changes(&self) -> bool {
        self.confirm_asked.fetch_add(1, Ordering::SeqCst);
        self.confirms.lock().pop_front().unwrap_or(true)
    }

    async fn choose_save_path(&self, _suggested: Option<&str>) -> Option<String> {
        self.save_asked.fetch_add(1, Ordering::SeqCst);
        self.save_paths.lock().pop_front().flatten()
    }
}

type HookAction = Box<dyn Fn(&WorkbookId) + Send + Sync>;

/// Before-close hook recording which workbooks it ran for
#[derive(Default)]
pub struct RecordingHook {
    calls: Mutex<Vec<WorkbookId>>,
    fail: AtomicBool,
    action: Mutex<Option<HookAction>>,
}

impl RecordingHook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<WorkbookId> {
        self.calls.lock().clone()
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Run `action` every time the hook fires (before any injected failure)
    pub fn on_close(&self, action: impl Fn(&WorkbookId) + Send + Sync + 'static) {
        *self.action.lock() = Some(Box::new(action));
    }
}

#[async_trait]
impl BeforeCloseHook for RecordingHook {
    async fn before_close(&self, workbook: &WorkbookId) -> Result<(), HookError> {
        self.calls.lock().push(workbook.clone());
        if let Some(action) = self.action.lock().as_ref() {
            action(workbook);
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(HookError("scripted failure".into()));
        }
        Ok(())
    }
}

impl std::fmt::Debug for RecordingHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingHook")
            .field("calls", &self.calls.lock().len())
            .finish_non_exhaustive()
    }
}

/// Workbook-scoped service recording its restarts
#[derive(Debug)]
pub struct RecordingService {
    name: String,
    restarts: Mutex<Vec<WorkbookId>>,
}

impl RecordingService {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            restarts: Mutex::new(Vec::new()),
        }
    }

    pub fn restarts(&self) -> Vec<WorkbookId> {
        self.restarts.lock().clone()
    }

    pub fn last_restart(&self) -> Option<WorkbookId> {
        self.restarts.lock().last().cloned()
    }
}

impl WorkbookScopedService for RecordingService {
    fn name(&self) -> &str {
        &self.name
    }

    fn restart(&self, workbook: &WorkbookId) {
        self.restarts.lock().push(workbook.clone());
    }
}

// ----------------------------------------------------------------------
// Fixtures
// ----------------------------------------------------------------------

pub fn value_delta(sheet: &str, row: i64, col: i64, value: i64) -> CellDelta {
    CellDelta::new(sheet, row, col, CellState::value(serde_json::json!(value)))
}

/// Row-major deltas densely covering a `rows` x `cols` block
pub fn block_deltas(sheet: &str, top: i64, left: i64, rows: i64, cols: i64) -> Vec<CellDelta> {
    let mut deltas = Vec::new();
    for r in 0..rows {
        for c in 0..cols {
            deltas.push(value_delta(sheet, top + r, left + c, r * cols + c));
        }
    }
    deltas
}

/// Coordinator wired to recording doubles
pub struct TestHarness {
    pub backend: Arc<RecordingBackend>,
    pub document: Arc<InMemoryDocument>,
    pub prompts: Arc<ScriptedPrompts>,
    pub hook: Arc<RecordingHook>,
    pub service: Arc<RecordingService>,
    pub coordinator: WorkbookCoordinator,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(SyncConfig::default())
    }

    pub fn with_config(config: SyncConfig) -> Self {
        let backend = Arc::new(RecordingBackend::new());
        let document = Arc::new(InMemoryDocument::new());
        let prompts = Arc::new(ScriptedPrompts::new());
        let hook = Arc::new(RecordingHook::new());
        let service = Arc::new(RecordingService::new("refresh-scheduler"));

        let coordinator = WorkbookCoordinator::new(
            backend.clone(),
            document.clone(),
            prompts.clone(),
            config,
        )
        .unwrap()
        .with_before_close_hook(hook.clone())
        .with_service(service.clone());

        Self {
            backend,
            document,
            prompts,
            hook,
            service,
            coordinator,
        }
    }

    /// Harness with a new workbook already active
    pub async fn started() -> Self {
        let harness = Self::new();
        harness.coordinator.handle_new_workbook().await.unwrap();
        harness
    }
}

/// Save a workbook containing `cells` on `Sheet1` to `path`
pub async fn write_workbook_file(path: &str, cells: &[(u32, u32, CellState)]) {
    let backend = LocalBackend::new();
    backend.new_workbook().await.unwrap();
    for (row, col, state) in cells {
        backend
            .set_cell("Sheet1", *row, *col, CellEdit::from_state(state))
            .await
            .unwrap();
    }
    backend.save_workbook(Some(path)).await.unwrap();
}

//! Sync simulator
//!
//! Drives a coordinator over a [`LocalBackend`] with a seeded stream of
//! edits and transitions. After every drain the backend must hold exactly
//! what the document shows; any difference is recorded as a violation.

use crate::config::SyncConfig;
use crate::coordinator::{SaveOutcome, TransitionOutcome, WorkbookCoordinator};
use crate::document::{ChangeSource, DocumentController, InMemoryDocument};
use crate::error::SyncResult;
use crate::hooks::AutoApprove;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use wbsync_backend::LocalBackend;
use wbsync_dispatch::QueueStats;
use wbsync_model::{CellState, DocumentSnapshot};

/// Simulator configuration
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Total operations to execute
    pub total_operations: u64,
    /// Directory receiving saved workbooks
    pub work_dir: PathBuf,
    /// Rows edits may touch
    pub max_row: u32,
    /// Columns edits may touch
    pub max_col: u32,
    /// Stop at the first consistency violation
    pub stop_on_first_violation: bool,
    /// Coordinator configuration
    pub sync: SyncConfig,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            total_operations: 1_000,
            work_dir: std::env::temp_dir().join("wbsync-sim"),
            max_row: 60,
            max_col: 20,
            stop_on_first_violation: false,
            sync: SyncConfig::default(),
        }
    }
}

/// Operations the simulator can generate
#[derive(Debug, Clone)]
pub enum SimulatedOperation {
    /// Set one cell
    EditCell {
        /// Row
        row: u32,
        /// Column
        col: u32,
        /// New content
        state: CellState,
    },
    /// Fill a dense block in one change event
    EditBlock {
        /// Top row
        row: u32,
        /// Left column
        col: u32,
        /// Block height
        rows: u32,
        /// Block width
        cols: u32,
    },
    /// Clear one cell
    ClearCell {
        /// Row
        row: u32,
        /// Column
        col: u32,
    },
    /// Drain and compare backend to document
    Checkpoint,
    /// Save in place (falls through to Save-As when unsaved)
    Save,
    /// Save to a fresh file
    SaveAs(PathBuf),
    /// Open a previously saved file
    Open(PathBuf),
    /// Start a new workbook
    New,
}

/// Counters per operation kind
#[derive(Debug, Clone, Default)]
pub struct OperationStats {
    /// Operations executed
    pub total_operations: u64,
    /// Cell edits, block edits and clears
    pub edits: u64,
    /// Successful Open / New / Save / Save-As
    pub transitions: u64,
    /// Failed transitions
    pub transition_failures: u64,
    /// Consistency checks performed
    pub checks: u64,
}

/// Backend content differing from the document after a drain
#[derive(Debug, Clone)]
pub struct ConsistencyViolation {
    /// Operation index at which the check ran
    pub operation: u64,
    /// First differing cell, `sheet!R{row}C{col}`
    pub cell: String,
    /// Document content
    pub document: Option<CellState>,
    /// Backend content
    pub backend: Option<CellState>,
}

/// Simulation outcome
#[derive(Debug, Clone)]
pub struct SimulationReport {
    /// Seed used
    pub seed: u64,
    /// Operation counters
    pub stats: OperationStats,
    /// Consistency violations found
    pub violations: Vec<ConsistencyViolation>,
    /// Final queue counters
    pub queue: QueueStats,
}

impl SimulationReport {
    /// No violations were found
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    /// Human-readable report
    pub fn generate_text(&self) -> String {
        let mut report = String::new();

        report.push_str("=== wbsync Simulator Report ===\n\n");
        report.push_str(&format!("Seed: {}\n", self.seed));
        report.push_str(&format!("Total Operations: {}\n", self.stats.total_operations));
        report.push_str(&format!("Edits: {}\n", self.stats.edits));
        report.push_str(&format!("Transitions: {}\n", self.stats.transitions));
        report.push_str(&format!(
            "Transition Failures: {}\n",
            self.stats.transition_failures
        ));
        report.push_str(&format!("Checks: {}\n", self.stats.checks));
        report.push_str(&format!(
            "Queue: {} submitted, {} completed, {} failed\n",
            self.queue.submitted, self.queue.completed, self.queue.failed
        ));
        report.push_str(&format!("Violations: {}\n", self.violations.len()));

        if !self.violations.is_empty() {
            report.push_str("\n=== Violations ===\n");
            for (i, v) in self.violations.iter().enumerate() {
                report.push_str(&format!("{}. {:?}\n", i + 1, v));
            }
        }

        report.push_str(&format!(
            "\n=== Result: {} ===\n",
            if self.passed() { "PASS" } else { "FAIL" }
        ));
        report
    }
}

const SHEET: &str = "Sheet1";

struct Simulation {
    config: SimulatorConfig,
    rng: StdRng,
    backend: Arc<LocalBackend>,
    document: Arc<InMemoryDocument>,
    coordinator: WorkbookCoordinator,
    saved: Vec<PathBuf>,
    stats: OperationStats,
    violations: Vec<ConsistencyViolation>,
}

impl Simulation {
    fn generate(&mut self) -> SimulatedOperation {
        let row = self.rng.random_range(0..self.config.max_row);
        let col = self.rng.random_range(0..self.config.max_col);

        match self.rng.random_range(0..100u32) {
            0..=54 => {
                let state = if self.rng.random_bool(0.15) {
                    CellState::formula(format!("=R{}C{}*2", row + 1, col + 1))
                } else {
                    CellState::value(self.rng.random_range(-1_000..1_000i64))
                };
                SimulatedOperation::EditCell { row, col, state }
            }
            55..=69 => SimulatedOperation::EditBlock {
                row,
                col,
                rows: self.rng.random_range(1..=4),
                cols: self.rng.random_range(1..=4),
            },
            70..=77 => SimulatedOperation::ClearCell { row, col },
            78..=87 => SimulatedOperation::Checkpoint,
            88..=91 => SimulatedOperation::Save,
            92..=95 => SimulatedOperation::SaveAs(
                self.config
                    .work_dir
                    .join(format!("book-{}.json", self.stats.total_operations)),
            ),
            96..=98 if !self.saved.is_empty() => {
                let i = self.rng.random_range(0..self.saved.len());
                SimulatedOperation::Open(self.saved[i].clone())
            }
            _ => SimulatedOperation::New,
        }
    }

    async fn execute(&mut self, op: SimulatedOperation) {
        self.stats.total_operations += 1;
        match op {
            SimulatedOperation::EditCell { row, col, state } => {
                self.document.set_cell_value(SHEET, row, col, state);
                self.stats.edits += 1;
            }
            SimulatedOperation::EditBlock {
                row,
                col,
                rows,
                cols,
            } => {
                let mut edits = Vec::new();
                for r in row..row + rows {
                    for c in col..col + cols {
                        let value = self.rng.random_range(0..100i64);
                        edits.push((r, c, CellState::value(value)));
                    }
                }
                self.document.apply_edits(ChangeSource::User, SHEET, edits);
                self.stats.edits += 1;
            }
            SimulatedOperation::ClearCell { row, col } => {
                self.document.set_cell_value(SHEET, row, col, CellState::empty());
                self.stats.edits += 1;
            }
            SimulatedOperation::Checkpoint => self.check().await,
            SimulatedOperation::Save => {
                let result = self.coordinator.handle_save().await;
                self.record_save(result);
            }
            SimulatedOperation::SaveAs(path) => {
                let path = path.to_string_lossy().into_owned();
                let result = self.coordinator.handle_save_as(Some(path)).await;
                self.record_save(result);
            }
            SimulatedOperation::Open(path) => {
                let path = path.to_string_lossy().into_owned();
                let result = self.coordinator.open_workbook_from_path(&path).await;
                self.record_transition(result);
            }
            SimulatedOperation::New => {
                let result = self.coordinator.handle_new_workbook().await;
                self.record_transition(result);
            }
        }
    }

    fn record_transition(&mut self, result: SyncResult<TransitionOutcome>) {
        match result {
            Ok(_) => self.stats.transitions += 1,
            Err(err) => {
                tracing::warn!(error = %err, "simulated transition failed");
                self.stats.transition_failures += 1;
            }
        }
    }

    fn record_save(&mut self, result: SyncResult<SaveOutcome>) {
        match result {
            Ok(SaveOutcome::Saved(path)) => {
                self.stats.transitions += 1;
                let path = PathBuf::from(path);
                if !self.saved.contains(&path) {
                    self.saved.push(path);
                }
            }
            Ok(SaveOutcome::Cancelled) => {}
            Err(err) => {
                tracing::warn!(error = %err, "simulated save failed");
                self.stats.transition_failures += 1;
            }
        }
    }

    async fn check(&mut self) {
        self.coordinator.drain_backend_sync().await;
        self.stats.checks += 1;

        let document = cell_map(&self.document.snapshot());
        let backend = self
            .backend
            .snapshot()
            .map(|s| cell_map(&s))
            .unwrap_or_default();

        let keys: BTreeSet<_> = document.keys().chain(backend.keys()).collect();
        let mismatch = keys
            .into_iter()
            .find(|k| document.get(*k) != backend.get(*k));
        if let Some(key) = mismatch {
            let (sheet, row, col) = key;
            self.violations.push(ConsistencyViolation {
                operation: self.stats.total_operations,
                cell: format!("{sheet}!R{row}C{col}"),
                document: document.get(key).cloned(),
                backend: backend.get(key).cloned(),
            });
        }
    }
}

fn cell_map(snapshot: &DocumentSnapshot) -> BTreeMap<(String, u32, u32), CellState> {
    snapshot
        .sheets
        .iter()
        .flat_map(|sheet| {
            sheet
                .cells
                .iter()
                .map(|c| ((sheet.id.clone(), c.row, c.col), c.state.clone()))
        })
        .collect()
}

/// Run a seeded simulation
pub async fn run_simulator(config: SimulatorConfig) -> SyncResult<SimulationReport> {
    std::fs::create_dir_all(&config.work_dir).map_err(|e| {
        crate::error::SyncError::Config(format!("{}: {e}", config.work_dir.display()))
    })?;

    let backend = Arc::new(LocalBackend::new());
    let document = Arc::new(InMemoryDocument::new());
    let fallback = config.work_dir.join("untitled.json");
    let coordinator = WorkbookCoordinator::new(
        backend.clone(),
        document.clone(),
        Arc::new(AutoApprove::with_save_path(fallback.to_string_lossy())),
        config.sync.clone(),
    )?;
    coordinator.handle_new_workbook().await?;

    tracing::info!(
        seed = config.seed,
        operations = config.total_operations,
        "simulation started"
    );

    let mut sim = Simulation {
        rng: StdRng::seed_from_u64(config.seed),
        config,
        backend,
        document,
        coordinator,
        saved: Vec::new(),
        stats: OperationStats::default(),
        violations: Vec::new(),
    };

    for _ in 0..sim.config.total_operations {
        let op = sim.generate();
        sim.execute(op).await;
        if sim.config.stop_on_first_violation && !sim.violations.is_empty() {
            break;
        }
    }
    sim.check().await;

    let report = SimulationReport {
        seed: sim.config.seed,
        stats: sim.stats,
        violations: sim.violations,
        queue: sim.coordinator.queue().stats(),
    };
    tracing::info!(
        passed = report.passed(),
        violations = report.violations.len(),
        "simulation finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wbsync_backend::WorkbookBackend;
    use wbsync_model::CellEdit;

    fn config(dir: &std::path::Path, seed: u64, ops: u64) -> SimulatorConfig {
        SimulatorConfig {
            seed,
            total_operations: ops,
            work_dir: dir.to_path_buf(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn simulation_stays_consistent() {
        let dir = tempfile::tempdir().unwrap();
        let report = run_simulator(config(dir.path(), 7, 400)).await.unwrap();

        assert!(report.passed(), "{}", report.generate_text());
        assert_eq!(report.stats.total_operations, 400);
        assert!(report.stats.checks > 0);
        assert_eq!(report.queue.pending(), 0);
    }

    #[tokio::test]
    async fn same_seed_same_counters() {
        let a_dir = tempfile::tempdir().unwrap();
        let b_dir = tempfile::tempdir().unwrap();
        let a = run_simulator(config(a_dir.path(), 99, 150)).await.unwrap();
        let b = run_simulator(config(b_dir.path(), 99, 150)).await.unwrap();

        assert_eq!(a.stats.edits, b.stats.edits);
        assert_eq!(a.stats.checks, b.stats.checks);
        assert_eq!(a.stats.transitions, b.stats.transitions);
    }

    #[tokio::test]
    async fn check_reports_backend_divergence() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), 3, 0);
        let backend = Arc::new(LocalBackend::new());
        let document = Arc::new(InMemoryDocument::new());
        let coordinator = WorkbookCoordinator::new(
            backend.clone(),
            document.clone(),
            Arc::new(AutoApprove::default()),
            config.sync.clone(),
        )
        .unwrap();
        coordinator.handle_new_workbook().await.unwrap();

        let mut sim = Simulation {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            backend,
            document,
            coordinator,
            saved: Vec::new(),
            stats: OperationStats::default(),
            violations: Vec::new(),
        };
        sim.check().await;
        assert!(sim.violations.is_empty());

        // Written behind the document's back.
        sim.backend
            .set_cell("Sheet1", 3, 4, CellEdit::from_state(&CellState::value(5)))
            .await
            .unwrap();
        sim.check().await;

        assert_eq!(sim.violations.len(), 1);
        let violation = &sim.violations[0];
        assert_eq!(violation.cell, "Sheet1!R3C4");
        assert_eq!(violation.document, None);
        assert_eq!(violation.backend, Some(CellState::value(5)));
    }

    #[test]
    fn report_text_mentions_result() {
        let report = SimulationReport {
            seed: 1,
            stats: OperationStats::default(),
            violations: Vec::new(),
            queue: QueueStats::default(),
        };
        assert!(report.generate_text().contains("Result: PASS"));
    }
}

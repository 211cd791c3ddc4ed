//! Workbook transition coordinator
//!
//! Owns the live sync binding and swaps the active workbook under edit
//! traffic. Ordering is the whole safety argument:
//!
//! 1. the queue is drained (after one scheduler yield) before anything
//!    backend-facing changes
//! 2. the old document's sync listener is detached before the backend swap,
//!    so nothing new can be generated for the old workbook
//! 3. caches are rescoped to the new signature before any content loads
//!
//! A failure once the listener is detached restores the previous workbook's
//! sync listener and before-close hook, then returns the error. When the
//! backend had already swapped to the new workbook, the previous one is put
//! back first (reopened from its file, or recreated, then overwritten with
//! the document's content); if that fails, sync stays detached.

use crate::config::SyncConfig;
use crate::document::DocumentController;
use crate::error::{SyncError, SyncResult};
use crate::hooks::{BeforeCloseHook, ShellPrompts, WorkbookScopedService};
use crate::loader::{load_snapshot, replay_snapshot};
use crate::phase::{validate_transition, TransitionPhase};
use crate::refresh::RefreshMetadataStore;
use crate::sync::{start_sync, SyncHandle};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use wbsync_backend::SharedBackend;
use wbsync_cache::{session_signature, SignatureService, WorkbookCaches};
use wbsync_dispatch::{DeltaBatcher, DispatchQueue};
use wbsync_model::{WorkbookDescriptor, WorkbookId, WorkbookSignature};

/// Result of Open / New
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The new workbook is active
    Completed(WorkbookDescriptor),
    /// The user kept their unsaved changes; nothing happened
    Declined,
}

/// Result of Save / Save-As
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Saved to this path
    Saved(String),
    /// The user dismissed the save-location prompt
    Cancelled,
}

/// The loaded workbook and the identities derived from it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveWorkbook {
    /// Backend descriptor
    pub descriptor: WorkbookDescriptor,
    /// Cache signature computed when it was loaded
    pub signature: WorkbookSignature,
    /// Key for workbook-scoped state and services
    pub id: WorkbookId,
}

#[derive(Debug, Clone, Copy)]
enum Target<'a> {
    Open(&'a str),
    New,
}

impl fmt::Display for Target<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Open(path) => write!(f, "open {path}"),
            Target::New => f.write_str("new"),
        }
    }
}

struct Bindings {
    phase: TransitionPhase,
    active: Option<ActiveWorkbook>,
    sync: Option<SyncHandle>,
    /// Workbook the before-close hook is installed for
    hook_for: Option<WorkbookId>,
}

/// Orchestrates Open, New, Save and Save-As against live sync
pub struct WorkbookCoordinator {
    backend: SharedBackend,
    document: Arc<dyn DocumentController>,
    queue: Arc<DispatchQueue>,
    batcher: DeltaBatcher,
    signatures: SignatureService,
    caches: Arc<WorkbookCaches>,
    prompts: Arc<dyn ShellPrompts>,
    before_close: Option<Arc<dyn BeforeCloseHook>>,
    services: Vec<Arc<dyn WorkbookScopedService>>,
    refresh: Arc<RefreshMetadataStore>,
    config: SyncConfig,
    bindings: Mutex<Bindings>,
    transition: tokio::sync::Mutex<()>,
    collaboration: AtomicBool,
}

impl WorkbookCoordinator {
    /// Create an idle coordinator; must be called inside a Tokio runtime
    pub fn new(
        backend: SharedBackend,
        document: Arc<dyn DocumentController>,
        prompts: Arc<dyn ShellPrompts>,
        config: SyncConfig,
    ) -> SyncResult<Self> {
        config.validate()?;

        let queue = Arc::new(DispatchQueue::new());
        let batcher = DeltaBatcher::new(Arc::clone(&backend), Arc::clone(&queue))
            .with_max_range_area(config.max_range_write_area);

        Ok(Self {
            signatures: SignatureService::new(Arc::clone(&backend)),
            caches: Arc::new(WorkbookCaches::new(config.cache_capacity)),
            backend,
            document,
            queue,
            batcher,
            prompts,
            before_close: None,
            services: Vec::new(),
            refresh: Arc::new(RefreshMetadataStore::new()),
            config,
            bindings: Mutex::new(Bindings {
                phase: TransitionPhase::Idle,
                active: None,
                sync: None,
                hook_for: None,
            }),
            transition: tokio::sync::Mutex::new(()),
            collaboration: AtomicBool::new(false),
        })
    }

    /// Install `hook` for every workbook this coordinator activates
    #[must_use]
    pub fn with_before_close_hook(mut self, hook: Arc<dyn BeforeCloseHook>) -> Self {
        self.before_close = Some(hook);
        self
    }

    /// Restart `service` under each new workbook identity
    #[must_use]
    pub fn with_service(mut self, service: Arc<dyn WorkbookScopedService>) -> Self {
        self.services.push(service);
        self
    }

    /// Share an existing refresh metadata store
    #[must_use]
    pub fn with_refresh_store(mut self, store: Arc<RefreshMetadataStore>) -> Self {
        self.refresh = store;
        self
    }

    // ------------------------------------------------------------------
    // Upward interface
    // ------------------------------------------------------------------

    /// Replace the active workbook with the one stored at `path`
    pub async fn open_workbook_from_path(&self, path: &str) -> SyncResult<TransitionOutcome> {
        self.run_transition(Target::Open(path)).await
    }

    /// Replace the active workbook with an empty one
    pub async fn handle_new_workbook(&self) -> SyncResult<TransitionOutcome> {
        self.run_transition(Target::New).await
    }

    /// Save in place, or fall through to Save-As when there is no save path
    pub async fn handle_save(&self) -> SyncResult<SaveOutcome> {
        let _guard = self.lock_transition()?;
        let active = self.active_workbook().ok_or(SyncError::NoActiveWorkbook)?;

        let Some(path) = active.descriptor.path.clone().filter(|p| !p.is_empty()) else {
            tracing::info!("workbook has no save path; delegating to save-as");
            return self.save_as_locked(active, None).await;
        };

        self.advance(TransitionPhase::Saving)?;
        let result = self.save_in_place(&path).await;

        match self.finish_saving(result) {
            Ok(()) => {
                tracing::info!(path = %path, "workbook saved");
                Ok(SaveOutcome::Saved(path))
            }
            Err(err) => {
                tracing::error!(path = %path, error = %err, "save failed");
                Err(err)
            }
        }
    }

    /// Save to `path`, prompting for one when `None`
    pub async fn handle_save_as(&self, path: Option<String>) -> SyncResult<SaveOutcome> {
        let _guard = self.lock_transition()?;
        let active = self.active_workbook().ok_or(SyncError::NoActiveWorkbook)?;
        self.save_as_locked(active, path).await
    }

    /// Consistency checkpoint: yield, then drain the write queue to stability
    pub async fn drain_backend_sync(&self) -> u64 {
        self.queue.settle(self.config.tick_yields).await
    }

    /// Enter or leave a live collaboration session
    ///
    /// While active the document is never considered locally dirty, so
    /// transitions skip the discard prompt.
    pub fn set_collaboration_active(&self, active: bool) {
        self.collaboration.store(active, Ordering::Release);
        tracing::info!(active, "collaboration session state changed");
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Whether a collaboration session is active
    pub fn collaboration_active(&self) -> bool {
        self.collaboration.load(Ordering::Acquire)
    }

    /// Current phase
    pub fn phase(&self) -> TransitionPhase {
        self.bindings.lock().phase
    }

    /// Active workbook, if any
    pub fn active_workbook(&self) -> Option<ActiveWorkbook> {
        self.bindings.lock().active.clone()
    }

    /// Descriptor of the active workbook
    pub fn active_descriptor(&self) -> Option<WorkbookDescriptor> {
        self.bindings.lock().active.as_ref().map(|a| a.descriptor.clone())
    }

    /// Signature of the active workbook
    pub fn active_signature(&self) -> Option<WorkbookSignature> {
        self.bindings.lock().active.as_ref().map(|a| a.signature.clone())
    }

    /// Identity of the active workbook
    pub fn active_workbook_id(&self) -> Option<WorkbookId> {
        self.bindings.lock().active.as_ref().map(|a| a.id.clone())
    }

    /// Whether document edits are currently forwarded to the backend
    pub fn is_syncing(&self) -> bool {
        self.bindings
            .lock()
            .sync
            .as_ref()
            .is_some_and(SyncHandle::is_active)
    }

    /// Workbook the before-close hook is currently installed for
    pub fn hook_installed_for(&self) -> Option<WorkbookId> {
        self.bindings.lock().hook_for.clone()
    }

    /// Signature-scoped caches
    pub fn caches(&self) -> &Arc<WorkbookCaches> {
        &self.caches
    }

    /// Refresh metadata store
    pub fn refresh_store(&self) -> &Arc<RefreshMetadataStore> {
        &self.refresh
    }

    /// Write queue
    pub fn queue(&self) -> &Arc<DispatchQueue> {
        &self.queue
    }

    /// Delta batcher feeding the queue
    pub fn batcher(&self) -> &DeltaBatcher {
        &self.batcher
    }

    /// Document controller
    pub fn document(&self) -> &Arc<dyn DocumentController> {
        &self.document
    }

    /// Backend
    pub fn backend(&self) -> &SharedBackend {
        &self.backend
    }

    /// Configuration
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Open / New
    // ------------------------------------------------------------------

    async fn run_transition(&self, target: Target<'_>) -> SyncResult<TransitionOutcome> {
        let _guard = self.lock_transition()?;
        let resume = self.phase();
        tracing::info!(%target, "workbook transition requested");

        self.advance(TransitionPhase::Confirming)?;
        if !self.confirm_discard().await {
            self.advance(resume)?;
            tracing::info!(%target, "discard declined; transition abandoned");
            return Ok(TransitionOutcome::Declined);
        }

        self.advance(TransitionPhase::Draining)?;
        self.queue.settle(self.config.tick_yields).await;

        let previous = self.active_workbook();
        if let Some(previous) = &previous {
            self.run_before_close(previous).await?;
        }

        self.advance(TransitionPhase::Closing)?;
        self.detach();

        // A backend that fails to open or create keeps its current workbook.
        let descriptor = match self.swap_backend(target).await {
            Ok(descriptor) => descriptor,
            Err(err) => {
                return Err(self.fail_transition(target, err, previous.as_ref(), false).await)
            }
        };

        match self.load_target(descriptor).await {
            Ok(descriptor) => {
                tracing::info!(%target, sheets = descriptor.sheets.len(), "workbook active");
                Ok(TransitionOutcome::Completed(descriptor))
            }
            Err(err) => Err(self.fail_transition(target, err, previous.as_ref(), true).await),
        }
    }

    async fn fail_transition(
        &self,
        target: Target<'_>,
        err: SyncError,
        previous: Option<&ActiveWorkbook>,
        backend_swapped: bool,
    ) -> SyncError {
        tracing::error!(
            %target,
            error = %err,
            backend_swapped,
            "workbook transition failed; rolling back"
        );
        match self.roll_back(previous, backend_swapped).await {
            Ok(()) => err,
            Err(restore) => SyncError::RestoreFailed {
                transition: Box::new(err),
                restore: Box::new(restore),
            },
        }
    }

    async fn confirm_discard(&self) -> bool {
        if self.collaboration_active() {
            tracing::debug!("collaboration session active; skipping discard prompt");
            return true;
        }
        if !self.document.is_dirty() {
            return true;
        }
        self.prompts.confirm_discard_changes().await
    }

    async fn run_before_close(&self, previous: &ActiveWorkbook) -> SyncResult<()> {
        let Some(hook) = &self.before_close else {
            return Ok(());
        };
        if self.hook_installed_for().as_ref() != Some(&previous.id) {
            return Ok(());
        }

        self.advance(TransitionPhase::BeforeCloseHook)?;
        if let Err(err) = hook.before_close(&previous.id).await {
            tracing::warn!(workbook = %previous.id, error = %err, "before-close hook failed");
        }
        // The hook may have enqueued writes of its own.
        self.queue.drain_to_stability().await;
        Ok(())
    }

    /// Detach the sync listener and uninstall the hook
    fn detach(&self) {
        let sync = {
            let mut bindings = self.bindings.lock();
            bindings.hook_for = None;
            bindings.sync.take()
        };
        if let Some(sync) = sync {
            sync.stop();
        }
    }

    async fn swap_backend(&self, target: Target<'_>) -> SyncResult<WorkbookDescriptor> {
        let descriptor = match target {
            Target::Open(path) => self.backend.open_workbook(path).await?,
            Target::New => self.backend.new_workbook().await?,
        };
        Ok(descriptor)
    }

    async fn load_target(&self, descriptor: WorkbookDescriptor) -> SyncResult<WorkbookDescriptor> {
        let signature = self.signatures.compute(&descriptor).await;
        self.caches.reset_all(&signature).await;

        self.advance(TransitionPhase::Loading)?;
        let snapshot = load_snapshot(
            self.backend.as_ref(),
            &descriptor,
            self.config.load_chunk_rows,
            self.config.load_chunk_cols,
        )
        .await?;
        self.document.apply_state(snapshot);
        self.document.mark_saved();
        self.populate_caches(&signature).await;

        let id = WorkbookId::for_descriptor(&descriptor);
        self.activate(ActiveWorkbook {
            descriptor: descriptor.clone(),
            signature,
            id: id.clone(),
        })?;
        self.restart_services(&id);
        Ok(descriptor)
    }

    async fn populate_caches(&self, signature: &WorkbookSignature) {
        let names = self.backend.list_defined_names().await.unwrap_or_else(|err| {
            tracing::warn!(error = %err, "listing defined names failed");
            Vec::new()
        });
        let tables = self.backend.list_tables().await.unwrap_or_else(|err| {
            tracing::warn!(error = %err, "listing tables failed");
            Vec::new()
        });
        if let Err(err) = self.caches.populate(signature, names, tables).await {
            tracing::warn!(error = %err, "populating workbook caches failed");
        }
    }

    /// Enter `Active` for `workbook`: attach sync and install the hook
    fn activate(&self, workbook: ActiveWorkbook) -> SyncResult<()> {
        let mut bindings = self.bindings.lock();
        validate_transition(bindings.phase, TransitionPhase::Active)?;

        bindings.sync = Some(start_sync(
            Arc::clone(&self.document),
            self.batcher.clone(),
        ));
        bindings.hook_for = self.before_close.as_ref().map(|_| workbook.id.clone());
        bindings.active = Some(workbook);
        bindings.phase = TransitionPhase::Active;
        Ok(())
    }

    async fn roll_back(
        &self,
        previous: Option<&ActiveWorkbook>,
        backend_swapped: bool,
    ) -> SyncResult<()> {
        self.bindings.lock().phase = TransitionPhase::RollingBack;

        let Some(previous) = previous else {
            self.return_to_idle().await;
            tracing::warn!("rolled back to no active workbook");
            return Ok(());
        };

        if backend_swapped {
            if let Err(err) = self.restore_backend(previous).await {
                tracing::error!(
                    workbook = %previous.id,
                    error = %err,
                    "previous workbook could not be restored in the backend; sync stays detached"
                );
                self.return_to_idle().await;
                return Err(err);
            }
        }

        self.caches.reset_all(&previous.signature).await;

        let mut bindings = self.bindings.lock();
        bindings.sync = Some(start_sync(
            Arc::clone(&self.document),
            self.batcher.clone(),
        ));
        bindings.hook_for = self.before_close.as_ref().map(|_| previous.id.clone());
        bindings.active = Some(previous.clone());
        bindings.phase = TransitionPhase::Active;
        tracing::warn!(workbook = %previous.id, "rolled back; previous workbook bindings restored");
        Ok(())
    }

    /// Put the previous workbook back into the backend with the document's content
    async fn restore_backend(&self, previous: &ActiveWorkbook) -> SyncResult<()> {
        let descriptor = match previous.descriptor.durable_path() {
            Some(path) => self.backend.open_workbook(path).await?,
            None => self.backend.new_workbook().await?,
        };
        let writes = replay_snapshot(
            self.backend.as_ref(),
            &descriptor,
            &self.document.snapshot(),
            self.config.load_chunk_rows,
            self.config.load_chunk_cols,
        )
        .await?;
        tracing::warn!(workbook = %previous.id, writes, "previous workbook restored in the backend");
        Ok(())
    }

    /// No active workbook; caches rescoped to a signature nothing shares
    async fn return_to_idle(&self) {
        self.caches.reset_all(&session_signature()).await;
        let mut bindings = self.bindings.lock();
        bindings.active = None;
        bindings.hook_for = None;
        bindings.phase = TransitionPhase::Idle;
    }

    // ------------------------------------------------------------------
    // Save / Save-As
    // ------------------------------------------------------------------

    async fn save_in_place(&self, path: &str) -> SyncResult<()> {
        self.queue.settle(self.config.tick_yields).await;
        self.backend.save_workbook(Some(path)).await?;
        self.document.mark_saved();
        Ok(())
    }

    async fn save_as_locked(
        &self,
        active: ActiveWorkbook,
        path: Option<String>,
    ) -> SyncResult<SaveOutcome> {
        let path = match path {
            Some(path) => path,
            None => match self
                .prompts
                .choose_save_path(active.descriptor.durable_path())
                .await
            {
                Some(path) => path,
                None => {
                    tracing::info!("save-as cancelled");
                    return Ok(SaveOutcome::Cancelled);
                }
            },
        };

        self.advance(TransitionPhase::Saving)?;
        let result = self.save_to(active, &path).await;

        match self.finish_saving(result) {
            Ok(()) => Ok(SaveOutcome::Saved(path)),
            Err(err) => {
                tracing::error!(path = %path, error = %err, "save-as failed");
                Err(err)
            }
        }
    }

    async fn save_to(&self, active: ActiveWorkbook, path: &str) -> SyncResult<()> {
        self.queue.settle(self.config.tick_yields).await;
        self.backend.save_workbook(Some(path)).await?;

        let descriptor = active.descriptor.with_path(path);
        self.document.mark_saved();

        let id = WorkbookId::from_path(path);
        let migrated = self.refresh.migrate(&active.id, &id);
        {
            let mut bindings = self.bindings.lock();
            if bindings.hook_for.is_some() {
                bindings.hook_for = Some(id.clone());
            }
            bindings.active = Some(ActiveWorkbook {
                descriptor,
                signature: active.signature,
                id: id.clone(),
            });
        }
        self.restart_services(&id);

        tracing::info!(path, workbook = %id, migrated, "workbook saved as");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn lock_transition(&self) -> SyncResult<tokio::sync::MutexGuard<'_, ()>> {
        self.transition
            .try_lock()
            .map_err(|_| SyncError::TransitionInProgress)
    }

    fn advance(&self, to: TransitionPhase) -> SyncResult<()> {
        let mut bindings = self.bindings.lock();
        validate_transition(bindings.phase, to)?;
        tracing::debug!(from = %bindings.phase, %to, "transition phase");
        bindings.phase = to;
        Ok(())
    }

    /// Leave `Saving`; a save error takes precedence over a phase error
    fn finish_saving<T>(&self, result: SyncResult<T>) -> SyncResult<T> {
        let restored = self.advance(TransitionPhase::Active);
        match (result, restored) {
            (Err(err), Err(phase)) => {
                tracing::error!(error = %phase, "could not leave saving phase");
                Err(err)
            }
            (result, restored) => restored.and(result),
        }
    }

    fn restart_services(&self, id: &WorkbookId) {
        for service in &self.services {
            tracing::debug!(service = service.name(), workbook = %id, "restarting workbook service");
            service.restart(id);
        }
    }
}

impl fmt::Debug for WorkbookCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bindings = self.bindings.lock();
        f.debug_struct("WorkbookCoordinator")
            .field("backend", &self.backend.name())
            .field("phase", &bindings.phase)
            .field("active", &bindings.active.as_ref().map(|a| &a.id))
            .field("syncing", &bindings.sync.is_some())
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

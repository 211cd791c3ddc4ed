//! Open / New transitions under live edit traffic.

use std::time::Duration;
use wbsync_backend::{LocalBackend, WorkbookBackend};
use wbsync_core::{DocumentController, SaveOutcome, SyncError, TransitionOutcome, TransitionPhase};
use wbsync_model::{CellState, WorkbookId};
use wbsync_test_utils::{write_workbook_file, BackendCall, TestHarness};

fn temp_path(dir: &tempfile::TempDir, name: &str) -> String {
    dir.path().join(name).to_str().unwrap().to_string()
}

#[tokio::test]
async fn pending_writes_for_a_finish_before_b_loads() {
    let dir = tempfile::tempdir().unwrap();
    let book_b = temp_path(&dir, "b.json");
    write_workbook_file(&book_b, &[(0, 0, CellState::value("from b"))]).await;

    let h = TestHarness::started().await;
    h.backend.clear_calls();
    h.backend.set_write_delay(Some(Duration::from_millis(5)));

    for i in 0..6 {
        h.document
            .set_cell_value("Sheet1", 10 + i * 3, 7, CellState::value(i64::from(i)));
    }

    let outcome = h.coordinator.open_workbook_from_path(&book_b).await.unwrap();
    assert!(matches!(outcome, TransitionOutcome::Completed(_)));

    let calls = h.backend.calls();
    let open_at = h
        .backend
        .position(|c| matches!(c, BackendCall::Open(_)))
        .unwrap();
    let last_write = calls.iter().rposition(BackendCall::is_write).unwrap();
    let first_read = h.backend.position(BackendCall::is_read).unwrap();

    assert_eq!(h.backend.writes().len(), 6);
    assert!(last_write < open_at, "write landed after open: {calls:?}");
    assert!(last_write < first_read);

    // None of A's edits reached B.
    for i in 0..6 {
        assert_eq!(h.backend.local().cell("Sheet1", 10 + i * 3, 7), None);
    }
    assert_eq!(h.document.get_cell("Sheet1", 0, 0), CellState::value("from b"));
    assert!(h.document.get_cell("Sheet1", 10, 7).is_empty());
}

#[tokio::test]
async fn failed_open_restores_previous_bindings() {
    let h = TestHarness::started().await;
    let before = h.coordinator.active_workbook().unwrap();

    h.document.set_cell_value("Sheet1", 1, 1, CellState::value("kept"));
    h.prompts.answer_confirm(true);
    h.backend.set_fail_open(true);

    let err = h
        .coordinator
        .open_workbook_from_path("/somewhere/b.json")
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Backend(_)));
    assert!(err.is_user_visible());

    assert_eq!(h.coordinator.phase(), TransitionPhase::Active);
    assert!(h.coordinator.is_syncing());
    assert_eq!(h.coordinator.hook_installed_for(), Some(before.id.clone()));
    assert_eq!(h.coordinator.active_workbook(), Some(before.clone()));
    assert_eq!(h.coordinator.caches().signature(), Some(before.signature));

    // Typing into the still-displayed workbook keeps persisting.
    h.document.set_cell_value("Sheet1", 2, 2, CellState::value("after rollback"));
    h.coordinator.drain_backend_sync().await;
    assert_eq!(
        h.backend.local().cell("Sheet1", 2, 2),
        Some(CellState::value("after rollback"))
    );
    assert_eq!(h.backend.local().cell("Sheet1", 1, 1), Some(CellState::value("kept")));
}

#[tokio::test]
async fn failure_while_loading_rolls_back_too() {
    let dir = tempfile::tempdir().unwrap();
    let book_b = temp_path(&dir, "b.json");
    write_workbook_file(&book_b, &[(3, 3, CellState::value(9))]).await;

    let h = TestHarness::started().await;
    let before = h.coordinator.active_workbook().unwrap();
    h.document.set_cell_value("Sheet1", 0, 0, CellState::value("a"));
    h.backend.fail_next_reads(1);

    let err = h.coordinator.open_workbook_from_path(&book_b).await.unwrap_err();
    assert!(matches!(err, SyncError::Backend(_)));

    assert_eq!(h.coordinator.phase(), TransitionPhase::Active);
    assert!(h.coordinator.is_syncing());
    assert_eq!(h.coordinator.active_workbook_id(), Some(before.id));
    // The document was never replaced.
    assert_eq!(h.document.get_cell("Sheet1", 0, 0), CellState::value("a"));
    assert!(h.document.get_cell("Sheet1", 3, 3).is_empty());

    // The backend holds the unsaved workbook again, with the document's content.
    let local = h.backend.local();
    assert_eq!(local.descriptor().unwrap().path, None);
    assert_eq!(local.cell("Sheet1", 0, 0), Some(CellState::value("a")));
    assert_eq!(local.cell("Sheet1", 3, 3), None);
}

#[tokio::test]
async fn edits_after_late_rollback_are_saved_to_previous_file() {
    let dir = tempfile::tempdir().unwrap();
    let book_a = temp_path(&dir, "a.json");
    let book_b = temp_path(&dir, "b.json");
    write_workbook_file(&book_a, &[(0, 0, CellState::value("a on disk"))]).await;
    write_workbook_file(&book_b, &[(0, 0, CellState::value("b on disk"))]).await;

    let h = TestHarness::started().await;
    h.coordinator.open_workbook_from_path(&book_a).await.unwrap();
    h.document.set_cell_value("Sheet1", 1, 0, CellState::value("unsaved in a"));

    h.backend.fail_next_reads(1);
    h.coordinator.open_workbook_from_path(&book_b).await.unwrap_err();
    assert_eq!(
        h.backend.local().descriptor().unwrap().path.as_deref(),
        Some(book_a.as_str())
    );

    h.document.set_cell_value("Sheet1", 2, 0, CellState::value("typed after rollback"));
    let outcome = h.coordinator.handle_save().await.unwrap();
    assert_eq!(outcome, SaveOutcome::Saved(book_a.clone()));
    assert!(!h.document.is_dirty());

    let a = LocalBackend::new();
    a.open_workbook(&book_a).await.unwrap();
    assert_eq!(a.cell("Sheet1", 0, 0), Some(CellState::value("a on disk")));
    assert_eq!(a.cell("Sheet1", 1, 0), Some(CellState::value("unsaved in a")));
    assert_eq!(a.cell("Sheet1", 2, 0), Some(CellState::value("typed after rollback")));

    let b = LocalBackend::new();
    b.open_workbook(&book_b).await.unwrap();
    assert_eq!(b.cell("Sheet1", 0, 0), Some(CellState::value("b on disk")));
    assert_eq!(b.cell("Sheet1", 1, 0), None);
    assert_eq!(b.cell("Sheet1", 2, 0), None);
}

#[tokio::test]
async fn failed_restore_leaves_sync_detached() {
    let dir = tempfile::tempdir().unwrap();
    let book_b = temp_path(&dir, "b.json");
    write_workbook_file(&book_b, &[(0, 0, CellState::value("b"))]).await;

    let h = TestHarness::started().await;
    h.document.set_cell_value("Sheet1", 5, 5, CellState::value("a"));
    h.backend.set_fail_reads(true);

    let err = h.coordinator.open_workbook_from_path(&book_b).await.unwrap_err();
    assert!(matches!(err, SyncError::RestoreFailed { .. }), "{err}");
    assert!(err.is_user_visible());

    assert_eq!(h.coordinator.phase(), TransitionPhase::Idle);
    assert!(!h.coordinator.is_syncing());
    assert_eq!(h.coordinator.active_workbook(), None);
    assert_eq!(h.coordinator.hook_installed_for(), None);

    h.backend.clear_calls();
    h.document.set_cell_value("Sheet1", 6, 6, CellState::value("not forwarded"));
    h.coordinator.drain_backend_sync().await;
    assert!(h.backend.writes().is_empty());
}

#[tokio::test]
async fn failed_first_load_unscopes_caches() {
    let dir = tempfile::tempdir().unwrap();
    let book = temp_path(&dir, "first.json");
    write_workbook_file(&book, &[(0, 0, CellState::value(1))]).await;

    let h = TestHarness::new();
    h.backend.fail_next_reads(1);
    h.coordinator.open_workbook_from_path(&book).await.unwrap_err();

    assert_eq!(h.coordinator.phase(), TransitionPhase::Idle);
    let scoped = h.coordinator.caches().signature().unwrap();
    assert!(scoped.as_str().starts_with("session:"), "{scoped}");
}

#[tokio::test]
async fn declined_confirmation_changes_nothing() {
    let h = TestHarness::started().await;
    let before = h.coordinator.active_workbook().unwrap();
    h.document.set_cell_value("Sheet1", 0, 0, CellState::value("unsaved"));
    h.coordinator.drain_backend_sync().await;
    h.backend.clear_calls();

    h.prompts.answer_confirm(false);
    let outcome = h.coordinator.handle_new_workbook().await.unwrap();

    assert_eq!(outcome, TransitionOutcome::Declined);
    assert_eq!(h.prompts.confirm_asked(), 1);
    assert_eq!(h.coordinator.phase(), TransitionPhase::Active);
    assert_eq!(h.coordinator.active_workbook(), Some(before));
    assert!(h.backend.calls().is_empty());
    assert!(h.coordinator.is_syncing());
    assert!(h.document.is_dirty());
}

#[tokio::test]
async fn clean_document_is_not_prompted() {
    let h = TestHarness::started().await;
    h.coordinator.handle_new_workbook().await.unwrap();
    assert_eq!(h.prompts.confirm_asked(), 0);
}

#[tokio::test]
async fn collaboration_session_skips_confirmation() {
    let h = TestHarness::started().await;
    h.document.set_cell_value("Sheet1", 0, 0, CellState::value("shared"));
    h.prompts.answer_confirm(false);
    h.coordinator.set_collaboration_active(true);

    let outcome = h.coordinator.handle_new_workbook().await.unwrap();
    assert!(matches!(outcome, TransitionOutcome::Completed(_)));
    assert_eq!(h.prompts.confirm_asked(), 0);
}

#[tokio::test]
async fn before_close_hook_runs_and_its_writes_drain_first() {
    let h = TestHarness::started().await;
    let previous = h.coordinator.active_workbook_id().unwrap();

    let document = h.document.clone();
    h.hook.on_close(move |_| {
        document.set_cell_value("Sheet1", 9, 9, CellState::value("closing"));
    });
    h.backend.set_write_delay(Some(Duration::from_millis(5)));
    h.backend.clear_calls();

    h.prompts.answer_confirm(true);
    h.coordinator.handle_new_workbook().await.unwrap();

    assert_eq!(h.hook.calls(), vec![previous]);
    let hook_write = h
        .backend
        .position(|c| matches!(c, BackendCall::SetCell { row: 9, col: 9, .. }))
        .unwrap();
    let new_at = h
        .backend
        .position(|c| matches!(c, BackendCall::New))
        .unwrap();
    assert!(hook_write < new_at);
}

#[tokio::test]
async fn failing_hook_does_not_block_transition() {
    let h = TestHarness::started().await;
    h.hook.set_fail(true);

    let outcome = h.coordinator.handle_new_workbook().await.unwrap();
    assert!(matches!(outcome, TransitionOutcome::Completed(_)));
    assert_eq!(h.hook.calls().len(), 1);
    assert_eq!(
        h.coordinator.hook_installed_for(),
        h.coordinator.active_workbook_id()
    );
}

#[tokio::test]
async fn first_transition_has_no_hook_to_run() {
    let h = TestHarness::new();
    h.coordinator.handle_new_workbook().await.unwrap();
    assert!(h.hook.calls().is_empty());
    assert!(h.coordinator.hook_installed_for().is_some());
}

#[tokio::test]
async fn services_restart_under_each_new_identity() {
    let dir = tempfile::tempdir().unwrap();
    let book = temp_path(&dir, "svc.json");
    write_workbook_file(&book, &[]).await;

    let h = TestHarness::started().await;
    h.coordinator.open_workbook_from_path(&book).await.unwrap();

    let restarts = h.service.restarts();
    assert_eq!(restarts.len(), 2);
    assert!(restarts[0].as_str().starts_with("session:"));
    assert_eq!(restarts[1], WorkbookId::from_path(&book));
}

#[tokio::test]
async fn concurrent_transition_fails_fast() {
    let h = TestHarness::started().await;
    h.backend.set_write_delay(Some(Duration::from_millis(20)));
    h.document.set_cell_value("Sheet1", 0, 0, CellState::value(1));
    h.prompts.answer_confirm(true);

    let (first, second) = tokio::join!(
        h.coordinator.handle_new_workbook(),
        h.coordinator.handle_new_workbook()
    );

    assert!(first.is_ok());
    assert!(matches!(second, Err(SyncError::TransitionInProgress)));
    assert_eq!(h.coordinator.phase(), TransitionPhase::Active);
}

#[tokio::test]
async fn loaded_content_is_not_echoed_to_backend() {
    let dir = tempfile::tempdir().unwrap();
    let book = temp_path(&dir, "echo.json");
    write_workbook_file(
        &book,
        &[(0, 0, CellState::value(1)), (0, 1, CellState::formula("=A1+1"))],
    )
    .await;

    let h = TestHarness::started().await;
    h.backend.clear_calls();
    h.coordinator.open_workbook_from_path(&book).await.unwrap();
    h.coordinator.drain_backend_sync().await;

    assert!(h.backend.writes().is_empty());
    assert_eq!(h.document.get_cell("Sheet1", 0, 1), CellState::formula("=A1+1"));
    assert!(!h.document.is_dirty());
}

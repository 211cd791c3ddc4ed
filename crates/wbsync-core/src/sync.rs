//! Continuous sync: forwards document changes to the backend

use crate::document::{ChangeEvent, ChangeSource, DocumentController, ListenerId};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use wbsync_dispatch::DeltaBatcher;

/// Live binding between a document and the backend write queue
pub struct SyncHandle {
    document: Arc<dyn DocumentController>,
    listener: Mutex<Option<ListenerId>>,
}

/// Subscribe `batcher` to every non-load change of `document`
pub fn start_sync(document: Arc<dyn DocumentController>, batcher: DeltaBatcher) -> SyncHandle {
    let listener = document.subscribe(Arc::new(move |event: &ChangeEvent| {
        if event.source == ChangeSource::Load {
            return;
        }
        // Completions are dropped: write failures are the queue's to log.
        let _ = batcher.batch(&event.deltas);
    }));
    tracing::debug!(?listener, "sync listener attached");

    SyncHandle {
        document,
        listener: Mutex::new(Some(listener)),
    }
}

impl SyncHandle {
    /// Detach from the document
    ///
    /// Writes already enqueued still run. Idempotent.
    pub fn stop(&self) {
        if let Some(id) = self.listener.lock().take() {
            self.document.unsubscribe(id);
            tracing::debug!(listener = ?id, "sync listener detached");
        }
    }

    /// Clear the document's unsaved-changes flag
    pub fn mark_saved(&self) {
        self.document.mark_saved();
    }

    /// Whether the listener is still attached
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.listener.lock().is_some()
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for SyncHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncHandle")
            .field("listener", &*self.listener.lock())
            .finish_non_exhaustive()
    }
}

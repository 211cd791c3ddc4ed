//! Cache invalidation signatures
//!
//! A signature names one loaded workbook instance. Unsaved workbooks get a
//! random session signature that never survives the process; saved ones are
//! keyed by path plus the file's modification time and size, so any external
//! change to the file produces a new signature.

use uuid::Uuid;
use wbsync_backend::{FileStat, SharedBackend};
use wbsync_model::{WorkbookDescriptor, WorkbookSignature};

/// Signature text for a stat result, or the bare path when the stat is incomplete
#[must_use]
pub fn format_signature(path: &str, stat: &FileStat) -> String {
    match stat.complete() {
        Some((mod_time, size)) => format!("{path}:{mod_time}:{size}"),
        None => path.to_string(),
    }
}

/// Fresh random signature for an unsaved workbook
#[must_use]
pub fn session_signature() -> WorkbookSignature {
    WorkbookSignature::new(format!("session:{}", Uuid::new_v4()))
}

/// Computes signatures through the backend's `stat_file`
#[derive(Clone)]
pub struct SignatureService {
    backend: SharedBackend,
}

impl SignatureService {
    /// Create service over `backend`
    #[inline]
    #[must_use]
    pub fn new(backend: SharedBackend) -> Self {
        Self { backend }
    }

    /// Signature for `descriptor`
    ///
    /// Never fails: stat errors degrade to the path alone.
    pub async fn compute(&self, descriptor: &WorkbookDescriptor) -> WorkbookSignature {
        let Some(path) = descriptor.durable_path() else {
            let signature = session_signature();
            tracing::debug!(%signature, "unsaved workbook; using session signature");
            return signature;
        };

        match self.backend.stat_file(path).await {
            Ok(stat) => {
                if stat.complete().is_none() {
                    tracing::debug!(path, ?stat, "stat missing fields; signature is path only");
                }
                WorkbookSignature::new(format_signature(path, &stat))
            }
            Err(err) => {
                tracing::debug!(path, error = %err, "stat failed; signature is path only");
                WorkbookSignature::new(path)
            }
        }
    }
}

impl std::fmt::Debug for SignatureService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureService")
            .field("backend", &self.backend.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_stat_formats_all_parts() {
        let stat = FileStat::new(1_700_000_000_000, 4096);
        assert_eq!(
            format_signature("/books/q3.json", &stat),
            "/books/q3.json:1700000000000:4096"
        );
    }

    #[test]
    fn partial_stat_degrades_to_path() {
        let stat = FileStat {
            mod_time_ms: Some(5),
            size_bytes: None,
        };
        assert_eq!(format_signature("/a", &stat), "/a");
        assert_eq!(format_signature("/a", &FileStat::default()), "/a");
    }

    #[test]
    fn session_signatures_differ() {
        let a = session_signature();
        let b = session_signature();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("session:"));
    }
}

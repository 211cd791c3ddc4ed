//! Signature-scoped caches
//!
//! Entries are keyed by `(signature, key)` and the cache remembers the
//! signature it is currently scoped to. Lookups and merges under any other
//! signature are refused, so a computation that started before a workbook
//! swap can never publish into, or read from, the new workbook's cache.

use crate::error::CacheError;
use moka::future::Cache;
use parking_lot::RwLock;
use std::fmt;
use wbsync_model::{DefinedName, TableInfo, WorkbookSignature};

/// Default per-cache entry bound
pub const DEFAULT_CACHE_CAPACITY: u64 = 10_000;

/// Cache whose entries only serve the signature they were computed under
pub struct SignatureScopedCache<V> {
    name: &'static str,
    inner: Cache<(WorkbookSignature, String), V>,
    current: RwLock<Option<WorkbookSignature>>,
}

impl<V> SignatureScopedCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create empty cache, unscoped until the first [`reset`](Self::reset)
    #[must_use]
    pub fn new(name: &'static str, max_capacity: u64) -> Self {
        Self {
            name,
            inner: Cache::new(max_capacity),
            current: RwLock::new(None),
        }
    }

    /// Signature the cache currently serves
    #[must_use]
    pub fn signature(&self) -> Option<WorkbookSignature> {
        self.current.read().clone()
    }

    /// Whether `signature` is the one currently served
    #[must_use]
    pub fn is_current(&self, signature: &WorkbookSignature) -> bool {
        self.current.read().as_ref() == Some(signature)
    }

    /// Drop every entry and rescope to `signature`, seeded with `seed`
    pub async fn reset<I>(&self, signature: WorkbookSignature, seed: I)
    where
        I: IntoIterator<Item = (String, V)>,
    {
        *self.current.write() = Some(signature.clone());
        self.inner.invalidate_all();

        let mut seeded = 0usize;
        for (key, value) in seed {
            self.inner.insert((signature.clone(), key), value).await;
            seeded += 1;
        }
        tracing::debug!(cache = self.name, %signature, seeded, "cache reset");
    }

    /// Entry for `key`, only if `signature` is current
    pub async fn get(&self, signature: &WorkbookSignature, key: &str) -> Option<V> {
        if !self.is_current(signature) {
            tracing::trace!(cache = self.name, %signature, key, "lookup under stale signature");
            return None;
        }
        self.inner.get(&(signature.clone(), key.to_string())).await
    }

    /// Add entries computed under `signature`
    ///
    /// Fails without touching the cache when `signature` is not current.
    pub async fn merge<I>(&self, signature: &WorkbookSignature, entries: I) -> Result<usize, CacheError>
    where
        I: IntoIterator<Item = (String, V)>,
    {
        if !self.is_current(signature) {
            let expected = self.signature();
            tracing::debug!(cache = self.name, %signature, ?expected, "refusing merge under stale signature");
            return Err(CacheError::SignatureMismatch {
                expected,
                actual: signature.clone(),
            });
        }

        let mut merged = 0usize;
        for (key, value) in entries {
            self.inner.insert((signature.clone(), key), value).await;
            merged += 1;
        }
        Ok(merged)
    }

    /// Entry count after pending maintenance has run
    pub async fn entry_count(&self) -> u64 {
        self.inner.run_pending_tasks().await;
        self.inner.entry_count()
    }
}

impl<V> fmt::Debug for SignatureScopedCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignatureScopedCache")
            .field("name", &self.name)
            .field("signature", &*self.current.read())
            .finish_non_exhaustive()
    }
}

/// Key a defined name is cached under; sheet-scoped names are qualified
#[must_use]
pub fn defined_name_key(name: &DefinedName) -> String {
    match &name.sheet_id {
        Some(sheet) => format!("{sheet}!{}", name.name),
        None => name.name.clone(),
    }
}

/// The per-workbook caches invalidated on every transition
#[derive(Debug)]
pub struct WorkbookCaches {
    /// Defined names by (qualified) name
    pub defined_names: SignatureScopedCache<DefinedName>,
    /// Tables by name
    pub tables: SignatureScopedCache<TableInfo>,
}

impl WorkbookCaches {
    /// Create caches bounded to `max_capacity` entries each
    #[must_use]
    pub fn new(max_capacity: u64) -> Self {
        Self {
            defined_names: SignatureScopedCache::new("defined_names", max_capacity),
            tables: SignatureScopedCache::new("tables", max_capacity),
        }
    }

    /// Reset every cache to an empty seed under `signature`
    pub async fn reset_all(&self, signature: &WorkbookSignature) {
        self.defined_names.reset(signature.clone(), Vec::new()).await;
        self.tables.reset(signature.clone(), Vec::new()).await;
    }

    /// Signature the caches serve (they are always reset together)
    #[must_use]
    pub fn signature(&self) -> Option<WorkbookSignature> {
        self.defined_names.signature()
    }

    /// Merge listed names and tables computed under `signature`
    pub async fn populate(
        &self,
        signature: &WorkbookSignature,
        names: Vec<DefinedName>,
        tables: Vec<TableInfo>,
    ) -> Result<(usize, usize), CacheError> {
        let names = self
            .defined_names
            .merge(signature, names.into_iter().map(|n| (defined_name_key(&n), n)))
            .await?;
        let tables = self
            .tables
            .merge(signature, tables.into_iter().map(|t| (t.name.clone(), t)))
            .await?;
        Ok((names, tables))
    }
}

impl Default for WorkbookCaches {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(raw: &str) -> WorkbookSignature {
        WorkbookSignature::new(raw)
    }

    #[tokio::test]
    async fn unscoped_cache_serves_nothing() {
        let cache: SignatureScopedCache<u32> = SignatureScopedCache::new("t", 16);
        assert!(cache.get(&sig("a"), "k").await.is_none());
        assert!(matches!(
            cache.merge(&sig("a"), vec![("k".to_string(), 1)]).await,
            Err(CacheError::SignatureMismatch { expected: None, .. })
        ));
    }

    #[tokio::test]
    async fn reset_seeds_and_scopes() {
        let cache = SignatureScopedCache::new("t", 16);
        cache.reset(sig("a"), vec![("k".to_string(), 7u32)]).await;

        assert_eq!(cache.get(&sig("a"), "k").await, Some(7));
        assert_eq!(cache.get(&sig("b"), "k").await, None);
        assert_eq!(cache.signature(), Some(sig("a")));
    }

    #[tokio::test]
    async fn reset_drops_entries_of_previous_signature() {
        let cache = SignatureScopedCache::new("t", 16);
        cache.reset(sig("a"), vec![("k".to_string(), 1u32)]).await;
        cache.reset(sig("b"), Vec::new()).await;

        assert_eq!(cache.get(&sig("b"), "k").await, None);
        assert_eq!(cache.get(&sig("a"), "k").await, None);
    }

    #[tokio::test]
    async fn stale_merge_is_refused() {
        let cache = SignatureScopedCache::new("t", 16);
        cache.reset(sig("new"), Vec::new()).await;

        let err = cache
            .merge(&sig("old"), vec![("k".to_string(), 1u32)])
            .await
            .unwrap_err();
        assert_eq!(
            err,
            CacheError::SignatureMismatch {
                expected: Some(sig("new")),
                actual: sig("old"),
            }
        );
        assert_eq!(cache.entry_count().await, 0);
    }

    #[tokio::test]
    async fn workbook_caches_populate_and_reset_together() {
        let caches = WorkbookCaches::new(64);
        let a = sig("a");
        caches.reset_all(&a).await;

        let names = vec![
            DefinedName {
                name: "Rate".into(),
                refers_to: "Sheet1!$A$1".into(),
                sheet_id: None,
            },
            DefinedName {
                name: "Local".into(),
                refers_to: "Sheet1!$B$1".into(),
                sheet_id: Some("Sheet1".into()),
            },
        ];
        let counts = caches.populate(&a, names, Vec::new()).await.unwrap();
        assert_eq!(counts, (2, 0));
        assert!(caches.defined_names.get(&a, "Sheet1!Local").await.is_some());

        let b = sig("b");
        caches.reset_all(&b).await;
        assert_eq!(caches.signature(), Some(b.clone()));
        assert!(caches.defined_names.get(&b, "Rate").await.is_none());
        assert!(caches.populate(&a, Vec::new(), Vec::new()).await.is_err());
    }
}

//! Workbook-level types
//!
//! Descriptors are produced by the backend on open/new/save-as and are
//! superseded wholesale on every transition.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sheet identity within a workbook
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SheetInfo {
    /// Stable sheet id used by every cell command
    pub id: String,
    /// Display name
    pub name: String,
}

impl SheetInfo {
    /// Create sheet info
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Backend description of the loaded workbook
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkbookDescriptor {
    /// Path the workbook saves to, if any
    pub path: Option<String>,
    /// Path the workbook was imported from, if different from `path`
    pub origin_path: Option<String>,
    /// Sheets in display order
    pub sheets: Vec<SheetInfo>,
}

impl WorkbookDescriptor {
    /// Unsaved workbook with the given sheets
    #[inline]
    #[must_use]
    pub fn unsaved(sheets: Vec<SheetInfo>) -> Self {
        Self {
            path: None,
            origin_path: None,
            sheets,
        }
    }

    /// With a save path
    #[inline]
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// With an origin path
    #[inline]
    #[must_use]
    pub fn with_origin_path(mut self, path: impl Into<String>) -> Self {
        self.origin_path = Some(path.into());
        self
    }

    /// First durable location: `path`, else `origin_path`
    #[must_use]
    pub fn durable_path(&self) -> Option<&str> {
        non_empty(&self.path).or_else(|| non_empty(&self.origin_path))
    }

    /// Whether saving in place is possible without asking for a path
    #[inline]
    #[must_use]
    pub fn has_save_path(&self) -> bool {
        self.path.as_deref().is_some_and(|p| !p.is_empty())
    }

    /// Look up a sheet by id
    #[must_use]
    pub fn sheet(&self, id: &str) -> Option<&SheetInfo> {
        self.sheets.iter().find(|s| s.id == id)
    }
}

fn non_empty(path: &Option<String>) -> Option<&str> {
    path.as_deref().filter(|p| !p.is_empty())
}

/// Identity used to key auxiliary per-workbook state
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkbookId(String);

impl WorkbookId {
    /// Path-derived id of a saved workbook
    #[must_use]
    pub fn from_path(path: &str) -> Self {
        Self(format!("path:{path}"))
    }

    /// Fresh id for an unsaved workbook
    #[must_use]
    pub fn new_session() -> Self {
        Self(format!("session:{}", Uuid::new_v4()))
    }

    /// Id for a descriptor: path-derived when durable, session otherwise
    #[must_use]
    pub fn for_descriptor(descriptor: &WorkbookDescriptor) -> Self {
        match descriptor.durable_path() {
            Some(path) => Self::from_path(path),
            None => Self::new_session(),
        }
    }

    /// Raw id
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WorkbookId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque key scoping downstream caches to one loaded workbook instance
///
/// Never patched: every transition produces a new value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkbookSignature(String);

impl WorkbookSignature {
    /// Wrap a precomputed signature
    #[inline]
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Raw signature text
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WorkbookSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

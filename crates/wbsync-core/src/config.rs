//! Synchronization core configuration

use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use wbsync_cache::DEFAULT_CACHE_CAPACITY;
use wbsync_dispatch::MAX_RANGE_WRITE_AREA;

/// Tunables for batching, loading and caching
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Largest rectangle written with one range write
    pub max_range_write_area: u64,
    /// Rows per bulk-load read
    pub load_chunk_rows: u32,
    /// Columns per bulk-load read
    pub load_chunk_cols: u32,
    /// Entry bound of each signature-scoped cache
    pub cache_capacity: u64,
    /// Scheduler yields before every drain
    pub tick_yields: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_range_write_area: MAX_RANGE_WRITE_AREA,
            load_chunk_rows: 500,
            load_chunk_cols: 100,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            tick_yields: 1,
        }
    }
}

impl SyncConfig {
    /// Parse and validate TOML; missing keys take defaults
    pub fn from_toml_str(text: &str) -> SyncResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| SyncError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Check value ranges
    pub fn validate(&self) -> SyncResult<()> {
        if self.load_chunk_rows == 0 || self.load_chunk_cols == 0 {
            return Err(SyncError::Config(
                "load chunk dimensions must be positive".into(),
            ));
        }
        if self.max_range_write_area < 2 {
            return Err(SyncError::Config(format!(
                "max_range_write_area must be at least 2, got {}",
                self.max_range_write_area
            )));
        }
        Ok(())
    }

    /// With range write area bound
    #[must_use]
    pub fn with_max_range_write_area(mut self, area: u64) -> Self {
        self.max_range_write_area = area;
        self
    }

    /// With bulk-load chunk shape
    #[must_use]
    pub fn with_load_chunk(mut self, rows: u32, cols: u32) -> Self {
        self.load_chunk_rows = rows;
        self.load_chunk_cols = cols;
        self
    }

    /// With cache capacity
    #[must_use]
    pub fn with_cache_capacity(mut self, capacity: u64) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// With scheduler yields before drains
    #[must_use]
    pub fn with_tick_yields(mut self, ticks: u32) -> Self {
        self.tick_yields = ticks;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = SyncConfig::default();
        assert_eq!(config.max_range_write_area, 10_000);
        assert_eq!(config.load_chunk_rows, 500);
        assert_eq!(config.load_chunk_cols, 100);
        assert_eq!(config.tick_yields, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config = SyncConfig::from_toml_str("load_chunk_rows = 64\ntick_yields = 3\n").unwrap();
        assert_eq!(config.load_chunk_rows, 64);
        assert_eq!(config.tick_yields, 3);
        assert_eq!(config.load_chunk_cols, 100);
    }

    #[test]
    fn rejects_zero_chunks_and_tiny_area() {
        assert!(matches!(
            SyncConfig::from_toml_str("load_chunk_cols = 0"),
            Err(SyncError::Config(_))
        ));
        assert!(matches!(
            SyncConfig::default().with_max_range_write_area(1).validate(),
            Err(SyncError::Config(_))
        ));
    }

    #[test]
    fn malformed_toml_is_config_error() {
        assert!(matches!(
            SyncConfig::from_toml_str("load_chunk_rows = \"many\""),
            Err(SyncError::Config(_))
        ));
    }
}

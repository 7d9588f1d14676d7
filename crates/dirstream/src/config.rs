//! Engine configuration.
//!
//! Priority: environment variables > settings file > defaults. The numbers here are
//! tuned for interactive browsing; none of them is load-bearing for correctness.

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::file_system::listing::EnumeratorKind;
use crate::file_system::listing::hydration::{DEFAULT_HYDRATION_WORKERS, MAX_HYDRATION_WORKERS};

/// Tunables for enumeration, hydration, caching and the volume monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListingConfig {
    /// Entries in the first page of a large directory.
    pub page_size: usize,
    /// Directories with at most this many entries are hydrated inline and sent whole.
    pub inline_hydration_threshold: usize,
    /// Entries per background hydration batch.
    pub hydration_batch_size: usize,
    pub hydration_workers: usize,
    pub warm_ttl_ms: u64,
    pub cold_ttl_ms: u64,
    pub recency_window_ms: u64,
    pub max_cached_directories: usize,
    pub max_cache_bytes: usize,
    pub max_entries_per_cached_directory: usize,
    pub sweep_interval_ms: u64,
    pub volume_poll_interval_ms: u64,
    pub loading_indicator_delay_ms: u64,
    pub include_hidden: bool,
    pub enumerator: EnumeratorKind,
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            inline_hydration_threshold: 100,
            hydration_batch_size: 50,
            hydration_workers: DEFAULT_HYDRATION_WORKERS,
            warm_ttl_ms: 30_000,
            cold_ttl_ms: 5_000,
            recency_window_ms: 120_000,
            max_cached_directories: 256,
            max_cache_bytes: 64 * 1024 * 1024,
            max_entries_per_cached_directory: 50_000,
            sweep_interval_ms: 15_000,
            volume_poll_interval_ms: 30_000,
            loading_indicator_delay_ms: 50,
            include_hidden: true,
            enumerator: EnumeratorKind::Auto,
        }
    }
}

impl ListingConfig {
    /// Loads configuration: defaults, overlaid by `settings_file` if it exists and
    /// parses, overlaid by `DIRSTREAM_*` environment variables.
    pub fn load(settings_file: Option<&Path>) -> Self {
        let base = settings_file.map(Self::from_file).unwrap_or_default();
        base.with_env_overrides().validate()
    }

    /// Reads a JSON settings file. Returns defaults if it's missing or invalid.
    pub fn from_file(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => config,
                Err(e) => {
                    log::warn!("Ignoring invalid settings file {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                log::debug!("No settings file at {} ({}), using defaults", path.display(), e);
                Self::default()
            }
        }
    }

    /// Applies `DIRSTREAM_PAGE_SIZE`, `DIRSTREAM_HYDRATION_WORKERS`,
    /// `DIRSTREAM_INCLUDE_HIDDEN` and `DIRSTREAM_ENUMERATOR`. Unparsable values are
    /// logged and ignored.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(v) = lookup("DIRSTREAM_PAGE_SIZE") {
            match v.parse() {
                Ok(n) => self.page_size = n,
                Err(_) => log::warn!("Ignoring DIRSTREAM_PAGE_SIZE={}", v),
            }
        }
        if let Some(v) = lookup("DIRSTREAM_HYDRATION_WORKERS") {
            match v.parse() {
                Ok(n) => self.hydration_workers = n,
                Err(_) => log::warn!("Ignoring DIRSTREAM_HYDRATION_WORKERS={}", v),
            }
        }
        if let Some(v) = lookup("DIRSTREAM_INCLUDE_HIDDEN") {
            self.include_hidden = v == "true" || v == "1";
        }
        if let Some(v) = lookup("DIRSTREAM_ENUMERATOR") {
            match v.parse() {
                Ok(kind) => self.enumerator = kind,
                Err(e) => log::warn!("Ignoring DIRSTREAM_ENUMERATOR: {}", e),
            }
        }
        self
    }

    /// Clamps values into workable ranges.
    pub fn validate(mut self) -> Self {
        self.page_size = self.page_size.max(1);
        self.hydration_batch_size = self.hydration_batch_size.max(1);
        self.hydration_workers = self.hydration_workers.clamp(1, MAX_HYDRATION_WORKERS);
        self.cold_ttl_ms = self.cold_ttl_ms.min(self.warm_ttl_ms);
        self.sweep_interval_ms = self.sweep_interval_ms.max(100);
        self.volume_poll_interval_ms = self.volume_poll_interval_ms.max(1_000);
        self
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn volume_poll_interval(&self) -> Duration {
        Duration::from_millis(self.volume_poll_interval_ms)
    }

    pub fn loading_indicator_delay(&self) -> Duration {
        Duration::from_millis(self.loading_indicator_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = ListingConfig::default();
        assert_eq!(config.page_size, 100);
        assert_eq!(config.warm_ttl_ms, 30_000);
        assert_eq!(config.cold_ttl_ms, 5_000);
        assert_eq!(config.recency_window_ms, 120_000);
        assert!(config.include_hidden);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"pageSize": 25, "enumerator": "portable"}"#).unwrap();

        let config = ListingConfig::from_file(&path);
        assert_eq!(config.page_size, 25);
        assert_eq!(config.enumerator, EnumeratorKind::Portable);
        assert_eq!(config.hydration_batch_size, 50);
    }

    #[test]
    fn test_invalid_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "not json").unwrap();
        assert_eq!(ListingConfig::from_file(&path), ListingConfig::default());
        assert_eq!(ListingConfig::from_file(&dir.path().join("missing.json")), ListingConfig::default());
    }

    #[test]
    fn test_overrides_win_over_file_values() {
        let vars: HashMap<&str, &str> = [
            ("DIRSTREAM_PAGE_SIZE", "10"),
            ("DIRSTREAM_INCLUDE_HIDDEN", "0"),
            ("DIRSTREAM_ENUMERATOR", "bogus"),
        ]
        .into_iter()
        .collect();
        let config = ListingConfig {
            page_size: 500,
            ..ListingConfig::default()
        }
        .with_overrides(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.page_size, 10);
        assert!(!config.include_hidden);
        assert_eq!(config.enumerator, EnumeratorKind::Auto);
    }

    #[test]
    fn test_validate_clamps() {
        let config = ListingConfig {
            page_size: 0,
            hydration_workers: 64,
            cold_ttl_ms: 90_000,
            ..ListingConfig::default()
        }
        .validate();
        assert_eq!(config.page_size, 1);
        assert_eq!(config.hydration_workers, MAX_HYDRATION_WORKERS);
        assert_eq!(config.cold_ttl_ms, config.warm_ttl_ms);
    }
}

//! Storage and search configuration trees (spec §6), validated the way the
//! teacher's `cache::CacheConfig::validate` validates its own settings.

use crate::error::{Result, StorageError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    pub connect_ms: u64,
    pub read_ms: u64,
    pub write_ms: u64,
    pub operation_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: 5_000,
            read_ms: 10_000,
            write_ms: 15_000,
            operation_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub endpoint: String,
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(rename = "type")]
    pub backend_type: String,
    pub enabled: bool,
    pub priority: u32,
    pub connection: ConnectionConfig,
    pub retry: Option<RetryConfig>,
    pub timeouts: Option<TimeoutConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    pub timeout_ms: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 30_000,
            timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DistributionConfig {
    pub strategy: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PerformanceConfig {
    pub max_concurrent_operations: Option<u32>,
    pub max_concurrent_per_backend: Option<u32>,
    pub cache: Option<serde_json::Value>,
    pub batch: Option<serde_json::Value>,
    pub compression: Option<serde_json::Value>,
}

/// Top-level storage configuration (spec §6 "Storage configuration").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub default_backend: String,
    pub backends: HashMap<String, BackendConfig>,
    #[serde(default)]
    pub distribution: DistributionConfig,
    #[serde(default)]
    pub health_check: HealthCheckConfig,
    #[serde(default)]
    pub performance: PerformanceConfig,
}

impl StorageConfig {
    /// Spec §6 validation rules, §8 invariant: `validate(C)` accepts C iff
    /// `default_backend` is an enabled backend, `health.timeout < health.interval`,
    /// and every configured retry multiplier is ≥ 1.
    pub fn validate(&self) -> Result<()> {
        let default_backend = self.backends.get(&self.default_backend).ok_or_else(|| {
            StorageError::Configuration(format!("default_backend '{}' is not declared in backends", self.default_backend))
        })?;

        if !default_backend.enabled {
            return Err(StorageError::Configuration(format!(
                "default_backend '{}' is declared but not enabled",
                self.default_backend
            )));
        }

        if !self.backends.values().any(|b| b.enabled) {
            return Err(StorageError::Configuration("at least one backend must be enabled".to_string()));
        }

        if self.distribution.strategy != "single" {
            return Err(StorageError::Configuration(format!(
                "unsupported distribution strategy '{}': only 'single' is defined",
                self.distribution.strategy
            )));
        }

        if self.health_check.enabled && self.health_check.timeout_ms >= self.health_check.interval_ms {
            return Err(StorageError::Configuration(
                "health_check.timeout must be strictly less than health_check.interval".to_string(),
            ));
        }

        for (name, backend) in &self.backends {
            if let Some(retry) = &backend.retry {
                if retry.multiplier < 1.0 {
                    return Err(StorageError::Configuration(format!(
                        "backend '{}' retry.multiplier must be >= 1.0",
                        name
                    )));
                }
            }

            if let Some(timeouts) = &backend.timeouts {
                if timeouts.connect_ms == 0 && timeouts.read_ms == 0 && timeouts.write_ms == 0 && timeouts.operation_ms == 0 {
                    return Err(StorageError::Configuration(format!("backend '{}' declares all-zero timeouts", name)));
                }
            }
        }

        Ok(())
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check.interval_ms)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check.timeout_ms)
    }
}

/// Search/indexing configuration (spec §6 "Search configuration").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub index_path: String,
    pub workers: usize,
    pub batch_size: usize,
    pub content_preview: usize,
    pub supported_types: Vec<String>,
    pub max_file_size: u64,
    pub default_results: usize,
    pub max_results: usize,
    pub cache_size: usize,
    pub cache_ttl_ms: u64,
    pub optimize_interval_ms: u64,
}

/// Mirrors the teacher's `default_search_config`-style constant bundle
/// (spec §6, documented further in spec.md §8 scenarios).
pub fn default_search_config() -> SearchConfig {
    SearchConfig {
        index_path: "./noisefs-index".to_string(),
        workers: 4,
        batch_size: 50,
        content_preview: 256,
        supported_types: vec![
            "txt".to_string(),
            "md".to_string(),
            "json".to_string(),
            "pdf".to_string(),
        ],
        max_file_size: 50 * 1024 * 1024,
        default_results: 10,
        max_results: 100,
        cache_size: 1_000,
        cache_ttl_ms: 300_000,
        optimize_interval_ms: 3_600_000,
    }
}

impl SearchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(StorageError::Configuration("search workers must be >= 1".to_string()));
        }
        if self.batch_size == 0 {
            return Err(StorageError::Configuration("search batch_size must be >= 1".to_string()));
        }
        if self.default_results > self.max_results {
            return Err(StorageError::Configuration("default_results must not exceed max_results".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_backend(enabled: bool) -> BackendConfig {
        BackendConfig {
            backend_type: "mock".to_string(),
            enabled,
            priority: 100,
            connection: ConnectionConfig {
                endpoint: "mem://mock".to_string(),
                connect_timeout_ms: 1000,
            },
            retry: Some(RetryConfig::default()),
            timeouts: Some(TimeoutConfig::default()),
        }
    }

    fn valid_config() -> StorageConfig {
        let mut backends = HashMap::new();
        backends.insert("mock1".to_string(), sample_backend(true));
        StorageConfig {
            default_backend: "mock1".to_string(),
            backends,
            distribution: DistributionConfig { strategy: "single".to_string() },
            health_check: HealthCheckConfig::default(),
            performance: PerformanceConfig::default(),
        }
    }

    #[test]
    fn accepts_well_formed_config() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn rejects_missing_default_backend() {
        let mut cfg = valid_config();
        cfg.default_backend = "ghost".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_disabled_default_backend() {
        let mut cfg = valid_config();
        cfg.backends.insert("mock1".to_string(), sample_backend(false));
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_health_timeout_not_less_than_interval() {
        let mut cfg = valid_config();
        cfg.health_check.timeout_ms = cfg.health_check.interval_ms;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_unrecognized_distribution_strategy() {
        let mut cfg = valid_config();
        cfg.distribution.strategy = "multi".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_retry_multiplier_below_one() {
        let mut cfg = valid_config();
        let mut backend = sample_backend(true);
        backend.retry = Some(RetryConfig { multiplier: 0.5, ..RetryConfig::default() });
        cfg.backends.insert("mock1".to_string(), backend);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn search_config_rejects_default_results_above_max() {
        let mut cfg = default_search_config();
        cfg.default_results = cfg.max_results + 1;
        assert!(cfg.validate().is_err());
    }
}

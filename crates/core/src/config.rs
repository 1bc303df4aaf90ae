use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_usize(key: &str, default: usize) -> usize {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match env_opt(key).as_deref().map(str::to_ascii_lowercase).as_deref() {
        Some("1") | Some("true") | Some("yes") | Some("on") => true,
        Some("0") | Some("false") | Some("no") | Some("off") => false,
        _ => default,
    }
}

/// Engine configuration, typically parsed from TOML or the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Work-stealing pool size. 0 = available parallelism.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    /// Dedicated priority pool size. 0 = available parallelism.
    #[serde(default = "default_scheduler_threads")]
    pub scheduler_threads: usize,
    /// Leaf size below which the splitter stops forking. 0 = automatic.
    #[serde(default = "default_split_threshold")]
    pub split_threshold: usize,
    /// Launcher poll-join interval in milliseconds.
    #[serde(default = "default_join_poll")]
    pub join_poll_interval_ms: u64,
    /// Per-future poll in `schedule_and_wait_for_results`, in milliseconds.
    #[serde(default = "default_future_poll")]
    pub future_poll_interval_ms: u64,
    /// Cancel the whole job when a scheduler worker cannot get the read permit.
    #[serde(default)]
    pub fail_fast_on_acquire_read: bool,
    /// How often idle queue workers re-check cancellation, in milliseconds.
    #[serde(default = "default_queue_poll")]
    pub queue_poll_interval_ms: u64,
}

fn default_parallelism() -> usize {
    0
}
fn default_scheduler_threads() -> usize {
    0
}
fn default_split_threshold() -> usize {
    0
}
fn default_join_poll() -> u64 {
    10
}
fn default_future_poll() -> u64 {
    10
}
fn default_queue_poll() -> u64 {
    50
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            scheduler_threads: default_scheduler_threads(),
            split_threshold: default_split_threshold(),
            join_poll_interval_ms: default_join_poll(),
            future_poll_interval_ms: default_future_poll(),
            fail_fast_on_acquire_read: false,
            queue_poll_interval_ms: default_queue_poll(),
        }
    }
}

impl EngineConfig {
    /// Build config from `STRAND_*` environment variables, loading `.env`
    /// first. Unset or unparsable keys fall back to defaults.
    pub fn from_env() -> Self {
        load_dotenv();
        let d = Self::default();
        Self {
            parallelism: env_usize("STRAND_PARALLELISM", d.parallelism),
            scheduler_threads: env_usize("STRAND_SCHEDULER_THREADS", d.scheduler_threads),
            split_threshold: env_usize("STRAND_SPLIT_THRESHOLD", d.split_threshold),
            join_poll_interval_ms: env_u64("STRAND_JOIN_POLL_MS", d.join_poll_interval_ms),
            future_poll_interval_ms: env_u64("STRAND_FUTURE_POLL_MS", d.future_poll_interval_ms),
            fail_fast_on_acquire_read: env_bool(
                "STRAND_FAIL_FAST_READ",
                d.fail_fast_on_acquire_read,
            ),
            queue_poll_interval_ms: env_u64("STRAND_QUEUE_POLL_MS", d.queue_poll_interval_ms),
        }
    }

    /// Parse and validate a TOML document. Missing keys take defaults.
    pub fn from_toml_str(source: &str) -> Result<Self, EngineError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.join_poll_interval_ms == 0 {
            return Err(EngineError::InvalidConfig("join_poll_interval_ms must be > 0".into()));
        }
        if self.future_poll_interval_ms == 0 {
            return Err(EngineError::InvalidConfig("future_poll_interval_ms must be > 0".into()));
        }
        if self.queue_poll_interval_ms == 0 {
            return Err(EngineError::InvalidConfig("queue_poll_interval_ms must be > 0".into()));
        }
        Ok(())
    }

    /// Resolve the work-stealing pool size (0 means available parallelism).
    pub fn resolved_parallelism(&self) -> usize {
        resolve_threads(self.parallelism)
    }

    /// Resolve the dedicated scheduler pool size.
    pub fn resolved_scheduler_threads(&self) -> usize {
        resolve_threads(self.scheduler_threads)
    }

    /// Leaf size for a sequence of `len` items on `parallelism` workers.
    pub fn split_threshold_for(&self, len: usize, parallelism: usize) -> usize {
        if self.split_threshold > 0 {
            self.split_threshold
        } else {
            (len / (4 * parallelism.max(1))).max(1)
        }
    }

    pub fn join_poll_interval(&self) -> Duration {
        Duration::from_millis(self.join_poll_interval_ms)
    }

    pub fn future_poll_interval(&self) -> Duration {
        Duration::from_millis(self.future_poll_interval_ms)
    }

    pub fn queue_poll_interval(&self) -> Duration {
        Duration::from_millis(self.queue_poll_interval_ms)
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Engine config:");
        tracing::info!("  pool:        parallelism={}", self.resolved_parallelism());
        tracing::info!(
            "  scheduler:   threads={}, fail_fast_read={}",
            self.resolved_scheduler_threads(),
            self.fail_fast_on_acquire_read
        );
        let threshold = if self.split_threshold == 0 {
            "auto".to_string()
        } else {
            self.split_threshold.to_string()
        };
        tracing::info!("  splitter:    threshold={}", threshold);
        tracing::info!(
            "  polling:     join={}ms, future={}ms, queue={}ms",
            self.join_poll_interval_ms,
            self.future_poll_interval_ms,
            self.queue_poll_interval_ms
        );
    }
}

fn resolve_threads(configured: usize) -> usize {
    if configured == 0 {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    } else {
        configured
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.parallelism, 0);
        assert_eq!(config.scheduler_threads, 0);
        assert_eq!(config.split_threshold, 0);
        assert_eq!(config.join_poll_interval_ms, 10);
        assert_eq!(config.future_poll_interval_ms, 10);
        assert_eq!(config.queue_poll_interval_ms, 50);
        assert!(!config.fail_fast_on_acquire_read);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn resolved_parallelism() {
        let mut config = EngineConfig::default();
        // 0 means auto-detect
        assert!(config.resolved_parallelism() > 0);

        config.parallelism = 8;
        assert_eq!(config.resolved_parallelism(), 8);
    }

    #[test]
    fn split_threshold_auto_and_fixed() {
        let mut config = EngineConfig::default();
        assert_eq!(config.split_threshold_for(1000, 4), 62);
        assert_eq!(config.split_threshold_for(3, 8), 1);

        config.split_threshold = 16;
        assert_eq!(config.split_threshold_for(1000, 4), 16);
    }

    #[test]
    fn parses_partial_toml() {
        let config = EngineConfig::from_toml_str(
            r#"
            parallelism = 6
            fail_fast_on_acquire_read = true
            "#,
        )
        .unwrap();
        assert_eq!(config.parallelism, 6);
        assert!(config.fail_fast_on_acquire_read);
        assert_eq!(config.join_poll_interval_ms, 10);
    }

    #[test]
    fn rejects_zero_poll_interval() {
        let err = EngineConfig::from_toml_str("join_poll_interval_ms = 0").unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig(_)));
    }

    #[test]
    fn rejects_malformed_toml() {
        let err = EngineConfig::from_toml_str("parallelism = \"many\"").unwrap_err();
        assert!(matches!(err, EngineError::ConfigParse(_)));
    }
}

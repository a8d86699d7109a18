// Monitor configuration
//
// Thresholds for task tracing, overheat eviction and concurrency limits,
// loadable from a TOML file. Every field has a default, so a partial file
// (or none at all) is fine.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// What to do when a should-never-happen inconsistency shows up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssertionLevel {
    /// Fail the operation with an error (tests, CI)
    Strict,
    /// Log a warning and degrade (production)
    #[default]
    Lenient,
}

/// Configuration for the task monitor and stat ledgers
///
/// # Example
/// ```
/// use jiffies_ledger::config::MonitorConfig;
///
/// let config = MonitorConfig::from_toml_str("overheat_count = 500").unwrap();
/// assert_eq!(config.overheat_count, 500);
/// assert_eq!(config.concurrent_limit, 50);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Stamp/delta list length that triggers cooling
    ///
    /// The task monitor never goes below 200 regardless of this value.
    pub overheat_count: usize,

    /// Simultaneous in-flight tasks under one name before reporting
    pub concurrent_limit: usize,

    /// Enable per-name concurrency bookkeeping
    pub trace_concurrency: bool,

    /// Take jiffies from the thread CPU clock instead of `/proc`
    pub use_thread_clock: bool,

    /// Keep every finished task regardless of duration and rate
    pub trace_all: bool,

    /// Tasks shorter than this are not reported
    pub min_trace_duration_ms: i64,

    /// Tasks burning less than this many jiffies per minute are not reported
    pub min_jiffies_per_minute: i64,

    /// Debounce delay before cooling runs
    pub cooling_delay_ms: u64,

    /// Default ratio window for app/device stat snapshots, 0 = whole history
    pub window_millis: i64,

    /// Held wake locks are reported once per this period until released
    pub wake_lock_timeout_ms: u64,

    pub assertion_level: AssertionLevel,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            overheat_count: 200,
            concurrent_limit: 50,
            trace_concurrency: false,
            use_thread_clock: false,
            trace_all: false,
            min_trace_duration_ms: 1000,
            min_jiffies_per_minute: 100,
            cooling_delay_ms: 1000,
            window_millis: 0,
            wake_lock_timeout_ms: 2 * 60 * 1000,
            assertion_level: AssertionLevel::Lenient,
        }
    }
}

impl MonitorConfig {
    /// Development preset: trace every task and fail loudly on inconsistencies
    pub fn debug() -> Self {
        Self {
            trace_all: true,
            trace_concurrency: true,
            assertion_level: AssertionLevel::Strict,
            ..Self::default()
        }
    }

    /// Load configuration from a TOML file
    ///
    /// ```no_run
    /// use jiffies_ledger::config::MonitorConfig;
    ///
    /// # fn main() -> anyhow::Result<()> {
    /// let config = MonitorConfig::load("ledger.toml")?;
    /// println!("overheat at {}", config.overheat_count);
    /// # Ok(())
    /// # }
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Invalid configuration in {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Failed to parse TOML")?;
        config.validate().map_err(anyhow::Error::msg)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.overheat_count < 3 {
            return Err(format!(
                "overheat_count must be >= 3 for halving to shrink lists, got {}",
                self.overheat_count
            ));
        }

        if self.concurrent_limit == 0 {
            return Err("concurrent_limit must be positive".to_string());
        }

        if self.min_trace_duration_ms < 0 || self.min_jiffies_per_minute < 0 {
            return Err(format!(
                "trace thresholds must be non-negative, got {}ms / {} jiffies",
                self.min_trace_duration_ms, self.min_jiffies_per_minute
            ));
        }

        if self.wake_lock_timeout_ms == 0 {
            return Err("wake_lock_timeout_ms must be positive".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = MonitorConfig::default();
        assert_eq!(config.overheat_count, 200);
        assert_eq!(config.concurrent_limit, 50);
        assert_eq!(config.cooling_delay_ms, 1000);
        assert_eq!(config.min_trace_duration_ms, 1000);
        assert_eq!(config.min_jiffies_per_minute, 100);
        assert_eq!(config.wake_lock_timeout_ms, 120_000);
        assert!(!config.trace_all);
        assert_eq!(config.assertion_level, AssertionLevel::Lenient);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_debug_preset() {
        let config = MonitorConfig::debug();
        assert!(config.trace_all);
        assert_eq!(config.assertion_level, AssertionLevel::Strict);
        assert_eq!(config.overheat_count, 200);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = MonitorConfig::from_toml_str(
            r#"
            trace_all = true
            assertion_level = "strict"
            window_millis = 60000
            "#,
        )
        .unwrap();
        assert!(config.trace_all);
        assert_eq!(config.assertion_level, AssertionLevel::Strict);
        assert_eq!(config.window_millis, 60_000);
        assert_eq!(config.overheat_count, 200);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(MonitorConfig::from_toml_str("overheat_count = 1").is_err());
        assert!(MonitorConfig::from_toml_str("concurrent_limit = 0").is_err());
        assert!(MonitorConfig::from_toml_str("wake_lock_timeout_ms = 0").is_err());
        assert!(MonitorConfig::from_toml_str("assertion_level = \"loud\"").is_err());
        assert!(MonitorConfig::from_toml_str("overheat_count = \"many\"").is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = MonitorConfig::debug();
        let text = config.to_toml_string().unwrap();
        assert_eq!(MonitorConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "concurrent_limit = 8").unwrap();
        let config = MonitorConfig::load(file.path()).unwrap();
        assert_eq!(config.concurrent_limit, 8);

        let err = MonitorConfig::load("/nonexistent/ledger.toml").unwrap_err();
        assert!(err.to_string().contains("Failed to read"));
    }
}

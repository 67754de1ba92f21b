//! Sandbox settings.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Settings shared by every invocation the process sandbox runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Parent of the per-invocation scratch directories
    pub work_dir: PathBuf,
    /// Combined stdout/stderr kept per invocation
    pub max_log_bytes: usize,
    /// Largest accepted result envelope
    pub max_output_bytes: usize,
    /// How often the memory watchdog samples the child
    pub memory_poll_interval_ms: u64,
    /// RLIMIT_NOFILE for the child
    pub max_open_files: u64,
    /// RLIMIT_FSIZE for the child, in MiB
    pub max_file_size_mb: u64,
    /// RLIMIT_NPROC for the child; 0 leaves it unset
    pub max_processes: u64,
    /// Fail invocations instead of running without the seccomp filter
    pub require_hardening: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            work_dir: std::env::temp_dir().join("fnbox").join("sandboxes"),
            max_log_bytes: 64 * 1024,
            max_output_bytes: 6 * 1024 * 1024,
            memory_poll_interval_ms: 25,
            max_open_files: 256,
            max_file_size_mb: 64,
            max_processes: 0,
            require_hardening: false,
        }
    }
}

impl SandboxConfig {
    /// Returns the watchdog sampling interval.
    #[must_use]
    pub fn memory_poll_interval(&self) -> Duration {
        Duration::from_millis(self.memory_poll_interval_ms.max(1))
    }

    /// Sets the scratch directory root.
    #[must_use]
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }

    /// Sets the log capture limit.
    #[must_use]
    pub fn with_max_log_bytes(mut self, bytes: usize) -> Self {
        self.max_log_bytes = bytes;
        self
    }

    /// Sets the result envelope limit.
    #[must_use]
    pub fn with_max_output_bytes(mut self, bytes: usize) -> Self {
        self.max_output_bytes = bytes;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SandboxConfig::default();
        assert_eq!(config.max_log_bytes, 65_536);
        assert_eq!(config.max_output_bytes, 6_291_456);
        assert_eq!(config.memory_poll_interval(), Duration::from_millis(25));
        assert!(!config.require_hardening);
        assert!(config.work_dir.ends_with("fnbox/sandboxes"));
    }

    #[test]
    fn zero_poll_interval_is_clamped() {
        let config = SandboxConfig {
            memory_poll_interval_ms: 0,
            ..SandboxConfig::default()
        };
        assert_eq!(config.memory_poll_interval(), Duration::from_millis(1));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: SandboxConfig = toml::from_str("max_log_bytes = 10").unwrap();
        assert_eq!(config.max_log_bytes, 10);
        assert_eq!(config.max_open_files, 256);
    }
}

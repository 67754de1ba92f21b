//! Configuration file loading.
//!
//! Loads fnbox configuration from TOML files at XDG-compliant locations.

use crate::config::types::PlatformConfig;
use crate::error::PlatformError;
use std::path::{Path, PathBuf};

/// Default configuration file name for project-local config.
const LOCAL_CONFIG_NAME: &str = "fnbox.toml";

/// Default configuration file name within XDG config directory.
const XDG_CONFIG_NAME: &str = "config.toml";

/// Application name for XDG directory lookup.
const APP_NAME: &str = "fnbox";

/// Loads configuration from the default search paths.
///
/// Search order:
/// 1. `./fnbox.toml` (project-local)
/// 2. `~/.config/fnbox/config.toml` (XDG config)
///
/// Returns the default configuration if no config file is found.
///
/// # Errors
///
/// Returns an error if a config file exists but cannot be parsed.
pub fn load() -> Result<PlatformConfig, PlatformError> {
    for path in search_paths() {
        if path.exists() {
            return from_path(&path);
        }
    }
    Ok(PlatformConfig::default())
}

/// Loads configuration from a specific file path.
///
/// # Errors
///
/// Returns an error if:
/// - The file cannot be read
/// - The file contains invalid TOML
/// - The TOML doesn't match the expected schema
pub fn from_path(path: &Path) -> Result<PlatformConfig, PlatformError> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        PlatformError::configuration(
            "config_file",
            format!("failed to read '{}': {}", path.display(), e),
        )
    })?;

    from_str(&contents).map_err(|e| {
        PlatformError::configuration(
            "config_file",
            format!("failed to parse '{}': {}", path.display(), e),
        )
    })
}

/// Parses configuration from a TOML string.
///
/// # Errors
///
/// Returns an error if the TOML is invalid or doesn't match the schema.
///
/// # Example
///
/// ```rust
/// let config = fnbox::config::from_str("[concurrency]\nglobal_limit = 4\n").unwrap();
/// assert_eq!(config.concurrency.global_limit, 4);
/// ```
pub fn from_str(toml_str: &str) -> Result<PlatformConfig, PlatformError> {
    toml::from_str(toml_str)
        .map_err(|e| PlatformError::configuration("config", format!("invalid TOML: {e}")))
}

/// Returns the paths that would be searched for configuration files.
#[must_use]
pub fn search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(LOCAL_CONFIG_NAME)];

    if let Some(config_dir) = xdg_config_dir() {
        paths.push(config_dir.join(XDG_CONFIG_NAME));
    }

    paths
}

/// Returns the path to the XDG config directory for fnbox.
///
/// This is `~/.config/fnbox` on most systems.
#[must_use]
pub fn xdg_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join(APP_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogLevel;
    use crate::types::RuntimeId;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn from_str_accepts_empty_document() {
        let config = from_str("").unwrap();
        assert_eq!(config, PlatformConfig::default());
    }

    #[test]
    fn from_str_parses_every_section() {
        let toml = r#"
[limits]
min_memory_mb = 64
max_memory_mb = 2048

[billing]
granularity_ms = 1

[concurrency]
global_limit = 32
per_function_limit = 0
acquire_timeout_ms = 500

[dispatch]
queue_capacity = 16
workers = 2

[sandbox]
work_dir = "/var/lib/fnbox/sandboxes"
max_log_bytes = 1024
require_hardening = true

[build]
build_timeout_ms = 60000

[logging]
enabled = false
level = "debug"

[runtimes.node20]
toolchain = "/opt/node/bin/node"
timeout_ms = 5000
        "#;

        let config = from_str(toml).unwrap();

        assert_eq!(config.limits.min_memory_mb, 64);
        assert_eq!(config.limits.max_timeout_ms, 300_000);
        assert_eq!(config.billing.granularity_ms, 1);
        assert_eq!(config.concurrency.per_function_limit, 0);
        assert_eq!(config.dispatch.workers, 2);
        assert!(config.sandbox.require_hardening);
        assert_eq!(config.sandbox.max_output_bytes, 6 * 1024 * 1024);
        assert_eq!(config.build.build_timeout_ms, 60_000);
        assert!(!config.logging.enabled);
        assert_eq!(config.logging.level, LogLevel::Debug);

        let node = &config.runtimes[&RuntimeId::parse("node20").unwrap()];
        assert_eq!(node.toolchain.as_deref(), Some(Path::new("/opt/node/bin/node")));
        assert_eq!(node.timeout_ms, Some(5000));
        assert_eq!(node.memory_mb, None);
    }

    #[test]
    fn from_str_error_on_invalid_toml() {
        let err = from_str("this is not valid toml [[[").unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn from_str_error_on_invalid_runtime_id() {
        let err = from_str("[runtimes.\"Not Valid\"]\ntimeout_ms = 5\n").unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn from_path_reads_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "[dispatch]\nworkers = 3").unwrap();

        let config = from_path(&config_path).unwrap();

        assert_eq!(config.dispatch.workers, 3);
    }

    #[test]
    fn from_path_error_on_missing_file() {
        let err = from_path(Path::new("/nonexistent/path/config.toml")).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("failed to read"));
    }

    #[test]
    fn search_paths_includes_local() {
        let paths = search_paths();

        assert!(paths
            .iter()
            .any(|p| p.file_name() == Some(std::ffi::OsStr::new(LOCAL_CONFIG_NAME))));
    }

    #[test]
    fn xdg_config_dir_returns_path() {
        if let Some(dir) = xdg_config_dir() {
            assert!(dir.ends_with(APP_NAME));
        }
    }
}

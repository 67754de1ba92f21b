//! Configuration management for fnbox.
//!
//! # Configuration File Format
//!
//! Configuration is stored in TOML format. The search order is:
//! 1. `./fnbox.toml` (project-local)
//! 2. `~/.config/fnbox/config.toml` (XDG config)
//!
//! # Example Configuration
//!
//! ```toml
//! [limits]
//! min_memory_mb = 128
//! max_memory_mb = 1024
//! min_timeout_ms = 1000
//! max_timeout_ms = 300000
//!
//! [billing]
//! granularity_ms = 100
//!
//! [concurrency]
//! global_limit = 16
//! per_function_limit = 4
//! acquire_timeout_ms = 10000
//!
//! [dispatch]
//! queue_capacity = 256
//! workers = 8
//! retained_records = 10000
//!
//! [sandbox]
//! max_log_bytes = 65536
//! require_hardening = false
//!
//! [runtimes.python311]
//! toolchain = "/usr/bin/python3.11"
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use fnbox::config;
//!
//! let config = config::load()?;
//! config.validate()?;
//! ```

mod file;
mod types;

pub use file::{from_path, from_str, load, search_paths, xdg_config_dir};
pub use types::PlatformConfig;

//! Configuration types.
//!
//! Every section defaults independently, so an empty file (or no file) is a
//! valid configuration.

use crate::build::BuildConfig;
use crate::error::PlatformError;
use crate::function::ResourceBounds;
use crate::invocation::{BillingPolicy, DispatchConfig, OrchestratorSettings};
use crate::limiter::LimiterConfig;
use crate::logging::LoggingConfig;
use crate::runtime::RuntimeOverride;
use crate::sandbox::SandboxConfig;
use crate::types::RuntimeId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Root configuration structure for fnbox.
///
/// Maps directly to the TOML file format:
///
/// ```toml
/// [limits]
/// max_memory_mb = 2048
///
/// [concurrency]
/// global_limit = 32
///
/// [runtimes.node20]
/// toolchain = "/usr/local/bin/node"
/// timeout_ms = 5000
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// Platform-wide absolute resource bounds
    pub limits: ResourceBounds,
    /// Billing granularity
    pub billing: BillingPolicy,
    /// Concurrency ceilings
    pub concurrency: LimiterConfig,
    /// Async queue and workers
    pub dispatch: DispatchConfig,
    /// Sandbox executor settings
    pub sandbox: SandboxConfig,
    /// Build service settings
    pub build: BuildConfig,
    /// Host logging
    pub logging: LoggingConfig,
    /// Per-runtime overrides keyed by runtime id
    pub runtimes: BTreeMap<RuntimeId, RuntimeOverride>,
}

impl PlatformConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the resource bounds.
    #[must_use]
    pub fn with_limits(mut self, limits: ResourceBounds) -> Self {
        self.limits = limits;
        self
    }

    /// Replaces the concurrency settings.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: LimiterConfig) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Replaces the dispatch settings.
    #[must_use]
    pub fn with_dispatch(mut self, dispatch: DispatchConfig) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// Replaces the sandbox settings.
    #[must_use]
    pub fn with_sandbox(mut self, sandbox: SandboxConfig) -> Self {
        self.sandbox = sandbox;
        self
    }

    /// Replaces the build settings.
    #[must_use]
    pub fn with_build(mut self, build: BuildConfig) -> Self {
        self.build = build;
        self
    }

    /// Replaces the logging settings.
    #[must_use]
    pub fn with_logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = logging;
        self
    }

    /// Adds an override for a runtime.
    #[must_use]
    pub fn with_runtime_override(mut self, runtime: RuntimeId, overrides: RuntimeOverride) -> Self {
        self.runtimes.insert(runtime, overrides);
        self
    }

    /// Places every working directory under `root`.
    #[must_use]
    pub fn rooted_at(mut self, root: &std::path::Path) -> Self {
        self.sandbox.work_dir = root.join("sandboxes");
        self.build.artifact_dir = root.join("artifacts");
        self.build.cache_dir = root.join("cache");
        self
    }

    /// Returns the orchestrator's share of the configuration.
    #[must_use]
    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            limiter: self.concurrency.clone(),
            dispatch: self.dispatch.clone(),
            billing: self.billing,
            bounds: self.limits,
        }
    }

    /// Checks that the settings are consistent.
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::Configuration` naming the first bad field.
    pub fn validate(&self) -> Result<(), PlatformError> {
        if let Some((field, reason)) = self.limits.inconsistency() {
            return Err(PlatformError::configuration(field, reason));
        }

        let zero_checks: [(&str, bool); 9] = [
            ("billing.granularity_ms", self.billing.granularity_ms == 0),
            ("concurrency.global_limit", self.concurrency.global_limit == 0),
            ("dispatch.queue_capacity", self.dispatch.queue_capacity == 0),
            ("dispatch.workers", self.dispatch.workers == 0),
            ("dispatch.retained_records", self.dispatch.retained_records == 0),
            ("sandbox.max_output_bytes", self.sandbox.max_output_bytes == 0),
            ("sandbox.max_log_bytes", self.sandbox.max_log_bytes == 0),
            ("build.build_timeout_ms", self.build.build_timeout_ms == 0),
            ("build.max_source_bytes", self.build.max_source_bytes == 0),
        ];
        if let Some((field, _)) = zero_checks.iter().find(|(_, zero)| *zero) {
            return Err(PlatformError::configuration(*field, "must be greater than zero"));
        }

        for (runtime, overrides) in &self.runtimes {
            if let Some(memory_mb) = overrides.memory_mb {
                if self.limits.check_memory(memory_mb).is_err() {
                    return Err(PlatformError::configuration(
                        format!("runtimes.{runtime}.memory_mb"),
                        format!(
                            "{memory_mb} is outside {}..={}",
                            self.limits.min_memory_mb, self.limits.max_memory_mb
                        ),
                    ));
                }
            }
            if let Some(timeout_ms) = overrides.timeout_ms {
                if self.limits.check_timeout(timeout_ms).is_err() {
                    return Err(PlatformError::configuration(
                        format!("runtimes.{runtime}.timeout_ms"),
                        format!(
                            "{timeout_ms} is outside {}..={}",
                            self.limits.min_timeout_ms, self.limits.max_timeout_ms
                        ),
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn default_config_is_valid() {
        PlatformConfig::default().validate().unwrap();
    }

    #[test]
    fn inverted_bounds_are_rejected() {
        let config = PlatformConfig::new().with_limits(ResourceBounds {
            min_memory_mb: 512,
            max_memory_mb: 256,
            ..ResourceBounds::default()
        });
        let err = config.validate().unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("limits.max_memory_mb"));
    }

    #[test]
    fn zero_capacities_are_rejected() {
        let config = PlatformConfig::new().with_dispatch(DispatchConfig {
            queue_capacity: 0,
            workers: 2,
            ..DispatchConfig::default()
        });
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("dispatch.queue_capacity"));
    }

    #[test]
    fn zero_granularity_is_rejected() {
        let mut config = PlatformConfig::new();
        config.billing.granularity_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn runtime_override_outside_bounds_is_rejected() {
        let config = PlatformConfig::new().with_runtime_override(
            RuntimeId::parse("node20").unwrap(),
            RuntimeOverride {
                memory_mb: Some(4096),
                ..RuntimeOverride::default()
            },
        );
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("runtimes.node20.memory_mb"));
    }

    #[test]
    fn rooted_at_moves_working_directories() {
        let config = PlatformConfig::new().rooted_at(Path::new("/srv/fnbox"));
        assert_eq!(config.sandbox.work_dir, Path::new("/srv/fnbox/sandboxes"));
        assert_eq!(config.build.artifact_dir, Path::new("/srv/fnbox/artifacts"));
        assert_eq!(config.build.cache_dir, Path::new("/srv/fnbox/cache"));
    }

    #[test]
    fn orchestrator_settings_mirror_sections() {
        let config = PlatformConfig::new().with_concurrency(LimiterConfig {
            global_limit: 3,
            per_function_limit: 1,
            acquire_timeout_ms: 50,
        });
        let settings = config.orchestrator_settings();
        assert_eq!(settings.limiter.global_limit, 3);
        assert_eq!(settings.bounds, config.limits);
    }
}

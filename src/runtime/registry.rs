//! The runtime registry.
//!
//! Built once at platform launch and read-only afterwards, so lookups need
//! no locking and the registry is shared behind an `Arc`.

use super::builtin;
use super::error::RuntimeError;
use super::template::{RuntimeLimits, RuntimeTemplate};
use crate::types::RuntimeId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Operator overrides for a registered runtime, usually from config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeOverride {
    /// Replacement toolchain executable
    pub toolchain: Option<PathBuf>,
    /// Replacement default memory ceiling
    pub memory_mb: Option<u32>,
    /// Replacement default timeout
    pub timeout_ms: Option<u64>,
}

impl RuntimeOverride {
    fn apply(&self, template: &mut RuntimeTemplate) {
        if let Some(ref toolchain) = self.toolchain {
            template.toolchain = toolchain.clone();
        }
        template.default_limits = RuntimeLimits {
            memory_mb: self.memory_mb.unwrap_or(template.default_limits.memory_mb),
            timeout_ms: self.timeout_ms.unwrap_or(template.default_limits.timeout_ms),
        };
    }
}

/// Maps runtime identifiers to templates.
#[derive(Debug, Clone, Default)]
pub struct RuntimeRegistry {
    templates: BTreeMap<RuntimeId, Arc<RuntimeTemplate>>,
}

impl RuntimeRegistry {
    /// Starts building a registry.
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Looks up the template for `runtime`.
    ///
    /// # Errors
    ///
    /// Returns `RuntimeError::NotSupported` for unregistered identifiers.
    pub fn resolve(&self, runtime: &RuntimeId) -> Result<Arc<RuntimeTemplate>, RuntimeError> {
        self.templates
            .get(runtime)
            .cloned()
            .ok_or_else(|| RuntimeError::not_supported(runtime.clone()))
    }

    /// Returns true if `runtime` is registered.
    #[must_use]
    pub fn contains(&self, runtime: &RuntimeId) -> bool {
        self.templates.contains_key(runtime)
    }

    /// Iterates templates in identifier order.
    pub fn templates(&self) -> impl Iterator<Item = &Arc<RuntimeTemplate>> {
        self.templates.values()
    }

    /// Returns the number of registered runtimes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Returns true if no runtimes are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

/// Accumulates templates and overrides before freezing them.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    templates: Vec<RuntimeTemplate>,
    overrides: BTreeMap<RuntimeId, RuntimeOverride>,
}

impl RegistryBuilder {
    /// Adds the built-in `node20`, `python311` and `go121` templates.
    #[must_use]
    pub fn with_builtins(mut self) -> Self {
        self.templates.extend(builtin::all());
        self
    }

    /// Adds a custom template.
    #[must_use]
    pub fn with_template(mut self, template: RuntimeTemplate) -> Self {
        self.templates.push(template);
        self
    }

    /// Adds overrides applied when the registry is built.
    #[must_use]
    pub fn with_overrides(mut self, overrides: BTreeMap<RuntimeId, RuntimeOverride>) -> Self {
        self.overrides.extend(overrides);
        self
    }

    /// Validates every template and freezes the registry.
    ///
    /// # Errors
    ///
    /// Returns `RuntimeError::Duplicate` if two templates share an
    /// identifier, `InvalidTemplate` if a template fails validation, and
    /// `NotSupported` if an override names an unregistered runtime.
    pub fn build(self) -> Result<RuntimeRegistry, RuntimeError> {
        let mut templates = BTreeMap::new();
        for mut template in self.templates {
            if templates.contains_key(&template.id) {
                return Err(RuntimeError::duplicate(template.id));
            }
            if let Some(overrides) = self.overrides.get(&template.id) {
                overrides.apply(&mut template);
            }
            template.validate()?;
            templates.insert(template.id.clone(), Arc::new(template));
        }

        if let Some(unknown) = self.overrides.keys().find(|id| !templates.contains_key(*id)) {
            return Err(RuntimeError::not_supported(unknown.clone()));
        }

        tracing::debug!(runtimes = templates.len(), "runtime registry built");
        Ok(RuntimeRegistry { templates })
    }
}

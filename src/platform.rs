//! High-level facade for fnbox.
//!
//! [`Platform`] wires the runtime registry, build service, artifact store,
//! sandbox executor and orchestrator together from one [`PlatformConfig`],
//! and exposes the deploy/update/delete/invoke lifecycle.
//!
//! # Example
//!
//! ```rust,ignore
//! use fnbox::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let platform = Platform::builder().launch().await?;
//!
//!     let spec = FunctionSpec::new(
//!         "add-one",
//!         "tenant-1",
//!         RuntimeId::parse("node20")?,
//!         "index.handler",
//!         "exports.handler = async (event) => event.input + 1;",
//!     );
//!     let function = platform.deploy(spec).await?;
//!     let invocation = platform
//!         .invoke(&function, serde_json::json!({"input": 41}), InvocationMode::Sync)
//!         .await?;
//!     assert_eq!(invocation.response(), Some(&serde_json::json!(42)));
//!
//!     platform.shutdown().await;
//!     Ok(())
//! }
//! ```

use crate::build::{ArtifactStore, BuildRequest, BuildService};
use crate::config::PlatformConfig;
use crate::error::{DeployError, InvokeError, PlatformError};
use crate::function::{FunctionDefinition, FunctionSpec, FunctionUpdate};
use crate::invocation::{
    DispatchRequest, DispatchResponse, InMemoryInvocationStore, Invocation, InvocationMode,
    InvocationSink, Orchestrator,
};
use crate::runtime::{RuntimeRegistry, RuntimeTemplate};
use crate::sandbox::{ProcessSandbox, SandboxExecutor};
use crate::types::RuntimeId;
use serde_json::Value;
use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::OnceCell;

/// How long a toolchain version probe may take.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// A running fnbox platform.
#[derive(Debug)]
pub struct Platform {
    config: PlatformConfig,
    registry: Arc<RuntimeRegistry>,
    builds: BuildService,
    store: Arc<ArtifactStore>,
    executor: Arc<dyn SandboxExecutor>,
    orchestrator: Orchestrator,
    records: Option<Arc<InMemoryInvocationStore>>,
    ready: OnceCell<BTreeMap<RuntimeId, bool>>,
}

impl Platform {
    /// Starts configuring a platform.
    #[must_use]
    pub fn builder() -> PlatformBuilder {
        PlatformBuilder::default()
    }

    /// Returns the effective configuration.
    #[must_use]
    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    /// Returns the runtime registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<RuntimeRegistry> {
        &self.registry
    }

    /// Returns the build service.
    #[must_use]
    pub fn builds(&self) -> &BuildService {
        &self.builds
    }

    /// Returns the authoritative artifact store.
    #[must_use]
    pub fn artifacts(&self) -> &Arc<ArtifactStore> {
        &self.store
    }

    /// Returns the orchestrator.
    #[must_use]
    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Returns the built-in record store, unless a custom sink was supplied.
    #[must_use]
    pub fn records(&self) -> Option<&Arc<InMemoryInvocationStore>> {
        self.records.as_ref()
    }

    /// Returns toolchain availability per runtime, once the host is ready.
    #[must_use]
    pub fn toolchains(&self) -> Option<&BTreeMap<RuntimeId, bool>> {
        self.ready.get()
    }

    /// Prepares the host exactly once.
    ///
    /// Creates the build and sandbox directories, probes every registered
    /// toolchain, and lets the executor probe its isolation primitives.
    /// Later calls return immediately.
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::LaunchFailed` if a directory cannot be
    /// created or the executor refuses to run on this host.
    pub async fn ensure_ready(&self) -> Result<(), PlatformError> {
        self.ready
            .get_or_try_init(|| async {
                for dir in [&self.config.build.artifact_dir, &self.config.build.cache_dir] {
                    tokio::fs::create_dir_all(dir).await.map_err(|e| {
                        PlatformError::launch_failed(format!(
                            "cannot create '{}': {e}",
                            dir.display()
                        ))
                    })?;
                }
                self.executor
                    .prepare()
                    .await
                    .map_err(|e| PlatformError::launch_failed(e.to_string()))?;

                let mut toolchains = BTreeMap::new();
                for template in self.registry.templates() {
                    toolchains.insert(template.id.clone(), probe_toolchain(template).await);
                }
                tracing::info!(runtimes = toolchains.len(), "platform ready");
                Ok::<_, PlatformError>(toolchains)
            })
            .await
            .map(|_| ())
    }

    /// Deploys a new function as version 1.
    ///
    /// The definition is only returned, active, after its build succeeded.
    ///
    /// # Errors
    ///
    /// - `Invalid` if the spec fails validation or bounds
    /// - `UnsupportedRuntime` for unknown runtimes
    /// - `BuildFailed` with the diagnostic if the source is rejected
    /// - `Infrastructure` if the build could not run
    pub async fn deploy(&self, spec: FunctionSpec) -> Result<FunctionDefinition, DeployError> {
        let template = self
            .registry
            .resolve(&spec.runtime)
            .map_err(|_| DeployError::unsupported_runtime(spec.runtime.clone()))?;
        let mut definition =
            FunctionDefinition::create(spec, &self.config.limits, template.default_limits)?;
        self.build_and_activate(&mut definition).await?;
        tracing::info!(
            function_id = %definition.id,
            name = %definition.name,
            runtime = %definition.runtime,
            "function deployed"
        );
        Ok(definition)
    }

    /// Applies an update, producing the next version.
    ///
    /// On success the new active definition is returned and older
    /// artifacts are retired. On failure `current` keeps serving.
    ///
    /// # Errors
    ///
    /// The errors of [`Platform::deploy`], plus `Invalid` for deleted
    /// functions.
    pub async fn update(
        &self,
        current: &FunctionDefinition,
        update: FunctionUpdate,
    ) -> Result<FunctionDefinition, DeployError> {
        let mut next = current.with_update(update, &self.config.limits)?;
        self.build_and_activate(&mut next).await?;
        let retired = self.store.supersede(&next.id, next.version);
        tracing::info!(
            function_id = %next.id,
            version = next.version,
            retired,
            "function updated"
        );
        Ok(next)
    }

    async fn build_and_activate(
        &self,
        definition: &mut FunctionDefinition,
    ) -> Result<(), DeployError> {
        let artifact = self
            .builds
            .build(BuildRequest::for_definition(definition))
            .await?;
        if !artifact.is_success() {
            return Err(DeployError::build_failed(
                definition.id.clone(),
                artifact.diagnostic().unwrap_or("build failed"),
            ));
        }
        definition.activate(&artifact)?;
        Ok(())
    }

    /// Soft-deletes a function and retires its artifacts.
    ///
    /// In-flight invocations finish against the artifact they hold.
    pub fn delete(&self, definition: &mut FunctionDefinition) {
        definition.delete();
        let retired = self.store.remove_function(&definition.id);
        self.orchestrator.limiter().forget_function(&definition.id);
        tracing::info!(function_id = %definition.id, retired, "function deleted");
    }

    /// Invokes a function. See [`Orchestrator::invoke`].
    ///
    /// # Errors
    ///
    /// The errors of [`Orchestrator::invoke`].
    pub async fn invoke(
        &self,
        definition: &FunctionDefinition,
        payload: Value,
        mode: InvocationMode,
    ) -> Result<Invocation, InvokeError> {
        self.orchestrator.invoke(definition, payload, mode).await
    }

    /// Handles a dispatch API request. See [`Orchestrator::dispatch`].
    ///
    /// # Errors
    ///
    /// The errors of [`Orchestrator::dispatch`].
    pub async fn dispatch(
        &self,
        request: DispatchRequest,
        definition: &FunctionDefinition,
    ) -> Result<DispatchResponse, InvokeError> {
        self.orchestrator.dispatch(request, definition).await
    }

    /// Finishes queued work and stops accepting invocations.
    pub async fn shutdown(&self) {
        self.orchestrator.shutdown().await;
    }
}

async fn probe_toolchain(template: &RuntimeTemplate) -> bool {
    let mut cmd = Command::new(&template.toolchain);
    cmd.args(&template.probe_args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let available = match tokio::time::timeout(PROBE_TIMEOUT, cmd.status()).await {
        Ok(Ok(status)) => status.success(),
        Ok(Err(_)) | Err(_) => false,
    };
    if available {
        tracing::info!(
            runtime = %template.id,
            toolchain = %template.toolchain.display(),
            "toolchain available"
        );
    } else {
        tracing::warn!(
            runtime = %template.id,
            toolchain = %template.toolchain.display(),
            "toolchain unavailable; builds for this runtime will fail"
        );
    }
    available
}

/// Builder for [`Platform`].
#[derive(Debug, Default)]
pub struct PlatformBuilder {
    config: Option<PlatformConfig>,
    runtimes: Vec<RuntimeTemplate>,
    sink: Option<Arc<dyn InvocationSink>>,
    executor: Option<Arc<dyn SandboxExecutor>>,
}

impl PlatformBuilder {
    /// Uses `config` instead of the defaults.
    #[must_use]
    pub fn with_config(mut self, config: PlatformConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Registers a custom runtime next to the built-ins.
    #[must_use]
    pub fn with_runtime(mut self, template: RuntimeTemplate) -> Self {
        self.runtimes.push(template);
        self
    }

    /// Sends invocation records to `sink` instead of the in-memory store.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn InvocationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Runs invocations on `executor` instead of the process sandbox.
    #[must_use]
    pub fn with_executor(mut self, executor: Arc<dyn SandboxExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Validates the configuration, assembles the components and
    /// prepares the host.
    ///
    /// Must be called inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::Configuration` for invalid settings or
    /// runtime templates, and `LaunchFailed` if host preparation fails.
    pub async fn launch(self) -> Result<Platform, PlatformError> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let registry = self
            .runtimes
            .into_iter()
            .fold(RuntimeRegistry::builder().with_builtins(), |builder, template| {
                builder.with_template(template)
            })
            .with_overrides(config.runtimes.clone())
            .build()
            .map_err(|e| PlatformError::configuration("runtimes", e.to_string()))?;
        let registry = Arc::new(registry);

        let store = Arc::new(ArtifactStore::new());
        let builds = BuildService::new(
            Arc::clone(&registry),
            Arc::clone(&store),
            config.build.clone(),
        );
        let executor = self
            .executor
            .unwrap_or_else(|| Arc::new(ProcessSandbox::new(config.sandbox.clone())));
        let (sink, records) = match self.sink {
            Some(sink) => (sink, None),
            None => {
                let records = Arc::new(InMemoryInvocationStore::with_capacity(
                    config.dispatch.retained_records,
                ));
                (Arc::clone(&records) as Arc<dyn InvocationSink>, Some(records))
            }
        };
        let orchestrator = Orchestrator::new(
            Arc::clone(&executor),
            Arc::clone(&store),
            sink,
            config.orchestrator_settings(),
        );

        let platform = Platform {
            config,
            registry,
            builds,
            store,
            executor,
            orchestrator,
            records,
            ready: OnceCell::new(),
        };
        platform.ensure_ready().await?;
        Ok(platform)
    }
}

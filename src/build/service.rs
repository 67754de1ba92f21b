//! The build service.
//!
//! Turns (function, version, runtime, handler, source) into a
//! [`BuildArtifact`]. Interpreted runtimes get a syntax check, compiled
//! runtimes get a real compile; both lay the source and the runtime's
//! scaffold into a fresh directory that becomes the artifact.

use super::artifact::{ArtifactDir, ArtifactHandle, BuildArtifact, BuildStatus, CodeHash};
use super::error::BuildError;
use super::store::ArtifactStore;
use crate::child::{self, SharedBuffer};
use crate::function::{self, FunctionDefinition};
use crate::runtime::{BuildVars, Program, RuntimeRegistry, RuntimeTemplate};
use crate::types::{FunctionId, RuntimeId};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;

/// Label used in the truncation marker of build diagnostics.
const DIAGNOSTIC_LABEL: &str = "build output";

/// Build service settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Root under which artifact directories are created
    pub artifact_dir: PathBuf,
    /// Shared toolchain cache (Go build cache and module path)
    pub cache_dir: PathBuf,
    /// Wall-clock limit for one build command
    pub build_timeout_ms: u64,
    /// Largest accepted source
    pub max_source_bytes: usize,
    /// Largest diagnostic kept from build output
    pub max_diagnostic_bytes: usize,
}

impl Default for BuildConfig {
    fn default() -> Self {
        let root = std::env::temp_dir().join("fnbox");
        Self {
            artifact_dir: root.join("artifacts"),
            cache_dir: root.join("cache"),
            build_timeout_ms: 120_000,
            max_source_bytes: 1024 * 1024,
            max_diagnostic_bytes: 16 * 1024,
        }
    }
}

/// Inputs to one build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    /// Function being built
    pub function_id: FunctionId,
    /// Version being built
    pub version: u64,
    /// Runtime to build for
    pub runtime: RuntimeId,
    /// Handler; compiled runtimes bind it at build time
    pub handler: String,
    /// Source code
    pub source: String,
}

impl BuildRequest {
    /// Creates a request for a definition's current version.
    #[must_use]
    pub fn for_definition(definition: &FunctionDefinition) -> Self {
        Self {
            function_id: definition.id.clone(),
            version: definition.version,
            runtime: definition.runtime.clone(),
            handler: definition.handler.clone(),
            source: definition.source.clone(),
        }
    }

    fn hash(&self, template: &RuntimeTemplate) -> CodeHash {
        CodeHash::from_parts(&[
            self.runtime.as_str(),
            &template.toolchain.to_string_lossy(),
            &self.handler,
            &self.source,
        ])
    }

    fn failure(
        &self,
        diagnostic: impl Into<String>,
        hash: CodeHash,
        started: Instant,
    ) -> BuildArtifact {
        let mut artifact = BuildArtifact::failure(
            self.function_id.clone(),
            self.version,
            self.runtime.clone(),
            diagnostic,
        );
        artifact.source_hash = hash;
        artifact.build_duration_ms = elapsed_ms(started);
        artifact
    }
}

enum CommandOutcome {
    Succeeded,
    Failed(String),
}

/// Validates and packages function source into artifacts.
#[derive(Debug, Clone)]
pub struct BuildService {
    registry: Arc<RuntimeRegistry>,
    store: Arc<ArtifactStore>,
    config: BuildConfig,
}

impl BuildService {
    /// Creates a build service.
    #[must_use]
    pub fn new(
        registry: Arc<RuntimeRegistry>,
        store: Arc<ArtifactStore>,
        config: BuildConfig,
    ) -> Self {
        Self {
            registry,
            store,
            config,
        }
    }

    /// Returns the artifact store.
    #[must_use]
    pub fn store(&self) -> &Arc<ArtifactStore> {
        &self.store
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Builds one function version.
    ///
    /// Rejected source yields `Ok` with a failed artifact. A successful
    /// artifact becomes authoritative in the store; building identical
    /// inputs again returns the stored artifact.
    ///
    /// # Errors
    ///
    /// Returns `BuildError` if the runtime is unknown, the toolchain cannot
    /// be started, or the artifact directory cannot be prepared.
    pub async fn build(&self, request: BuildRequest) -> Result<Arc<BuildArtifact>, BuildError> {
        let started = Instant::now();
        let template = self
            .registry
            .resolve(&request.runtime)
            .map_err(|_| BuildError::unsupported_runtime(request.runtime.clone()))?;
        let hash = request.hash(&template);

        if let Some(existing) = self.store.lookup(&request.function_id, request.version, hash) {
            tracing::debug!(
                function_id = %request.function_id,
                version = request.version,
                "reusing stored artifact"
            );
            return Ok(existing);
        }

        if let Some(reason) = self.reject_source(&request.source) {
            return Ok(self.finish(request.failure(reason, hash, started)));
        }

        let function_dir = self.config.artifact_dir.join(request.function_id.to_string());
        tokio::fs::create_dir_all(&function_dir)
            .await
            .map_err(|e| BuildError::io("creating the function artifact directory", e))?;
        tokio::fs::create_dir_all(&self.config.cache_dir)
            .await
            .map_err(|e| BuildError::io("creating the build cache directory", e))?;

        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(&function_dir)
            .map_err(|e| BuildError::io("creating the staging directory", e))?;
        let final_dir = function_dir.join(format!("v{}-{}", request.version, hash));

        let entry_point = function::entry_point(&request.handler);
        let vars = BuildVars {
            source_file: &template.source_file,
            handler: entry_point,
            output: staging.path(),
            artifact_dir: &final_dir,
            cache_dir: &self.config.cache_dir,
        };

        write_sources(&template, &vars, staging.path(), &request.source).await?;

        if let Some(ref command) = template.build {
            let program = match &command.program {
                Program::Toolchain => template.toolchain.clone(),
                Program::Artifact(file) => staging.path().join(file),
            };
            let args: Vec<String> = command.args.iter().map(|a| vars.render(a)).collect();
            match self
                .run_build_command(&template, &program, &args, &vars, staging.path())
                .await?
            {
                CommandOutcome::Succeeded => {}
                CommandOutcome::Failed(diagnostic) => {
                    return Ok(self.finish(request.failure(diagnostic, hash, started)));
                }
            }
        }

        if let Program::Artifact(file) = &template.launch.program {
            if !tokio::fs::try_exists(staging.path().join(file)).await.unwrap_or(false) {
                return Ok(self.finish(request.failure(
                    format!("build did not produce '{file}'"),
                    hash,
                    started,
                )));
            }
        }

        let launch = template.launch_spec(&BuildVars {
            output: &final_dir,
            ..vars
        });
        let oom = template
            .oom_matcher()
            .map_err(|e| BuildError::io("compiling oom markers", e))?;

        // The staging guard only cleans up if the rename did not happen.
        if let Err(e) = tokio::fs::rename(staging.path(), &final_dir).await {
            if !tokio::fs::try_exists(&final_dir).await.unwrap_or(false) {
                return Err(BuildError::io("publishing the artifact directory", e));
            }
            tracing::debug!(dir = %final_dir.display(), "artifact directory already present");
        }
        drop(staging);

        let artifact = BuildArtifact {
            function_id: request.function_id.clone(),
            version: request.version,
            runtime: request.runtime.clone(),
            status: BuildStatus::Success,
            diagnostic: None,
            handle: Some(ArtifactHandle {
                launch,
                dir: Arc::new(ArtifactDir::new(final_dir)),
                entry_point: entry_point.to_string(),
                network: template.network,
                memory_enforcement: template.memory_enforcement,
                oom,
            }),
            source_hash: hash,
            built_at: Utc::now(),
            build_duration_ms: elapsed_ms(started),
        };
        Ok(self.finish(artifact))
    }

    fn reject_source(&self, source: &str) -> Option<String> {
        if source.trim().is_empty() {
            return Some("source is empty".to_string());
        }
        if source.len() > self.config.max_source_bytes {
            return Some(format!(
                "source is {} bytes; at most {} bytes are allowed",
                source.len(),
                self.config.max_source_bytes
            ));
        }
        None
    }

    fn finish(&self, artifact: BuildArtifact) -> Arc<BuildArtifact> {
        match artifact.status() {
            BuildStatus::Success => tracing::info!(
                function_id = %artifact.function_id(),
                version = artifact.version(),
                runtime = %artifact.runtime(),
                duration_ms = artifact.build_duration_ms(),
                "build succeeded"
            ),
            BuildStatus::Failure => tracing::info!(
                function_id = %artifact.function_id(),
                version = artifact.version(),
                runtime = %artifact.runtime(),
                duration_ms = artifact.build_duration_ms(),
                "build rejected source"
            ),
        }
        self.store.insert(artifact)
    }

    async fn run_build_command(
        &self,
        template: &RuntimeTemplate,
        program: &Path,
        args: &[String],
        vars: &BuildVars<'_>,
        dir: &Path,
    ) -> Result<CommandOutcome, BuildError> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(dir)
            .env_clear()
            .env("PATH", child::host_path())
            .env("HOME", dir)
            .env("TMPDIR", dir)
            .env("LANG", "C.UTF-8")
            .envs(template.build_env.iter().map(|(k, v)| (k, vars.render(v))))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        let mut process = match cmd.spawn() {
            Ok(process) => process,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BuildError::toolchain_unavailable(
                    template.id.clone(),
                    program,
                    e.to_string(),
                ));
            }
            Err(e) => return Err(BuildError::io("starting the build command", e)),
        };

        let output = child::shared_buffer(self.config.max_diagnostic_bytes);
        let readers = spawn_readers(&mut process, &output);

        let pid = process.id();
        let limit = Duration::from_millis(self.config.build_timeout_ms);
        let waited = tokio::time::timeout(limit, process.wait()).await;
        // Compilers fork helpers; none may outlive the build.
        if let Some(pid) = pid {
            child::kill_group(pid);
        }
        let status = match waited {
            Ok(status) => {
                Some(status.map_err(|e| BuildError::io("waiting for the build command", e))?)
            }
            Err(_) => {
                let _ = process.kill().await;
                None
            }
        };
        for reader in readers {
            let _ = tokio::time::timeout(Duration::from_secs(1), reader).await;
        }

        let diagnostic = child::with_buffer(&output, |b| b.render(DIAGNOSTIC_LABEL));
        match status {
            None => Ok(CommandOutcome::Failed(format!(
                "build timed out after {}ms\n{}",
                self.config.build_timeout_ms, diagnostic
            ))),
            Some(status) if status.success() => Ok(CommandOutcome::Succeeded),
            Some(status) => {
                let diagnostic = if diagnostic.trim().is_empty() {
                    format!("build command failed with {status}")
                } else {
                    diagnostic
                };
                Ok(CommandOutcome::Failed(diagnostic))
            }
        }
    }
}

fn spawn_readers(
    process: &mut tokio::process::Child,
    output: &SharedBuffer,
) -> Vec<tokio::task::JoinHandle<()>> {
    let mut readers = Vec::with_capacity(2);
    if let Some(stdout) = process.stdout.take() {
        readers.push(tokio::spawn(child::drain(stdout, Arc::clone(output))));
    }
    if let Some(stderr) = process.stderr.take() {
        readers.push(tokio::spawn(child::drain(stderr, Arc::clone(output))));
    }
    readers
}

async fn write_sources(
    template: &RuntimeTemplate,
    vars: &BuildVars<'_>,
    dir: &Path,
    source: &str,
) -> Result<(), BuildError> {
    tokio::fs::write(dir.join(&template.source_file), source)
        .await
        .map_err(|e| BuildError::io("writing the source file", e))?;
    for file in &template.scaffold {
        tokio::fs::write(dir.join(&file.path), vars.render(&file.contents))
            .await
            .map_err(|e| BuildError::io(format!("writing scaffold file '{}'", file.path), e))?;
    }
    Ok(())
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{CommandTemplate, RuntimeKind};

    fn sh_template() -> RuntimeTemplate {
        RuntimeTemplate::new(
            RuntimeId::parse("sh").unwrap(),
            "POSIX shell",
            RuntimeKind::Interpreted,
            "sh",
            "function.sh",
            CommandTemplate::toolchain(["{artifact_dir}/function.sh"]),
        )
        .with_scaffold("entry.txt", "{handler}")
        .with_build(CommandTemplate::toolchain(["-n", "{source_file}"]))
    }

    fn service(tmp: &Path, template: RuntimeTemplate) -> BuildService {
        let registry = RuntimeRegistry::builder()
            .with_template(template)
            .build()
            .unwrap();
        let config = BuildConfig {
            artifact_dir: tmp.join("artifacts"),
            cache_dir: tmp.join("cache"),
            build_timeout_ms: 5_000,
            max_source_bytes: 1024,
            max_diagnostic_bytes: 4096,
        };
        BuildService::new(Arc::new(registry), Arc::new(ArtifactStore::new()), config)
    }

    fn request(source: &str) -> BuildRequest {
        BuildRequest {
            function_id: FunctionId::new(),
            version: 1,
            runtime: RuntimeId::parse("sh").unwrap(),
            handler: "main.run".into(),
            source: source.into(),
        }
    }

    #[tokio::test]
    async fn valid_source_builds() {
        let tmp = tempfile::tempdir().unwrap();
        let service = service(tmp.path(), sh_template());

        let artifact = service.build(request("run() { echo hi; }\n")).await.unwrap();

        assert!(artifact.is_success());
        let handle = artifact.handle().unwrap();
        assert!(handle.dir().join("function.sh").exists());
        assert_eq!(
            std::fs::read_to_string(handle.dir().join("entry.txt")).unwrap(),
            "run"
        );
        assert_eq!(handle.entry_point(), "run");
        assert_eq!(
            handle.launch().args,
            vec![handle.dir().join("function.sh").to_string_lossy().into_owned()]
        );
        assert_eq!(service.store().len(), 1);
    }

    #[tokio::test]
    async fn identical_request_returns_same_artifact() {
        let tmp = tempfile::tempdir().unwrap();
        let service = service(tmp.path(), sh_template());
        let req = request("run() { :; }\n");

        let first = service.build(req.clone()).await.unwrap();
        let second = service.build(req).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(first.is_equivalent(&second));
    }

    #[tokio::test]
    async fn syntax_error_yields_failure_with_diagnostic() {
        let tmp = tempfile::tempdir().unwrap();
        let service = service(tmp.path(), sh_template());

        let artifact = service.build(request("run() { if then fi\n")).await.unwrap();

        assert!(!artifact.is_success());
        assert!(!artifact.diagnostic().unwrap_or("").trim().is_empty());
        assert!(service.store().is_empty());
    }

    #[tokio::test]
    async fn failed_build_leaves_no_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let service = service(tmp.path(), sh_template());
        let req = request("run() { if then fi\n");
        let function_dir = tmp.path().join("artifacts").join(req.function_id.to_string());

        service.build(req).await.unwrap();

        let leftovers = std::fs::read_dir(function_dir).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn empty_source_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let service = service(tmp.path(), sh_template());
        let artifact = service.build(request("   \n")).await.unwrap();
        assert_eq!(artifact.diagnostic(), Some("source is empty"));
    }

    #[tokio::test]
    async fn oversize_source_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let service = service(tmp.path(), sh_template());
        let artifact = service.build(request(&"#".repeat(2048))).await.unwrap();
        assert!(artifact.diagnostic().unwrap().contains("at most 1024 bytes"));
    }

    #[tokio::test]
    async fn unknown_runtime_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let service = service(tmp.path(), sh_template());
        let mut req = request("run() { :; }");
        req.runtime = RuntimeId::parse("node20").unwrap();
        let err = service.build(req).await.unwrap_err();
        assert!(err.is_unsupported_runtime());
    }

    #[tokio::test]
    async fn missing_toolchain_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let mut template = sh_template();
        template.toolchain = PathBuf::from("/nonexistent/fnbox-toolchain");
        let service = service(tmp.path(), template);

        let err = service.build(request("run() { :; }")).await.unwrap_err();
        assert!(err.is_toolchain_unavailable());
    }

    #[tokio::test]
    async fn slow_build_times_out() {
        let tmp = tempfile::tempdir().unwrap();
        let template = sh_template().with_build(CommandTemplate::toolchain(["-c", "sleep 10"]));
        let mut service = service(tmp.path(), template);
        service.config.build_timeout_ms = 200;

        let started = Instant::now();
        let artifact = service.build(request("run() { :; }")).await.unwrap();

        assert!(!artifact.is_success());
        assert!(artifact
            .diagnostic()
            .unwrap()
            .starts_with("build timed out after 200ms"));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn new_version_is_additive() {
        let tmp = tempfile::tempdir().unwrap();
        let service = service(tmp.path(), sh_template());
        let v1 = request("run() { echo 1; }");
        let mut v2 = v1.clone();
        v2.version = 2;
        v2.source = "run() { echo 2; }".into();

        let first = service.build(v1).await.unwrap();
        let second = service.build(v2).await.unwrap();

        assert_ne!(first.handle().unwrap().dir(), second.handle().unwrap().dir());
        assert!(first.handle().unwrap().dir().exists());
        assert_eq!(service.store().len(), 2);
    }
}

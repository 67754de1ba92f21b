//! Process-based sandbox executor.
//!
//! Each invocation runs the runtime's launch command as a fresh process
//! group in a private scratch directory, with a cleared environment,
//! rlimits, and optionally the seccomp network filter. A deadline timer
//! and the memory watchdog race the child; whichever ends first decides
//! how the group is torn down.

use super::config::SandboxConfig;
use super::context::ExecutionContext;
use super::envelope::{EnvelopeRead, Observation};
use super::error::SandboxError;
use super::hardening::{Hardening, HardeningStatus, NetworkFilter};
use super::limits::ChildLimits;
use super::result::{ExecutionRequest, ExecutionResult};
use super::traits::{ExecutionFuture, PrepareFuture, SandboxExecutor};
use super::watchdog::{self, PeakMemory};
use crate::child::{self, SharedBuffer};
use crate::runtime::NetworkPolicy;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;

/// Label used in the log truncation marker.
const LOG_LABEL: &str = "logs";

/// How long to wait for a killed child to be reaped.
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to wait for the output drains after the group is gone.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

enum Ended {
    Exited(std::io::Result<ExitStatus>),
    Deadline,
    MemoryLimit,
}

/// Runs invocations as supervised child processes.
#[derive(Debug, Clone)]
pub struct ProcessSandbox {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    config: SandboxConfig,
    hardening: Hardening,
}

impl ProcessSandbox {
    /// Creates a sandbox that probes seccomp support on first use.
    #[must_use]
    pub fn new(config: SandboxConfig) -> Self {
        Self::with_hardening(config, Hardening::new())
    }

    /// Creates a sandbox with explicit hardening state.
    #[must_use]
    pub fn with_hardening(config: SandboxConfig, hardening: Hardening) -> Self {
        Self {
            inner: Arc::new(Inner { config, hardening }),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &SandboxConfig {
        &self.inner.config
    }
}

impl SandboxExecutor for ProcessSandbox {
    fn execute(&self, request: ExecutionRequest) -> ExecutionFuture {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move { inner.run(request).await })
    }

    fn prepare(&self) -> PrepareFuture {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move {
            tokio::fs::create_dir_all(&inner.config.work_dir)
                .await
                .map_err(SandboxError::workspace_failed)?;
            let status = inner.hardening.status().await;
            if status == HardeningStatus::Unavailable && inner.config.require_hardening {
                return Err(SandboxError::hardening(
                    "the seccomp network filter cannot be installed on this host",
                ));
            }
            Ok(())
        })
    }
}

impl Inner {
    async fn network_filter(
        &self,
        policy: NetworkPolicy,
    ) -> Result<Option<Arc<NetworkFilter>>, SandboxError> {
        if policy == NetworkPolicy::Allow {
            return Ok(None);
        }
        let filter = self.hardening.active_filter().await;
        if filter.is_none() && self.config.require_hardening {
            return Err(SandboxError::hardening(
                "the seccomp network filter cannot be installed on this host",
            ));
        }
        Ok(filter)
    }

    async fn run(&self, request: ExecutionRequest) -> Result<ExecutionResult, SandboxError> {
        let handle = request
            .artifact
            .handle()
            .ok_or_else(SandboxError::artifact_unavailable)?;
        let filter = self.network_filter(handle.network()).await?;

        let mut context = ExecutionContext::create(&self.config.work_dir, &request.invocation_id)?;
        let payload = serde_json::to_vec(&request.payload).map_err(SandboxError::internal)?;
        tokio::fs::write(context.payload_path(), payload)
            .await
            .map_err(SandboxError::workspace_failed)?;

        let launch = handle.launch();
        let (args, launch_env) = launch.render(request.memory_limit_mb, request.timeout_ms);
        let limits = ChildLimits::for_invocation(
            request.timeout_ms,
            request.memory_limit_mb,
            handle.memory_enforcement(),
            self.config.max_open_files,
            self.config.max_file_size_mb,
            self.config.max_processes,
        );

        let mut cmd = Command::new(&launch.program);
        cmd.args(&args)
            .current_dir(context.path())
            .env_clear()
            .env("PATH", child::host_path())
            .env("HOME", context.path())
            .env("TMPDIR", context.path())
            .env("LANG", "C.UTF-8")
            .envs(&launch_env)
            .envs(&request.env)
            .env("FNBOX_PAYLOAD_PATH", context.payload_path())
            .env("FNBOX_RESULT_PATH", context.result_path())
            .env("FNBOX_ARTIFACT_DIR", handle.dir())
            .env("FNBOX_HANDLER", handle.entry_point())
            .env("FNBOX_FUNCTION_ID", request.function_id.to_string())
            .env("FNBOX_INVOCATION_ID", request.invocation_id.to_string())
            .env("FNBOX_MEMORY_LIMIT_MB", request.memory_limit_mb.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);
        // SAFETY: the closure only issues setrlimit, prctl and seccomp.
        unsafe {
            cmd.pre_exec(move || {
                limits.apply()?;
                if let Some(filter) = &filter {
                    filter.install()?;
                }
                Ok(())
            });
        }

        let started = Instant::now();
        let mut process = cmd.spawn().map_err(|e| {
            tracing::warn!(
                invocation_id = %request.invocation_id,
                program = %launch.program.display(),
                error = %e,
                "failed to start sandbox"
            );
            SandboxError::spawn_failed(launch.program.display().to_string(), e)
        })?;
        let Some(pid) = process.id() else {
            return Err(SandboxError::internal("child exited before supervision started"));
        };
        context.attach(pid);

        let logs = child::shared_buffer(self.config.max_log_bytes);
        let readers = spawn_readers(&mut process, &logs);
        let peak = PeakMemory::new();
        let deadline =
            tokio::time::Instant::from_std(started) + Duration::from_millis(request.timeout_ms);

        let ended = tokio::select! {
            status = process.wait() => Ended::Exited(status),
            () = tokio::time::sleep_until(deadline) => Ended::Deadline,
            true = watchdog::watch(
                pid,
                request.memory_limit_mb,
                self.config.memory_poll_interval(),
                peak.clone(),
            ) => Ended::MemoryLimit,
        };
        let elapsed = elapsed_ms(started);

        // Grandchildren may still hold the pipes or burn CPU.
        context.kill();
        let (status, timed_out, memory_killed) = match ended {
            Ended::Exited(status) => (Some(status.map_err(SandboxError::internal)?), false, false),
            Ended::Deadline => (reap(&mut process).await, true, false),
            Ended::MemoryLimit => (reap(&mut process).await, false, true),
        };
        for reader in readers {
            let _ = tokio::time::timeout(DRAIN_TIMEOUT, reader).await;
        }

        let (log_text, logs_truncated) =
            child::with_buffer(&logs, |b| (b.render(LOG_LABEL), b.is_truncated()));
        let envelope =
            EnvelopeRead::from_path(&context.result_path(), self.config.max_output_bytes).await;
        drop(context);

        let outcome = Observation {
            timed_out,
            memory_killed,
            status,
            envelope,
            logs: &log_text,
            oom: handle.oom(),
            timeout_ms: request.timeout_ms,
            memory_limit_mb: request.memory_limit_mb,
        }
        .classify();

        let duration_ms = if timed_out {
            request.timeout_ms
        } else {
            elapsed.min(request.timeout_ms)
        };
        tracing::debug!(
            invocation_id = %request.invocation_id,
            function_id = %request.function_id,
            duration_ms,
            success = outcome.is_success(),
            timed_out,
            memory_killed,
            "sandbox finished"
        );

        Ok(ExecutionResult {
            outcome,
            logs: log_text,
            logs_truncated,
            duration_ms,
            memory_used_mb: peak.megabytes(),
            exit_code: status.and_then(|s| s.code()),
        })
    }
}

/// Waits for a killed child, giving up after [`REAP_TIMEOUT`].
async fn reap(process: &mut tokio::process::Child) -> Option<ExitStatus> {
    match tokio::time::timeout(REAP_TIMEOUT, process.wait()).await {
        Ok(Ok(status)) => Some(status),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "failed to reap sandbox child");
            None
        }
        Err(_) => {
            tracing::warn!("sandbox child not reaped after kill");
            None
        }
    }
}

fn spawn_readers(
    process: &mut tokio::process::Child,
    logs: &SharedBuffer,
) -> Vec<tokio::task::JoinHandle<()>> {
    let mut readers = Vec::with_capacity(2);
    if let Some(stdout) = process.stdout.take() {
        readers.push(tokio::spawn(child::drain(stdout, Arc::clone(logs))));
    }
    if let Some(stderr) = process.stderr.take() {
        readers.push(tokio::spawn(child::drain(stderr, Arc::clone(logs))));
    }
    readers
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::BuildArtifact;
    use crate::sandbox::{ExecutionOutcome, ResourceKind};
    use crate::testing;
    use crate::types::{FunctionId, InvocationId, RuntimeId};
    use serde_json::{json, Value};
    use std::collections::BTreeMap;
    use std::path::Path;

    fn sandbox(root: &Path) -> ProcessSandbox {
        let config = SandboxConfig::default().with_work_dir(root.join("sandboxes"));
        ProcessSandbox::with_hardening(config, Hardening::disabled())
    }

    fn request(artifact: Arc<BuildArtifact>, payload: Value, timeout_ms: u64) -> ExecutionRequest {
        ExecutionRequest {
            invocation_id: InvocationId::new(),
            function_id: artifact.function_id().clone(),
            artifact,
            payload,
            env: BTreeMap::new(),
            memory_limit_mb: 128,
            timeout_ms,
        }
    }

    fn work_dir_entries(root: &Path) -> usize {
        std::fs::read_dir(root.join("sandboxes"))
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    const ADD_ONE: &str = r#"add_one() {
  n=$(printf '%s' "$1" | tr -cd '0-9')
  echo $((n + 1))
}
"#;

    #[tokio::test]
    async fn handler_output_is_returned() {
        let tmp = tempfile::tempdir().unwrap();
        let artifact = testing::build_sh(tmp.path(), "add_one", ADD_ONE).await;

        let result = sandbox(tmp.path())
            .execute(request(artifact, json!({"input": 41}), 5_000))
            .await
            .unwrap();

        assert_eq!(result.outcome, ExecutionOutcome::Success { output: json!(42) });
        assert!(result.duration_ms <= 5_000);
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(work_dir_entries(tmp.path()), 0);
    }

    #[tokio::test]
    async fn failing_handler_is_execution_error() {
        let tmp = tempfile::tempdir().unwrap();
        let artifact =
            testing::build_sh(tmp.path(), "throws", "throws() { echo boom; return 1; }\n").await;

        let result = sandbox(tmp.path())
            .execute(request(artifact, json!({}), 5_000))
            .await
            .unwrap();

        assert_eq!(result.error().as_deref(), Some("boom"));
        assert!(matches!(result.outcome, ExecutionOutcome::ExecutionError { .. }));
        assert!(result.duration_ms < 5_000);
    }

    #[tokio::test]
    async fn endless_handler_times_out() {
        let tmp = tempfile::tempdir().unwrap();
        let artifact =
            testing::build_sh(tmp.path(), "spin", "spin() { while :; do :; done; }\n").await;

        let started = Instant::now();
        let result = sandbox(tmp.path())
            .execute(request(artifact, json!({}), 300))
            .await
            .unwrap();

        assert_eq!(result.outcome, ExecutionOutcome::Timeout { timeout_ms: 300 });
        assert_eq!(result.duration_ms, 300);
        assert_eq!(
            result.error().as_deref(),
            Some("execution timed out after 300ms")
        );
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(work_dir_entries(tmp.path()), 0);
    }

    #[tokio::test]
    async fn logs_are_captured() {
        let tmp = tempfile::tempdir().unwrap();
        let source = "noisy() { echo 'hello from the handler' >&2; echo 1; }\n";
        let artifact = testing::build_sh(tmp.path(), "noisy", source).await;

        let result = sandbox(tmp.path())
            .execute(request(artifact, json!({}), 5_000))
            .await
            .unwrap();

        assert!(result.success());
        assert!(result.logs.contains("hello from the handler"));
        assert!(!result.logs_truncated);
    }

    #[tokio::test]
    async fn logs_are_truncated_with_marker() {
        let tmp = tempfile::tempdir().unwrap();
        let source = "chatty() { i=0; while [ $i -lt 500 ]; do echo 'line of log output' >&2; i=$((i + 1)); done; echo 1; }\n";
        let artifact = testing::build_sh(tmp.path(), "chatty", source).await;
        let config = SandboxConfig::default()
            .with_work_dir(tmp.path().join("sandboxes"))
            .with_max_log_bytes(128);

        let result = ProcessSandbox::with_hardening(config, Hardening::disabled())
            .execute(request(artifact, json!({}), 5_000))
            .await
            .unwrap();

        assert!(result.success());
        assert!(result.logs_truncated);
        assert!(result.logs.ends_with("bytes of logs truncated]"));
    }

    #[tokio::test]
    async fn function_env_is_injected_and_host_env_is_not() {
        let tmp = tempfile::tempdir().unwrap();
        let source = r#"greet() { printf '"%s|%s|%s"' "$GREETING" "$FNBOX_FUNCTION_ID" "${CARGO:-unset}"; }
"#;
        let artifact = testing::build_sh(tmp.path(), "greet", source).await;
        let function_id = artifact.function_id().clone();
        let mut req = request(artifact, json!({}), 5_000);
        req.env.insert("GREETING".into(), "hi".into());

        let result = sandbox(tmp.path()).execute(req).await.unwrap();

        assert_eq!(
            result.output(),
            Some(&json!(format!("hi|{function_id}|unset")))
        );
    }

    #[tokio::test]
    async fn oversize_response_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let source = "big() { echo '\"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\"'; }\n";
        let artifact = testing::build_sh(tmp.path(), "big", source).await;
        let config = SandboxConfig::default()
            .with_work_dir(tmp.path().join("sandboxes"))
            .with_max_output_bytes(16);

        let result = ProcessSandbox::with_hardening(config, Hardening::disabled())
            .execute(request(artifact, json!({}), 5_000))
            .await
            .unwrap();

        assert!(result.error().unwrap().contains("byte limit"));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn memory_hog_is_killed() {
        let tmp = tempfile::tempdir().unwrap();
        let source = "hog() { x=$(head -c 200000000 /dev/zero | tr '\\0' a); echo ${#x}; }\n";
        let artifact = testing::build_sh(tmp.path(), "hog", source).await;
        let mut req = request(artifact, json!({}), 20_000);
        req.memory_limit_mb = 16;

        let result = sandbox(tmp.path()).execute(req).await.unwrap();

        assert!(
            matches!(
                result.outcome,
                ExecutionOutcome::ResourceLimit {
                    resource: ResourceKind::Memory,
                    ..
                }
            ),
            "{:?}",
            result.outcome
        );
        assert!(result.memory_used_mb.unwrap_or(0) >= 16);
    }

    #[tokio::test]
    async fn failed_artifact_is_unavailable() {
        let tmp = tempfile::tempdir().unwrap();
        let artifact = Arc::new(BuildArtifact::failure(
            FunctionId::new(),
            1,
            RuntimeId::parse("sh").unwrap(),
            "syntax error",
        ));

        let err = sandbox(tmp.path())
            .execute(request(artifact, json!({}), 1_000))
            .await
            .unwrap_err();

        assert_eq!(err, SandboxError::artifact_unavailable());
    }

    #[tokio::test]
    async fn required_hardening_fails_prepare_when_unavailable() {
        let tmp = tempfile::tempdir().unwrap();
        let config = SandboxConfig {
            require_hardening: true,
            ..SandboxConfig::default().with_work_dir(tmp.path().join("sandboxes"))
        };
        let sandbox = ProcessSandbox::with_hardening(config, Hardening::disabled());

        let err = sandbox.prepare().await.unwrap_err();
        assert!(err.is_hardening());
    }

    #[tokio::test]
    async fn prepare_creates_work_dir() {
        let tmp = tempfile::tempdir().unwrap();
        sandbox(tmp.path()).prepare().await.unwrap();
        assert!(tmp.path().join("sandboxes").is_dir());
    }
}

//! Reading the bootstrap's result envelope and classifying the outcome.

use super::result::{ExecutionOutcome, ResourceKind};
use crate::runtime::OomMatcher;
use nix::sys::signal::Signal;
use serde::Deserialize;
use serde_json::Value;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::ExitStatus;

/// The JSON the bootstrap writes to `FNBOX_RESULT_PATH`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Envelope {
    ok: bool,
    #[serde(default)]
    output: Value,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    stack: Option<String>,
    #[serde(default)]
    kind: Option<String>,
}

/// What was found at the result path.
#[derive(Debug, Clone, PartialEq)]
pub enum EnvelopeRead {
    /// Nothing was written
    Missing,
    /// The envelope exceeded the output limit
    TooLarge {
        /// Size on disk
        bytes: u64,
        /// Configured limit
        limit: usize,
    },
    /// The file was not a valid envelope
    Invalid(String),
    /// A well-formed envelope
    Parsed(Envelope),
}

impl EnvelopeRead {
    /// Reads and parses the envelope, refusing files over `limit` bytes.
    pub async fn from_path(path: &Path, limit: usize) -> Self {
        let bytes = match tokio::fs::metadata(path).await {
            Ok(meta) => meta.len(),
            Err(_) => return Self::Missing,
        };
        if bytes > u64::try_from(limit).unwrap_or(u64::MAX) {
            return Self::TooLarge { bytes, limit };
        }
        match tokio::fs::read(path).await {
            Ok(raw) if raw.is_empty() => Self::Missing,
            Ok(raw) => Self::parse(&raw),
            Err(_) => Self::Missing,
        }
    }

    /// Parses raw envelope bytes.
    #[must_use]
    pub fn parse(raw: &[u8]) -> Self {
        match serde_json::from_slice::<Envelope>(raw) {
            Ok(envelope) => Self::Parsed(envelope),
            Err(e) => Self::Invalid(e.to_string()),
        }
    }
}

/// Everything known about a finished child.
#[derive(Debug)]
pub struct Observation<'a> {
    /// The wall-clock deadline fired
    pub timed_out: bool,
    /// The memory watchdog killed the group
    pub memory_killed: bool,
    /// Exit status, if the child was reaped before the deadline
    pub status: Option<ExitStatus>,
    /// The result file
    pub envelope: EnvelopeRead,
    /// Captured logs
    pub logs: &'a str,
    /// The runtime's OOM markers
    pub oom: &'a OomMatcher,
    /// The deadline applied
    pub timeout_ms: u64,
    /// The memory ceiling applied
    pub memory_limit_mb: u32,
}

impl Observation<'_> {
    /// Classifies the execution.
    ///
    /// Kills we caused win over anything the child reported; a well-formed
    /// envelope wins over the exit status.
    #[must_use]
    pub fn classify(self) -> ExecutionOutcome {
        if self.timed_out {
            return ExecutionOutcome::Timeout {
                timeout_ms: self.timeout_ms,
            };
        }
        if self.memory_killed {
            return ExecutionOutcome::out_of_memory(self.memory_limit_mb);
        }

        let invalid = match self.envelope {
            EnvelopeRead::Parsed(envelope) if envelope.ok => {
                return ExecutionOutcome::Success {
                    output: envelope.output,
                };
            }
            EnvelopeRead::Parsed(envelope) => {
                let kind = envelope.kind.unwrap_or_default();
                let message = envelope
                    .error
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| {
                        if kind.is_empty() {
                            "handler failed".to_string()
                        } else {
                            kind.clone()
                        }
                    });
                if self.oom.is_match(&kind)
                    || self.oom.is_match(&message)
                    || self.oom.is_match(self.logs)
                {
                    return ExecutionOutcome::out_of_memory(self.memory_limit_mb);
                }
                return ExecutionOutcome::ExecutionError {
                    message,
                    stack: envelope.stack.filter(|s| !s.is_empty()),
                };
            }
            EnvelopeRead::TooLarge { bytes, limit } => {
                return ExecutionOutcome::execution_error(format!(
                    "response of {bytes} bytes exceeds the {limit} byte limit"
                ));
            }
            EnvelopeRead::Invalid(reason) => Some(reason),
            EnvelopeRead::Missing => None,
        };

        if let Some(signal) = self.status.and_then(|s| s.signal()) {
            if signal == Signal::SIGKILL as i32 {
                return ExecutionOutcome::out_of_memory(self.memory_limit_mb);
            }
            if signal == Signal::SIGXCPU as i32 {
                return ExecutionOutcome::ResourceLimit {
                    resource: ResourceKind::Cpu,
                    message: "cpu time limit exceeded".to_string(),
                };
            }
            if signal == Signal::SIGXFSZ as i32 {
                return ExecutionOutcome::ResourceLimit {
                    resource: ResourceKind::FileSize,
                    message: "file size limit exceeded".to_string(),
                };
            }
        }
        if self.oom.is_match(self.logs) {
            return ExecutionOutcome::out_of_memory(self.memory_limit_mb);
        }
        if let Some(reason) = invalid {
            return ExecutionOutcome::execution_error(format!("invalid result envelope: {reason}"));
        }
        ExecutionOutcome::execution_error(format!(
            "process exited with {} without producing a result",
            describe(self.status)
        ))
    }
}

fn describe(status: Option<ExitStatus>) -> String {
    match status {
        Some(status) => match (status.code(), status.signal()) {
            (Some(code), _) => format!("exit code {code}"),
            (None, Some(signal)) => match Signal::try_from(signal) {
                Ok(signal) => format!("signal {}", signal.as_str()),
                Err(_) => format!("signal {signal}"),
            },
            (None, None) => "an unknown status".to_string(),
        },
        None => "an unknown status".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn observe<'a>(
        envelope: EnvelopeRead,
        status: Option<ExitStatus>,
        logs: &'a str,
        oom: &'a OomMatcher,
    ) -> Observation<'a> {
        Observation {
            timed_out: false,
            memory_killed: false,
            status,
            envelope,
            logs,
            oom,
            timeout_ms: 1000,
            memory_limit_mb: 128,
        }
    }

    fn exited(code: i32) -> Option<ExitStatus> {
        Some(ExitStatus::from_raw(code << 8))
    }

    fn signaled(signal: Signal) -> Option<ExitStatus> {
        Some(ExitStatus::from_raw(signal as i32))
    }

    fn markers() -> OomMatcher {
        OomMatcher::new(&[r"\bMemoryError\b".to_string()]).unwrap()
    }

    #[test]
    fn ok_envelope_is_success() {
        let oom = markers();
        let read = EnvelopeRead::parse(br#"{"ok":true,"output":42}"#);
        assert_eq!(
            observe(read, exited(0), "", &oom).classify(),
            ExecutionOutcome::Success { output: json!(42) }
        );
    }

    #[test]
    fn error_envelope_carries_message_and_stack() {
        let oom = markers();
        let read = EnvelopeRead::parse(
            br#"{"ok":false,"error":"boom","stack":"Error: boom\n  at handler","kind":"Error"}"#,
        );
        match observe(read, exited(1), "", &oom).classify() {
            ExecutionOutcome::ExecutionError { message, stack } => {
                assert_eq!(message, "boom");
                assert!(stack.unwrap().contains("at handler"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn timeout_wins_over_everything() {
        let oom = markers();
        let mut observation = observe(EnvelopeRead::parse(br#"{"ok":true}"#), None, "", &oom);
        observation.timed_out = true;
        observation.memory_killed = true;
        assert_eq!(
            observation.classify(),
            ExecutionOutcome::Timeout { timeout_ms: 1000 }
        );
    }

    #[test]
    fn watchdog_kill_is_memory() {
        let oom = markers();
        let mut observation = observe(EnvelopeRead::Missing, signaled(Signal::SIGKILL), "", &oom);
        observation.memory_killed = true;
        assert!(matches!(
            observation.classify(),
            ExecutionOutcome::ResourceLimit { resource: ResourceKind::Memory, .. }
        ));
    }

    #[test]
    fn memory_error_kind_is_resource_limit() {
        let oom = markers();
        let read = EnvelopeRead::parse(br#"{"ok":false,"error":"","kind":"MemoryError"}"#);
        assert!(matches!(
            observe(read, exited(1), "", &oom).classify(),
            ExecutionOutcome::ResourceLimit { resource: ResourceKind::Memory, .. }
        ));
    }

    #[test]
    fn unexplained_sigkill_is_memory() {
        let oom = markers();
        assert!(matches!(
            observe(EnvelopeRead::Missing, signaled(Signal::SIGKILL), "", &oom).classify(),
            ExecutionOutcome::ResourceLimit { resource: ResourceKind::Memory, .. }
        ));
    }

    #[test]
    fn sigxcpu_is_cpu_limit() {
        let oom = markers();
        assert!(matches!(
            observe(EnvelopeRead::Missing, signaled(Signal::SIGXCPU), "", &oom).classify(),
            ExecutionOutcome::ResourceLimit { resource: ResourceKind::Cpu, .. }
        ));
    }

    #[test]
    fn sigxfsz_is_file_size_limit() {
        let oom = markers();
        assert!(matches!(
            observe(EnvelopeRead::Missing, signaled(Signal::SIGXFSZ), "", &oom).classify(),
            ExecutionOutcome::ResourceLimit { resource: ResourceKind::FileSize, .. }
        ));
    }

    #[test]
    fn oom_marker_in_logs_is_memory() {
        let oom = markers();
        let logs = "Traceback (most recent call last):\nMemoryError\n";
        assert!(matches!(
            observe(EnvelopeRead::Missing, exited(1), logs, &oom).classify(),
            ExecutionOutcome::ResourceLimit { resource: ResourceKind::Memory, .. }
        ));
    }

    #[test]
    fn missing_envelope_reports_exit_code() {
        let oom = markers();
        assert_eq!(
            observe(EnvelopeRead::Missing, exited(3), "", &oom).classify(),
            ExecutionOutcome::execution_error(
                "process exited with exit code 3 without producing a result"
            )
        );
    }

    #[test]
    fn garbage_envelope_is_execution_error() {
        let oom = markers();
        match observe(EnvelopeRead::parse(b"not json"), exited(0), "", &oom).classify() {
            ExecutionOutcome::ExecutionError { message, .. } => {
                assert!(message.starts_with("invalid result envelope"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn oversize_envelope_is_execution_error() {
        let oom = markers();
        let read = EnvelopeRead::TooLarge { bytes: 100, limit: 10 };
        assert_eq!(
            observe(read, exited(0), "", &oom).classify(),
            ExecutionOutcome::execution_error("response of 100 bytes exceeds the 10 byte limit")
        );
    }

    #[tokio::test]
    async fn reads_envelope_from_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("result.json");
        assert_eq!(EnvelopeRead::from_path(&path, 1024).await, EnvelopeRead::Missing);

        std::fs::write(&path, br#"{"ok":true,"output":"x"}"#).unwrap();
        assert!(matches!(
            EnvelopeRead::from_path(&path, 1024).await,
            EnvelopeRead::Parsed(_)
        ));
        assert!(matches!(
            EnvelopeRead::from_path(&path, 4).await,
            EnvelopeRead::TooLarge { limit: 4, .. }
        ));
    }
}

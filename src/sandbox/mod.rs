//! Sandbox executor.
//!
//! Runs one invocation of a [`crate::build::BuildArtifact`] in an isolated,
//! resource-bounded child process and reports a structured
//! [`ExecutionResult`]. The [`SandboxExecutor`] trait is the seam the
//! orchestrator depends on; [`ProcessSandbox`] is the real implementation
//! and [`StubExecutor`] a scriptable stand-in.
//!
//! # Isolation
//!
//! - own process group, killed with `SIGKILL` on every exit path
//! - private scratch directory as cwd, `HOME` and `TMPDIR`
//! - cleared environment
//! - rlimits for CPU time, address space, open files, file size and core dumps
//! - seccomp filter denying inet sockets (Linux, `sandbox-hardening` feature)
//! - memory watchdog over the process tree

mod config;
mod context;
mod envelope;
mod error;
mod hardening;
mod limits;
mod process;
mod result;
mod stub;
mod traits;
mod watchdog;

pub use config::SandboxConfig;
pub use context::ExecutionContext;
pub use error::{SandboxError, SandboxErrorKind};
pub use hardening::{Hardening, HardeningStatus};
pub use limits::ChildLimits;
pub use process::ProcessSandbox;
pub use result::{ExecutionOutcome, ExecutionRequest, ExecutionResult, ResourceKind};
pub use stub::StubExecutor;
pub use traits::{ExecutionFuture, PrepareFuture, SandboxExecutor};

//! Resource limits applied to the sandbox child between fork and exec.

use crate::runtime::MemoryEnforcement;
use rlimit::Resource;
use std::io;

const MIB: u64 = 1024 * 1024;

/// Extra address space granted on top of the memory limit.
///
/// Interpreters map far more than they touch; without headroom a 128MB
/// limit would fail at startup rather than under load.
const ADDRESS_SPACE_HEADROOM_MB: u64 = 256;

/// rlimits for one child, computed in the parent.
///
/// Applying them only performs `setrlimit` calls, so it is safe to run in
/// `pre_exec`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildLimits {
    /// RLIMIT_CPU in seconds
    pub cpu_seconds: u64,
    /// RLIMIT_AS in bytes, when the template enforces memory by address space
    pub address_space_bytes: Option<u64>,
    /// RLIMIT_NOFILE
    pub open_files: u64,
    /// RLIMIT_FSIZE in bytes
    pub file_size_bytes: u64,
    /// RLIMIT_NPROC, when set
    pub processes: Option<u64>,
}

impl ChildLimits {
    /// Derives the limits for one invocation.
    #[must_use]
    pub fn for_invocation(
        timeout_ms: u64,
        memory_mb: u32,
        enforcement: MemoryEnforcement,
        open_files: u64,
        file_size_mb: u64,
        processes: u64,
    ) -> Self {
        let address_space_bytes = match enforcement {
            MemoryEnforcement::AddressSpace => {
                Some((u64::from(memory_mb) + ADDRESS_SPACE_HEADROOM_MB) * MIB)
            }
            MemoryEnforcement::Watchdog => None,
        };
        Self {
            cpu_seconds: timeout_ms.div_ceil(1000) + 1,
            address_space_bytes,
            open_files,
            file_size_bytes: file_size_mb.saturating_mul(MIB),
            processes: (processes > 0).then_some(processes),
        }
    }

    /// Applies the limits to the calling process.
    ///
    /// # Errors
    ///
    /// Returns the `setrlimit` error.
    pub fn apply(&self) -> io::Result<()> {
        // The soft limit must fire first so CPU exhaustion surfaces as SIGXCPU.
        Resource::CPU.set(self.cpu_seconds, self.cpu_seconds + 1)?;
        if let Some(bytes) = self.address_space_bytes {
            Resource::AS.set(bytes, bytes)?;
        }
        Resource::NOFILE.set(self.open_files, self.open_files)?;
        Resource::FSIZE.set(self.file_size_bytes, self.file_size_bytes)?;
        Resource::CORE.set(0, 0)?;
        if let Some(processes) = self.processes {
            Resource::NPROC.set(processes, processes)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_limit_rounds_up_and_adds_a_second() {
        let limits = ChildLimits::for_invocation(1000, 128, MemoryEnforcement::Watchdog, 64, 1, 0);
        assert_eq!(limits.cpu_seconds, 2);
        let limits = ChildLimits::for_invocation(1001, 128, MemoryEnforcement::Watchdog, 64, 1, 0);
        assert_eq!(limits.cpu_seconds, 3);
    }

    #[test]
    fn address_space_only_when_requested() {
        let watchdog =
            ChildLimits::for_invocation(1000, 128, MemoryEnforcement::Watchdog, 64, 1, 0);
        assert!(watchdog.address_space_bytes.is_none());

        let rlimited =
            ChildLimits::for_invocation(1000, 128, MemoryEnforcement::AddressSpace, 64, 1, 0);
        assert_eq!(rlimited.address_space_bytes, Some((128 + 256) * MIB));
    }

    #[test]
    fn zero_processes_leaves_nproc_unset() {
        let limits = ChildLimits::for_invocation(1000, 128, MemoryEnforcement::Watchdog, 64, 1, 0);
        assert!(limits.processes.is_none());
        let limits = ChildLimits::for_invocation(1000, 128, MemoryEnforcement::Watchdog, 64, 1, 32);
        assert_eq!(limits.processes, Some(32));
    }

    #[test]
    fn file_size_in_bytes() {
        let limits = ChildLimits::for_invocation(1000, 128, MemoryEnforcement::Watchdog, 64, 2, 0);
        assert_eq!(limits.file_size_bytes, 2 * MIB);
    }
}

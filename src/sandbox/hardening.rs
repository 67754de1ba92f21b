//! Network isolation for sandbox children.
//!
//! On Linux with the `sandbox-hardening` feature, children of runtimes that
//! declare `network = "deny"` get a seccomp filter that fails IPv4 and IPv6
//! socket creation with `EACCES`. Unix-domain sockets stay usable because
//! some runtimes use them internally.
//!
//! Whether the host accepts the filter is probed once per process.

use std::io;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Whether the network filter can be installed on this host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardeningStatus {
    /// The filter is installed in every network-denied child
    Active,
    /// Children run without the filter
    Unavailable,
}

#[cfg(all(target_os = "linux", feature = "sandbox-hardening"))]
mod imp {
    use seccompiler::{
        BpfProgram, SeccompAction, SeccompCmpArgLen, SeccompCmpOp, SeccompCondition,
        SeccompFilter, SeccompRule, TargetArch,
    };
    use std::collections::BTreeMap;
    use std::io;

    /// A compiled seccomp program denying inet sockets.
    pub struct NetworkFilter {
        program: BpfProgram,
    }

    impl std::fmt::Debug for NetworkFilter {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("NetworkFilter")
                .field("instructions", &self.program.len())
                .finish()
        }
    }

    impl NetworkFilter {
        pub fn compile() -> Result<Self, String> {
            let arch = TargetArch::try_from(std::env::consts::ARCH).map_err(|e| e.to_string())?;
            let family_rule = |family: libc::c_int| -> Result<SeccompRule, String> {
                let condition = SeccompCondition::new(
                    0,
                    SeccompCmpArgLen::Dword,
                    SeccompCmpOp::Eq,
                    u64::try_from(family).map_err(|e| e.to_string())?,
                )
                .map_err(|e| e.to_string())?;
                SeccompRule::new(vec![condition]).map_err(|e| e.to_string())
            };
            let rules = BTreeMap::from([(
                i64::from(libc::SYS_socket),
                vec![family_rule(libc::AF_INET)?, family_rule(libc::AF_INET6)?],
            )]);
            let filter = SeccompFilter::new(
                rules,
                SeccompAction::Allow,
                SeccompAction::Errno(u32::try_from(libc::EACCES).map_err(|e| e.to_string())?),
                arch,
            )
            .map_err(|e| e.to_string())?;
            let program: BpfProgram = filter.try_into().map_err(|e| format!("{e}"))?;
            Ok(Self { program })
        }

        /// Installs the filter in the calling process.
        ///
        /// Only issues `prctl` and `seccomp`, so it may run in `pre_exec`.
        pub fn install(&self) -> io::Result<()> {
            seccompiler::apply_filter(&self.program)
                .map_err(|_| io::Error::from(io::ErrorKind::PermissionDenied))
        }
    }
}

#[cfg(not(all(target_os = "linux", feature = "sandbox-hardening")))]
mod imp {
    use std::io;

    /// Placeholder on hosts without seccomp support.
    #[derive(Debug)]
    pub struct NetworkFilter;

    impl NetworkFilter {
        pub fn compile() -> Result<Self, String> {
            Err("seccomp support is not compiled in".to_string())
        }

        pub fn install(&self) -> io::Result<()> {
            Err(io::Error::from(io::ErrorKind::Unsupported))
        }
    }
}

pub use imp::NetworkFilter;

/// Host hardening state shared by every invocation.
#[derive(Debug)]
pub struct Hardening {
    filter: Option<Arc<NetworkFilter>>,
    status: OnceCell<HardeningStatus>,
}

impl Default for Hardening {
    fn default() -> Self {
        Self::new()
    }
}

impl Hardening {
    /// Compiles the filter. Nothing is installed until a child starts.
    #[must_use]
    pub fn new() -> Self {
        let filter = match NetworkFilter::compile() {
            Ok(filter) => Some(Arc::new(filter)),
            Err(reason) => {
                tracing::debug!(%reason, "network filter not available");
                None
            }
        };
        Self {
            filter,
            status: OnceCell::new(),
        }
    }

    /// Creates a hardening state that never installs a filter.
    #[must_use]
    pub fn disabled() -> Self {
        let status = OnceCell::new_with(Some(HardeningStatus::Unavailable));
        Self {
            filter: None,
            status,
        }
    }

    /// Probes the host once and returns the result.
    pub async fn status(&self) -> HardeningStatus {
        *self
            .status
            .get_or_init(|| async {
                let Some(filter) = self.filter.clone() else {
                    tracing::warn!(
                        "sandbox network isolation unavailable: not supported on this build"
                    );
                    return HardeningStatus::Unavailable;
                };
                match probe(filter).await {
                    Ok(()) => {
                        tracing::info!("sandbox network isolation active");
                        HardeningStatus::Active
                    }
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            "sandbox network isolation unavailable on this host"
                        );
                        HardeningStatus::Unavailable
                    }
                }
            })
            .await
    }

    /// Returns the filter if the probe succeeded.
    pub async fn active_filter(&self) -> Option<Arc<NetworkFilter>> {
        match self.status().await {
            HardeningStatus::Active => self.filter.clone(),
            HardeningStatus::Unavailable => None,
        }
    }
}

/// Starts a trivial child with the filter installed.
async fn probe(filter: Arc<NetworkFilter>) -> io::Result<()> {
    let mut cmd = tokio::process::Command::new("sh");
    cmd.args(["-c", "exit 0"])
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .kill_on_drop(true);
    // SAFETY: the closure only calls prctl and seccomp.
    unsafe {
        cmd.pre_exec(move || filter.install());
    }
    let status = cmd.status().await?;
    if status.success() {
        Ok(())
    } else {
        Err(io::Error::other(format!("probe child exited with {status}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_is_unavailable() {
        let hardening = Hardening::disabled();
        assert_eq!(hardening.status().await, HardeningStatus::Unavailable);
        assert!(hardening.active_filter().await.is_none());
    }

    #[tokio::test]
    async fn status_is_stable() {
        let hardening = Hardening::new();
        let first = hardening.status().await;
        assert_eq!(hardening.status().await, first);
    }

    #[cfg(all(target_os = "linux", feature = "sandbox-hardening"))]
    #[test]
    fn filter_compiles_on_linux() {
        assert!(NetworkFilter::compile().is_ok());
    }
}

//! Shared unit-test fixtures: a POSIX `sh` runtime that needs no toolchain.
//!
//! Handlers are shell functions that receive the payload as `$1` and print
//! their JSON result on stdout; a non-zero return makes stdout the error
//! message.

use crate::build::{ArtifactStore, BuildArtifact, BuildConfig, BuildRequest, BuildService};
use crate::function::{FunctionDefinition, FunctionSpec, ResourceBounds};
use crate::runtime::{
    CommandTemplate, MemoryEnforcement, NetworkPolicy, RuntimeKind, RuntimeLimits,
    RuntimeRegistry, RuntimeTemplate,
};
use crate::types::{FunctionId, RuntimeId};
use std::path::Path;
use std::sync::Arc;

const SH_BOOTSTRAP: &str = r#". "$FNBOX_ARTIFACT_DIR/function.sh"
payload=$(cat "$FNBOX_PAYLOAD_PATH")
if output=$("$FNBOX_HANDLER" "$payload"); then
  printf '{"ok":true,"output":%s}' "$output" > "$FNBOX_RESULT_PATH"
else
  printf '{"ok":false,"error":"%s","kind":"ShellError"}' "$output" > "$FNBOX_RESULT_PATH"
  exit 1
fi
"#;

pub(crate) fn sh_id() -> RuntimeId {
    RuntimeId::parse("sh").unwrap()
}

pub(crate) fn sh_template() -> RuntimeTemplate {
    RuntimeTemplate::new(
        sh_id(),
        "POSIX shell",
        RuntimeKind::Interpreted,
        "sh",
        "function.sh",
        CommandTemplate::toolchain(["{artifact_dir}/fnbox_bootstrap.sh"]),
    )
    .with_scaffold("fnbox_bootstrap.sh", SH_BOOTSTRAP)
    .with_build(CommandTemplate::toolchain(["-n", "{source_file}"]))
    .with_network(NetworkPolicy::Allow)
    .with_memory_enforcement(MemoryEnforcement::Watchdog)
    .with_default_limits(RuntimeLimits {
        memory_mb: 128,
        timeout_ms: 3_000,
    })
}

pub(crate) fn sh_registry() -> Arc<RuntimeRegistry> {
    Arc::new(
        RuntimeRegistry::builder()
            .with_template(sh_template())
            .build()
            .unwrap(),
    )
}

pub(crate) fn build_config(root: &Path) -> BuildConfig {
    BuildConfig {
        artifact_dir: root.join("artifacts"),
        cache_dir: root.join("cache"),
        ..BuildConfig::default()
    }
}

/// Builds `source` with handler `handler` as version 1 of a new function.
pub(crate) async fn build_sh(root: &Path, handler: &str, source: &str) -> Arc<BuildArtifact> {
    let service = BuildService::new(
        sh_registry(),
        Arc::new(ArtifactStore::new()),
        build_config(root),
    );
    let artifact = service
        .build(BuildRequest {
            function_id: FunctionId::new(),
            version: 1,
            runtime: sh_id(),
            handler: handler.to_string(),
            source: source.to_string(),
        })
        .await
        .unwrap();
    assert!(artifact.is_success(), "{:?}", artifact.diagnostic());
    artifact
}

/// Builds an echo handler into `store` and returns its active definition.
pub(crate) async fn deploy_sh(root: &Path, store: &Arc<ArtifactStore>) -> FunctionDefinition {
    let service = BuildService::new(sh_registry(), Arc::clone(store), build_config(root));
    let spec = FunctionSpec::new(
        "echo",
        "tests",
        sh_id(),
        "handler",
        "handler() { printf '%s' \"$1\"; }\n",
    );
    let mut definition =
        FunctionDefinition::create(spec, &ResourceBounds::default(), RuntimeLimits::default())
            .unwrap();
    let artifact = service
        .build(BuildRequest::for_definition(&definition))
        .await
        .unwrap();
    definition.activate(&artifact).unwrap();
    definition
}

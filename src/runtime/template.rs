//! Runtime templates.
//!
//! A [`RuntimeTemplate`] is everything the build service and the sandbox
//! need to know about a language: which toolchain to run, which files to lay
//! down next to the user's source, how to check or compile it, and how to
//! launch the result. Templates are data, so new runtimes are registered
//! rather than added as new match arms.
//!
//! Command arguments, environment values and scaffold contents may contain
//! placeholders:
//!
//! | Placeholder | Rendered | Value |
//! |---|---|---|
//! | `{source_file}` | build | the template's source file name |
//! | `{handler}` | build | the handler entry point |
//! | `{output}` | build | the artifact directory being built |
//! | `{cache_dir}` | build | the shared toolchain cache directory |
//! | `{artifact_dir}` | build | the final artifact directory |
//! | `{memory_mb}` | exec | the invocation's memory ceiling |
//! | `{timeout_ms}` | exec | the invocation's timeout |

use super::error::RuntimeError;
use crate::types::RuntimeId;
use regex::RegexSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Whether the runtime compiles ahead of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    /// Source is syntax-checked and run by an interpreter
    Interpreted,
    /// Source is compiled to a binary at build time
    Compiled,
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interpreted => write!(f, "interpreted"),
            Self::Compiled => write!(f, "compiled"),
        }
    }
}

/// Network access granted to sandboxed processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkPolicy {
    /// IPv4 and IPv6 sockets cannot be created
    #[default]
    Deny,
    /// No network restriction
    Allow,
}

/// How the memory ceiling is enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryEnforcement {
    /// `RLIMIT_AS` plus the resident-set watchdog
    #[default]
    AddressSpace,
    /// Resident-set watchdog only, for runtimes that reserve large virtual
    /// ranges up front (V8, the Go runtime)
    Watchdog,
}

/// Default resource ceilings for functions of a runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeLimits {
    /// Memory ceiling in MB
    pub memory_mb: u32,
    /// Wall-clock timeout in ms
    pub timeout_ms: u64,
}

impl Default for RuntimeLimits {
    fn default() -> Self {
        Self {
            memory_mb: 128,
            timeout_ms: 3_000,
        }
    }
}

/// A file written into the artifact directory at build time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaffoldFile {
    /// File name relative to the artifact directory
    pub path: String,
    /// Contents; build placeholders are rendered
    pub contents: String,
}

impl ScaffoldFile {
    /// Creates a scaffold file.
    #[must_use]
    pub fn new(path: impl Into<String>, contents: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            contents: contents.into(),
        }
    }
}

/// The executable a command runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Program {
    /// The runtime's toolchain (e.g. `node`)
    Toolchain,
    /// A file produced by the build, relative to the artifact directory
    Artifact(String),
}

/// A program plus argument templates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    /// What to execute
    pub program: Program,
    /// Argument templates
    pub args: Vec<String>,
}

impl CommandTemplate {
    /// A command that runs the toolchain.
    #[must_use]
    pub fn toolchain<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: Program::Toolchain,
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// A command that runs a build output.
    #[must_use]
    pub fn artifact<I, S>(file: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: Program::Artifact(file.into()),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

/// Values substituted into build-time placeholders.
#[derive(Debug, Clone, Copy)]
pub struct BuildVars<'a> {
    /// Source file name
    pub source_file: &'a str,
    /// Handler entry point
    pub handler: &'a str,
    /// Directory being built
    pub output: &'a Path,
    /// Final artifact directory
    pub artifact_dir: &'a Path,
    /// Toolchain cache directory
    pub cache_dir: &'a Path,
}

impl BuildVars<'_> {
    /// Renders every build-time placeholder in `template`.
    #[must_use]
    pub fn render(&self, template: &str) -> String {
        template
            .replace("{source_file}", self.source_file)
            .replace("{handler}", self.handler)
            .replace("{output}", &self.output.to_string_lossy())
            .replace("{artifact_dir}", &self.artifact_dir.to_string_lossy())
            .replace("{cache_dir}", &self.cache_dir.to_string_lossy())
    }
}

/// A fully resolved launch command, stored in the build artifact.
///
/// Only `{memory_mb}` and `{timeout_ms}` remain to be rendered per
/// invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Absolute path or PATH-resolved executable
    pub program: PathBuf,
    /// Argument templates
    pub args: Vec<String>,
    /// Environment templates
    pub env: BTreeMap<String, String>,
}

impl LaunchSpec {
    /// Renders the exec-time placeholders.
    #[must_use]
    pub fn render(
        &self,
        memory_mb: u32,
        timeout_ms: u64,
    ) -> (Vec<String>, BTreeMap<String, String>) {
        let memory = memory_mb.to_string();
        let timeout = timeout_ms.to_string();
        let render = |s: &String| {
            s.replace("{memory_mb}", &memory)
                .replace("{timeout_ms}", &timeout)
        };
        let args = self.args.iter().map(render).collect();
        let env = self
            .env
            .iter()
            .map(|(k, v)| (k.clone(), render(v)))
            .collect();
        (args, env)
    }
}

/// Patterns in logs or exception kinds that identify memory exhaustion.
#[derive(Debug, Clone)]
pub struct OomMatcher {
    set: RegexSet,
}

impl OomMatcher {
    /// Compiles the markers.
    ///
    /// # Errors
    ///
    /// Returns the regex error text if a marker is not a valid pattern.
    pub fn new(markers: &[String]) -> Result<Self, String> {
        RegexSet::new(markers)
            .map(|set| Self { set })
            .map_err(|e| e.to_string())
    }

    /// A matcher that never matches.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            set: RegexSet::empty(),
        }
    }

    /// Returns true if any marker occurs in `text`.
    #[must_use]
    pub fn is_match(&self, text: &str) -> bool {
        self.set.is_match(text)
    }
}

impl PartialEq for OomMatcher {
    fn eq(&self, other: &Self) -> bool {
        self.set.patterns() == other.set.patterns()
    }
}

impl Eq for OomMatcher {}

/// Everything needed to build and launch code for one runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeTemplate {
    /// Registry key
    pub id: RuntimeId,
    /// Human-readable language name
    pub language: String,
    /// Interpreted or compiled
    pub kind: RuntimeKind,
    /// Interpreter or compiler executable
    pub toolchain: PathBuf,
    /// Arguments that make the toolchain print its version
    pub probe_args: Vec<String>,
    /// File name the user's source is written to
    pub source_file: String,
    /// Support files written next to the source
    pub scaffold: Vec<ScaffoldFile>,
    /// Syntax check or compile step, run in the artifact directory
    pub build: Option<CommandTemplate>,
    /// Extra environment for the build step
    pub build_env: BTreeMap<String, String>,
    /// How an invocation is started
    pub launch: CommandTemplate,
    /// Extra environment for invocations
    pub launch_env: BTreeMap<String, String>,
    /// Network access for invocations
    pub network: NetworkPolicy,
    /// How the memory ceiling is enforced
    pub memory_enforcement: MemoryEnforcement,
    /// Patterns identifying memory exhaustion
    pub oom_markers: Vec<String>,
    /// Limits for functions that do not set their own
    pub default_limits: RuntimeLimits,
}

impl RuntimeTemplate {
    /// Creates a template with no build step, no scaffold and default limits.
    #[must_use]
    pub fn new(
        id: RuntimeId,
        language: impl Into<String>,
        kind: RuntimeKind,
        toolchain: impl Into<PathBuf>,
        source_file: impl Into<String>,
        launch: CommandTemplate,
    ) -> Self {
        Self {
            id,
            language: language.into(),
            kind,
            toolchain: toolchain.into(),
            probe_args: vec!["--version".to_string()],
            source_file: source_file.into(),
            scaffold: Vec::new(),
            build: None,
            build_env: BTreeMap::new(),
            launch,
            launch_env: BTreeMap::new(),
            network: NetworkPolicy::default(),
            memory_enforcement: MemoryEnforcement::default(),
            oom_markers: Vec::new(),
            default_limits: RuntimeLimits::default(),
        }
    }

    /// Adds a scaffold file.
    #[must_use]
    pub fn with_scaffold(mut self, path: impl Into<String>, contents: impl Into<String>) -> Self {
        self.scaffold.push(ScaffoldFile::new(path, contents));
        self
    }

    /// Sets the build command.
    #[must_use]
    pub fn with_build(mut self, command: CommandTemplate) -> Self {
        self.build = Some(command);
        self
    }

    /// Adds a build environment variable.
    #[must_use]
    pub fn with_build_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.build_env.insert(key.into(), value.into());
        self
    }

    /// Adds a launch environment variable.
    #[must_use]
    pub fn with_launch_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.launch_env.insert(key.into(), value.into());
        self
    }

    /// Sets the version probe arguments.
    #[must_use]
    pub fn with_probe_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.probe_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the network policy.
    #[must_use]
    pub fn with_network(mut self, network: NetworkPolicy) -> Self {
        self.network = network;
        self
    }

    /// Sets how memory is enforced.
    #[must_use]
    pub fn with_memory_enforcement(mut self, enforcement: MemoryEnforcement) -> Self {
        self.memory_enforcement = enforcement;
        self
    }

    /// Adds an out-of-memory marker pattern.
    #[must_use]
    pub fn with_oom_marker(mut self, pattern: impl Into<String>) -> Self {
        self.oom_markers.push(pattern.into());
        self
    }

    /// Sets the default limits.
    #[must_use]
    pub fn with_default_limits(mut self, limits: RuntimeLimits) -> Self {
        self.default_limits = limits;
        self
    }

    /// Compiles the OOM markers.
    ///
    /// # Errors
    ///
    /// Returns `RuntimeError::InvalidTemplate` if a marker is not a valid regex.
    pub fn oom_matcher(&self) -> Result<OomMatcher, RuntimeError> {
        OomMatcher::new(&self.oom_markers).map_err(|reason| {
            RuntimeError::invalid_template(self.id.clone(), format!("invalid oom marker: {reason}"))
        })
    }

    /// Resolves the launch command against a finished artifact directory.
    #[must_use]
    pub fn launch_spec(&self, vars: &BuildVars<'_>) -> LaunchSpec {
        let program = match &self.launch.program {
            Program::Toolchain => self.toolchain.clone(),
            Program::Artifact(file) => vars.artifact_dir.join(file),
        };
        LaunchSpec {
            program,
            args: self.launch.args.iter().map(|a| vars.render(a)).collect(),
            env: self
                .launch_env
                .iter()
                .map(|(k, v)| (k.clone(), vars.render(v)))
                .collect(),
        }
    }

    /// Checks the template for values that would escape the artifact directory.
    ///
    /// # Errors
    ///
    /// Returns `RuntimeError::InvalidTemplate` describing the first problem.
    pub fn validate(&self) -> Result<(), RuntimeError> {
        let invalid = |reason: String| RuntimeError::invalid_template(self.id.clone(), reason);

        if self.toolchain.as_os_str().is_empty() {
            return Err(invalid("toolchain cannot be empty".into()));
        }
        if !is_plain_file_name(&self.source_file) {
            return Err(invalid(format!(
                "source file '{}' must be a plain file name",
                self.source_file
            )));
        }
        for file in &self.scaffold {
            if !is_plain_file_name(&file.path) {
                return Err(invalid(format!(
                    "scaffold file '{}' must be a plain file name",
                    file.path
                )));
            }
            if file.path == self.source_file {
                return Err(invalid(format!(
                    "scaffold file '{}' would overwrite the source file",
                    file.path
                )));
            }
        }
        if let Program::Artifact(file) = &self.launch.program {
            if !is_plain_file_name(file) {
                return Err(invalid(format!("launch program '{file}' must be a plain file name")));
            }
        }
        if self.kind == RuntimeKind::Compiled && self.build.is_none() {
            return Err(invalid("compiled runtimes need a build command".into()));
        }
        if self.default_limits.memory_mb == 0 || self.default_limits.timeout_ms == 0 {
            return Err(invalid("default limits must be greater than zero".into()));
        }
        self.oom_matcher().map(|_| ())
    }
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\', '\0'])
}

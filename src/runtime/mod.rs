//! Runtime registry and templates.
//!
//! A runtime identifier such as `node20` resolves to a [`RuntimeTemplate`]
//! describing the toolchain, the build step and the launch command. Unknown
//! identifiers fail with [`RuntimeError`]; there is no default runtime.
//!
//! # Example
//!
//! ```rust
//! use fnbox::runtime::RuntimeRegistry;
//! use fnbox::types::RuntimeId;
//!
//! let registry = RuntimeRegistry::builder().with_builtins().build().unwrap();
//! let node = registry.resolve(&RuntimeId::parse("node20").unwrap()).unwrap();
//! assert_eq!(node.source_file, "index.js");
//! ```

pub mod builtin;
mod error;
mod registry;
mod template;

pub use error::{RuntimeError, RuntimeErrorKind};
pub use registry::{RegistryBuilder, RuntimeOverride, RuntimeRegistry};
pub use template::{
    BuildVars, CommandTemplate, LaunchSpec, MemoryEnforcement, NetworkPolicy, OomMatcher, Program,
    RuntimeKind, RuntimeLimits, RuntimeTemplate, ScaffoldFile,
};

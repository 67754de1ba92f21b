//! Build service and artifact store.
//!
//! [`BuildService::build`] validates or compiles one function version and
//! returns a [`BuildArtifact`]. Rejected source is a failed artifact with a
//! diagnostic, not an error. Successful artifacts are kept authoritative per
//! (function, version) in the [`ArtifactStore`].

mod artifact;
mod error;
mod service;
mod store;

pub use artifact::{
    ArtifactDir, ArtifactHandle, ArtifactSummary, BuildArtifact, BuildStatus, CodeHash,
};
pub use error::{BuildError, BuildErrorKind};
pub use service::{BuildConfig, BuildRequest, BuildService};
pub use store::ArtifactStore;

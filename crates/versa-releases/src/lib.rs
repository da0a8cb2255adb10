//! Version planning and release synchronization for versa docs.
//!
//! Resolves which documentation versions a site publishes from the
//! compatibility matrix, then fetches each version's prebuilt archive into the
//! output tree.

pub mod planner;
pub mod sync;

pub use planner::{
    check_version_name, resolve_versions, validate_latest, CompatibilityEntry, PlanError,
    VersionPlan,
};
pub use sync::{
    FailedRelease, ReleaseArtifact, ReleaseError, ReleaseSynchronizer, SyncReport, ALIAS_DIR,
    VERSION_PLACEHOLDER,
};

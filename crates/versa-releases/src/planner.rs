//! Resolution of the documentation versions to publish.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::sync::ALIAS_DIR;

/// One row of the compatibility matrix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all(serialize = "camelCase", deserialize = "snake_case"))]
pub struct CompatibilityEntry {
    /// Product release this row describes
    pub product_version: String,

    /// Documentation versions the product release supports
    #[serde(default)]
    pub api_versions: Vec<String>,
}

/// Errors raised while planning versions. All of them are configuration
/// errors and are reported before any network activity.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("The compatibility matrix does not list any documentation versions")]
    NoVersions,

    #[error("A latest version is required when several versions are published (available: {})", .available.join(", "))]
    MissingLatest { available: Vec<String> },

    #[error("Latest version '{requested}' is not one of the published versions ({})", .available.join(", "))]
    UnknownLatest {
        requested: String,
        available: Vec<String>,
    },

    #[error("'{version}' cannot be used as a version directory name")]
    InvalidVersion { version: String },
}

/// The resolved set of versions together with the validated latest designation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionPlan {
    versions: Vec<String>,
    latest: String,
}

impl VersionPlan {
    /// Resolve the versions from the compatibility matrix and validate the
    /// requested latest designation against them.
    pub fn new(
        compatibility: &[CompatibilityEntry],
        requested_latest: Option<&str>,
    ) -> Result<Self, PlanError> {
        let versions = resolve_versions(compatibility);
        for version in &versions {
            check_version_name(version)?;
        }
        let latest = validate_latest(requested_latest, &versions)?;
        Ok(Self { versions, latest })
    }

    /// Published versions, descending.
    pub fn versions(&self) -> &[String] {
        &self.versions
    }

    /// The version served from the alias directory.
    pub fn latest(&self) -> &str {
        &self.latest
    }

    /// Whether `version` is the latest designation.
    pub fn is_latest(&self, version: &str) -> bool {
        self.latest == version
    }
}

/// Union all documentation versions, deduplicate, and order them descending.
///
/// Ordering is plain string comparison, so `"10.0"` sorts below `"9.0"`.
pub fn resolve_versions(compatibility: &[CompatibilityEntry]) -> Vec<String> {
    let unique: BTreeSet<&str> = compatibility
        .iter()
        .flat_map(|entry| entry.api_versions.iter().map(String::as_str))
        .collect();

    unique.into_iter().rev().map(str::to_string).collect()
}

/// Reject identifiers that would not name exactly one directory below the
/// output root, or that would collide with the alias directory.
pub fn check_version_name(version: &str) -> Result<(), PlanError> {
    let invalid = matches!(version, "" | "." | "..")
        || version.contains(['/', '\\'])
        || version == ALIAS_DIR;

    if invalid {
        return Err(PlanError::InvalidVersion {
            version: version.to_string(),
        });
    }

    Ok(())
}

/// Pick the latest designation for `versions`.
///
/// A single published version is always the latest, whatever was requested.
pub fn validate_latest(requested: Option<&str>, versions: &[String]) -> Result<String, PlanError> {
    match versions {
        [] => Err(PlanError::NoVersions),
        [only] => {
            if let Some(requested) = requested.filter(|r| *r != only.as_str()) {
                tracing::warn!(
                    "Ignoring requested latest '{}': '{}' is the only published version",
                    requested,
                    only
                );
            }
            Ok(only.clone())
        }
        _ => match requested {
            Some(requested) if versions.iter().any(|v| v == requested) => {
                Ok(requested.to_string())
            }
            Some(requested) => Err(PlanError::UnknownLatest {
                requested: requested.to_string(),
                available: versions.to_vec(),
            }),
            None => Err(PlanError::MissingLatest {
                available: versions.to_vec(),
            }),
        },
    }
}

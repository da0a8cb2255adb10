//! Build configuration shared by every pipeline stage.

use std::path::PathBuf;
use std::time::Duration;

use versa_releases::{CompatibilityEntry, VERSION_PLACEHOLDER};

/// Configuration for building a versioned documentation site.
///
/// Assembled once by the CLI and shared read-only (behind an `Arc`) by the
/// synchronizer, the renderer, the injector and the dev server.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Template source tree
    pub source_dir: PathBuf,

    /// Assets copied verbatim into the output root
    pub static_dir: PathBuf,

    /// Output directory
    pub output_dir: PathBuf,

    /// Public base URL of the deployed site
    pub site_url: String,

    /// Requested latest version
    pub latest: Option<String>,

    /// Analytics key injected into production pages
    pub analytics_key: Option<String>,

    /// Release archive URL containing `{version}`
    pub release_url: String,

    /// Releases synchronized concurrently
    pub release_jobs: usize,

    /// Product version to documentation versions
    pub compatibility: Vec<CompatibilityEntry>,

    /// Development mode
    pub watch: bool,

    /// Preview server port
    pub port: u16,

    /// Live reload notification port
    pub live_reload_port: u16,

    /// Quiet period before a source change triggers a rebuild
    pub debounce: Duration,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("src"),
            static_dir: PathBuf::from("static"),
            output_dir: PathBuf::from("dist"),
            site_url: "http://localhost:8080".to_string(),
            latest: None,
            analytics_key: None,
            release_url: String::new(),
            release_jobs: 1,
            compatibility: vec![],
            watch: false,
            port: 8080,
            live_reload_port: 35729,
            debounce: Duration::from_millis(300),
        }
    }
}

/// Configuration problems detected before any work starts.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Source directory not found: {0}")]
    MissingSource(PathBuf),

    #[error("Source path is not a directory: {0}")]
    SourceNotDirectory(PathBuf),

    #[error("Release URL '{0}' does not contain the {{version}} placeholder")]
    MissingVersionPlaceholder(String),
}

impl BuildConfig {
    /// Check the configuration without touching the output directory.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.source_dir.exists() {
            return Err(ConfigError::MissingSource(self.source_dir.clone()));
        }

        if !self.source_dir.is_dir() {
            return Err(ConfigError::SourceNotDirectory(self.source_dir.clone()));
        }

        if !self.release_url.contains(VERSION_PLACEHOLDER) {
            return Err(ConfigError::MissingVersionPlaceholder(
                self.release_url.clone(),
            ));
        }

        Ok(())
    }
}

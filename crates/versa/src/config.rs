//! Project configuration (versa.toml) and command-line overrides.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use serde::Deserialize;
use versa_releases::CompatibilityEntry;
use versa_static::BuildConfig;

/// Configuration file structure (versa.toml).
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    #[serde(default)]
    site: SiteSection,
    #[serde(default)]
    releases: ReleasesSection,
    #[serde(default)]
    dev: DevSection,
    #[serde(default)]
    compatibility: Vec<CompatibilityEntry>,
}

#[derive(Debug, Deserialize)]
struct SiteSection {
    #[serde(default = "default_site_url")]
    url: String,
    #[serde(default = "default_source")]
    source: String,
    #[serde(rename = "static", default = "default_static")]
    static_dir: String,
    #[serde(default = "default_output")]
    output: String,
    latest: Option<String>,
    analytics_key: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ReleasesSection {
    #[serde(default)]
    url: String,
    jobs: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct DevSection {
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_live_reload_port")]
    live_reload_port: u16,
    #[serde(default = "default_debounce_ms")]
    debounce_ms: u64,
}

impl Default for SiteSection {
    fn default() -> Self {
        Self {
            url: default_site_url(),
            source: default_source(),
            static_dir: default_static(),
            output: default_output(),
            latest: None,
            analytics_key: None,
        }
    }
}

impl Default for DevSection {
    fn default() -> Self {
        Self {
            port: default_port(),
            live_reload_port: default_live_reload_port(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

fn default_site_url() -> String {
    "http://localhost:8080".to_string()
}
fn default_source() -> String {
    "src".to_string()
}
fn default_static() -> String {
    "static".to_string()
}
fn default_output() -> String {
    "dist".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_live_reload_port() -> u16 {
    35729
}
fn default_debounce_ms() -> u64 {
    300
}

/// Values given on the command line. Each one wins over the config file.
#[derive(Debug, Default, Args)]
pub struct Overrides {
    /// Public base URL of the deployed site
    #[arg(long)]
    pub site_url: Option<String>,

    /// Version served from the latest/ alias
    #[arg(long)]
    pub latest: Option<String>,

    /// Release archive URL containing {version}
    #[arg(long)]
    pub release_url: Option<String>,

    /// Analytics key injected into production pages
    #[arg(long)]
    pub analytics_key: Option<String>,

    /// Preview server port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Live reload port
    #[arg(long)]
    pub live_reload_port: Option<u16>,

    /// Output directory
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Template source directory
    #[arg(short, long)]
    pub source: Option<PathBuf>,
}

/// Load configuration from `path` if it exists.
///
/// Returns an error if the file exists but is malformed.
pub fn load(path: &Path) -> Result<ConfigFile> {
    if !path.exists() {
        tracing::debug!("No {} found, using defaults", path.display());
        return Ok(ConfigFile::default());
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    tracing::info!("Loaded config from {}", path.display());
    Ok(config)
}

impl ConfigFile {
    /// Merge command-line overrides into one immutable build configuration.
    pub fn into_build_config(self, overrides: &Overrides, watch: bool) -> Arc<BuildConfig> {
        let defaults = BuildConfig::default();
        let site = self.site;

        Arc::new(BuildConfig {
            source_dir: overrides
                .source
                .clone()
                .unwrap_or_else(|| PathBuf::from(site.source)),
            static_dir: PathBuf::from(site.static_dir),
            output_dir: overrides
                .output
                .clone()
                .unwrap_or_else(|| PathBuf::from(site.output)),
            site_url: overrides.site_url.clone().unwrap_or(site.url),
            latest: overrides.latest.clone().or(site.latest),
            analytics_key: overrides
                .analytics_key
                .clone()
                .or(site.analytics_key)
                .filter(|key| !key.is_empty()),
            release_url: overrides.release_url.clone().unwrap_or(self.releases.url),
            release_jobs: self.releases.jobs.unwrap_or(defaults.release_jobs).max(1),
            compatibility: self.compatibility,
            watch,
            port: overrides.port.unwrap_or(self.dev.port),
            live_reload_port: overrides.live_reload_port.unwrap_or(self.dev.live_reload_port),
            debounce: Duration::from_millis(self.dev.debounce_ms),
        })
    }
}

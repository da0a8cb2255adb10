//! Release archive synchronization.
//!
//! Every published version has a prebuilt ZIP archive hosted remotely. The
//! synchronizer downloads each archive into a temporary file inside the output
//! directory, extracts it, and deletes the archive again. The latest version is
//! extracted into [`ALIAS_DIR`] instead of a directory named after it.

use std::path::{Component, Path, PathBuf};

use futures_util::{stream, StreamExt};
use reqwest::Client;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;

use crate::planner::VersionPlan;

/// Directory that receives the latest version's content.
pub const ALIAS_DIR: &str = "latest";

/// Placeholder substituted with the version identifier in the download URL template.
pub const VERSION_PLACEHOLDER: &str = "{version}";

const ARCHIVE_PREFIX: &str = ".versa-release-";
const ARCHIVE_SUFFIX: &str = ".zip";

/// Errors for a single release. None of them abort the overall sync.
#[derive(Debug, thiserror::Error)]
pub enum ReleaseError {
    #[error("Failed to download {url}: {message}")]
    Download { url: String, message: String },

    #[error("Server returned status {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("Failed to write archive: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to extract archive: {0}")]
    Extract(String),

    #[error("Refusing to extract outside the output directory: {0}")]
    UnsafeTarget(PathBuf),
}

/// A release that was downloaded and extracted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseArtifact {
    /// Version identifier
    pub version: String,

    /// URL the archive was fetched from
    pub download_url: String,

    /// Temporary archive location; removed once extraction finished
    pub archive_path: PathBuf,

    /// Directory holding the extracted content
    pub extracted_path: PathBuf,
}

/// A release that could not be synchronized.
#[derive(Debug)]
pub struct FailedRelease {
    /// Version identifier
    pub version: String,

    /// What went wrong
    pub error: ReleaseError,
}

/// Outcome of a sync run, in plan order.
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Releases now present in the output tree
    pub synced: Vec<ReleaseArtifact>,

    /// Releases skipped for this run
    pub failed: Vec<FailedRelease>,
}

impl SyncReport {
    /// Whether every planned release was synchronized.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Downloads and extracts release archives into the output directory.
#[derive(Debug, Clone)]
pub struct ReleaseSynchronizer {
    client: Client,
    url_template: String,
    output_dir: PathBuf,
    jobs: usize,
}

impl ReleaseSynchronizer {
    /// Create a synchronizer that fetches from `url_template` into `output_dir`.
    pub fn new(url_template: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            client: Client::new(),
            url_template: url_template.into(),
            output_dir: output_dir.into(),
            jobs: 1,
        }
    }

    /// Number of releases processed concurrently. Each release owns its
    /// archive and target directory, so tasks share nothing else.
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    /// Download URL for a version.
    pub fn download_url(&self, version: &str) -> String {
        self.url_template.replace(VERSION_PLACEHOLDER, version)
    }

    /// Directory a version is extracted into.
    pub fn target_dir(&self, version: &str, plan: &VersionPlan) -> PathBuf {
        if plan.is_latest(version) {
            self.output_dir.join(ALIAS_DIR)
        } else {
            self.output_dir.join(version)
        }
    }

    /// Synchronize every version of the plan.
    ///
    /// Failures are logged and collected; they never stop the remaining versions.
    pub async fn sync(&self, plan: &VersionPlan) -> SyncReport {
        if let Err(e) = tokio::fs::create_dir_all(&self.output_dir).await {
            tracing::error!(
                "Failed to create output directory {}: {}",
                self.output_dir.display(),
                e
            );
        }

        let results: Vec<(String, Result<ReleaseArtifact, ReleaseError>)> =
            stream::iter(plan.versions())
                .map(move |version| async move {
                    let result = self.sync_release(version, plan).await;
                    (version.clone(), result)
                })
                .buffered(self.jobs)
                .collect()
                .await;

        let mut report = SyncReport::default();
        for (version, result) in results {
            match result {
                Ok(artifact) => {
                    tracing::info!(
                        "Synced release {} into {}",
                        version,
                        artifact.extracted_path.display()
                    );
                    report.synced.push(artifact);
                }
                Err(error) => {
                    tracing::error!(version = %version, error = %error, "Skipping release");
                    report.failed.push(FailedRelease { version, error });
                }
            }
        }

        report
    }

    async fn sync_release(
        &self,
        version: &str,
        plan: &VersionPlan,
    ) -> Result<ReleaseArtifact, ReleaseError> {
        let download_url = self.download_url(version);
        let extracted_path = self.target_dir(version, plan);
        if !is_direct_child(&self.output_dir, &extracted_path) {
            return Err(ReleaseError::UnsafeTarget(extracted_path));
        }

        tracing::debug!("Downloading release {} from {}", version, download_url);
        let archive = self.download(&download_url).await?;
        let archive_path = archive.path().to_path_buf();

        install_archive(archive, &extracted_path).await?;

        if plan.is_latest(version) {
            // Left behind by a run where this version was not yet the latest
            let stale = self.output_dir.join(version);
            if let Err(e) = remove_dir_if_exists(&stale).await {
                tracing::error!("Failed to remove stale release {}: {}", stale.display(), e);
            }
        }

        Ok(ReleaseArtifact {
            version: version.to_string(),
            download_url,
            archive_path,
            extracted_path,
        })
    }

    /// Stream the archive at `url` into a temporary file in the output directory.
    ///
    /// The temporary file is deleted on drop, so an interrupted download leaves
    /// nothing behind.
    async fn download(&self, url: &str) -> Result<NamedTempFile, ReleaseError> {
        let download_error = |e: reqwest::Error| ReleaseError::Download {
            url: url.to_string(),
            message: e.to_string(),
        };

        let response = self.client.get(url).send().await.map_err(download_error)?;

        if !response.status().is_success() {
            return Err(ReleaseError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let archive = tempfile::Builder::new()
            .prefix(ARCHIVE_PREFIX)
            .suffix(ARCHIVE_SUFFIX)
            .tempfile_in(&self.output_dir)?;

        let mut file = tokio::fs::File::from_std(archive.as_file().try_clone()?);
        let mut body = response.bytes_stream();

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(download_error)?;
            file.write_all(&chunk).await?;
        }

        file.flush().await?;

        Ok(archive)
    }
}

/// Extract `archive` into `target`, then delete the archive whatever the outcome.
///
/// A stale `target` from an earlier run is replaced. If extraction fails the
/// partially written `target` is removed again.
async fn install_archive(archive: NamedTempFile, target: &Path) -> Result<(), ReleaseError> {
    remove_dir_if_exists(target).await?;

    let archive_path = archive.path().to_path_buf();
    let dest = target.to_path_buf();
    let extracted = tokio::task::spawn_blocking(move || extract_zip(&archive_path, &dest))
        .await
        .map_err(|e| ReleaseError::Extract(e.to_string()))
        .and_then(|result| result);

    let archive_path = archive.path().to_path_buf();
    if let Err(e) = archive.close() {
        tracing::error!(
            "Failed to remove temporary archive {}: {}",
            archive_path.display(),
            e
        );
    }

    if extracted.is_err() {
        if let Err(e) = remove_dir_if_exists(target).await {
            tracing::error!(
                "Failed to clean up partial release {}: {}",
                target.display(),
                e
            );
        }
    }

    extracted
}

fn extract_zip(archive: &Path, target: &Path) -> Result<(), ReleaseError> {
    let file = std::fs::File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| ReleaseError::Extract(e.to_string()))?;

    std::fs::create_dir_all(target)?;
    zip.extract(target)
        .map_err(|e| ReleaseError::Extract(e.to_string()))
}

/// Whether `dir` names exactly one directory directly below `root`.
fn is_direct_child(root: &Path, dir: &Path) -> bool {
    dir.parent() == Some(root) && matches!(dir.components().next_back(), Some(Component::Normal(_)))
}

async fn remove_dir_if_exists(dir: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

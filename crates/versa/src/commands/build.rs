//! Full site build command.

use std::sync::Arc;

use anyhow::Result;
use versa_static::{BuildConfig, BuildResult, StaticBuilder};

/// Run the build command.
///
/// Fails only when the configuration or the version plan is invalid. Release,
/// page and injection failures are logged and reported in the summary.
pub async fn run(config: Arc<BuildConfig>) -> Result<BuildResult> {
    tracing::info!("Building documentation site...");

    let result = StaticBuilder::new(config).build().await?;
    log_summary(&result);

    Ok(result)
}

fn log_summary(result: &BuildResult) {
    let releases = &result.releases;
    for failed in &releases.failed {
        tracing::warn!("Release {} missing from output: {}", failed.version, failed.error);
    }

    tracing::info!(
        "Built {} pages ({} failed), {}/{} releases, {} files injected in {}ms",
        result.render.pages,
        result.render.failed,
        releases.synced.len(),
        releases.synced.len() + releases.failed.len(),
        result.injected.rewritten,
        result.duration_ms
    );

    tracing::info!("Output: {}", result.output_dir.display());
}

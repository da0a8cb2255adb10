//! Full site build: plan, sync releases, render, inject.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use versa_releases::{PlanError, ReleaseSynchronizer, SyncReport, VersionPlan};

use crate::config::{BuildConfig, ConfigError};
use crate::inject::{InjectReport, ProductionVariableInjector};
use crate::renderer::{RenderPass, SiteRenderer};

/// Errors that stop a build. Both are detected before any side effect.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Plan(#[from] PlanError),
}

/// Result of a build operation.
#[derive(Debug)]
pub struct BuildResult {
    /// Versions published by this build
    pub plan: VersionPlan,

    /// Release synchronization outcome
    pub releases: SyncReport,

    /// The first render pass
    pub render: RenderPass,

    /// Placeholder substitution outcome
    pub injected: InjectReport,

    /// Total build time in milliseconds
    pub duration_ms: u64,

    /// Output directory
    pub output_dir: PathBuf,
}

/// Runs the build pipeline for one configuration.
pub struct StaticBuilder {
    config: Arc<BuildConfig>,
}

impl StaticBuilder {
    /// Create a new builder.
    pub fn new(config: Arc<BuildConfig>) -> Self {
        Self { config }
    }

    /// Validate the configuration and resolve the versions to publish.
    ///
    /// Touches neither the network nor the output directory.
    pub fn plan(&self) -> Result<VersionPlan, BuildError> {
        self.config.validate()?;

        let plan = VersionPlan::new(&self.config.compatibility, self.config.latest.as_deref())?;
        tracing::info!(
            "Publishing versions {} (latest: {})",
            plan.versions().join(", "),
            plan.latest()
        );

        Ok(plan)
    }

    /// Build the site.
    ///
    /// Only planning failures are returned; release, render and injection
    /// failures are logged and reflected in the [`BuildResult`].
    pub async fn build(&self) -> Result<BuildResult, BuildError> {
        let start = Instant::now();
        let plan = self.plan()?;

        let releases = ReleaseSynchronizer::new(&self.config.release_url, &self.config.output_dir)
            .with_jobs(self.config.release_jobs)
            .sync(&plan)
            .await;

        let render = SiteRenderer::new(Arc::clone(&self.config), plan.clone())
            .render()
            .await;

        let injected = ProductionVariableInjector::from_context(
            &self.config.output_dir,
            &render.context,
            self.config.analytics_key.as_deref(),
        )
        .run()
        .await;

        Ok(BuildResult {
            plan,
            releases,
            render,
            injected,
            duration_ms: start.elapsed().as_millis() as u64,
            output_dir: self.config.output_dir.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;
    use std::net::SocketAddr;
    use std::path::Path;

    use axum::extract::Path as UrlPath;
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};
    use axum::routing::get;
    use axum::Router;
    use tempfile::tempdir;
    use versa_releases::CompatibilityEntry;

    fn archive(page: &str) -> Vec<u8> {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        zip.start_file("index.html", zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(page.as_bytes()).unwrap();
        zip.finish().unwrap().into_inner()
    }

    async fn release(UrlPath(version): UrlPath<String>) -> Response {
        match version.as_str() {
            "1.0" => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
            v => archive(&format!("<a href=\"__VERSA_SITE_URL__/{v}/\">{v}</a>")).into_response(),
        }
    }

    async fn release_server() -> SocketAddr {
        let app = Router::new().route("/docs/{version}", get(release));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn config(root: &Path, release_url: String, latest: Option<&str>) -> BuildConfig {
        BuildConfig {
            source_dir: root.join("src"),
            static_dir: root.join("static"),
            output_dir: root.join("dist"),
            site_url: "https://docs.example.com".to_string(),
            latest: latest.map(str::to_string),
            analytics_key: Some("G-123".to_string()),
            release_url,
            compatibility: vec![
                CompatibilityEntry {
                    product_version: "5.0".to_string(),
                    api_versions: vec!["2.1".to_string(), "2.0".to_string()],
                },
                CompatibilityEntry {
                    product_version: "4.0".to_string(),
                    api_versions: vec!["2.0".to_string(), "1.0".to_string()],
                },
            ],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn builds_full_site() {
        let addr = release_server().await;
        let temp = tempdir().unwrap();
        let src = temp.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(
            src.join("index.html.jinja"),
            "{% for r in releases %}<a href=\"__VERSA_SITE_URL__/{{ r }}/\">{{ r }}</a>{% endfor %}<i>__VERSA_ANALYTICS_KEY__</i>",
        )
        .unwrap();

        let config = config(
            temp.path(),
            format!("http://{addr}/docs/{{version}}"),
            Some("2.1"),
        );
        let result = StaticBuilder::new(Arc::new(config)).build().await.unwrap();

        let out = temp.path().join("dist");
        assert_eq!(result.plan.versions(), ["2.1", "2.0", "1.0"]);
        assert_eq!(result.releases.synced.len(), 2);
        assert_eq!(result.releases.failed[0].version, "1.0");
        assert_eq!(result.render.pages, 1);
        assert_eq!(result.injected.rewritten, 3);

        assert_eq!(
            fs::read_to_string(out.join("index.html")).unwrap(),
            "<a href=\"https://docs.example.com/2.1/\">2.1</a>\
             <a href=\"https://docs.example.com/2.0/\">2.0</a>\
             <a href=\"https://docs.example.com/1.0/\">1.0</a><i>G-123</i>"
        );
        assert_eq!(
            fs::read_to_string(out.join("latest/index.html")).unwrap(),
            "<a href=\"https://docs.example.com/2.1/\">2.1</a>"
        );
        assert!(out.join("2.0/index.html").exists());
        assert!(!out.join("2.1").exists());
        assert!(!out.join("1.0").exists());
    }

    #[tokio::test]
    async fn invalid_latest_fails_before_side_effects() {
        let temp = tempdir().unwrap();
        fs::create_dir_all(temp.path().join("src")).unwrap();
        let config = config(
            temp.path(),
            "http://127.0.0.1:1/{version}".to_string(),
            Some("3.0"),
        );

        let err = StaticBuilder::new(Arc::new(config)).build().await.unwrap_err();

        assert!(matches!(err, BuildError::Plan(PlanError::UnknownLatest { .. })));
        assert!(!temp.path().join("dist").exists());
    }

    #[tokio::test]
    async fn empty_version_fails_before_side_effects() {
        let temp = tempdir().unwrap();
        fs::create_dir_all(temp.path().join("src")).unwrap();
        let mut config = config(
            temp.path(),
            "http://127.0.0.1:1/{version}".to_string(),
            Some("2.1"),
        );
        config.compatibility[1].api_versions.push(String::new());

        let err = StaticBuilder::new(Arc::new(config)).build().await.unwrap_err();

        assert!(matches!(err, BuildError::Plan(PlanError::InvalidVersion { .. })));
        assert!(!temp.path().join("dist").exists());
    }

    #[tokio::test]
    async fn missing_source_fails_before_side_effects() {
        let temp = tempdir().unwrap();
        let config = config(
            temp.path(),
            "http://127.0.0.1:1/{version}".to_string(),
            Some("2.1"),
        );

        let err = StaticBuilder::new(Arc::new(config)).build().await.unwrap_err();

        assert!(matches!(err, BuildError::Config(ConfigError::MissingSource(_))));
        assert!(!temp.path().join("dist").exists());
    }
}

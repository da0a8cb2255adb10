//! Render pass over the template source tree.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use versa_releases::VersionPlan;

use crate::assets::copy_static;
use crate::config::BuildConfig;
use crate::context::{TemplateContext, VARIABLES_FILE};
use crate::templates::{TemplateEngine, TEMPLATE_SUFFIX};

/// Errors for a single page. They are logged and never stop the pass.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("Template path is not valid UTF-8: {0}")]
    InvalidPath(PathBuf),

    #[error("Failed to render {path}: {source}")]
    Template {
        path: PathBuf,
        #[source]
        source: minijinja::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Outcome of one render pass.
#[derive(Debug, Clone)]
pub struct RenderPass {
    /// The snapshot every page of this pass was rendered against
    pub context: TemplateContext,

    /// Pages written
    pub pages: usize,

    /// Templates that failed to render or write
    pub failed: usize,

    /// Non-template files left for the static copy
    pub skipped: usize,

    /// Wall time in milliseconds
    pub duration_ms: u64,
}

/// Renders the template tree into the output directory.
#[derive(Debug, Clone)]
pub struct SiteRenderer {
    config: Arc<BuildConfig>,
    plan: VersionPlan,
}

impl SiteRenderer {
    /// Create a renderer for a validated configuration and version plan.
    pub fn new(config: Arc<BuildConfig>, plan: VersionPlan) -> Self {
        Self { config, plan }
    }

    /// The configuration this renderer was built with.
    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Copy static assets, then render every template against one fresh context.
    pub async fn render(&self) -> RenderPass {
        let start = Instant::now();

        match copy_static(&self.config.static_dir, &self.config.output_dir).await {
            Ok(count) => tracing::debug!("Copied {} static files", count),
            Err(e) => tracing::error!(
                "Failed to copy static files from {}: {}",
                self.config.static_dir.display(),
                e
            ),
        }

        let context = TemplateContext::load(&self.config, &self.plan).await;
        let engine = TemplateEngine::new(&self.config.source_dir);

        let mut pass = RenderPass {
            context,
            pages: 0,
            failed: 0,
            skipped: 0,
            duration_ms: 0,
        };

        for file in self.discover().await {
            match file {
                SourceFile::Template(path) => {
                    match self.render_page(&engine, &pass.context, &path).await {
                        Ok(output) => {
                            tracing::debug!("Rendered {}", output.display());
                            pass.pages += 1;
                        }
                        Err(e) => {
                            tracing::error!("{}", e);
                            pass.failed += 1;
                        }
                    }
                }
                SourceFile::Other(path) => {
                    tracing::warn!("Skipping non-template file {}", path.display());
                    pass.skipped += 1;
                }
            }
        }

        pass.duration_ms = start.elapsed().as_millis() as u64;
        pass
    }

    /// Walk the source tree breadth first, in name order within each directory.
    async fn discover(&self) -> Vec<SourceFile> {
        let source_dir = &self.config.source_dir;
        let declarations = source_dir.join(VARIABLES_FILE);

        let mut files = Vec::new();
        let mut queue = VecDeque::from([source_dir.clone()]);

        while let Some(dir) = queue.pop_front() {
            let entries = match read_dir_sorted(&dir).await {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::error!("Failed to read directory {}: {}", dir.display(), e);
                    continue;
                }
            };

            for (path, is_dir) in entries {
                if is_dir {
                    // The static tree may live inside the sources; it is copied, not rendered.
                    if path != self.config.static_dir && path != self.config.output_dir {
                        queue.push_back(path);
                    }
                } else if path == declarations {
                    continue;
                } else if is_template(&path) {
                    files.push(SourceFile::Template(path));
                } else {
                    files.push(SourceFile::Other(path));
                }
            }
        }

        files
    }

    async fn render_page(
        &self,
        engine: &TemplateEngine,
        context: &TemplateContext,
        path: &Path,
    ) -> Result<PathBuf, RenderError> {
        let relative = path
            .strip_prefix(&self.config.source_dir)
            .map_err(|_| RenderError::InvalidPath(path.to_path_buf()))?;
        let name = template_name(relative)
            .ok_or_else(|| RenderError::InvalidPath(path.to_path_buf()))?;
        let output = output_path(&self.config.output_dir, relative)
            .ok_or_else(|| RenderError::InvalidPath(path.to_path_buf()))?;

        let html = engine
            .render(&name, context)
            .map_err(|source| RenderError::Template {
                path: path.to_path_buf(),
                source,
            })?;

        let write_error = |source| RenderError::Write {
            path: output.clone(),
            source,
        };

        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(write_error)?;
        }
        tokio::fs::write(&output, html).await.map_err(write_error)?;

        Ok(output)
    }
}

#[derive(Debug)]
enum SourceFile {
    Template(PathBuf),
    Other(PathBuf),
}

fn is_template(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.len() > TEMPLATE_SUFFIX.len() && n.ends_with(TEMPLATE_SUFFIX))
}

/// Loader name for a template: its relative path joined with `/`.
fn template_name(relative: &Path) -> Option<String> {
    let parts: Option<Vec<&str>> = relative.iter().map(|part| part.to_str()).collect();
    parts.map(|parts| parts.join("/"))
}

/// `docs/index.html.jinja` -> `<output>/docs/index.html`.
fn output_path(output_dir: &Path, relative: &Path) -> Option<PathBuf> {
    let file_name = relative.file_name()?.to_str()?;
    let stripped = file_name.strip_suffix(TEMPLATE_SUFFIX)?;
    Some(output_dir.join(relative.with_file_name(stripped)))
}

async fn read_dir_sorted(dir: &Path) -> std::io::Result<Vec<(PathBuf, bool)>> {
    let mut reader = tokio::fs::read_dir(dir).await?;
    let mut entries = Vec::new();

    while let Some(entry) = reader.next_entry().await? {
        let path = entry.path();
        let is_dir = tokio::fs::metadata(&path)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false);
        entries.push((path, is_dir));
    }

    entries.sort();
    Ok(entries)
}

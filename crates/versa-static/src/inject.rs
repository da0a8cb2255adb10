//! Substitution of deployment placeholders across the output tree.
//!
//! Release archives ship prebuilt pages that carry the same placeholder
//! tokens as the local templates, so this pass runs over the whole output
//! directory rather than over rendered pages only.

use std::io;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use walkdir::WalkDir;

use crate::context::TemplateContext;

/// Token replaced with the public site URL.
pub const SITE_URL_PLACEHOLDER: &str = "__VERSA_SITE_URL__";

/// Token replaced with the analytics key.
pub const ANALYTICS_KEY_PLACEHOLDER: &str = "__VERSA_ANALYTICS_KEY__";

/// Extensions of files that may contain placeholders.
const PAGE_EXTENSIONS: &[&str] = &["html", "htm", "xml", "txt", "js", "json", "css"];

/// Errors for a single file. Logged, never fatal.
#[derive(Debug, thiserror::Error)]
pub enum InjectError {
    #[error("Failed to scan {path}: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("Failed to rewrite {path}: {source}")]
    Rewrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Counts from one injection pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InjectReport {
    /// Candidate pages examined
    pub scanned: usize,

    /// Pages that contained at least one placeholder
    pub rewritten: usize,

    /// Files or directories that could not be processed
    pub failed: usize,
}

/// Rewrites placeholders in place under the output root.
#[derive(Debug, Clone)]
pub struct ProductionVariableInjector {
    output_dir: PathBuf,
    replacements: Vec<(Vec<u8>, Vec<u8>)>,
}

impl ProductionVariableInjector {
    /// Create an injector. A missing analytics key substitutes an empty string.
    pub fn new(output_dir: impl Into<PathBuf>, site_url: &str, analytics_key: Option<&str>) -> Self {
        let replacements = vec![
            (SITE_URL_PLACEHOLDER, site_url),
            (ANALYTICS_KEY_PLACEHOLDER, analytics_key.unwrap_or_default()),
        ];

        Self {
            output_dir: output_dir.into(),
            replacements: replacements
                .into_iter()
                .map(|(from, to)| (from.as_bytes().to_vec(), to.as_bytes().to_vec()))
                .collect(),
        }
    }

    /// Create an injector using the site URL of a render pass' context.
    pub fn from_context(
        output_dir: impl Into<PathBuf>,
        context: &TemplateContext,
        analytics_key: Option<&str>,
    ) -> Self {
        Self::new(output_dir, context.site_url(), analytics_key)
    }

    /// Substitute placeholders in every page under the output root.
    pub async fn run(&self) -> InjectReport {
        let mut report = InjectReport::default();

        for candidate in self.candidates() {
            let path = match candidate {
                Ok(path) => path,
                Err(e) => {
                    tracing::error!("{}", e);
                    report.failed += 1;
                    continue;
                }
            };

            report.scanned += 1;
            match self.inject_file(&path).await {
                Ok(true) => {
                    tracing::debug!("Injected production variables into {}", path.display());
                    report.rewritten += 1;
                }
                Ok(false) => {}
                Err(source) => {
                    tracing::error!("{}", InjectError::Rewrite { path, source });
                    report.failed += 1;
                }
            }
        }

        report
    }

    fn candidates(&self) -> Vec<Result<PathBuf, InjectError>> {
        WalkDir::new(&self.output_dir)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) if entry.file_type().is_file() && is_page(entry.path()) => {
                    Some(Ok(entry.into_path()))
                }
                Ok(_) => None,
                Err(source) => Some(Err(InjectError::Scan {
                    path: source
                        .path()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| self.output_dir.clone()),
                    source,
                })),
            })
            .collect()
    }

    /// Stream `path` line by line into a sibling temp file, replacing
    /// placeholders. The original is only replaced when something changed.
    async fn inject_file(&self, path: &Path) -> io::Result<bool> {
        let parent = path.parent().unwrap_or(Path::new("."));
        let temp = NamedTempFile::new_in(parent)?;

        let source = tokio::fs::File::open(path).await?;
        let permissions = source.metadata().await?.permissions();
        let mut reader = BufReader::new(source);
        let mut writer = BufWriter::new(tokio::fs::File::from_std(temp.as_file().try_clone()?));

        let mut changed = false;
        let mut line = Vec::new();
        loop {
            line.clear();
            if reader.read_until(b'\n', &mut line).await? == 0 {
                break;
            }

            match substitute(&line, &self.replacements) {
                Some(replaced) => {
                    changed = true;
                    writer.write_all(&replaced).await?;
                }
                None => writer.write_all(&line).await?,
            }
        }
        writer.flush().await?;
        drop(writer);
        drop(reader);

        if !changed {
            return Ok(false);
        }

        tokio::fs::set_permissions(temp.path(), permissions).await?;
        temp.persist(path).map_err(|e| e.error)?;

        Ok(true)
    }
}

fn is_page(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| PAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

/// Apply every replacement to `line`; `None` when nothing matched.
fn substitute(line: &[u8], replacements: &[(Vec<u8>, Vec<u8>)]) -> Option<Vec<u8>> {
    let mut current: Option<Vec<u8>> = None;

    for (from, to) in replacements {
        let haystack = current.as_deref().unwrap_or(line);
        if let Some(replaced) = replace_bytes(haystack, from, to) {
            current = Some(replaced);
        }
    }

    current
}

fn replace_bytes(haystack: &[u8], needle: &[u8], with: &[u8]) -> Option<Vec<u8>> {
    let mut next = find(haystack, needle, 0)?;
    let mut out = Vec::with_capacity(haystack.len() + with.len());
    let mut start = 0;

    loop {
        out.extend_from_slice(&haystack[start..next]);
        out.extend_from_slice(with);
        start = next + needle.len();

        match find(haystack, needle, start) {
            Some(pos) => next = pos,
            None => break,
        }
    }

    out.extend_from_slice(&haystack[start..]);
    Some(out)
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from >= haystack.len() {
        return None;
    }

    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + from)
}

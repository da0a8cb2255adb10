//! Verbatim copy of static assets into the output root.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Copy every file below `static_dir` into `output_dir`, keeping relative paths.
///
/// Returns the number of files copied. A missing static directory copies nothing.
pub async fn copy_static(static_dir: &Path, output_dir: &Path) -> io::Result<usize> {
    if !static_dir.is_dir() {
        tracing::debug!("No static directory at {}", static_dir.display());
        return Ok(0);
    }

    let from = static_dir.to_path_buf();
    let to = output_dir.to_path_buf();

    tokio::task::spawn_blocking(move || copy_tree(&from, &to))
        .await
        .map_err(io::Error::other)?
}

fn copy_tree(from: &Path, to: &Path) -> io::Result<usize> {
    let mut copied = 0;

    for entry in WalkDir::new(from).follow_links(true) {
        let entry = entry.map_err(io::Error::other)?;
        let relative = entry.path().strip_prefix(from).map_err(io::Error::other)?;
        let target: PathBuf = to.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }

    Ok(copied)
}

//! Directory listing behind a trait so file loops can be tested without disk.

use std::path::{Path, PathBuf};

use cascade_types::Result;

/// `(root, include, exclude, max_depth) → sorted paths`.
///
/// A file is selected when its path relative to `root` contains every
/// `include` substring and none of the `exclude` substrings. `max_depth` 1
/// lists only the files directly under `root`.
pub trait DirectoryListing {
    fn list(&self, root: &Path, include: &[String], exclude: &[String], max_depth: usize) -> Result<Vec<PathBuf>>;
}

/// Local filesystem walk.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalListing;

impl DirectoryListing for LocalListing {
    fn list(&self, root: &Path, include: &[String], exclude: &[String], max_depth: usize) -> Result<Vec<PathBuf>> {
        let mut found = Vec::new();
        walk(root, root, 1, max_depth, &mut found)?;
        found.retain(|path| {
            let relative = path.strip_prefix(root).unwrap_or(path).to_string_lossy();
            matches_patterns(&relative, include, exclude)
        });
        found.sort();
        Ok(found)
    }
}

fn walk(root: &Path, dir: &Path, depth: usize, max_depth: usize, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            if depth < max_depth {
                walk(root, &path, depth + 1, max_depth, out)?;
            }
        } else if file_type.is_file() {
            out.push(path);
        }
    }
    Ok(())
}

/// Every include must occur, no exclude may occur.
pub fn matches_patterns(name: &str, include: &[String], exclude: &[String]) -> bool {
    include.iter().all(|p| name.contains(p.as_str())) && !exclude.iter().any(|p| name.contains(p.as_str()))
}

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use globset::{Glob, GlobMatcher, GlobSet, GlobSetBuilder};
use tracing::info;
use walkdir::WalkDir;

use crate::paths::absolutize;

#[derive(Debug, Clone)]
pub struct DiscoverOptions {
    pub paths: Vec<PathBuf>,
    /// Glob matched against file names.
    pub pattern: String,
    pub excludes: Vec<String>,
    pub max_depth: Option<usize>,
}

impl Default for DiscoverOptions {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            pattern: "*.nwb".to_string(),
            excludes: Vec::new(),
            max_depth: None,
        }
    }
}

/// Collects input files under `options.paths`.
///
/// Explicit file arguments are taken as-is; directories are walked and their
/// files filtered by name. Results are absolute, sorted within each root, and
/// keep the order in which roots were given.
pub fn discover_files(
    options: &DiscoverOptions,
    warnings: &mut Vec<String>,
) -> Result<Vec<PathBuf>> {
    if options.paths.is_empty() {
        return Err(anyhow!("no input paths were given"));
    }

    let pattern = Glob::new(&options.pattern)
        .with_context(|| format!("invalid file pattern '{}'", options.pattern))?
        .compile_matcher();
    let excludes = ExcludeSet::new(&options.excludes)?;

    let mut files = Vec::new();
    let mut seen = HashSet::new();
    for root in &options.paths {
        let root = absolutize(root)
            .with_context(|| format!("failed to resolve {}", root.display()))?;
        if !root.exists() {
            warnings.push(format!("input path not found: {}", root.display()));
            continue;
        }

        let mut found = if root.is_file() {
            vec![root.clone()]
        } else {
            walk_root(&root, &pattern, &excludes, options.max_depth, warnings)
        };
        found.sort();
        for file in found {
            if seen.insert(file.clone()) {
                files.push(file);
            }
        }
    }

    info!(
        "discovered {} file(s) under {} path(s)",
        files.len(),
        options.paths.len()
    );
    Ok(files)
}

fn walk_root(
    root: &Path,
    pattern: &GlobMatcher,
    excludes: &ExcludeSet,
    max_depth: Option<usize>,
    warnings: &mut Vec<String>,
) -> Vec<PathBuf> {
    let mut walker = WalkDir::new(root).follow_links(true);
    if let Some(depth) = max_depth {
        walker = walker.max_depth(depth);
    }
    let iter = walker.into_iter().filter_entry(|entry| {
        if entry.depth() == 0 {
            return true;
        }
        !excludes.is_excluded(root, entry.path())
    });

    let mut files = Vec::new();
    for item in iter {
        let entry = match item {
            Ok(entry) => entry,
            Err(err) => {
                warnings.push(format!("walk error under {}: {}", root.display(), err));
                continue;
            }
        };
        if entry.file_type().is_file() && pattern.is_match(entry.file_name()) {
            files.push(entry.into_path());
        }
    }
    files
}

/// Exclude globs, matched against an entry's file name and against its path
/// below the walked root.
struct ExcludeSet {
    globset: GlobSet,
}

impl ExcludeSet {
    fn new(patterns: &[String]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns.iter().map(|pattern| pattern.trim()) {
            if pattern.is_empty() {
                continue;
            }
            let glob = Glob::new(pattern)
                .with_context(|| format!("invalid exclude glob '{pattern}'"))?;
            builder.add(glob);
        }
        let globset = builder.build().context("failed to compile exclude globs")?;
        Ok(Self { globset })
    }

    fn is_excluded(&self, root: &Path, path: &Path) -> bool {
        if self.globset.is_empty() {
            return false;
        }
        let name_matches = path
            .file_name()
            .is_some_and(|name| self.globset.is_match(name));
        name_matches
            || path
                .strip_prefix(root)
                .is_ok_and(|relative| self.globset.is_match(relative))
    }
}

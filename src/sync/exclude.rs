//! Exclude pattern matching for sync operations.
//!
//! Gitignore-style globs checked against the whole key and against each
//! of its path segments, so `node_modules` also excludes everything below it.

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};

/// Default patterns to exclude from sync operations.
///
/// Dotfiles never need listing here: hidden keys are skipped before
/// excludes are consulted.
pub const DEFAULT_EXCLUDES: &[&str] = &[
    // OS-specific
    "Thumbs.db",
    "desktop.ini",
    // Editor swap and backup files
    "*.swp",
    "*.swo",
    "*~",
    // Temporary files
    "*.tmp",
    "*.temp",
    "*.part",
];

/// Pattern matching for file exclusion.
#[derive(Debug, Clone)]
pub struct ExcludePatterns {
    /// Compiled glob set for matching.
    glob_set: GlobSet,
    /// Raw pattern strings (for display).
    patterns: Vec<String>,
}

impl Default for ExcludePatterns {
    fn default() -> Self {
        Self::new()
    }
}

impl ExcludePatterns {
    /// Create a new empty exclude pattern set.
    pub fn new() -> Self {
        Self {
            glob_set: GlobSet::empty(),
            patterns: Vec::new(),
        }
    }

    /// Build from user patterns, optionally prefixed by [`DEFAULT_EXCLUDES`].
    pub fn build<S: AsRef<str>>(patterns: &[S], use_defaults: bool) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        let mut pattern_list = Vec::new();

        let defaults: &[&str] = if use_defaults { DEFAULT_EXCLUDES } else { &[] };
        let all = defaults
            .iter()
            .copied()
            .chain(patterns.iter().map(|p| p.as_ref()));
        for pattern in all {
            let pattern = pattern.trim().trim_end_matches('/');
            if pattern.is_empty() || pattern_list.iter().any(|p| p == pattern) {
                continue;
            }
            let glob = Glob::new(pattern)
                .with_context(|| format!("Invalid exclude pattern: {}", pattern))?;
            builder.add(glob);
            pattern_list.push(pattern.to_string());
        }

        Ok(Self {
            glob_set: builder.build()?,
            patterns: pattern_list,
        })
    }

    /// Check if a key should be excluded.
    pub fn is_excluded(&self, key: &str) -> bool {
        if self.patterns.is_empty() {
            return false;
        }
        if self.glob_set.is_match(key) {
            return true;
        }

        // Each segment on its own, for patterns like "Thumbs.db" or "build"
        key.split('/').any(|segment| self.glob_set.is_match(segment))
    }

    /// Get the list of patterns.
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

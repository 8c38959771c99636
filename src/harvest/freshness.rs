//! Freshness gate
//!
//! The artifact's modification time is the only record of when an endpoint
//! was last fetched. Endpoints with a young artifact are skipped without any
//! network activity.

use crate::registry::endpoint_key;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Age classification of an on-disk artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Missing,
    Stale(Duration),
    Fresh(Duration),
}

impl Freshness {
    pub fn needs_fetch(&self) -> bool {
        !matches!(self, Self::Fresh(_))
    }
}

/// Classifies `path` against `threshold` as of `now`
///
/// An mtime in the future counts as age zero.
pub fn check(path: &Path, threshold: Duration, now: SystemTime) -> Freshness {
    let modified = match std::fs::metadata(path).and_then(|m| m.modified()) {
        Ok(modified) => modified,
        Err(_) => return Freshness::Missing,
    };

    let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
    if age > threshold {
        Freshness::Stale(age)
    } else {
        Freshness::Fresh(age)
    }
}

/// True when the artifact is missing or older than `threshold`
pub fn needs_fetch(path: &Path, threshold: Duration) -> bool {
    check(path, threshold, SystemTime::now()).needs_fetch()
}

/// `{tmp_dir}/{target}-{md5(slug)}.html`
pub fn artifact_path(tmp_dir: &Path, target: &str, slug: &str) -> PathBuf {
    tmp_dir.join(format!("{}.html", endpoint_key(target, slug)))
}

use std::{
    path::{Path, PathBuf},
    time::SystemTime,
};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{error::Result, ignore_rules::IgnoreRules};

/// Cheap proxy for file content identity: `(mtime, size)`.
///
/// A rewrite that keeps the size and lands on the same (or a clamped)
/// modification time is not detected.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fingerprint {
    /// Modification time as fractional seconds since the Unix epoch.
    pub mtime: f64,
    /// File size in bytes.
    pub size: u64,
}

impl Fingerprint {
    pub fn of(path: &Path) -> std::io::Result<Self> {
        let meta = std::fs::metadata(path)?;
        let mtime = meta
            .modified()
            .unwrap_or(SystemTime::UNIX_EPOCH)
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        Ok(Self {
            mtime,
            size: meta.len(),
        })
    }
}

/// A file that passed the ignore rules.
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    /// Fully resolved absolute path.
    pub absolute_path: PathBuf,
    /// Fingerprint taken at discovery time.
    pub fingerprint: Fingerprint,
}

/// Result of walking the tree.
#[derive(Debug, Default)]
pub struct Collected {
    pub files: Vec<DiscoveredFile>,
    /// Regular files rejected by the ignore rules.
    pub skipped: usize,
}

/// Recursively walk `root`, applying [`IgnoreRules::should_index`] to every
/// regular file found.
///
/// Directories rejected by [`IgnoreRules::should_descend`] are not entered,
/// so their files are neither listed nor counted as skipped. Symlinked
/// files are followed; symlinked directories are not, so cycles cannot
/// occur. Results are sorted by path.
pub fn collect_files(rules: &IgnoreRules, root: &Path) -> Result<Collected> {
    let canonical_root = root.canonicalize()?;
    let mut collected = Collected::default();
    walk_dir(rules, &canonical_root, &mut collected)?;
    collected
        .files
        .sort_by(|a, b| a.absolute_path.cmp(&b.absolute_path));

    info!(
        "file filter: {} indexable, {} skipped in {}",
        collected.files.len(),
        collected.skipped,
        canonical_root.display()
    );
    Ok(collected)
}

fn walk_dir(
    rules: &IgnoreRules,
    current: &Path,
    collected: &mut Collected,
) -> Result<()> {
    let entries = match std::fs::read_dir(current) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("cannot read directory {}: {e}", current.display());
            return Ok(());
        }
    };

    for entry in entries {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let path = entry.path();

        if file_type.is_dir() {
            if rules.should_descend(&path) {
                walk_dir(rules, &path, collected)?;
            } else {
                debug!("prune {}", path.display());
            }
        } else if file_type.is_symlink() {
            // Skip broken links and links to directories.
            if path.is_file() {
                consider(rules, &path, collected);
            }
        } else if file_type.is_file() {
            consider(rules, &path, collected);
        }
    }

    Ok(())
}

fn consider(rules: &IgnoreRules, path: &Path, collected: &mut Collected) {
    if let Some(reason) = rules.should_index(path) {
        debug!("skip {}: {reason}", path.display());
        collected.skipped += 1;
        return;
    }

    match Fingerprint::of(path) {
        Ok(fingerprint) => collected.files.push(DiscoveredFile {
            absolute_path: path.to_path_buf(),
            fingerprint,
        }),
        Err(_) => collected.skipped += 1,
    }
}

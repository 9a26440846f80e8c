use std::collections::HashSet;

use crate::{manifest::Manifest, walker::DiscoveredFile};

/// Result of comparing discovered files against the manifest.
#[derive(Debug, Default)]
pub struct ScanPlan {
    /// Files that are new or whose fingerprint moved.
    pub to_index: Vec<DiscoveredFile>,
    /// Eligible files already indexed at their current fingerprint.
    pub unchanged: usize,
    /// Manifest paths that are no longer eligible (deleted or now ignored).
    pub removed: Vec<String>,
}

/// Partition `discovered` into stale and unchanged files, and find manifest
/// entries that no longer have an eligible file behind them.
pub fn plan_scan(
    manifest: &Manifest,
    discovered: &[DiscoveredFile],
) -> ScanPlan {
    let mut plan = ScanPlan::default();
    let mut seen = HashSet::with_capacity(discovered.len());

    for file in discovered {
        let path = file.absolute_path.to_string_lossy().to_string();
        if manifest.needs_reindex(&path, &file.fingerprint) {
            plan.to_index.push(file.clone());
        } else {
            plan.unchanged += 1;
        }
        seen.insert(path);
    }

    plan.removed = manifest
        .paths()
        .filter(|path| !seen.contains(*path))
        .map(str::to_string)
        .collect();

    plan
}

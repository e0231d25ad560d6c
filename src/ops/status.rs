use std::collections::BTreeSet;

use crate::error::Result;
use crate::fs::{list_worktree, scan_paths};
use crate::snapshot;
use crate::store::Store;

use super::classify::classify;
use super::worker_pool;

/// describe how the worktree differs from snapshot `name`
///
/// every regular file and symlink in the worktree is considered, plus every
/// path in the snapshot. lines are `"<classification> <path>"`, sorted by path, with
/// unchanged paths left out. nothing is written.
pub fn status(store: &Store, name: &str, num_workers: usize) -> Result<Vec<String>> {
    let target = snapshot::get(store, name)?.manifest;
    let worktree = store.worktree();

    let mut scope: BTreeSet<String> = target.paths().cloned().collect();
    if worktree.exists() {
        scope.extend(list_worktree(worktree, store.path())?);
    }

    let pool = worker_pool(num_workers)?;
    let state = scan_paths(&pool, worktree, &scope)?;
    let diff = classify(&target, &state, &scope);

    Ok(diff
        .changes()
        .map(|(path, kind)| format!("{} {}", kind, path))
        .collect())
}

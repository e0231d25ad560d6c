//! the operation contract, one call per operation
//!
//! every function opens the store at `data_dir` fresh, so callers hold no
//! state between calls. errors can be flattened to `TaggedError` with
//! [`tagged`] when they have to cross a language boundary.

use std::path::{Path, PathBuf};

use crate::error::{Result, TaggedError};
use crate::ops::{self, ExtractOptions, ExtractResult, FsckReport};
use crate::snapshot::{self, SnapshotInfo};
use crate::store::Store;

/// create the on-disk layout if absent
pub fn init(data_dir: &Path, worktree_root: &Path) -> Result<()> {
    Store::init(data_dir, worktree_root)?;
    Ok(())
}

/// record `file_list` (or the whole worktree when empty) as `snapshot_name`
pub fn store(
    data_dir: &Path,
    worktree_root: &Path,
    file_list: &[PathBuf],
    snapshot_name: &str,
) -> Result<()> {
    let store = Store::open(data_dir, worktree_root)?;
    ops::store(&store, file_list, snapshot_name, 0)?;
    Ok(())
}

/// make the worktree match `snapshot_name`
pub fn extract(
    data_dir: &Path,
    worktree_root: &Path,
    snapshot_name: &str,
    options: &ExtractOptions,
) -> Result<ExtractResult> {
    let store = Store::open(data_dir, worktree_root)?;
    ops::extract(&store, snapshot_name, options)
}

/// move every loose object into a new pack
pub fn pack(
    data_dir: &Path,
    worktree_root: &Path,
    pack_name: &str,
    compression_level: i32,
    num_workers: usize,
) -> Result<()> {
    let mut store = Store::open(data_dir, worktree_root)?;
    ops::pack(&mut store, pack_name, compression_level, num_workers)?;
    Ok(())
}

/// `"<classification> <path>"` lines for every difference from `snapshot_name`
pub fn status(data_dir: &Path, worktree_root: &Path, snapshot_name: &str) -> Result<Vec<String>> {
    let store = Store::open(data_dir, worktree_root)?;
    ops::status(&store, snapshot_name, 0)
}

/// unpack `pack_name` back into loose objects
pub fn loosen(data_dir: &Path, worktree_root: &Path, pack_name: &str) -> Result<usize> {
    let mut store = Store::open(data_dir, worktree_root)?;
    ops::loosen(&mut store, pack_name)
}

/// every snapshot, sorted by name
pub fn list(data_dir: &Path, worktree_root: &Path) -> Result<Vec<SnapshotInfo>> {
    let store = Store::open(data_dir, worktree_root)?;
    snapshot::list(&store)
}

/// names of every registered pack
pub fn list_packs(data_dir: &Path, worktree_root: &Path) -> Result<Vec<String>> {
    let store = Store::open(data_dir, worktree_root)?;
    let packs = store.objects().packs();
    Ok(packs.iter().map(|p| p.name().to_string()).collect())
}

pub fn fsck(data_dir: &Path, worktree_root: &Path) -> Result<FsckReport> {
    let store = Store::open(data_dir, worktree_root)?;
    ops::fsck(&store, 0)
}

/// flatten an error into kind + message
pub fn tagged<T>(result: Result<T>) -> std::result::Result<T, TaggedError> {
    result.map_err(|e| e.to_tagged())
}

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};

use log::{debug, info, warn};
use rayon::prelude::*;
use rayon::ThreadPool;

use crate::error::{Error, IoResultExt, PathFailure, Result};
use crate::fs::{
    list_worktree, remove_worktree_file, scan_paths, write_worktree_file, write_worktree_symlink,
    WorktreeState,
};
use crate::snapshot::{self, EntryKind, Manifest};
use crate::store::Store;

use super::classify::{classify, Classification, Diff};
use super::worker_pool;

/// extract options
#[derive(Clone, Debug, Default)]
pub struct ExtractOptions {
    /// re-hash written files against the manifest before reporting success
    pub verify: bool,
    /// overwrite or delete files with local modifications
    pub force: bool,
    /// make the worktree match the target exactly, deleting untracked files;
    /// implies `force`
    pub reset: bool,
    /// worker threads for this call (0 = one per cpu)
    pub num_workers: usize,
}

/// classification counts of an extract
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExtractResult {
    pub added: usize,
    pub removed: usize,
    pub modified: usize,
}

impl ExtractResult {
    fn from_diff(diff: &Diff) -> Self {
        Self {
            added: diff.count(Classification::Added),
            removed: diff.count(Classification::Removed),
            modified: diff.count(Classification::Modified),
        }
    }
}

impl fmt::Display for ExtractResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "A {} / M {} / R {}",
            self.added, self.modified, self.removed
        )
    }
}

/// where an extract currently is
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExtractPhase {
    Idle,
    Diffing,
    Applying,
    Verifying,
    Done,
    Failed,
}

impl fmt::Display for ExtractPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExtractPhase::Idle => "idle",
            ExtractPhase::Diffing => "diffing",
            ExtractPhase::Applying => "applying",
            ExtractPhase::Verifying => "verifying",
            ExtractPhase::Done => "done",
            ExtractPhase::Failed => "failed",
        };
        f.write_str(s)
    }
}

struct Progress<'a> {
    name: &'a str,
    phase: ExtractPhase,
}

impl Progress<'_> {
    fn enter(&mut self, next: ExtractPhase) {
        debug!("extract {:?}: {} -> {}", self.name, self.phase, next);
        self.phase = next;
    }
}

/// reconcile the worktree with snapshot `name`
///
/// the returned counts are the sizes of the classification sets, so an
/// extract over an already matching worktree reports all zeros. on failure
/// HEAD is left untouched and files written before the failure stay in place.
pub fn extract(store: &Store, name: &str, opts: &ExtractOptions) -> Result<ExtractResult> {
    let mut progress = Progress {
        name,
        phase: ExtractPhase::Idle,
    };

    match run(store, name, opts, &mut progress) {
        Ok(result) => {
            progress.enter(ExtractPhase::Done);
            info!("extracted {:?}: {}", name, result);
            Ok(result)
        }
        Err(e) => {
            warn!("extract {:?} failed while {}: {}", name, progress.phase, e);
            progress.enter(ExtractPhase::Failed);
            Err(e)
        }
    }
}

fn run(
    store: &Store,
    name: &str,
    opts: &ExtractOptions,
    progress: &mut Progress<'_>,
) -> Result<ExtractResult> {
    progress.enter(ExtractPhase::Diffing);

    let target = snapshot::get(store, name)?.manifest;
    let baseline = load_baseline(store)?;
    let worktree = store.worktree();
    fs::create_dir_all(worktree).with_path(worktree)?;

    let pool = worker_pool(opts.num_workers)?;

    let mut scope: BTreeSet<String> = target.paths().chain(baseline.paths()).cloned().collect();
    if opts.reset {
        scope.extend(list_worktree(worktree, store.path())?);
    }

    let state = scan_paths(&pool, worktree, &scope)?;
    let diff = classify(&target, &state, &scope);
    let result = ExtractResult::from_diff(&diff);
    debug!("extract {:?}: {}", name, result);

    if !(opts.force || opts.reset) {
        check_conflicts(&diff, &state, &baseline)?;
    }

    progress.enter(ExtractPhase::Applying);
    apply(store, &pool, &target, &diff)?;

    if opts.verify {
        progress.enter(ExtractPhase::Verifying);
        verify(store, &pool, &target, &diff)?;
    }

    store.write_head(name)?;
    Ok(result)
}

/// manifest of the snapshot HEAD names, empty if there is none
fn load_baseline(store: &Store) -> Result<Manifest> {
    let head = match store.read_head()? {
        Some(head) => head,
        None => return Ok(Manifest::new()),
    };
    match snapshot::get(store, &head) {
        Ok(snap) => Ok(snap.manifest),
        Err(Error::SnapshotNotFound(_)) => {
            warn!("HEAD names unknown snapshot {:?}, treating worktree as untracked", head);
            Ok(Manifest::new())
        }
        Err(e) => Err(e),
    }
}

/// paths about to be overwritten or deleted whose disk state is not what the
/// baseline recorded
fn check_conflicts(diff: &Diff, state: &WorktreeState, baseline: &Manifest) -> Result<()> {
    let paths: Vec<String> = diff
        .changes()
        .filter(|(_, kind)| matches!(kind, Classification::Modified | Classification::Removed))
        .filter(|(path, _)| {
            let on_disk = state.get(path.as_str());
            match (baseline.get(path), on_disk) {
                (Some(recorded), Some(disk)) => !recorded.matches(disk),
                _ => true,
            }
        })
        .map(|(path, _)| path.clone())
        .collect();

    if paths.is_empty() {
        Ok(())
    } else {
        Err(Error::Conflict { paths })
    }
}

/// deletes first, then writes, each distributed over the pool
fn apply(store: &Store, pool: &ThreadPool, target: &Manifest, diff: &Diff) -> Result<()> {
    let worktree = store.worktree();
    let objects = store.objects();
    let applied = AtomicUsize::new(0);

    let removals: Vec<&String> = diff.paths(Classification::Removed).collect();
    let writes: Vec<&String> = diff
        .paths(Classification::Added)
        .chain(diff.paths(Classification::Modified))
        .collect();

    let mut failures: Vec<PathFailure> = pool.install(|| {
        removals
            .par_iter()
            .filter_map(|path| {
                match remove_worktree_file(worktree, &worktree.join(path.as_str())) {
                    Ok(()) => {
                        applied.fetch_add(1, Ordering::Relaxed);
                        None
                    }
                    Err(error) => Some(PathFailure {
                        path: (*path).clone(),
                        error,
                    }),
                }
            })
            .collect()
    });

    let write_failures: Vec<PathFailure> = pool.install(|| {
        writes
            .par_iter()
            .filter_map(|path| {
                let written = target
                    .get(path)
                    .ok_or_else(|| Error::InvalidPath((*path).clone()))
                    .and_then(|entry| {
                        let content = objects.get(&entry.hash)?;
                        let dest = worktree.join(path.as_str());
                        match entry.kind {
                            EntryKind::File => write_worktree_file(&dest, &content, entry.mode),
                            EntryKind::Symlink => write_worktree_symlink(&dest, &content),
                        }
                    });
                match written {
                    Ok(()) => {
                        applied.fetch_add(1, Ordering::Relaxed);
                        None
                    }
                    Err(error) => Some(PathFailure {
                        path: (*path).clone(),
                        error,
                    }),
                }
            })
            .collect()
    });
    failures.extend(write_failures);

    debug!(
        "applied {} of {} change(s)",
        applied.load(Ordering::Relaxed),
        removals.len() + writes.len()
    );

    if failures.is_empty() {
        Ok(())
    } else {
        failures.sort_by(|a, b| a.path.cmp(&b.path));
        Err(Error::Extract { failures })
    }
}

/// re-hash every written file from disk and compare with the manifest
fn verify(store: &Store, pool: &ThreadPool, target: &Manifest, diff: &Diff) -> Result<()> {
    let written: Vec<&String> = diff
        .paths(Classification::Added)
        .chain(diff.paths(Classification::Modified))
        .collect();
    let on_disk = scan_paths(pool, store.worktree(), written.iter().copied())?;

    let mut corrupt: Vec<String> = written
        .into_iter()
        .filter(|path| match (target.get(path), on_disk.get(path.as_str())) {
            (Some(want), Some(have)) => want.hash != have.hash || want.kind != have.kind,
            _ => true,
        })
        .cloned()
        .collect();

    if corrupt.is_empty() {
        Ok(())
    } else {
        corrupt.sort();
        Err(Error::Corruption { paths: corrupt })
    }
}

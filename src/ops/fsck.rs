use std::fs;

use log::{info, warn};
use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::hash::{hash_file, Hash};
use crate::object::loose_path;
use crate::snapshot;
use crate::store::Store;

use super::worker_pool;

/// fsck report
#[derive(Debug, Default)]
pub struct FsckReport {
    /// loose objects re-hashed
    pub objects_checked: usize,
    /// packs whose checksum was recomputed
    pub packs_checked: usize,
    /// loose objects or packs whose bytes no longer match their name
    pub corrupt: Vec<CorruptObject>,
    /// hashes referenced by a snapshot that no object store location holds
    pub missing: Vec<MissingObject>,
}

impl FsckReport {
    pub fn is_ok(&self) -> bool {
        self.corrupt.is_empty() && self.missing.is_empty()
    }
}

#[derive(Debug)]
pub struct CorruptObject {
    /// loose object hash or pack name
    pub location: String,
    pub message: String,
}

#[derive(Debug)]
pub struct MissingObject {
    pub hash: Hash,
    pub snapshot: String,
    pub path: String,
}

/// verify store integrity; reports, never repairs
pub fn fsck(store: &Store, num_workers: usize) -> Result<FsckReport> {
    let mut report = FsckReport::default();
    let objects = store.objects();
    let pool = worker_pool(num_workers)?;

    // loose objects: file contents must hash to the file name
    let loose = objects.loose_objects()?;
    report.objects_checked = loose.len();
    let corrupt: Vec<CorruptObject> = pool.install(|| {
        loose
            .par_iter()
            .filter_map(|hash| {
                let path = loose_path(objects.root(), hash);
                match hash_file(&path) {
                    Ok(actual) if actual == *hash => None,
                    Ok(actual) => Some(CorruptObject {
                        location: hash.to_hex(),
                        message: format!("content hashes to {}", actual),
                    }),
                    Err(e) => Some(CorruptObject {
                        location: hash.to_hex(),
                        message: e.to_string(),
                    }),
                }
            })
            .collect()
    });
    report.corrupt.extend(corrupt);

    // packs: whole-file checksum
    for pack in objects.packs().iter() {
        report.packs_checked += 1;
        if let Err(e) = pack.verify() {
            report.corrupt.push(CorruptObject {
                location: format!("pack {}", pack.name()),
                message: e.to_string(),
            });
        }
    }

    // unreadable index files were skipped when the store opened
    if let Ok(entries) = fs::read_dir(store.packs_path()) {
        let registered = objects.packs().len();
        let on_disk = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map(|x| x == "idx").unwrap_or(false))
            .count();
        if on_disk != registered {
            report.corrupt.push(CorruptObject {
                location: "packs".to_string(),
                message: format!(
                    "{} index file(s) present but only {} pack(s) readable",
                    on_disk, registered
                ),
            });
        }
    }

    // every snapshot reference must resolve somewhere
    for info in snapshot::list(store)? {
        let snap = match snapshot::get(store, &info.name) {
            Ok(snap) => snap,
            Err(Error::SnapshotNotFound(_)) => {
                warn!("name table lists {:?} but its manifest is gone", info.name);
                report.corrupt.push(CorruptObject {
                    location: format!("snapshot {}", info.name),
                    message: "manifest missing".to_string(),
                });
                continue;
            }
            Err(e) => return Err(e),
        };
        for (path, entry) in snap.manifest.iter() {
            if !objects.exists(&entry.hash) {
                report.missing.push(MissingObject {
                    hash: entry.hash,
                    snapshot: info.name.clone(),
                    path: path.clone(),
                });
            }
        }
    }

    report.corrupt.sort_by(|a, b| a.location.cmp(&b.location));
    info!(
        "fsck: {} loose object(s), {} pack(s), {} corrupt, {} missing",
        report.objects_checked,
        report.packs_checked,
        report.corrupt.len(),
        report.missing.len()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{pack, store as store_op};
    use tempfile::tempdir;

    fn test_store() -> (tempfile::TempDir, Store) {
        let dir = tempdir().unwrap();
        let store = Store::init(&dir.path().join("data"), &dir.path().join("wt")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_fsck_clean_store() {
        let (_dir, mut st) = test_store();
        fs::write(st.worktree().join("a"), "a").unwrap();
        fs::write(st.worktree().join("b"), "b").unwrap();
        store_op(&st, &[], "s", 1).unwrap();
        pack(&mut st, "p", 3, 1).unwrap();
        fs::write(st.worktree().join("c"), "c").unwrap();
        store_op(&st, &[], "s2", 1).unwrap();

        let report = fsck(&st, 2).unwrap();
        assert!(report.is_ok(), "{:?}", report);
        assert_eq!(report.objects_checked, 1);
        assert_eq!(report.packs_checked, 1);
    }

    #[test]
    fn test_fsck_detects_corrupt_loose_object() {
        let (_dir, st) = test_store();
        fs::write(st.worktree().join("a"), "original").unwrap();
        let snap = store_op(&st, &[], "s", 1).unwrap();
        let hash = snap.manifest.get("a").unwrap().hash;
        fs::write(loose_path(st.objects().root(), &hash), "bit rot").unwrap();

        let report = fsck(&st, 1).unwrap();
        assert!(!report.is_ok());
        assert_eq!(report.corrupt.len(), 1);
        assert_eq!(report.corrupt[0].location, hash.to_hex());
    }

    #[test]
    fn test_fsck_detects_missing_object() {
        let (_dir, st) = test_store();
        fs::write(st.worktree().join("a"), "soon gone").unwrap();
        let snap = store_op(&st, &[], "s", 1).unwrap();
        let hash = snap.manifest.get("a").unwrap().hash;
        fs::remove_file(loose_path(st.objects().root(), &hash)).unwrap();

        let report = fsck(&st, 1).unwrap();
        assert_eq!(report.missing.len(), 1);
        assert_eq!(report.missing[0].path, "a");
        assert_eq!(report.missing[0].snapshot, "s");
    }
}

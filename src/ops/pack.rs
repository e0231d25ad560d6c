use std::collections::BTreeSet;

use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::pack::{index_path, PackWriter};
use crate::snapshot;
use crate::store::Store;

use super::worker_pool;

/// what a pack call did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PackStats {
    /// objects written into the new pack
    pub objects_packed: usize,
    /// of those, objects referenced by at least one snapshot
    pub objects_referenced: usize,
    /// loose files deleted after the pack was confirmed
    pub loose_pruned: usize,
    /// size of the pack file in bytes
    pub pack_size: u64,
}

/// move every loose object into a new pack called `name`
///
/// nothing is written when there are no loose objects. loose files are only
/// pruned once the published pack has been re-read and its checksum matched.
pub fn pack(
    store: &mut Store,
    name: &str,
    compression_level: i32,
    num_workers: usize,
) -> Result<PackStats> {
    snapshot::validate_name(name)?;

    let range = zstd::compression_level_range();
    if !range.contains(&compression_level) {
        return Err(Error::InvalidCompressionLevel {
            level: compression_level,
            min: *range.start(),
            max: *range.end(),
        });
    }

    let lock = store.lock()?;
    store.reload_packs()?;

    if index_path(&store.packs_path(), name).exists() {
        return Err(Error::PackExists(name.to_string()));
    }

    let loose = store.objects().loose_objects()?;
    if loose.is_empty() {
        warn!("no loose objects to pack, not creating {:?}", name);
        return Ok(PackStats::default());
    }

    let referenced = referenced_objects(store)?;
    let objects_referenced = loose.iter().filter(|h| referenced.contains(h)).count();
    debug!(
        "packing {} loose object(s), {} referenced by snapshots",
        loose.len(),
        objects_referenced
    );

    let pool = worker_pool(num_workers)?;
    let packs_dir = store.packs_path();
    let tmp_dir = store.tmp_path();
    let packed = PackWriter::new(&packs_dir, &tmp_dir, name, compression_level).write(
        store.objects(),
        &loose,
        &pool,
    )?;

    // register before pruning so every object stays reachable
    store.reload_packs()?;
    let packs = store.objects().packs();
    let confirmed = packs
        .iter()
        .find(|p| p.name() == name)
        .ok_or_else(|| Error::CorruptPack {
            name: name.to_string(),
            reason: "published pack did not register".to_string(),
        })?;
    confirmed.verify()?;

    let mut loose_pruned = 0;
    if store.config().pack.prune_loose {
        for hash in &loose {
            if confirmed.contains(hash) {
                store.objects().remove_loose(hash)?;
                loose_pruned += 1;
            }
        }
    }
    drop(lock);

    info!(
        "pack {:?}: {} object(s), {} loose file(s) pruned",
        name, packed.index.object_count(), loose_pruned
    );

    Ok(PackStats {
        objects_packed: packed.index.object_count(),
        objects_referenced,
        loose_pruned,
        pack_size: packed.index.pack_size,
    })
}

/// every object hash named by any snapshot manifest
pub(crate) fn referenced_objects(store: &Store) -> Result<BTreeSet<Hash>> {
    let mut referenced = BTreeSet::new();
    for info in snapshot::list(store)? {
        let snap = snapshot::get(store, &info.name)?;
        referenced.extend(snap.manifest.iter().map(|(_, e)| e.hash));
    }
    Ok(referenced)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{extract, store as store_op, ExtractOptions};
    use crate::store::INITIAL_SNAPSHOT;
    use std::fs;
    use tempfile::tempdir;

    fn test_store() -> (tempfile::TempDir, Store) {
        let dir = tempdir().unwrap();
        let store = Store::init(&dir.path().join("data"), &dir.path().join("wt")).unwrap();
        (dir, store)
    }

    fn populate(st: &Store, n: usize) {
        for i in 0..n {
            fs::write(st.worktree().join(format!("file{}", i)), format!("content {}", i)).unwrap();
        }
    }

    #[test]
    fn test_pack_prunes_loose() {
        let (_dir, mut st) = test_store();
        populate(&st, 10);
        store_op(&st, &[], "s", 2).unwrap();

        let stats = pack(&mut st, "mypack", 12, 0).unwrap();
        assert_eq!(stats.objects_packed, 10);
        assert_eq!(stats.objects_referenced, 10);
        assert_eq!(stats.loose_pruned, 10);
        assert!(st.objects().loose_objects().unwrap().is_empty());
        assert_eq!(st.objects().packs().len(), 1);
    }

    #[test]
    fn test_pack_keeps_loose_when_configured() {
        let (_dir, mut st) = test_store();
        st.config_mut().pack.prune_loose = false;
        populate(&st, 3);
        store_op(&st, &[], "s", 1).unwrap();

        let stats = pack(&mut st, "p", 3, 1).unwrap();
        assert_eq!(stats.loose_pruned, 0);
        assert_eq!(st.objects().loose_objects().unwrap().len(), 3);
    }

    #[test]
    fn test_pack_is_transparent_to_extract() {
        let (_dir, mut st) = test_store();
        populate(&st, 5);
        store_op(&st, &[], "s", 1).unwrap();
        let force = ExtractOptions {
            force: true,
            ..Default::default()
        };

        extract(&st, INITIAL_SNAPSHOT, &force).unwrap();
        let before = extract(&st, "s", &force).unwrap();

        pack(&mut st, "everything", 19, 4).unwrap();

        extract(&st, INITIAL_SNAPSHOT, &force).unwrap();
        let after = extract(&st, "s", &force).unwrap();
        assert_eq!(before, after);
        assert_eq!(
            fs::read_to_string(st.worktree().join("file3")).unwrap(),
            "content 3"
        );
    }

    #[test]
    fn test_pack_with_no_loose_objects_is_noop() {
        let (_dir, mut st) = test_store();
        let stats = pack(&mut st, "empty", 3, 1).unwrap();
        assert_eq!(stats, PackStats::default());
        assert!(!index_path(&st.packs_path(), "empty").exists());
    }

    #[test]
    fn test_pack_name_reuse() {
        let (_dir, mut st) = test_store();
        populate(&st, 1);
        store_op(&st, &[], "s", 1).unwrap();
        pack(&mut st, "dup", 3, 1).unwrap();

        fs::write(st.worktree().join("late"), "more").unwrap();
        store_op(&st, &[], "s2", 1).unwrap();
        assert!(matches!(
            pack(&mut st, "dup", 3, 1),
            Err(Error::PackExists(_))
        ));
    }

    #[test]
    fn test_pack_rejects_bad_level() {
        let (_dir, mut st) = test_store();
        let max = *zstd::compression_level_range().end();
        assert!(matches!(
            pack(&mut st, "p", max + 1, 1),
            Err(Error::InvalidCompressionLevel { .. })
        ));
        assert!(matches!(
            pack(&mut st, "", 3, 1),
            Err(Error::InvalidName(_))
        ));
    }
}

use std::collections::BTreeSet;
use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::MetadataExt;
use std::path::PathBuf;

use log::info;
use rayon::prelude::*;

use crate::error::{Error, IoResultExt, Result};
use crate::fs::{list_worktree, normalize_path};
use crate::snapshot::{self, EntryKind, Manifest, ManifestEntry, Snapshot};
use crate::store::Store;

use super::worker_pool;

/// record the listed worktree files as snapshot `name`
///
/// an empty `files` list records every regular file and symlink under the
/// worktree. symlinks are recorded by target, never followed; any other kind
/// of listed path is rejected. the store lock is held while objects and the
/// manifest are published, and HEAD moves to the new snapshot.
pub fn store(store: &Store, files: &[PathBuf], name: &str, num_workers: usize) -> Result<Snapshot> {
    snapshot::validate_name(name)?;

    let _lock = store.lock()?;

    if !store.config().snapshots.overwrite && snapshot::exists(store, name) {
        return Err(Error::SnapshotExists(name.to_string()));
    }

    let worktree = store.worktree();
    let paths: BTreeSet<String> = if files.is_empty() {
        list_worktree(worktree, store.path())?.into_iter().collect()
    } else {
        files
            .iter()
            .map(|f| normalize_path(worktree, f))
            .collect::<Result<_>>()?
    };

    let pool = worker_pool(num_workers)?;
    let objects = store.objects();
    let manifest: Manifest = pool.install(|| {
        paths
            .par_iter()
            .map(|rel| -> Result<(String, ManifestEntry)> {
                let full = worktree.join(rel);
                let meta = fs::symlink_metadata(&full).with_path(&full)?;
                let file_type = meta.file_type();

                let entry = if file_type.is_file() {
                    let (hash, size) = objects.put_file(&full)?;
                    ManifestEntry {
                        hash,
                        mode: meta.mode() & 0o7777,
                        size,
                        kind: EntryKind::File,
                    }
                } else if file_type.is_symlink() {
                    let target = fs::read_link(&full).with_path(&full)?;
                    let target = target.as_os_str().as_bytes();
                    ManifestEntry {
                        hash: objects.put(target)?,
                        mode: 0,
                        size: target.len() as u64,
                        kind: EntryKind::Symlink,
                    }
                } else {
                    return Err(Error::UnsupportedFileType(rel.clone()));
                };
                Ok((rel.clone(), entry))
            })
            .collect::<Result<Vec<_>>>()
    })?
    .into_iter()
    .collect();
    let snap = Snapshot::new(name, manifest);
    snapshot::publish(store, &snap)?;
    store.write_head(name)?;

    info!(
        "stored snapshot {:?}: {} file(s), {} bytes",
        name,
        snap.manifest.len(),
        snap.manifest.total_size()
    );
    Ok(snap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::compute_content_hash;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    fn test_store() -> (tempfile::TempDir, Store) {
        let dir = tempdir().unwrap();
        let store = Store::init(&dir.path().join("data"), &dir.path().join("wt")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_store_listed_files() {
        let (_dir, st) = test_store();
        let wt = st.worktree().to_path_buf();
        fs::write(wt.join("README.md"), "# readme").unwrap();
        fs::write(wt.join("other"), "not listed").unwrap();
        fs::set_permissions(wt.join("README.md"), fs::Permissions::from_mode(0o640)).unwrap();

        let snap = store(&st, &[PathBuf::from("README.md")], "myrevision-hash", 2).unwrap();

        assert_eq!(snap.manifest.len(), 1);
        let entry = snap.manifest.get("README.md").unwrap();
        assert_eq!(entry.hash, compute_content_hash(b"# readme"));
        assert_eq!(entry.mode, 0o640);
        assert!(st.objects().exists(&entry.hash));
        assert_eq!(st.read_head().unwrap().as_deref(), Some("myrevision-hash"));
    }

    #[test]
    fn test_store_whole_worktree() {
        let dir = tempdir().unwrap();
        let wt = dir.path().join("wt");
        // data dir nested inside the worktree must not be recorded
        let st = Store::init(&wt.join(".snapvault"), &wt).unwrap();
        fs::create_dir_all(wt.join("src/deep")).unwrap();
        fs::write(wt.join("a"), "1").unwrap();
        fs::write(wt.join("src/deep/b"), "2").unwrap();

        let snap = store(&st, &[], "all", 0).unwrap();
        let paths: Vec<&String> = snap.manifest.paths().collect();
        assert_eq!(paths, vec!["a", "src/deep/b"]);
    }

    #[test]
    fn test_store_absolute_paths() {
        let (_dir, st) = test_store();
        let wt = st.worktree().to_path_buf();
        fs::write(wt.join("abs"), "x").unwrap();

        let snap = store(&st, &[wt.join("abs")], "s", 1).unwrap();
        assert!(snap.manifest.contains("abs"));
    }

    #[test]
    fn test_store_missing_file_is_io_error() {
        let (_dir, st) = test_store();
        let err = store(&st, &[PathBuf::from("nope")], "s", 1).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
        assert!(!snapshot::exists(&st, "s"));
    }

    #[test]
    fn test_store_records_symlinks() {
        let (_dir, st) = test_store();
        let wt = st.worktree().to_path_buf();
        fs::write(wt.join("real"), "content").unwrap();
        std::os::unix::fs::symlink("real", wt.join("link")).unwrap();
        std::os::unix::fs::symlink("/no/such/target", wt.join("dangling")).unwrap();

        let snap = store(&st, &[], "links", 2).unwrap();

        assert_eq!(snap.manifest.len(), 3);
        let link = snap.manifest.get("link").unwrap();
        assert_eq!(link.kind, EntryKind::Symlink);
        assert_eq!(link.hash, compute_content_hash(b"real"));
        assert_eq!(st.objects().get(&link.hash).unwrap(), b"real");
        let dangling = snap.manifest.get("dangling").unwrap();
        assert_eq!(dangling.size, "/no/such/target".len() as u64);
        assert_eq!(snap.manifest.get("real").unwrap().kind, EntryKind::File);
    }

    #[test]
    fn test_store_rejects_listed_directory() {
        let (_dir, st) = test_store();
        fs::create_dir(st.worktree().join("subdir")).unwrap();

        let err = store(&st, &[PathBuf::from("subdir")], "s", 1).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFileType(ref p) if p == "subdir"));
        assert!(!snapshot::exists(&st, "s"));
    }

    #[test]
    fn test_store_rejects_escaping_path() {
        let (_dir, st) = test_store();
        let err = store(&st, &[PathBuf::from("../outside")], "s", 1).unwrap_err();
        assert!(matches!(err, Error::InvalidPath(_)));
    }

    #[test]
    fn test_store_invalid_name() {
        let (_dir, st) = test_store();
        assert!(matches!(
            store(&st, &[], "", 1),
            Err(Error::InvalidName(_))
        ));
    }

    #[test]
    fn test_store_overwrite_policy() {
        let (_dir, mut st) = test_store();
        let wt = st.worktree().to_path_buf();
        fs::write(wt.join("f"), "v1").unwrap();
        store(&st, &[], "same", 1).unwrap();

        // default: replace
        fs::write(wt.join("f"), "v2").unwrap();
        store(&st, &[], "same", 1).unwrap();
        let snap = snapshot::get(&st, "same").unwrap();
        assert_eq!(snap.manifest.get("f").unwrap().hash, compute_content_hash(b"v2"));

        // strict: refuse
        st.config_mut().snapshots.overwrite = false;
        fs::write(wt.join("f"), "v3").unwrap();
        assert!(matches!(
            store(&st, &[], "same", 1),
            Err(Error::SnapshotExists(_))
        ));
        let snap = snapshot::get(&st, "same").unwrap();
        assert_eq!(snap.manifest.get("f").unwrap().hash, compute_content_hash(b"v2"));
    }
}

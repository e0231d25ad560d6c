use std::ffi::OsStr;
use std::fs::{self, File, Permissions};
use std::io::Write;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::error::{IoResultExt, Result};

use super::scan::TEMP_PREFIX;

/// publish `data` at `dest` atomically: temp file -> fsync -> rename -> fsync dir
///
/// the temp file lives in `tmp_dir`, which must be on the same filesystem.
pub fn write_atomic(tmp_dir: &Path, dest: &Path, data: &[u8]) -> Result<()> {
    let tmp_path = tmp_dir.join(uuid::Uuid::new_v4().to_string());
    {
        let mut tmp_file = File::create(&tmp_path).with_path(&tmp_path)?;
        tmp_file.write_all(data).with_path(&tmp_path)?;
        tmp_file.sync_all().with_path(&tmp_path)?;
    }

    if let Err(e) = fs::rename(&tmp_path, dest).with_path(dest) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }

    if let Some(parent) = dest.parent() {
        fsync_dir(parent)?;
    }
    Ok(())
}

/// write a file into the worktree, creating parent directories as needed
///
/// content goes to a hidden sibling first and is renamed over the target, so
/// a reader never sees a half-written file.
pub fn write_worktree_file(dest: &Path, content: &[u8], mode: u32) -> Result<()> {
    let tmp_path = prepare_sibling(dest)?;
    let written = (|| {
        let mut tmp_file = File::create(&tmp_path).with_path(&tmp_path)?;
        tmp_file.write_all(content).with_path(&tmp_path)?;
        tmp_file.sync_all().with_path(&tmp_path)?;
        fs::set_permissions(&tmp_path, Permissions::from_mode(mode & 0o7777))
            .with_path(&tmp_path)?;
        fs::rename(&tmp_path, dest).with_path(dest)
    })();

    if written.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    written
}

/// create (or replace) a symlink in the worktree pointing at `target`
///
/// the link is made under a hidden sibling name and renamed over `dest`,
/// so whatever was there is swapped out in one step.
pub fn write_worktree_symlink(dest: &Path, target: &[u8]) -> Result<()> {
    let tmp_path = prepare_sibling(dest)?;
    let target = Path::new(OsStr::from_bytes(target));
    let linked = std::os::unix::fs::symlink(target, &tmp_path)
        .with_path(&tmp_path)
        .and_then(|()| fs::rename(&tmp_path, dest).with_path(dest));

    if linked.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    linked
}

/// make room for `dest` and pick a temp name next to it
fn prepare_sibling(dest: &Path) -> Result<PathBuf> {
    let parent = match dest.parent() {
        Some(p) => p,
        None => Path::new("."),
    };
    fs::create_dir_all(parent).with_path(parent)?;

    // an empty directory in the way is replaced; a populated one is an error
    // for this path
    if let Ok(meta) = fs::symlink_metadata(dest) {
        if meta.is_dir() {
            fs::remove_dir(dest).with_path(dest)?;
        }
    }

    Ok(parent.join(format!("{}{}", TEMP_PREFIX, uuid::Uuid::new_v4())))
}

/// delete a worktree file and prune directories it leaves empty, up to `root`
pub fn remove_worktree_file(root: &Path, path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(crate::Error::Io {
                path: path.to_path_buf(),
                source: e,
            })
        }
    }

    let mut dir = path.parent();
    while let Some(d) = dir {
        if d == root || !d.starts_with(root) {
            break;
        }
        // stops at the first non-empty (or already removed) directory
        if fs::remove_dir(d).is_err() {
            break;
        }
        dir = d.parent();
    }
    Ok(())
}

/// fsync a directory
pub fn fsync_dir(path: &Path) -> Result<()> {
    let dir = File::open(path).with_path(path)?;
    dir.sync_all().with_path(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::MetadataExt;
    use tempfile::tempdir;

    #[test]
    fn test_write_atomic() {
        let dir = tempdir().unwrap();
        let tmp = dir.path().join("tmp");
        fs::create_dir(&tmp).unwrap();
        let dest = dir.path().join("out");

        write_atomic(&tmp, &dest, b"first").unwrap();
        write_atomic(&tmp, &dest, b"second").unwrap();

        assert_eq!(fs::read(&dest).unwrap(), b"second");
        // no temp files left behind
        assert_eq!(fs::read_dir(&tmp).unwrap().count(), 0);
    }

    #[test]
    fn test_write_worktree_file_creates_parents() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("a/b/c.txt");

        write_worktree_file(&dest, b"deep", 0o640).unwrap();

        assert_eq!(fs::read(&dest).unwrap(), b"deep");
        assert_eq!(fs::metadata(&dest).unwrap().mode() & 0o777, 0o640);
        // only the target in its directory
        assert_eq!(fs::read_dir(dir.path().join("a/b")).unwrap().count(), 1);
    }

    #[test]
    fn test_write_worktree_file_replaces_empty_directory() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("thing");
        fs::create_dir_all(&dest).unwrap();

        write_worktree_file(&dest, b"now a file", 0o644).unwrap();
        assert!(dest.is_file());
    }

    #[test]
    fn test_write_worktree_file_keeps_populated_directory() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("thing");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("untracked"), "keep me").unwrap();

        assert!(write_worktree_file(&dest, b"file", 0o644).is_err());
        assert!(dest.join("untracked").is_file());
    }

    #[test]
    fn test_write_worktree_symlink() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("sub/link");

        write_worktree_symlink(&dest, b"../elsewhere").unwrap();
        assert_eq!(fs::read_link(&dest).unwrap(), Path::new("../elsewhere"));

        // retarget in place, then replace with a regular file
        write_worktree_symlink(&dest, b"other").unwrap();
        assert_eq!(fs::read_link(&dest).unwrap(), Path::new("other"));
        write_worktree_file(&dest, b"plain", 0o644).unwrap();
        assert!(fs::symlink_metadata(&dest).unwrap().file_type().is_file());
        assert_eq!(fs::read_dir(dir.path().join("sub")).unwrap().count(), 1);
    }

    #[test]
    fn test_write_worktree_file_does_not_follow_existing_link() {
        let dir = tempdir().unwrap();
        let outside = dir.path().join("outside");
        fs::write(&outside, "untouched").unwrap();
        let dest = dir.path().join("link");
        std::os::unix::fs::symlink(&outside, &dest).unwrap();

        write_worktree_file(&dest, b"replaced", 0o644).unwrap();
        assert_eq!(fs::read(&outside).unwrap(), b"untouched");
        assert_eq!(fs::read(&dest).unwrap(), b"replaced");
    }

    #[test]
    fn test_remove_worktree_file_prunes_empty_dirs() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("x/y")).unwrap();
        fs::write(root.join("x/y/f"), "1").unwrap();
        fs::write(root.join("x/keep"), "2").unwrap();

        remove_worktree_file(root, &root.join("x/y/f")).unwrap();

        assert!(!root.join("x/y").exists());
        assert!(root.join("x/keep").exists());
        assert!(root.exists());
    }

    #[test]
    fn test_remove_missing_file_is_ok() {
        let dir = tempdir().unwrap();
        remove_worktree_file(dir.path(), &dir.path().join("nope")).unwrap();
    }
}

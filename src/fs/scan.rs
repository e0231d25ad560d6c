use std::collections::BTreeMap;
use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::MetadataExt;
use std::path::{Component, Path};

use log::debug;
use rayon::prelude::*;
use rayon::ThreadPool;
use walkdir::WalkDir;

use crate::error::{Error, IoResultExt, Result};
use crate::hash::{compute_content_hash, hash_file, Hash};
use crate::snapshot::EntryKind;

/// prefix of in-flight files written into the worktree
pub(crate) const TEMP_PREFIX: &str = ".snapvault-";

/// observed state of one regular file or symlink in the worktree
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileState {
    pub hash: Hash,
    /// permission bits (mode & 0o7777), 0 for symlinks
    pub mode: u32,
    pub size: u64,
    pub kind: EntryKind,
}

/// worktree-relative path -> observed state, for the paths that exist
pub type WorktreeState = BTreeMap<String, FileState>;

/// turn a caller-supplied path into a worktree-relative, '/'-separated key
///
/// absolute paths must lie inside the worktree; '..' and non-UTF-8 names are
/// rejected.
pub fn normalize_path(worktree: &Path, path: &Path) -> Result<String> {
    let relative = if path.is_absolute() {
        path.strip_prefix(worktree)
            .map_err(|_| Error::InvalidPath(path.display().to_string()))?
    } else {
        path
    };

    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                let part = part
                    .to_str()
                    .ok_or_else(|| Error::InvalidPath(path.display().to_string()))?;
                parts.push(part);
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(Error::InvalidPath(path.display().to_string()));
            }
        }
    }

    if parts.is_empty() {
        return Err(Error::InvalidPath(path.display().to_string()));
    }
    Ok(parts.join("/"))
}

/// stat and hash a single worktree path
///
/// None if nothing is there or it is neither a regular file nor a symlink.
/// a symlink is hashed by its target, never followed.
fn probe(worktree: &Path, rel: &str) -> Result<Option<FileState>> {
    let full = worktree.join(rel);
    let meta = match fs::symlink_metadata(&full) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::Io { path: full, source: e }),
    };

    if meta.file_type().is_symlink() {
        let target = match fs::read_link(&full) {
            Ok(target) => target,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Io { path: full, source: e }),
        };
        let target = target.as_os_str().as_bytes();
        return Ok(Some(FileState {
            hash: compute_content_hash(target),
            mode: 0,
            size: target.len() as u64,
            kind: EntryKind::Symlink,
        }));
    }
    if !meta.file_type().is_file() {
        return Ok(None);
    }

    let hash = match hash_file(&full) {
        Ok(hash) => hash,
        // deleted between stat and read
        Err(Error::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
            return Ok(None)
        }
        Err(e) => return Err(e),
    };

    Ok(Some(FileState {
        hash,
        mode: meta.mode() & 0o7777,
        size: meta.len(),
        kind: EntryKind::File,
    }))
}

/// inspect exactly the given worktree paths, hashing in parallel
pub fn scan_paths<'a, I>(pool: &ThreadPool, worktree: &Path, paths: I) -> Result<WorktreeState>
where
    I: IntoIterator<Item = &'a String>,
{
    let paths: Vec<&String> = paths.into_iter().collect();
    let probed: Vec<(String, Option<FileState>)> = pool.install(|| {
        paths
            .par_iter()
            .map(|rel| probe(worktree, rel).map(|state| ((*rel).clone(), state)))
            .collect::<Result<Vec<_>>>()
    })?;

    Ok(probed
        .into_iter()
        .filter_map(|(path, state)| state.map(|s| (path, s)))
        .collect())
}

/// list every regular file and symlink under the worktree as a normalized path
///
/// `exclude` (typically the data directory) is skipped if it lies inside the
/// worktree. symlinks are listed but never followed; other special files are
/// not listed.
pub fn list_worktree(worktree: &Path, exclude: &Path) -> Result<Vec<String>> {
    let root = worktree.canonicalize().with_path(worktree)?;
    let exclude = exclude.canonicalize().ok();

    let mut paths = Vec::new();
    let walker = WalkDir::new(&root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| Some(e.path()) != exclude.as_deref());

    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.clone());
            Error::Io {
                path,
                source: e
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("walk error")),
            }
        })?;

        let file_type = entry.file_type();
        if !(file_type.is_file() || file_type.is_symlink()) {
            if !file_type.is_dir() {
                debug!("skipping special file {}", entry.path().display());
            }
            continue;
        }
        if entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX) {
            continue;
        }

        let rel = match entry.path().strip_prefix(&root) {
            Ok(rel) => rel,
            Err(_) => continue,
        };
        match normalize_path(&root, rel) {
            Ok(rel) => paths.push(rel),
            Err(_) => debug!("skipping unrepresentable path {}", entry.path().display()),
        }
    }

    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn pool() -> ThreadPool {
        rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap()
    }

    #[test]
    fn test_normalize_relative() {
        let wt = Path::new("/wt");
        assert_eq!(normalize_path(wt, Path::new("a/b.txt")).unwrap(), "a/b.txt");
        assert_eq!(normalize_path(wt, Path::new("./a/./b")).unwrap(), "a/b");
        assert_eq!(normalize_path(wt, Path::new("with space.txt")).unwrap(), "with space.txt");
    }

    #[test]
    fn test_normalize_absolute_inside_worktree() {
        let wt = Path::new("/wt");
        assert_eq!(normalize_path(wt, Path::new("/wt/x/y")).unwrap(), "x/y");
    }

    #[test]
    fn test_normalize_rejects_escape() {
        let wt = Path::new("/wt");
        assert!(normalize_path(wt, Path::new("../etc/passwd")).is_err());
        assert!(normalize_path(wt, Path::new("a/../../b")).is_err());
        assert!(normalize_path(wt, Path::new("/elsewhere/file")).is_err());
        assert!(normalize_path(wt, Path::new(".")).is_err());
    }

    #[test]
    fn test_scan_paths() {
        let dir = tempdir().unwrap();
        let wt = dir.path();
        fs::write(wt.join("a.txt"), "alpha").unwrap();
        fs::set_permissions(wt.join("a.txt"), fs::Permissions::from_mode(0o600)).unwrap();
        fs::create_dir(wt.join("dir")).unwrap();

        let wanted = vec!["a.txt".to_string(), "missing".to_string(), "dir".to_string()];
        let state = scan_paths(&pool(), wt, wanted.iter()).unwrap();

        assert_eq!(state.len(), 1);
        let a = state.get("a.txt").unwrap();
        assert_eq!(a.hash, compute_content_hash(b"alpha"));
        assert_eq!(a.mode, 0o600);
        assert_eq!(a.size, 5);
    }

    #[test]
    fn test_list_worktree_excludes_data_dir() {
        let dir = tempdir().unwrap();
        let wt = dir.path().join("wt");
        fs::create_dir_all(wt.join("sub")).unwrap();
        fs::create_dir_all(wt.join(".data/objects")).unwrap();
        fs::write(wt.join("top"), "1").unwrap();
        fs::write(wt.join("sub/inner"), "2").unwrap();
        fs::write(wt.join(".data/objects/blob"), "3").unwrap();
        fs::write(wt.join(".snapvault-partial"), "4").unwrap();

        let paths = list_worktree(&wt, &wt.join(".data")).unwrap();
        assert_eq!(paths, vec!["sub/inner", "top"]);
        let state = scan_paths(&pool(), &wt, paths.iter()).unwrap();
        assert_eq!(state.len(), 2);
    }

    #[test]
    fn test_symlinks_listed_not_followed() {
        let dir = tempdir().unwrap();
        let wt = dir.path().join("wt");
        fs::create_dir_all(wt.join("real_dir")).unwrap();
        fs::write(wt.join("real_dir/f"), "x").unwrap();
        fs::write(wt.join("real"), "x").unwrap();
        std::os::unix::fs::symlink("real", wt.join("link")).unwrap();
        std::os::unix::fs::symlink("real_dir", wt.join("dir_link")).unwrap();
        std::os::unix::fs::symlink("nowhere", wt.join("dangling")).unwrap();

        let paths = list_worktree(&wt, &PathBuf::from("/nonexistent")).unwrap();
        assert_eq!(paths, vec!["dangling", "dir_link", "link", "real", "real_dir/f"]);

        let state = scan_paths(&pool(), &wt, paths.iter()).unwrap();
        let link = state.get("link").unwrap();
        assert_eq!(link.kind, EntryKind::Symlink);
        assert_eq!(link.hash, compute_content_hash(b"real"));
        assert_eq!(link.size, 4);
        assert_eq!(link.mode, 0);
        assert_eq!(state.get("dangling").unwrap().hash, compute_content_hash(b"nowhere"));
        assert_eq!(state.get("real").unwrap().kind, EntryKind::File);
    }
}

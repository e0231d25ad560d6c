use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, IoResultExt, Result};
use crate::fs::write_atomic;
use crate::hash::Hash;

/// get the filesystem path to a loose object
pub fn loose_path(root: &Path, hash: &Hash) -> PathBuf {
    let (dir, file) = hash.to_path_components();
    root.join(dir).join(file)
}

/// atomic write: temp file -> fsync -> rename into the shard directory
///
/// racing writers of the same hash rename identical bytes onto the same path,
/// so whichever lands last is indistinguishable from the first.
pub(super) fn write_loose(root: &Path, tmp: &Path, hash: &Hash, content: &[u8]) -> Result<()> {
    let path = loose_path(root, hash);
    if let Some(shard) = path.parent() {
        fs::create_dir_all(shard).with_path(shard)?;
    }
    write_atomic(tmp, &path, content)
}

/// read a loose object, None if there is no loose file for it
pub(super) fn read_loose(root: &Path, hash: &Hash) -> Result<Option<Vec<u8>>> {
    let path = loose_path(root, hash);
    match fs::read(&path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::Io { path, source: e }),
    }
}

pub(super) fn remove_loose(root: &Path, hash: &Hash) -> Result<()> {
    let path = loose_path(root, hash);
    match fs::remove_file(&path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(Error::Io { path, source: e }),
    }
    // drop the shard directory once it is empty
    if let Some(shard) = path.parent() {
        let _ = fs::remove_dir(shard);
    }
    Ok(())
}

/// list every loose object under `root`, sorted by hash
pub fn list_loose(root: &Path) -> Result<Vec<Hash>> {
    let mut hashes = Vec::new();
    if !root.exists() {
        return Ok(hashes);
    }

    for shard in fs::read_dir(root).with_path(root)? {
        let shard = shard.with_path(root)?;
        let shard_path = shard.path();
        if !shard_path.is_dir() {
            continue;
        }
        let prefix = shard.file_name().to_string_lossy().into_owned();

        for entry in fs::read_dir(&shard_path).with_path(&shard_path)? {
            let entry = entry.with_path(&shard_path)?;
            let rest = entry.file_name().to_string_lossy().into_owned();
            // ignore anything that is not a well-formed object name
            if let Ok(hash) = Hash::from_hex(&format!("{}{}", prefix, rest)) {
                hashes.push(hash);
            }
        }
    }

    hashes.sort();
    Ok(hashes)
}

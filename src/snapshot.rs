//! named, immutable manifests
//!
//! a manifest lives at `snapshots/<sha256(name)>` so arbitrary names never
//! become path components. `snapshots/index` is the side table mapping each
//! literal name to its manifest file.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::fs::{write_atomic, FileState};
use crate::hash::{compute_name_hash, Hash};
use crate::store::Store;

const TABLE_FILE: &str = "index";

/// what a manifest path holds
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    #[default]
    File,
    /// the object holds the raw link target
    Symlink,
}

/// one file recorded in a manifest
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub hash: Hash,
    /// permission bits (mode & 0o7777), 0 for symlinks
    pub mode: u32,
    pub size: u64,
    #[serde(default)]
    pub kind: EntryKind,
}

impl ManifestEntry {
    /// whether the worktree already holds exactly this entry
    pub fn matches(&self, state: &FileState) -> bool {
        self.kind == state.kind && self.hash == state.hash && self.mode == state.mode
    }
}

/// worktree-relative path -> recorded file
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    entries: BTreeMap<String, ManifestEntry>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, entry: ManifestEntry) {
        self.entries.insert(path.into(), entry);
    }

    pub fn get(&self, path: &str) -> Option<&ManifestEntry> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// entries sorted by path
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ManifestEntry)> {
        self.entries.iter()
    }

    pub fn paths(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// total recorded content size
    pub fn total_size(&self) -> u64 {
        self.entries.values().map(|e| e.size).sum()
    }
}

impl FromIterator<(String, ManifestEntry)> for Manifest {
    fn from_iter<I: IntoIterator<Item = (String, ManifestEntry)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// a named manifest plus its creation time
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub name: String,
    /// unix timestamp (seconds since epoch)
    pub created: i64,
    pub manifest: Manifest,
}

impl Snapshot {
    pub fn new(name: impl Into<String>, manifest: Manifest) -> Self {
        Self {
            name: name.into(),
            created: now(),
            manifest,
        }
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut cbor_bytes = Vec::new();
        ciborium::into_writer(self, &mut cbor_bytes)?;
        zstd::encode_all(&cbor_bytes[..], 3).map_err(|e| Error::Io {
            path: PathBuf::from("<zstd>"),
            source: e,
        })
    }

    fn from_bytes(data: &[u8]) -> Result<Self> {
        let cbor_bytes = zstd::decode_all(data).map_err(|e| Error::Io {
            path: PathBuf::from("<zstd>"),
            source: e,
        })?;
        Ok(ciborium::from_reader(&cbor_bytes[..])?)
    }
}

/// row of the name table
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub name: String,
    /// manifest file name under `snapshots/`
    pub file: String,
    pub created: i64,
    pub files: usize,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct NameTable {
    snapshots: BTreeMap<String, SnapshotInfo>,
}

fn now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// validate a snapshot or pack name
///
/// anything non-empty without a NUL byte is accepted: spaces, slashes and
/// emoji are fine because names never become paths.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidName("name cannot be empty".to_string()));
    }
    if name.contains('\0') {
        return Err(Error::InvalidName(format!(
            "name cannot contain NUL: {:?}",
            name
        )));
    }
    Ok(())
}

/// manifest file name for a snapshot name
pub fn manifest_file(name: &str) -> String {
    compute_name_hash(name).to_hex()
}

fn read_table(store: &Store) -> Result<NameTable> {
    let path = store.snapshots_path().join(TABLE_FILE);
    let data = match fs::read(&path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(NameTable::default()),
        Err(e) => return Err(Error::Io { path, source: e }),
    };
    let cbor_bytes = zstd::decode_all(&data[..]).map_err(|e| Error::Io {
        path: path.clone(),
        source: e,
    })?;
    Ok(ciborium::from_reader(&cbor_bytes[..])?)
}

fn write_table(store: &Store, table: &NameTable) -> Result<()> {
    let mut cbor_bytes = Vec::new();
    ciborium::into_writer(table, &mut cbor_bytes)?;
    let compressed = zstd::encode_all(&cbor_bytes[..], 3).map_err(|e| Error::Io {
        path: PathBuf::from("<zstd>"),
        source: e,
    })?;
    write_atomic(
        &store.tmp_path(),
        &store.snapshots_path().join(TABLE_FILE),
        &compressed,
    )
}

/// persist a snapshot: manifest first, then the name table
///
/// both writes are atomic renames, so readers see either the old or the new
/// snapshot under a name, never a partial one. callers hold the store lock.
pub fn publish(store: &Store, snapshot: &Snapshot) -> Result<()> {
    validate_name(&snapshot.name)?;

    let file = manifest_file(&snapshot.name);
    write_atomic(
        &store.tmp_path(),
        &store.snapshots_path().join(&file),
        &snapshot.to_bytes()?,
    )?;

    let mut table = read_table(store)?;
    table.snapshots.insert(
        snapshot.name.clone(),
        SnapshotInfo {
            name: snapshot.name.clone(),
            file,
            created: snapshot.created,
            files: snapshot.manifest.len(),
        },
    );
    write_table(store, &table)
}

/// load a snapshot by name
pub fn get(store: &Store, name: &str) -> Result<Snapshot> {
    validate_name(name)?;

    let path = store.snapshots_path().join(manifest_file(name));
    let data = fs::read(&path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::SnapshotNotFound(name.to_string())
        } else {
            Error::Io {
                path: path.clone(),
                source: e,
            }
        }
    })?;

    let snapshot = Snapshot::from_bytes(&data)?;
    if snapshot.name != name {
        return Err(Error::InvalidStore {
            path,
            reason: format!(
                "manifest records name {:?}, expected {:?}",
                snapshot.name, name
            ),
        });
    }
    Ok(snapshot)
}

/// whether a snapshot of this name has been published
pub fn exists(store: &Store, name: &str) -> bool {
    store.snapshots_path().join(manifest_file(name)).is_file()
}

/// every published snapshot, sorted by name
pub fn list(store: &Store) -> Result<Vec<SnapshotInfo>> {
    Ok(read_table(store)?.snapshots.into_values().collect())
}

//! packs: compacted, compressed, read-only aggregations of objects
//!
//! # Layout
//!
//! - `packs/<sha256(name)>.pack`: `SVPK` magic, version, object count, then one
//!   independently zstd-compressed record per object, then a SHA-256 trailer
//!   over everything before it
//! - `packs/<sha256(name)>.idx`: CBOR + zstd `PackIndex` with the literal pack
//!   name, the pack checksum and `hash -> (offset, length, size)` entries
//!
//! a pack is registered once its `.idx` exists; the `.pack` is always
//! published first.

mod index;
mod reader;
mod writer;

pub use index::{IndexEntry, PackIndex};
pub use reader::{compute_pack_checksum, PackReader};
pub use writer::{PackFile, PackWriter};

use std::fs;
use std::path::{Path, PathBuf};

use log::warn;

use crate::error::{IoResultExt, Result};
use crate::hash::compute_name_hash;

pub(crate) const PACK_MAGIC: &[u8; 4] = b"SVPK";
pub(crate) const PACK_VERSION: u32 = 1;
/// magic + version + object count
pub(crate) const PACK_HEADER_LEN: u64 = 12;
pub(crate) const PACK_TRAILER_LEN: u64 = 32;

/// on-disk file stem for a pack name
pub fn pack_stem(name: &str) -> String {
    compute_name_hash(name).to_hex()
}

/// path of the `.pack` file for a pack name
pub fn pack_path(packs_dir: &Path, name: &str) -> PathBuf {
    packs_dir.join(format!("{}.pack", pack_stem(name)))
}

/// path of the `.idx` file for a pack name
pub fn index_path(packs_dir: &Path, name: &str) -> PathBuf {
    packs_dir.join(format!("{}.idx", pack_stem(name)))
}

/// open every registered pack in `packs_dir`, sorted by name
///
/// packs whose index or data cannot be read are skipped with a warning.
pub fn load_packs(packs_dir: &Path) -> Result<Vec<PackReader>> {
    let mut packs = Vec::new();
    if !packs_dir.exists() {
        return Ok(packs);
    }

    for entry in fs::read_dir(packs_dir).with_path(packs_dir)? {
        let entry = entry.with_path(packs_dir)?;
        let path = entry.path();
        if path.extension().map(|e| e == "idx").unwrap_or(false) {
            match PackReader::open(&path) {
                Ok(reader) => packs.push(reader),
                Err(e) => warn!("skipping unreadable pack {}: {}", path.display(), e),
            }
        }
    }

    packs.sort_by(|a, b| a.name().cmp(b.name()));
    Ok(packs)
}

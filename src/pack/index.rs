use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::hash::Hash;

/// location of one object inside a pack
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub hash: Hash,
    /// byte offset of the compressed record in the pack file
    pub offset: u64,
    /// compressed length in bytes
    pub length: u64,
    /// uncompressed object size
    pub size: u64,
}

/// pack index: literal name, checksum and sorted object locations
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackIndex {
    pub name: String,
    pub compression_level: i32,
    /// unix timestamp (seconds since epoch)
    pub created: i64,
    /// total pack file length including header and trailer
    pub pack_size: u64,
    /// SHA-256 over the pack file minus its trailer
    pub checksum: Hash,
    /// sorted by hash
    entries: Vec<IndexEntry>,
}

impl PackIndex {
    /// build an index; entries are sorted by hash
    pub fn new(
        name: impl Into<String>,
        compression_level: i32,
        pack_size: u64,
        checksum: Hash,
        mut entries: Vec<IndexEntry>,
    ) -> Self {
        entries.sort_by(|a, b| a.hash.cmp(&b.hash));
        entries.dedup_by(|a, b| a.hash == b.hash);
        Self {
            name: name.into(),
            compression_level,
            created: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0),
            pack_size,
            checksum,
            entries,
        }
    }

    /// look up an object's location
    pub fn lookup(&self, hash: &Hash) -> Option<&IndexEntry> {
        self.entries
            .binary_search_by(|e| e.hash.cmp(hash))
            .ok()
            .map(|i| &self.entries[i])
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.lookup(hash).is_some()
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn object_count(&self) -> usize {
        self.entries.len()
    }

    /// serialize as CBOR, zstd compressed
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut cbor_bytes = Vec::new();
        ciborium::into_writer(self, &mut cbor_bytes)?;

        zstd::encode_all(&cbor_bytes[..], 3).map_err(|e| Error::Io {
            path: PathBuf::from("<zstd>"),
            source: e,
        })
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let cbor_bytes = zstd::decode_all(data).map_err(|e| Error::Io {
            path: PathBuf::from("<zstd>"),
            source: e,
        })?;
        let index: PackIndex = ciborium::from_reader(&cbor_bytes[..])?;
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::compute_content_hash;

    fn entry(content: &[u8], offset: u64) -> IndexEntry {
        IndexEntry {
            hash: compute_content_hash(content),
            offset,
            length: 10,
            size: content.len() as u64,
        }
    }

    #[test]
    fn test_lookup_sorted() {
        let entries = vec![entry(b"c", 40), entry(b"a", 12), entry(b"b", 22)];
        let index = PackIndex::new("p", 3, 100, Hash::ZERO, entries);

        assert_eq!(index.object_count(), 3);
        assert!(index.entries().windows(2).all(|w| w[0].hash < w[1].hash));
        assert_eq!(index.lookup(&compute_content_hash(b"b")).unwrap().offset, 22);
        assert!(index.lookup(&compute_content_hash(b"zzz")).is_none());
    }

    #[test]
    fn test_index_bytes_roundtrip() {
        let index = PackIndex::new(
            "nightly build ✨",
            19,
            4096,
            compute_content_hash(b"pack"),
            vec![entry(b"x", 12)],
        );

        let parsed = PackIndex::from_bytes(&index.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed, index);
    }

    #[test]
    fn test_index_from_garbage() {
        assert!(PackIndex::from_bytes(b"definitely not an index").is_err());
    }
}

use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::error::{Error, IoResultExt, Result};
use crate::hash::{ContentHasher, Hash};

use super::index::PackIndex;
use super::{PACK_HEADER_LEN, PACK_MAGIC, PACK_TRAILER_LEN, PACK_VERSION};

/// random-access reader over one registered pack
#[derive(Debug)]
pub struct PackReader {
    pack_path: PathBuf,
    index_path: PathBuf,
    index: PackIndex,
}

impl PackReader {
    /// open a pack from its `.idx` path; the `.pack` sits next to it
    pub fn open(index_path: &Path) -> Result<Self> {
        let index_data = fs::read(index_path).with_path(index_path)?;
        let index = PackIndex::from_bytes(&index_data)?;
        let pack_path = index_path.with_extension("pack");

        let meta = fs::metadata(&pack_path).with_path(&pack_path)?;
        if meta.len() != index.pack_size {
            return Err(Error::CorruptPack {
                name: index.name.clone(),
                reason: format!(
                    "pack is {} bytes, index expects {}",
                    meta.len(),
                    index.pack_size
                ),
            });
        }

        let mut header = [0u8; PACK_HEADER_LEN as usize];
        File::open(&pack_path)
            .and_then(|mut f| f.read_exact(&mut header))
            .with_path(&pack_path)?;
        check_header(&index.name, &header)?;

        Ok(Self {
            pack_path,
            index_path: index_path.to_path_buf(),
            index,
        })
    }

    /// literal pack name
    pub fn name(&self) -> &str {
        &self.index.name
    }

    pub fn index(&self) -> &PackIndex {
        &self.index
    }

    pub fn pack_path(&self) -> &Path {
        &self.pack_path
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.index.contains(hash)
    }

    pub fn object_count(&self) -> usize {
        self.index.object_count()
    }

    /// every object hash in the pack, sorted
    pub fn object_hashes(&self) -> impl Iterator<Item = &Hash> {
        self.index.entries().iter().map(|e| &e.hash)
    }

    /// read and decompress one object, None if the pack does not hold it
    pub fn read_object(&self, hash: &Hash) -> Result<Option<Vec<u8>>> {
        let entry = match self.index.lookup(hash) {
            Some(entry) => entry,
            None => return Ok(None),
        };

        // the index is read from disk, so its numbers are untrusted
        let data_end = self.index.pack_size.checked_sub(PACK_TRAILER_LEN);
        let record_end = entry.offset.checked_add(entry.length);
        match (record_end, data_end) {
            (Some(end), Some(limit)) if entry.offset >= PACK_HEADER_LEN && end <= limit => {}
            _ => {
                return Err(self.corrupt(format!("record for {} extends past pack data", hash)));
            }
        }

        let mut compressed = vec![0u8; entry.length as usize];
        let mut file = File::open(&self.pack_path).with_path(&self.pack_path)?;
        file.seek(SeekFrom::Start(entry.offset))
            .with_path(&self.pack_path)?;
        file.read_exact(&mut compressed).with_path(&self.pack_path)?;

        let content = zstd::decode_all(&compressed[..])
            .map_err(|e| self.corrupt(format!("cannot decompress {}: {}", hash, e)))?;
        if content.len() as u64 != entry.size {
            return Err(self.corrupt(format!(
                "{} decompressed to {} bytes, expected {}",
                hash,
                content.len(),
                entry.size
            )));
        }

        Ok(Some(content))
    }

    /// recompute the whole-pack checksum and compare with trailer and index
    pub fn verify(&self) -> Result<()> {
        let (computed, trailer) = compute_pack_checksum(&self.pack_path)?;
        if computed != trailer || computed != self.index.checksum {
            return Err(self.corrupt("checksum mismatch".to_string()));
        }
        Ok(())
    }

    fn corrupt(&self, reason: String) -> Error {
        Error::CorruptPack {
            name: self.index.name.clone(),
            reason,
        }
    }
}

fn check_header(name: &str, header: &[u8]) -> Result<()> {
    if &header[0..4] != PACK_MAGIC {
        return Err(Error::CorruptPack {
            name: name.to_string(),
            reason: "invalid magic".to_string(),
        });
    }
    let mut version = [0u8; 4];
    version.copy_from_slice(&header[4..8]);
    let version = u32::from_le_bytes(version);
    if version != PACK_VERSION {
        return Err(Error::CorruptPack {
            name: name.to_string(),
            reason: format!("unsupported version {}", version),
        });
    }
    Ok(())
}

/// hash a pack file's body and read its trailer
///
/// returns (computed checksum, stored trailer checksum).
pub fn compute_pack_checksum(path: &Path) -> Result<(Hash, Hash)> {
    let len = fs::metadata(path).with_path(path)?.len();
    if len < PACK_HEADER_LEN + PACK_TRAILER_LEN {
        return Err(Error::CorruptPack {
            name: path.display().to_string(),
            reason: "pack file too short".to_string(),
        });
    }

    let mut file = File::open(path).with_path(path)?;
    let mut hasher = ContentHasher::new();
    let mut remaining = len - PACK_TRAILER_LEN;
    let mut buf = [0u8; 64 * 1024];
    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;
        file.read_exact(&mut buf[..want]).with_path(path)?;
        hasher.update(&buf[..want]);
        remaining -= want as u64;
    }

    let mut trailer = [0u8; PACK_TRAILER_LEN as usize];
    file.read_exact(&mut trailer).with_path(path)?;

    Ok((hasher.finalize(), Hash::from_bytes(trailer)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::compute_content_hash;
    use crate::pack::IndexEntry;
    use tempfile::tempdir;

    /// an empty but well-formed pack whose index claims one record
    fn pack_with_entry(dir: &Path, offset: u64, length: u64) -> (PackReader, Hash) {
        let mut body = Vec::new();
        body.extend_from_slice(PACK_MAGIC);
        body.extend_from_slice(&PACK_VERSION.to_le_bytes());
        body.extend_from_slice(&1u32.to_le_bytes());
        let checksum = compute_content_hash(&body);
        body.extend_from_slice(checksum.as_bytes());

        let hash = compute_content_hash(b"ghost");
        let index = PackIndex::new(
            "forged",
            3,
            body.len() as u64,
            checksum,
            vec![IndexEntry {
                hash,
                offset,
                length,
                size: 5,
            }],
        );
        fs::write(dir.join("forged.pack"), &body).unwrap();
        fs::write(dir.join("forged.idx"), index.to_bytes().unwrap()).unwrap();

        (PackReader::open(&dir.join("forged.idx")).unwrap(), hash)
    }

    #[test]
    fn test_read_object_rejects_overflowing_record() {
        let dir = tempdir().unwrap();
        let (reader, hash) = pack_with_entry(dir.path(), u64::MAX - 4, 10);

        assert!(matches!(
            reader.read_object(&hash),
            Err(Error::CorruptPack { .. })
        ));
    }

    #[test]
    fn test_read_object_rejects_record_outside_data() {
        let dir = tempdir().unwrap();
        let (reader, hash) = pack_with_entry(dir.path(), PACK_HEADER_LEN, u64::MAX);
        assert!(matches!(
            reader.read_object(&hash),
            Err(Error::CorruptPack { .. })
        ));

        // a record overlapping the header is just as bogus
        let dir = tempdir().unwrap();
        let (reader, hash) = pack_with_entry(dir.path(), 0, 4);
        assert!(matches!(
            reader.read_object(&hash),
            Err(Error::CorruptPack { .. })
        ));
    }

    #[test]
    fn test_verify_forged_pack() {
        let dir = tempdir().unwrap();
        let (reader, _) = pack_with_entry(dir.path(), PACK_HEADER_LEN, 0);
        reader.verify().unwrap();
    }
}

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{debug, info};
use rayon::prelude::*;
use rayon::ThreadPool;

use crate::error::{Error, IoResultExt, Result};
use crate::fs::{fsync_dir, write_atomic};
use crate::hash::{ContentHasher, Hash};
use crate::object::ObjectStore;

use super::index::{IndexEntry, PackIndex};
use super::reader::compute_pack_checksum;
use super::{index_path, pack_path, PACK_MAGIC, PACK_VERSION};

/// objects compressed per worker before the batch is appended to the pack
const BATCH_PER_WORKER: usize = 16;

/// a freshly published pack
#[derive(Debug)]
pub struct PackFile {
    pub pack_path: PathBuf,
    pub index_path: PathBuf,
    pub index: PackIndex,
}

/// builds one pack from objects already in the store
pub struct PackWriter<'a> {
    packs_dir: &'a Path,
    tmp_dir: &'a Path,
    name: &'a str,
    compression_level: i32,
}

/// counts bytes and hashes everything passing through
struct ChecksumWriter<W: Write> {
    inner: W,
    hasher: ContentHasher,
    written: u64,
}

impl<W: Write> Write for ChecksumWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

impl<'a> PackWriter<'a> {
    pub fn new(packs_dir: &'a Path, tmp_dir: &'a Path, name: &'a str, compression_level: i32) -> Self {
        Self {
            packs_dir,
            tmp_dir,
            name,
            compression_level,
        }
    }

    /// compress `hashes` into a pack and publish it
    ///
    /// the pack file is written under tmp, its checksum re-verified from disk,
    /// then renamed into place; the index is published last.
    pub fn write(self, objects: &ObjectStore, hashes: &[Hash], pool: &ThreadPool) -> Result<PackFile> {
        let tmp_pack = self.tmp_dir.join(format!("{}.pack", uuid::Uuid::new_v4()));

        let result = self.write_pack(objects, hashes, pool, &tmp_pack);
        let (entries, checksum, pack_size) = match result {
            Ok(v) => v,
            Err(e) => {
                let _ = fs::remove_file(&tmp_pack);
                return Err(e);
            }
        };

        // what landed on disk must match what we hashed while writing
        let (on_disk, trailer) = compute_pack_checksum(&tmp_pack)?;
        if on_disk != checksum || trailer != checksum {
            let _ = fs::remove_file(&tmp_pack);
            return Err(Error::CorruptPack {
                name: self.name.to_string(),
                reason: "checksum mismatch after write".to_string(),
            });
        }

        let index = PackIndex::new(self.name, self.compression_level, pack_size, checksum, entries);
        let index_bytes = index.to_bytes()?;

        let final_pack = pack_path(self.packs_dir, self.name);
        let final_index = index_path(self.packs_dir, self.name);

        fs::rename(&tmp_pack, &final_pack).with_path(&final_pack)?;
        fsync_dir(self.packs_dir)?;
        write_atomic(self.tmp_dir, &final_index, &index_bytes)?;

        info!(
            "packed {} object(s) into {} ({} bytes, level {})",
            index.object_count(),
            self.name,
            pack_size,
            self.compression_level
        );

        Ok(PackFile {
            pack_path: final_pack,
            index_path: final_index,
            index,
        })
    }

    fn write_pack(
        &self,
        objects: &ObjectStore,
        hashes: &[Hash],
        pool: &ThreadPool,
        tmp_pack: &Path,
    ) -> Result<(Vec<IndexEntry>, Hash, u64)> {
        let file = File::create(tmp_pack).with_path(tmp_pack)?;
        let mut out = ChecksumWriter {
            inner: BufWriter::new(file),
            hasher: ContentHasher::new(),
            written: 0,
        };

        out.write_all(PACK_MAGIC).with_path(tmp_pack)?;
        out.write_all(&PACK_VERSION.to_le_bytes())
            .with_path(tmp_pack)?;
        out.write_all(&(hashes.len() as u32).to_le_bytes())
            .with_path(tmp_pack)?;

        let level = self.compression_level;
        let batch_size = BATCH_PER_WORKER * pool.current_num_threads().max(1);
        let mut entries = Vec::with_capacity(hashes.len());

        for batch in hashes.chunks(batch_size) {
            let compressed: Vec<(Hash, u64, Vec<u8>)> = pool.install(|| {
                batch
                    .par_iter()
                    .map(|hash| {
                        let content = objects.get(hash)?;
                        let compressed =
                            zstd::bulk::compress(&content, level).map_err(|e| Error::Io {
                                path: PathBuf::from("<zstd>"),
                                source: e,
                            })?;
                        Ok((*hash, content.len() as u64, compressed))
                    })
                    .collect::<Result<Vec<_>>>()
            })?;

            // records are appended in input order
            for (hash, size, data) in compressed {
                entries.push(IndexEntry {
                    hash,
                    offset: out.written,
                    length: data.len() as u64,
                    size,
                });
                out.write_all(&data).with_path(tmp_pack)?;
            }
            debug!("pack {}: {} of {} objects written", self.name, entries.len(), hashes.len());
        }

        let checksum = std::mem::take(&mut out.hasher).finalize();
        out.inner
            .write_all(checksum.as_bytes())
            .with_path(tmp_pack)?;
        let pack_size = out.written + checksum.as_bytes().len() as u64;

        let file = out
            .inner
            .into_inner()
            .map_err(|e| e.into_error())
            .with_path(tmp_pack)?;
        file.sync_all().with_path(tmp_pack)?;

        Ok((entries, checksum, pack_size))
    }
}

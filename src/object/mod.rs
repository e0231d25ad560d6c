//! content-addressed object storage
//!
//! objects live either as loose files (`objects/<2 hex>/<62 hex>`) or inside a
//! registered pack. `get` and `exists` look at loose storage first and then at
//! every pack, so callers never care where an object physically resides.

mod loose;

pub use loose::{list_loose, loose_path};

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use log::{debug, trace};

use crate::error::{Error, Result};
use crate::hash::{compute_content_hash, Hash};
use crate::pack::{load_packs, PackReader};

/// registered packs, swapped as a whole when the pack directory is re-read
pub type PackSet = Arc<Vec<PackReader>>;

/// loose objects plus the registered packs
pub struct ObjectStore {
    root: PathBuf,
    tmp: PathBuf,
    packs_dir: PathBuf,
    packs: RwLock<PackSet>,
}

impl ObjectStore {
    pub fn new(root: PathBuf, tmp: PathBuf, packs_dir: PathBuf, packs: Vec<PackReader>) -> Self {
        Self {
            root,
            tmp,
            packs_dir,
            packs: RwLock::new(Arc::new(packs)),
        }
    }

    /// loose object root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// registered packs as of the last (re)load
    pub fn packs(&self) -> PackSet {
        match self.packs.read() {
            Ok(packs) => Arc::clone(&packs),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// re-read the pack directory, picking up packs published or removed
    /// since the last load
    pub fn reload_packs(&self) -> Result<()> {
        let packs = Arc::new(load_packs(&self.packs_dir)?);
        match self.packs.write() {
            Ok(mut current) => *current = packs,
            Err(poisoned) => *poisoned.into_inner() = packs,
        }
        Ok(())
    }

    /// store bytes, returning their hash
    ///
    /// idempotent; concurrent puts of the same bytes converge on one file.
    pub fn put(&self, content: &[u8]) -> Result<Hash> {
        let hash = compute_content_hash(content);

        // deduplication: if the object is already known, we're done
        if self.exists(&hash) {
            return Ok(hash);
        }

        loose::write_loose(&self.root, &self.tmp, &hash, content)?;
        trace!("stored object {} ({} bytes)", hash, content.len());
        Ok(hash)
    }

    /// store the content of a file
    pub fn put_file(&self, path: &Path) -> Result<(Hash, u64)> {
        let content = std::fs::read(path).map_err(|e| Error::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok((self.put(&content)?, content.len() as u64))
    }

    /// fetch object bytes from loose storage or any pack
    ///
    /// a miss re-reads the pack directory once before giving up, so a pack
    /// published (and its loose objects pruned) after this store was opened
    /// is still found.
    pub fn get(&self, hash: &Hash) -> Result<Vec<u8>> {
        if let Some(content) = self.lookup(hash)? {
            return Ok(content);
        }

        debug!("object {} not found, re-reading packs", hash);
        self.reload_packs()?;
        match self.lookup(hash)? {
            Some(content) => Ok(content),
            None => Err(Error::ObjectNotFound(*hash)),
        }
    }

    fn lookup(&self, hash: &Hash) -> Result<Option<Vec<u8>>> {
        if let Some(content) = loose::read_loose(&self.root, hash)? {
            return Ok(Some(content));
        }
        for pack in self.packs().iter() {
            match pack.read_object(hash) {
                Ok(Some(content)) => return Ok(Some(content)),
                Ok(None) => {}
                // pack removed by a concurrent loosen; its objects are loose again
                Err(Error::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
                    if let Some(content) = loose::read_loose(&self.root, hash)? {
                        return Ok(Some(content));
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    /// whether any loose file or registered pack holds the object
    pub fn exists(&self, hash: &Hash) -> bool {
        self.is_loose(hash) || self.packs().iter().any(|p| p.contains(hash))
    }

    /// whether the object is stored as a loose file
    pub fn is_loose(&self, hash: &Hash) -> bool {
        loose_path(&self.root, hash).exists()
    }

    /// every loose object hash, sorted
    pub fn loose_objects(&self) -> Result<Vec<Hash>> {
        list_loose(&self.root)
    }

    /// write an object as a loose file even if a pack already holds it
    pub(crate) fn put_loose(&self, hash: &Hash, content: &[u8]) -> Result<()> {
        if self.is_loose(hash) {
            return Ok(());
        }
        loose::write_loose(&self.root, &self.tmp, hash, content)
    }

    /// delete a loose object; only valid once a confirmed pack holds it
    pub(crate) fn remove_loose(&self, hash: &Hash) -> Result<()> {
        loose::remove_loose(&self.root, hash)
    }
}

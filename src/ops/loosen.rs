use std::fs;

use log::info;

use crate::error::{Error, IoResultExt, Result};
use crate::fs::fsync_dir;
use crate::store::Store;

/// turn a pack back into loose objects and unregister it
///
/// every object is written loose before the index is removed, so objects
/// stay resolvable throughout. returns the number of objects unpacked.
pub fn loosen(store: &mut Store, name: &str) -> Result<usize> {
    let _lock = store.lock()?;
    store.reload_packs()?;

    let packs = store.objects().packs();
    let pack = packs
        .iter()
        .find(|p| p.name() == name)
        .ok_or_else(|| Error::PackNotFound(name.to_string()))?;

    let mut count = 0;
    for hash in pack.object_hashes() {
        let content = pack
            .read_object(hash)?
            .ok_or(Error::ObjectNotFound(*hash))?;
        store.objects().put_loose(hash, &content)?;
        count += 1;
    }

    let index_path = pack.index_path().to_path_buf();
    let pack_path = pack.pack_path().to_path_buf();
    fs::remove_file(&index_path).with_path(&index_path)?;
    fs::remove_file(&pack_path).with_path(&pack_path)?;
    fsync_dir(&store.packs_path())?;

    store.reload_packs()?;
    info!("loosened pack {:?}: {} object(s)", name, count);
    Ok(count)
}

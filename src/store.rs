use std::fs::{self, File};
use std::path::{Path, PathBuf};

use log::{debug, info};
use nix::fcntl::{Flock, FlockArg};

use crate::config::{Config, FORMAT_VERSION};
use crate::error::{Error, IoResultExt, Result};
use crate::fs::write_atomic;
use crate::object::ObjectStore;
use crate::pack::load_packs;
use crate::snapshot::{self, Manifest, Snapshot};

/// name of the empty snapshot published by `Store::init`
pub const INITIAL_SNAPSHOT: &str = "init";

/// a snapshot store: data directory plus the worktree it synchronizes
pub struct Store {
    path: PathBuf,
    worktree: PathBuf,
    config: Config,
    objects: ObjectStore,
}

impl Store {
    /// create the on-disk layout (or open it if it already exists)
    pub fn init(path: &Path, worktree: &Path) -> Result<Self> {
        let config_path = path.join("config.toml");
        if config_path.exists() {
            debug!("store already initialized at {}", path.display());
            return Self::open(path, worktree);
        }

        if path.exists() {
            let is_empty = path.read_dir().with_path(path)?.next().is_none();
            if !is_empty {
                return Err(Error::InvalidStore {
                    path: path.to_path_buf(),
                    reason: "directory exists but contains no config.toml".to_string(),
                });
            }
        }

        // create directory structure
        fs::create_dir_all(path.join("objects")).with_path(path)?;
        fs::create_dir_all(path.join("snapshots")).with_path(path)?;
        fs::create_dir_all(path.join("packs")).with_path(path)?;
        fs::create_dir_all(path.join("tmp")).with_path(path)?;
        fs::create_dir_all(worktree).with_path(worktree)?;

        let config = Config::default();
        let store = Self {
            path: path.to_path_buf(),
            worktree: worktree.to_path_buf(),
            objects: ObjectStore::new(
                path.join("objects"),
                path.join("tmp"),
                path.join("packs"),
                Vec::new(),
            ),
            config,
        };

        // the empty baseline, published before config.toml so a crash here
        // leaves a directory that init can simply retry
        let initial = Snapshot::new(INITIAL_SNAPSHOT, Manifest::new());
        snapshot::publish(&store, &initial)?;
        store.write_head(INITIAL_SNAPSHOT)?;

        store.config.save(&store.tmp_path(), &config_path)?;
        info!("initialized store at {}", path.display());

        Ok(store)
    }

    /// open an existing store
    pub fn open(path: &Path, worktree: &Path) -> Result<Self> {
        let config_path = path.join("config.toml");
        if !config_path.exists() {
            return Err(Error::NoStore(path.to_path_buf()));
        }

        let config = Config::load(&config_path).map_err(|e| Error::InvalidStore {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        if config.format_version != FORMAT_VERSION {
            return Err(Error::InvalidStore {
                path: path.to_path_buf(),
                reason: format!(
                    "unsupported format version {} (expected {})",
                    config.format_version, FORMAT_VERSION
                ),
            });
        }

        let packs = load_packs(&path.join("packs"))?;
        debug!("opened store at {} with {} pack(s)", path.display(), packs.len());

        Ok(Self {
            path: path.to_path_buf(),
            worktree: worktree.to_path_buf(),
            objects: ObjectStore::new(
                path.join("objects"),
                path.join("tmp"),
                path.join("packs"),
                packs,
            ),
            config,
        })
    }

    /// data directory root
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// worktree root
    pub fn worktree(&self) -> &Path {
        &self.worktree
    }

    /// store configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// mutable access to configuration
    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// save configuration changes
    pub fn save_config(&self) -> Result<()> {
        self.config.save(&self.tmp_path(), &self.config_path())
    }

    /// content-addressed object store (loose objects and registered packs)
    pub fn objects(&self) -> &ObjectStore {
        &self.objects
    }

    /// re-read the pack directory, picking up packs published since open
    pub fn reload_packs(&self) -> Result<()> {
        self.objects.reload_packs()
    }

    /// path to config.toml
    pub fn config_path(&self) -> PathBuf {
        self.path.join("config.toml")
    }

    /// path to loose objects directory
    pub fn objects_path(&self) -> PathBuf {
        self.path.join("objects")
    }

    /// path to snapshot manifests directory
    pub fn snapshots_path(&self) -> PathBuf {
        self.path.join("snapshots")
    }

    /// path to packs directory
    pub fn packs_path(&self) -> PathBuf {
        self.path.join("packs")
    }

    /// path to tmp directory (for atomic writes)
    pub fn tmp_path(&self) -> PathBuf {
        self.path.join("tmp")
    }

    /// path to the HEAD file
    pub fn head_path(&self) -> PathBuf {
        self.path.join("HEAD")
    }

    /// path to lock file
    pub fn lock_path(&self) -> PathBuf {
        self.path.join(".lock")
    }

    /// name of the snapshot the worktree was last synchronized to
    pub fn read_head(&self) -> Result<Option<String>> {
        let head_path = self.head_path();
        match fs::read_to_string(&head_path) {
            Ok(name) => Ok(Some(name)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io {
                path: head_path,
                source: e,
            }),
        }
    }

    /// record the snapshot the worktree now matches
    pub fn write_head(&self, name: &str) -> Result<()> {
        write_atomic(&self.tmp_path(), &self.head_path(), name.as_bytes())
    }

    /// acquire exclusive lock on the store, waiting for other writers
    /// returns a guard that releases the lock on drop
    pub fn lock(&self) -> Result<StoreLock> {
        let lock_path = self.lock_path();
        let file = File::create(&lock_path).with_path(&lock_path)?;

        let flock = Flock::lock(file, FlockArg::LockExclusive).map_err(|(_, errno)| Error::Io {
            path: lock_path.clone(),
            source: std::io::Error::from(errno),
        })?;

        Ok(StoreLock { flock })
    }

    /// try to acquire exclusive lock, returning None if already locked
    pub fn try_lock(&self) -> Result<Option<StoreLock>> {
        let lock_path = self.lock_path();
        let file = File::create(&lock_path).with_path(&lock_path)?;

        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(flock) => Ok(Some(StoreLock { flock })),
            Err((_, nix::errno::Errno::EWOULDBLOCK)) => Ok(None),
            Err(_) => Err(Error::LockContention),
        }
    }
}

/// guard that holds the store lock until dropped
pub struct StoreLock {
    #[allow(dead_code)]
    flock: Flock<File>,
}
// lock is released automatically when Flock is dropped

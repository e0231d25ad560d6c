//! snapvault - content-addressed snapshot store
//!
//! records the state of a directory tree ("worktree") as named snapshots,
//! reconstitutes any snapshot on demand, consolidates loose objects into
//! compressed packs, and reports how a worktree differs from a snapshot.
//!
//! # Core concepts
//!
//! - **Object**: file content keyed by its SHA-256, stored loose or in a pack
//! - **Snapshot**: a named manifest of path -> (hash, mode, size) (CBOR + zstd)
//! - **Pack**: many zstd-compressed objects in one file plus a CBOR index
//! - **HEAD**: the snapshot the worktree was last synchronized to; the baseline
//!   for detecting local edits
//!
//! # On-disk layout
//!
//! ```text
//! <data_dir>/
//!   config.toml
//!   HEAD
//!   objects/<2 hex>/<62 hex>
//!   snapshots/<sha256(name)>
//!   snapshots/index
//!   packs/<sha256(name)>.pack
//!   packs/<sha256(name)>.idx
//!   tmp/
//! ```
//!
//! # Example usage
//!
//! ```no_run
//! use snapvault::{api, ExtractOptions};
//! use std::path::{Path, PathBuf};
//!
//! let data = Path::new("/path/to/data");
//! let worktree = Path::new("/path/to/worktree");
//!
//! api::init(data, worktree).unwrap();
//! api::store(data, worktree, &[PathBuf::from("README.md")], "my revision").unwrap();
//! api::pack(data, worktree, "nightly", 12, 0).unwrap();
//!
//! let opts = ExtractOptions { verify: true, ..Default::default() };
//! let result = api::extract(data, worktree, "my revision", &opts).unwrap();
//! println!("{} added, {} removed, {} modified", result.added, result.removed, result.modified);
//! ```

mod config;
mod error;
mod hash;
mod store;

pub mod api;
pub mod fs;
pub mod object;
pub mod ops;
pub mod pack;
pub mod snapshot;

pub use config::{Config, PackConfig, SnapshotConfig, FORMAT_VERSION};
pub use error::{Error, ErrorKind, IoResultExt, PathFailure, Result, TaggedError};
pub use hash::{compute_content_hash, compute_name_hash, hash_file, ContentHasher, Hash};
pub use object::ObjectStore;
pub use ops::{Classification, ExtractOptions, ExtractResult, FsckReport, PackStats};
pub use snapshot::{EntryKind, Manifest, ManifestEntry, Snapshot, SnapshotInfo};
pub use store::{Store, StoreLock, INITIAL_SNAPSHOT};

use std::fmt;
use std::path::PathBuf;

use crate::Hash;

/// error type for snapvault operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("store not found at {0}")]
    NoStore(PathBuf),

    #[error("not a valid store: {path}: {reason}")]
    InvalidStore { path: PathBuf, reason: String },

    #[error("snapshot not found: {0}")]
    SnapshotNotFound(String),

    #[error("snapshot already exists: {0}")]
    SnapshotExists(String),

    #[error("pack not found: {0}")]
    PackNotFound(String),

    #[error("pack already exists: {0}")]
    PackExists(String),

    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("invalid worktree path: {0}")]
    InvalidPath(String),

    #[error("not a regular file or symlink: {0}")]
    UnsupportedFileType(String),

    #[error("object not found: {0}")]
    ObjectNotFound(Hash),

    #[error("corrupt pack {name}: {reason}")]
    CorruptPack { name: String, reason: String },

    #[error("verification failed for {} file(s): {}", paths.len(), join_paths(paths))]
    Corruption { paths: Vec<String> },

    #[error("local modifications would be overwritten in {} file(s): {}", paths.len(), join_paths(paths))]
    Conflict { paths: Vec<String> },

    #[error("extract failed for {} file(s): {}", failures.len(), join_failures(failures))]
    Extract { failures: Vec<PathFailure> },

    #[error("invalid compression level {level} (must be between {min} and {max})")]
    InvalidCompressionLevel { level: i32, min: i32, max: i32 },

    #[error("lock contention on store")]
    LockContention,

    #[error("failed to build worker pool: {0}")]
    WorkerPool(String),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cbor serialization error: {0}")]
    CborEncode(#[from] ciborium::ser::Error<std::io::Error>),

    #[error("cbor deserialization error: {0}")]
    CborDecode(#[from] ciborium::de::Error<std::io::Error>),

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("config serialization error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("invalid hash hex: {0}")]
    InvalidHashHex(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// a single failed path inside an aggregate extract error
#[derive(Debug)]
pub struct PathFailure {
    pub path: String,
    pub error: Error,
}

impl fmt::Display for PathFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.path, self.error)
    }
}

/// error category exposed across the call boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Io,
    Corruption,
    Conflict,
    InvalidName,
    InvalidArgument,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::NotFound => "not-found",
            ErrorKind::Io => "io",
            ErrorKind::Corruption => "corruption",
            ErrorKind::Conflict => "conflict",
            ErrorKind::InvalidName => "invalid-name",
            ErrorKind::InvalidArgument => "invalid-argument",
        };
        f.write_str(s)
    }
}

/// an error flattened to kind + message, as handed to a foreign caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedError {
    pub kind: ErrorKind,
    pub message: String,
}

impl fmt::Display for TaggedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl Error {
    /// boundary category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NoStore(_)
            | Error::SnapshotNotFound(_)
            | Error::PackNotFound(_)
            | Error::ObjectNotFound(_) => ErrorKind::NotFound,

            Error::SnapshotExists(_)
            | Error::PackExists(_)
            | Error::InvalidName(_)
            | Error::InvalidPath(_) => ErrorKind::InvalidName,

            Error::CorruptPack { .. } | Error::Corruption { .. } | Error::CborDecode(_) => {
                ErrorKind::Corruption
            }

            Error::Conflict { .. } => ErrorKind::Conflict,

            Error::InvalidCompressionLevel { .. }
            | Error::InvalidHashHex(_)
            | Error::UnsupportedFileType(_) => ErrorKind::InvalidArgument,

            Error::Extract { failures } => failures
                .first()
                .map(|f| f.error.kind())
                .unwrap_or(ErrorKind::Io),

            Error::InvalidStore { .. }
            | Error::LockContention
            | Error::WorkerPool(_)
            | Error::Io { .. }
            | Error::CborEncode(_)
            | Error::Config(_)
            | Error::ConfigSerialize(_) => ErrorKind::Io,
        }
    }

    /// flatten into a tagged kind + message pair
    pub fn to_tagged(&self) -> TaggedError {
        TaggedError {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

fn join_paths(paths: &[String]) -> String {
    paths.join(", ")
}

fn join_failures(failures: &[PathFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// helper to wrap io errors with path context
pub trait IoResultExt<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|source| Error::Io {
            path: path.into(),
            source,
        })
    }
}

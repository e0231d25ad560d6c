pub mod scan;
pub mod write;

pub use scan::{list_worktree, normalize_path, scan_paths, FileState, WorktreeState};
pub use write::{
    fsync_dir, remove_worktree_file, write_atomic, write_worktree_file, write_worktree_symlink,
};

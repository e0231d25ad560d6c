//! high-level operations on a snapshot store

mod classify;
mod extract;
mod fsck;
mod loosen;
mod pack;
mod status;
mod store;

pub use classify::{classify, Classification, Diff};
pub use extract::{extract, ExtractOptions, ExtractPhase, ExtractResult};
pub use fsck::{fsck, CorruptObject, FsckReport, MissingObject};
pub use loosen::loosen;
pub use pack::{pack, PackStats};
pub use status::status;
pub use store::store;

use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::error::{Error, Result};

/// build the bounded worker pool for one call; 0 means one worker per cpu
pub(crate) fn worker_pool(num_workers: usize) -> Result<ThreadPool> {
    let threads = if num_workers == 0 {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    } else {
        num_workers
    };

    ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("snapvault-worker-{}", i))
        .build()
        .map_err(|e| Error::WorkerPool(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_pool_sizes() {
        assert_eq!(worker_pool(3).unwrap().current_num_threads(), 3);
        assert!(worker_pool(0).unwrap().current_num_threads() >= 1);
    }
}

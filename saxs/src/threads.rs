//! The process-wide worker pool.
//!
//! All CPU-heavy work (histogram builders, the Debye transform, the fitter's
//! landscape scan) is expressed as fork-join loops dispatched to a single
//! lazily created pool. The pool size is read exactly once, at first use.

use log::warn;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::OnceLock;

static POOL: OnceLock<ThreadPool> = OnceLock::new();

/// Requests a pool of `threads` workers.
///
/// Must be called before the first use of [`pool`]; later calls are ignored
/// with a warning, since the pool size cannot change once workers exist.
pub fn initialize(threads: usize) {
    let threads = threads.max(1);
    let mut built = false;
    POOL.get_or_init(|| {
        built = true;
        build(threads)
    });
    if !built {
        warn!("thread pool already initialized; ignoring requested size {threads}");
    }
}

/// Returns the process-wide worker pool, creating it with one worker per
/// hardware thread if [`initialize`] was never called.
pub fn pool() -> &'static ThreadPool {
    POOL.get_or_init(|| {
        let threads = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
        build(threads)
    })
}

fn build(threads: usize) -> ThreadPool {
    ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("saxs-worker-{i}"))
        .build()
        .expect("failed to spawn the worker pool")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pool_is_created_on_first_use() {
        assert!(pool().current_num_threads() >= 1);
    }
}

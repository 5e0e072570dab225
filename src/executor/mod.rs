//! Executors: the async I/O loop that owns sockets and the adaptive worker
//! pool that processes session events.


mod io_loop;
mod worker_pool;

pub use io_loop::IoLoop;
pub use worker_pool::{GrowthPolicy, Job, LoadSource, PoolConfig, SystemLoad, WorkerPool};

use scoped_tls::scoped_thread_local;
use smol::Executor;

scoped_thread_local!(static IO_EX: Executor<'static>);

/// Whether the current thread is one of the [IoLoop] threads.
///
/// Blocking waits such as `sync_read` refuse to run there since they would
/// stall the reads they wait for.
pub fn in_io_loop() -> bool {
    IO_EX.is_set()
}

/// Number of usable CPU cores, at least 1
pub fn cpu_count() -> usize {
    core_affinity::get_core_ids()
        .map(|ids| ids.len())
        .unwrap_or(1)
        .max(1)
}

use log::{trace, warn};
use parking_lot::Mutex;
use smol::{Executor, Task};
use std::future::Future;
use std::sync::Arc;
use std::thread::JoinHandle;

use super::IO_EX;
use crate::error::{Error, Result};

/// A multi-threaded async executor running socket accept, connect and read
/// tasks.
///
/// Event processing never happens here; read tasks only move bytes into
/// session buffers and raise events on the
/// [WorkerPool](crate::executor::WorkerPool).
pub struct IoLoop {
    ex: Arc<Executor<'static>>,
    stop_tx: Mutex<Option<smol::channel::Sender<()>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl IoLoop {
    /// Starts an I/O loop on `threads` named threads, pinned to cores
    /// round-robin when core ids are available
    pub fn new(threads: usize) -> Result<Arc<Self>> {
        if threads == 0 {
            return Err(Error::Config("io loop needs at least one thread".to_string()));
        }
        let ex = Arc::new(Executor::new());
        let (stop_tx, stop_rx) = smol::channel::bounded::<()>(1);
        let core_ids = core_affinity::get_core_ids().unwrap_or_default();

        let mut handles = Vec::with_capacity(threads);
        for i in 0..threads {
            let ex = Arc::clone(&ex);
            let stop_rx = stop_rx.clone();
            let core_id = if core_ids.is_empty() {
                None
            } else {
                Some(core_ids[i % core_ids.len()])
            };
            let handle = std::thread::Builder::new()
                .name(format!("sockflow-io-{}", i))
                .spawn(move || {
                    if let Some(core_id) = core_id {
                        let _ = core_affinity::set_for_current(core_id);
                    }
                    IO_EX.set(&ex, || {
                        let _ = smol::block_on(ex.run(stop_rx.recv()));
                    });
                    trace!("io loop thread {} exit", i);
                })?;
            handles.push(handle);
        }

        Ok(Arc::new(Self {
            ex,
            stop_tx: Mutex::new(Some(stop_tx)),
            threads: Mutex::new(handles),
        }))
    }

    /// Spawns a task onto the loop
    pub fn spawn<T: Send + 'static>(&self, future: impl Future<Output = T> + Send + 'static) -> Task<T> {
        self.ex.spawn(future)
    }

    /// Runs `future` to completion on the calling thread, driving the loop
    /// while it waits
    pub fn block_on<T>(&self, future: impl Future<Output = T>) -> T {
        smol::block_on(self.ex.run(future))
    }

    /// Stops every loop thread and waits for them to exit
    pub fn shutdown(&self) {
        let stop_tx = self.stop_tx.lock().take();
        if let Some(stop_tx) = stop_tx {
            // dropping the sender wakes every thread
            drop(stop_tx);
            let handles: Vec<JoinHandle<()>> = self.threads.lock().drain(..).collect();
            for handle in handles {
                if handle.join().is_err() {
                    warn!("io loop thread panicked");
                }
            }
        }
    }
}

impl Drop for IoLoop {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.get_mut().take() {
            drop(stop_tx);
        }
    }
}

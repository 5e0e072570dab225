use log::{debug, error, trace, warn};
use parking_lot::{Condvar, Mutex};
use smol::channel::{Receiver, Sender, TryRecvError, TrySendError};
use smol::Timer;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use waitgroup::{WaitGroup, Worker};

use super::cpu_count;
use crate::error::{Error, Result};

/// A unit of work run by the pool
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Source of the system load average consulted by the watchdog
pub trait LoadSource: Send + Sync {
    /// Load average normalized by the number of cores
    fn load_average(&self) -> f64;
}

/// Reads the one minute load average from `/proc/loadavg`.
///
/// Reports 0.0 where the file is unavailable, which lets the pool grow on
/// backlog alone.
#[derive(Debug, Clone)]
pub struct SystemLoad {
    cpus: usize,
}

impl Default for SystemLoad {
    fn default() -> Self {
        Self { cpus: cpu_count() }
    }
}

impl LoadSource for SystemLoad {
    fn load_average(&self) -> f64 {
        std::fs::read_to_string("/proc/loadavg")
            .ok()
            .and_then(|s| s.split_whitespace().next().and_then(|v| v.parse::<f64>().ok()))
            .map(|load| load / self.cpus.max(1) as f64)
            .unwrap_or(0.0)
    }
}

/// How the watchdog grows the core size
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct GrowthPolicy {
    /// Threads added per growing tick
    pub step: usize,
    /// Upper bound of the core size
    pub max: usize,
}

impl GrowthPolicy {
    /// Core size after one tick: grows by `step` (capped at `max`) when jobs
    /// are waiting and the load average is below 1.0, otherwise unchanged.
    /// Never shrinks.
    pub fn next_core_size(&self, current: usize, backlog: usize, load: f64) -> usize {
        if backlog > 0 && load < 1.0 && current < self.max {
            (current + self.step).min(self.max)
        } else {
            current
        }
    }
}

/// Sizing of a [WorkerPool]
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Prefix of worker thread names
    pub name: String,
    /// Initial core size
    pub core_size: usize,
    /// Threads added per growing watchdog tick
    pub growth_step: usize,
    /// Upper bound of the core size
    pub max_core_size: usize,
    /// How long an idle worker lives before its thread exits
    pub keep_alive: Duration,
    /// Period of the watchdog
    pub watchdog_interval: Duration,
    /// Capacity of the job queue; submissions beyond it are rejected
    pub queue_capacity: usize,
}

impl PoolConfig {
    /// Sizes derived from `cpus` cores
    pub fn for_cpus(cpus: usize) -> Self {
        let cpus = cpus.max(1);
        Self {
            name: "sockflow-worker".to_string(),
            core_size: cpus * 10,
            growth_step: cpus * 2,
            max_core_size: cpus * 100,
            keep_alive: Duration::from_secs(60),
            watchdog_interval: Duration::from_secs(1),
            queue_capacity: 65536,
        }
    }

    /// Growth policy matching this config
    pub fn growth_policy(&self) -> GrowthPolicy {
        GrowthPolicy {
            step: self.growth_step,
            max: self.max_core_size,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::for_cpus(cpu_count())
    }
}

/// A shared, adaptively sized thread pool with a growth watchdog.
///
/// Workers are spawned lazily, up to the core size, whenever queued jobs
/// outnumber idle workers. Idle workers exit after `keep_alive`. Every
/// `watchdog_interval` the watchdog applies the [GrowthPolicy] to the current
/// backlog and load average.
pub struct WorkerPool {
    this: Weak<WorkerPool>,
    config: PoolConfig,
    policy: GrowthPolicy,
    load: Box<dyn LoadSource>,

    core_size: AtomicUsize,
    live: AtomicUsize,
    idle: AtomicUsize,
    running: AtomicBool,

    tx: Sender<Job>,
    rx: Receiver<Job>,

    stopped: Mutex<bool>,
    stop_cv: Condvar,
    wg: Mutex<Option<WaitGroup>>,
}

impl WorkerPool {
    /// Creates a stopped pool; call [WorkerPool::start] before submitting
    pub fn new(config: PoolConfig) -> Arc<Self> {
        Self::with_load_source(config, Box::new(SystemLoad::default()))
    }

    /// Creates a stopped pool reading the load average from `load`
    pub fn with_load_source(config: PoolConfig, load: Box<dyn LoadSource>) -> Arc<Self> {
        let (tx, rx) = smol::channel::bounded(config.queue_capacity.max(1));
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            policy: config.growth_policy(),
            core_size: AtomicUsize::new(config.core_size.max(1)),
            config,
            load,
            live: AtomicUsize::new(0),
            idle: AtomicUsize::new(0),
            running: AtomicBool::new(false),
            tx,
            rx,
            stopped: Mutex::new(false),
            stop_cv: Condvar::new(),
            wg: Mutex::new(Some(WaitGroup::new())),
        })
    }

    /// Starts the watchdog and accepts jobs
    pub fn start(&self) -> Result<()> {
        if self.tx.is_closed() {
            return Err(Error::Config("worker pool was shut down".to_string()));
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let worker = self
            .worker()
            .ok_or_else(|| Error::Config("worker pool was joined".to_string()))?;
        let pool = self.this.clone();
        let interval = self.config.watchdog_interval;
        std::thread::Builder::new()
            .name(format!("{}-watchdog", self.config.name))
            .spawn(move || Self::watchdog(pool, interval, worker))?;
        debug!(
            "worker pool {} started with core size {}",
            self.config.name,
            self.core_size()
        );
        Ok(())
    }

    /// Queues `job`; fails with [Error::Rejected] when the pool is not
    /// running or the queue is full
    pub fn execute<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        if !self.is_running() {
            return Err(Error::Rejected("worker pool is not running".to_string()));
        }
        match self.tx.try_send(Box::new(job)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                return Err(Error::Rejected("worker pool queue is full".to_string()))
            }
            Err(TrySendError::Closed(_)) => {
                return Err(Error::Rejected("worker pool is shut down".to_string()))
            }
        }
        self.ensure_workers();
        Ok(())
    }

    /// Current core size
    pub fn core_size(&self) -> usize {
        self.core_size.load(Ordering::SeqCst)
    }

    /// Number of live worker threads
    pub fn live_workers(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Number of queued jobs
    pub fn backlog(&self) -> usize {
        self.rx.len()
    }

    /// Whether jobs are accepted
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Config the pool was created with
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// One watchdog tick against the live backlog and load average
    pub fn tick(&self) -> usize {
        self.tick_with(self.backlog(), self.load.load_average())
    }

    /// One watchdog tick against the given backlog and load average.
    /// Returns the resulting core size.
    pub fn tick_with(&self, backlog: usize, load: f64) -> usize {
        let current = self.core_size();
        let next = self.policy.next_core_size(current, backlog, load);
        if next > current {
            self.core_size.store(next, Ordering::SeqCst);
            debug!(
                "worker pool {} grew core size {} -> {} (backlog {}, load {:.2})",
                self.config.name, current, next, backlog, load
            );
        }
        if backlog > 0 && self.is_running() {
            self.ensure_workers();
        }
        next
    }

    /// Stops accepting jobs. Queued jobs still run.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.tx.close();
        let mut stopped = self.stopped.lock();
        *stopped = true;
        self.stop_cv.notify_all();
    }

    /// Waits for the watchdog and every worker to exit. Must not be called
    /// from a pool thread.
    pub fn join(&self) {
        let wg = self.wg.lock().take();
        if let Some(wg) = wg {
            smol::block_on(wg.wait());
        }
    }

    fn worker(&self) -> Option<Worker> {
        self.wg.lock().as_ref().map(|wg| wg.worker())
    }

    fn ensure_workers(&self) {
        while self.rx.len() > self.idle.load(Ordering::SeqCst) {
            let core = self.core_size();
            let live = self.live.load(Ordering::SeqCst);
            if live >= core {
                return;
            }
            if self
                .live
                .compare_exchange(live, live + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
                && !self.spawn_worker()
            {
                return;
            }
        }
    }

    fn spawn_worker(&self) -> bool {
        let Some(worker) = self.worker() else {
            self.live.fetch_sub(1, Ordering::SeqCst);
            return false;
        };
        let rx = self.rx.clone();
        let pool = self.this.clone();
        let keep_alive = self.config.keep_alive;
        // the new worker counts as idle until it takes its first job, which
        // may happen before spawn returns
        self.idle.fetch_add(1, Ordering::SeqCst);
        let spawned = std::thread::Builder::new()
            .name(self.config.name.clone())
            .spawn(move || Self::work(pool, rx, keep_alive, worker));
        if let Err(err) = spawned {
            warn!("worker pool {} failed to spawn a worker: {}", self.config.name, err);
            self.idle.fetch_sub(1, Ordering::SeqCst);
            self.live.fetch_sub(1, Ordering::SeqCst);
            return false;
        }
        true
    }

    fn work(pool: Weak<WorkerPool>, rx: Receiver<Job>, keep_alive: Duration, worker: Worker) {
        let _w = worker;
        let pool_name = match pool.upgrade() {
            Some(pool) => pool.config.name.clone(),
            None => return,
        };
        let mut first = true;
        loop {
            if !first {
                if let Some(pool) = pool.upgrade() {
                    pool.idle.fetch_add(1, Ordering::SeqCst);
                }
            }
            first = false;

            let next = smol::block_on(futures_lite::future::or(
                async { Some(rx.recv().await) },
                async {
                    Timer::after(keep_alive).await;
                    None
                },
            ));

            let Some(pool) = pool.upgrade() else {
                return;
            };
            pool.idle.fetch_sub(1, Ordering::SeqCst);

            match next {
                Some(Ok(job)) => {
                    drop(pool);
                    if catch_unwind(AssertUnwindSafe(job)).is_err() {
                        error!("worker pool {} job panicked", pool_name);
                    }
                }
                Some(Err(_)) => {
                    pool.live.fetch_sub(1, Ordering::SeqCst);
                    trace!("worker pool {} worker exit on shutdown", pool.config.name);
                    return;
                }
                None => {
                    pool.live.fetch_sub(1, Ordering::SeqCst);
                    match rx.try_recv() {
                        Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => {
                            trace!("worker pool {} idle worker exit", pool.config.name);
                            return;
                        }
                        Ok(job) => {
                            // a job slipped in while timing out; stay alive for it
                            pool.live.fetch_add(1, Ordering::SeqCst);
                            drop(pool);
                            if catch_unwind(AssertUnwindSafe(job)).is_err() {
                                error!("worker pool {} job panicked", pool_name);
                            }
                        }
                    }
                }
            }
        }
    }

    fn watchdog(pool: Weak<WorkerPool>, interval: Duration, worker: Worker) {
        let _w = worker;
        loop {
            let Some(pool) = pool.upgrade() else {
                return;
            };
            {
                let mut stopped = pool.stopped.lock();
                if !*stopped {
                    pool.stop_cv.wait_for(&mut stopped, interval);
                }
                if *stopped {
                    trace!("worker pool {} watchdog exit", pool.config.name);
                    return;
                }
            }
            pool.tick();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.tx.close();
    }
}

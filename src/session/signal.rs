use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::handler::Message;

/// A condition variable with a generation counter.
///
/// Producers bump the generation after publishing data; waiters re-check their
/// predicate under the signal lock, so no wake-up is lost between the check
/// and the wait.
#[derive(Debug, Default)]
pub struct DataSignal {
    generation: Mutex<u64>,
    cond: Condvar,
}

impl DataSignal {
    /// Creates a new DataSignal
    pub fn new() -> Self {
        Self::default()
    }

    /// Wakes every waiter
    pub fn notify(&self) {
        let mut generation = self.generation.lock();
        *generation = generation.wrapping_add(1);
        self.cond.notify_all();
    }

    /// Current generation
    pub fn generation(&self) -> u64 {
        *self.generation.lock()
    }

    /// Waits until the generation moves past `seen` or `timeout` elapses.
    /// Returns whether the generation moved.
    pub fn wait_changed(&self, seen: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut generation = self.generation.lock();
        while *generation == seen {
            if self.cond.wait_until(&mut generation, deadline).timed_out() {
                return *generation != seen;
            }
        }
        true
    }

    /// Waits until `ready` holds or `deadline` passes, returning the last
    /// value of `ready`
    pub fn wait_until<F: FnMut() -> bool>(&self, deadline: Instant, mut ready: F) -> bool {
        let mut generation = self.generation.lock();
        loop {
            if ready() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            self.cond.wait_until(&mut generation, deadline);
        }
    }
}

/// FIFO of decoded values, or the errors that replaced them, waiting for a
/// synchronous reader
#[derive(Default)]
pub struct ResponseSlot {
    queue: Mutex<VecDeque<Result<Message>>>,
}

impl ResponseSlot {
    /// Creates a new ResponseSlot
    pub fn new() -> Self {
        Self::default()
    }

    /// Parks a response
    pub fn push(&self, response: Result<Message>) {
        self.queue.lock().push_back(response);
    }

    /// Takes the oldest response
    pub fn pop(&self) -> Option<Result<Message>> {
        self.queue.lock().pop_front()
    }

    /// Number of parked responses
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Whether nothing is parked
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

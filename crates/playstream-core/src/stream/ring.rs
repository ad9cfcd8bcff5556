//! Ring transport between the streaming worker and the audio callback
//!
//! One rtrb ring carries interleaved f32 samples from the worker to the
//! realtime thread; a handful of atomic flags plus a counting semaphore
//! carry everything going the other way. The realtime side only ever does
//! atomic stores and semaphore posts, so it can't block behind the worker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};

/// Counting semaphore for "the ring has space" wakeups
///
/// Only the worker thread waits on this; the realtime side posts after
/// freeing ring space (and on start/quit), which at worst takes an
/// uncontended mutex.
pub struct Semaphore {
    count: Mutex<usize>,
    ready: Condvar,
}

impl Semaphore {
    pub fn new() -> Self {
        Self {
            count: Mutex::new(0),
            ready: Condvar::new(),
        }
    }

    /// Add one wakeup
    pub fn post(&self) {
        let mut count = self.count.lock().unwrap();
        *count += 1;
        self.ready.notify_one();
    }

    /// Block until a wakeup is available, then consume it
    pub fn wait(&self) {
        let mut count = self.count.lock().unwrap();
        while *count == 0 {
            count = self.ready.wait(count).unwrap();
        }
        *count -= 1;
    }
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new()
    }
}

/// Cross-thread signaling for one streamer
///
/// `quit` and `restart` carry no data and use Relaxed ordering; the
/// semaphore pairs each change with a wakeup. `producer_done` gates the
/// consumer's done decision against ring emptiness, so it is stored with
/// Release and loaded with Acquire to keep the worker's final ring commit
/// visible before the flag is.
pub struct RingControl {
    /// Worker should exit its loop
    pub quit: AtomicBool,
    /// Worker should tear down and re-run initialize from staged args
    pub restart: AtomicBool,
    /// The source has run out; the ring will not be refilled
    pub producer_done: AtomicBool,
    /// Posted whenever the ring has gained space or a flag changed
    pub space: Semaphore,
}

impl RingControl {
    pub fn new() -> Self {
        Self {
            quit: AtomicBool::new(false),
            restart: AtomicBool::new(false),
            // No source yet, so the stream reads as finished until the
            // first start().
            producer_done: AtomicBool::new(true),
            space: Semaphore::new(),
        }
    }

    #[inline]
    pub fn quit(&self) -> bool {
        self.quit.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn producer_done(&self) -> bool {
        self.producer_done.load(Ordering::Acquire)
    }
}

impl Default for RingControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Create the sample ring with capacity for `samples` f32s
pub fn sample_ring(samples: usize) -> (rtrb::Producer<f32>, rtrb::Consumer<f32>) {
    rtrb::RingBuffer::new(samples)
}

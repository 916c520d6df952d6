//! Fixed-capacity circular buffer of recent latency samples, one per worker.
//!
//! Unlike a full histogram, a reservoir bounds memory at `N workers × capacity`
//! regardless of run length, at the cost of only ever seeing the most recent
//! window of samples per worker. The Scheduler concatenates every worker's
//! snapshot at the end of a run to compute final percentiles.

use std::sync::Mutex;

/// Default reservoir capacity: large enough that percentile quality holds for
/// any worker whose throughput × reporting window stays well under this count.
pub const DEFAULT_CAPACITY: usize = 10_000;

struct Ring {
    buf: Vec<f64>,
    head: usize,
    count: usize,
}

/// A single worker's latency reservoir.
///
/// Each worker owns exactly one; there are no cross-thread writes, so the
/// inner mutex only serializes a worker's own push against a concurrent
/// snapshot read (e.g. the reporter task).
pub struct LatencyReservoir {
    capacity: usize,
    inner: Mutex<Ring>,
}

impl LatencyReservoir {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            inner: Mutex::new(Ring {
                buf: vec![0.0; capacity],
                head: 0,
                count: 0,
            }),
        }
    }

    /// Push a latency sample (milliseconds), overwriting the oldest entry
    /// once the reservoir is full.
    pub fn push(&self, ms: f64) {
        let mut ring = self.inner.lock().unwrap();
        let idx = ring.head;
        ring.buf[idx] = ms;
        ring.head = (ring.head + 1) % self.capacity;
        if ring.count < self.capacity {
            ring.count += 1;
        }
    }

    /// Number of samples currently held (saturates at `capacity`).
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn full(&self) -> bool {
        self.len() == self.capacity
    }

    /// A stable, chronologically ordered (oldest first) snapshot of every
    /// sample currently held.
    pub fn snapshot(&self) -> Vec<f64> {
        let ring = self.inner.lock().unwrap();
        if ring.count < self.capacity {
            ring.buf[..ring.count].to_vec()
        } else {
            let mut out = Vec::with_capacity(self.capacity);
            out.extend_from_slice(&ring.buf[ring.head..]);
            out.extend_from_slice(&ring.buf[..ring.head]);
            out
        }
    }
}

impl Default for LatencyReservoir {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

use crossbeam_queue::ArrayQueue;

use crate::error::{AccelError, Result};
use crate::memory::alloc::{Budget, HostAllocator};

/// Small tier: buffers up to 64 KiB (a few thousand elements).
pub const SMALL_BUF_CAPACITY: usize = 64 * 1024;

/// Large tier: buffers up to 8 MiB.
pub const LARGE_BUF_CAPACITY: usize = 8 * 1024 * 1024;

/// A tiered lock-free pool of host staging buffers.
///
/// Requests up to 64 KiB come from the small tier, up to 8 MiB from the
/// large tier, and anything bigger is allocated fresh. An empty tier falls
/// back to a fresh allocation. Released buffers go back to their tier
/// unless the tier is full or the buffer has grown beyond 4x the tier's
/// capacity.
pub struct StagingPool {
    small: ArrayQueue<Vec<u8>>,
    large: ArrayQueue<Vec<u8>>,
    budget: Budget,
}

impl StagingPool {
    /// Pre-allocate `small_count` small and `large_count` large buffers.
    pub fn new(small_count: usize, large_count: usize) -> Self {
        Self::with_budget(small_count, large_count, Budget::unlimited())
    }

    /// Like [`new`](Self::new), refusing requests once `budget` is exhausted.
    pub fn with_budget(small_count: usize, large_count: usize, budget: Budget) -> Self {
        fn fill_tier(count: usize, capacity: usize) -> ArrayQueue<Vec<u8>> {
            let queue = ArrayQueue::new(count.max(1));
            for _ in 0..count {
                let _ = queue.push(Vec::with_capacity(capacity));
            }
            queue
        }

        Self {
            small: fill_tier(small_count, SMALL_BUF_CAPACITY),
            large: fill_tier(large_count, LARGE_BUF_CAPACITY),
            budget,
        }
    }

    /// Buffers currently idle in the (small, large) tiers.
    pub fn idle(&self) -> (usize, usize) {
        (self.small.len(), self.large.len())
    }

    /// Bytes handed out and not yet released.
    pub fn in_use(&self) -> usize {
        self.budget.in_use()
    }

    /// The tier serving `len`-byte requests and its buffer capacity.
    fn tier_for_size(&self, len: usize) -> (Option<&ArrayQueue<Vec<u8>>>, usize) {
        if len <= SMALL_BUF_CAPACITY {
            (Some(&self.small), SMALL_BUF_CAPACITY)
        } else if len <= LARGE_BUF_CAPACITY {
            (Some(&self.large), LARGE_BUF_CAPACITY)
        } else {
            (None, len)
        }
    }
}

impl HostAllocator for StagingPool {
    fn allocate(&self, len: usize) -> Result<Vec<u8>> {
        self.budget.reserve(len)?;
        let (queue, capacity) = self.tier_for_size(len);
        let mut buf = match queue.and_then(|q| q.pop()) {
            Some(buf) => buf,
            None => {
                let mut fresh = Vec::new();
                if fresh.try_reserve_exact(capacity).is_err() {
                    self.budget.give_back(len);
                    return Err(AccelError::OutOfResource { bytes: len });
                }
                fresh
            }
        };
        buf.resize(len, 0);
        Ok(buf)
    }

    fn release(&self, mut buf: Vec<u8>) {
        self.budget.give_back(buf.len());
        let (queue, capacity) = self.tier_for_size(buf.len());
        if let Some(q) = queue
            && buf.capacity() <= capacity * 4
        {
            buf.clear();
            let _ = q.push(buf);
        }
    }
}

impl std::fmt::Debug for StagingPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagingPool")
            .field("small_idle", &self.small.len())
            .field("large_idle", &self.large.len())
            .field("in_use", &self.budget.in_use())
            .finish()
    }
}

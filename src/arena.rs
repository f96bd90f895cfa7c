//! Segmented job pools.
//!
//! Jobs are bump-allocated from numbered pools. A pool is a list of
//! fixed-size segments that only ever grows; segment storage never moves,
//! so a record reference obtained from any slot stays valid until the arena
//! is dropped. Resetting a pool rewinds its bump index and recycles the
//! slots, which keeps the per-frame hot path free of heap traffic once a
//! steady state is reached.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::job::{AtomicLink, Job, JobFn, JobRef};

/// Slots per segment.
pub(crate) const SEGMENT_LEN: usize = 4096;

/// One numbered pool: a growing list of segments plus the recording and
/// playback state for the frame captured in it.
pub(crate) struct Pool {
    /// Number of slots handed out since the last reset. After a recorded
    /// frame has drained this doubles as the length of the recording.
    pub(crate) bump: AtomicUsize,
    segments: RwLock<Vec<Box<[Job]>>>,
    /// True while the recorded frame is being played back.
    pub(crate) in_playback: AtomicBool,
    /// Recorded jobs that have not yet completed during the current
    /// playback.
    pub(crate) playback_remaining: AtomicUsize,
    /// Job enqueued once the last replayed job completes.
    pub(crate) on_playback_finished: AtomicLink,
}

fn new_segment() -> Box<[Job]> {
    (0..SEGMENT_LEN).map(|_| Job::new()).collect()
}

impl Pool {
    fn new() -> Self {
        Pool {
            bump: AtomicUsize::new(0),
            segments: RwLock::new(vec![new_segment()]),
            in_playback: AtomicBool::new(false),
            playback_remaining: AtomicUsize::new(0),
            on_playback_finished: AtomicLink::empty(),
        }
    }

    /// Returns the record in `slot`, growing the segment list if the slot
    /// does not exist yet.
    pub(crate) fn job(&self, slot: u32) -> &Job {
        let slot = slot as usize;
        self.ensure_slot(slot);
        let segments = self.segments.read();
        let job: *const Job = &segments[slot / SEGMENT_LEN][slot % SEGMENT_LEN];
        // SAFETY: segments are append-only boxed slices. The slice storage
        // does not move when the outer vector reallocates, and segments are
        // never dropped while the pool is alive, so the reference outlives
        // the read guard.
        unsafe { &*job }
    }

    /// Double-checked segment append under the pool's write lock.
    fn ensure_slot(&self, slot: usize) {
        if slot < self.segments.read().len() * SEGMENT_LEN {
            return;
        }
        let mut segments = self.segments.write();
        while segments.len() * SEGMENT_LEN <= slot {
            segments.push(new_segment());
        }
    }
}

/// The set of numbered pools owned by one job system.
pub(crate) struct JobArena {
    pools: RwLock<Vec<Arc<Pool>>>,
}

impl JobArena {
    pub(crate) fn with_pools(initial: usize) -> Self {
        let arena = JobArena {
            pools: RwLock::new(Vec::new()),
        };
        if initial > 0 {
            arena.pool(initial as u32 - 1);
        }
        arena
    }

    /// Returns pool `index`, creating pools up to and including it if they
    /// do not exist yet. Pool indices are dense, starting at 0.
    pub(crate) fn pool(&self, index: u32) -> Arc<Pool> {
        if let Some(pool) = self.pools.read().get(index as usize) {
            return Arc::clone(pool);
        }
        let mut pools = self.pools.write();
        while pools.len() <= index as usize {
            pools.push(Arc::new(Pool::new()));
        }
        Arc::clone(&pools[index as usize])
    }

    /// Resolves a handle to its record.
    pub(crate) fn job(&self, r: JobRef) -> &Job {
        let pools = self.pools.read();
        let pool: *const Pool = Arc::as_ptr(&pools[r.pool() as usize]);
        // SAFETY: pools are append-only and never dropped while the arena
        // is alive, so the Arc contents outlive the read guard.
        unsafe { (*pool).job(r.slot()) }
    }

    /// Bump-allocates a record from `pool_index` and installs `body`.
    ///
    /// Slots whose previous occupant has not completed yet (the `available`
    /// flag is still false after a reset) are skipped by re-allocating, as
    /// in the transient-job allocator this design descends from. The
    /// documented discipline is to reset a pool only once the system has
    /// drained, which keeps this loop finite.
    pub(crate) fn allocate(
        &self,
        pool_index: u32,
        body: Option<JobFn>,
        parent: Option<JobRef>,
    ) -> JobRef {
        let pool = self.pool(pool_index);
        let slot = loop {
            let slot = pool.bump.fetch_add(1, Ordering::Relaxed);
            debug_assert!(slot <= u32::MAX as usize);
            if pool
                .job(slot as u32)
                .available
                .swap(false, Ordering::Acquire)
            {
                break slot as u32;
            }
        };
        let job = pool.job(slot);
        // SAFETY: the swap above transferred ownership of the slot to this
        // call.
        unsafe { job.reset(pool_index, body) };
        let r = JobRef::new(pool_index, slot);
        if let Some(parent) = parent {
            self.link_child(parent, r);
        }
        r
    }

    /// Links `child` under `parent`: bumps the parent's unfinished counter
    /// and appends the child to the recorded child list, strictly before
    /// the child becomes reachable from any queue.
    pub(crate) fn link_child(&self, parent: JobRef, child: JobRef) {
        let p = self.job(parent);
        p.unfinished.fetch_add(1, Ordering::AcqRel);
        let _guard = p.link_lock.lock();
        match p.last_child.load(Ordering::Relaxed) {
            None => p.first_child.store(Some(child), Ordering::Release),
            Some(last) => self
                .job(last)
                .next_sibling
                .store(Some(child), Ordering::Release),
        }
        p.last_child.store(Some(child), Ordering::Relaxed);
    }

    /// Rewinds the bump index of `pool_index`, growing the pool list if
    /// needed. Slots are reused once their previous occupants have marked
    /// themselves available.
    pub(crate) fn reset_pool(&self, pool_index: u32) {
        self.pool(pool_index).bump.store(0, Ordering::Release);
    }
}

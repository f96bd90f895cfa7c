//! Job record definitions.
//!
//! A job is the unit of scheduling: a callable plus the lifecycle
//! bookkeeping needed for fork/join completion and frame replay. Records
//! live in pool segments (see [`crate::arena`]) and are addressed by compact
//! `(pool, slot)` handles rather than pointers, so growth and reuse never
//! invalidate a reference held elsewhere.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use parking_lot::Mutex;

/// The stored form of a job body. Replay re-invokes the same callable on
/// every playback of the recording, hence `FnMut` rather than `FnOnce`.
pub(crate) type JobFn = Box<dyn FnMut() + Send + 'static>;

/// Compact handle to a job record: pool index in the high half, slot index
/// in the low half.
///
/// Handles stay valid for the lifetime of the [`crate::JobSystem`] that
/// issued them; slots are recycled by pool resets, never freed.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct JobRef(u64);

impl JobRef {
    pub(crate) fn new(pool: u32, slot: u32) -> Self {
        JobRef(((pool as u64) << 32) | slot as u64)
    }

    /// Index of the pool this job was allocated from.
    pub fn pool(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Slot index within the owning pool.
    pub fn slot(self) -> u32 {
        self.0 as u32
    }
}

/// An atomic optional [`JobRef`], used for the parent, successor and child
/// links inside a job record. `u64::MAX` encodes "no link".
pub(crate) struct AtomicLink(AtomicU64);

const NONE: u64 = u64::MAX;

impl AtomicLink {
    pub(crate) fn empty() -> Self {
        AtomicLink(AtomicU64::new(NONE))
    }

    pub(crate) fn store(&self, link: Option<JobRef>, order: Ordering) {
        self.0.store(link.map_or(NONE, |r| r.0), order);
    }

    pub(crate) fn load(&self, order: Ordering) -> Option<JobRef> {
        match self.0.load(order) {
            NONE => None,
            raw => Some(JobRef(raw)),
        }
    }

    /// Load-and-clear, for links that are consumed exactly once.
    pub(crate) fn take(&self, order: Ordering) -> Option<JobRef> {
        match self.0.swap(NONE, order) {
            NONE => None,
            raw => Some(JobRef(raw)),
        }
    }
}

/// One job record in a pool segment.
///
/// The atomic fields coordinate the lifecycle between the allocating thread,
/// the executing worker and completing children. The body lives in an
/// `UnsafeCell` because exactly one thread touches it at a time: the
/// allocator writes it before the job is published to a queue, and the
/// single executing worker invokes it afterwards.
pub(crate) struct Job {
    /// `1 + number of children currently running or queued` while the body
    /// is in flight. Reaching 0 fires completion exactly once.
    pub(crate) unfinished: AtomicU32,
    /// True when the slot may be handed out by the allocator again.
    pub(crate) available: AtomicBool,
    /// Pool index the record was allocated from; fixed per allocation.
    pub(crate) owning_pool: AtomicU32,
    /// Parent job notified when this job completes.
    pub(crate) parent: AtomicLink,
    /// Job enqueued exactly when this job completes.
    pub(crate) successor: AtomicLink,
    /// Head of the recorded child list, in submission order.
    pub(crate) first_child: AtomicLink,
    /// Tail of the recorded child list.
    pub(crate) last_child: AtomicLink,
    /// Next recorded sibling under the same parent.
    pub(crate) next_sibling: AtomicLink,
    /// Serializes appends to this job's child list. A parent's own body and
    /// completing children registering continuations may append
    /// concurrently.
    pub(crate) link_lock: Mutex<()>,
    body: UnsafeCell<Option<JobFn>>,
}

// SAFETY: all fields except `body` are atomics or internally synchronized.
// `body` is written by the allocating thread before the handle is published
// to any queue (the queue push/pop pair gives release/acquire ordering) and
// only ever invoked by the one worker currently executing the job.
unsafe impl Sync for Job {}
unsafe impl Send for Job {}

impl Job {
    pub(crate) fn new() -> Self {
        Job {
            unfinished: AtomicU32::new(0),
            available: AtomicBool::new(true),
            owning_pool: AtomicU32::new(0),
            parent: AtomicLink::empty(),
            successor: AtomicLink::empty(),
            first_child: AtomicLink::empty(),
            last_child: AtomicLink::empty(),
            next_sibling: AtomicLink::empty(),
            link_lock: Mutex::new(()),
            body: UnsafeCell::new(None),
        }
    }

    /// Wipes per-allocation state and installs a fresh body.
    ///
    /// # Safety
    ///
    /// The caller must own the slot, i.e. have claimed it by swapping
    /// `available` from true to false, and the previous occupant must have
    /// completed.
    pub(crate) unsafe fn reset(&self, pool: u32, body: Option<JobFn>) {
        self.unfinished.store(0, Ordering::Relaxed);
        self.owning_pool.store(pool, Ordering::Relaxed);
        self.parent.store(None, Ordering::Relaxed);
        self.successor.store(None, Ordering::Relaxed);
        self.first_child.store(None, Ordering::Relaxed);
        self.last_child.store(None, Ordering::Relaxed);
        self.next_sibling.store(None, Ordering::Relaxed);
        // SAFETY: slot ownership per the caller contract; no worker can
        // observe this record until it is enqueued again.
        unsafe { *self.body.get() = body };
    }

    /// Invokes the stored body, if any. Empty-bodied jobs still run the
    /// full completion protocol in the caller.
    ///
    /// # Safety
    ///
    /// Only the worker currently executing this job may call this, and only
    /// once per dequeue.
    pub(crate) unsafe fn run_body(&self) {
        // SAFETY: exclusive access per the caller contract.
        if let Some(body) = unsafe { &mut *self.body.get() }.as_mut() {
            body();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_ref_packs_pool_and_slot() {
        let r = JobRef::new(3, 4097);
        assert_eq!(r.pool(), 3);
        assert_eq!(r.slot(), 4097);
    }

    #[test]
    fn atomic_link_roundtrip() {
        let link = AtomicLink::empty();
        assert_eq!(link.load(Ordering::Relaxed), None);

        let r = JobRef::new(1, 2);
        link.store(Some(r), Ordering::Relaxed);
        assert_eq!(link.load(Ordering::Relaxed), Some(r));

        assert_eq!(link.take(Ordering::Relaxed), Some(r));
        assert_eq!(link.load(Ordering::Relaxed), None);
    }

    #[test]
    fn fresh_job_is_available() {
        let job = Job::new();
        assert!(job.available.load(Ordering::Relaxed));
        assert_eq!(job.unfinished.load(Ordering::Relaxed), 0);
    }
}

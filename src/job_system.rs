//! High-level job system interface and lifecycle engine.
//!
//! The [`JobSystem`] is the primary entry point for scheduling and managing
//! parallel work. It owns the worker pool and the pool arena, drives the
//! fork/join completion protocol, and implements frame record/replay on top
//! of the recording state kept in each job.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam::deque::{Injector, Stealer, Worker as Deque};
use parking_lot::{Condvar, Mutex};

use crate::arena::JobArena;
use crate::error::{Error, Result};
use crate::job::{JobFn, JobRef};
#[cfg(feature = "metrics")]
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::trace::TraceLog;
use crate::worker::{self, WorkerParams};

/// Distinguishes the worker threads of one system from those of any other
/// system living in the same process.
static NEXT_SYSTEM_ID: AtomicUsize = AtomicUsize::new(0);

/// Construction parameters for a [`JobSystem`].
#[derive(Debug, Clone)]
pub struct SystemConfig {
    /// Number of worker threads; 0 means one per hardware thread.
    pub worker_count: usize,
    /// Pools allocated up front. Pool indices beyond this grow the list on
    /// first touch.
    pub initial_pools: usize,
    /// Pin workers to cores in linear order for better cache locality.
    pub pin_workers: bool,
}

impl Default for SystemConfig {
    fn default() -> Self {
        SystemConfig {
            worker_count: 0,
            initial_pools: 1,
            pin_workers: false,
        }
    }
}

/// Shared state between the [`JobSystem`] handle and its workers.
pub(crate) struct Inner {
    id: usize,
    pub(crate) arena: JobArena,
    pub(crate) injector: Injector<JobRef>,
    pub(crate) stealers: Vec<Stealer<JobRef>>,
    terminate: AtomicBool,
    /// Jobs submitted and not yet completed, across all pools.
    outstanding: AtomicUsize,
    wait_lock: Mutex<()>,
    wait_cv: Condvar,
    worker_count: usize,
    pub(crate) trace: TraceLog,
    #[cfg(feature = "metrics")]
    pub(crate) metrics: Metrics,
}

impl Inner {
    pub(crate) fn id(&self) -> usize {
        self.id
    }

    pub(crate) fn terminated(&self) -> bool {
        self.terminate.load(Ordering::Acquire)
    }

    fn allocate(&self, pool: u32, body: Option<JobFn>, parent: Option<JobRef>) -> JobRef {
        #[cfg(feature = "metrics")]
        self.metrics.created.fetch_add(1, Ordering::Relaxed);
        self.arena.allocate(pool, body, parent)
    }

    /// Makes `job` visible to the workers. The outstanding count covers the
    /// job from here until its completion.
    pub(crate) fn enqueue(&self, job: JobRef) {
        #[cfg(feature = "metrics")]
        self.metrics.scheduled.fetch_add(1, Ordering::Relaxed);
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        self.injector.push(job);
    }

    /// Runs one dequeued job through the execution protocol.
    pub(crate) fn execute(&self, worker_index: usize, r: JobRef) {
        #[cfg(feature = "metrics")]
        self.metrics.run.fetch_add(1, Ordering::Relaxed);

        let job = self.arena.job(r);
        // The body counts as an unfinished child of its own job, so
        // completion cannot fire early even if every spawned child finishes
        // before the body returns.
        job.unfinished.store(1, Ordering::Release);

        let started = self.trace.is_enabled().then(Instant::now);

        let previous = worker::set_current_job(Some(r));
        // SAFETY: a dequeued handle is executed by exactly one worker, and
        // the allocation that wrote the body happened before the enqueue.
        unsafe { job.run_body() };
        worker::set_current_job(previous);

        if let Some(started) = started {
            self.trace.record(worker_index, started);
        }

        let pool = self.arena.pool(job.owning_pool.load(Ordering::Relaxed));
        if pool.in_playback.load(Ordering::Acquire) {
            // Playback: re-issue the recorded children in sibling order
            // instead of whatever the body may have tried to spawn.
            let mut child = job.first_child.load(Ordering::Acquire);
            while let Some(c) = child {
                let next = self.arena.job(c).next_sibling.load(Ordering::Acquire);
                job.unfinished.fetch_add(1, Ordering::AcqRel);
                self.enqueue(c);
                child = next;
            }
        }

        if job.unfinished.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.on_complete(r);
        }
    }

    /// Completion protocol for a job whose body and transitive children
    /// have all finished. Propagates upward iteratively: a parent whose
    /// last child this was completes in the next loop iteration.
    fn on_complete(&self, r: JobRef) {
        let mut current = r;
        loop {
            let job = self.arena.job(current);
            #[cfg(feature = "metrics")]
            self.metrics.finished.fetch_add(1, Ordering::Relaxed);

            let parent = job.parent.load(Ordering::Acquire);
            let pool = self.arena.pool(job.owning_pool.load(Ordering::Relaxed));

            // Hand a continuation over to the parent's counter before this
            // job's own decrement reaches the parent, so the parent cannot
            // complete in between. The successor link itself is recording
            // state and survives for replay.
            if let Some(successor) = job.successor.load(Ordering::Acquire) {
                if let Some(parent) = parent {
                    self.arena
                        .job(parent)
                        .unfinished
                        .fetch_add(1, Ordering::AcqRel);
                }
                self.enqueue(successor);
            }

            job.available.store(true, Ordering::Release);

            // Count the recorded frame down as its jobs complete; the
            // playback callback runs only once the whole tree has drained.
            if pool.in_playback.load(Ordering::Acquire)
                && pool.playback_remaining.fetch_sub(1, Ordering::AcqRel) == 1
            {
                pool.in_playback.store(false, Ordering::Release);
                if let Some(callback) = pool.on_playback_finished.take(Ordering::AcqRel) {
                    self.enqueue(callback);
                }
            }

            if self.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
                let _guard = self.wait_lock.lock();
                self.wait_cv.notify_all();
            }

            match parent {
                Some(parent)
                    if self
                        .arena
                        .job(parent)
                        .unfinished
                        .fetch_sub(1, Ordering::AcqRel)
                        == 1 =>
                {
                    current = parent;
                }
                _ => return,
            }
        }
    }
}

/// The main job system managing worker threads and job pools.
///
/// Handles are cheap to share behind an `Arc`; job bodies typically capture
/// a clone of such an `Arc` to submit children or continuations. Note that
/// bodies capturing the system keep it alive, so shutdown must be explicit:
/// call [`JobSystem::terminate`] followed by
/// [`JobSystem::wait_for_termination`] (or [`JobSystem::shutdown`]).
pub struct JobSystem {
    inner: Arc<Inner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl JobSystem {
    /// Creates a job system and starts its worker pool.
    ///
    /// # Example
    ///
    /// ```
    /// use framejob::{JobSystem, SystemConfig};
    ///
    /// let system = JobSystem::new(SystemConfig {
    ///     worker_count: 4,
    ///     ..SystemConfig::default()
    /// })
    /// .unwrap();
    /// assert_eq!(system.worker_count(), 4);
    /// ```
    pub fn new(config: SystemConfig) -> Result<Self> {
        let worker_count = if config.worker_count == 0 {
            thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
        } else {
            config.worker_count
        };

        let mut locals = Vec::with_capacity(worker_count);
        let mut stealers = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let deque = Deque::new_fifo();
            stealers.push(deque.stealer());
            locals.push(deque);
        }

        let inner = Arc::new(Inner {
            id: NEXT_SYSTEM_ID.fetch_add(1, Ordering::Relaxed),
            arena: JobArena::with_pools(config.initial_pools),
            injector: Injector::new(),
            stealers,
            terminate: AtomicBool::new(false),
            outstanding: AtomicUsize::new(0),
            wait_lock: Mutex::new(()),
            wait_cv: Condvar::new(),
            worker_count,
            trace: TraceLog::new(worker_count),
            #[cfg(feature = "metrics")]
            metrics: Metrics::new(),
        });

        let core_ids = if config.pin_workers {
            core_affinity::get_core_ids().unwrap_or_default()
        } else {
            Vec::new()
        };

        let mut handles = Vec::with_capacity(worker_count);
        for (index, local) in locals.into_iter().enumerate() {
            let core_id = if core_ids.is_empty() {
                None
            } else {
                Some(core_ids[index % core_ids.len()])
            };
            let params = WorkerParams {
                index,
                local,
                inner: Arc::clone(&inner),
                core_id,
            };
            match worker::spawn(params) {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    inner.terminate.store(true, Ordering::Release);
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(Error::WorkerSpawn(err));
                }
            }
        }

        log::info!("job system started with {} workers", worker_count);
        Ok(JobSystem {
            inner,
            workers: Mutex::new(handles),
        })
    }

    /// Creates a job system with `worker_count` workers and default
    /// settings otherwise.
    pub fn with_workers(worker_count: usize) -> Result<Self> {
        JobSystem::new(SystemConfig {
            worker_count,
            ..SystemConfig::default()
        })
    }

    /// Submits a parentless job into `pool`.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use framejob::JobSystem;
    ///
    /// let system = JobSystem::with_workers(2).unwrap();
    /// system.submit(0, || println!("Hello from a job!"));
    /// system.wait();
    /// ```
    pub fn submit<F>(&self, pool: u32, f: F)
    where
        F: FnMut() + Send + 'static,
    {
        let job = self.inner.allocate(pool, Some(Box::new(f)), None);
        self.inner.enqueue(job);
    }

    /// Submits a job into `pool` as a child of the job currently executing
    /// on this thread.
    ///
    /// The parent completes only after the child (and the child's own
    /// subtree) has completed. Called outside a job this behaves like
    /// [`JobSystem::submit`]. While `pool` is being played back the call is
    /// suppressed entirely, so recorded bodies may run unchanged.
    pub fn submit_child<F>(&self, pool: u32, f: F)
    where
        F: FnMut() + Send + 'static,
    {
        if self.inner.arena.pool(pool).in_playback.load(Ordering::Acquire) {
            return;
        }
        let parent = self.current_job();
        let job = self.inner.allocate(pool, Some(Box::new(f)), parent);
        self.inner.enqueue(job);
    }

    /// Registers `f` to run exactly when the current job completes, i.e.
    /// after its body and all of its children have finished.
    ///
    /// The continuation takes the current job's place in the tree: it is
    /// adopted by the current job's parent, so a grandparent waits for the
    /// continuation as it waited for the job itself. A continuation of a
    /// root-level job consequently has no parent. Registering twice
    /// replaces the earlier continuation.
    ///
    /// Called outside a job this is a no-op, as it is during playback of
    /// the current job's pool (the continuation is already part of the
    /// recording).
    pub fn continuation<F>(&self, f: F)
    where
        F: FnMut() + Send + 'static,
    {
        let Some(current) = self.current_job() else {
            return;
        };
        let job = self.inner.arena.job(current);
        let pool_index = job.owning_pool.load(Ordering::Relaxed);
        if self
            .inner
            .arena
            .pool(pool_index)
            .in_playback
            .load(Ordering::Acquire)
        {
            return;
        }

        let parent = job.parent.load(Ordering::Acquire);
        let successor = self.inner.allocate(pool_index, Some(Box::new(f)), None);
        // The parent's counter is bumped at completion time, not here, so a
        // replayed run performs the identical handover.
        self.inner
            .arena
            .job(successor)
            .parent
            .store(parent, Ordering::Release);
        job.successor.store(Some(successor), Ordering::Release);
    }

    /// Plays back the frame recorded in `pool`, then schedules `on_finished`.
    ///
    /// The recording is the spawn tree captured since the last
    /// [`JobSystem::reset_pool`]: the first job submitted into the pool is
    /// the frame root, and every child submitted under it during that frame
    /// is re-issued in sibling order without re-running user spawn logic.
    /// If the pool recorded nothing, `on_finished` is scheduled
    /// immediately and playback state is never entered.
    ///
    /// The previous frame must have drained (see [`JobSystem::wait`])
    /// before the pool is played back. The `on_finished` job is allocated
    /// outside the replayed pool so repeated playbacks re-run an identical
    /// job set.
    pub fn play_back_pool<F>(&self, pool_index: u32, on_finished: F)
    where
        F: FnMut() + Send + 'static,
    {
        let pool = self.inner.arena.pool(pool_index);
        let recorded = pool.bump.load(Ordering::Acquire);

        let callback_pool = match self.current_job() {
            Some(current) if current.pool() != pool_index => current.pool(),
            _ if pool_index == 0 => 1,
            _ => 0,
        };
        let callback = self
            .inner
            .allocate(callback_pool, Some(Box::new(on_finished)), None);

        if recorded == 0 {
            self.inner.enqueue(callback);
            return;
        }

        pool.on_playback_finished
            .store(Some(callback), Ordering::Release);
        pool.playback_remaining.store(recorded, Ordering::Release);
        pool.in_playback.store(true, Ordering::Release);
        self.inner.enqueue(JobRef::new(pool_index, 0));
    }

    /// Rewinds the bump index of `pool`, growing the pool list if needed.
    ///
    /// Reset a pool only while the system is drained
    /// (after [`JobSystem::wait`]); slots of jobs still in flight are
    /// skipped by the allocator until they complete.
    pub fn reset_pool(&self, pool: u32) {
        self.inner.arena.reset_pool(pool);
    }

    /// Blocks the calling thread until every submitted job has completed.
    ///
    /// Must not be called from inside a job; a blocked worker cannot help
    /// drain the system.
    pub fn wait(&self) {
        let mut guard = self.inner.wait_lock.lock();
        while self.inner.outstanding.load(Ordering::Acquire) != 0 {
            self.inner.wait_cv.wait(&mut guard);
        }
    }

    /// Signals the workers to exit their loops. Callable from any thread,
    /// including from inside a job body. Jobs still queued are abandoned.
    pub fn terminate(&self) {
        self.inner.terminate.store(true, Ordering::Release);
    }

    /// Joins all worker threads. Returns an error carrying the number of
    /// workers that panicked while running job bodies.
    pub fn wait_for_termination(&self) -> Result<()> {
        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        let mut panicked = 0;
        for handle in handles {
            if handle.join().is_err() {
                panicked += 1;
            }
        }
        if panicked > 0 {
            log::warn!("{} worker thread(s) panicked", panicked);
            return Err(Error::WorkerPanicked(panicked));
        }
        Ok(())
    }

    /// Terminates the system and joins its workers.
    pub fn shutdown(&self) -> Result<()> {
        self.terminate();
        self.wait_for_termination()
    }

    /// Handle of the job currently executing on this thread, or `None` when
    /// called outside a worker of this system.
    pub fn current_job(&self) -> Option<JobRef> {
        worker::current_job(self.inner.id())
    }

    /// Fixed size of the worker pool.
    pub fn worker_count(&self) -> usize {
        self.inner.worker_count
    }

    /// Starts recording job execution spans for chrome://tracing export.
    pub fn enable_logging(&self) {
        self.inner.trace.enable();
    }

    /// Stops recording job execution spans.
    pub fn disable_logging(&self) {
        self.inner.trace.disable();
    }

    /// Whether job execution spans are currently recorded.
    pub fn is_logging(&self) -> bool {
        self.inner.trace.is_enabled()
    }

    /// Writes the recorded execution spans to `path` in chrome tracing
    /// format and clears them.
    pub fn save_trace<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        self.inner.trace.save(path.as_ref())
    }

    /// Snapshot of the throughput counters.
    #[cfg(feature = "metrics")]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }
}

impl Drop for JobSystem {
    fn drop(&mut self) {
        self.terminate();
        let _ = self.wait_for_termination();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn creation_resolves_worker_count() {
        let system = JobSystem::with_workers(4).unwrap();
        assert_eq!(system.worker_count(), 4);
        system.shutdown().unwrap();
    }

    #[test]
    fn zero_workers_defaults_to_hardware_parallelism() {
        let system = JobSystem::new(SystemConfig::default()).unwrap();
        assert!(system.worker_count() > 0);
        system.shutdown().unwrap();
    }

    #[test]
    fn runs_a_submitted_job() {
        let system = JobSystem::with_workers(2).unwrap();
        let executed = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&executed);
        system.submit(0, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        system.wait();
        assert_eq!(executed.load(Ordering::SeqCst), 1);
        system.shutdown().unwrap();
    }

    #[test]
    fn current_job_is_none_outside_workers() {
        let system = JobSystem::with_workers(2).unwrap();
        assert_eq!(system.current_job(), None);
        system.shutdown().unwrap();
    }

    #[test]
    fn current_job_is_set_inside_a_body() {
        let system = Arc::new(JobSystem::with_workers(2).unwrap());
        let observed = Arc::new(AtomicUsize::new(0));

        let sys = Arc::clone(&system);
        let seen = Arc::clone(&observed);
        system.submit(0, move || {
            if sys.current_job().is_some() {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        });

        system.wait();
        assert_eq!(observed.load(Ordering::SeqCst), 1);
        system.shutdown().unwrap();
    }
}

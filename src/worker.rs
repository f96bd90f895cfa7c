//! Worker thread implementation.
//!
//! Each worker owns a FIFO deque and continuously pulls job handles from
//! it, falling back to batch-stealing from the shared injector and then to
//! stealing from randomly chosen peers. Workers bind their identity to
//! thread-local state so that a running job body can observe its own handle
//! and submit children under it.

use std::cell::Cell;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::deque::{Steal, Worker as Deque};
use rand::{thread_rng, Rng};

use crate::job::JobRef;
use crate::job_system::Inner;

/// Failed steal attempts from random peers before the worker goes idle.
const STEAL_ATTEMPTS: usize = 5;
/// Contended injector steals before backing off.
const INJECTOR_RETRIES: usize = 3;
/// Idle nap between scavenging rounds; short enough to keep the steal loop
/// responsive.
const IDLE_SLEEP: Duration = Duration::from_micros(100);

/// Identity of the worker running on this thread, if any.
#[derive(Clone, Copy)]
struct WorkerTls {
    system: usize,
    current: Option<JobRef>,
}

thread_local! {
    static WORKER_TLS: Cell<Option<WorkerTls>> = const { Cell::new(None) };
}

/// Handle of the job currently executing on this thread, provided the
/// thread is a worker of the system identified by `system`.
pub(crate) fn current_job(system: usize) -> Option<JobRef> {
    WORKER_TLS.with(|cell| {
        cell.get()
            .filter(|tls| tls.system == system)
            .and_then(|tls| tls.current)
    })
}

/// Replaces the current-job binding, returning the previous one.
pub(crate) fn set_current_job(job: Option<JobRef>) -> Option<JobRef> {
    WORKER_TLS.with(|cell| {
        let Some(mut tls) = cell.get() else {
            return None;
        };
        let previous = tls.current;
        tls.current = job;
        cell.set(Some(tls));
        previous
    })
}

pub(crate) struct WorkerParams {
    pub(crate) index: usize,
    pub(crate) local: Deque<JobRef>,
    pub(crate) inner: Arc<Inner>,
    pub(crate) core_id: Option<core_affinity::CoreId>,
}

/// Spawns one named worker thread.
pub(crate) fn spawn(params: WorkerParams) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("framejob-worker-{}", params.index))
        .spawn(move || run(params))
}

/// Main worker loop: local pop, injector batch-steal, random peer steal,
/// brief sleep. The terminate flag is observed once per iteration, so
/// workers exit promptly even when set from inside a job body.
fn run(params: WorkerParams) {
    let WorkerParams {
        index,
        local,
        inner,
        core_id,
    } = params;

    if let Some(core_id) = core_id {
        core_affinity::set_for_current(core_id);
    }

    WORKER_TLS.with(|cell| {
        cell.set(Some(WorkerTls {
            system: inner.id(),
            current: None,
        }))
    });
    log::debug!("worker {} started", index);

    let mut rng = thread_rng();
    while !inner.terminated() {
        let job = local
            .pop()
            .or_else(|| take_from_injector(&inner, &local))
            .or_else(|| steal_from_peers(&inner, index, &mut rng));

        match job {
            Some(job) => inner.execute(index, job),
            None => thread::sleep(IDLE_SLEEP),
        }
    }

    log::debug!("worker {} exiting", index);
}

/// Moves a batch of submitted jobs into the local deque and pops one.
fn take_from_injector(inner: &Inner, local: &Deque<JobRef>) -> Option<JobRef> {
    let mut retries = 0;
    loop {
        match inner.injector.steal_batch_and_pop(local) {
            Steal::Success(job) => return Some(job),
            Steal::Empty => return None,
            Steal::Retry => {
                retries += 1;
                if retries >= INJECTOR_RETRIES {
                    return None;
                }
            }
        }
    }
}

/// A bounded number of steal attempts against random peers distinct from
/// the calling worker.
fn steal_from_peers(inner: &Inner, index: usize, rng: &mut impl Rng) -> Option<JobRef> {
    let peers = inner.stealers.len();
    if peers <= 1 {
        return None;
    }
    for _ in 0..STEAL_ATTEMPTS {
        let victim = rng.gen_range(0..peers);
        if victim == index {
            continue;
        }
        loop {
            match inner.stealers[victim].steal() {
                Steal::Success(job) => return Some(job),
                Steal::Retry => continue,
                Steal::Empty => break,
            }
        }
    }
    None
}

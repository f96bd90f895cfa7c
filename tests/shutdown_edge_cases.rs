//! Termination and misuse-contract edge cases.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use framejob::{JobSystem, SystemConfig};

#[test]
fn terminate_from_inside_a_job_body() {
    let system = Arc::new(JobSystem::with_workers(2).unwrap());
    let ran = Arc::new(AtomicUsize::new(0));

    let sys = Arc::clone(&system);
    let r = Arc::clone(&ran);
    system.submit(0, move || {
        r.fetch_add(1, Ordering::SeqCst);
        sys.terminate();
    });

    system.wait_for_termination().unwrap();
    assert_eq!(ran.load(Ordering::SeqCst), 1);
}

#[test]
fn submit_child_outside_a_job_behaves_like_submit() {
    let system = JobSystem::with_workers(2).unwrap();
    let ran = Arc::new(AtomicUsize::new(0));

    let r = Arc::clone(&ran);
    system.submit_child(0, move || {
        r.fetch_add(1, Ordering::SeqCst);
    });

    system.wait();
    assert_eq!(ran.load(Ordering::SeqCst), 1);
    system.shutdown().unwrap();
}

#[test]
fn single_worker_system_executes_jobs() {
    let system = JobSystem::with_workers(1).unwrap();
    let ran = Arc::new(AtomicUsize::new(0));

    for _ in 0..16 {
        let r = Arc::clone(&ran);
        system.submit(0, move || {
            r.fetch_add(1, Ordering::SeqCst);
        });
    }

    system.wait();
    assert_eq!(ran.load(Ordering::SeqCst), 16);
    system.shutdown().unwrap();
}

#[test]
fn drop_joins_workers() {
    let ran = Arc::new(AtomicUsize::new(0));
    {
        let system = JobSystem::with_workers(2).unwrap();
        let r = Arc::clone(&ran);
        system.submit(0, move || {
            r.fetch_add(1, Ordering::SeqCst);
        });
        system.wait();
        // Dropping the system terminates and joins the workers.
    }
    assert_eq!(ran.load(Ordering::SeqCst), 1);
}

#[test]
fn shutdown_is_idempotent_about_joining() {
    let system = JobSystem::with_workers(2).unwrap();
    system.shutdown().unwrap();
    // A second call finds no handles left to join.
    system.wait_for_termination().unwrap();
}

#[test]
fn initial_pools_are_preallocated_and_grow_on_demand() {
    let system = JobSystem::new(SystemConfig {
        worker_count: 2,
        initial_pools: 3,
        ..SystemConfig::default()
    })
    .unwrap();
    let ran = Arc::new(AtomicUsize::new(0));

    // Touching a pool index beyond the preallocated range grows the list.
    for pool in [0u32, 2, 9] {
        let r = Arc::clone(&ran);
        system.submit(pool, move || {
            r.fetch_add(1, Ordering::SeqCst);
        });
    }

    system.wait();
    assert_eq!(ran.load(Ordering::SeqCst), 3);
    system.shutdown().unwrap();
}

#[test]
fn outstanding_jobs_at_termination_are_abandoned() {
    let system = JobSystem::with_workers(1).unwrap();
    let ran = Arc::new(AtomicUsize::new(0));

    // Terminate first, then flood; workers exit without draining the
    // queues and the abandoned jobs must not prevent the join.
    system.terminate();
    for _ in 0..64 {
        let r = Arc::clone(&ran);
        system.submit(0, move || {
            r.fetch_add(1, Ordering::SeqCst);
        });
    }

    system.wait_for_termination().unwrap();
}

//! Frame record/replay: capturing a spawn tree into a pool and playing it
//! back without re-running user spawn logic.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use framejob::JobSystem;

fn binary_tree(
    system: Arc<JobSystem>,
    pool: u32,
    depth: u32,
    ran: Arc<AtomicUsize>,
) -> Box<dyn FnMut() + Send + 'static> {
    Box::new(move || {
        ran.fetch_add(1, Ordering::SeqCst);
        if depth > 1 {
            for _ in 0..2 {
                system.submit_child(
                    pool,
                    binary_tree(Arc::clone(&system), pool, depth - 1, Arc::clone(&ran)),
                );
            }
        }
    })
}

/// Playback callback that bumps `done` and chains the next playback of the
/// same pool until the round count is used up.
fn chained_playback(
    system: Arc<JobSystem>,
    pool: u32,
    rounds_left: usize,
    done: Arc<AtomicUsize>,
) -> Box<dyn FnMut() + Send + 'static> {
    Box::new(move || {
        done.fetch_add(1, Ordering::SeqCst);
        if rounds_left > 1 {
            system.play_back_pool(
                pool,
                chained_playback(
                    Arc::clone(&system),
                    pool,
                    rounds_left - 1,
                    Arc::clone(&done),
                ),
            );
        }
    })
}

#[test]
fn recorded_tree_replays_three_times() {
    let system = Arc::new(JobSystem::with_workers(4).unwrap());
    let ran = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(AtomicUsize::new(0));

    // Record a 15-job binary tree into pool 1.
    system.reset_pool(1);
    system.submit(1, binary_tree(Arc::clone(&system), 1, 4, Arc::clone(&ran)));
    system.wait();
    assert_eq!(ran.load(Ordering::SeqCst), 15);

    // Replay it three times, each playback chained from the previous
    // playback's completion callback.
    system.play_back_pool(
        1,
        chained_playback(Arc::clone(&system), 1, 3, Arc::clone(&done)),
    );
    system.wait();

    assert_eq!(done.load(Ordering::SeqCst), 3);
    assert_eq!(ran.load(Ordering::SeqCst), 15 + 3 * 15);
    system.shutdown().unwrap();
}

#[test]
fn playback_of_empty_pool_fires_callback_immediately() {
    let system = JobSystem::with_workers(2).unwrap();
    let done = Arc::new(AtomicUsize::new(0));

    system.reset_pool(2);
    let d = Arc::clone(&done);
    system.play_back_pool(2, move || {
        d.fetch_add(1, Ordering::SeqCst);
    });

    system.wait();
    assert_eq!(done.load(Ordering::SeqCst), 1);
    system.shutdown().unwrap();
}

#[test]
fn spawn_calls_inside_replayed_bodies_are_suppressed() {
    let system = Arc::new(JobSystem::with_workers(2).unwrap());
    let ran = Arc::new(AtomicUsize::new(0));

    // The recorded root spawns one child through the normal submission API.
    system.reset_pool(3);
    let sys = Arc::clone(&system);
    let ran_in_tree = Arc::clone(&ran);
    system.submit(3, move || {
        ran_in_tree.fetch_add(1, Ordering::SeqCst);
        let leaf_ran = Arc::clone(&ran_in_tree);
        sys.submit_child(3, move || {
            leaf_ran.fetch_add(1, Ordering::SeqCst);
        });
    });
    system.wait();
    assert_eq!(ran.load(Ordering::SeqCst), 2);

    // Each replay re-runs exactly the two recorded bodies; the root's
    // submit_child is a no-op while the pool plays back, so the recording
    // does not grow.
    for round in 1..=2usize {
        let done = Arc::new(AtomicUsize::new(0));
        let d = Arc::clone(&done);
        system.play_back_pool(3, move || {
            d.fetch_add(1, Ordering::SeqCst);
        });
        system.wait();
        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert_eq!(ran.load(Ordering::SeqCst), 2 + round * 2);
    }

    system.shutdown().unwrap();
}

#[test]
fn reset_and_re_record_discards_the_previous_tree() {
    let system = Arc::new(JobSystem::with_workers(2).unwrap());
    let ran = Arc::new(AtomicUsize::new(0));

    // First frame: root plus two children.
    system.reset_pool(4);
    system.submit(4, binary_tree(Arc::clone(&system), 4, 2, Arc::clone(&ran)));
    system.wait();
    assert_eq!(ran.load(Ordering::SeqCst), 3);

    // Re-record a smaller frame: root plus one child.
    system.reset_pool(4);
    let sys = Arc::clone(&system);
    let ran_in_tree = Arc::clone(&ran);
    system.submit(4, move || {
        ran_in_tree.fetch_add(1, Ordering::SeqCst);
        let leaf_ran = Arc::clone(&ran_in_tree);
        sys.submit_child(4, move || {
            leaf_ran.fetch_add(1, Ordering::SeqCst);
        });
    });
    system.wait();
    assert_eq!(ran.load(Ordering::SeqCst), 5);

    // Playback sees only the second recording.
    let done = Arc::new(AtomicUsize::new(0));
    let d = Arc::clone(&done);
    system.play_back_pool(4, move || {
        d.fetch_add(1, Ordering::SeqCst);
    });
    system.wait();
    assert_eq!(done.load(Ordering::SeqCst), 1);
    assert_eq!(ran.load(Ordering::SeqCst), 7);
    system.shutdown().unwrap();
}

#[test]
fn recorded_continuation_replays_after_its_predecessor() {
    let system = Arc::new(JobSystem::with_workers(4).unwrap());
    let body_runs = Arc::new(AtomicUsize::new(0));
    let continuation_runs = Arc::new(AtomicUsize::new(0));
    let bodies_seen_by_continuation = Arc::new(AtomicUsize::new(0));

    // Record: a root whose child registers a continuation. The
    // continuation is allocated in the same pool, so it is part of the
    // recording.
    system.reset_pool(5);
    let sys = Arc::clone(&system);
    let bodies = Arc::clone(&body_runs);
    let cont = Arc::clone(&continuation_runs);
    let seen = Arc::clone(&bodies_seen_by_continuation);
    system.submit(5, move || {
        bodies.fetch_add(1, Ordering::SeqCst);
        let sys_in_child = Arc::clone(&sys);
        let bodies = Arc::clone(&bodies);
        let cont = Arc::clone(&cont);
        let seen = Arc::clone(&seen);
        sys.submit_child(5, move || {
            bodies.fetch_add(1, Ordering::SeqCst);
            let bodies = Arc::clone(&bodies);
            let cont = Arc::clone(&cont);
            let seen = Arc::clone(&seen);
            sys_in_child.continuation(move || {
                seen.store(bodies.load(Ordering::SeqCst), Ordering::SeqCst);
                cont.fetch_add(1, Ordering::SeqCst);
            });
        });
    });
    system.wait();
    assert_eq!(body_runs.load(Ordering::SeqCst), 2);
    assert_eq!(continuation_runs.load(Ordering::SeqCst), 1);

    // Replay runs root, child and the recorded continuation again, with
    // the continuation still ordered after the child's body.
    let done = Arc::new(AtomicUsize::new(0));
    let d = Arc::clone(&done);
    system.play_back_pool(5, move || {
        d.fetch_add(1, Ordering::SeqCst);
    });
    system.wait();
    assert_eq!(done.load(Ordering::SeqCst), 1);
    assert_eq!(body_runs.load(Ordering::SeqCst), 4);
    assert_eq!(continuation_runs.load(Ordering::SeqCst), 2);
    assert_eq!(bodies_seen_by_continuation.load(Ordering::SeqCst), 4);
    system.shutdown().unwrap();
}

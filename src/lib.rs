//! # framejob - Fork/Join Job Scheduler for Frame-Oriented Workloads
//!
//! A fork/join job scheduler in the spirit of game-engine job systems.
//! Applications decompose work into small, independent jobs organized into
//! parent/child trees; the scheduler executes them across a fixed pool of
//! worker threads using work stealing, propagates completion upward through
//! the tree, and notifies the driving thread once the whole outstanding job
//! set has drained.
//!
//! ## Architecture
//!
//! - **Jobs**: a callable plus lifecycle bookkeeping, bump-allocated from
//!   numbered, resettable pools of address-stable segments
//! - **Workers**: OS threads, one local queue each, stealing from random
//!   peers and a shared injector when idle
//! - **Fork/join**: a parent completes only after its body and all of its
//!   transitive children have completed; a continuation runs exactly when
//!   its predecessor completes
//! - **Record/replay**: the spawn tree of a frame recorded into a pool can
//!   be played back on later frames without re-running user spawn logic
//!
//! ## Example
//!
//! ```no_run
//! use framejob::{JobSystem, SystemConfig};
//!
//! let system = JobSystem::new(SystemConfig::default()).unwrap();
//!
//! system.submit(0, || {
//!     println!("Hello from a job!");
//! });
//!
//! system.wait();
//! system.terminate();
//! system.wait_for_termination().unwrap();
//! ```

mod arena;
pub mod error;
pub mod job;
pub mod job_system;
#[cfg(feature = "metrics")]
pub mod metrics;
mod trace;
mod worker;

pub use error::{Error, Result};
pub use job::JobRef;
pub use job_system::{JobSystem, SystemConfig};
#[cfg(feature = "metrics")]
pub use metrics::MetricsSnapshot;

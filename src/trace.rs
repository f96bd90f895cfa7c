//! Job execution tracing.
//!
//! When enabled, each worker records the start time and duration of every
//! job body it runs into its own buffer. The collected spans can be written
//! out as a JSON file loadable in chrome://tracing or ui.perfetto.dev.
//! Recording costs one `Instant` pair per job and an uncontended lock, so
//! it is cheap enough to leave on for whole frames.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

/// One executed job body.
struct JobSpan {
    start_us: u64,
    duration_us: u64,
}

/// Per-system trace sink with one span buffer per worker.
pub(crate) struct TraceLog {
    enabled: AtomicBool,
    origin: Instant,
    buffers: Vec<Mutex<Vec<JobSpan>>>,
}

impl TraceLog {
    pub(crate) fn new(worker_count: usize) -> Self {
        TraceLog {
            enabled: AtomicBool::new(false),
            origin: Instant::now(),
            buffers: (0..worker_count).map(|_| Mutex::new(Vec::new())).collect(),
        }
    }

    pub(crate) fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }

    pub(crate) fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Records a span that started at `started` and ends now.
    pub(crate) fn record(&self, worker: usize, started: Instant) {
        let Some(buffer) = self.buffers.get(worker) else {
            return;
        };
        let span = JobSpan {
            start_us: started.duration_since(self.origin).as_micros() as u64,
            duration_us: started.elapsed().as_micros() as u64,
        };
        buffer.lock().push(span);
    }

    /// Writes all collected spans to `path` in chrome tracing format and
    /// clears the buffers.
    pub(crate) fn save(&self, path: &Path) -> std::io::Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        writeln!(writer, "{{")?;
        writeln!(writer, "\"traceEvents\": [")?;
        let mut first = true;
        for (worker, buffer) in self.buffers.iter().enumerate() {
            let mut spans = buffer.lock();
            for span in spans.iter() {
                if !first {
                    writeln!(writer, ",")?;
                }
                first = false;
                // ph: X is a complete event carrying its own duration.
                write!(
                    writer,
                    "{{\"cat\": \"job\", \"pid\": 0, \"tid\": {}, \"ts\": {}, \"dur\": {}, \"ph\": \"X\", \"name\": \"job\", \"args\": {{}}}}",
                    worker, span.start_us, span.duration_us
                )?;
            }
            spans.clear();
        }
        writeln!(writer)?;
        writeln!(writer, "],")?;
        writeln!(writer, "\"displayTimeUnit\": \"ms\"")?;
        writeln!(writer, "}}")?;
        writer.flush()
    }
}

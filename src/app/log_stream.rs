// FlightDeck - app/log_stream.rs
//
// Engine log draining.
//
// Architecture:
//   - `LogStream` is owned by the session controller; `run_log_stream` runs
//     on a background thread polling the engine's index-addressed buffer.
//   - An `Arc<AtomicBool>` stop flag lets the owner end the loop; it is
//     checked at the top of each iteration, so a started fetch/trim step
//     always completes.
//   - Records go to a consumer closure; the controller's closure forwards
//     them over its own mpsc channel.
//
// Delivery:
//   - Each iteration reads indices 0..len in order, then trims the engine
//     buffer through len-1 with a single delete-since call. Within one run
//     no index is delivered twice.
//   - A length of `LOG_CHANNEL_CLOSED` means the engine is gone; the loop
//     exits without further calls.
//   - The sleep between iterations is split into short slices so a stop
//     request is observed promptly.

use crate::core::model::{LineKind, LogLine, LogRecord};
use crate::engine::Engine;
use crate::util::constants::{LOG_CHANNEL_CLOSED, LOG_STOP_CHECK_INTERVAL_MS};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

// =============================================================================
// LogStream
// =============================================================================

/// Background polling loop over one engine's log buffer.
pub struct LogStream {
    stop_flag: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl LogStream {
    /// Launch the polling loop and return immediately.
    ///
    /// `consumer` receives every record in index order. Returning `false`
    /// from it ends the stream after the current batch has been trimmed.
    pub fn start<E, F>(engine: Arc<E>, interval: Duration, consumer: F) -> Self
    where
        E: Engine + ?Sized,
        F: FnMut(LogRecord) -> bool + Send + 'static,
    {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));

        let stop = Arc::clone(&stop_flag);
        let done = Arc::clone(&finished);
        let handle = std::thread::spawn(move || {
            let delivered = run_log_stream(engine.as_ref(), interval, &stop, consumer);
            tracing::debug!(delivered, "Log stream ended");
            done.store(true, Ordering::SeqCst);
        });

        tracing::debug!(interval_ms = interval.as_millis() as u64, "Log stream started");
        Self {
            stop_flag,
            finished,
            handle: Some(handle),
        }
    }

    /// Ask the loop to exit at the top of its next iteration. Does not wait.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
    }

    /// Wait for the background thread to finish. Call `stop` first unless
    /// the engine is known to be closing its log channel.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("Log stream thread panicked");
            }
        }
    }

    /// `true` while the background loop is still running.
    pub fn is_active(&self) -> bool {
        self.handle.is_some() && !self.finished.load(Ordering::SeqCst)
    }
}

impl Drop for LogStream {
    fn drop(&mut self) {
        // Detach: the thread sees the flag and exits on its own.
        self.stop();
    }
}

/// Polling loop body. Returns the number of records delivered.
fn run_log_stream<E, F>(engine: &E, interval: Duration, stop: &AtomicBool, mut consumer: F) -> u64
where
    E: Engine + ?Sized,
    F: FnMut(LogRecord) -> bool,
{
    let mut seq: u64 = 0;
    loop {
        if stop.load(Ordering::SeqCst) {
            return seq;
        }

        let len = engine.log_length();
        if len == LOG_CHANNEL_CLOSED {
            tracing::debug!("Engine log channel closed");
            return seq;
        }

        if len > 0 {
            let mut consumer_open = true;
            for index in 0..len {
                let (stamp, text) = engine.log_read(index);
                consumer_open = consumer(LogRecord { seq, stamp, text });
                seq += 1;
                if !consumer_open {
                    engine.log_delete_since(index);
                    break;
                }
            }
            if !consumer_open {
                return seq;
            }
            engine.log_delete_since(len - 1);
        }

        if !sleep_unless_stopped(interval, stop) {
            return seq;
        }
    }
}

/// Sleep for `total` in short slices. Returns `false` if stop was requested.
fn sleep_unless_stopped(total: Duration, stop: &AtomicBool) -> bool {
    let slice = Duration::from_millis(LOG_STOP_CHECK_INTERVAL_MS);
    let mut remaining = total;
    while !remaining.is_zero() {
        if stop.load(Ordering::SeqCst) {
            return false;
        }
        let step = remaining.min(slice);
        std::thread::sleep(step);
        remaining -= step;
    }
    true
}

// =============================================================================
// LogBuffer
// =============================================================================

/// Consumer-side display buffer keeping only the most recent lines.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    lines: VecDeque<LogLine>,
    capacity: usize,
}

impl LogBuffer {
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a line, evicting the oldest on overflow. Blank engine lines
    /// are dropped; returns whether the line was kept.
    pub fn push(&mut self, line: LogLine) -> bool {
        if line.kind == LineKind::Engine && line.text.trim().is_empty() {
            return false;
        }
        while self.lines.len() >= self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
        true
    }

    /// Lines from oldest to newest.
    pub fn lines(&self) -> impl Iterator<Item = &LogLine> {
        self.lines.iter()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }
}

// =============================================================================
// Unit tests
// =============================================================================

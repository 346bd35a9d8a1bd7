// FlightDeck - engine/memory.rs
//
// In-process engine with the same observable behaviour as the external one:
// a single session at a time, an index-addressed log buffer trimmed by
// `log_delete_since`, and a `start` call that blocks until `stop`.
//
// Used by `run --dry-run` and by tests, which also script failures
// (creation failure, spontaneous exit, panic) through the helper methods.

use super::{Engine, ReadySignal, StartParams};
use crate::core::model::ProxyMode;
use crate::core::status::SessionStatus;
use crate::util::constants::LOG_CHANNEL_CLOSED;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

/// How a running session ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ending {
    Stopped,
    Exited,
    Panicked,
}

#[derive(Debug, Default)]
struct Inner {
    running: bool,
    ending: Option<Ending>,
    fail_creation: bool,
    start_calls: usize,
    upstream: String,
    logs: Vec<(u64, String)>,
    mode: Option<u32>,
    mitm: bool,
    mode_calls: Vec<u32>,
    mitm_calls: Vec<bool>,
}

/// Scriptable in-process engine.
#[derive(Debug, Default)]
pub struct MemoryEngine {
    inner: Mutex<Inner>,
    wake: Condvar,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next start calls fail before readiness.
    pub fn fail_creation(&self, fail: bool) {
        self.lock().fail_creation = fail;
    }

    /// Append a log line while running. Ignored when stopped.
    pub fn push_log(&self, text: impl Into<String>) {
        let mut inner = self.lock();
        if inner.running {
            inner.logs.push((now_nanos(), text.into()));
        }
    }

    /// End the running session as if the engine stopped serving on its own.
    pub fn exit(&self) {
        self.end(Ending::Exited);
    }

    /// End the running session as if the engine crashed.
    pub fn panic(&self) {
        self.end(Ending::Panicked);
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    /// Number of start calls received, including rejected ones.
    pub fn start_calls(&self) -> usize {
        self.lock().start_calls
    }

    /// Mode constants received through `switch_mode`, in order.
    pub fn mode_calls(&self) -> Vec<u32> {
        self.lock().mode_calls.clone()
    }

    /// Flags received through `set_mitm`, in order.
    pub fn mitm_calls(&self) -> Vec<bool> {
        self.lock().mitm_calls.clone()
    }

    /// Routing mode currently applied, `None` when stopped.
    pub fn mode(&self) -> Option<ProxyMode> {
        self.lock().mode.and_then(ProxyMode::from_engine_constant)
    }

    pub fn mitm_enabled(&self) -> bool {
        self.lock().mitm
    }

    /// Records still held in the buffer.
    pub fn buffered_logs(&self) -> usize {
        self.lock().logs.len()
    }

    fn end(&self, ending: Ending) {
        let mut inner = self.lock();
        if inner.running && inner.ending.is_none() {
            inner.ending = Some(ending);
            self.wake.notify_all();
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock only means a test thread panicked mid-call; the
        // data is still consistent enough to keep serving.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Engine for MemoryEngine {
    fn start(&self, ready: ReadySignal, params: &StartParams) -> SessionStatus {
        {
            let mut inner = self.lock();
            inner.start_calls += 1;
            if inner.running {
                return SessionStatus::ALREADY_RUNNING;
            }
            if inner.fail_creation {
                tracing::debug!(upstream = %params.upstream, "Memory engine: creation refused");
                return SessionStatus::CREATE_FAILED;
            }
            inner.running = true;
            inner.ending = None;
            inner.upstream = params.upstream.clone();
            inner.mode = Some(ProxyMode::Iplist.engine_constant());
            inner.mitm = false;
            inner.logs = vec![(
                now_nanos(),
                format!("listening on {} (upstream {})", params.local_addr, params.upstream),
            )];
        }

        ready.fire();

        let mut inner = self.lock();
        while inner.ending.is_none() {
            inner = self.wake.wait(inner).unwrap_or_else(|e| e.into_inner());
        }
        let ending = inner.ending.take();
        inner.running = false;
        inner.mode = None;
        inner.logs.clear();
        self.wake.notify_all();

        match ending {
            Some(Ending::Panicked) => SessionStatus::PANICKED,
            _ => SessionStatus::EXITED,
        }
    }

    fn stop(&self) {
        self.end(Ending::Stopped);
    }

    fn switch_mode(&self, mode: u32) -> u32 {
        let mut inner = self.lock();
        inner.mode_calls.push(mode);
        if !inner.running {
            return 0;
        }
        inner.mode = Some(mode);
        mode
    }

    fn set_mitm(&self, enabled: bool) {
        let mut inner = self.lock();
        inner.mitm_calls.push(enabled);
        if inner.running {
            inner.mitm = enabled;
        }
    }

    fn nickname(&self) -> String {
        let inner = self.lock();
        if inner.running {
            format!("mem/{}", inner.upstream)
        } else {
            String::new()
        }
    }

    fn log_length(&self) -> u64 {
        let inner = self.lock();
        if inner.running {
            inner.logs.len() as u64
        } else {
            LOG_CHANNEL_CLOSED
        }
    }

    fn log_read(&self, index: u64) -> (u64, String) {
        let inner = self.lock();
        usize::try_from(index)
            .ok()
            .and_then(|i| inner.logs.get(i))
            .cloned()
            .unwrap_or((0, String::new()))
    }

    fn log_delete_since(&self, index: u64) {
        let mut inner = self.lock();
        let Ok(i) = usize::try_from(index) else {
            return;
        };
        if i < inner.logs.len() {
            inner.logs.drain(..=i);
        }
    }
}

fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

// =============================================================================
// Unit tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::Profile;
    use crate::core::model::EngineLogLevel;
    use std::sync::{mpsc, Arc};
    use std::time::Duration;

    fn params() -> StartParams {
        let mut p = Profile::new("1.2.3.4:80");
        p.key = "k".into();
        StartParams::from_profile(&p, EngineLogLevel::Log, 1024, String::new())
    }

    #[test]
    fn test_start_blocks_until_stop() {
        let engine = Arc::new(MemoryEngine::new());
        let (ready_tx, ready_rx) = mpsc::channel();
        let e = Arc::clone(&engine);
        let handle = std::thread::spawn(move || {
            e.start(
                ReadySignal::new(move || {
                    let _ = ready_tx.send(());
                }),
                &params(),
            )
        });

        ready_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(engine.is_running());
        assert_eq!(engine.log_length(), 1);
        assert_eq!(engine.nickname(), "mem/1.2.3.4:80");

        engine.stop();
        let status = handle.join().unwrap();
        assert_eq!(status, SessionStatus::EXITED);
        assert_eq!(engine.log_length(), LOG_CHANNEL_CLOSED);
    }

    #[test]
    fn test_creation_failure_never_fires_ready() {
        let engine = MemoryEngine::new();
        engine.fail_creation(true);
        let status = engine.start(ReadySignal::new(|| panic!("must not fire")), &params());
        assert!(status.decode().create_failed);
    }

    #[test]
    fn test_delete_since_trims_through_index() {
        let engine = Arc::new(MemoryEngine::new());
        let (ready_tx, ready_rx) = mpsc::channel();
        let e = Arc::clone(&engine);
        let handle = std::thread::spawn(move || {
            e.start(ReadySignal::new(move || drop(ready_tx.send(()))), &params())
        });
        ready_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        engine.push_log("a");
        engine.push_log("b");
        assert_eq!(engine.log_length(), 3);
        engine.log_delete_since(1);
        assert_eq!(engine.log_length(), 1);
        assert_eq!(engine.log_read(0).1, "b");
        assert_eq!(engine.log_read(7), (0, String::new()));

        engine.panic();
        assert!(handle.join().unwrap().decode().panicked);
    }
}

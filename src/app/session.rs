// FlightDeck - app/session.rs
//
// Session lifecycle: Stopped -> Starting -> Running -> Stopping -> Stopped.
//
// Architecture:
//   - `SessionController` lives on the caller's thread and owns the state,
//     the injected `ProfileStore`, the display `LogBuffer`, and the pending
//     mode/MITM requests. Nothing else mutates them.
//   - The engine's blocking start call runs on its own thread. Readiness,
//     exit, and log records come back as `SessionMsg` values over one mpsc
//     channel; `poll` drains it without blocking, `wait_for_state` blocks
//     with a timeout.
//   - Each start bumps a generation counter. Messages from an older
//     generation are ignored, so a late record can never leak into the
//     next session.
//   - The MITM toggle runs on a short-lived thread after a grace delay and
//     is skipped if the session ended in the meantime.
//
// Engine-side failures are not errors here: they arrive as a status word,
// are reported as notices, and always end in Stopped.

use crate::app::log_stream::{LogBuffer, LogStream};
use crate::app::profile_store::ProfileStore;
use crate::core::model::{EngineLogLevel, LogLine, LogRecord, Profile, ProxyMode, SessionState};
use crate::core::profile;
use crate::core::status::SessionStatus;
use crate::engine::{Engine, ReadySignal, StartParams};
use crate::util::constants::{
    DEFAULT_DNS_CACHE_SIZE, DEFAULT_LOG_CAPACITY, LOG_POLL_INTERVAL_MS,
    LOG_STOP_CHECK_INTERVAL_MS, MAX_NICKNAME_LEN, MITM_GRACE_DELAY_MS,
};
use crate::util::error::SessionError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

// =============================================================================
// Public types
// =============================================================================

/// Per-controller tuning, fixed at construction.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub log_level: EngineLogLevel,
    pub dns_cache_size: u32,
    /// Route list content handed to every start call.
    pub route_list: String,
    /// Lines kept in the display buffer.
    pub log_capacity: usize,
    pub poll_interval: Duration,
    /// Delay between readiness and the MITM toggle.
    pub mitm_grace: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            log_level: EngineLogLevel::default(),
            dns_cache_size: DEFAULT_DNS_CACHE_SIZE,
            route_list: String::new(),
            log_capacity: DEFAULT_LOG_CAPACITY,
            poll_interval: Duration::from_millis(LOG_POLL_INTERVAL_MS),
            mitm_grace: Duration::from_millis(MITM_GRACE_DELAY_MS),
        }
    }
}

/// Result of a start request that passed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// The engine thread was launched; readiness arrives through `poll`.
    Launched,
    /// A session is already live; nothing was done.
    AlreadyRunning,
}

/// What happened to a mode or MITM request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Sent to the running engine.
    Applied,
    /// Stored for the next successful start.
    Queued,
}

/// Observable progress, returned by `poll`.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    /// The engine is serving.
    Started { nickname: String },
    /// A line was appended to the display buffer.
    Line(LogLine),
    /// The engine's start call returned.
    Ended { status: SessionStatus },
}

// =============================================================================
// Internal messages
// =============================================================================

#[derive(Debug)]
enum SessionMsg {
    Ready { generation: u64 },
    Exited { generation: u64, status: SessionStatus },
    Log { generation: u64, record: LogRecord },
}

/// Requests applied on the next transition to Running.
#[derive(Debug, Clone, Copy, Default)]
struct Pending {
    mode: ProxyMode,
    mitm: bool,
}

// =============================================================================
// SessionController
// =============================================================================

/// Owner of one engine's session lifecycle.
pub struct SessionController<E: Engine + ?Sized> {
    engine: Arc<E>,
    store: ProfileStore,
    options: SessionOptions,

    state: SessionState,
    pending: Pending,
    generation: u64,
    ready_seen: bool,
    nickname: Option<String>,
    last_status: Option<SessionStatus>,

    tx: mpsc::Sender<SessionMsg>,
    rx: mpsc::Receiver<SessionMsg>,
    engine_thread: Option<JoinHandle<()>>,
    log_stream: Option<LogStream>,
    /// Cleared when the session ends; cancels a pending MITM toggle.
    session_live: Option<Arc<AtomicBool>>,

    logs: LogBuffer,
    events: Vec<SessionEvent>,
}

impl<E: Engine + ?Sized> SessionController<E> {
    pub fn new(engine: Arc<E>, store: ProfileStore, options: SessionOptions) -> Self {
        let (tx, rx) = mpsc::channel();
        let logs = LogBuffer::new(options.log_capacity);
        Self {
            engine,
            store,
            options,
            state: SessionState::Stopped,
            pending: Pending::default(),
            generation: 0,
            ready_seen: false,
            nickname: None,
            last_status: None,
            tx,
            rx,
            engine_thread: None,
            log_stream: None,
            session_live: None,
            logs,
            events: Vec::new(),
        }
    }

    /// Start a session with `profile`.
    ///
    /// The profile is validated first and rejected without any engine call
    /// if it fails. Outside Stopped this is a no-op reporting
    /// `AlreadyRunning`. Otherwise the profile is persisted, the state moves
    /// to Starting, and the engine's blocking start call is launched on its
    /// own thread. `mode`, when given, replaces the pending mode request.
    pub fn start(
        &mut self,
        profile: Profile,
        mode: Option<ProxyMode>,
    ) -> Result<StartOutcome, SessionError> {
        profile::validate(&profile)?;

        if self.state != SessionState::Stopped {
            tracing::info!(state = %self.state, "Start ignored: session already live");
            for msg in SessionStatus::ALREADY_RUNNING.decode().messages() {
                self.notice(msg);
            }
            return Ok(StartOutcome::AlreadyRunning);
        }

        if let Some(m) = mode {
            self.pending.mode = m;
        }

        // A save failure costs only the remembered profile, not the session.
        if let Err(e) = self.store.save(profile.clone()) {
            tracing::warn!(server = %profile.server_addr, error = %e, "Cannot persist profile");
        }

        self.transition(SessionState::Starting);
        self.generation += 1;
        self.ready_seen = false;
        self.nickname = None;

        let generation = self.generation;
        let params = StartParams::from_profile(
            &profile,
            self.options.log_level,
            self.options.dns_cache_size,
            self.options.route_list.clone(),
        );
        let engine = Arc::clone(&self.engine);
        let tx = self.tx.clone();

        tracing::info!(
            server = %profile.server_addr,
            local = %profile.local_addr,
            mode = %self.pending.mode,
            generation,
            "Starting session"
        );

        let spawned = std::thread::Builder::new()
            .name(format!("engine-{generation}"))
            .spawn(move || {
                let ready_tx = tx.clone();
                let ready = ReadySignal::new(move || {
                    let _ = ready_tx.send(SessionMsg::Ready { generation });
                });
                let status = engine.start(ready, &params);
                let _ = tx.send(SessionMsg::Exited { generation, status });
            });

        match spawned {
            Ok(handle) => {
                self.engine_thread = Some(handle);
                Ok(StartOutcome::Launched)
            }
            Err(e) => {
                tracing::error!(error = %e, "Cannot spawn engine thread");
                self.transition(SessionState::Stopped);
                Err(SessionError::Spawn { source: e })
            }
        }
    }

    /// Stop the running session. Only valid from Running.
    ///
    /// Moves to Stopping, asks the engine to stop, and signals the log
    /// stream. Stopped follows once the engine's start call returns.
    pub fn stop(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Running {
            return Err(SessionError::InvalidTransition {
                operation: "stop",
                state: self.state,
            });
        }

        self.transition(SessionState::Stopping);
        self.end_live_flag();
        self.engine.stop();
        if let Some(stream) = &self.log_stream {
            stream.stop();
        }
        tracing::info!(generation = self.generation, "Stop requested");
        Ok(())
    }

    /// Switch routing mode now if Running, otherwise remember it for the
    /// next start. The latest request always becomes the pending mode.
    pub fn switch_mode(&mut self, mode: ProxyMode) -> RequestOutcome {
        self.pending.mode = mode;
        if self.state != SessionState::Running {
            tracing::debug!(%mode, "Mode queued");
            return RequestOutcome::Queued;
        }
        let applied = self.engine.switch_mode(mode.engine_constant());
        tracing::info!(%mode, applied, "Mode switched");
        RequestOutcome::Applied
    }

    /// Toggle MITM inspection now if Running, otherwise remember it for
    /// the next start. A direct toggle cancels any pending delayed one.
    pub fn set_mitm(&mut self, enabled: bool) -> RequestOutcome {
        self.pending.mitm = enabled;
        if self.state != SessionState::Running {
            tracing::debug!(enabled, "MITM toggle queued");
            return RequestOutcome::Queued;
        }
        self.end_live_flag();
        self.engine.set_mitm(enabled);
        tracing::info!(enabled, "MITM toggled");
        RequestOutcome::Applied
    }

    /// Process every queued message without blocking and return the events
    /// produced since the last call.
    pub fn poll(&mut self) -> Vec<SessionEvent> {
        while let Ok(msg) = self.rx.try_recv() {
            self.handle(msg);
        }
        std::mem::take(&mut self.events)
    }

    /// Process messages until the state equals `target` or `timeout`
    /// elapses. Returns whether `target` was reached. Events produced while
    /// waiting are kept for the next `poll`.
    pub fn wait_for_state(&mut self, target: SessionState, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            while let Ok(msg) = self.rx.try_recv() {
                self.handle(msg);
            }
            if self.state == target {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let slice = (deadline - now).min(Duration::from_millis(LOG_STOP_CHECK_INTERVAL_MS));
            if let Ok(msg) = self.rx.recv_timeout(slice) {
                self.handle(msg);
            }
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Display buffer of engine lines and controller notices.
    pub fn logs(&self) -> &LogBuffer {
        &self.logs
    }

    pub fn pending_mode(&self) -> ProxyMode {
        self.pending.mode
    }

    pub fn pending_mitm(&self) -> bool {
        self.pending.mitm
    }

    /// Nickname reported by the engine at readiness, while live.
    pub fn nickname(&self) -> Option<&str> {
        self.nickname.as_deref()
    }

    /// Status word of the most recently ended session.
    pub fn last_status(&self) -> Option<SessionStatus> {
        self.last_status
    }

    pub fn store(&self) -> &ProfileStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut ProfileStore {
        &mut self.store
    }

    // -------------------------------------------------------------------------
    // Message handling
    // -------------------------------------------------------------------------

    fn handle(&mut self, msg: SessionMsg) {
        match msg {
            SessionMsg::Ready { generation } => self.on_ready(generation),
            SessionMsg::Exited { generation, status } => self.on_exited(generation, status),
            SessionMsg::Log { generation, record } => {
                if generation == self.generation {
                    self.append(LogLine::from(record));
                }
            }
        }
    }

    fn on_ready(&mut self, generation: u64) {
        if generation != self.generation || self.state != SessionState::Starting {
            tracing::debug!(generation, state = %self.state, "Ignoring stale readiness");
            return;
        }
        self.ready_seen = true;
        self.transition(SessionState::Running);

        let nickname: String = self.engine.nickname().chars().take(MAX_NICKNAME_LEN).collect();
        self.notice(if nickname.is_empty() {
            "proxy started".to_string()
        } else {
            format!("proxy started: {nickname}")
        });
        self.events.push(SessionEvent::Started {
            nickname: nickname.clone(),
        });
        self.nickname = Some(nickname);

        let tx = self.tx.clone();
        self.log_stream = Some(LogStream::start(
            Arc::clone(&self.engine),
            self.options.poll_interval,
            move |record| tx.send(SessionMsg::Log { generation, record }).is_ok(),
        ));

        let mode = self.pending.mode;
        let applied = self.engine.switch_mode(mode.engine_constant());
        tracing::info!(%mode, applied, "Initial mode applied");

        let live = Arc::new(AtomicBool::new(true));
        self.session_live = Some(Arc::clone(&live));
        if self.pending.mitm {
            self.schedule_mitm(live);
        }
    }

    /// Enable MITM after the grace delay unless the session ends first.
    fn schedule_mitm(&self, live: Arc<AtomicBool>) {
        let engine = Arc::clone(&self.engine);
        let grace = self.options.mitm_grace;
        let spawned = std::thread::Builder::new()
            .name("mitm-grace".into())
            .spawn(move || {
                let slice = Duration::from_millis(LOG_STOP_CHECK_INTERVAL_MS);
                let deadline = Instant::now() + grace;
                loop {
                    if !live.load(Ordering::SeqCst) {
                        tracing::debug!("Session ended before MITM grace delay");
                        return;
                    }
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    std::thread::sleep((deadline - now).min(slice));
                }
                engine.set_mitm(true);
                tracing::info!("MITM enabled after grace delay");
            });
        if let Err(e) = spawned {
            tracing::warn!(error = %e, "Cannot schedule MITM toggle");
        }
    }

    fn on_exited(&mut self, generation: u64, status: SessionStatus) {
        if generation != self.generation {
            tracing::debug!(generation, "Ignoring stale exit");
            return;
        }

        self.end_live_flag();
        if let Some(mut stream) = self.log_stream.take() {
            stream.stop();
            stream.join();
            // Records the stream sent before it stopped.
            while let Ok(msg) = self.rx.try_recv() {
                self.handle(msg);
            }
            self.notice("logging stopped");
        }
        if let Some(handle) = self.engine_thread.take() {
            if handle.join().is_err() {
                tracing::warn!("Engine thread panicked");
            }
        }

        let mut status = status;
        let decoded = status.decode();
        if !self.ready_seen && !decoded.create_failed && !decoded.already_running {
            // The start call returned without ever becoming ready.
            status = status.with(SessionStatus::CREATE_FAILED);
        }
        let decoded = status.decode();

        for msg in decoded.messages() {
            self.notice(msg);
        }
        if decoded.is_actionable() {
            tracing::error!(%status, ?decoded, "Session failed");
        } else {
            tracing::info!(%status, ?decoded, "Session ended");
        }

        self.nickname = None;
        self.last_status = Some(status);
        self.transition(SessionState::Stopped);
        self.events.push(SessionEvent::Ended { status });
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    fn transition(&mut self, to: SessionState) {
        let from = self.state;
        debug_assert!(
            is_valid_transition(from, to),
            "invalid session transition {from} -> {to}"
        );
        self.state = to;
        tracing::debug!(%from, %to, "Session state");
        self.events.push(SessionEvent::StateChanged { from, to });
    }

    fn notice(&mut self, text: impl Into<String>) {
        self.append(LogLine::notice(text));
    }

    fn append(&mut self, line: LogLine) {
        if self.logs.push(line.clone()) {
            self.events.push(SessionEvent::Line(line));
        }
    }

    fn end_live_flag(&mut self) {
        if let Some(flag) = self.session_live.take() {
            flag.store(false, Ordering::SeqCst);
        }
    }
}

impl<E: Engine + ?Sized> Drop for SessionController<E> {
    fn drop(&mut self) {
        self.end_live_flag();
        if let Some(stream) = &self.log_stream {
            stream.stop();
        }
        if matches!(self.state, SessionState::Running | SessionState::Stopping) {
            self.engine.stop();
        }
    }
}

impl<E: Engine + ?Sized> std::fmt::Debug for SessionController<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("state", &self.state)
            .field("generation", &self.generation)
            .field("pending_mode", &self.pending.mode)
            .field("pending_mitm", &self.pending.mitm)
            .field("log_lines", &self.logs.len())
            .finish_non_exhaustive()
    }
}

fn is_valid_transition(from: SessionState, to: SessionState) -> bool {
    use SessionState::*;
    matches!(
        (from, to),
        (Stopped, Starting)
            | (Starting, Running)
            | (Starting, Stopped)
            | (Running, Stopping)
            | (Running, Stopped)
            | (Stopping, Stopped)
    )
}

// =============================================================================
// Unit tests
// =============================================================================

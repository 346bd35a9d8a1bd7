// FlightDeck - engine/process.rs
//
// Engine backed by an external executable.
//
// Command-line contract of the executable:
//   -up <addr> -l <addr> -k <key> -lv <level> -dns-cache <n>
//   -udp <port> -udp-tcp <n> [-a <user:pass>] [-partial] [-domain <d>]
//   [-china-list <path>]
// Each stdout/stderr line becomes one log record. Runtime control goes to
// the child's stdin as text lines: `mode <constant>` and `mitm <0|1>`.
//
// Status mapping when the child ends:
//   spawn failure                 -> CREATE_FAILED
//   exit code 2 (runtime panic)   -> PANICKED
//   anything else, or our stop    -> EXITED
//
// Once the child is gone its pipe readers get a short grace period to
// deliver trailing output. A grandchild that inherited the pipes can keep
// them open indefinitely, so readers still busy after that are left
// detached; each session writes to its own queue, so a lingering reader
// never feeds the next one.

use super::{Engine, ReadySignal, StartParams};
use crate::core::status::SessionStatus;
use crate::util::constants::{LOG_CHANNEL_CLOSED, MAX_LOG_LINE_BYTES, ROUTE_LIST_FILE_NAME};
use std::io::{BufRead, BufReader, Read, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Exit code the engine's runtime uses for an unrecovered panic.
const PANIC_EXIT_CODE: i32 = 2;

/// How often the blocked start call checks whether the child has exited.
const CHILD_POLL_INTERVAL_MS: u64 = 100;

/// How long pipe readers may keep draining after the child has exited.
const READER_DRAIN_TIMEOUT_MS: u64 = 500;

/// Where to find the engine executable and where to put its scratch files.
#[derive(Debug, Clone)]
pub struct ProcessEngineConfig {
    pub program: PathBuf,
    /// Directory receiving the route list file handed to the child.
    pub work_dir: PathBuf,
    /// Extra arguments appended after the generated ones.
    pub extra_args: Vec<String>,
}

#[derive(Debug, Default)]
struct ChildState {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    running: bool,
    stop_requested: bool,
    nickname: String,
    /// Records of the current session; replaced on every start.
    logs: LogQueue,
}

type LogQueue = Arc<Mutex<Vec<(u64, String)>>>;

/// Engine running as a child process.
#[derive(Debug)]
pub struct ProcessEngine {
    config: ProcessEngineConfig,
    state: Mutex<ChildState>,
}

impl ProcessEngine {
    pub fn new(config: ProcessEngineConfig) -> Self {
        Self {
            config,
            state: Mutex::new(ChildState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, ChildState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn build_command(&self, params: &StartParams) -> Command {
        let mut cmd = Command::new(&self.config.program);
        cmd.arg("-up")
            .arg(&params.upstream)
            .arg("-l")
            .arg(&params.local_addr)
            .arg("-k")
            .arg(&params.key)
            .arg("-lv")
            .arg(params.log_level.as_str())
            .arg("-dns-cache")
            .arg(params.dns_cache_size.to_string())
            .arg("-udp")
            .arg(params.udp_port.to_string())
            .arg("-udp-tcp")
            .arg(params.udp_tcp_factor.to_string());
        if !params.auth.is_empty() {
            cmd.arg("-a").arg(&params.auth);
        }
        if params.partial {
            cmd.arg("-partial");
        }
        if !params.domain.is_empty() {
            cmd.arg("-domain").arg(&params.domain);
        }
        if let Some(path) = self.write_route_list(&params.route_list) {
            cmd.arg("-china-list").arg(path);
        }
        cmd.args(&self.config.extra_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    /// Write the route list next to the other scratch files. A failure only
    /// costs the child its route list, so it is logged and skipped.
    fn write_route_list(&self, content: &str) -> Option<PathBuf> {
        if content.is_empty() {
            return None;
        }
        let path = self.config.work_dir.join(ROUTE_LIST_FILE_NAME);
        let written = std::fs::create_dir_all(&self.config.work_dir)
            .and_then(|()| std::fs::write(&path, content));
        match written {
            Ok(()) => Some(path),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Cannot write route list; starting without it");
                None
            }
        }
    }

    /// Write one control line to the child's stdin.
    fn send_control(&self, line: &str) -> bool {
        let mut state = self.state();
        if !state.running {
            return false;
        }
        let Some(stdin) = state.stdin.as_mut() else {
            return false;
        };
        match writeln!(stdin, "{line}").and_then(|()| stdin.flush()) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, control = line, "Engine control write failed");
                false
            }
        }
    }

    /// Block until the child exits. `None` means its status could not be read.
    fn wait_for_exit(&self) -> Option<ExitStatus> {
        loop {
            {
                let mut state = self.state();
                let Some(child) = state.child.as_mut() else {
                    return None;
                };
                match child.try_wait() {
                    Ok(Some(status)) => return Some(status),
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "Cannot poll engine process");
                        return None;
                    }
                }
            }
            std::thread::sleep(Duration::from_millis(CHILD_POLL_INTERVAL_MS));
        }
    }
}

impl Engine for ProcessEngine {
    fn start(&self, ready: ReadySignal, params: &StartParams) -> SessionStatus {
        let readers = {
            let mut state = self.state();
            if state.running {
                return SessionStatus::ALREADY_RUNNING;
            }

            let mut child = match self.build_command(params).spawn() {
                Ok(c) => c,
                Err(e) => {
                    tracing::error!(
                        program = %self.config.program.display(),
                        error = %e,
                        "Cannot launch engine"
                    );
                    return SessionStatus::CREATE_FAILED;
                }
            };

            state.logs = LogQueue::default();
            let mut readers = Vec::new();
            if let Some(out) = child.stdout.take() {
                readers.push(spawn_reader(out, Arc::clone(&state.logs)));
            }
            if let Some(err) = child.stderr.take() {
                readers.push(spawn_reader(err, Arc::clone(&state.logs)));
            }

            let stem = self
                .config
                .program
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("engine");
            state.nickname = format!("{stem}:{}", child.id());
            state.stdin = child.stdin.take();
            state.child = Some(child);
            state.running = true;
            state.stop_requested = false;
            tracing::info!(pid = ?state.child.as_ref().map(Child::id), "Engine process launched");
            readers
        };

        ready.fire();

        let exit = self.wait_for_exit();

        let stop_requested = {
            let mut state = self.state();
            state.running = false;
            state.stdin = None;
            state.child = None;
            state.stop_requested
        };
        drain_readers(readers, Duration::from_millis(READER_DRAIN_TIMEOUT_MS));

        tracing::info!(status = ?exit, stop_requested, "Engine process ended");
        match exit.and_then(|s| s.code()) {
            Some(PANIC_EXIT_CODE) if !stop_requested => SessionStatus::PANICKED,
            _ => SessionStatus::EXITED,
        }
    }

    fn stop(&self) {
        let mut state = self.state();
        if !state.running {
            return;
        }
        state.stop_requested = true;
        state.stdin = None;
        if let Some(child) = state.child.as_mut() {
            if let Err(e) = child.kill() {
                tracing::warn!(error = %e, "Cannot kill engine process");
            }
        }
    }

    fn switch_mode(&self, mode: u32) -> u32 {
        if self.send_control(&format!("mode {mode}")) {
            mode
        } else {
            0
        }
    }

    fn set_mitm(&self, enabled: bool) {
        self.send_control(if enabled { "mitm 1" } else { "mitm 0" });
    }

    fn nickname(&self) -> String {
        let state = self.state();
        if state.running {
            state.nickname.clone()
        } else {
            String::new()
        }
    }

    fn log_length(&self) -> u64 {
        let state = self.state();
        if !state.running {
            return LOG_CHANNEL_CLOSED;
        }
        let len = lock_logs(&state.logs).len() as u64;
        len
    }

    fn log_read(&self, index: u64) -> (u64, String) {
        let state = self.state();
        let logs = lock_logs(&state.logs);
        usize::try_from(index)
            .ok()
            .and_then(|i| logs.get(i))
            .cloned()
            .unwrap_or((0, String::new()))
    }

    fn log_delete_since(&self, index: u64) {
        let state = self.state();
        let mut logs = lock_logs(&state.logs);
        if let Ok(i) = usize::try_from(index) {
            if i < logs.len() {
                logs.drain(..=i);
            }
        }
    }
}

/// Join readers that finish within `timeout`; detach the rest.
fn drain_readers(readers: Vec<JoinHandle<()>>, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while readers.iter().any(|r| !r.is_finished()) && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    for reader in readers {
        if reader.is_finished() {
            let _ = reader.join();
        } else {
            tracing::debug!("Engine pipe still held open by a descendant; detaching its reader");
        }
    }
}

fn lock_logs(logs: &LogQueue) -> MutexGuard<'_, Vec<(u64, String)>> {
    logs.lock().unwrap_or_else(|e| e.into_inner())
}

/// Copy lines from one child pipe into the log queue until EOF.
fn spawn_reader<R: Read + Send + 'static>(pipe: R, logs: LogQueue) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let mut reader = BufReader::new(pipe);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&buf);
                    let line = truncate_line(text.trim_end_matches(['\r', '\n']));
                    let stamp = SystemTime::now()
                        .duration_since(UNIX_EPOCH)
                        .map(|d| d.as_nanos() as u64)
                        .unwrap_or(0);
                    lock_logs(&logs).push((stamp, line));
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Engine pipe closed with error");
                    break;
                }
            }
        }
    })
}

/// Cap a line at `MAX_LOG_LINE_BYTES`, cutting on a char boundary.
fn truncate_line(line: &str) -> String {
    if line.len() <= MAX_LOG_LINE_BYTES {
        return line.to_string();
    }
    let mut end = MAX_LOG_LINE_BYTES;
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    line[..end].to_string()
}

// =============================================================================
// Unit tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{EngineLogLevel, Profile};

    fn params() -> StartParams {
        let mut p = Profile::new("1.2.3.4:80");
        p.key = "k".into();
        p.auth_user = "u".into();
        p.auth_pass = "p".into();
        p.partial = true;
        StartParams::from_profile(&p, EngineLogLevel::Warn, 512, String::new())
    }

    fn engine(program: &str) -> ProcessEngine {
        ProcessEngine::new(ProcessEngineConfig {
            program: PathBuf::from(program),
            work_dir: std::env::temp_dir(),
            extra_args: vec![],
        })
    }

    #[test]
    fn test_missing_program_reports_create_failed() {
        let e = engine("/nonexistent/flightdeck-engine-binary");
        let status = e.start(ReadySignal::new(|| panic!("must not fire")), &params());
        assert_eq!(status, SessionStatus::CREATE_FAILED);
        assert_eq!(e.log_length(), LOG_CHANNEL_CLOSED);
    }

    #[test]
    fn test_command_line_carries_profile() {
        let e = engine("engine");
        let cmd = e.build_command(&params());
        let args: Vec<String> = cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        let pos = |flag: &str| args.iter().position(|a| a == flag).unwrap();
        assert_eq!(args[pos("-up") + 1], "1.2.3.4:80");
        assert_eq!(args[pos("-lv") + 1], "warn");
        assert_eq!(args[pos("-dns-cache") + 1], "512");
        assert_eq!(args[pos("-a") + 1], "u:p");
        assert!(args.contains(&"-partial".to_string()));
        assert!(!args.contains(&"-domain".to_string()));
        assert!(!args.contains(&"-china-list".to_string()));
    }

    #[test]
    fn test_truncate_line_respects_char_boundaries() {
        let long = "é".repeat(MAX_LOG_LINE_BYTES);
        let cut = truncate_line(&long);
        assert!(cut.len() <= MAX_LOG_LINE_BYTES);
        assert!(cut.chars().all(|c| c == 'é'));
        assert_eq!(truncate_line("short"), "short");
    }

    #[cfg(unix)]
    #[test]
    fn test_child_output_becomes_log_records() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("engine.sh");
        std::fs::write(&script, "#!/bin/sh\necho hello\necho world\nexec sleep 30\n").unwrap();
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let e = Arc::new(ProcessEngine::new(ProcessEngineConfig {
            program: script,
            work_dir: dir.path().to_path_buf(),
            extra_args: vec![],
        }));
        let (tx, rx) = std::sync::mpsc::channel();
        let runner = Arc::clone(&e);
        let handle = std::thread::spawn(move || {
            runner.start(ReadySignal::new(move || drop(tx.send(()))), &params())
        });
        rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while e.log_length() < 2 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(e.log_read(0).1, "hello");
        assert_eq!(e.log_read(1).1, "world");
        assert!(e.nickname().starts_with("engine:"));

        e.stop();
        assert_eq!(handle.join().unwrap(), SessionStatus::EXITED);
    }

    #[cfg(unix)]
    #[test]
    fn test_stop_returns_while_descendant_holds_pipes() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("engine.sh");
        // No `exec`: the shell forks `sleep`, which inherits stdout/stderr.
        std::fs::write(&script, "#!/bin/sh\necho up\nsleep 8\n").unwrap();
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let e = Arc::new(ProcessEngine::new(ProcessEngineConfig {
            program: script,
            work_dir: dir.path().to_path_buf(),
            extra_args: vec![],
        }));
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let (done_tx, done_rx) = std::sync::mpsc::channel();
        let runner = Arc::clone(&e);
        std::thread::spawn(move || {
            let status = runner.start(ReadySignal::new(move || drop(ready_tx.send(()))), &params());
            let _ = done_tx.send(status);
        });
        ready_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while e.log_length() < 1 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }

        let stopped_at = Instant::now();
        e.stop();
        let status = done_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(stopped_at.elapsed() < Duration::from_secs(2));
        assert_eq!(status, SessionStatus::EXITED);
        assert_eq!(e.log_length(), LOG_CHANNEL_CLOSED);
    }
}

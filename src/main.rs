// FlightDeck - main.rs
//
// Command line entry point. Handles:
// 1. CLI argument parsing
// 2. Logging initialisation (debug mode support)
// 3. Settings and profile store loading
// 4. Dispatch: run a session, manage profiles, edit settings, serve the relay

use clap::{Args, Parser, Subcommand};
use flightdeck::app::profile_store::{LegacyFile, ProfileStore, SectionFile};
use flightdeck::app::session::{SessionController, SessionEvent, SessionOptions, StartOutcome};
use flightdeck::core::escape::Dialect;
use flightdeck::core::model::{EngineLogLevel, LineKind, LogLine, Profile, ProxyMode, SessionState};
use flightdeck::core::profile;
use flightdeck::engine::memory::MemoryEngine;
use flightdeck::engine::process::{ProcessEngine, ProcessEngineConfig};
use flightdeck::engine::Engine;
use flightdeck::platform::config::{self, PlatformPaths, Settings};
use flightdeck::relay;
use flightdeck::util::constants;
use flightdeck::util::error::{ConfigError, FlightDeckError, ProfileError, Result};
use flightdeck::util::logging;
use serde::Serialize;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};
use std::time::Duration;

/// How long `run` waits for the engine to wind down after a stop request.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause between event pumps in the interactive loop.
const PUMP_INTERVAL: Duration = Duration::from_millis(50);

/// FlightDeck - control surface for an external proxy engine.
///
/// Starts and stops engine sessions, streams their logs, and keeps the
/// saved connection profiles.
#[derive(Parser, Debug)]
#[command(name = "flightdeck", version, about)]
struct Cli {
    /// Enable debug logging (equivalent to RUST_LOG=debug).
    #[arg(short = 'd', long = "debug", global = true)]
    debug: bool,

    /// Keep the store, route list, and scratch files in this directory.
    #[arg(long = "config-dir", global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a session and stream its log until stopped.
    ///
    /// While running, stdin accepts `mode <iplist|global|none>`,
    /// `mitm <on|off>`, `status`, and `stop`. Closing stdin stops the session.
    Run(RunArgs),

    /// Manage saved profiles.
    #[command(subcommand)]
    Profiles(ProfilesCommand),

    /// Show or change global settings.
    #[command(subcommand)]
    Settings(SettingsCommand),

    /// Serve the HTTP-triggered TCP/DNS relay.
    Relay {
        /// Address to listen on.
        #[arg(long, default_value = constants::DEFAULT_RELAY_LISTEN)]
        listen: String,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Upstream server address (`host:port`). A saved profile for this
    /// address supplies every field not given below.
    #[arg(short = 's', long)]
    server: String,

    /// Shared encryption key.
    #[arg(short = 'k', long)]
    key: Option<String>,

    /// Local listen address.
    #[arg(short = 'l', long)]
    local: Option<String>,

    /// Basic-auth user name.
    #[arg(long)]
    user: Option<String>,

    /// Basic-auth password.
    #[arg(long)]
    pass: Option<String>,

    /// Encrypt only part of each payload.
    #[arg(long)]
    partial: Option<bool>,

    /// UDP relay port.
    #[arg(long)]
    udp: Option<u16>,

    /// UDP-over-TCP connection multiplier.
    #[arg(long = "udp-tcp")]
    udp_tcp: Option<u32>,

    /// Dummy domain presented to the upstream.
    #[arg(long)]
    domain: Option<String>,

    /// Routing mode applied once the engine is ready.
    #[arg(short = 'm', long)]
    mode: Option<ProxyMode>,

    /// Enable MITM inspection after the grace delay.
    #[arg(long)]
    mitm: bool,

    /// Engine log level (dbg, log, warn, err, off).
    #[arg(long = "log-level")]
    log_level: Option<EngineLogLevel>,

    /// Drive the built-in in-process engine instead of an executable.
    #[arg(long, conflicts_with = "engine")]
    dry_run: bool,

    /// Engine executable to launch.
    #[arg(long, required_unless_present = "dry_run")]
    engine: Option<PathBuf>,

    /// Extra argument passed to the engine executable (repeatable).
    #[arg(long = "engine-arg")]
    engine_args: Vec<String>,
}

#[derive(Subcommand, Debug)]
enum ProfilesCommand {
    /// List saved profiles (keys and passwords are never shown).
    List {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Delete the profile saved for a server address.
    Delete { server: String },
    /// Copy profiles from a legacy flat file into the store.
    Import {
        /// Legacy file (defaults to server.txt in the config directory).
        file: Option<PathBuf>,
        /// The file escapes backslashes and line breaks too, not just pipes.
        #[arg(long)]
        full_escaping: bool,
    },
}

#[derive(Subcommand, Debug)]
enum SettingsCommand {
    /// Print the effective settings and any validation warnings.
    Show,
    /// Change one or more settings.
    Set {
        #[arg(long = "log-level")]
        log_level: Option<EngineLogLevel>,
        #[arg(long)]
        mode: Option<ProxyMode>,
        #[arg(long)]
        lang: Option<String>,
        #[arg(long = "dns-cache")]
        dns_cache: Option<u32>,
        #[arg(long)]
        autostart: Option<bool>,
        #[arg(long)]
        mitm: Option<bool>,
        #[arg(long = "auto-min")]
        auto_min: Option<bool>,
        #[arg(long = "log-capacity")]
        log_capacity: Option<usize>,
        #[arg(long = "route-list")]
        route_list: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();

    logging::init(cli.debug);

    tracing::info!(
        version = constants::APP_VERSION,
        debug = cli.debug,
        "FlightDeck starting"
    );

    let paths = match &cli.config_dir {
        Some(dir) => PlatformPaths::in_dir(dir),
        None => PlatformPaths::resolve(),
    };

    match dispatch(cli.command, &paths) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

fn dispatch(command: Command, paths: &PlatformPaths) -> Result<i32> {
    match command {
        Command::Run(args) => run_session(args, paths),
        Command::Profiles(cmd) => profiles(cmd, paths).map(|()| 0),
        Command::Settings(cmd) => settings(cmd, paths).map(|()| 0),
        Command::Relay { listen } => {
            let runtime = tokio::runtime::Runtime::new().map_err(|e| FlightDeckError::Io {
                path: PathBuf::from(&listen),
                operation: "runtime startup",
                source: e,
            })?;
            runtime.block_on(relay::serve(&listen))?;
            Ok(0)
        }
    }
}

// =============================================================================
// run
// =============================================================================

/// One line typed on stdin while a session is live.
#[derive(Debug, Clone, PartialEq)]
enum Control {
    Mode(ProxyMode),
    Mitm(bool),
    Status,
    Stop,
}

fn parse_control(line: &str) -> std::result::Result<Control, String> {
    let mut words = line.split_whitespace();
    let verb = words.next().unwrap_or_default().to_ascii_lowercase();
    let arg = words.next();
    match (verb.as_str(), arg) {
        ("mode", Some(m)) => m.parse().map(Control::Mode),
        ("mitm", Some("on" | "1" | "true")) => Ok(Control::Mitm(true)),
        ("mitm", Some("off" | "0" | "false")) => Ok(Control::Mitm(false)),
        ("status", None) => Ok(Control::Status),
        ("stop" | "quit" | "exit", None) => Ok(Control::Stop),
        _ => Err(format!(
            "unknown command '{}'; expected: mode <iplist|global|none>, mitm <on|off>, status, stop",
            line.trim()
        )),
    }
}

fn run_session(args: RunArgs, paths: &PlatformPaths) -> Result<i32> {
    let (mut settings, warnings) = config::load_settings(&paths.store_path);
    for w in &warnings {
        eprintln!("Warning: {w}");
    }

    let store = ProfileStore::open(SectionFile::new(&paths.store_path))?;
    let profile = build_profile(&args, &store);

    let route_list = config::load_route_list(&settings.route_list_path(paths));
    let options = SessionOptions {
        log_level: args.log_level.unwrap_or(settings.log_level),
        dns_cache_size: settings.dns_cache_size,
        route_list,
        log_capacity: settings.log_capacity,
        ..SessionOptions::default()
    };

    let engine: Arc<dyn Engine> = if args.dry_run {
        Arc::new(MemoryEngine::new())
    } else {
        let program = args.engine.clone().ok_or(ConfigError::MissingEngine)?;
        Arc::new(ProcessEngine::new(ProcessEngineConfig {
            program,
            work_dir: paths.data_dir.clone(),
            extra_args: args.engine_args.clone(),
        }))
    };

    let mode = args.mode.unwrap_or(settings.proxy_mode);
    let mut session = SessionController::new(engine, store, options);
    session.set_mitm(args.mitm || settings.mitm);

    match session.start(profile, Some(mode))? {
        StartOutcome::Launched => {}
        StartOutcome::AlreadyRunning => {
            eprintln!("A session is already running.");
            return Ok(1);
        }
    }

    let controls = spawn_stdin_reader();
    let mut stdin_open = true;
    let mut stop_sent = false;
    let mut failed = false;

    loop {
        for event in session.poll() {
            match event {
                SessionEvent::Line(line) => print_line(&line),
                SessionEvent::Started { nickname } => {
                    tracing::info!(%nickname, "Session running");
                }
                SessionEvent::Ended { status } => {
                    failed = status.decode().is_actionable();
                }
                SessionEvent::StateChanged { .. } => {}
            }
        }
        if session.state() == SessionState::Stopped {
            break;
        }

        match controls.recv_timeout(PUMP_INTERVAL) {
            Ok(line) if line.trim().is_empty() => {}
            Ok(line) => match parse_control(&line) {
                Ok(Control::Mode(m)) => {
                    let outcome = session.switch_mode(m);
                    println!("mode {m}: {outcome:?}");
                }
                Ok(Control::Mitm(on)) => {
                    let outcome = session.set_mitm(on);
                    println!("mitm {}: {outcome:?}", if on { "on" } else { "off" });
                }
                Ok(Control::Status) => println!(
                    "state {} | mode {} | mitm {} | upstream {}",
                    session.state(),
                    session.pending_mode(),
                    session.pending_mitm(),
                    session.nickname().unwrap_or("-")
                ),
                Ok(Control::Stop) => {
                    stop_sent |= request_stop(&mut session);
                }
                Err(msg) => eprintln!("{msg}"),
            },
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                if stdin_open {
                    tracing::debug!("stdin closed");
                    stdin_open = false;
                }
                if !stop_sent {
                    stop_sent = request_stop(&mut session);
                }
                if stop_sent && !session.wait_for_state(SessionState::Stopped, SHUTDOWN_TIMEOUT) {
                    eprintln!("Engine did not stop within {SHUTDOWN_TIMEOUT:?}");
                    return Ok(1);
                }
                std::thread::sleep(PUMP_INTERVAL);
            }
        }
    }

    // Remember the last mode and MITM choice for the next run.
    if settings.proxy_mode != session.pending_mode() || settings.mitm != session.pending_mitm() {
        settings.proxy_mode = session.pending_mode();
        settings.mitm = session.pending_mitm();
        if let Err(e) = config::save_settings(&paths.store_path, &settings) {
            tracing::warn!(error = %e, "Cannot save settings");
        }
    }

    Ok(if failed { 1 } else { 0 })
}

/// Stop if running. Returns whether a stop was issued.
fn request_stop<E: Engine + ?Sized>(session: &mut SessionController<E>) -> bool {
    match session.stop() {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!(error = %e, "Stop not issued");
            false
        }
    }
}

/// Saved profile for `--server` (or a fresh one) with CLI overrides applied.
fn build_profile(args: &RunArgs, store: &ProfileStore) -> Profile {
    let mut p = store
        .get(&args.server)
        .cloned()
        .unwrap_or_else(|| Profile::new(args.server.clone()));
    if let Some(v) = &args.key {
        p.key = v.clone();
    }
    if let Some(v) = &args.local {
        p.local_addr = v.clone();
    }
    if let Some(v) = &args.user {
        p.auth_user = v.clone();
    }
    if let Some(v) = &args.pass {
        p.auth_pass = v.clone();
    }
    if let Some(v) = args.partial {
        p.partial = v;
    }
    if let Some(v) = args.udp {
        p.udp_port = v;
    }
    if let Some(v) = args.udp_tcp {
        p.udp_tcp_factor = v;
    }
    if let Some(v) = &args.domain {
        p.domain = v.clone();
    }
    p
}

/// Forward stdin lines over a channel; the channel closes at EOF.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(l) => {
                    if tx.send(l).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, "stdin read failed");
                    return;
                }
            }
        }
    });
    rx
}

fn print_line(line: &LogLine) {
    let stamp = line
        .timestamp
        .map(|t| t.with_timezone(&chrono::Local).format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "--:--:--".to_string());
    match line.kind {
        LineKind::Engine => println!("{stamp} {}", line.text),
        LineKind::Notice => println!("{stamp} * {}", line.text),
    }
}

// =============================================================================
// profiles
// =============================================================================

/// Listing shape: everything but the secrets.
#[derive(Debug, Serialize)]
struct ProfileSummary<'a> {
    server: &'a str,
    local: &'a str,
    user: &'a str,
    partial: bool,
    udp_port: u16,
    udp_tcp_factor: u32,
    domain: &'a str,
}

impl<'a> From<&'a Profile> for ProfileSummary<'a> {
    fn from(p: &'a Profile) -> Self {
        Self {
            server: &p.server_addr,
            local: &p.local_addr,
            user: &p.auth_user,
            partial: p.partial,
            udp_port: p.udp_port,
            udp_tcp_factor: p.udp_tcp_factor,
            domain: &p.domain,
        }
    }
}

fn profiles(cmd: ProfilesCommand, paths: &PlatformPaths) -> Result<()> {
    let mut store = ProfileStore::open(SectionFile::new(&paths.store_path))?;
    match cmd {
        ProfilesCommand::List { json } => {
            let mut rows: Vec<ProfileSummary<'_>> = store.list().iter().map(Into::into).collect();
            rows.sort_by(|a, b| a.server.cmp(b.server));
            if json {
                match serde_json::to_string_pretty(&rows) {
                    Ok(text) => println!("{text}"),
                    Err(e) => tracing::error!(error = %e, "Cannot serialise profile list"),
                }
            } else if rows.is_empty() {
                println!("No saved profiles.");
            } else {
                println!("{:<28} {:<22} {:<8} {:>6} {:>4}  DOMAIN", "SERVER", "LOCAL", "PARTIAL", "UDP", "UOT");
                for r in rows {
                    println!(
                        "{:<28} {:<22} {:<8} {:>6} {:>4}  {}",
                        r.server, r.local, r.partial, r.udp_port, r.udp_tcp_factor, r.domain
                    );
                }
            }
        }
        ProfilesCommand::Delete { server } => match store.delete(&server)? {
            Some(_) => println!("Deleted {server}"),
            None => return Err(ProfileError::NotFound { server }.into()),
        },
        ProfilesCommand::Import {
            file,
            full_escaping,
        } => {
            let source = file.unwrap_or_else(|| paths.legacy_path.clone());
            let dialect = if full_escaping {
                Dialect::Full
            } else {
                Dialect::PipeOnly
            };
            let legacy = ProfileStore::open(LegacyFile::with_dialect(&source, dialect))?;
            let mut imported = 0usize;
            for p in legacy.list() {
                if let Err(e) = profile::validate(p) {
                    eprintln!("Skipping {}: {e}", p.server_addr);
                    continue;
                }
                store.save(p.clone())?;
                imported += 1;
            }
            tracing::info!(source = %source.display(), imported, "Legacy profiles imported");
            println!("Imported {imported} profile(s) from {}", source.display());
        }
    }
    Ok(())
}

// =============================================================================
// settings
// =============================================================================

fn settings(cmd: SettingsCommand, paths: &PlatformPaths) -> Result<()> {
    let (mut current, warnings) = config::load_settings(&paths.store_path);
    match cmd {
        SettingsCommand::Show => {
            for w in &warnings {
                eprintln!("Warning: {w}");
            }
            print_settings(&current, paths);
        }
        SettingsCommand::Set {
            log_level,
            mode,
            lang,
            dns_cache,
            autostart,
            mitm,
            auto_min,
            log_capacity,
            route_list,
        } => {
            if let Some(v) = log_level {
                current.log_level = v;
            }
            if let Some(v) = mode {
                current.proxy_mode = v;
            }
            if let Some(v) = lang {
                current.lang = v;
            }
            if let Some(v) = dns_cache {
                current.dns_cache_size = v;
            }
            if let Some(v) = autostart {
                current.autostart = v;
            }
            if let Some(v) = mitm {
                current.mitm = v;
            }
            if let Some(v) = auto_min {
                current.auto_minimize = v;
            }
            if let Some(v) = log_capacity {
                current.log_capacity = v;
            }
            if let Some(v) = route_list {
                current.route_list = Some(v);
            }
            config::check_settings(&current)?;
            config::save_settings(&paths.store_path, &current)?;

            // Re-load to print what the next start will see.
            let (saved, warnings) = config::load_settings(&paths.store_path);
            for w in &warnings {
                eprintln!("Warning: {w}");
            }
            print_settings(&saved, paths);
        }
    }
    Ok(())
}

fn print_settings(s: &Settings, paths: &PlatformPaths) {
    println!("store        {}", paths.store_path.display());
    println!("log level    {}", s.log_level);
    println!("proxy mode   {}", s.proxy_mode);
    println!("lang         {}", s.lang);
    println!("dns cache    {}", s.dns_cache_size);
    println!("autostart    {}", s.autostart);
    println!("mitm         {}", s.mitm);
    println!("auto min     {}", s.auto_minimize);
    println!("log capacity {}", s.log_capacity);
    println!("route list   {}", s.route_list_path(paths).display());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_control_lines() {
        assert_eq!(parse_control("mode global"), Ok(Control::Mode(ProxyMode::Global)));
        assert_eq!(parse_control("  MODE none "), Ok(Control::Mode(ProxyMode::None)));
        assert_eq!(parse_control("mitm on"), Ok(Control::Mitm(true)));
        assert_eq!(parse_control("mitm 0"), Ok(Control::Mitm(false)));
        assert_eq!(parse_control("stop"), Ok(Control::Stop));
        assert_eq!(parse_control("status"), Ok(Control::Status));
        assert!(parse_control("mode fast").is_err());
        assert!(parse_control("mitm").is_err());
        assert!(parse_control("launch").is_err());
    }

    #[test]
    fn test_cli_requires_engine_unless_dry_run() {
        assert!(Cli::try_parse_from(["flightdeck", "run", "-s", "h:1"]).is_err());
        assert!(Cli::try_parse_from(["flightdeck", "run", "-s", "h:1", "--dry-run"]).is_ok());
        assert!(Cli::try_parse_from([
            "flightdeck", "run", "-s", "h:1", "--engine", "/bin/engine", "--mode", "global"
        ])
        .is_ok());
    }

    #[test]
    fn test_import_escaping_flag() {
        let cli = Cli::try_parse_from(["flightdeck", "profiles", "import", "--full-escaping"])
            .unwrap();
        assert!(matches!(
            cli.command,
            Command::Profiles(ProfilesCommand::Import { full_escaping: true, .. })
        ));
    }
}

// FlightDeck - core/model.rs
//
// Core data model types. Pure data definitions with no I/O and no
// platform dependencies.
//
// These types are the shared vocabulary across all layers.

use crate::util::constants;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// Profile
// =============================================================================

/// One configured upstream target.
///
/// `server_addr` is the unique key within a profile collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Upstream server address (`host:port`).
    pub server_addr: String,

    /// Local listen address handed to the engine.
    pub local_addr: String,

    /// Shared encryption key.
    pub key: String,

    /// Basic-auth user name (empty = no auth).
    pub auth_user: String,

    /// Basic-auth password (empty = no auth).
    pub auth_pass: String,

    /// Encrypt only part of each payload.
    pub partial: bool,

    /// UDP relay listen port.
    pub udp_port: u16,

    /// UDP-over-TCP connection multiplier.
    pub udp_tcp_factor: u32,

    /// Dummy domain presented to the upstream (empty = none).
    pub domain: String,
}

impl Profile {
    /// A profile for `server_addr` with every other field at its default.
    pub fn new(server_addr: impl Into<String>) -> Self {
        Self {
            server_addr: server_addr.into(),
            local_addr: constants::DEFAULT_LOCAL_ADDR.to_string(),
            key: String::new(),
            auth_user: String::new(),
            auth_pass: String::new(),
            partial: false,
            udp_port: constants::DEFAULT_UDP_PORT,
            udp_tcp_factor: constants::DEFAULT_UDP_TCP_FACTOR,
            domain: String::new(),
        }
    }

    /// The `user:pass` string the engine expects, or empty when either half
    /// is missing.
    pub fn auth_string(&self) -> String {
        if self.auth_user.is_empty() || self.auth_pass.is_empty() {
            String::new()
        } else {
            format!("{}:{}", self.auth_user, self.auth_pass)
        }
    }
}

// =============================================================================
// Proxy mode
// =============================================================================

/// Traffic-routing policy applied by the engine once running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyMode {
    /// Proxy hosts according to the route list.
    #[default]
    Iplist,
    /// Proxy everything.
    Global,
    /// Proxy nothing.
    None,
}

impl ProxyMode {
    /// Returns all variants in menu order.
    pub fn all() -> &'static [ProxyMode] {
        &[ProxyMode::Iplist, ProxyMode::Global, ProxyMode::None]
    }

    /// The engine constant for this mode.
    pub fn engine_constant(self) -> u32 {
        match self {
            Self::Global => constants::MODE_GLOBAL,
            Self::Iplist => constants::MODE_IPLIST,
            Self::None => constants::MODE_NONE,
        }
    }

    /// Map an engine constant back to a mode. Unknown constants yield `None`.
    pub fn from_engine_constant(value: u32) -> Option<Self> {
        Self::all()
            .iter()
            .copied()
            .find(|m| m.engine_constant() == value)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Iplist => "iplist",
            Self::Global => "global",
            Self::None => "none",
        }
    }
}

impl fmt::Display for ProxyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ProxyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "iplist" => Ok(Self::Iplist),
            "global" => Ok(Self::Global),
            "none" => Ok(Self::None),
            other => Err(format!(
                "unknown proxy mode '{other}' (expected iplist, global, or none)"
            )),
        }
    }
}

// =============================================================================
// Engine log level
// =============================================================================

/// Verbosity requested from the engine's own logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineLogLevel {
    #[serde(rename = "dbg")]
    Debug,
    #[default]
    #[serde(rename = "log")]
    Log,
    Warn,
    #[serde(rename = "err")]
    Error,
    Off,
}

impl EngineLogLevel {
    /// The token the engine understands.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "dbg",
            Self::Log => "log",
            Self::Warn => "warn",
            Self::Error => "err",
            Self::Off => "off",
        }
    }
}

impl fmt::Display for EngineLogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineLogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dbg" | "debug" => Ok(Self::Debug),
            "log" | "info" => Ok(Self::Log),
            "warn" => Ok(Self::Warn),
            "err" | "error" => Ok(Self::Error),
            "off" => Ok(Self::Off),
            other => Err(format!(
                "unknown engine log level '{other}' (expected dbg, log, warn, err, or off)"
            )),
        }
    }
}

// =============================================================================
// Session state
// =============================================================================

/// Lifecycle state of one engine session.
///
/// Owned exclusively by `SessionController`; everything else only observes
/// transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum SessionState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Log records
// =============================================================================

/// One engine log line as delivered by `LogStream`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogRecord {
    /// Monotonic sequence number within one stream run.
    pub seq: u64,

    /// Raw timestamp-or-flags word returned by the engine
    /// (Unix nanoseconds for ordinary lines).
    pub stamp: u64,

    /// Line text.
    pub text: String,
}

impl LogRecord {
    /// Interpret `stamp` as Unix nanoseconds. Zero means "no timestamp".
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        if self.stamp == 0 {
            return None;
        }
        let nanos = i64::try_from(self.stamp).ok()?;
        Some(DateTime::from_timestamp_nanos(nanos))
    }
}

/// Origin of a line in the display buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LineKind {
    /// Produced by the engine.
    Engine,
    /// Produced by the session controller (start/exit notices).
    Notice,
}

/// A line held in the consumer-side display buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogLine {
    pub kind: LineKind,
    pub timestamp: Option<DateTime<Utc>>,
    pub text: String,
}

impl LogLine {
    pub fn notice(text: impl Into<String>) -> Self {
        Self {
            kind: LineKind::Notice,
            timestamp: Some(Utc::now()),
            text: text.into(),
        }
    }
}

impl From<LogRecord> for LogLine {
    fn from(record: LogRecord) -> Self {
        Self {
            kind: LineKind::Engine,
            timestamp: record.timestamp(),
            text: record.text,
        }
    }
}

// =============================================================================
// Unit tests
// =============================================================================

// FlightDeck - engine/mod.rs
//
// Control surface of the external proxy engine.
//
// The engine is a collaborator, not part of this crate: the session
// controller reaches it only through the `Engine` trait. `start` blocks for
// the whole life of the engine; every other call is expected to return
// quickly.
//
// Implementations:
//   - `memory::MemoryEngine`   in-process engine for dry runs and tests
//   - `process::ProcessEngine` drives an external engine executable

pub mod memory;
pub mod process;

use crate::core::model::{EngineLogLevel, Profile};
use crate::core::status::SessionStatus;
use std::fmt;

/// Everything the engine's start call needs.
#[derive(Clone, PartialEq, Eq)]
pub struct StartParams {
    pub log_level: EngineLogLevel,
    /// Route list content (one entry per line, may be empty).
    pub route_list: String,
    pub upstream: String,
    pub local_addr: String,
    /// `user:pass` or empty.
    pub auth: String,
    pub key: String,
    pub domain: String,
    pub partial: bool,
    pub dns_cache_size: u32,
    pub udp_port: u16,
    pub udp_tcp_factor: u32,
}

impl StartParams {
    pub fn from_profile(
        profile: &Profile,
        log_level: EngineLogLevel,
        dns_cache_size: u32,
        route_list: String,
    ) -> Self {
        Self {
            log_level,
            route_list,
            upstream: profile.server_addr.clone(),
            local_addr: profile.local_addr.clone(),
            auth: profile.auth_string(),
            key: profile.key.clone(),
            domain: profile.domain.clone(),
            partial: profile.partial,
            dns_cache_size,
            udp_port: profile.udp_port,
            udp_tcp_factor: profile.udp_tcp_factor,
        }
    }
}

// Keys and auth strings stay out of debug output.
impl fmt::Debug for StartParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StartParams")
            .field("log_level", &self.log_level)
            .field("route_list_len", &self.route_list.len())
            .field("upstream", &self.upstream)
            .field("local_addr", &self.local_addr)
            .field("auth", &(!self.auth.is_empty()))
            .field("domain", &self.domain)
            .field("partial", &self.partial)
            .field("dns_cache_size", &self.dns_cache_size)
            .field("udp_port", &self.udp_port)
            .field("udp_tcp_factor", &self.udp_tcp_factor)
            .finish_non_exhaustive()
    }
}

/// Single-fire readiness signal handed to `Engine::start`.
///
/// Firing consumes the signal, so it can be delivered at most once. Dropping
/// it unfired tells the controller nothing; the controller learns about the
/// failure when `start` returns.
pub struct ReadySignal {
    notify: Box<dyn FnOnce() + Send>,
}

impl ReadySignal {
    pub fn new(notify: impl FnOnce() + Send + 'static) -> Self {
        Self {
            notify: Box::new(notify),
        }
    }

    /// Signal that the engine was created and is about to serve.
    pub fn fire(self) {
        (self.notify)();
    }
}

impl fmt::Debug for ReadySignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ReadySignal")
    }
}

/// The narrow control interface of the proxy engine.
pub trait Engine: Send + Sync + 'static {
    /// Create and run the engine. Fires `ready` exactly once if creation
    /// succeeds, then blocks until the engine stops serving, returning the
    /// status bitmask.
    fn start(&self, ready: ReadySignal, params: &StartParams) -> SessionStatus;

    /// Ask a running engine to stop; makes the blocked `start` return.
    fn stop(&self);

    /// Switch routing mode. Returns the applied constant, or 0 when no
    /// engine is running.
    fn switch_mode(&self, mode: u32) -> u32;

    /// Toggle man-in-the-middle inspection.
    fn set_mitm(&self, enabled: bool);

    /// Short display name of the connected upstream.
    fn nickname(&self) -> String;

    /// Number of buffered log records, or `LOG_CHANNEL_CLOSED` when the
    /// engine is not running.
    fn log_length(&self) -> u64;

    /// Read the record at `index` as `(timestamp_or_flags, text)`.
    /// Out-of-range indices yield `(0, "")`.
    fn log_read(&self, index: u64) -> (u64, String);

    /// Drop every buffered record up to and including `index`.
    fn log_delete_since(&self, index: u64);
}

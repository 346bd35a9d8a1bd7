// FlightDeck - util/constants.rs
//
// Single source of truth for all named constants, limits, and defaults.

// =============================================================================
// Application metadata
// =============================================================================

/// Application display name.
pub const APP_NAME: &str = "FlightDeck";

/// Application identifier used for config/data directories.
pub const APP_ID: &str = "FlightDeck";

/// Current application version (updated by release script).
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

// =============================================================================
// Engine status bitmask layout
// =============================================================================
//
// Bit 0   ALREADY_RUNNING   a session was live when start was called
// Bit 1   EXITED            the engine stopped serving (stop call or error)
// Bit 2   PANICKED          the engine crashed internally
// Bit 3   CREATE_FAILED     the engine could not be created
// Bit 15  ERROR             marker set alongside any of bits 1-3
//
// Every other bit is reserved and ignored by the decoder.

/// Engine is running normally.
pub const STATUS_OK: u32 = 0;

/// A session was already live.
pub const STATUS_ALREADY_RUNNING: u32 = 1 << 0;

/// Engine exited.
pub const STATUS_EXITED: u32 = 1 << 1;

/// Engine panicked.
pub const STATUS_PANICKED: u32 = 1 << 2;

/// Engine creation failed.
pub const STATUS_CREATE_FAILED: u32 = 1 << 3;

/// Error marker accompanying the failure bits.
pub const STATUS_ERROR: u32 = 1 << 15;

// =============================================================================
// Engine mode constants
// =============================================================================

/// Base value for the routing mode constants passed to `switch_mode`.
pub const MODE_BASE: u32 = 1 << 16;

/// Proxy every host.
pub const MODE_GLOBAL: u32 = MODE_BASE;

/// Proxy only hosts outside the route list.
pub const MODE_IPLIST: u32 = MODE_BASE + 1;

/// Proxy nothing.
pub const MODE_NONE: u32 = MODE_BASE + 2;

// =============================================================================
// Log streaming
// =============================================================================

/// Log length reported by the engine once its log channel has closed.
pub const LOG_CHANNEL_CLOSED: u64 = u64::MAX;

/// How often the log stream polls the engine for new records (ms).
pub const LOG_POLL_INTERVAL_MS: u64 = 200;

/// How often the stop flag is checked while the log stream sleeps (ms).
pub const LOG_STOP_CHECK_INTERVAL_MS: u64 = 50;

/// Default number of log lines retained for display.
pub const DEFAULT_LOG_CAPACITY: usize = 100;

/// Minimum user-configurable log capacity.
pub const MIN_LOG_CAPACITY: usize = 10;

/// Maximum user-configurable log capacity.
pub const MAX_LOG_CAPACITY: usize = 10_000;

/// Longest engine log line kept, in bytes. Longer lines are truncated.
pub const MAX_LOG_LINE_BYTES: usize = 2_047;

// =============================================================================
// Session control
// =============================================================================

/// Delay between readiness and the MITM toggle, giving the engine time to
/// finish its own setup (ms).
pub const MITM_GRACE_DELAY_MS: u64 = 2_000;

/// Maximum length of the engine nickname shown to the user.
pub const MAX_NICKNAME_LEN: usize = 31;

// =============================================================================
// Profile defaults
// =============================================================================

/// Default local listen address.
pub const DEFAULT_LOCAL_ADDR: &str = ":8100";

/// Default UDP relay port.
pub const DEFAULT_UDP_PORT: u16 = 8731;

/// Default UDP-over-TCP connection multiplier.
pub const DEFAULT_UDP_TCP_FACTOR: u32 = 3;

/// Default engine DNS cache size.
pub const DEFAULT_DNS_CACHE_SIZE: u32 = 1_024;

/// Hard upper bound on the DNS cache size.
pub const MAX_DNS_CACHE_SIZE: u32 = 1_048_576;

/// Maximum number of profiles kept in a store.
pub const MAX_PROFILES: usize = 1_000;

// =============================================================================
// Persistence
// =============================================================================

/// Number of fields in a legacy profile line (domain may follow as a ninth).
pub const LEGACY_FIELD_COUNT: usize = 8;

/// Field delimiter of the legacy profile format.
pub const LEGACY_DELIMITER: char = '|';

/// Escape character of the legacy profile format.
pub const LEGACY_ESCAPE: char = '\\';

/// Section name prefix for profiles in the sectioned store.
pub const SERVER_SECTION_PREFIX: &str = "server-";

/// Section holding global settings in the sectioned store.
pub const DEFAULT_SECTION: &str = "default";

/// Sectioned store file name (stored in the platform config directory).
pub const STORE_FILE_NAME: &str = "flightdeck.toml";

/// Legacy flat profile file name.
pub const LEGACY_FILE_NAME: &str = "server.txt";

/// Route list file name (stored in the platform config directory).
pub const ROUTE_LIST_FILE_NAME: &str = "chinalist.txt";

/// Maximum size of the route list file in bytes.
pub const MAX_ROUTE_LIST_SIZE: u64 = 8 * 1024 * 1024; // 8 MB

// =============================================================================
// Relay agent
// =============================================================================

/// Request header carrying the `host,port[,dns]` target descriptor.
pub const RELAY_TARGET_HEADER: &str = "x-forwarded-url";

/// Response header carrying the base64 resolved address.
pub const RELAY_DNS_HEADER: &str = "etag";

/// Marker selecting DNS resolution instead of a TCP relay.
pub const RELAY_DNS_MARKER: &str = "dns";

/// TCP connect timeout for relayed connections (seconds).
pub const RELAY_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default relay listen address.
pub const DEFAULT_RELAY_LISTEN: &str = "127.0.0.1:8080";

// =============================================================================
// Logging
// =============================================================================

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

// FlightDeck - util/error.rs
//
// Typed error hierarchy with context-preserving error chains.
// Engine-side failures are not errors: they travel as `SessionStatus`
// values and are handled by returning the session to Stopped.

use std::fmt;
use std::io;
use std::path::PathBuf;

use crate::core::model::SessionState;

/// Top-level error type for all FlightDeck operations.
/// Errors are categorised by the subsystem that produced them.
#[derive(Debug)]
pub enum FlightDeckError {
    /// Profile validation failed.
    Profile(ProfileError),

    /// Profile or settings persistence failed.
    Store(StoreError),

    /// A session lifecycle request was rejected.
    Session(SessionError),

    /// Configuration loading or validation failed.
    Config(ConfigError),

    /// Relay agent request or startup failed.
    Relay(RelayError),

    /// I/O error with path context.
    Io {
        path: PathBuf,
        operation: &'static str,
        source: io::Error,
    },
}

impl fmt::Display for FlightDeckError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Profile(e) => write!(f, "Profile error: {e}"),
            Self::Store(e) => write!(f, "Store error: {e}"),
            Self::Session(e) => write!(f, "Session error: {e}"),
            Self::Config(e) => write!(f, "Configuration error: {e}"),
            Self::Relay(e) => write!(f, "Relay error: {e}"),
            Self::Io {
                path,
                operation,
                source,
            } => write!(
                f,
                "I/O error during {operation} on '{}': {source}",
                path.display()
            ),
        }
    }
}

impl std::error::Error for FlightDeckError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Profile(e) => Some(e),
            Self::Store(e) => Some(e),
            Self::Session(e) => Some(e),
            Self::Config(e) => Some(e),
            Self::Relay(e) => Some(e),
            Self::Io { source, .. } => Some(source),
        }
    }
}

// ---------------------------------------------------------------------------
// Profile errors
// ---------------------------------------------------------------------------

/// Errors raised when a profile fails validation before any engine call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileError {
    /// A required field is empty.
    MissingField { field: &'static str },

    /// A field holds a value the engine cannot accept.
    InvalidField {
        field: &'static str,
        value: String,
        reason: &'static str,
    },

    /// No profile is stored under the given server address.
    NotFound { server: String },
}

impl fmt::Display for ProfileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingField { field } => write!(f, "required field '{field}' is empty"),
            Self::InvalidField {
                field,
                value,
                reason,
            } => write!(f, "field '{field}' = '{value}' is invalid: {reason}"),
            Self::NotFound { server } => write!(f, "no profile stored for '{server}'"),
        }
    }
}

impl std::error::Error for ProfileError {}

impl From<ProfileError> for FlightDeckError {
    fn from(e: ProfileError) -> Self {
        Self::Profile(e)
    }
}

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

/// Errors related to reading or writing persisted state.
#[derive(Debug)]
pub enum StoreError {
    /// The store file could not be read or written.
    Io {
        path: PathBuf,
        operation: &'static str,
        source: io::Error,
    },

    /// The sectioned store is not valid TOML.
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// The sectioned store could not be serialised.
    TomlSerialize {
        path: PathBuf,
        source: toml::ser::Error,
    },

    /// Saving would exceed the profile limit.
    TooManyProfiles { count: usize, max: usize },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io {
                path,
                operation,
                source,
            } => write!(
                f,
                "cannot {operation} store '{}': {source}",
                path.display()
            ),
            Self::TomlParse { path, source } => {
                write!(f, "failed to parse store '{}': {source}", path.display())
            }
            Self::TomlSerialize { path, source } => {
                write!(f, "failed to serialise store '{}': {source}", path.display())
            }
            Self::TooManyProfiles { count, max } => {
                write!(f, "{count} profiles exceeds the maximum of {max}")
            }
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::TomlParse { source, .. } => Some(source),
            Self::TomlSerialize { source, .. } => Some(source),
            Self::TooManyProfiles { .. } => None,
        }
    }
}

impl From<StoreError> for FlightDeckError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

// ---------------------------------------------------------------------------
// Session errors
// ---------------------------------------------------------------------------

/// Errors raised by `SessionController` requests.
///
/// "Already running" is deliberately absent: it is an informational
/// outcome, not an error.
#[derive(Debug)]
pub enum SessionError {
    /// The submitted profile failed validation; the engine was not called.
    InvalidProfile(ProfileError),

    /// The request is not valid in the current state.
    InvalidTransition {
        operation: &'static str,
        state: SessionState,
    },

    /// The engine thread could not be spawned.
    Spawn { source: io::Error },
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidProfile(e) => write!(f, "profile rejected: {e}"),
            Self::InvalidTransition { operation, state } => {
                write!(f, "cannot {operation} while {state}")
            }
            Self::Spawn { source } => write!(f, "cannot spawn engine thread: {source}"),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidProfile(e) => Some(e),
            Self::Spawn { source } => Some(source),
            Self::InvalidTransition { .. } => None,
        }
    }
}

impl From<ProfileError> for SessionError {
    fn from(e: ProfileError) -> Self {
        Self::InvalidProfile(e)
    }
}

impl From<SessionError> for FlightDeckError {
    fn from(e: SessionError) -> Self {
        Self::Session(e)
    }
}

// ---------------------------------------------------------------------------
// Config errors
// ---------------------------------------------------------------------------

/// Errors in settings or options supplied on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A setting is out of the allowed range or not recognised.
    ValueOutOfRange {
        field: String,
        value: String,
        expected: String,
    },

    /// `run` needs an engine executable unless it is a dry run.
    MissingEngine,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ValueOutOfRange {
                field,
                value,
                expected,
            } => write!(
                f,
                "Setting '{field}' = '{value}' is out of range. Expected: {expected}"
            ),
            Self::MissingEngine => {
                write!(f, "No engine executable given. Pass --engine <PATH> or --dry-run")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for FlightDeckError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

// ---------------------------------------------------------------------------
// Relay errors
// ---------------------------------------------------------------------------

/// Errors related to relay target parsing and listener startup.
#[derive(Debug)]
pub enum RelayError {
    /// The request carried no target header.
    MissingTarget,

    /// The target descriptor is not `host,port[,dns]`.
    MalformedTarget { raw: String },

    /// The port field is not a valid TCP port.
    InvalidPort { raw: String },

    /// The listen socket could not be bound or served.
    Listen { addr: String, source: io::Error },
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingTarget => write!(f, "missing relay target header"),
            Self::MalformedTarget { raw } => {
                write!(f, "relay target '{raw}' is not 'host,port[,dns]'")
            }
            Self::InvalidPort { raw } => write!(f, "relay port '{raw}' is not a valid port"),
            Self::Listen { addr, source } => write!(f, "cannot listen on '{addr}': {source}"),
        }
    }
}

impl std::error::Error for RelayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Listen { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<RelayError> for FlightDeckError {
    fn from(e: RelayError) -> Self {
        Self::Relay(e)
    }
}

/// Convenience type alias for FlightDeck results.
pub type Result<T> = std::result::Result<T, FlightDeckError>;

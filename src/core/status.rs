// FlightDeck - core/status.rs
//
// Status bitmask returned by the engine's start call.
//
// The bit layout is defined once in `util::constants` (see the table there).
// Decoding is total: every `u32` is a legal input, reserved bits are ignored,
// and zero decodes to "running normally".

use crate::util::constants::{
    STATUS_ALREADY_RUNNING, STATUS_CREATE_FAILED, STATUS_ERROR, STATUS_EXITED, STATUS_OK,
    STATUS_PANICKED,
};
use serde::Serialize;
use std::fmt;

/// Packed status word produced once per start call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct SessionStatus(pub u32);

impl SessionStatus {
    pub const OK: Self = Self(STATUS_OK);
    pub const ALREADY_RUNNING: Self = Self(STATUS_ALREADY_RUNNING);
    pub const EXITED: Self = Self(STATUS_ERROR | STATUS_EXITED);
    pub const PANICKED: Self = Self(STATUS_ERROR | STATUS_PANICKED);
    pub const CREATE_FAILED: Self = Self(STATUS_ERROR | STATUS_CREATE_FAILED);

    pub fn bits(self) -> u32 {
        self.0
    }

    /// Combine two status words.
    pub fn with(self, other: SessionStatus) -> Self {
        Self(self.0 | other.0)
    }

    pub fn decode(self) -> DecodedStatus {
        DecodedStatus {
            already_running: self.0 & STATUS_ALREADY_RUNNING != 0,
            exited: self.0 & STATUS_EXITED != 0,
            create_failed: self.0 & STATUS_CREATE_FAILED != 0,
            panicked: self.0 & STATUS_PANICKED != 0,
        }
    }
}

impl From<u32> for SessionStatus {
    fn from(bits: u32) -> Self {
        Self(bits)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// Discrete conditions carried by a `SessionStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DecodedStatus {
    pub already_running: bool,
    pub exited: bool,
    pub create_failed: bool,
    pub panicked: bool,
}

impl DecodedStatus {
    /// Creation failure and panics need the user's attention; the other
    /// conditions are informational.
    pub fn is_actionable(&self) -> bool {
        self.create_failed || self.panicked
    }

    /// User-facing notices, one per set condition, in a fixed order.
    pub fn messages(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.already_running {
            out.push("proxy already started");
        }
        if self.exited {
            out.push("proxy exited");
        }
        if self.panicked {
            out.push("proxy panicked");
        }
        if self.create_failed {
            out.push("proxy cannot be created");
        }
        out
    }
}

// =============================================================================
// Unit tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_is_not_actionable() {
        let d = SessionStatus(0).decode();
        assert_eq!(d, DecodedStatus::default());
        assert!(!d.is_actionable());
        assert!(d.messages().is_empty());
    }

    #[test]
    fn test_exited_and_create_failed_bits() {
        let d = SessionStatus(0b1010).decode();
        assert_eq!(
            d,
            DecodedStatus {
                already_running: false,
                exited: true,
                create_failed: true,
                panicked: false,
            }
        );
        assert!(d.is_actionable());
    }

    #[test]
    fn test_decode_is_total_over_edge_values() {
        for bits in [1u32, 0x7fff, 0x8000, 0xffff, 0x1_0000, u32::MAX - 1, u32::MAX] {
            let d = SessionStatus(bits).decode();
            // Reserved bits never leak into the decoded conditions.
            let rebuilt = (d.already_running as u32) * STATUS_ALREADY_RUNNING
                | (d.exited as u32) * STATUS_EXITED
                | (d.panicked as u32) * STATUS_PANICKED
                | (d.create_failed as u32) * STATUS_CREATE_FAILED;
            assert_eq!(rebuilt, bits & 0b1111, "bits = {bits:#x}");
        }
    }

    #[test]
    fn test_error_marker_alone_decodes_to_nothing() {
        assert_eq!(SessionStatus(STATUS_ERROR).decode(), DecodedStatus::default());
    }

    #[test]
    fn test_named_statuses() {
        assert!(SessionStatus::ALREADY_RUNNING.decode().already_running);
        assert!(!SessionStatus::ALREADY_RUNNING.decode().is_actionable());
        assert!(SessionStatus::EXITED.decode().exited);
        assert!(SessionStatus::PANICKED.decode().is_actionable());
        assert_eq!(
            SessionStatus::EXITED.with(SessionStatus::PANICKED).decode().messages(),
            vec!["proxy exited", "proxy panicked"]
        );
    }
}

// FlightDeck - core/profile.rs
//
// Profile validation and the two persisted representations:
//   - legacy line: escaped, pipe-delimited fields in a fixed order
//   - section: one `server-<address>` table in the sectioned store
//
// Pure functions only; file handling lives in app::profile_store.

use crate::core::escape::{self, Dialect};
use crate::core::model::Profile;
use crate::util::constants::{
    DEFAULT_LOCAL_ADDR, DEFAULT_UDP_PORT, DEFAULT_UDP_TCP_FACTOR, LEGACY_FIELD_COUNT,
    SERVER_SECTION_PREFIX,
};
use crate::util::error::ProfileError;
use serde::{Deserialize, Serialize};

// =============================================================================
// Validation
// =============================================================================

/// Basic checks applied before a profile reaches the engine.
///
/// Server address, local address, and key must be non-empty; no field may
/// contain a line break; the server address must look like `host:port`.
pub fn validate(profile: &Profile) -> Result<(), ProfileError> {
    let required: [(&'static str, &str); 3] = [
        ("server address", &profile.server_addr),
        ("local address", &profile.local_addr),
        ("key", &profile.key),
    ];
    for (field, value) in required {
        if value.trim().is_empty() {
            return Err(ProfileError::MissingField { field });
        }
    }

    let text_fields: [(&'static str, &str); 6] = [
        ("server address", &profile.server_addr),
        ("local address", &profile.local_addr),
        ("key", &profile.key),
        ("auth user", &profile.auth_user),
        ("auth pass", &profile.auth_pass),
        ("domain", &profile.domain),
    ];
    for (field, value) in text_fields {
        if value.contains(|c: char| matches!(c, '\n' | '\r' | '\0')) {
            return Err(ProfileError::InvalidField {
                field,
                value: value.escape_debug().to_string(),
                reason: "contains a control character",
            });
        }
    }

    match profile.server_addr.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {}
        _ => {
            return Err(ProfileError::InvalidField {
                field: "server address",
                value: profile.server_addr.clone(),
                reason: "expected host:port",
            })
        }
    }

    if profile.auth_user.contains(':') {
        return Err(ProfileError::InvalidField {
            field: "auth user",
            value: profile.auth_user.clone(),
            reason: "must not contain ':'",
        });
    }

    Ok(())
}

// =============================================================================
// Legacy line format
// =============================================================================

/// Serialise to one legacy line.
///
/// Fields, in order: server, local, key, user, pass, partial (`1`/`0`),
/// UDP port, UDP-over-TCP. A non-empty domain follows as a ninth field;
/// readers that know only eight fields ignore it.
pub fn to_line(profile: &Profile, dialect: Dialect) -> String {
    let partial = if profile.partial { "1" } else { "0" };
    let udp = profile.udp_port.to_string();
    let udp_tcp = profile.udp_tcp_factor.to_string();
    let mut fields: Vec<&str> = vec![
        &profile.server_addr,
        &profile.local_addr,
        &profile.key,
        &profile.auth_user,
        &profile.auth_pass,
        partial,
        &udp,
        &udp_tcp,
    ];
    if !profile.domain.is_empty() {
        fields.push(&profile.domain);
    }
    escape::join_fields_as(&fields, dialect)
}

/// Parse one legacy line. Returns `None` for lines with fewer than eight
/// fields or with unparseable numeric fields; never fails hard.
pub fn from_line(line: &str, dialect: Dialect) -> Option<Profile> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let fields = escape::split_fields_as(line, dialect);
    if fields.len() < LEGACY_FIELD_COUNT {
        return None;
    }

    let udp_port = fields[6].trim().parse::<u16>().ok()?;
    let udp_tcp_factor = fields[7].trim().parse::<u32>().ok()?;

    let mut fields = fields.into_iter();
    let mut next = || fields.next().unwrap_or_default();
    let server_addr = next();
    if server_addr.is_empty() {
        return None;
    }
    let local_addr = next();
    let key = next();
    let auth_user = next();
    let auth_pass = next();
    let partial = next() == "1";
    let _ = next();
    let _ = next();
    let domain = next();

    Some(Profile {
        server_addr,
        local_addr,
        key,
        auth_user,
        auth_pass,
        partial,
        udp_port,
        udp_tcp_factor,
        domain,
    })
}

// =============================================================================
// Section format
// =============================================================================

/// On-disk shape of one `server-<address>` table.
///
/// Missing keys fall back to the same defaults a fresh profile gets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileSection {
    #[serde(rename = "Address")]
    pub address: String,
    #[serde(rename = "Local")]
    pub local: String,
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Username")]
    pub username: String,
    #[serde(rename = "Password")]
    pub password: String,
    #[serde(rename = "Partial")]
    pub partial: bool,
    #[serde(rename = "UDP")]
    pub udp: u16,
    #[serde(rename = "UDPoverTCP")]
    pub udp_over_tcp: u32,
    #[serde(rename = "Domain")]
    pub domain: String,
}

impl Default for ProfileSection {
    fn default() -> Self {
        Self {
            address: String::new(),
            local: DEFAULT_LOCAL_ADDR.to_string(),
            key: String::new(),
            username: String::new(),
            password: String::new(),
            partial: false,
            udp: DEFAULT_UDP_PORT,
            udp_over_tcp: DEFAULT_UDP_TCP_FACTOR,
            domain: String::new(),
        }
    }
}

/// Section name under which `server_addr` is stored.
pub fn section_name(server_addr: &str) -> String {
    format!("{SERVER_SECTION_PREFIX}{server_addr}")
}

/// `true` for section names that hold a profile.
pub fn is_profile_section(name: &str) -> bool {
    name.starts_with(SERVER_SECTION_PREFIX)
}

pub fn to_section(profile: &Profile) -> ProfileSection {
    ProfileSection {
        address: profile.server_addr.clone(),
        local: profile.local_addr.clone(),
        key: profile.key.clone(),
        username: profile.auth_user.clone(),
        password: profile.auth_pass.clone(),
        partial: profile.partial,
        udp: profile.udp_port,
        udp_over_tcp: profile.udp_tcp_factor,
        domain: profile.domain.clone(),
    }
}

/// Rebuild a profile from its section. The `Address` key wins; when it is
/// missing the address is recovered from the section name.
pub fn from_section(name: &str, section: ProfileSection) -> Option<Profile> {
    let server_addr = if section.address.is_empty() {
        name.strip_prefix(SERVER_SECTION_PREFIX)?.to_string()
    } else {
        section.address
    };
    if server_addr.is_empty() {
        return None;
    }
    Some(Profile {
        server_addr,
        local_addr: section.local,
        key: section.key,
        auth_user: section.username,
        auth_pass: section.password,
        partial: section.partial,
        udp_port: section.udp,
        udp_tcp_factor: section.udp_over_tcp,
        domain: section.domain,
    })
}

// =============================================================================
// Unit tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Profile {
        Profile {
            server_addr: "1.2.3.4:80".into(),
            local_addr: "127.0.0.1:8100".into(),
            key: "a\\|b".into(),
            auth_user: "alice".into(),
            auth_pass: "p|w".into(),
            partial: true,
            udp_port: 9000,
            udp_tcp_factor: 5,
            domain: String::new(),
        }
    }

    #[test]
    fn test_line_round_trip() {
        let p = sample();
        let line = to_line(&p, Dialect::Full);
        assert!(line.contains("a\\\\\\|b"), "line = {line}");
        assert_eq!(from_line(&line, Dialect::Full), Some(p));
    }

    #[test]
    fn test_line_round_trip_with_domain() {
        let mut p = sample();
        p.domain = "cdn|example.com".into();
        assert_eq!(from_line(&to_line(&p, Dialect::Full), Dialect::Full), Some(p));
    }

    #[test]
    fn test_short_line_is_rejected() {
        assert_eq!(from_line("1.2.3.4:80|:8100|key|u|p|1|8731", Dialect::Full), None);
        assert_eq!(from_line("", Dialect::Full), None);
        // An escaped pipe does not count as a delimiter.
        assert_eq!(from_line("1.2.3.4:80|:8100|key|u|p|1|8731\\|3", Dialect::Full), None);
    }

    #[test]
    fn test_bad_numbers_are_rejected() {
        assert_eq!(from_line("1.2.3.4:80|:8100|key|u|p|1|port|3", Dialect::Full), None);
        assert_eq!(from_line("1.2.3.4:80|:8100|key|u|p|1|8731|-1", Dialect::Full), None);
    }

    #[test]
    fn test_pipe_only_line_keeps_backslashes_in_secrets() {
        let p = from_line("1.2.3.4:80|:8100|C:\\new\\\\x|u|p\\|w|0|8731|3", Dialect::PipeOnly)
            .unwrap();
        assert_eq!(p.key, "C:\\new\\\\x");
        assert_eq!(p.auth_pass, "p|w");
        assert!(!p.partial);

        let mut q = sample();
        q.key = "C:\\keys\\main".into();
        let line = to_line(&q, Dialect::PipeOnly);
        assert!(line.contains("C:\\keys\\main|"), "line = {line}");
        assert_eq!(from_line(&line, Dialect::PipeOnly), Some(q));
    }

    #[test]
    fn test_crlf_line_endings_are_tolerated() {
        let p = sample();
        let line = format!("{}\r", to_line(&p, Dialect::Full));
        assert_eq!(from_line(&line, Dialect::Full), Some(p));
    }

    #[test]
    fn test_section_round_trip() {
        let mut p = sample();
        p.domain = "example.com".into();
        let name = section_name(&p.server_addr);
        assert_eq!(name, "server-1.2.3.4:80");
        assert!(is_profile_section(&name));
        assert_eq!(from_section(&name, to_section(&p)), Some(p));
    }

    #[test]
    fn test_section_address_recovered_from_name() {
        let section = ProfileSection {
            key: "k".into(),
            ..Default::default()
        };
        let p = from_section("server-host:1", section).unwrap();
        assert_eq!(p.server_addr, "host:1");
        assert_eq!(p.udp_port, DEFAULT_UDP_PORT);
    }

    #[test]
    fn test_validate_requires_fields() {
        let mut p = sample();
        assert!(validate(&p).is_ok());
        p.key.clear();
        assert_eq!(
            validate(&p),
            Err(ProfileError::MissingField { field: "key" })
        );
    }

    #[test]
    fn test_validate_rejects_bad_server_address() {
        let mut p = sample();
        p.server_addr = "no-port".into();
        assert!(matches!(
            validate(&p),
            Err(ProfileError::InvalidField { field: "server address", .. })
        ));
        p.server_addr = "host:99999".into();
        assert!(validate(&p).is_err());
    }

    #[test]
    fn test_validate_rejects_line_breaks() {
        let mut p = sample();
        p.domain = "a\nb".into();
        assert!(matches!(
            validate(&p),
            Err(ProfileError::InvalidField { field: "domain", .. })
        ));
    }
}

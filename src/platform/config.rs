// FlightDeck - platform/config.rs
//
// Platform directory resolution and the `[default]` settings table of the
// sectioned store, with validation at load time.
//
// Uses the `directories` crate for XDG (Linux), AppData (Windows),
// Library (macOS) compliance.

use crate::core::model::{EngineLogLevel, ProxyMode};
use crate::platform::store::StoreFile;
use crate::util::constants;
use crate::util::error::{ConfigError, StoreError};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::{Path, PathBuf};

/// Resolved platform paths for FlightDeck configuration and scratch data.
#[derive(Debug, Clone)]
pub struct PlatformPaths {
    /// Configuration directory (e.g. ~/.config/flightdeck/ or %APPDATA%\FlightDeck\config\)
    pub config_dir: PathBuf,

    /// Sectioned store holding settings and profiles.
    pub store_path: PathBuf,

    /// Legacy flat profile file, read by `profiles import`.
    pub legacy_path: PathBuf,

    /// Default route list location.
    pub route_list_path: PathBuf,

    /// Data directory for engine scratch files.
    pub data_dir: PathBuf,
}

impl PlatformPaths {
    /// Resolve platform-appropriate paths.
    ///
    /// Falls back to the current directory if platform dirs cannot be determined.
    pub fn resolve() -> Self {
        if let Some(proj_dirs) = ProjectDirs::from("", "", constants::APP_ID) {
            let paths = Self::with_dirs(
                proj_dirs.config_dir().to_path_buf(),
                proj_dirs.data_dir().to_path_buf(),
            );
            tracing::debug!(
                config = %paths.config_dir.display(),
                data = %paths.data_dir.display(),
                "Platform paths resolved"
            );
            paths
        } else {
            tracing::warn!("Could not determine platform directories, using current directory");
            Self::in_dir(PathBuf::from("."))
        }
    }

    /// Keep everything under one directory (the `--config-dir` override).
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self::with_dirs(dir.clone(), dir)
    }

    fn with_dirs(config_dir: PathBuf, data_dir: PathBuf) -> Self {
        Self {
            store_path: config_dir.join(constants::STORE_FILE_NAME),
            legacy_path: config_dir.join(constants::LEGACY_FILE_NAME),
            route_list_path: config_dir.join(constants::ROUTE_LIST_FILE_NAME),
            config_dir,
            data_dir,
        }
    }
}

// =============================================================================
// [default] settings table
// =============================================================================

/// Raw deserialisable shape of the `[default]` table.
///
/// Unknown keys are ignored so a store written by a newer build still loads.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawDefaultSection {
    #[serde(rename = "LogLevel")]
    pub log_level: Option<String>,
    #[serde(rename = "ProxyType")]
    pub proxy_type: Option<String>,
    #[serde(rename = "Lang")]
    pub lang: Option<String>,
    #[serde(rename = "DNSCache")]
    pub dns_cache: Option<i64>,
    #[serde(rename = "Autostart")]
    pub autostart: Option<bool>,
    #[serde(rename = "MITM")]
    pub mitm: Option<bool>,
    #[serde(rename = "AutoMin")]
    pub auto_min: Option<bool>,
    #[serde(rename = "LogCapacity")]
    pub log_capacity: Option<i64>,
    #[serde(rename = "RouteList")]
    pub route_list: Option<String>,
}

/// Shape written back to the `[default]` table.
#[derive(Debug, Serialize)]
struct DefaultSectionOut<'a> {
    #[serde(rename = "LogLevel")]
    log_level: &'a str,
    #[serde(rename = "ProxyType")]
    proxy_type: &'a str,
    #[serde(rename = "Lang")]
    lang: &'a str,
    #[serde(rename = "DNSCache")]
    dns_cache: u32,
    #[serde(rename = "Autostart")]
    autostart: bool,
    #[serde(rename = "MITM")]
    mitm: bool,
    #[serde(rename = "AutoMin")]
    auto_min: bool,
    #[serde(rename = "LogCapacity")]
    log_capacity: usize,
    #[serde(rename = "RouteList", skip_serializing_if = "Option::is_none")]
    route_list: Option<String>,
}

/// Interface languages the front end ships strings for.
pub const SUPPORTED_LANGS: &[&str] = &["en", "zh"];

/// Validated global settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Engine log level passed to the start call.
    pub log_level: EngineLogLevel,
    /// Mode applied when a session becomes ready.
    pub proxy_mode: ProxyMode,
    pub lang: String,
    pub dns_cache_size: u32,
    /// Stored and round-tripped for desktop front ends; the command line
    /// does not act on it.
    pub autostart: bool,
    /// Enable MITM inspection after the grace delay.
    pub mitm: bool,
    /// Stored only, like `autostart`.
    pub auto_minimize: bool,
    /// Lines kept in the display log buffer.
    pub log_capacity: usize,
    /// Route list path override; `None` uses the config directory.
    pub route_list: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: EngineLogLevel::default(),
            proxy_mode: ProxyMode::default(),
            lang: SUPPORTED_LANGS[0].to_string(),
            dns_cache_size: constants::DEFAULT_DNS_CACHE_SIZE,
            autostart: false,
            mitm: false,
            auto_minimize: false,
            log_capacity: constants::DEFAULT_LOG_CAPACITY,
            route_list: None,
        }
    }
}

impl Settings {
    /// Route list file to read for a session.
    pub fn route_list_path(&self, paths: &PlatformPaths) -> PathBuf {
        self.route_list
            .clone()
            .unwrap_or_else(|| paths.route_list_path.clone())
    }
}

/// Load and validate the `[default]` table of the store at `store_path`.
///
/// Returns validated settings and a list of non-fatal warnings. A missing
/// store or table yields defaults with no warnings (first run); an
/// unreadable store yields defaults with one warning.
pub fn load_settings(store_path: &Path) -> (Settings, Vec<String>) {
    let mut warnings: Vec<String> = Vec::new();

    let table = match StoreFile::new(store_path).section(constants::DEFAULT_SECTION) {
        Ok(Some(t)) => t,
        Ok(None) => {
            tracing::debug!(path = %store_path.display(), "No [default] table; using defaults");
            return (Settings::default(), warnings);
        }
        Err(e) => {
            let msg = format!("{e}. Using default settings.");
            tracing::warn!("{}", msg);
            warnings.push(msg);
            return (Settings::default(), warnings);
        }
    };

    let raw: RawDefaultSection = match toml::Value::Table(table).try_into() {
        Ok(r) => r,
        Err(e) => {
            let msg = format!(
                "[default] table in '{}' is malformed: {e}. Using default settings.",
                store_path.display()
            );
            tracing::warn!("{}", msg);
            warnings.push(msg);
            return (Settings::default(), warnings);
        }
    };

    let settings = validate_settings(raw, &mut warnings);
    if !warnings.is_empty() {
        tracing::warn!(count = warnings.len(), "Settings validation produced warnings");
    }
    (settings, warnings)
}

/// Check each raw value against its allowed range, accumulating warnings.
pub fn validate_settings(raw: RawDefaultSection, warnings: &mut Vec<String>) -> Settings {
    let mut settings = Settings::default();

    if let Some(ref level) = raw.log_level {
        match level.parse::<EngineLogLevel>() {
            Ok(l) => settings.log_level = l,
            Err(_) => warnings.push(format!(
                "[default] LogLevel = \"{level}\" is not recognised. \
                 Valid values: dbg, log, warn, err, off. Using default ({}).",
                settings.log_level
            )),
        }
    }

    if let Some(ref mode) = raw.proxy_type {
        match mode.parse::<ProxyMode>() {
            Ok(m) => settings.proxy_mode = m,
            Err(_) => warnings.push(format!(
                "[default] ProxyType = \"{mode}\" is not recognised. \
                 Valid values: iplist, global, none. Using default ({}).",
                settings.proxy_mode
            )),
        }
    }

    if let Some(ref lang) = raw.lang {
        let lower = lang.to_lowercase();
        if SUPPORTED_LANGS.contains(&lower.as_str()) {
            settings.lang = lower;
        } else {
            warnings.push(format!(
                "[default] Lang = \"{lang}\" is not supported. Using default ({}).",
                settings.lang
            ));
        }
    }

    if let Some(size) = raw.dns_cache {
        match u32::try_from(size) {
            Ok(s) if (1..=constants::MAX_DNS_CACHE_SIZE).contains(&s) => {
                settings.dns_cache_size = s;
            }
            _ => warnings.push(format!(
                "[default] DNSCache = {size} is out of range (1-{}). Using default ({}).",
                constants::MAX_DNS_CACHE_SIZE,
                constants::DEFAULT_DNS_CACHE_SIZE,
            )),
        }
    }

    if let Some(cap) = raw.log_capacity {
        match usize::try_from(cap) {
            Ok(c) if (constants::MIN_LOG_CAPACITY..=constants::MAX_LOG_CAPACITY).contains(&c) => {
                settings.log_capacity = c;
            }
            _ => warnings.push(format!(
                "[default] LogCapacity = {cap} is out of range ({}-{}). Using default ({}).",
                constants::MIN_LOG_CAPACITY,
                constants::MAX_LOG_CAPACITY,
                constants::DEFAULT_LOG_CAPACITY,
            )),
        }
    }

    if let Some(ref path) = raw.route_list {
        if !path.trim().is_empty() {
            settings.route_list = Some(PathBuf::from(path));
        }
    }

    settings.autostart = raw.autostart.unwrap_or(settings.autostart);
    settings.mitm = raw.mitm.unwrap_or(settings.mitm);
    settings.auto_minimize = raw.auto_min.unwrap_or(settings.auto_minimize);

    settings
}

/// Reject values that `load_settings` would replace with a default.
pub fn check_settings(settings: &Settings) -> Result<(), ConfigError> {
    let out_of_range = |field: &str, value: String, expected: String| -> Result<(), ConfigError> {
        Err(ConfigError::ValueOutOfRange {
            field: field.to_string(),
            value,
            expected,
        })
    };
    if !SUPPORTED_LANGS.contains(&settings.lang.to_ascii_lowercase().as_str()) {
        return out_of_range("lang", settings.lang.clone(), SUPPORTED_LANGS.join(" or "));
    }
    if !(1..=constants::MAX_DNS_CACHE_SIZE).contains(&settings.dns_cache_size) {
        return out_of_range(
            "dns-cache",
            settings.dns_cache_size.to_string(),
            format!("1-{}", constants::MAX_DNS_CACHE_SIZE),
        );
    }
    if !(constants::MIN_LOG_CAPACITY..=constants::MAX_LOG_CAPACITY).contains(&settings.log_capacity)
    {
        return out_of_range(
            "log-capacity",
            settings.log_capacity.to_string(),
            format!("{}-{}", constants::MIN_LOG_CAPACITY, constants::MAX_LOG_CAPACITY),
        );
    }
    Ok(())
}

/// Write `settings` into the `[default]` table, keeping every profile table.
pub fn save_settings(store_path: &Path, settings: &Settings) -> Result<(), StoreError> {
    let out = DefaultSectionOut {
        log_level: settings.log_level.as_str(),
        proxy_type: settings.proxy_mode.label(),
        lang: &settings.lang,
        dns_cache: settings.dns_cache_size,
        autostart: settings.autostart,
        mitm: settings.mitm,
        auto_min: settings.auto_minimize,
        log_capacity: settings.log_capacity,
        route_list: settings
            .route_list
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned()),
    };
    let serialize_err = |e| StoreError::TomlSerialize {
        path: store_path.to_path_buf(),
        source: e,
    };
    let table = match toml::Value::try_from(&out).map_err(serialize_err)? {
        toml::Value::Table(t) => t,
        _ => toml::Table::new(),
    };

    StoreFile::new(store_path).put_section(constants::DEFAULT_SECTION, table)?;
    tracing::info!(path = %store_path.display(), "Settings saved");
    Ok(())
}

/// Read the route list file. Absent or unreadable files yield an empty
/// list; files above `MAX_ROUTE_LIST_SIZE` are cut at that size.
pub fn load_route_list(path: &Path) -> String {
    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::debug!(path = %path.display(), error = %e, "Cannot read route list");
            }
            return String::new();
        }
    };

    let mut bytes = Vec::new();
    if let Err(e) = file
        .take(constants::MAX_ROUTE_LIST_SIZE)
        .read_to_end(&mut bytes)
    {
        tracing::debug!(path = %path.display(), error = %e, "Cannot read route list");
        return String::new();
    }
    tracing::debug!(path = %path.display(), bytes = bytes.len(), "Route list loaded");
    String::from_utf8_lossy(&bytes).into_owned()
}

// =============================================================================
// Unit tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_store(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join(constants::STORE_FILE_NAME);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_missing_store_gives_defaults_without_warnings() {
        let dir = TempDir::new().unwrap();
        let (settings, warnings) = load_settings(&dir.path().join("nope.toml"));
        assert_eq!(settings, Settings::default());
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_valid_default_table_is_applied() {
        let dir = TempDir::new().unwrap();
        let path = write_store(
            &dir,
            "[default]\nLogLevel = \"warn\"\nProxyType = \"global\"\nLang = \"ZH\"\n\
             DNSCache = 4096\nAutostart = true\nMITM = true\nAutoMin = true\nLogCapacity = 500\n",
        );
        let (s, warnings) = load_settings(&path);
        assert!(warnings.is_empty(), "{warnings:?}");
        assert_eq!(s.log_level, EngineLogLevel::Warn);
        assert_eq!(s.proxy_mode, ProxyMode::Global);
        assert_eq!(s.lang, "zh");
        assert_eq!(s.dns_cache_size, 4096);
        assert!(s.autostart && s.mitm && s.auto_minimize);
        assert_eq!(s.log_capacity, 500);
    }

    #[test]
    fn test_out_of_range_values_fall_back_with_warnings() {
        let dir = TempDir::new().unwrap();
        let path = write_store(
            &dir,
            "[default]\nLogLevel = \"loud\"\nDNSCache = -1\nLogCapacity = 1\nLang = \"fr\"\n",
        );
        let (s, warnings) = load_settings(&path);
        assert_eq!(warnings.len(), 4);
        assert_eq!(s.log_level, EngineLogLevel::default());
        assert_eq!(s.dns_cache_size, constants::DEFAULT_DNS_CACHE_SIZE);
        assert_eq!(s.log_capacity, constants::DEFAULT_LOG_CAPACITY);
        assert_eq!(s.lang, "en");
    }

    #[test]
    fn test_unparseable_store_warns_once() {
        let dir = TempDir::new().unwrap();
        let path = write_store(&dir, "[default\n");
        let (s, warnings) = load_settings(&path);
        assert_eq!(s, Settings::default());
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_save_then_load_keeps_profiles() {
        let dir = TempDir::new().unwrap();
        let path = write_store(&dir, "[\"server-h:1\"]\nKey = \"k\"\n");

        let settings = Settings {
            proxy_mode: ProxyMode::None,
            mitm: true,
            route_list: Some(PathBuf::from("/etc/routes.txt")),
            ..Settings::default()
        };
        save_settings(&path, &settings).unwrap();

        let (loaded, warnings) = load_settings(&path);
        assert!(warnings.is_empty(), "{warnings:?}");
        assert_eq!(loaded, settings);
        let doc = StoreFile::new(&path).read().unwrap();
        assert!(doc.contains_key("server-h:1"));
    }

    #[test]
    fn test_route_list_absent_is_empty() {
        let dir = TempDir::new().unwrap();
        assert_eq!(load_route_list(&dir.path().join("missing.txt")), "");
        let path = dir.path().join(constants::ROUTE_LIST_FILE_NAME);
        std::fs::write(&path, "1.0.1.0/24\n").unwrap();
        assert_eq!(load_route_list(&path), "1.0.1.0/24\n");
    }

    #[test]
    fn test_paths_in_dir() {
        let paths = PlatformPaths::in_dir("/tmp/fd");
        assert_eq!(paths.store_path, PathBuf::from("/tmp/fd/flightdeck.toml"));
        assert_eq!(paths.legacy_path, PathBuf::from("/tmp/fd/server.txt"));
        let settings = Settings::default();
        assert_eq!(
            settings.route_list_path(&paths),
            PathBuf::from("/tmp/fd/chinalist.txt")
        );
    }

    #[test]
    fn test_check_settings_names_the_bad_field() {
        assert_eq!(check_settings(&Settings::default()), Ok(()));

        let mut s = Settings::default();
        s.lang = "fr".into();
        match check_settings(&s) {
            Err(ConfigError::ValueOutOfRange { field, value, .. }) => {
                assert_eq!(field, "lang");
                assert_eq!(value, "fr");
            }
            other => panic!("unexpected {other:?}"),
        }

        let mut s = Settings::default();
        s.log_capacity = constants::MAX_LOG_CAPACITY + 1;
        assert!(matches!(
            check_settings(&s),
            Err(ConfigError::ValueOutOfRange { ref field, .. }) if field == "log-capacity"
        ));

        let mut s = Settings::default();
        s.dns_cache_size = 0;
        assert!(check_settings(&s).is_err());
    }
}

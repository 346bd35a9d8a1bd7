// FlightDeck - app/profile_store.rs
//
// The saved profile collection.
//
// `ProfileStore` owns the in-memory working set and is its only writer.
// Persistence goes through a `ProfileBackend`:
//   - `LegacyFile`  one escaped pipe-delimited line per profile, in either
//                   escaping dialect (pipe-only by default)
//   - `SectionFile` one `[server-<address>]` table per profile inside the
//                   sectioned store, next to the `[default]` settings table
//
// Every change rewrites the complete set; there are no incremental writes.
// Malformed records are skipped on load, never fatal.

use crate::core::escape::Dialect;
use crate::core::model::Profile;
use crate::core::profile::{self, ProfileSection};
use crate::platform::store::{self, StoreFile};
use crate::util::constants::MAX_PROFILES;
use crate::util::error::StoreError;
use std::path::{Path, PathBuf};

/// Persistence for the complete profile set.
pub trait ProfileBackend: Send {
    /// Read every well-formed profile. A missing file is an empty set.
    fn read_all(&self) -> Result<Vec<Profile>, StoreError>;

    /// Replace the persisted set with `profiles`.
    fn write_all(&self, profiles: &[Profile]) -> Result<(), StoreError>;

    /// File backing this store, for log messages.
    fn location(&self) -> &Path;
}

// =============================================================================
// Legacy flat file
// =============================================================================

/// Newline-separated flat file of legacy profile lines.
#[derive(Debug, Clone)]
pub struct LegacyFile {
    path: PathBuf,
    dialect: Dialect,
}

impl LegacyFile {
    /// Pipe-only escaping, as found in files from the first desktop client.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_dialect(path, Dialect::PipeOnly)
    }

    pub fn with_dialect(path: impl Into<PathBuf>, dialect: Dialect) -> Self {
        Self {
            path: path.into(),
            dialect,
        }
    }
}

impl ProfileBackend for LegacyFile {
    fn read_all(&self) -> Result<Vec<Profile>, StoreError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    operation: "read",
                    source: e,
                })
            }
        };

        let mut profiles = Vec::new();
        let mut skipped = 0usize;
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            match profile::from_line(line, self.dialect) {
                Some(p) => profiles.push(p),
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            tracing::debug!(path = %self.path.display(), skipped, "Skipped malformed profile lines");
        }
        Ok(profiles)
    }

    fn write_all(&self, profiles: &[Profile]) -> Result<(), StoreError> {
        let mut text = String::new();
        for p in profiles {
            text.push_str(&profile::to_line(p, self.dialect));
            text.push('\n');
        }
        store::write_atomic(&self.path, text.as_bytes())
    }

    fn location(&self) -> &Path {
        &self.path
    }
}

// =============================================================================
// Sectioned store
// =============================================================================

/// Profiles as `[server-<address>]` tables of the sectioned store.
/// Tables without the `server-` prefix are preserved on write.
#[derive(Debug, Clone)]
pub struct SectionFile {
    file: StoreFile,
}

impl SectionFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            file: StoreFile::new(path),
        }
    }
}

impl ProfileBackend for SectionFile {
    fn read_all(&self) -> Result<Vec<Profile>, StoreError> {
        let doc = self.file.read()?;
        let mut profiles = Vec::new();
        for (name, value) in doc {
            if !profile::is_profile_section(&name) {
                continue;
            }
            let section: ProfileSection = match value.try_into() {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(section = %name, error = %e, "Skipping malformed profile section");
                    continue;
                }
            };
            if let Some(p) = profile::from_section(&name, section) {
                profiles.push(p);
            }
        }
        Ok(profiles)
    }

    fn write_all(&self, profiles: &[Profile]) -> Result<(), StoreError> {
        let mut doc = self.file.read()?;
        doc.retain(|name, _| !profile::is_profile_section(name));
        for p in profiles {
            let value = toml::Value::try_from(profile::to_section(p)).map_err(|e| {
                StoreError::TomlSerialize {
                    path: self.file.path().to_path_buf(),
                    source: e,
                }
            })?;
            doc.insert(profile::section_name(&p.server_addr), value);
        }
        self.file.write(&doc)
    }

    fn location(&self) -> &Path {
        self.file.path()
    }
}

// =============================================================================
// ProfileStore
// =============================================================================

/// In-memory profile set backed by one persistence backend.
pub struct ProfileStore {
    backend: Box<dyn ProfileBackend>,
    profiles: Vec<Profile>,
}

impl std::fmt::Debug for ProfileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileStore")
            .field("location", &self.backend.location())
            .field("profiles", &self.profiles.len())
            .finish()
    }
}

impl ProfileStore {
    /// Open a store and load its current contents.
    pub fn open(backend: impl ProfileBackend + 'static) -> Result<Self, StoreError> {
        let mut store = Self {
            backend: Box::new(backend),
            profiles: Vec::new(),
        };
        store.load()?;
        Ok(store)
    }

    /// Re-read the persisted set, replacing the working set.
    ///
    /// Later duplicates of a server address are dropped and the set is
    /// capped at `MAX_PROFILES`.
    pub fn load(&mut self) -> Result<&[Profile], StoreError> {
        let mut loaded = self.backend.read_all()?;

        let mut seen = std::collections::HashSet::new();
        loaded.retain(|p| seen.insert(p.server_addr.clone()));

        if loaded.len() > MAX_PROFILES {
            tracing::warn!(
                count = loaded.len(),
                max = MAX_PROFILES,
                "Too many profiles stored, truncating"
            );
            loaded.truncate(MAX_PROFILES);
        }

        tracing::info!(
            path = %self.backend.location().display(),
            count = loaded.len(),
            "Profiles loaded"
        );
        self.profiles = loaded;
        Ok(&self.profiles)
    }

    pub fn list(&self) -> &[Profile] {
        &self.profiles
    }

    pub fn get(&self, server_addr: &str) -> Option<&Profile> {
        self.profiles.iter().find(|p| p.server_addr == server_addr)
    }

    /// Insert or replace by server address, then persist the whole set.
    /// The working set is left unchanged if persisting fails.
    pub fn save(&mut self, profile: Profile) -> Result<(), StoreError> {
        let mut next = self.profiles.clone();
        match next.iter_mut().find(|p| p.server_addr == profile.server_addr) {
            Some(existing) => *existing = profile,
            None => {
                if next.len() >= MAX_PROFILES {
                    return Err(StoreError::TooManyProfiles {
                        count: next.len() + 1,
                        max: MAX_PROFILES,
                    });
                }
                next.push(profile);
            }
        }

        self.backend.write_all(&next)?;
        self.profiles = next;
        tracing::debug!(count = self.profiles.len(), "Profiles saved");
        Ok(())
    }

    /// Remove by server address and persist. Returns the removed profile,
    /// `None` if nothing was stored under that address.
    pub fn delete(&mut self, server_addr: &str) -> Result<Option<Profile>, StoreError> {
        let Some(pos) = self.profiles.iter().position(|p| p.server_addr == server_addr) else {
            return Ok(None);
        };
        let mut next = self.profiles.clone();
        let removed = next.remove(pos);
        self.backend.write_all(&next)?;
        self.profiles = next;
        tracing::debug!(server = %server_addr, "Profile deleted");
        Ok(Some(removed))
    }
}

// =============================================================================
// Unit tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn profile(addr: &str, key: &str) -> Profile {
        let mut p = Profile::new(addr);
        p.key = key.into();
        p
    }

    #[test]
    fn test_legacy_save_then_reload_preserves_fields() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("server.txt");

        let mut p = profile("1.2.3.4:80", "a\\|b");
        p.auth_user = "u".into();
        p.auth_pass = "pa|ss".into();
        p.partial = true;
        p.udp_port = 9999;
        p.domain = "example.org".into();

        let file = || LegacyFile::with_dialect(&path, Dialect::Full);
        let mut store = ProfileStore::open(file()).unwrap();
        store.save(p.clone()).unwrap();

        let reopened = ProfileStore::open(file()).unwrap();
        assert_eq!(reopened.list(), &[p]);
    }

    #[test]
    fn test_legacy_default_reads_pipe_only_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("server.txt");
        std::fs::write(&path, "1.2.3.4:80|:8100|C:\\new\\\\x|u|p\\|w|0|8731|3\r\n").unwrap();

        let store = ProfileStore::open(LegacyFile::new(&path)).unwrap();
        let p = store.get("1.2.3.4:80").unwrap();
        assert_eq!(p.key, "C:\\new\\\\x");
        assert_eq!(p.auth_pass, "p|w");
    }

    #[test]
    fn test_legacy_malformed_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("server.txt");
        let good = profile::to_line(&profile("h:1", "k"), Dialect::PipeOnly);
        std::fs::write(&path, format!("garbage\n{good}\na|b|c\n\n")).unwrap();

        let store = ProfileStore::open(LegacyFile::new(&path)).unwrap();
        assert_eq!(store.list().len(), 1);
        assert_eq!(store.list()[0].server_addr, "h:1");
    }

    #[test]
    fn test_save_upserts_by_server_address() {
        let dir = TempDir::new().unwrap();
        let mut store = ProfileStore::open(SectionFile::new(dir.path().join("s.toml"))).unwrap();
        store.save(profile("h:1", "old")).unwrap();
        store.save(profile("h:2", "x")).unwrap();
        store.save(profile("h:1", "new")).unwrap();

        assert_eq!(store.list().len(), 2);
        assert_eq!(store.get("h:1").unwrap().key, "new");
    }

    #[test]
    fn test_section_store_round_trip_and_keeps_settings() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("flightdeck.toml");
        std::fs::write(&path, "[default]\nLang = \"zh\"\n").unwrap();

        let mut p = profile("10.0.0.1:443", "se|cr\\et");
        p.domain = "cdn.example.com".into();
        p.auth_user = "alice".into();

        let mut store = ProfileStore::open(SectionFile::new(&path)).unwrap();
        store.save(p.clone()).unwrap();

        let reopened = ProfileStore::open(SectionFile::new(&path)).unwrap();
        assert_eq!(reopened.get("10.0.0.1:443"), Some(&p));

        let doc = StoreFile::new(&path).read().unwrap();
        assert_eq!(doc["default"]["Lang"].as_str(), Some("zh"));
        assert!(doc.contains_key("server-10.0.0.1:443"));
    }

    #[test]
    fn test_delete_removes_from_memory_and_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("flightdeck.toml");
        let mut store = ProfileStore::open(SectionFile::new(&path)).unwrap();
        store.save(profile("h:1", "k")).unwrap();
        store.save(profile("h:2", "k")).unwrap();

        let removed = store.delete("h:1").unwrap();
        assert_eq!(removed.map(|p| p.server_addr), Some("h:1".to_string()));
        assert!(store.delete("h:1").unwrap().is_none());

        let reopened = ProfileStore::open(SectionFile::new(&path)).unwrap();
        let addrs: Vec<&str> = reopened.list().iter().map(|p| p.server_addr.as_str()).collect();
        assert_eq!(addrs, vec!["h:2"]);
    }

    #[test]
    fn test_malformed_section_is_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("flightdeck.toml");
        std::fs::write(
            &path,
            "[\"server-a:1\"]\nKey = \"k\"\nUDP = \"not a port\"\n\n[\"server-b:2\"]\nKey = \"k\"\n",
        )
        .unwrap();
        let store = ProfileStore::open(SectionFile::new(&path)).unwrap();
        assert_eq!(store.list().len(), 1);
        assert_eq!(store.list()[0].server_addr, "b:2");
    }

    #[test]
    fn test_failed_write_leaves_working_set_unchanged() {
        let dir = TempDir::new().unwrap();
        // A directory where the file should be makes every write fail.
        let path = dir.path().join("blocked");
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("child"), b"x").unwrap();

        assert!(ProfileStore::open(LegacyFile::new(&path)).is_err());
        let mut store = ProfileStore {
            backend: Box::new(LegacyFile::new(&path)),
            profiles: Vec::new(),
        };
        assert!(store.save(profile("h:1", "k")).is_err());
        assert!(store.list().is_empty());
    }
}

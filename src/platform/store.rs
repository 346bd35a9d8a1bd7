// FlightDeck - platform/store.rs
//
// The sectioned store file: one TOML document holding the `[default]`
// settings table and one `[server-<address>]` table per profile.
//
// Reads treat a missing file as an empty document (first run). Writes are
// atomic: the document goes to a sibling temp file which is then renamed
// over the previous file, so a crash never leaves a half-written store.

use crate::util::error::StoreError;
use std::path::{Path, PathBuf};

/// Handle on one sectioned store file.
#[derive(Debug, Clone)]
pub struct StoreFile {
    path: PathBuf,
}

impl StoreFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the whole document. A missing file yields an empty table.
    pub fn read(&self) -> Result<toml::Table, StoreError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "No store file yet");
                return Ok(toml::Table::new());
            }
            Err(e) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    operation: "read",
                    source: e,
                })
            }
        };
        content.parse::<toml::Table>().map_err(|e| StoreError::TomlParse {
            path: self.path.clone(),
            source: e,
        })
    }

    /// Replace the whole document atomically.
    pub fn write(&self, table: &toml::Table) -> Result<(), StoreError> {
        let text = toml::to_string_pretty(table).map_err(|e| StoreError::TomlSerialize {
            path: self.path.clone(),
            source: e,
        })?;
        write_atomic(&self.path, text.as_bytes())
    }

    /// Read one table by name. `None` when absent or not a table.
    pub fn section(&self, name: &str) -> Result<Option<toml::Table>, StoreError> {
        let mut doc = self.read()?;
        Ok(match doc.remove(name) {
            Some(toml::Value::Table(t)) => Some(t),
            _ => None,
        })
    }

    /// Replace one table, leaving every other table untouched.
    pub fn put_section(&self, name: &str, section: toml::Table) -> Result<(), StoreError> {
        let mut doc = self.read()?;
        doc.insert(name.to_string(), toml::Value::Table(section));
        self.write(&doc)
    }
}

/// Write `bytes` to `path` through a sibling temp file and a rename.
/// Parent directories are created as needed.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| io_error(path, "create directory for", e))?;
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    std::fs::write(&tmp, bytes).map_err(|e| io_error(path, "write temp file for", e))?;
    std::fs::rename(&tmp, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        io_error(path, "finalise", e)
    })?;

    tracing::debug!(path = %path.display(), bytes = bytes.len(), "Store written");
    Ok(())
}

fn io_error(path: &Path, operation: &'static str, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        operation,
        source,
    }
}

// =============================================================================
// Unit tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_reads_as_empty() {
        let dir = TempDir::new().unwrap();
        let store = StoreFile::new(dir.path().join("absent.toml"));
        assert!(store.read().unwrap().is_empty());
        assert!(store.section("default").unwrap().is_none());
    }

    #[test]
    fn test_put_section_keeps_other_tables() {
        let dir = TempDir::new().unwrap();
        let store = StoreFile::new(dir.path().join("nested/store.toml"));

        let mut a = toml::Table::new();
        a.insert("Lang".into(), toml::Value::String("en".into()));
        store.put_section("default", a).unwrap();

        let mut b = toml::Table::new();
        b.insert("Key".into(), toml::Value::String("k".into()));
        store.put_section("server-h:1", b).unwrap();

        let doc = store.read().unwrap();
        assert_eq!(doc.len(), 2);
        assert_eq!(
            store.section("default").unwrap().unwrap()["Lang"].as_str(),
            Some("en")
        );
        assert!(!dir.path().join("nested/store.toml.tmp").exists());
    }

    #[test]
    fn test_invalid_toml_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[unterminated").unwrap();
        let err = StoreFile::new(&path).read().unwrap_err();
        assert!(matches!(err, StoreError::TomlParse { .. }));
    }

    #[test]
    fn test_write_atomic_replaces_stale_temp_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("server.txt");
        std::fs::write(dir.path().join("server.txt.tmp"), b"garbage").unwrap();
        write_atomic(&path, b"line\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "line\n");
        assert!(!dir.path().join("server.txt.tmp").exists());
    }
}

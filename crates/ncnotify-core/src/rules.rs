//! Per-stream event rule table.
//!
//! Each stream carries a fixed-size `<name>.rules` file mapped shared into
//! every interested process. The region is a newline-delimited list of event
//! names allowed on the stream; membership is exact-match on one line.
//!
//! Reads are lock-free point-in-time scans. Appends must be serialized by the
//! caller (the registry holds its mutex across [`RuleTable::append`]); a
//! concurrent reader may or may not observe an in-flight append, which is
//! acceptable for a best-effort routing allowlist.

use std::fs::{self, OpenOptions};
use std::io;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::Path;

use memmap2::{MmapMut, MmapOptions};

/// Exact size of a rule table region.
pub const RULES_BYTES: usize = 1024 * 1024;

/// Errors from rule table operations.
#[derive(Debug, thiserror::Error)]
pub enum RulesError {
    /// Appending the rule would cross the region boundary.
    #[error("rule table is full")]
    TableFull,

    /// Event names are single newline-free tokens.
    #[error("event name {0:?} is not a valid rule")]
    InvalidName(String),

    /// Creating, growing, or mapping the rules file failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A shared, memory-mapped allowlist of event names for one stream.
pub struct RuleTable {
    map: MmapMut,
}

impl RuleTable {
    /// Opens (creating and sparsely growing if needed) the rules file for
    /// `stream` under `dir` and maps it read+write, shared.
    ///
    /// # Errors
    ///
    /// Returns [`RulesError::Io`] when the file cannot be created, sized, or
    /// mapped.
    pub fn open(dir: &Path, stream: &str) -> Result<Self, RulesError> {
        let path = dir.join(format!("{stream}.rules"));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .mode(0o777)
            .open(&path)?;
        let _ = fs::set_permissions(&path, fs::Permissions::from_mode(0o777));

        if file.metadata()?.len() < RULES_BYTES as u64 {
            file.set_len(RULES_BYTES as u64)?;
        }

        // SAFETY: the mapping length equals the file length set above; the
        // file stays present for the lifetime of the mapping because the
        // mapping itself keeps it referenced.
        let map = unsafe { MmapOptions::new().len(RULES_BYTES).map_mut(&file)? };
        Ok(Self { map })
    }

    /// Returns true when `event` is allowed on this stream.
    #[must_use]
    pub fn contains(&self, event: &str) -> bool {
        let data = &self.map[..self.used()];
        data.split(|&b| b == b'\n')
            .any(|token| token == event.as_bytes())
    }

    /// Appends `event` to the allowlist. A no-op when already present.
    ///
    /// # Errors
    ///
    /// [`RulesError::TableFull`] when the append would cross the region
    /// boundary, [`RulesError::InvalidName`] for empty names or names
    /// containing a newline.
    pub fn append(&mut self, event: &str) -> Result<(), RulesError> {
        if event.is_empty() || event.contains('\n') || event.contains('\0') {
            return Err(RulesError::InvalidName(event.to_string()));
        }
        if self.contains(event) {
            return Ok(());
        }

        let data_end = self.used();
        // Write after the last complete rule, clobbering any torn tail.
        let pos = self.map[..data_end]
            .iter()
            .rposition(|&b| b == b'\n')
            .map_or(0, |i| i + 1);

        let new_end = pos + event.len() + 1;
        if new_end > RULES_BYTES {
            return Err(RulesError::TableFull);
        }

        self.map[pos..pos + event.len()].copy_from_slice(event.as_bytes());
        self.map[pos + event.len()] = b'\n';
        if new_end < data_end {
            self.map[new_end..data_end].fill(0);
        }
        Ok(())
    }

    /// Returns the allowed event names, in insertion order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let data = &self.map[..self.used()];
        data.split(|&b| b == b'\n')
            .filter(|token| !token.is_empty())
            .map(|token| String::from_utf8_lossy(token).into_owned())
            .collect()
    }

    fn used(&self) -> usize {
        self.map
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(RULES_BYTES)
    }
}

impl std::fmt::Debug for RuleTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleTable")
            .field("used", &self.used())
            .field("capacity", &RULES_BYTES)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_creates_fixed_size_file() {
        let dir = tempfile::tempdir().unwrap();
        let _table = RuleTable::open(dir.path(), "s").unwrap();

        let len = fs::metadata(dir.path().join("s.rules")).unwrap().len();
        assert_eq!(len, RULES_BYTES as u64);
    }

    #[test]
    fn test_contains_after_append() {
        let dir = tempfile::tempdir().unwrap();
        let mut table = RuleTable::open(dir.path(), "s").unwrap();

        assert!(!table.contains("netconf-session-start"));
        table.append("netconf-session-start").unwrap();
        assert!(table.contains("netconf-session-start"));
        assert!(!table.contains("netconf-session"));
    }

    #[test]
    fn test_append_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut table = RuleTable::open(dir.path(), "s").unwrap();

        table.append("a-event").unwrap();
        let snapshot: Vec<u8> = table.map.to_vec();
        table.append("a-event").unwrap();
        assert_eq!(&table.map[..], &snapshot[..]);
    }

    #[test]
    fn test_shared_between_mappings() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = RuleTable::open(dir.path(), "s").unwrap();
        let reader = RuleTable::open(dir.path(), "s").unwrap();

        writer.append("cross-process").unwrap();
        assert!(reader.contains("cross-process"));
    }

    #[test]
    fn test_invalid_names_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut table = RuleTable::open(dir.path(), "s").unwrap();

        assert!(matches!(table.append(""), Err(RulesError::InvalidName(_))));
        assert!(matches!(table.append("a\nb"), Err(RulesError::InvalidName(_))));
    }

    #[test]
    fn test_table_full_is_surfaced() {
        let dir = tempfile::tempdir().unwrap();
        let mut table = RuleTable::open(dir.path(), "s").unwrap();

        let filler = "x".repeat(64 * 1024);
        let mut result = Ok(());
        for i in 0..32 {
            result = table.append(&format!("{filler}{i}"));
            if result.is_err() {
                break;
            }
        }
        assert!(matches!(result, Err(RulesError::TableFull)));
    }

    #[test]
    fn test_names_in_insertion_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut table = RuleTable::open(dir.path(), "s").unwrap();

        table.append("first").unwrap();
        table.append("second").unwrap();
        assert_eq!(table.names(), vec!["first", "second"]);
    }
}

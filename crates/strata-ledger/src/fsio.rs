//! JSON persistence helpers
//!
//! Every persisted document is written to a temp file in the destination
//! directory and renamed into place, so readers never observe a partial file.

use crate::error::LedgerError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Write;
use std::path::Path;

/// Write `value` as pretty JSON to `path` atomically
///
/// # Errors
/// Returns error if serialization or any filesystem step fails
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), LedgerError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(|e| LedgerError::io(dir, e))?;

    let json = serde_json::to_vec_pretty(value).map_err(|e| LedgerError::json(path, e))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| LedgerError::io(dir, e))?;
    tmp.write_all(&json).map_err(|e| LedgerError::io(path, e))?;
    tmp.as_file().sync_all().map_err(|e| LedgerError::io(path, e))?;
    tmp.persist(path).map_err(|e| LedgerError::io(path, e.error))?;
    Ok(())
}

/// Read JSON from `path`
///
/// # Errors
/// Returns error if the file is missing or malformed
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, LedgerError> {
    let bytes = std::fs::read(path).map_err(|e| LedgerError::io(path, e))?;
    serde_json::from_slice(&bytes).map_err(|e| LedgerError::json(path, e))
}

/// Read JSON from `path`, or `None` if the file does not exist
///
/// # Errors
/// Returns error if the file exists but cannot be read or parsed
pub fn read_json_opt<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, LedgerError> {
    if !path.exists() {
        return Ok(None);
    }
    read_json(path).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn round_trips_and_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/doc.json");
        let value: BTreeMap<String, u32> = [("x".to_string(), 1)].into();
        write_json_atomic(&path, &value).unwrap();
        let back: BTreeMap<String, u32> = read_json(&path).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let missing: Option<u32> = read_json_opt(&dir.path().join("nope.json")).unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn malformed_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, b"{not json").unwrap();
        let err = read_json::<u32>(&path).unwrap_err();
        assert!(err.to_string().contains("bad.json"));
    }
}

//! Archive Manager
//!
//! Moves a finished (or abandoned) run workspace into the history store. The
//! move is a rename into a staging directory, a manifest write, and a second
//! rename to the final key. Anything left in between is reported as corrupt
//! and never consumed.

use crate::error::{ArchiveError, LedgerError};
use crate::fsio::{read_json, write_json_atomic};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use strata_artifact::ContentHash;
use tracing::{info, warn};

/// Manifest file inside every archive
pub const MANIFEST_FILE: &str = "archive.json";

/// Run Record file whose digest the manifest pins
pub const RUN_RECORD_FILE: &str = "run.json";

const STAGING_PREFIX: &str = ".staging-";

/// What the caller knows about the run being archived
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveInfo {
    /// Run id
    pub run_id: String,
    /// Sequence number
    pub seq: u64,
    /// Codebase reference
    pub reference: String,
    /// Run reached its terminal phase
    pub completed: bool,
    /// Last phase the run reached
    pub phase_reached: String,
}

/// Archive manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveManifest {
    /// History key (`YYYYMMDD-HHMMSS-<ref8>`)
    pub key: String,
    /// Archived run
    #[serde(flatten)]
    pub info: ArchiveInfo,
    /// Archive time
    pub archived_at: DateTime<Utc>,
    /// Blake3 digest of the archived Run Record
    pub run_digest: ContentHash,
}

/// Verified archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Archive directory
    pub path: PathBuf,
    /// Manifest
    pub manifest: ArchiveManifest,
}

impl ArchiveEntry {
    /// History key
    #[inline]
    #[must_use]
    pub fn key(&self) -> &str {
        &self.manifest.key
    }

    /// Path of a file inside the archive
    #[inline]
    #[must_use]
    pub fn file(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.path.join(relative)
    }
}

/// Archive that failed verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorruptArchive {
    /// Directory name
    pub key: String,
    /// Why it is unusable
    pub reason: String,
}

/// Result of scanning the history store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryScan {
    /// Verified archives, oldest first by sequence
    pub valid: Vec<ArchiveEntry>,
    /// Unusable archives
    pub corrupt: Vec<CorruptArchive>,
}

impl HistoryScan {
    /// Most recent verified archive
    #[inline]
    #[must_use]
    pub fn latest(&self) -> Option<&ArchiveEntry> {
        self.valid.last()
    }
}

/// Manages the history store
#[derive(Debug, Clone)]
pub struct ArchiveManager {
    history: PathBuf,
}

impl ArchiveManager {
    /// Manager for the history directory
    #[must_use]
    pub fn new(history: impl Into<PathBuf>) -> Self {
        Self {
            history: history.into(),
        }
    }

    /// History directory
    #[inline]
    #[must_use]
    pub fn history(&self) -> &Path {
        &self.history
    }

    /// Archive key for a run: date, time and a short reference
    #[must_use]
    pub fn key_for(at: DateTime<Utc>, reference: &str) -> String {
        let short: String = reference
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .take(8)
            .collect();
        let short = if short.is_empty() {
            ContentHash::compute(reference.as_bytes()).short()[..8].to_string()
        } else {
            short
        };
        format!("{}-{short}", at.format("%Y%m%d-%H%M%S"))
    }

    /// Move `workspace` into the history store
    ///
    /// # Errors
    /// - `ArchiveError::MissingWorkspace` if `workspace` does not exist
    /// - `ArchiveError::Ledger` if a rename or the manifest write fails
    pub fn archive(&self, workspace: &Path, info: ArchiveInfo) -> Result<ArchiveEntry, ArchiveError> {
        if !workspace.is_dir() {
            return Err(ArchiveError::MissingWorkspace(workspace.to_path_buf()));
        }
        std::fs::create_dir_all(&self.history).map_err(|e| LedgerError::io(&self.history, e))?;

        let archived_at = Utc::now();
        let key = self.unique_key(Self::key_for(archived_at, &info.reference));
        let staging = self.history.join(format!("{STAGING_PREFIX}{key}"));
        let target = self.history.join(&key);

        let run_digest = digest_run_record(workspace)?;
        std::fs::rename(workspace, &staging).map_err(|e| LedgerError::io(workspace, e))?;

        let manifest = ArchiveManifest {
            key: key.clone(),
            info,
            archived_at,
            run_digest,
        };
        write_json_atomic(&staging.join(MANIFEST_FILE), &manifest)?;
        std::fs::rename(&staging, &target).map_err(|e| LedgerError::io(&staging, e))?;

        info!(
            key = %key,
            run = %manifest.info.run_id,
            seq = manifest.info.seq,
            completed = manifest.info.completed,
            "workspace archived"
        );
        Ok(ArchiveEntry {
            path: target,
            manifest,
        })
    }

    /// Open and verify one archive
    ///
    /// # Errors
    /// - `ArchiveError::NotFound` if no such archive exists
    /// - `ArchiveError::Corrupt` if the manifest is missing or the digest differs
    pub fn open(&self, key: &str) -> Result<ArchiveEntry, ArchiveError> {
        let path = self.history.join(key);
        if !path.is_dir() {
            return Err(ArchiveError::NotFound(key.to_string()));
        }
        let corrupt = |reason: String| ArchiveError::Corrupt {
            key: key.to_string(),
            reason,
        };
        if key.starts_with(STAGING_PREFIX) {
            return Err(corrupt("interrupted archive move".to_string()));
        }
        let manifest_path = path.join(MANIFEST_FILE);
        if !manifest_path.exists() {
            return Err(corrupt("missing manifest".to_string()));
        }
        let manifest: ArchiveManifest = read_json(&manifest_path).map_err(|e| corrupt(e.to_string()))?;
        if manifest.key != key {
            return Err(corrupt(format!("manifest names {}", manifest.key)));
        }
        let digest = digest_run_record(&path).map_err(|e| corrupt(e.to_string()))?;
        if digest != manifest.run_digest {
            return Err(corrupt("run record digest mismatch".to_string()));
        }
        Ok(ArchiveEntry { path, manifest })
    }

    /// Scan the history store, verifying every archive
    ///
    /// # Errors
    /// Returns error only if the history directory exists but cannot be listed
    pub fn scan(&self) -> Result<HistoryScan, ArchiveError> {
        let mut scan = HistoryScan::default();
        if !self.history.is_dir() {
            return Ok(scan);
        }
        let entries = std::fs::read_dir(&self.history).map_err(|e| LedgerError::io(&self.history, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| LedgerError::io(&self.history, e))?;
            if !entry.path().is_dir() {
                continue;
            }
            let key = entry.file_name().to_string_lossy().into_owned();
            match self.open(&key) {
                Ok(archive) => scan.valid.push(archive),
                Err(ArchiveError::Corrupt { key, reason }) => {
                    warn!(key = %key, reason = %reason, "corrupt archive ignored");
                    scan.corrupt.push(CorruptArchive { key, reason });
                }
                Err(e) => return Err(e),
            }
        }
        scan.valid
            .sort_by(|a, b| (a.manifest.info.seq, &a.manifest.key).cmp(&(b.manifest.info.seq, &b.manifest.key)));
        scan.corrupt.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(scan)
    }

    fn unique_key(&self, base: String) -> String {
        let taken = |k: &str| {
            self.history.join(k).exists() || self.history.join(format!("{STAGING_PREFIX}{k}")).exists()
        };
        if !taken(&base) {
            return base;
        }
        (1u32..)
            .map(|n| format!("{base}-{n}"))
            .find(|k| !taken(k))
            .unwrap_or(base)
    }
}

fn digest_run_record(dir: &Path) -> Result<ContentHash, LedgerError> {
    let path = dir.join(RUN_RECORD_FILE);
    let bytes = std::fs::read(&path).map_err(|e| LedgerError::io(&path, e))?;
    Ok(ContentHash::compute(&bytes))
}

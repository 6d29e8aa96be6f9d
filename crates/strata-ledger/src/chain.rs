//! Append-only, hash-chained records
//!
//! A [`Chain`] is a versioned ledger keyed by run sequence number. Records are
//! never edited in place; readers reconstruct the current view by folding
//! the chain. Each record commits to its predecessor with a SHA-256 link, so
//! tampering or truncation in the middle is detected by
//! [`Chain::verify_integrity`].

use crate::error::LedgerError;
use crate::fsio::{read_json_opt, write_json_atomic};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

const GENESIS: [u8; 32] = [0u8; 32];

/// One chained record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainRecord<T> {
    /// Run sequence number the record belongs to
    pub seq: u64,
    /// Position in the chain
    pub index: u64,
    /// Append time
    pub recorded_at: DateTime<Utc>,
    /// Payload
    pub body: T,
    /// Hash of the previous record (zeros for the first)
    #[serde(with = "hex32")]
    pub prev_hash: [u8; 32],
    /// Hash of this record
    #[serde(with = "hex32")]
    pub hash: [u8; 32],
}

/// Append-only hash chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Chain<T> {
    records: Vec<ChainRecord<T>>,
}

impl<T> Default for Chain<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
        }
    }
}

impl<T> Chain<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Create empty chain
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record for run `seq`
    ///
    /// # Errors
    /// - `LedgerError::OutOfOrder` if `seq` is lower than the head's
    /// - `LedgerError::Encode` if the body cannot be serialized
    pub fn append(&mut self, seq: u64, body: T) -> Result<&ChainRecord<T>, LedgerError> {
        if let Some(last) = self.records.last() {
            if seq < last.seq {
                return Err(LedgerError::OutOfOrder { last: last.seq, got: seq });
            }
        }
        let prev_hash = self.records.last().map_or(GENESIS, |r| r.hash);
        let mut record = ChainRecord {
            seq,
            index: self.records.len() as u64,
            recorded_at: Utc::now(),
            body,
            prev_hash,
            hash: GENESIS,
        };
        record.hash = compute_hash(&record)?;
        self.records.push(record);
        Ok(&self.records[self.records.len() - 1])
    }

    /// Verify every link and record hash
    ///
    /// # Errors
    /// Returns `LedgerError::IntegrityViolation` naming the first bad record
    pub fn verify_integrity(&self) -> Result<(), LedgerError> {
        let mut prev = GENESIS;
        for (i, record) in self.records.iter().enumerate() {
            if record.prev_hash != prev || record.index != i as u64 {
                return Err(LedgerError::IntegrityViolation { index: i });
            }
            if record.hash != compute_hash(record)? {
                return Err(LedgerError::IntegrityViolation { index: i });
            }
            prev = record.hash;
        }
        Ok(())
    }

    /// All records, oldest first
    #[inline]
    #[must_use]
    pub fn records(&self) -> &[ChainRecord<T>] {
        &self.records
    }

    /// Most recent record
    #[inline]
    #[must_use]
    pub fn head(&self) -> Option<&ChainRecord<T>> {
        self.records.last()
    }

    /// Number of records
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True if the chain has no records
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Fold every record body into a view
    pub fn fold<A, F>(&self, init: A, mut f: F) -> A
    where
        F: FnMut(A, &ChainRecord<T>) -> A,
    {
        self.records.iter().fold(init, |acc, r| f(acc, r))
    }

    /// Load a chain, verifying integrity; a missing file is an empty chain
    ///
    /// # Errors
    /// Returns error if the file is unreadable or the chain does not verify
    pub fn load(path: &Path) -> Result<Self, LedgerError> {
        let chain: Self = read_json_opt(path)?.unwrap_or_default();
        chain.verify_integrity()?;
        Ok(chain)
    }

    /// Persist the chain atomically
    ///
    /// # Errors
    /// Returns error if the write fails
    pub fn save(&self, path: &Path) -> Result<(), LedgerError> {
        write_json_atomic(path, self)
    }
}

fn compute_hash<T: Serialize>(record: &ChainRecord<T>) -> Result<[u8; 32], LedgerError> {
    let body = serde_json::to_vec(&record.body).map_err(LedgerError::Encode)?;
    let mut hasher = Sha256::new();
    hasher.update(record.seq.to_le_bytes());
    hasher.update(record.index.to_le_bytes());
    hasher.update(record.recorded_at.timestamp_micros().to_le_bytes());
    hasher.update((body.len() as u64).to_le_bytes());
    hasher.update(&body);
    hasher.update(record.prev_hash);
    Ok(hasher.finalize().into())
}

mod hex32 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected 32 bytes"))
    }
}

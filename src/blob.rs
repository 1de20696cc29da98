//! A single on-disk unit of work: a batch of envelopes plus a lease.
//!
//! The lease is embedded in the filename and acquired via same-directory
//! atomic rename, the same commit idiom the `claim_coordinator` lease store
//! uses (`write_index_atomic`: write to a temp file, fsync, rename into
//! place) and the same "rename failure means I lost the race, not an error"
//! rule its concurrency test (`test_concurrent_claim_attempts_serialize`)
//! exercises.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

use crate::envelope::Envelope;
use crate::error::BlobError;

const TMP_SUFFIX: &str = "tmp";
const COMMITTED_SUFFIX: &str = "cn";

/// A batch of envelopes persisted as one file in a [`crate::storage::Storage`]
/// directory.
#[derive(Debug, Clone)]
pub struct Blob {
    path: PathBuf,
}

impl Blob {
    /// Wrap an existing path. Does not touch the filesystem.
    pub(crate) fn from_path(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create a new committed (unleased) Blob containing `items` in `dir`.
    /// Writes to a temporary file first and atomically renames it into
    /// place so readers never observe a partially written payload.
    pub fn put(dir: &Path, items: &[Envelope]) -> Result<Blob, BlobError> {
        let payload = serde_json::to_vec(items).map_err(|_| BlobError::Decode {
            path: dir.to_path_buf(),
        })?;
        let created_nanos = now_nanos();

        loop {
            let unique = Uuid::new_v4().simple().to_string();
            let tmp_path = dir.join(format!("{created_nanos:020}-{unique}.{TMP_SUFFIX}"));
            let committed_path = dir.join(format!("{created_nanos:020}-{unique}.{COMMITTED_SUFFIX}"));

            if committed_path.exists() {
                // Vanishingly unlikely uuid collision; pick a fresh suffix.
                continue;
            }

            write_atomic(&tmp_path, &committed_path, &payload)?;
            return Ok(Blob::from_path(committed_path));
        }
    }

    /// Attempt to extend this Blob's lease to `now + seconds`. Returns
    /// `true` iff the rename succeeded, meaning no other reader holds or
    /// raced for the Blob.
    pub fn lease(&mut self, seconds: u64) -> bool {
        let dir = match self.path.parent() {
            Some(dir) => dir,
            None => return false,
        };
        let stem = match stem_without_state(&self.path) {
            Some(s) => s,
            None => return false,
        };
        let expiry = now_unix_secs() + seconds;
        let new_path = dir.join(format!("{stem}.{expiry}"));

        match fs::rename(&self.path, &new_path) {
            Ok(()) => {
                self.path = new_path;
                true
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => false,
            Err(_) => false,
        }
    }

    /// Release this Blob's lease by renaming it back to the committed,
    /// unleased state, preserving its original creation ordering.
    pub fn release(&mut self) -> bool {
        let dir = match self.path.parent() {
            Some(dir) => dir,
            None => return false,
        };
        let stem = match stem_without_state(&self.path) {
            Some(s) => s,
            None => return false,
        };
        let new_path = dir.join(format!("{stem}.{COMMITTED_SUFFIX}"));

        match fs::rename(&self.path, &new_path) {
            Ok(()) => {
                self.path = new_path;
                true
            }
            Err(_) => false,
        }
    }

    /// Read and decode the payload. Returns `None` on any I/O or decode
    /// error; callers treat an unreadable Blob as empty rather than fatal.
    pub fn get(&self) -> Option<Vec<Envelope>> {
        let bytes = fs::read(&self.path).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    /// Remove the underlying file. Idempotent: a missing file is not an
    /// error, since another reader may have already deleted it.
    pub fn delete(&self) -> Result<(), BlobError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(BlobError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// File size in bytes, used by maintenance to enforce the storage cap.
    pub fn size_bytes(&self) -> u64 {
        fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
    }

    /// Creation instant encoded in the filename, used for retention and
    /// FIFO ordering.
    pub fn created_at(&self) -> Option<SystemTime> {
        let name = self.path.file_name()?.to_str()?;
        let nanos: u64 = name.split('-').next()?.parse().ok()?;
        Some(UNIX_EPOCH + std::time::Duration::from_nanos(nanos))
    }

    /// `true` if this file is a committed Blob (leased or not); `false` for
    /// temp write-in-progress files, which readers must ignore.
    pub(crate) fn is_committed(path: &Path) -> bool {
        match path.extension().and_then(|e| e.to_str()) {
            Some(TMP_SUFFIX) => false,
            Some(_) => true,
            None => false,
        }
    }

    /// Lease expiry embedded in the filename, if this Blob is currently
    /// leased. `None` for an unleased committed Blob.
    pub(crate) fn lease_expiry(path: &Path) -> Option<u64> {
        match path.extension().and_then(|e| e.to_str()) {
            Some(TMP_SUFFIX) | Some(COMMITTED_SUFFIX) | None => None,
            Some(digits) => digits.parse().ok(),
        }
    }
}

fn stem_without_state(path: &Path) -> Option<String> {
    let file_name = path.file_name()?.to_str()?;
    let (stem, _state) = file_name.rsplit_once('.')?;
    Some(stem.to_string())
}

fn write_atomic(tmp_path: &Path, committed_path: &Path, payload: &[u8]) -> Result<(), BlobError> {
    fs::write(tmp_path, payload).map_err(|source| BlobError::Io {
        path: tmp_path.to_path_buf(),
        source,
    })?;
    {
        let file = File::open(tmp_path).map_err(|source| BlobError::Io {
            path: tmp_path.to_path_buf(),
            source,
        })?;
        file.sync_all().map_err(|source| BlobError::Io {
            path: tmp_path.to_path_buf(),
            source,
        })?;
    }
    fs::rename(tmp_path, committed_path).map_err(|source| BlobError::Io {
        path: committed_path.to_path_buf(),
        source,
    })
}

fn now_nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
}

fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

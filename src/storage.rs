//! Directory-backed queue of [`Blob`]s: enqueue, lease-scan, and a
//! background maintenance sweep.
//!
//! The sweep's shape -- a `tokio::spawn`ed loop with a `tokio::select!`
//! against a cancellation signal -- follows the teacher's `message_loop`
//! in `collector.rs`; the retention/TTL bookkeeping follows
//! `known_blobs_cache.rs`'s expiry handling, swapped from an in-memory LRU
//! onto the filesystem itself.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use log::{debug, warn};
use tokio_util::sync::CancellationToken;

use crate::blob::Blob;
use crate::envelope::Envelope;

const DEFAULT_LEASE_SECONDS: u64 = 60;

/// A directory of [`Blob`]s with size and retention limits.
pub struct Storage {
    dir: PathBuf,
    max_size: u64,
    retention: Duration,
}

impl Storage {
    /// Open (creating if necessary) a Storage rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>, max_size: u64, retention: Duration) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir, max_size, retention })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Persist `items` as a new Blob, running maintenance first so the size
    /// cap is enforced before the new write lands. Returns `None` (and
    /// drops `items`) if the cap is still exceeded after maintenance.
    pub fn put(&self, items: &[Envelope], lease_seconds: u64) -> Option<Blob> {
        self.run_maintenance();

        if self.total_size() >= self.max_size {
            warn!(
                "storage at {:?} is at capacity ({} bytes); dropping {} envelope(s)",
                self.dir,
                self.max_size,
                items.len()
            );
            return None;
        }

        let mut blob = Blob::put(&self.dir, items).ok()?;
        if lease_seconds > 0 {
            blob.lease(lease_seconds);
        }
        Some(blob)
    }

    /// Scan the directory in lexical (FIFO) order for the first committed
    /// Blob whose lease is absent or expired, and lease it.
    pub fn get(&self) -> Option<Blob> {
        for path in self.sorted_committed_entries() {
            if let Some(blob) = self.try_lease(path) {
                return Some(blob);
            }
        }
        None
    }

    /// Iterator over successfully leased Blobs, walking a single sorted
    /// snapshot of the directory taken at construction time.
    pub fn gets(&self) -> StorageIter<'_> {
        StorageIter {
            storage: self,
            entries: self.sorted_committed_entries().into_iter(),
        }
    }

    fn try_lease(&self, path: PathBuf) -> Option<Blob> {
        let expiry = Blob::lease_expiry(&path);
        let now = now_unix_secs();
        if let Some(expiry) = expiry {
            if expiry > now {
                return None; // currently leased by someone else
            }
        }
        let mut blob = Blob::from_path(path);
        if blob.lease(DEFAULT_LEASE_SECONDS) {
            Some(blob)
        } else {
            None
        }
    }

    fn sorted_committed_entries(&self) -> Vec<PathBuf> {
        let mut entries: Vec<PathBuf> = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| Blob::is_committed(p))
                .collect(),
            Err(err) => {
                warn!("could not read storage directory {:?}: {err}", self.dir);
                Vec::new()
            }
        };
        entries.sort();
        entries
    }

    fn total_size(&self) -> u64 {
        self.sorted_committed_entries()
            .iter()
            .filter_map(|p| std::fs::metadata(p).ok())
            .map(|m| m.len())
            .sum()
    }

    /// Evict retention-expired Blobs, then oldest-first while over the size
    /// cap. Never touches a currently-leased Blob.
    pub fn run_maintenance(&self) {
        let now = SystemTime::now();
        let mut remaining: Vec<(PathBuf, u64)> = Vec::new();

        for path in self.sorted_committed_entries() {
            if Blob::lease_expiry(&path).map(|e| e > now_unix_secs()).unwrap_or(false) {
                // currently leased; never evicted by maintenance
                if let Ok(meta) = std::fs::metadata(&path) {
                    remaining.push((path, meta.len()));
                }
                continue;
            }

            let blob = Blob::from_path(path.clone());
            let expired_by_retention = blob
                .created_at()
                .and_then(|created| now.duration_since(created).ok())
                .map(|age| age > self.retention)
                .unwrap_or(false);

            if expired_by_retention {
                debug!("evicting {:?}: past retention period", path);
                let _ = blob.delete();
                continue;
            }

            if let Ok(meta) = std::fs::metadata(&path) {
                remaining.push((path, meta.len()));
            }
        }

        let mut total: u64 = remaining.iter().map(|(_, size)| size).sum();
        // `sorted_committed_entries` is already oldest-first; evict from
        // the front until back under the cap.
        for (path, size) in remaining {
            if total <= self.max_size {
                break;
            }
            let blob = Blob::from_path(path.clone());
            debug!("evicting {:?}: storage over capacity", path);
            if blob.delete().is_ok() {
                total = total.saturating_sub(size);
            }
        }
    }

    /// Spawn a background task that runs maintenance on a timer until
    /// `token` is cancelled.
    pub fn spawn_maintenance_task(self: std::sync::Arc<Self>, period: Duration, token: CancellationToken) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("storage maintenance task stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.run_maintenance();
                    }
                }
            }
        });
    }
}

/// Lazy iterator over leased Blobs from a single directory snapshot.
pub struct StorageIter<'a> {
    storage: &'a Storage,
    entries: std::vec::IntoIter<PathBuf>,
}

impl<'a> Iterator for StorageIter<'a> {
    type Item = Blob;

    fn next(&mut self) -> Option<Blob> {
        for path in self.entries.by_ref() {
            if let Some(blob) = self.storage.try_lease(path) {
                return Some(blob);
            }
        }
        None
    }
}

fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

//! Composes [`Storage`], [`Transmitter`], and the [`ProcessorChain`] into
//! the durable export pipeline.
//!
//! The drain loop's retry/backoff shape is grounded on the teacher's
//! `message_loop` in `collector.rs`: keep going while things succeed, stop
//! promptly on a retryable failure instead of hammering a down endpoint.

use std::sync::Arc;

use log::{debug, warn};
use tokio_util::sync::CancellationToken;

use crate::envelope::Envelope;
use crate::options::Options;
use crate::processor::ProcessorChain;
use crate::storage::Storage;
use crate::transmitter::{TransmitOutcome, Transmitter};

/// This crate's own tri-state export result, richer than the binary
/// `Result<(), _>` the upstream `SpanExporter` trait expects -- see
/// `SPEC_FULL.md` §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportResult {
    Success,
    FailedRetryable,
    FailedNotRetryable,
}

/// Durable-spool exporter: buffers envelopes to disk and drains them to an
/// ingestion endpoint, handling retries and backpressure.
pub struct Exporter {
    storage: Arc<Storage>,
    transmitter: Transmitter,
    processors: ProcessorChain,
    maintenance_token: CancellationToken,
    instrumentation_key: String,
}

impl Exporter {
    pub fn new(options: Options) -> std::io::Result<Self> {
        let storage = Arc::new(Storage::open(
            options.storage_path.clone(),
            options.storage_max_size,
            options.storage_retention_period,
        )?);
        let transmitter = Transmitter::new(options.endpoint.clone(), options.timeout, &options.proxies)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err))?;

        let maintenance_token = CancellationToken::new();
        storage
            .clone()
            .spawn_maintenance_task(options.storage_maintenance_period, maintenance_token.clone());

        Ok(Self {
            storage,
            transmitter,
            processors: ProcessorChain::new(),
            maintenance_token,
            instrumentation_key: options.instrumentation_key,
        })
    }

    pub fn instrumentation_key(&self) -> &str {
        &self.instrumentation_key
    }

    pub fn processors_mut(&mut self) -> &mut ProcessorChain {
        &mut self.processors
    }

    /// Apply the processor chain and persist the surviving envelopes to
    /// storage. Persisting durably, not delivering over the network, is
    /// what "export succeeded" means here -- actual delivery happens later
    /// from the drain loop.
    pub fn export(&self, envelopes: Vec<Envelope>) -> ExportResult {
        let envelopes = self.processors.apply(envelopes);
        if envelopes.is_empty() {
            return ExportResult::Success;
        }
        match self.storage.put(&envelopes, 0) {
            Some(_blob) => ExportResult::Success,
            None => ExportResult::FailedRetryable,
        }
    }

    /// Drain storage, transmitting each leased Blob per `SPEC_FULL.md`
    /// §4.4. Stops early on a whole-batch retryable failure so a down
    /// endpoint does not get hammered in a tight loop.
    pub async fn transmit_from_storage(&self) {
        for mut blob in self.storage.gets() {
            let envelopes = match blob.get() {
                Some(envelopes) => envelopes,
                None => {
                    warn!("could not decode blob {:?}; discarding", blob.path());
                    let _ = blob.delete();
                    continue;
                }
            };

            match self.transmitter.transmit(&envelopes).await {
                TransmitOutcome::Success => {
                    let _ = blob.delete();
                }
                TransmitOutcome::FailedNotRetryable => {
                    let _ = blob.delete();
                }
                TransmitOutcome::FailedRetryableAll => {
                    blob.release();
                    debug!("retryable failure; stopping drain to back off from {:?}", blob.path());
                    break;
                }
                TransmitOutcome::PartialRetry(indices) => {
                    let _ = blob.delete();
                    let retryable: Vec<Envelope> = indices
                        .into_iter()
                        .filter_map(|i| envelopes.get(i).cloned())
                        .collect();
                    if !retryable.is_empty() {
                        self.storage.put(&retryable, 0);
                    }
                }
            }
        }
    }

    /// Stop the background maintenance task. Safe to call more than once.
    pub fn shutdown(&self) {
        self.maintenance_token.cancel();
    }
}

impl Drop for Exporter {
    fn drop(&mut self) {
        self.maintenance_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{BaseData, Data};
    use crate::processor::ProcessorOutcome;

    fn sample(name: &str) -> Envelope {
        Envelope::new(
            "key",
            "time",
            "Microsoft.ApplicationInsights.Request",
            Data {
                base_type: "RequestData".into(),
                base_data: BaseData {
                    ver: 2,
                    id: "id".into(),
                    name: name.into(),
                    duration: "0.00:00:00.000".into(),
                    ..Default::default()
                },
            },
        )
    }

    fn test_options(dir: &std::path::Path) -> Options {
        Options::builder()
            .instrumentation_key("1bbd944a-73a0-5d89-eab5-d3740a213ee7")
            .storage_path(dir.to_path_buf())
            .storage_max_size(1024 * 1024)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn export_persists_envelopes_to_storage() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = Exporter::new(test_options(dir.path())).unwrap();

        let result = exporter.export(vec![sample("a")]);
        assert_eq!(result, ExportResult::Success);
        assert!(exporter.storage.get().is_some());
        exporter.shutdown();
    }

    #[tokio::test]
    async fn export_drops_envelopes_killed_by_a_processor() {
        let dir = tempfile::tempdir().unwrap();
        let mut exporter = Exporter::new(test_options(dir.path())).unwrap();
        exporter
            .processors_mut()
            .add(Box::new(|_: &mut Envelope| ProcessorOutcome::Drop));

        let result = exporter.export(vec![sample("a")]);
        assert_eq!(result, ExportResult::Success);
        assert!(exporter.storage.get().is_none());
        exporter.shutdown();
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = Exporter::new(test_options(dir.path())).unwrap();
        exporter.shutdown();
        exporter.shutdown();
    }
}

//! Durable-spool Application Insights exporter for OpenTelemetry traces.
//!
//! Spans are translated to Application Insights envelopes, passed through a
//! user-configurable processor chain, and persisted to an on-disk spool
//! before being drained to the ingestion endpoint. The spool survives
//! process restarts and backs off when the endpoint is unavailable instead
//! of dropping telemetry.

pub mod blob;
pub mod envelope;
pub mod error;
pub mod exporter;
pub mod options;
pub mod processor;
pub mod span_exporter;
pub mod storage;
pub mod time;
pub mod transmitter;

pub use envelope::{BaseData, Data, Envelope};
pub use error::{BlobError, ConfigError, TransmitError};
pub use exporter::{ExportResult, Exporter};
pub use options::{Options, OptionsBuilder};
pub use processor::{Processor, ProcessorChain, ProcessorOutcome};
pub use span_exporter::AzureMonitorSpanExporter;
pub use storage::Storage;
pub use transmitter::{TransmitOutcome, Transmitter};

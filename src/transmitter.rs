//! HTTP transmission and response classification.
//!
//! The status table and partial-success body shape follow the scenarios
//! exercised in the upstream exporter's `test_base_exporter.py`
//! (`_transmit_from_storage` against 200/206/400/500/transport-exception
//! responses); see `SPEC_FULL.md` §4.3 and §8 S1-S5.

use std::collections::HashMap;
use std::time::Duration;

use log::warn;
use serde_derive::Deserialize;

use crate::envelope::Envelope;

const RETRYABLE_STATUSES: [u16; 4] = [408, 429, 500, 503];

/// Outcome of one transmission attempt.
#[derive(Debug, PartialEq)]
pub enum TransmitOutcome {
    /// Everything was accepted; the Blob should be deleted.
    Success,
    /// The whole batch should be retried later; the Blob is kept.
    FailedRetryableAll,
    /// The whole batch must not be retried; the Blob should be deleted.
    FailedNotRetryable,
    /// Only the envelopes at these indices should be retried; everything
    /// else in the batch is dropped.
    PartialRetry(Vec<usize>),
}

#[derive(Debug, Deserialize)]
struct TrackResponseBody {
    #[serde(rename = "itemsReceived")]
    items_received: i64,
    #[serde(rename = "itemsAccepted")]
    items_accepted: i64,
    #[serde(default)]
    errors: Vec<TrackResponseError>,
}

#[derive(Debug, Deserialize)]
struct TrackResponseError {
    index: usize,
    #[serde(rename = "statusCode")]
    status_code: u16,
    #[serde(default)]
    message: Option<String>,
}

/// Sends envelope batches to an Application Insights-compatible ingestion
/// endpoint.
pub struct Transmitter {
    client: reqwest::Client,
    endpoint: String,
}

impl Transmitter {
    pub fn new(endpoint: impl Into<String>, timeout: Duration, proxies: &HashMap<String, String>) -> reqwest::Result<Self> {
        let mut builder = reqwest::Client::builder().timeout(timeout);
        for (scheme, url) in proxies {
            if let Ok(proxy) = reqwest::Proxy::all(url) {
                let proxy = match scheme.as_str() {
                    "http" => reqwest::Proxy::http(url).unwrap_or(proxy),
                    "https" => reqwest::Proxy::https(url).unwrap_or(proxy),
                    _ => proxy,
                };
                builder = builder.proxy(proxy);
            }
        }
        let client = builder.build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    /// Send `envelopes` and classify the outcome. A transport-level failure
    /// (no HTTP response at all) is always whole-batch retryable.
    pub async fn transmit(&self, envelopes: &[Envelope]) -> TransmitOutcome {
        let response = match self
            .client
            .post(&self.endpoint)
            .json(envelopes)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                warn!("transport error sending {} envelope(s): {err}", envelopes.len());
                return TransmitOutcome::FailedRetryableAll;
            }
        };

        let status = response.status().as_u16();
        let body = response.bytes().await.ok();
        classify_response(status, body.as_deref(), envelopes.len())
    }
}

/// Pure status/body classification, split out from [`Transmitter::transmit`]
/// so the full status table (§4.3) can be exercised without a real or
/// mocked HTTP server.
fn classify_response(status: u16, body: Option<&[u8]>, batch_len: usize) -> TransmitOutcome {
    match status {
        200 => TransmitOutcome::Success,
        206 => classify_partial_success(body, batch_len),
        400 | 404 | 415 => {
            warn!("ingestion endpoint rejected batch with status {status}");
            TransmitOutcome::FailedNotRetryable
        }
        401 | 403 => {
            warn!("ingestion endpoint rejected batch with credential error {status}");
            TransmitOutcome::FailedNotRetryable
        }
        s if RETRYABLE_STATUSES.contains(&s) => {
            warn!("ingestion endpoint returned retryable status {s}");
            TransmitOutcome::FailedRetryableAll
        }
        other => {
            warn!("ingestion endpoint returned unexpected status {other}; treating as non-retryable");
            TransmitOutcome::FailedNotRetryable
        }
    }
}

fn classify_partial_success(body: Option<&[u8]>, batch_len: usize) -> TransmitOutcome {
    let body: TrackResponseBody = match body.and_then(|b| serde_json::from_slice(b).ok()) {
        Some(body) => body,
        // Advisory body only; treat a missing or undecodable 206 body as accepted.
        None => return TransmitOutcome::Success,
    };

    if body.items_received == body.items_accepted {
        return TransmitOutcome::Success;
    }

    for error in &body.errors {
        if let Some(message) = &error.message {
            warn!("item {} rejected with status {}: {}", error.index, error.status_code, message);
        }
    }

    let retryable_indices: Vec<usize> = body
        .errors
        .iter()
        .filter(|e| e.index < batch_len && RETRYABLE_STATUSES.contains(&e.status_code))
        .map(|e| e.index)
        .collect();

    if retryable_indices.is_empty() {
        TransmitOutcome::Success
    } else {
        TransmitOutcome::PartialRetry(retryable_indices)
    }
}

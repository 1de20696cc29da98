//! Translates `opentelemetry_sdk` spans into Application Insights
//! envelopes and adapts this crate's own [`ExportResult`] onto the
//! upstream `SpanExporter` trait's binary result.
//!
//! Field derivation rules are grounded on the upstream exporter's
//! `test_trace.py` fixtures (`SPEC_FULL.md` §4.6, §8 S6-S8): HTTP
//! attributes drive name/target/type/result_code, non-`http.`-prefixed
//! attributes become properties, links become `_MS.links`.

use std::collections::BTreeMap;
use std::time::SystemTime;

use async_trait::async_trait;
use opentelemetry::trace::{SpanId, SpanKind, Status, TraceError, TraceId};
use opentelemetry::{KeyValue, Value};
use opentelemetry_sdk::trace::{SpanData, SpanExporter as OTelSpanExporter};

use crate::envelope::{BaseData, Data, Envelope, REMOTE_DEPENDENCY_BASE_TYPE, REQUEST_BASE_TYPE};
use crate::exporter::{ExportResult, Exporter};
use crate::time::{format_duration_nanos, format_timestamp_micros};

/// The upstream `SpanExporter` trait's binary result type.
type OTelExportResult = Result<(), TraceError>;

const REQUEST_NAME: &str = "Microsoft.ApplicationInsights.Request";
const REMOTE_DEPENDENCY_NAME: &str = "Microsoft.ApplicationInsights.RemoteDependency";

/// Adapts [`Exporter`] to `opentelemetry_sdk`'s `SpanExporter` trait,
/// translating spans to envelopes before handing them to the durable
/// pipeline.
pub struct AzureMonitorSpanExporter {
    exporter: Exporter,
}

impl std::fmt::Debug for AzureMonitorSpanExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureMonitorSpanExporter").finish()
    }
}

impl AzureMonitorSpanExporter {
    pub fn new(exporter: Exporter) -> Self {
        Self { exporter }
    }
}

#[async_trait]
impl OTelSpanExporter for AzureMonitorSpanExporter {
    async fn export(&mut self, batch: Vec<SpanData>) -> OTelExportResult {
        let ikey = self.exporter.instrumentation_key().to_string();
        let mut envelopes = Vec::with_capacity(batch.len());
        for span in batch {
            match span_to_envelope(&span) {
                Ok(mut envelope) => {
                    envelope.ikey = ikey.clone();
                    envelopes.push(envelope);
                }
                Err(err) => {
                    log::error!("failed to translate span '{}': {err}", span.name);
                }
            }
        }

        match self.exporter.export(envelopes) {
            ExportResult::Success => Ok(()),
            ExportResult::FailedRetryable | ExportResult::FailedNotRetryable => {
                Err(TraceError::ExportFailed(Box::new(TranslationExportError)))
            }
        }
    }

    fn shutdown(&mut self) {
        self.exporter.shutdown();
    }
}

#[derive(Debug)]
struct TranslationExportError;

impl std::fmt::Display for TranslationExportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "failed to persist span batch to durable storage")
    }
}

impl std::error::Error for TranslationExportError {}

impl opentelemetry::trace::ExportError for TranslationExportError {
    fn exporter_name(&self) -> &'static str {
        "azure_monitor_exporter"
    }
}

/// Translate one span into one envelope.
pub fn span_to_envelope(span: &SpanData) -> Result<Envelope, String> {
    let trace_id = span.span_context.trace_id();
    let span_id = span.span_context.span_id();

    let start_nanos = system_time_to_unix_nanos(span.start_time);
    let end_nanos = system_time_to_unix_nanos(span.end_time);
    let time = format_timestamp_micros(start_nanos);
    let duration = format_duration_nanos(end_nanos - start_nanos);

    let attrs: BTreeMap<&str, &Value> = span
        .attributes
        .iter()
        .map(|kv| (kv.key.as_str(), &kv.value))
        .collect();

    let properties = non_http_properties(&span.attributes);
    let links_json = links_to_json(span);

    let (name, base_type, mut base_data) = match span.span_kind {
        SpanKind::Server => server_base_data(span, &attrs, &span_id, &duration),
        SpanKind::Client | SpanKind::Producer | SpanKind::Consumer => {
            client_base_data(span, &attrs, &span_id, &duration)
        }
        SpanKind::Internal => internal_base_data(span, &span_id, &duration),
    };

    // `server_base_data`/`client_base_data` may already have populated
    // properties (e.g. `request.name`/`request.url`); merge the non-HTTP
    // attributes in rather than clobbering those.
    base_data.properties.extend(properties);
    if let Some(links_json) = links_json {
        base_data.properties.insert("_MS.links".to_string(), links_json);
    }

    let mut envelope = Envelope::new(
        String::new(), // ikey is filled in by the caller (Exporter holds the configured key)
        time,
        name,
        Data {
            base_type: base_type.to_string(),
            base_data,
        },
    );

    envelope
        .tags
        .insert("ai.operation.id".to_string(), format_trace_id(trace_id));

    let parent_span_id = span.parent_span_id;
    if parent_span_id != SpanId::INVALID {
        envelope
            .tags
            .insert("ai.operation.parentId".to_string(), format_span_id(parent_span_id));
    }

    // SERVER spans with a route mirror the derived request name into
    // `ai.operation.name` (SPEC_FULL.md §4.6).
    if span.span_kind == SpanKind::Server && attrs.contains_key("http.route") {
        envelope
            .tags
            .insert("ai.operation.name".to_string(), envelope.data.base_data.name.clone());
    }

    Ok(envelope)
}

fn server_base_data(
    span: &SpanData,
    attrs: &BTreeMap<&str, &Value>,
    span_id: &SpanId,
    duration: &str,
) -> (String, &'static str, BaseData) {
    let method = attrs.get("http.method").map(|v| value_to_string(v));
    let route = attrs.get("http.route").map(|v| value_to_string(v));
    let path = attrs.get("http.path").map(|v| value_to_string(v));
    let url = attrs.get("http.url").map(|v| value_to_string(v));
    let status_code = attrs.get("http.status_code").map(|v| value_to_string(v));

    let name = match (&method, &route) {
        (Some(method), Some(route)) => format!("{method} {route}"),
        (Some(method), None) => method.clone(),
        (None, _) => span.name.to_string(),
    };

    let mut properties = BTreeMap::new();
    if let Some(method) = &method {
        if let Some(path_like) = route.as_ref().or(path.as_ref()) {
            properties.insert("request.name".to_string(), format!("{method} {path_like}"));
        }
    }
    if let Some(url) = &url {
        properties.insert("request.url".to_string(), url.clone());
    }

    let span_status_ok = !matches!(span.status, Status::Error { .. });
    // No HTTP status to report: "0" for OK, and the same legacy "2"
    // (UNKNOWN) canonical code used elsewhere for a non-OK span with no
    // more specific status available (see DESIGN.md decision 6).
    let response_code = status_code.clone().unwrap_or_else(|| if span_status_ok { "0".to_string() } else { "2".to_string() });
    let success = match &status_code {
        Some(code) => code.parse::<u32>().map(|c| c < 400).unwrap_or(span_status_ok) && span_status_ok,
        None => span_status_ok,
    };

    let base_data = BaseData {
        ver: 2,
        id: format_span_id(*span_id),
        name,
        duration: duration.to_string(),
        success: Some(success),
        response_code: Some(response_code),
        url,
        properties,
        ..Default::default()
    };

    (REQUEST_NAME.to_string(), REQUEST_BASE_TYPE, base_data)
}

fn client_base_data(
    span: &SpanData,
    attrs: &BTreeMap<&str, &Value>,
    span_id: &SpanId,
    duration: &str,
) -> (String, &'static str, BaseData) {
    let component = attrs.get("component").map(|v| value_to_string(v));
    let http_url = attrs.get("http.url").map(|v| value_to_string(v));
    let is_http = component.as_deref() == Some("http") || http_url.is_some();

    let span_status_ok = !matches!(span.status, Status::Error { .. });

    let mut base_data = BaseData {
        ver: 2,
        id: format_span_id(*span_id),
        duration: duration.to_string(),
        success: Some(span_status_ok),
        name: span.name.to_string(),
        ..Default::default()
    };

    if is_http {
        let method = attrs.get("http.method").map(|v| value_to_string(v));
        let status_code = attrs.get("http.status_code").map(|v| value_to_string(v));
        let target = http_url.as_deref().and_then(url_host);
        let path = http_url.as_deref().and_then(url_path).unwrap_or_default();

        base_data.name = match &method {
            Some(method) => format!("{method}/{path}"),
            None => span.name.to_string(),
        };
        base_data.dependency_type = Some("HTTP".to_string());
        base_data.data = http_url.clone();
        base_data.target = target;
        base_data.result_code = Some(status_code.unwrap_or_else(|| "0".to_string()));
        if let Some(code) = base_data.result_code.as_ref().and_then(|c| c.parse::<u32>().ok()) {
            base_data.success = Some(code < 400 && span_status_ok);
        }
    }

    (REMOTE_DEPENDENCY_NAME.to_string(), REMOTE_DEPENDENCY_BASE_TYPE, base_data)
}

fn internal_base_data(span: &SpanData, span_id: &SpanId, duration: &str) -> (String, &'static str, BaseData) {
    let span_status_ok = !matches!(span.status, Status::Error { .. });
    let base_data = BaseData {
        ver: 2,
        id: format_span_id(*span_id),
        name: span.name.to_string(),
        duration: duration.to_string(),
        success: Some(span_status_ok),
        dependency_type: Some("InProc".to_string()),
        ..Default::default()
    };
    (REMOTE_DEPENDENCY_NAME.to_string(), REMOTE_DEPENDENCY_BASE_TYPE, base_data)
}

fn non_http_properties(attributes: &[KeyValue]) -> BTreeMap<String, String> {
    attributes
        .iter()
        .filter(|kv| !kv.key.as_str().starts_with("http."))
        .map(|kv| (kv.key.as_str().to_string(), value_to_string(&kv.value)))
        .collect()
}

fn links_to_json(span: &SpanData) -> Option<String> {
    if span.links.links.is_empty() {
        return None;
    }
    let links: Vec<serde_json::Value> = span
        .links
        .links
        .iter()
        .map(|link| {
            serde_json::json!({
                "operation_Id": format_trace_id(link.span_context.trace_id()),
                "id": format_span_id(link.span_context.span_id()),
            })
        })
        .collect();
    serde_json::to_string(&links).ok()
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::Bool(b) => b.to_string(),
        Value::I64(i) => i.to_string(),
        Value::F64(f) => f.to_string(),
        Value::String(s) => s.to_string(),
        other => other.to_string(),
    }
}

fn format_trace_id(trace_id: TraceId) -> String {
    let bytes = trace_id.to_bytes();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn format_span_id(span_id: SpanId) -> String {
    let bytes = span_id.to_bytes();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn system_time_to_unix_nanos(time: SystemTime) -> i64 {
    match time.duration_since(SystemTime::UNIX_EPOCH) {
        Ok(duration) => duration.as_nanos() as i64,
        Err(err) => -(err.duration().as_nanos() as i64),
    }
}

fn url_host(url: &str) -> Option<String> {
    let without_scheme = url.splitn(2, "://").nth(1)?;
    let host = without_scheme.split('/').next()?;
    Some(host.to_string())
}

fn url_path(url: &str) -> Option<String> {
    let without_scheme = url.splitn(2, "://").nth(1)?;
    let mut parts = without_scheme.splitn(2, '/');
    parts.next();
    parts.next().map(|p| p.to_string())
}

/// Internal shim used only in tests to exercise the legacy `"2"` (unknown)
/// canonical status code, which no longer has a direct `Status` variant in
/// the current `opentelemetry` API (see `DESIGN.md` decision 3/4).
#[cfg(test)]
#[derive(Debug, Clone, Copy)]
enum LegacyStatusCode {
    Ok,
    Error,
    Unknown,
}

#[cfg(test)]
fn legacy_status_code_string(code: LegacyStatusCode) -> &'static str {
    match code {
        LegacyStatusCode::Ok => "0",
        LegacyStatusCode::Error => "1",
        LegacyStatusCode::Unknown => "2",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::trace::{SpanContext, SpanId, TraceFlags, TraceId, TraceState};
    use opentelemetry_sdk::trace::{SpanData, SpanEvents, SpanLinks};
    use opentelemetry_sdk::Resource;
    use std::borrow::Cow;
    use std::time::Duration;

    fn base_span() -> SpanData {
        let trace_id = TraceId::from_hex("1bbd944a73a05d89eab5d3740a213ee7").unwrap();
        let span_id = SpanId::from_hex("a6f5d48acb4d31d9").unwrap();
        let start = SystemTime::UNIX_EPOCH + Duration::from_nanos(1_575_494_316_027_613_500);
        let end = start + Duration::from_nanos(1_001_000_000);

        SpanData {
            span_context: SpanContext::new(trace_id, span_id, TraceFlags::SAMPLED, false, TraceState::default()),
            parent_span_id: SpanId::INVALID,
            span_kind: SpanKind::Internal,
            name: Cow::Borrowed("test-span"),
            start_time: start,
            end_time: end,
            attributes: Vec::new(),
            dropped_attributes_count: 0,
            events: SpanEvents::default(),
            links: SpanLinks::default(),
            status: Status::Ok,
            resource: Cow::Owned(Resource::default()),
            instrumentation_lib: Default::default(),
        }
    }

    // S6: CLIENT span with HTTP attributes.
    #[test]
    fn s6_client_http_span_translates_to_remote_dependency() {
        let mut span = base_span();
        span.span_kind = SpanKind::Client;
        span.parent_span_id = SpanId::from_hex("a6f5d48acb4d31da").unwrap();
        span.attributes = vec![
            KeyValue::new("component", "http"),
            KeyValue::new("http.method", "GET"),
            KeyValue::new("http.url", "https://www.wikipedia.org/wiki/Rabbit"),
            KeyValue::new("http.status_code", 200i64),
        ];

        let envelope = span_to_envelope(&span).unwrap();

        assert_eq!(envelope.name, REMOTE_DEPENDENCY_NAME);
        assert_eq!(envelope.time, "2019-12-04T21:18:36.027613Z");
        assert_eq!(envelope.tags["ai.operation.id"], "1bbd944a73a05d89eab5d3740a213ee7");
        assert_eq!(envelope.tags["ai.operation.parentId"], "a6f5d48acb4d31da");
        assert_eq!(envelope.data.base_data.name, "GET//wiki/Rabbit");
        assert_eq!(envelope.data.base_data.target.as_deref(), Some("www.wikipedia.org"));
        assert_eq!(envelope.data.base_data.id, "a6f5d48acb4d31d9");
        assert_eq!(envelope.data.base_data.duration, "0.00:00:01.001");
        assert_eq!(envelope.data.base_data.result_code.as_deref(), Some("200"));
        assert_eq!(envelope.data.base_data.dependency_type.as_deref(), Some("HTTP"));
        assert_eq!(envelope.data.base_type, REMOTE_DEPENDENCY_BASE_TYPE);
    }

    // S7: SERVER span with a path but no route.
    #[test]
    fn s7_server_span_without_route_falls_back_to_path() {
        let mut span = base_span();
        span.span_kind = SpanKind::Server;
        span.attributes = vec![
            KeyValue::new("http.method", "GET"),
            KeyValue::new("http.path", "/wiki/Rabbitz"),
            KeyValue::new("http.url", "https://www.wikipedia.org/wiki/Rabbitz"),
        ];

        let envelope = span_to_envelope(&span).unwrap();

        assert_eq!(envelope.data.base_data.name, "GET");
        assert_eq!(
            envelope.data.base_data.properties.get("request.name").map(String::as_str),
            Some("GET /wiki/Rabbitz")
        );
        assert_eq!(
            envelope.data.base_data.properties.get("request.url").map(String::as_str),
            Some("https://www.wikipedia.org/wiki/Rabbitz")
        );
        assert!(!envelope.tags.contains_key("ai.operation.name"));
    }

    #[test]
    fn server_span_with_route_mirrors_name_into_operation_name_tag() {
        let mut span = base_span();
        span.span_kind = SpanKind::Server;
        span.attributes = vec![
            KeyValue::new("http.method", "GET"),
            KeyValue::new("http.route", "/wiki/Rabbit"),
        ];

        let envelope = span_to_envelope(&span).unwrap();

        assert_eq!(envelope.data.base_data.name, "GET /wiki/Rabbit");
        assert_eq!(
            envelope.tags.get("ai.operation.name").map(String::as_str),
            Some("GET /wiki/Rabbit")
        );
    }

    #[test]
    fn server_span_without_http_status_and_error_status_uses_legacy_unknown_code() {
        let mut span = base_span();
        span.span_kind = SpanKind::Server;
        span.status = Status::error("boom");

        let envelope = span_to_envelope(&span).unwrap();

        assert_eq!(envelope.data.base_data.response_code.as_deref(), Some("2"));
        assert_eq!(envelope.data.base_data.success, Some(false));
    }

    #[test]
    fn server_span_merges_non_http_properties_with_request_properties() {
        let mut span = base_span();
        span.span_kind = SpanKind::Server;
        span.attributes = vec![
            KeyValue::new("http.method", "GET"),
            KeyValue::new("http.route", "/wiki/Rabbit"),
            KeyValue::new("custom.attr", "kept"),
        ];

        let envelope = span_to_envelope(&span).unwrap();

        assert_eq!(
            envelope.data.base_data.properties.get("request.name").map(String::as_str),
            Some("GET /wiki/Rabbit")
        );
        assert_eq!(
            envelope.data.base_data.properties.get("custom.attr").map(String::as_str),
            Some("kept")
        );
    }

    // S8: INTERNAL span, no parent, plain attribute becomes a property.
    #[test]
    fn s8_internal_span_has_no_parent_tag_and_inproc_type() {
        let mut span = base_span();
        span.span_kind = SpanKind::Internal;
        span.attributes = vec![KeyValue::new("key1", "value1")];

        let envelope = span_to_envelope(&span).unwrap();

        assert_eq!(envelope.name, REMOTE_DEPENDENCY_NAME);
        assert_eq!(envelope.data.base_data.dependency_type.as_deref(), Some("InProc"));
        assert!(!envelope.tags.contains_key("ai.operation.parentId"));
        assert_eq!(
            envelope.data.base_data.properties.get("key1").map(String::as_str),
            Some("value1")
        );
    }

    #[test]
    fn http_prefixed_attributes_are_excluded_from_properties() {
        let mut span = base_span();
        span.span_kind = SpanKind::Server;
        span.attributes = vec![
            KeyValue::new("http.method", "GET"),
            KeyValue::new("custom.attr", "kept"),
        ];

        let envelope = span_to_envelope(&span).unwrap();
        assert!(!envelope.data.base_data.properties.contains_key("http.method"));
        assert_eq!(
            envelope.data.base_data.properties.get("custom.attr").map(String::as_str),
            Some("kept")
        );
    }

    #[test]
    fn legacy_status_shim_covers_unknown_code() {
        assert_eq!(legacy_status_code_string(LegacyStatusCode::Ok), "0");
        assert_eq!(legacy_status_code_string(LegacyStatusCode::Error), "1");
        assert_eq!(legacy_status_code_string(LegacyStatusCode::Unknown), "2");
    }
}

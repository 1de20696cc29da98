//! Application Insights wire schema types.
//!
//! Field names match the ingestion service's JSON schema exactly via
//! `#[serde(rename = "...")]`, the same approach the teacher's `config.rs`
//! uses for its YAML sub-configs.

use std::collections::BTreeMap;

use serde_derive::{Deserialize, Serialize};

pub const REQUEST_BASE_TYPE: &str = "RequestData";
pub const REMOTE_DEPENDENCY_BASE_TYPE: &str = "RemoteDependencyData";

/// One telemetry record ready for transmission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub ver: i32,
    pub name: String,
    pub time: String,
    #[serde(rename = "sampleRate", skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<String>,
    #[serde(rename = "iKey")]
    pub ikey: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flags: Option<i32>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    pub data: Data,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Data {
    #[serde(rename = "baseType")]
    pub base_type: String,
    #[serde(rename = "baseData")]
    pub base_data: BaseData,
}

/// Name and target AI envelope kind; request and dependency records share a
/// shape closely enough that a single struct with optional fields avoids an
/// enum with near-identical variants.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BaseData {
    pub ver: i32,
    pub id: String,
    pub name: String,
    pub duration: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(rename = "responseCode", skip_serializing_if = "Option::is_none")]
    pub response_code: Option<String>,
    #[serde(rename = "resultCode", skip_serializing_if = "Option::is_none")]
    pub result_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub dependency_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}

impl Envelope {
    pub fn new(ikey: impl Into<String>, time: impl Into<String>, name: impl Into<String>, data: Data) -> Self {
        Self {
            ver: 1,
            name: name.into(),
            time: time.into(),
            sample_rate: None,
            seq: None,
            ikey: ikey.into(),
            flags: None,
            tags: BTreeMap::new(),
            data,
        }
    }
}

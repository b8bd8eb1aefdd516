//! Wire envelopes
//!
//! Every line on the connection is one JSON envelope of the form
//! `{"type": ..., "payload": ...}`.

use asset_analysis_common::Asset;
use asset_pipeline_core::{AssetResult, ErrorKind, Fault, ProcessorError, ProcessorRef};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Faults of the connection itself; these close it
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed envelope: {0}")]
    Malformed(String),

    #[error("Channel I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot encode response: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Incoming envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum Request {
    /// Run one processor against one asset
    Execute(ExecuteRequest),
    /// Run a generator and a processor chain over every produced asset
    Generate(GenerateRequest),
    /// Retire the processor instance kept for a reference
    Teardown(TeardownRequest),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    #[serde(rename = "ref")]
    pub reference: ProcessorRef,
    pub asset: Asset,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequest {
    #[serde(rename = "ref")]
    pub reference: ProcessorRef,

    #[serde(default)]
    pub execute: Vec<ProcessorRef>,

    #[serde(default)]
    pub settings: GenerateSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeardownRequest {
    #[serde(rename = "ref")]
    pub reference: ProcessorRef,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateSettings {
    /// Source extensions to keep; must not be empty when given
    #[serde(default)]
    pub file_types: Vec<String>,
}

/// Outgoing envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum Response {
    Asset(AssetPayload),
    Error(ErrorPayload),
    Batch(BatchPayload),
    Teardown(TeardownPayload),
}

/// A processed asset with everything attributed to it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetPayload {
    pub id: String,
    pub document: Map<String, Value>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub errors: Vec<Fault>,
}

impl From<AssetResult> for AssetPayload {
    fn from(result: AssetResult) -> Self {
        Self {
            id: result.asset.id().to_string(),
            document: result.asset.into_document(),
            warnings: result.report.warnings,
            errors: result.report.faults,
        }
    }
}

/// A request that could not be carried out at all
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub error_kind: ErrorKind,
    pub message: String,
    pub asset_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchPayload {
    pub count: usize,
    pub assets: Vec<AssetPayload>,
}

/// Whether a kept instance was retired
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeardownPayload {
    pub class_name: String,
    pub torn_down: bool,
}

impl Response {
    pub fn error(error: &ProcessorError, asset_id: Option<&str>) -> Self {
        Response::Error(ErrorPayload {
            error_kind: error.kind(),
            message: error.to_string(),
            asset_id: asset_id.map(str::to_string),
        })
    }
}

/// Decode one line into a request
pub fn decode_request(line: &str) -> Result<Request, ProtocolError> {
    serde_json::from_str(line).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

/// Encode a response as one line, without the trailing newline
pub fn encode_response(response: &Response) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(response)?)
}

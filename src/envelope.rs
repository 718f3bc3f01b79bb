//! Request and response envelopes exchanged for every extension operation.
//!
//! Every envelope is created for one call and dropped when it returns.
//! Field names are part of the wire contract between independently built
//! host and plugin binaries, so they are spelled out explicitly and never
//! renamed.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::Span;
use uuid::Uuid;

/// Per-call configuration snapshot handed to a plugin.
///
/// The plugin always receives its own copy, so nothing it does to the map
/// is visible to the caller.
pub type StageConfig = BTreeMap<String, String>;

/// Opaque handle a plugin uses to emit log entries correlated with the
/// host-side call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogHandle {
    pub plugin: String,
    pub correlation_id: String,
}

impl LogHandle {
    pub fn new(plugin: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            correlation_id: Uuid::new_v4().to_string(),
        }
    }

    /// Span carrying the correlation fields; enter it around plugin work.
    pub fn span(&self) -> Span {
        tracing::info_span!(
            "plugin_call",
            plugin = %self.plugin,
            correlation_id = %self.correlation_id,
        )
    }
}

/// Envelope shared by the Transformation, Decision and Destination kinds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventArgs {
    pub event: String,
    #[serde(default)]
    pub config: StageConfig,
    #[serde(default)]
    pub log: LogHandle,
    /// Verdict of a Decision stage. `None` until a Decision has run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<bool>,
}

impl EventArgs {
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            ..Self::default()
        }
    }

    pub fn with_config(mut self, config: StageConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_log(mut self, log: LogHandle) -> Self {
        self.log = log;
        self
    }

    /// An event counts as accepted unless a Decision explicitly rejected it.
    pub fn is_accepted(&self) -> bool {
        self.decision != Some(false)
    }
}

/// Envelope for the Extractor kind: a raw batch of records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractorArgs {
    #[serde(default)]
    pub data: Vec<Value>,
    #[serde(default)]
    pub config: StageConfig,
    #[serde(default)]
    pub log: LogHandle,
}

impl ExtractorArgs {
    pub fn new(config: StageConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }
}

/// HTTP-shaped request intercepted by a Function plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRequest {
    pub method: String,
    pub uri: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: String,
}

impl Default for HttpRequest {
    fn default() -> Self {
        Self {
            method: "GET".to_string(),
            uri: "/".to_string(),
            headers: BTreeMap::new(),
            body: String::new(),
        }
    }
}

/// Closed set of payloads a Function may answer with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FunctionBody {
    #[default]
    Empty,
    Text(String),
    Json(Value),
    Bytes(Vec<u8>),
}

/// Envelope for the Function kind.
///
/// Functions have no error channel: failure is reported through
/// `status_code` and `response`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionArgs {
    pub request: HttpRequest,
    #[serde(default)]
    pub log: LogHandle,
    #[serde(default)]
    pub response: FunctionBody,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default = "default_status_code")]
    pub status_code: u16,
}

fn default_status_code() -> u16 {
    200
}

impl Default for FunctionArgs {
    fn default() -> Self {
        Self::new(HttpRequest::default())
    }
}

impl FunctionArgs {
    pub fn new(request: HttpRequest) -> Self {
        Self {
            request,
            log: LogHandle::default(),
            response: FunctionBody::Empty,
            headers: BTreeMap::new(),
            status_code: default_status_code(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// Turns these args into a failure answer, keeping the original request.
    pub fn into_failure(mut self, status_code: u16, message: impl Into<String>) -> Self {
        self.status_code = status_code;
        self.response = FunctionBody::Text(message.into());
        self
    }
}

/// Response envelope: always exactly one payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response<T> {
    pub args: T,
}

impl<T> Response<T> {
    pub fn new(args: T) -> Self {
        Self { args }
    }

    pub fn into_inner(self) -> T {
        self.args
    }
}

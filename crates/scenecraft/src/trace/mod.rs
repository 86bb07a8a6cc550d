//! Best-effort call tracing.
//!
//! A [`Tracer`] opens spans locally (ids and start time are assigned without
//! any I/O) and ships `call/start` / `call/end` records through a
//! [`TraceTransport`]. Without a credential the tracer has no transport and
//! every send is a local no-op.
//!
//! `send_start` / `send_end` report transport errors to the caller. The
//! pipeline only calls them from detached tasks, which log the error and
//! drop the rest of that trace.

pub mod weave;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use crate::config::TraceSettings;
use crate::error::TraceError;
use crate::prompt::TokenUsage;
use crate::sanitize::sanitize_value;
use crate::secrets::is_present;

pub use weave::WeaveTransport;

/// Identity of one open span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanContext {
    pub call_id: String,
    pub trace_id: String,
    pub parent_id: Option<String>,
    pub name: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CallStart {
    pub project_id: String,
    pub id: String,
    pub trace_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub op_name: String,
    pub started_at: String,
    pub inputs: Value,
    pub attributes: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct CallEnd {
    pub project_id: String,
    pub id: String,
    pub ended_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception: Option<String>,
    pub summary: Value,
}

/// How a span finished.
#[derive(Debug, Clone)]
pub enum SpanOutcome {
    Output(Value),
    Exception(String),
}

#[async_trait]
pub trait TraceTransport: Send + Sync {
    async fn call_start(&self, start: &CallStart) -> Result<(), TraceError>;
    async fn call_end(&self, end: &CallEnd) -> Result<(), TraceError>;
}

/// Builds the process tracer from settings. Called once, lazily.
pub trait TraceConnector: Send + Sync {
    fn connect(&self, settings: &TraceSettings) -> Tracer;
}

/// Production connector: Weave transport when a trace key is configured.
pub struct WeaveConnector {
    http: reqwest::Client,
}

impl WeaveConnector {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

impl TraceConnector for WeaveConnector {
    fn connect(&self, settings: &TraceSettings) -> Tracer {
        let api_key = settings.api_key.resolve_or_empty();
        if !is_present(&api_key) {
            debug!("No trace key configured, tracing disabled");
            return Tracer::disabled();
        }
        let transport = WeaveTransport::new(self.http.clone(), &settings.base_url, api_key);
        Tracer::new(Arc::new(transport), settings.project_id())
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Clone)]
pub struct Tracer {
    transport: Option<Arc<dyn TraceTransport>>,
    project_id: String,
}

impl Tracer {
    pub fn new(transport: Arc<dyn TraceTransport>, project_id: impl Into<String>) -> Self {
        Self {
            transport: Some(transport),
            project_id: project_id.into(),
        }
    }

    pub fn disabled() -> Self {
        Self {
            transport: None,
            project_id: String::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.transport.is_some()
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Assigns ids and a start time for a new span. No I/O.
    pub fn open(&self, name: &str, parent: Option<&SpanContext>) -> SpanContext {
        self.open_at(name, parent, Utc::now())
    }

    pub fn open_at(
        &self,
        name: &str,
        parent: Option<&SpanContext>,
        started_at: DateTime<Utc>,
    ) -> SpanContext {
        let call_id = Uuid::new_v4().to_string();
        let trace_id = parent
            .map(|p| p.trace_id.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        SpanContext {
            call_id,
            trace_id,
            parent_id: parent.map(|p| p.call_id.clone()),
            name: name.to_string(),
            started_at,
        }
    }

    /// Sends `call/start` for an opened span. Inputs are sanitized.
    pub async fn send_start(&self, span: &SpanContext, inputs: &Value) -> Result<(), TraceError> {
        let Some(transport) = &self.transport else {
            debug!("Tracing disabled, skipping start of {}", span.name);
            return Ok(());
        };
        let start = CallStart {
            project_id: self.project_id.clone(),
            id: span.call_id.clone(),
            trace_id: span.trace_id.clone(),
            parent_id: span.parent_id.clone(),
            op_name: span.name.clone(),
            started_at: timestamp(span.started_at),
            inputs: sanitize_value(inputs),
            attributes: json!({ "scenecraft": { "version": env!("CARGO_PKG_VERSION") } }),
        };
        transport.call_start(&start).await
    }

    /// Sends `call/end` stamped `ended_at`. Outputs are sanitized; the
    /// summary is passed through as-is.
    pub async fn send_end(
        &self,
        span: &SpanContext,
        outcome: SpanOutcome,
        summary: Option<Value>,
        ended_at: DateTime<Utc>,
    ) -> Result<(), TraceError> {
        let Some(transport) = &self.transport else {
            debug!("Tracing disabled, skipping end of {}", span.name);
            return Ok(());
        };
        let (output, exception) = match outcome {
            SpanOutcome::Output(value) => (Some(sanitize_value(&value)), None),
            SpanOutcome::Exception(message) => (None, Some(message)),
        };
        let end = CallEnd {
            project_id: self.project_id.clone(),
            id: span.call_id.clone(),
            ended_at: timestamp(ended_at),
            output,
            exception,
            summary: summary.unwrap_or_else(|| json!({})),
        };
        transport.call_end(&end).await
    }
}

/// Token-usage summary keyed by model name.
pub fn usage_summary(model: &str, usage: &TokenUsage) -> Value {
    json!({
        "usage": {
            model: {
                "requests": 1,
                "prompt_tokens": usage.prompt_tokens,
                "completion_tokens": usage.completion_tokens,
                "total_tokens": usage.total_tokens,
            }
        }
    })
}

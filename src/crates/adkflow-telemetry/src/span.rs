//! Span records and the run-scoped span tracker.

use chrono::{DateTime, SecondsFormat, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::exporter::JsonlSpanExporter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SpanStatus {
    Ok,
    Error,
    Unset,
}

/// One exported span: a single JSON object per line in the trace file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanRecord {
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub name: String,
    pub start_time: String,
    pub end_time: String,
    pub duration_ms: f64,
    pub status: SpanStatus,
    pub attributes: Map<String, Value>,
}

/// An open span; finish it through [`SpanTracker::end_span`].
#[derive(Debug, Clone)]
pub struct SpanHandle {
    pub span_id: String,
    parent_span_id: Option<String>,
    name: String,
    start: DateTime<Utc>,
}

fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    buf.iter().map(|b| format!("{b:02x}")).collect()
}

fn iso_millis(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Issues span ids for one trace and writes finished spans to the exporter.
pub struct SpanTracker {
    trace_id: String,
    exporter: Arc<JsonlSpanExporter>,
}

impl SpanTracker {
    /// Start a fresh trace (32-hex trace id).
    pub fn new(exporter: Arc<JsonlSpanExporter>) -> Self {
        Self {
            trace_id: random_hex(16),
            exporter,
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Open a span (16-hex span id), optionally parented.
    pub fn start_span(&self, name: impl Into<String>, parent: Option<&SpanHandle>) -> SpanHandle {
        SpanHandle {
            span_id: random_hex(8),
            parent_span_id: parent.map(|p| p.span_id.clone()),
            name: name.into(),
            start: Utc::now(),
        }
    }

    /// Close a span and export it.
    pub fn end_span(&self, handle: SpanHandle, status: SpanStatus, attributes: Map<String, Value>) {
        let end = Utc::now();
        let duration_ms = (end - handle.start)
            .num_microseconds()
            .map(|us| us as f64 / 1000.0)
            .unwrap_or(0.0);
        let record = SpanRecord {
            trace_id: self.trace_id.clone(),
            span_id: handle.span_id,
            parent_span_id: handle.parent_span_id,
            name: handle.name,
            start_time: iso_millis(handle.start),
            end_time: iso_millis(end),
            duration_ms,
            status,
            attributes,
        };
        self.exporter.export(&[record]);
    }
}

//! Local trace telemetry: one JSON record per span, written to
//! `<project>/logs/traces.jsonl` for the trace explorer.

pub mod config;
pub mod exporter;
pub mod span;

pub use config::{setup_tracing, TracingConfig, TracingManifest, ENV_TRACE_FILE, ENV_TRACING_ENABLED};
pub use exporter::JsonlSpanExporter;
pub use span::{SpanHandle, SpanRecord, SpanStatus, SpanTracker};

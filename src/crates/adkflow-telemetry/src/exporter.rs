//! JSONL span exporter with size-capped rotation.
//!
//! Each span is appended as one JSON line. When the file crosses the size
//! ceiling it is rotated to `.jsonl.1`, with prior rotations shifted up to
//! `.jsonl.5` before the oldest is dropped.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::span::SpanRecord;

const MAX_ROTATIONS: u32 = 5;

pub struct JsonlSpanExporter {
    file_path: PathBuf,
    max_file_size_bytes: u64,
    lock: Mutex<()>,
}

impl JsonlSpanExporter {
    pub fn new(file_path: impl Into<PathBuf>, max_file_size_mb: f64) -> Self {
        let file_path = file_path.into();
        if let Some(parent) = file_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        Self {
            file_path,
            max_file_size_bytes: (max_file_size_mb * 1024.0 * 1024.0) as u64,
            lock: Mutex::new(()),
        }
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// Truncate the trace file. Honors the `clear_before_run` setting.
    pub fn clear(&self) {
        let _guard = self.lock.lock();
        let _ = std::fs::write(&self.file_path, b"");
    }

    /// Append spans to the file. Write failures are logged, never raised;
    /// telemetry must not take the run down with it.
    pub fn export(&self, spans: &[SpanRecord]) {
        if spans.is_empty() {
            return;
        }
        let _guard = self.lock.lock();
        self.maybe_rotate();

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path);
        let mut file = match file {
            Ok(file) => file,
            Err(error) => {
                tracing::warn!(path = %self.file_path.display(), %error, "Failed to open trace file");
                return;
            }
        };
        for span in spans {
            match serde_json::to_string(span) {
                Ok(line) => {
                    if let Err(error) = writeln!(file, "{line}") {
                        tracing::warn!(%error, "Failed to write trace span");
                        return;
                    }
                }
                Err(error) => {
                    tracing::warn!(%error, "Failed to serialize trace span");
                }
            }
        }
    }

    fn rotation_path(&self, index: u32) -> PathBuf {
        PathBuf::from(format!("{}.{index}", self.file_path.display()))
    }

    fn maybe_rotate(&self) {
        let Ok(metadata) = std::fs::metadata(&self.file_path) else {
            return;
        };
        if metadata.len() < self.max_file_size_bytes {
            return;
        }

        for i in (1..=MAX_ROTATIONS).rev() {
            let old = self.rotation_path(i);
            if !old.exists() {
                continue;
            }
            if i == MAX_ROTATIONS {
                let _ = std::fs::remove_file(&old);
            } else {
                let _ = std::fs::rename(&old, self.rotation_path(i + 1));
            }
        }
        let _ = std::fs::rename(&self.file_path, self.rotation_path(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::SpanStatus;
    use serde_json::Map;

    fn record(name: &str) -> SpanRecord {
        SpanRecord {
            trace_id: "0".repeat(32),
            span_id: "1".repeat(16),
            parent_span_id: None,
            name: name.to_string(),
            start_time: "2025-01-03T12:34:56.789Z".into(),
            end_time: "2025-01-03T12:34:57.123Z".into(),
            duration_ms: 334.0,
            status: SpanStatus::Ok,
            attributes: Map::new(),
        }
    }

    #[test]
    fn export_appends_one_line_per_span() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("logs").join("traces.jsonl");
        let exporter = JsonlSpanExporter::new(&path, 10.0);

        exporter.export(&[record("a"), record("b")]);
        exporter.export(&[record("c")]);

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 3);
        let first: serde_json::Value = serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert_eq!(first["name"], "a");
        assert_eq!(first["status"], "OK");
        assert_eq!(first["parent_span_id"], serde_json::Value::Null);
    }

    #[test]
    fn rotation_shifts_prior_files() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("traces.jsonl");
        // Tiny ceiling so every export rotates.
        let exporter = JsonlSpanExporter::new(&path, 0.00001);

        exporter.export(&[record("first")]);
        exporter.export(&[record("second")]);
        exporter.export(&[record("third")]);

        assert!(path.exists());
        assert!(PathBuf::from(format!("{}.1", path.display())).exists());
        assert!(PathBuf::from(format!("{}.2", path.display())).exists());

        let rotated = std::fs::read_to_string(format!("{}.2", path.display())).unwrap();
        assert!(rotated.contains("first"));
    }

    #[test]
    fn clear_truncates_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("traces.jsonl");
        let exporter = JsonlSpanExporter::new(&path, 10.0);
        exporter.export(&[record("a")]);
        exporter.clear();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }
}

//! Tracing configuration resolution.
//!
//! Sources, in increasing precedence: built-in defaults, the manifest's
//! `logging.tracing` block, then the `ADKFLOW_TRACING_ENABLED` and
//! `ADKFLOW_TRACE_FILE` environment variables. The trace file is constrained
//! to live under `<project>/logs/`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::exporter::JsonlSpanExporter;
use crate::span::SpanTracker;

pub const ENV_TRACING_ENABLED: &str = "ADKFLOW_TRACING_ENABLED";
pub const ENV_TRACE_FILE: &str = "ADKFLOW_TRACE_FILE";
const DEFAULT_TRACE_FILE: &str = "traces.jsonl";
const DEFAULT_MAX_FILE_SIZE_MB: f64 = 10.0;

/// The optional `logging.tracing` block from a project manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TracingManifest {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub clear_before_run: Option<bool>,
}

/// Fully resolved tracing settings for one project.
#[derive(Debug, Clone, PartialEq)]
pub struct TracingConfig {
    pub enabled: bool,
    pub file_path: PathBuf,
    pub clear_before_run: bool,
    pub max_file_size_mb: f64,
}

fn parse_env_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

impl TracingConfig {
    /// Resolve settings from the manifest block plus environment overrides.
    pub fn resolve(manifest: Option<&TracingManifest>, project_path: &Path) -> Self {
        let logs_dir = project_path.join("logs");

        let mut enabled = manifest.and_then(|m| m.enabled).unwrap_or(false);
        if let Ok(raw) = std::env::var(ENV_TRACING_ENABLED) {
            if let Some(value) = parse_env_bool(&raw) {
                enabled = value;
            }
        }

        let mut file_name = manifest
            .and_then(|m| m.file.clone())
            .unwrap_or_else(|| DEFAULT_TRACE_FILE.to_string());
        if let Ok(raw) = std::env::var(ENV_TRACE_FILE) {
            if !raw.trim().is_empty() {
                file_name = raw;
            }
        }

        // Only the file name is honored; the trace file always lives in logs/.
        let candidate = logs_dir.join(&file_name);
        let file_path = match candidate.file_name() {
            Some(name) if !file_name.contains("..") => logs_dir.join(name),
            _ => {
                tracing::warn!(
                    requested = %file_name,
                    "Trace file escapes the logs directory, using default"
                );
                logs_dir.join(DEFAULT_TRACE_FILE)
            }
        };

        Self {
            enabled,
            file_path,
            clear_before_run: manifest.and_then(|m| m.clear_before_run).unwrap_or(false),
            max_file_size_mb: DEFAULT_MAX_FILE_SIZE_MB,
        }
    }
}

/// Build a span tracker for a run, or `None` when tracing is off.
pub fn setup_tracing(
    manifest: Option<&TracingManifest>,
    project_path: &Path,
) -> Option<SpanTracker> {
    let config = TracingConfig::resolve(manifest, project_path);
    if !config.enabled {
        return None;
    }
    let exporter = Arc::new(JsonlSpanExporter::new(
        config.file_path.clone(),
        config.max_file_size_mb,
    ));
    if config.clear_before_run {
        exporter.clear();
    }
    tracing::debug!(file = %config.file_path.display(), "Tracing enabled");
    Some(SpanTracker::new(exporter))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_disable_tracing_with_standard_file() {
        let config = TracingConfig::resolve(None, Path::new("/proj"));
        assert!(!config.enabled);
        assert_eq!(config.file_path, PathBuf::from("/proj/logs/traces.jsonl"));
        assert!(!config.clear_before_run);
    }

    #[test]
    fn manifest_block_enables_and_renames() {
        let manifest = TracingManifest {
            enabled: Some(true),
            file: Some("custom.jsonl".into()),
            clear_before_run: Some(true),
        };
        let config = TracingConfig::resolve(Some(&manifest), Path::new("/proj"));
        assert!(config.enabled);
        assert_eq!(config.file_path, PathBuf::from("/proj/logs/custom.jsonl"));
        assert!(config.clear_before_run);
    }

    #[test]
    fn traversal_in_file_name_falls_back_to_default() {
        let manifest = TracingManifest {
            enabled: Some(true),
            file: Some("../../etc/passwd".into()),
            clear_before_run: None,
        };
        let config = TracingConfig::resolve(Some(&manifest), Path::new("/proj"));
        assert_eq!(config.file_path, PathBuf::from("/proj/logs/traces.jsonl"));
    }

    #[test]
    fn env_bool_parsing_accepts_common_spellings() {
        assert_eq!(parse_env_bool("true"), Some(true));
        assert_eq!(parse_env_bool("YES"), Some(true));
        assert_eq!(parse_env_bool("1"), Some(true));
        assert_eq!(parse_env_bool("false"), Some(false));
        assert_eq!(parse_env_bool("0"), Some(false));
        assert_eq!(parse_env_bool("maybe"), None);
    }
}

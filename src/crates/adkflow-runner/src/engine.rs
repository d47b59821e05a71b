//! Execution engine helpers: SDK event translation, output-file writing,
//! and the friendly credential-error filter.

use std::path::Path;

use serde_json::json;

use adkflow_compiler::ir::WorkflowIR;

use crate::events::{EmitFn, EventType, RunEvent};
use crate::sdk::{EventPart, EventView, SdkEvent};

const CREDENTIAL_PATTERNS: &[&str] = &[
    "missing key inputs argument",
    "api key not valid",
    "api_key",
    "google_api_key",
    "defaultcredentialserror",
    "unauthorized",
    "permission denied",
    "credentials",
];

/// Map recognized credential failures to an actionable message; anything
/// else passes through unchanged.
pub fn format_error(error: &str, project_path: &Path) -> String {
    let lowered = error.to_lowercase();
    if CREDENTIAL_PATTERNS.iter().any(|p| lowered.contains(p)) {
        return format!(
            "API credentials not configured. Set GOOGLE_API_KEY in {}/.env \
             (get a key at https://aistudio.google.com/apikey), or set \
             GOOGLE_GENAI_USE_VERTEXAI=true with project credentials. \
             Original error: {error}",
            project_path.display()
        );
    }
    error.to_string()
}

/// Write the run output to each configured output file. Failures emit an
/// error event and move on; one bad path must not lose the others.
pub async fn write_output_files(
    ir: &WorkflowIR,
    output: &str,
    project_path: &Path,
    emit: &EmitFn,
) {
    for output_file in &ir.output_files {
        let full_path = if Path::new(&output_file.file_path).is_absolute() {
            std::path::PathBuf::from(&output_file.file_path)
        } else {
            project_path.join(&output_file.file_path)
        };

        let written = (|| -> std::io::Result<()> {
            if let Some(parent) = full_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&full_path, output.as_bytes())
        })();

        match written {
            Ok(()) => emit(
                RunEvent::new(EventType::AgentOutput)
                    .with_data(
                        "output",
                        json!(format!("Wrote output to {}", output_file.file_path)),
                    )
                    .with_data("file_path", json!(full_path.display().to_string())),
            ),
            Err(error) => emit(
                RunEvent::new(EventType::Error).with_data(
                    "error",
                    json!(format!(
                        "Failed to write output file {}: {error}",
                        output_file.file_path
                    )),
                ),
            ),
        }
    }
}

/// Translate one SDK event into run events.
///
/// Emits `agent_output` for final text, `tool_call` / `tool_result` for
/// function traffic, and skips partial chunks and user-authored events.
/// Returns the author to carry into the next call.
pub fn process_sdk_event(
    event: &SdkEvent,
    emit: &EmitFn,
    last_author: Option<&str>,
) -> Option<String> {
    let author = match event.author() {
        Some(author) if author != "user" => author.to_string(),
        _ => return last_author.map(str::to_string),
    };

    if event.partial() {
        return Some(author);
    }

    for part in event.content_parts() {
        match part {
            EventPart::FunctionCall { name, .. } => emit(
                RunEvent::new(EventType::ToolCall)
                    .with_agent(&author)
                    .with_data("tool_name", json!(name)),
            ),
            EventPart::FunctionResponse { name, .. } => emit(
                RunEvent::new(EventType::ToolResult)
                    .with_agent(&author)
                    .with_data("tool_name", json!(name)),
            ),
            EventPart::Text(_) => {}
        }
    }

    let text = event.text();
    if !text.is_empty() && event.is_final_response() {
        emit(
            RunEvent::new(EventType::AgentOutput)
                .with_agent(&author)
                .with_data("output", json!(text))
                .with_data("is_final", json!(true)),
        );
    }

    Some(author)
}

//! Context aggregator execution.
//!
//! Collects content from files, directories, URLs, and connected node
//! outputs into named variables for agent template substitution. Read
//! failures become inline placeholder values, never errors: a missing file
//! should not take the run down.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, Utc};
use serde_json::{Map, Value};

use adkflow_compiler::ir::ContextAggregatorIR;

use crate::events::JsonMap;

const DEFAULT_SEPARATOR: &str = "\n\n---";
const DEFAULT_MAX_FILES: usize = 100;
const DEFAULT_MAX_FILE_SIZE: u64 = 1_048_576;
const URL_TIMEOUT_SECS: u64 = 30;

type Metadata = Vec<(String, String)>;

/// Execute an aggregator. Returns `{"output": {variable: content, …}}`.
pub async fn execute_context_aggregator(
    ir: &ContextAggregatorIR,
    project_path: &Path,
    node_inputs: &JsonMap,
) -> JsonMap {
    let config = &ir.config;
    let dynamic_inputs = config
        .get("dynamicInputs")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let concatenate = config
        .get("aggregationMode")
        .and_then(Value::as_str)
        .map(|m| m == "concatenate")
        .unwrap_or(false);
    let separator = unescape(
        config
            .get("separator")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_SEPARATOR),
    );
    let output_var_name = config
        .get("outputVariableName")
        .and_then(Value::as_str)
        .unwrap_or("context")
        .to_string();
    let include_metadata = config
        .get("includeMetadata")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    tracing::debug!(
        node_id = %ir.id,
        inputs = dynamic_inputs.len(),
        concatenate,
        "Executing context aggregator"
    );

    let mut variables: Map<String, Value> = Map::new();
    let mut items: Vec<(String, Option<Metadata>)> = Vec::new();

    for raw in &dynamic_inputs {
        let Some(input) = raw.as_object() else {
            continue;
        };
        let input_type = input.get("inputType").and_then(Value::as_str).unwrap_or("");
        let var_name = input
            .get("variableName")
            .and_then(Value::as_str)
            .or_else(|| input.get("id").and_then(Value::as_str))
            .unwrap_or("input")
            .to_string();

        match input_type {
            "file" => {
                let file_path = input.get("filePath").and_then(Value::as_str).unwrap_or("");
                let (content, metadata) = read_file(file_path, project_path, include_metadata);
                push_value(
                    &mut variables,
                    &mut items,
                    concatenate,
                    var_name,
                    content,
                    metadata,
                );
            }
            "directory" => {
                let entries = read_directory(DirectoryRequest {
                    directory_path: input
                        .get("directoryPath")
                        .and_then(Value::as_str)
                        .unwrap_or(""),
                    glob_pattern: input
                        .get("globPattern")
                        .and_then(Value::as_str)
                        .unwrap_or("*"),
                    concatenate: input
                        .get("directoryAggregation")
                        .and_then(Value::as_str)
                        .map(|m| m == "concatenate")
                        .unwrap_or(true),
                    naming_pattern: input
                        .get("namingPattern")
                        .and_then(Value::as_str)
                        .unwrap_or("file_name"),
                    custom_pattern: input
                        .get("customPattern")
                        .and_then(Value::as_str)
                        .unwrap_or("{base}_{file_name}"),
                    separator: unescape(
                        input
                            .get("directorySeparator")
                            .and_then(Value::as_str)
                            .unwrap_or(DEFAULT_SEPARATOR),
                    ),
                    base_var_name: &var_name,
                    project_path,
                    include_metadata,
                    recursive: input
                        .get("recursive")
                        .and_then(Value::as_bool)
                        .unwrap_or(false),
                    exclude_patterns: input
                        .get("excludePatterns")
                        .and_then(Value::as_array)
                        .map(|list| {
                            list.iter()
                                .filter_map(Value::as_str)
                                .map(str::to_string)
                                .collect()
                        })
                        .unwrap_or_default(),
                    max_files: input
                        .get("maxFiles")
                        .and_then(Value::as_u64)
                        .unwrap_or(DEFAULT_MAX_FILES as u64) as usize,
                    max_file_size: input
                        .get("maxFileSize")
                        .and_then(Value::as_u64)
                        .unwrap_or(DEFAULT_MAX_FILE_SIZE),
                });
                for (name, content, metadata) in entries {
                    push_value(&mut variables, &mut items, concatenate, name, content, metadata);
                }
            }
            "url" => {
                let url = input.get("url").and_then(Value::as_str).unwrap_or("");
                let (content, metadata) = fetch_url(url, include_metadata).await;
                push_value(
                    &mut variables,
                    &mut items,
                    concatenate,
                    var_name,
                    content,
                    metadata,
                );
            }
            "node" => {
                let input_id = input.get("id").and_then(Value::as_str).unwrap_or("");
                let Some(Value::String(content)) = node_inputs.get(input_id) else {
                    continue;
                };
                let metadata = include_metadata.then(|| {
                    let label = input
                        .get("label")
                        .and_then(Value::as_str)
                        .unwrap_or(&var_name);
                    vec![
                        ("source_name".to_string(), label.to_string()),
                        ("source_id".to_string(), input_id.to_string()),
                        ("retrieved_time".to_string(), Utc::now().to_rfc3339()),
                    ]
                });
                push_value(
                    &mut variables,
                    &mut items,
                    concatenate,
                    var_name,
                    content.clone(),
                    metadata,
                );
            }
            _ => {}
        }
    }

    if concatenate {
        let combined = join_with_metadata_separators(&items, &separator);
        variables = Map::new();
        variables.insert(output_var_name, Value::String(combined));
    }

    tracing::debug!(
        node_id = %ir.id,
        variables = ?variables.keys().collect::<Vec<_>>(),
        "Context aggregator complete"
    );

    let mut outputs = JsonMap::new();
    outputs.insert("output".into(), Value::Object(variables));
    outputs
}

fn unescape(separator: &str) -> String {
    separator.replace("\\n", "\n").replace("\\t", "\t")
}

fn push_value(
    variables: &mut Map<String, Value>,
    items: &mut Vec<(String, Option<Metadata>)>,
    concatenate: bool,
    var_name: String,
    content: String,
    metadata: Option<Metadata>,
) {
    if concatenate {
        items.push((content, metadata));
    } else {
        let value = match &metadata {
            Some(metadata) => format!("{}{}", format_frontmatter(metadata), content),
            None => content,
        };
        variables.insert(var_name, Value::String(value));
    }
}

/// Concatenate items; each separator after the first is templated with the
/// following item's metadata when present.
fn join_with_metadata_separators(items: &[(String, Option<Metadata>)], separator: &str) -> String {
    let mut parts: Vec<String> = Vec::new();
    for (i, (content, metadata)) in items.iter().enumerate() {
        if i > 0 {
            match metadata {
                Some(metadata) => parts.push(format_separator(separator, metadata)),
                None => parts.push(separator.to_string()),
            }
        }
        parts.push(content.clone());
    }
    parts.concat()
}

fn format_frontmatter(metadata: &Metadata) -> String {
    let mut lines = vec!["---".to_string()];
    for (key, value) in metadata {
        if !value.is_empty() {
            lines.push(format!("{key}: {value}"));
        }
    }
    lines.push("---\n".to_string());
    lines.join("\n")
}

fn format_separator(separator: &str, metadata: &Metadata) -> String {
    let mut formatted = separator.to_string();
    for (key, value) in metadata {
        formatted = formatted.replace(&format!("{{{key}}}"), value);
    }
    formatted
}

// ---------------------------------------------------------------------------
// File reading
// ---------------------------------------------------------------------------

/// Read text, UTF-8 first with a latin-1 fallback.
fn read_text_lossy(path: &Path) -> std::io::Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => err.into_bytes().iter().map(|&b| b as char).collect(),
    })
}

fn file_metadata(path: &Path, relative_path: &str) -> Metadata {
    let mut metadata = vec![
        ("source_path".to_string(), relative_path.to_string()),
        (
            "source_name".to_string(),
            path.file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string(),
        ),
        (
            "file_ext".to_string(),
            path.extension()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string(),
        ),
    ];
    if let Ok(stat) = path.metadata() {
        metadata.push(("file_size".to_string(), stat.len().to_string()));
        if let Ok(modified) = stat.modified() {
            let modified: DateTime<Local> = modified.into();
            metadata.push(("modified_time".to_string(), modified.to_rfc3339()));
        }
    }
    metadata
}

fn read_file(
    file_path: &str,
    project_path: &Path,
    include_metadata: bool,
) -> (String, Option<Metadata>) {
    if file_path.is_empty() {
        return (String::new(), None);
    }

    let mut full_path = project_path.join(file_path);
    if !full_path.exists() {
        full_path = PathBuf::from(file_path);
        if !full_path.exists() {
            return (format!("[File not found: {file_path}]"), None);
        }
    }

    match read_text_lossy(&full_path) {
        Ok(content) => {
            let metadata = include_metadata.then(|| file_metadata(&full_path, file_path));
            (content, metadata)
        }
        Err(error) => (format!("[Error reading {file_path}: {error}]"), None),
    }
}

// ---------------------------------------------------------------------------
// Directory reading
// ---------------------------------------------------------------------------

struct DirectoryRequest<'a> {
    directory_path: &'a str,
    glob_pattern: &'a str,
    concatenate: bool,
    naming_pattern: &'a str,
    custom_pattern: &'a str,
    separator: String,
    base_var_name: &'a str,
    project_path: &'a Path,
    include_metadata: bool,
    recursive: bool,
    exclude_patterns: Vec<String>,
    max_files: usize,
    max_file_size: u64,
}

fn matches_exclude(file_path: &Path, base_dir: &Path, patterns: &[String]) -> bool {
    let Ok(relative) = file_path.strip_prefix(base_dir) else {
        return false;
    };
    let components: Vec<&str> = relative
        .components()
        .filter_map(|c| c.as_os_str().to_str())
        .collect();
    for pattern in patterns {
        if components.iter().any(|part| part == pattern) {
            return true;
        }
        if let Ok(glob_pattern) = glob::Pattern::new(pattern) {
            if components.iter().any(|part| glob_pattern.matches(part)) {
                return true;
            }
        }
    }
    false
}

fn apply_limits(
    files: Vec<PathBuf>,
    max_files: usize,
    max_file_size: u64,
) -> (Vec<PathBuf>, Option<String>) {
    let mut skipped_large = 0usize;
    let mut kept: Vec<PathBuf> = Vec::new();
    for file in files {
        match file.metadata() {
            Ok(stat) if stat.len() > max_file_size => skipped_large += 1,
            Ok(_) => kept.push(file),
            Err(_) => continue,
        }
    }

    let mut warnings: Vec<String> = Vec::new();
    if skipped_large > 0 {
        warnings.push(format!(
            "[Warning: Skipped {skipped_large} file(s) exceeding {}KB]",
            max_file_size / 1024
        ));
    }
    if kept.len() > max_files {
        warnings.push(format!(
            "[Warning: Found {} files, limited to {max_files}]",
            kept.len()
        ));
        kept.truncate(max_files);
    }

    let warning = if warnings.is_empty() {
        None
    } else {
        Some(warnings.join(" "))
    };
    (kept, warning)
}

fn sanitize_relative(relative: &Path) -> String {
    relative
        .with_extension("")
        .to_string_lossy()
        .replace(['/', '\\'], "_")
}

/// Returns `(variable_name, content, metadata)` triples.
fn read_directory(request: DirectoryRequest<'_>) -> Vec<(String, String, Option<Metadata>)> {
    if request.directory_path.is_empty() {
        return Vec::new();
    }

    let mut full_dir = request.project_path.join(request.directory_path);
    if !full_dir.exists() {
        full_dir = PathBuf::from(request.directory_path);
        if !full_dir.exists() {
            return vec![(
                request.base_var_name.to_string(),
                format!("[Directory not found: {}]", request.directory_path),
                None,
            )];
        }
    }

    let effective_pattern = if request.recursive && !request.glob_pattern.starts_with("**/") {
        format!("**/{}", request.glob_pattern)
    } else {
        request.glob_pattern.to_string()
    };
    let pattern = format!("{}/{}", full_dir.display(), effective_pattern);

    let mut files: Vec<PathBuf> = glob::glob(&pattern)
        .map(|paths| paths.flatten().filter(|p| p.is_file()).collect())
        .unwrap_or_default();
    files.sort();

    if !request.exclude_patterns.is_empty() {
        files.retain(|f| !matches_exclude(f, &full_dir, &request.exclude_patterns));
    }

    if files.is_empty() {
        return vec![(
            request.base_var_name.to_string(),
            format!("[No files matched: {}]", request.glob_pattern),
            None,
        )];
    }

    let (files, limit_warning) = apply_limits(files, request.max_files, request.max_file_size);
    let total_files = files.len();

    let mut entries: Vec<(String, String, Option<Metadata>)> = Vec::new();
    if request.concatenate {
        let mut items: Vec<(String, Option<Metadata>)> = Vec::new();
        if let Some(warning) = &limit_warning {
            items.push((warning.clone(), None));
        }
        for (i, file) in files.iter().enumerate() {
            let Ok(content) = read_text_lossy(file) else {
                continue;
            };
            let metadata = request.include_metadata.then(|| {
                let mut metadata = file_metadata(file, &relative_for(file, &request, &full_dir));
                metadata.push(("file_index".to_string(), i.to_string()));
                metadata.push(("total_files".to_string(), total_files.to_string()));
                metadata.push((
                    "relative_path".to_string(),
                    sanitize_relative(file.strip_prefix(&full_dir).unwrap_or(file)),
                ));
                metadata
            });
            items.push((content, metadata));
        }
        let combined = join_with_metadata_separators(&items, &request.separator);
        entries.push((request.base_var_name.to_string(), combined, None));
    } else {
        if let Some(warning) = limit_warning {
            entries.push((format!("{}_warning", request.base_var_name), warning, None));
        }
        for (i, file) in files.iter().enumerate() {
            let content = match read_text_lossy(file) {
                Ok(content) => content,
                Err(error) => format!("[Error: {error}]"),
            };
            let stem = file
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default();
            let relative_sanitized =
                sanitize_relative(file.strip_prefix(&full_dir).unwrap_or(file));
            let var_name = match request.naming_pattern {
                "file_name" => format!("{}_{stem}", request.base_var_name),
                "number" => format!("{}_{i}", request.base_var_name),
                _ => request
                    .custom_pattern
                    .replace("{file_name}", stem)
                    .replace(
                        "{file_ext}",
                        file.extension().and_then(|s| s.to_str()).unwrap_or(""),
                    )
                    .replace("{number}", &i.to_string())
                    .replace("{base}", request.base_var_name)
                    .replace("{relative_path}", &relative_sanitized),
            };
            let metadata = request.include_metadata.then(|| {
                let mut metadata = file_metadata(file, &relative_for(file, &request, &full_dir));
                metadata.push(("file_index".to_string(), i.to_string()));
                metadata.push(("total_files".to_string(), total_files.to_string()));
                metadata.push(("relative_path".to_string(), relative_sanitized.clone()));
                metadata
            });
            entries.push((var_name, content, metadata));
        }
    }
    entries
}

fn relative_for(file: &Path, request: &DirectoryRequest<'_>, full_dir: &Path) -> String {
    file.strip_prefix(request.project_path)
        .or_else(|_| file.strip_prefix(full_dir))
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|_| file.to_string_lossy().into_owned())
}

// ---------------------------------------------------------------------------
// URL fetching
// ---------------------------------------------------------------------------

async fn fetch_url(url: &str, include_metadata: bool) -> (String, Option<Metadata>) {
    if url.is_empty() {
        return (String::new(), None);
    }

    let client = match reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(URL_TIMEOUT_SECS))
        .build()
    {
        Ok(client) => client,
        Err(error) => return (format!("[Error fetching {url}: {error}]"), None),
    };

    let response = match client.get(url).send().await {
        Ok(response) => response,
        Err(error) if error.is_timeout() => return (format!("[Timeout fetching {url}]"), None),
        Err(error) => return (format!("[Error fetching {url}: {error}]"), None),
    };

    let status = response.status();
    if !status.is_success() {
        return (format!("[HTTP {} from {url}]", status.as_u16()), None);
    }

    let metadata = include_metadata.then(|| url_metadata(url, &response));
    match response.text().await {
        Ok(content) => (content, metadata),
        Err(error) => (format!("[Error fetching {url}: {error}]"), None),
    }
}

fn url_metadata(url: &str, response: &reqwest::Response) -> Metadata {
    let retrieved_time = Utc::now().to_rfc3339();
    let header = |name: &str| {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    };

    let modified_time = response
        .headers()
        .get("Last-Modified")
        .and_then(|v| v.to_str().ok())
        .and_then(|raw| DateTime::parse_from_rfc2822(raw).ok())
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| retrieved_time.clone());

    let url_tail = url
        .split('?')
        .next()
        .unwrap_or(url)
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("url");
    let source_name = url_tail.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(url_tail);

    vec![
        ("source_path".to_string(), url.to_string()),
        ("source_name".to_string(), source_name.to_string()),
        ("content_type".to_string(), header("Content-Type")),
        ("content_length".to_string(), header("Content-Length")),
        (
            "status_code".to_string(),
            response.status().as_u16().to_string(),
        ),
        ("modified_time".to_string(), modified_time),
        ("retrieved_time".to_string(), retrieved_time),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn aggregator(config: Value) -> ContextAggregatorIR {
        ContextAggregatorIR {
            id: "agg1".into(),
            name: "Aggregator".into(),
            config: config.as_object().cloned().unwrap_or_default(),
            source_node_id: "agg1".into(),
        }
    }

    fn output_vars(outputs: &JsonMap) -> &Map<String, Value> {
        outputs.get("output").and_then(Value::as_object).unwrap()
    }

    #[tokio::test]
    async fn file_input_reads_into_variable() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("notes.md"), "the notes").unwrap();

        let ir = aggregator(json!({
            "dynamicInputs": [
                {"inputType": "file", "variableName": "notes", "filePath": "notes.md"}
            ]
        }));
        let outputs = execute_context_aggregator(&ir, tmp.path(), &JsonMap::new()).await;
        assert_eq!(output_vars(&outputs)["notes"], json!("the notes"));
    }

    #[tokio::test]
    async fn missing_file_becomes_placeholder() {
        let tmp = tempfile::tempdir().unwrap();
        let ir = aggregator(json!({
            "dynamicInputs": [
                {"inputType": "file", "variableName": "gone", "filePath": "missing.md"}
            ]
        }));
        let outputs = execute_context_aggregator(&ir, tmp.path(), &JsonMap::new()).await;
        assert_eq!(
            output_vars(&outputs)["gone"],
            json!("[File not found: missing.md]")
        );
    }

    #[tokio::test]
    async fn metadata_frontmatter_prefixes_content() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("doc.md"), "body").unwrap();

        let ir = aggregator(json!({
            "includeMetadata": true,
            "dynamicInputs": [
                {"inputType": "file", "variableName": "doc", "filePath": "doc.md"}
            ]
        }));
        let outputs = execute_context_aggregator(&ir, tmp.path(), &JsonMap::new()).await;
        let value = output_vars(&outputs)["doc"].as_str().unwrap();
        assert!(value.starts_with("---\n"));
        assert!(value.contains("source_path: doc.md"));
        assert!(value.contains("file_ext: md"));
        assert!(value.ends_with("body"));
    }

    #[tokio::test]
    async fn directory_concatenate_joins_with_separator() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("docs")).unwrap();
        std::fs::write(tmp.path().join("docs/a.txt"), "alpha").unwrap();
        std::fs::write(tmp.path().join("docs/b.txt"), "beta").unwrap();

        let ir = aggregator(json!({
            "dynamicInputs": [
                {"inputType": "directory", "variableName": "docs",
                 "directoryPath": "docs", "globPattern": "*.txt",
                 "directoryAggregation": "concatenate", "directorySeparator": "\\n--\\n"}
            ]
        }));
        let outputs = execute_context_aggregator(&ir, tmp.path(), &JsonMap::new()).await;
        assert_eq!(output_vars(&outputs)["docs"], json!("alpha\n--\nbeta"));
    }

    #[tokio::test]
    async fn directory_pass_mode_names_by_stem_and_number() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("docs")).unwrap();
        std::fs::write(tmp.path().join("docs/a.txt"), "alpha").unwrap();
        std::fs::write(tmp.path().join("docs/b.txt"), "beta").unwrap();

        let ir = aggregator(json!({
            "dynamicInputs": [
                {"inputType": "directory", "variableName": "docs",
                 "directoryPath": "docs", "globPattern": "*.txt",
                 "directoryAggregation": "pass", "namingPattern": "number"}
            ]
        }));
        let outputs = execute_context_aggregator(&ir, tmp.path(), &JsonMap::new()).await;
        let vars = output_vars(&outputs);
        assert_eq!(vars["docs_0"], json!("alpha"));
        assert_eq!(vars["docs_1"], json!("beta"));
    }

    #[tokio::test]
    async fn custom_naming_pattern_substitutes_placeholders() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("docs")).unwrap();
        std::fs::write(tmp.path().join("docs/a.txt"), "alpha").unwrap();

        let ir = aggregator(json!({
            "dynamicInputs": [
                {"inputType": "directory", "variableName": "d",
                 "directoryPath": "docs", "globPattern": "*.txt",
                 "directoryAggregation": "pass", "namingPattern": "custom",
                 "customPattern": "{base}_{file_name}_{file_ext}_{number}"}
            ]
        }));
        let outputs = execute_context_aggregator(&ir, tmp.path(), &JsonMap::new()).await;
        assert!(output_vars(&outputs).contains_key("d_a_txt_0"));
    }

    #[tokio::test]
    async fn empty_glob_yields_placeholder() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("docs")).unwrap();

        let ir = aggregator(json!({
            "dynamicInputs": [
                {"inputType": "directory", "variableName": "docs",
                 "directoryPath": "docs", "globPattern": "*.none"}
            ]
        }));
        let outputs = execute_context_aggregator(&ir, tmp.path(), &JsonMap::new()).await;
        assert_eq!(
            output_vars(&outputs)["docs"],
            json!("[No files matched: *.none]")
        );
    }

    #[tokio::test]
    async fn exclude_patterns_drop_matching_components() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("docs/node_modules")).unwrap();
        std::fs::write(tmp.path().join("docs/keep.txt"), "keep").unwrap();
        std::fs::write(tmp.path().join("docs/node_modules/skip.txt"), "skip").unwrap();

        let ir = aggregator(json!({
            "dynamicInputs": [
                {"inputType": "directory", "variableName": "docs",
                 "directoryPath": "docs", "globPattern": "*.txt", "recursive": true,
                 "directoryAggregation": "concatenate",
                 "excludePatterns": ["node_modules"]}
            ]
        }));
        let outputs = execute_context_aggregator(&ir, tmp.path(), &JsonMap::new()).await;
        let combined = output_vars(&outputs)["docs"].as_str().unwrap();
        assert!(combined.contains("keep"));
        assert!(!combined.contains("skip"));
    }

    #[tokio::test]
    async fn max_files_limit_adds_warning() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("docs")).unwrap();
        for i in 0..3 {
            std::fs::write(tmp.path().join(format!("docs/f{i}.txt")), "x").unwrap();
        }

        let ir = aggregator(json!({
            "dynamicInputs": [
                {"inputType": "directory", "variableName": "docs",
                 "directoryPath": "docs", "globPattern": "*.txt",
                 "directoryAggregation": "concatenate", "maxFiles": 2}
            ]
        }));
        let outputs = execute_context_aggregator(&ir, tmp.path(), &JsonMap::new()).await;
        let combined = output_vars(&outputs)["docs"].as_str().unwrap();
        assert!(combined.contains("limited to 2"));
    }

    #[tokio::test]
    async fn node_input_reads_from_upstream_results() {
        let tmp = tempfile::tempdir().unwrap();
        let mut node_inputs = JsonMap::new();
        node_inputs.insert("in_1".into(), json!("from upstream"));

        let ir = aggregator(json!({
            "dynamicInputs": [
                {"inputType": "node", "id": "in_1", "variableName": "upstream"}
            ]
        }));
        let outputs = execute_context_aggregator(&ir, tmp.path(), &node_inputs).await;
        assert_eq!(output_vars(&outputs)["upstream"], json!("from upstream"));
    }

    #[tokio::test]
    async fn top_level_concatenate_merges_all_inputs() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("one.txt"), "one").unwrap();
        std::fs::write(tmp.path().join("two.txt"), "two").unwrap();

        let ir = aggregator(json!({
            "aggregationMode": "concatenate",
            "separator": " | ",
            "outputVariableName": "merged",
            "dynamicInputs": [
                {"inputType": "file", "variableName": "a", "filePath": "one.txt"},
                {"inputType": "file", "variableName": "b", "filePath": "two.txt"}
            ]
        }));
        let outputs = execute_context_aggregator(&ir, tmp.path(), &JsonMap::new()).await;
        assert_eq!(output_vars(&outputs)["merged"], json!("one | two"));
    }

    #[test]
    fn latin1_fallback_decodes_invalid_utf8() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("latin.txt");
        std::fs::write(&path, [b'c', b'a', b'f', 0xE9]).unwrap();
        let content = read_text_lossy(&path).unwrap();
        assert_eq!(content, "café");
    }
}

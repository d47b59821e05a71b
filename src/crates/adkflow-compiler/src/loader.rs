//! Project loader.
//!
//! Reads `manifest.json`, partitions nodes and edges by tab, and eagerly
//! reads every referenced prompt/context/tool/callback/schema file. Every
//! referenced path must resolve inside the project root; anything that
//! escapes is rejected before any file content is read.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use serde_json::Value;

use crate::config::ExecutionConfig;
use crate::error::{CompilationError, ErrorLocation, Result};
use crate::project::{LoadedFile, LoadedProject, LoadedTool, RawManifest, Tab};

pub struct ProjectLoader {
    config: ExecutionConfig,
}

impl Default for ProjectLoader {
    fn default() -> Self {
        Self::new(ExecutionConfig::default())
    }
}

/// Lexically normalize `base/relative`, rejecting traversal above `base`.
///
/// Works without touching the filesystem so missing files still produce a
/// useful not-found error instead of a canonicalization failure.
fn resolve_inside(base: &Path, relative: &str) -> Option<PathBuf> {
    let joined = base.join(relative);
    let mut normalized = PathBuf::new();
    let mut depth: i64 = 0;
    for component in joined.components() {
        match component {
            Component::ParentDir => {
                if depth == 0 {
                    return None;
                }
                depth -= 1;
                normalized.pop();
            }
            Component::CurDir => {}
            other => {
                if let Component::Normal(_) = other {
                    depth += 1;
                }
                normalized.push(other.as_os_str());
            }
        }
    }
    if normalized.starts_with(base) {
        Some(normalized)
    } else {
        None
    }
}

fn node_str<'a>(node: &'a Value, key: &str) -> Option<&'a str> {
    node.get(key).and_then(Value::as_str)
}

fn node_config(node: &Value) -> Option<&serde_json::Map<String, Value>> {
    let data = node.get("data")?.as_object()?;
    match data.get("config") {
        Some(Value::Object(config)) => Some(config),
        _ => Some(data),
    }
}

impl ProjectLoader {
    pub fn new(config: ExecutionConfig) -> Self {
        Self { config }
    }

    /// Load a project from disk.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<LoadedProject> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(CompilationError::ProjectNotFound(path.to_path_buf()));
        }
        if !path.is_dir() {
            return Err(CompilationError::NotADirectory(path.to_path_buf()));
        }

        let manifest_path = path.join("manifest.json");
        if !manifest_path.exists() {
            return Err(CompilationError::InvalidManifest {
                path: manifest_path,
                message: "manifest.json not found".to_string(),
            });
        }
        let raw = std::fs::read_to_string(&manifest_path)?;
        let manifest: RawManifest =
            serde_json::from_str(&raw).map_err(|e| CompilationError::InvalidManifest {
                path: manifest_path.clone(),
                message: e.to_string(),
            })?;

        if manifest.tabs.is_empty() {
            return Err(CompilationError::NoTabs);
        }

        let tabs = partition_tabs(&manifest);

        let mut project = LoadedProject {
            path: path.to_path_buf(),
            name: manifest.name.clone(),
            version: manifest.version.clone().unwrap_or_else(|| "3.0".to_string()),
            tabs,
            prompts: HashMap::new(),
            tools: HashMap::new(),
            callbacks: HashMap::new(),
            schemas: HashMap::new(),
            logging: manifest.logging.clone(),
        };

        self.load_referenced_files(&mut project, &manifest.nodes)?;

        tracing::info!(
            project = %project.name,
            tabs = project.tabs.len(),
            prompts = project.prompts.len(),
            tools = project.tools.len(),
            "Project loaded"
        );

        Ok(project)
    }

    fn load_referenced_files(&self, project: &mut LoadedProject, nodes: &[Value]) -> Result<()> {
        for node in nodes {
            let node_type = node_str(node, "type").unwrap_or_default();
            let node_id = node_str(node, "id").unwrap_or_default().to_string();
            let Some(config) = node_config(node) else {
                continue;
            };
            let Some(file_path) = config.get("file_path").and_then(Value::as_str) else {
                continue;
            };
            if file_path.is_empty() {
                continue;
            }

            match node_type {
                "prompt" | "context" => {
                    if !self.config.load_prompts {
                        continue;
                    }
                    let file = self.read_text_file(project, file_path, &node_id, false)?;
                    project.prompts.insert(file_path.to_string(), file);
                }
                "tool" | "agentTool" => {
                    if !self.config.load_tools {
                        continue;
                    }
                    let file = self.read_text_file(project, file_path, &node_id, true)?;
                    let stem = Path::new(file_path)
                        .file_stem()
                        .and_then(|s| s.to_str())
                        .unwrap_or("tool")
                        .to_string();
                    project.tools.insert(
                        file_path.to_string(),
                        LoadedTool {
                            name: stem,
                            path: file.path,
                            absolute_path: file.absolute_path,
                            code: file.content,
                        },
                    );
                }
                "callback" => {
                    let file = self.read_text_file(project, file_path, &node_id, true)?;
                    project.callbacks.insert(file_path.to_string(), file);
                }
                "schema" => {
                    let file = self.read_text_file(project, file_path, &node_id, false)?;
                    project.schemas.insert(file_path.to_string(), file);
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn read_text_file(
        &self,
        project: &LoadedProject,
        file_path: &str,
        node_id: &str,
        is_tool: bool,
    ) -> Result<LoadedFile> {
        let location = ErrorLocation::node(node_id).with_file(file_path);
        let make_error = |message: String| {
            if is_tool {
                CompilationError::ToolLoad {
                    message,
                    location: location.clone(),
                }
            } else {
                CompilationError::PromptLoad {
                    message,
                    location: location.clone(),
                }
            }
        };

        let absolute_path = resolve_inside(&project.path, file_path)
            .ok_or_else(|| make_error(format!("Path escapes project: {file_path}")))?;

        if !absolute_path.exists() {
            return Err(make_error(format!("File not found: {file_path}")));
        }

        let content = std::fs::read_to_string(&absolute_path)
            .map_err(|e| make_error(format!("Failed to read {file_path}: {e}")))?;

        Ok(LoadedFile {
            path: file_path.to_string(),
            absolute_path,
            content,
        })
    }
}

/// Partition manifest nodes and edges into tabs, ordered by declared order.
/// A cross-tab edge (endpoints in different tabs) is dropped.
fn partition_tabs(manifest: &RawManifest) -> Vec<Tab> {
    // Node id -> tab id, from each node's data.tabId.
    let mut node_tabs: HashMap<&str, &str> = HashMap::new();
    for node in &manifest.nodes {
        let Some(id) = node_str(node, "id") else {
            continue;
        };
        if let Some(tab_id) = node
            .get("data")
            .and_then(|d| d.get("tabId"))
            .and_then(Value::as_str)
        {
            node_tabs.insert(id, tab_id);
        }
    }
    let default_tab = manifest.tabs.first().map(|t| t.id.as_str()).unwrap_or("");

    let mut tabs: Vec<Tab> = manifest
        .tabs
        .iter()
        .enumerate()
        .map(|(i, raw)| Tab {
            id: raw.id.clone(),
            name: raw.name.clone(),
            order: raw.order.unwrap_or(i as i64),
            nodes: Vec::new(),
            edges: Vec::new(),
        })
        .collect();
    tabs.sort_by_key(|t| t.order);

    for node in &manifest.nodes {
        let Some(id) = node_str(node, "id") else {
            continue;
        };
        let tab_id = node_tabs.get(id).copied().unwrap_or(default_tab);
        if let Some(tab) = tabs.iter_mut().find(|t| t.id == tab_id) {
            tab.nodes.push(node.clone());
        }
    }

    for edge in &manifest.edges {
        let (Some(source), Some(target)) = (node_str(edge, "source"), node_str(edge, "target"))
        else {
            continue;
        };
        let source_tab = node_tabs.get(source).copied().unwrap_or(default_tab);
        let target_tab = node_tabs.get(target).copied().unwrap_or(default_tab);
        if source_tab != target_tab {
            // Cross-tab data flow only happens through teleporters.
            continue;
        }
        if let Some(tab) = tabs.iter_mut().find(|t| t.id == source_tab) {
            tab.edges.push(edge.clone());
        }
    }

    tabs
}

//! Loaded project model: the manifest plus eagerly-read referenced files.
//!
//! A project is read-only once loaded; the compiler stages borrow it.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;
use serde_json::Value;

/// Raw manifest shape as stored on disk (`manifest.json`).
#[derive(Debug, Clone, Deserialize)]
pub struct RawManifest {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub tabs: Vec<RawTab>,
    #[serde(default)]
    pub nodes: Vec<Value>,
    #[serde(default)]
    pub edges: Vec<Value>,
    #[serde(default)]
    pub logging: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawTab {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub order: Option<i64>,
}

/// Per-tab slice of the manifest's nodes and edges.
#[derive(Debug, Clone)]
pub struct Tab {
    pub id: String,
    pub name: String,
    pub order: i64,
    pub nodes: Vec<Value>,
    pub edges: Vec<Value>,
}

/// A referenced text file, read eagerly at load time.
#[derive(Debug, Clone)]
pub struct LoadedFile {
    /// Project-relative path as written in the referencing node.
    pub path: String,
    pub absolute_path: PathBuf,
    pub content: String,
}

/// A referenced tool source file.
#[derive(Debug, Clone)]
pub struct LoadedTool {
    /// Derived from the file stem; the node config may override it.
    pub name: String,
    pub path: String,
    pub absolute_path: PathBuf,
    pub code: String,
}

/// A fully loaded project. File maps are keyed by project-relative path.
#[derive(Debug, Clone)]
pub struct LoadedProject {
    pub path: PathBuf,
    pub name: String,
    pub version: String,
    pub tabs: Vec<Tab>,
    pub prompts: HashMap<String, LoadedFile>,
    pub tools: HashMap<String, LoadedTool>,
    pub callbacks: HashMap<String, LoadedFile>,
    pub schemas: HashMap<String, LoadedFile>,
    /// Raw `logging` manifest block; the runner interprets it.
    pub logging: Option<Value>,
}

impl LoadedProject {
    pub fn get_prompt(&self, path: &str) -> Option<&LoadedFile> {
        self.prompts.get(path)
    }

    pub fn get_tool(&self, path: &str) -> Option<&LoadedTool> {
        self.tools.get(path)
    }

    pub fn get_callback(&self, path: &str) -> Option<&LoadedFile> {
        self.callbacks.get(path)
    }

    pub fn get_schema(&self, path: &str) -> Option<&LoadedFile> {
        self.schemas.get(path)
    }

    pub fn tab(&self, tab_id: &str) -> Option<&Tab> {
        self.tabs.iter().find(|t| t.id == tab_id)
    }
}

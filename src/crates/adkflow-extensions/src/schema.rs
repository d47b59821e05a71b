//! Unit schema model emitted to the visual editor.
//!
//! The registry serializes one [`UnitSchema`] per unit: identity, scope, and
//! the UI interface (ports, fields, layout hints). Shapes follow the editor
//! contract; optional fields are omitted from the JSON when unset.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ExtensionError, Result};
use crate::unit::FlowUnit;

/// Where an extension was loaded from. Project shadows global per unit id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtensionScope {
    Global,
    Project,
    Builtin,
}

impl ExtensionScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtensionScope::Global => "global",
            ExtensionScope::Project => "project",
            ExtensionScope::Builtin => "builtin",
        }
    }
}

impl std::fmt::Display for ExtensionScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An input or output port on a unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortSpec {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub accepted_sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub accepted_types: Vec<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub multiple: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle_color: Option<String>,
    #[serde(default)]
    pub connection_only: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub widget: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,
    #[serde(default)]
    pub lazy: bool,
}

impl PortSpec {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            ..Default::default()
        }
    }
}

/// A configuration field rendered in the unit's property panel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub widget: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_if: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
}

/// The UI interface a unit presents: ports, fields, layout hints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnitInterface {
    #[serde(default)]
    pub inputs: Vec<PortSpec>,
    #[serde(default)]
    pub outputs: Vec<PortSpec>,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default)]
    pub expandable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collapsed_display: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle_layout: Option<String>,
}

/// The full schema record published per unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitSchema {
    pub unit_id: String,
    pub label: String,
    pub menu_location: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub version: String,
    pub scope: ExtensionScope,
    pub source_file: String,
    #[serde(default)]
    pub output_node: bool,
    #[serde(default)]
    pub always_execute: bool,
    pub ui: UnitInterface,
}

/// Generate the published schema for a unit.
pub fn generate_schema(
    unit: &dyn FlowUnit,
    source_file: &Path,
    scope: ExtensionScope,
) -> Result<UnitSchema> {
    if unit.unit_id().is_empty() {
        return Err(ExtensionError::Schema {
            unit_id: "<empty>".into(),
            message: "unit_id must not be empty".into(),
        });
    }

    Ok(UnitSchema {
        unit_id: unit.unit_id().to_string(),
        label: unit.ui_label().to_string(),
        menu_location: unit.menu_location().to_string(),
        description: unit.description().to_string(),
        version: unit.version().to_string(),
        scope,
        source_file: source_file.display().to_string(),
        output_node: unit.output_node(),
        always_execute: unit.always_execute(),
        ui: unit.setup_interface(),
    })
}

//! On-disk extension package discovery.
//!
//! A package is a directory whose initializer file is `extension.toml`. The
//! manifest declares units (schema plus a `behavior` binding into the
//! [`BehaviorCatalog`](crate::behavior::BehaviorCatalog)) and optionally hook
//! handlers. Directories prefixed `_` or `.` and directories without the
//! initializer are ignored.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use serde::Deserialize;
use serde_json::{json, Value};
use walkdir::WalkDir;

use adkflow_hooks::{HookHandler, HookName, HookResult, HookReturn, HookSpec};

use crate::behavior::UnitBehavior;
use crate::error::{ExtensionError, Result};
use crate::schema::UnitInterface;
use crate::unit::{ExecutionContext, FlowUnit, JsonMap};

/// Initializer file that makes a directory an extension package.
pub const MANIFEST_FILE: &str = "extension.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct PackageManifest {
    pub extension: ExtensionMeta,
    #[serde(default)]
    pub units: Vec<DeclaredUnitSpec>,
    #[serde(default)]
    pub hooks: Vec<DeclaredHookSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtensionMeta {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeclaredUnitSpec {
    pub unit_id: String,
    pub label: String,
    pub menu_location: String,
    pub behavior: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub output_node: bool,
    #[serde(default)]
    pub always_execute: bool,
    #[serde(default)]
    pub defaults: JsonMap,
    #[serde(default)]
    pub ui: UnitInterface,
}

fn default_hook_timeout() -> f64 {
    30.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeclaredHookSpec {
    pub hook: String,
    pub behavior: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_hook_timeout")]
    pub timeout_seconds: f64,
    #[serde(default)]
    pub id: Option<String>,
}

/// True when `path` is a loadable package directory.
pub fn is_package_dir(path: &Path) -> bool {
    if !path.is_dir() {
        return false;
    }
    match path.file_name().and_then(|n| n.to_str()) {
        Some(name) if name.starts_with('_') || name.starts_with('.') => return false,
        None => return false,
        _ => {}
    }
    path.join(MANIFEST_FILE).is_file()
}

/// Parse a package's manifest.
pub fn read_manifest(package_dir: &Path) -> Result<PackageManifest> {
    let manifest_path = package_dir.join(MANIFEST_FILE);
    let raw = std::fs::read_to_string(&manifest_path)?;
    toml::from_str(&raw).map_err(|e| ExtensionError::Manifest {
        path: manifest_path,
        message: e.to_string(),
    })
}

/// Latest modification time across every file in the package.
pub fn package_mtime(package_dir: &Path) -> SystemTime {
    let mut latest = SystemTime::UNIX_EPOCH;
    for entry in WalkDir::new(package_dir).into_iter().flatten() {
        if entry.file_type().is_file() {
            if let Ok(meta) = entry.metadata() {
                if let Ok(mtime) = meta.modified() {
                    if mtime > latest {
                        latest = mtime;
                    }
                }
            }
        }
    }
    latest
}

/// A manifest-declared unit bound to a catalog behavior.
pub struct DeclaredUnit {
    spec: DeclaredUnitSpec,
    behavior: Arc<dyn UnitBehavior>,
    version: String,
}

impl DeclaredUnit {
    pub fn new(
        spec: DeclaredUnitSpec,
        behavior: Arc<dyn UnitBehavior>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            spec,
            behavior,
            version: version.into(),
        }
    }
}

#[async_trait::async_trait]
impl FlowUnit for DeclaredUnit {
    fn unit_id(&self) -> &str {
        &self.spec.unit_id
    }

    fn ui_label(&self) -> &str {
        &self.spec.label
    }

    fn menu_location(&self) -> &str {
        &self.spec.menu_location
    }

    fn description(&self) -> &str {
        self.spec.description.as_deref().unwrap_or("")
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn output_node(&self) -> bool {
        self.spec.output_node
    }

    fn always_execute(&self) -> bool {
        self.spec.always_execute
    }

    fn setup_interface(&self) -> UnitInterface {
        self.spec.ui.clone()
    }

    fn is_changed(&self, config: &JsonMap, inputs: &JsonMap) -> Value {
        self.behavior.is_changed(config, inputs)
    }

    async fn run_process(
        &self,
        inputs: &JsonMap,
        config: &JsonMap,
        ctx: &ExecutionContext,
    ) -> Result<JsonMap> {
        // Manifest defaults fill config keys the editor left unset.
        let mut effective = self.spec.defaults.clone();
        for (key, value) in config {
            effective.insert(key.clone(), value.clone());
        }
        self.behavior.run(inputs, &effective, ctx).await
    }
}

/// Build a hook registration from a manifest `[[hooks]]` entry.
///
/// The behavior receives `{ "data": …, "hook": name }` as inputs and steers
/// the chain through an `action` key in its output map (`skip`, `abort`,
/// `replace`); anything else is CONTINUE.
pub fn build_hook_spec(
    package_name: &str,
    decl: &DeclaredHookSpec,
    behavior: Arc<dyn UnitBehavior>,
) -> Result<HookSpec> {
    let hook_name = HookName::parse(&decl.hook)
        .ok_or_else(|| adkflow_hooks::HookError::UnknownHook(decl.hook.clone()))?;
    let extension_id = decl
        .id
        .clone()
        .unwrap_or_else(|| format!("{package_name}:{}:{}", decl.hook, decl.behavior));

    let handler = HookHandler::async_fn(move |ctx, data| {
        let behavior = behavior.clone();
        async move {
            let exec_ctx = ExecutionContext {
                session_id: ctx.session_id.clone(),
                run_id: ctx.run_id.clone(),
                node_id: ctx.node_id.clone().unwrap_or_default(),
                node_name: ctx.node_name.clone().unwrap_or_default(),
                project_path: ctx.project_path.clone(),
                state: ctx
                    .state
                    .clone()
                    .unwrap_or_else(|| Arc::new(parking_lot::Mutex::new(JsonMap::new()))),
                emit: ctx.emit.clone(),
            };
            let mut inputs = JsonMap::new();
            inputs.insert("data".into(), data);
            inputs.insert("hook".into(), json!(ctx.hook_name.as_str()));

            let outputs = behavior
                .run(&inputs, &JsonMap::new(), &exec_ctx)
                .await
                .map_err(|e| e.to_string())?;

            Ok(match outputs.get("action").and_then(Value::as_str) {
                Some("skip") => HookReturn::Result(HookResult::skip()),
                Some("abort") => {
                    let message = outputs
                        .get("error")
                        .and_then(Value::as_str)
                        .unwrap_or("Aborted by extension hook");
                    HookReturn::Result(HookResult::abort(message))
                }
                Some("replace") => HookReturn::Result(HookResult::replace(
                    outputs.get("data").cloned().unwrap_or(Value::Null),
                )),
                _ => HookReturn::Pass,
            })
        }
    });

    Ok(HookSpec {
        hook_name,
        handler,
        priority: decl.priority,
        timeout_seconds: decl.timeout_seconds,
        method_name: format!("{package_name}::{}", decl.behavior),
        extension_id,
    })
}

/// Enumerate package directories under a scope root.
pub fn scan_packages(scope_root: &Path) -> Vec<PathBuf> {
    let mut packages = Vec::new();
    let Ok(entries) = std::fs::read_dir(scope_root) else {
        return packages;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if is_package_dir(&path) {
            packages.push(path);
        }
    }
    packages.sort();
    packages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::BehaviorCatalog;

    fn write_package(root: &Path, name: &str, manifest: &str) -> PathBuf {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(MANIFEST_FILE), manifest).unwrap();
        dir
    }

    const SAMPLE_MANIFEST: &str = r#"
[extension]
name = "sample"
version = "1.2.0"

[[units]]
unit_id = "sample.echo"
label = "Echo"
menu_location = "Custom/Samples"
behavior = "passthrough"
output_node = true

[[units.ui.inputs]]
id = "input"
label = "Input"

[[units.ui.outputs]]
id = "output"
label = "Output"

[[hooks]]
hook = "before_run"
behavior = "passthrough"
priority = 5
"#;

    #[test]
    fn scan_skips_hidden_and_manifestless_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        write_package(tmp.path(), "good", SAMPLE_MANIFEST);
        write_package(tmp.path(), "_private", SAMPLE_MANIFEST);
        write_package(tmp.path(), ".hidden", SAMPLE_MANIFEST);
        std::fs::create_dir_all(tmp.path().join("no_manifest")).unwrap();

        let found = scan_packages(tmp.path());
        assert_eq!(found.len(), 1);
        assert!(found[0].ends_with("good"));
    }

    #[test]
    fn manifest_parses_units_and_hooks() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = write_package(tmp.path(), "sample", SAMPLE_MANIFEST);
        let manifest = read_manifest(&dir).unwrap();

        assert_eq!(manifest.extension.name, "sample");
        assert_eq!(manifest.units.len(), 1);
        let unit = &manifest.units[0];
        assert_eq!(unit.unit_id, "sample.echo");
        assert!(unit.output_node);
        assert_eq!(unit.ui.inputs[0].id, "input");
        assert_eq!(manifest.hooks.len(), 1);
        assert_eq!(manifest.hooks[0].priority, 5);
    }

    #[test]
    fn invalid_manifest_reports_path() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = write_package(tmp.path(), "broken", "not [valid toml");
        let err = read_manifest(&dir).unwrap_err();
        assert!(matches!(err, ExtensionError::Manifest { .. }));
    }

    #[tokio::test]
    async fn declared_unit_merges_defaults_under_config() {
        let catalog = BehaviorCatalog::with_builtins();
        let spec = DeclaredUnitSpec {
            unit_id: "t".into(),
            label: "T".into(),
            menu_location: "A/B".into(),
            behavior: "template".into(),
            description: None,
            output_node: false,
            always_execute: false,
            defaults: {
                let mut m = JsonMap::new();
                m.insert("template".into(), json!("hi {who}"));
                m
            },
            ui: UnitInterface::default(),
        };
        let unit = DeclaredUnit::new(spec, catalog.get("template").unwrap(), "1.0");

        let mut inputs = JsonMap::new();
        inputs.insert("who".into(), json!("there"));
        let ctx = ExecutionContext {
            session_id: "s".into(),
            run_id: "r".into(),
            node_id: "n".into(),
            node_name: "N".into(),
            project_path: PathBuf::from("/tmp"),
            state: Arc::new(parking_lot::Mutex::new(JsonMap::new())),
            emit: None,
        };
        let out = unit.run_process(&inputs, &JsonMap::new(), &ctx).await.unwrap();
        assert_eq!(out.get("output"), Some(&json!("hi there")));
    }

    #[test]
    fn unknown_hook_name_is_rejected() {
        let catalog = BehaviorCatalog::with_builtins();
        let decl = DeclaredHookSpec {
            hook: "nonexistent_hook".into(),
            behavior: "passthrough".into(),
            priority: 0,
            timeout_seconds: 30.0,
            id: None,
        };
        let err = build_hook_spec("pkg", &decl, catalog.get("passthrough").unwrap()).unwrap_err();
        assert!(matches!(err, ExtensionError::Hook(_)));
    }
}

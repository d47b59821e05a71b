//! Dual-scope extension registry.
//!
//! Discovers FlowUnit packages from the global location
//! (`~/.adkflow/adkflow_extensions/`) and the project location
//! (`<project>/adkflow_extensions/`), generates editor schemas, registers
//! package-declared hooks, and hot-reloads packages when their files change.
//! Project scope shadows global scope per unit id.
//!
//! One instance is shared process-wide through [`get_registry`]; it holds
//! capabilities (units, schemas, behaviors), never per-run data.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, SystemTime};

use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use adkflow_hooks::{global_registry, HookName, HooksRegistry};

use crate::behavior::BehaviorCatalog;
use crate::discovery::{
    build_hook_spec, is_package_dir, package_mtime, read_manifest, scan_packages, DeclaredUnit,
    MANIFEST_FILE,
};
use crate::schema::{generate_schema, ExtensionScope, UnitSchema};
use crate::unit::FlowUnit;

/// Default watcher poll interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Conventional global extensions directory under the user's home.
pub fn default_global_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".adkflow").join("adkflow_extensions"))
}

/// Conventional project extensions directory.
pub fn project_extensions_path(project_root: &Path) -> PathBuf {
    project_root.join("adkflow_extensions")
}

#[derive(Default)]
struct Inner {
    units: HashMap<String, Arc<dyn FlowUnit>>,
    schemas: HashMap<String, UnitSchema>,
    source_files: HashMap<String, PathBuf>,
    scopes: HashMap<String, ExtensionScope>,
    package_units: HashMap<PathBuf, Vec<String>>,
    package_hooks: HashMap<PathBuf, Vec<(HookName, String)>>,
    mtimes: HashMap<PathBuf, SystemTime>,
    global_path: Option<PathBuf>,
    project_path: Option<PathBuf>,
}

pub struct ExtensionRegistry {
    inner: RwLock<Inner>,
    behaviors: BehaviorCatalog,
    hooks_registry: Arc<HooksRegistry>,
    watchers: Mutex<HashMap<ExtensionScope, tokio::task::JoinHandle<()>>>,
}

fn insert_menu_leaf(
    map: &mut serde_json::Map<String, Value>,
    branches: &[&str],
    leaf: &str,
    unit_id: &str,
) -> bool {
    match branches.split_first() {
        Some((part, rest)) => {
            let entry = map
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(serde_json::Map::new()));
            match entry.as_object_mut() {
                Some(next) => insert_menu_leaf(next, rest, leaf, unit_id),
                None => false,
            }
        }
        None => {
            let leaf_entry = map
                .entry(leaf.to_string())
                .or_insert_with(|| Value::Array(Vec::new()));
            if let Some(list) = leaf_entry.as_array_mut() {
                list.push(Value::String(unit_id.to_string()));
            }
            true
        }
    }
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::with_hooks_registry(global_registry())
    }

    pub fn with_hooks_registry(hooks_registry: Arc<HooksRegistry>) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            behaviors: BehaviorCatalog::with_builtins(),
            hooks_registry,
            watchers: Mutex::new(HashMap::new()),
        }
    }

    /// The behavior catalog declared units bind against.
    pub fn behaviors(&self) -> &BehaviorCatalog {
        &self.behaviors
    }

    // -------------------------------------------------------------------
    // Discovery
    // -------------------------------------------------------------------

    /// Discover global-scope extensions. Returns the number of units loaded.
    pub fn discover_global(&self, global_path: impl Into<PathBuf>) -> usize {
        let path = global_path.into();
        self.inner.write().global_path = Some(path.clone());
        self.discover_from_path(&path, ExtensionScope::Global)
    }

    /// Discover project-scope extensions. Returns the number of units loaded.
    pub fn discover_project(&self, project_path: impl Into<PathBuf>) -> usize {
        let path = project_path.into();
        self.inner.write().project_path = Some(path.clone());
        self.discover_from_path(&path, ExtensionScope::Project)
    }

    fn discover_from_path(&self, extensions_path: &Path, scope: ExtensionScope) -> usize {
        if !extensions_path.exists() {
            return 0;
        }
        let mut count = 0;
        for package_dir in scan_packages(extensions_path) {
            count += self.load_package(&package_dir, scope);
        }
        count
    }

    /// Load (or reload) one package directory. Returns units registered.
    fn load_package(&self, package_dir: &Path, scope: ExtensionScope) -> usize {
        self.unload_package(package_dir);

        let manifest = match read_manifest(package_dir) {
            Ok(manifest) => manifest,
            Err(error) => {
                tracing::warn!(package = %package_dir.display(), %error, "Failed to load extension package");
                return 0;
            }
        };
        let version = manifest
            .extension
            .version
            .clone()
            .unwrap_or_else(|| "0.1.0".to_string());
        let source_file = package_dir.join(MANIFEST_FILE);

        let mut count = 0;
        let mut unit_ids = Vec::new();
        {
            let mut inner = self.inner.write();
            for spec in &manifest.units {
                let Some(behavior) = self.behaviors.get(&spec.behavior) else {
                    tracing::warn!(
                        unit_id = %spec.unit_id,
                        behavior = %spec.behavior,
                        "Skipping unit with unknown behavior"
                    );
                    continue;
                };
                let unit: Arc<dyn FlowUnit> =
                    Arc::new(DeclaredUnit::new(spec.clone(), behavior, version.clone()));
                if register_unit_locked(&mut inner, unit, &source_file, scope) {
                    unit_ids.push(spec.unit_id.clone());
                    count += 1;
                }
            }
        }

        let mut hook_ids = Vec::new();
        for decl in &manifest.hooks {
            let Some(behavior) = self.behaviors.get(&decl.behavior) else {
                tracing::warn!(
                    hook = %decl.hook,
                    behavior = %decl.behavior,
                    "Skipping hook with unknown behavior"
                );
                continue;
            };
            match build_hook_spec(&manifest.extension.name, decl, behavior) {
                Ok(spec) => {
                    let key = (spec.hook_name, spec.extension_id.clone());
                    if let Err(error) = self.hooks_registry.register(spec) {
                        tracing::warn!(package = %package_dir.display(), %error, "Hook registration failed");
                    } else {
                        hook_ids.push(key);
                    }
                }
                Err(error) => {
                    tracing::warn!(package = %package_dir.display(), %error, "Invalid hook declaration");
                }
            }
        }

        let mut inner = self.inner.write();
        inner
            .package_units
            .insert(package_dir.to_path_buf(), unit_ids);
        inner
            .package_hooks
            .insert(package_dir.to_path_buf(), hook_ids);
        inner
            .mtimes
            .insert(package_dir.to_path_buf(), package_mtime(package_dir));

        tracing::debug!(
            package = %package_dir.display(),
            scope = %scope,
            units = count,
            "Loaded extension package"
        );
        count
    }

    /// Drop a package's units and hooks.
    fn unload_package(&self, package_dir: &Path) {
        let (unit_ids, hook_ids) = {
            let mut inner = self.inner.write();
            let unit_ids = inner.package_units.remove(package_dir).unwrap_or_default();
            let hook_ids = inner.package_hooks.remove(package_dir).unwrap_or_default();
            inner.mtimes.remove(package_dir);
            for unit_id in &unit_ids {
                inner.units.remove(unit_id);
                inner.schemas.remove(unit_id);
                inner.source_files.remove(unit_id);
                inner.scopes.remove(unit_id);
            }
            (unit_ids, hook_ids)
        };
        for (hook_name, extension_id) in hook_ids {
            self.hooks_registry.unregister(hook_name, &extension_id);
        }
        if !unit_ids.is_empty() {
            tracing::debug!(package = %package_dir.display(), "Unloaded extension package");
        }
    }

    /// Register native FlowUnit implementations at builtin scope.
    pub fn register_builtin_units(&self, units: Vec<Arc<dyn FlowUnit>>) -> usize {
        let mut inner = self.inner.write();
        let mut count = 0;
        for unit in units {
            if register_unit_locked(&mut inner, unit, Path::new("<builtin>"), ExtensionScope::Builtin)
            {
                count += 1;
            }
        }
        count
    }

    // -------------------------------------------------------------------
    // Hot reload
    // -------------------------------------------------------------------

    /// Check one scope's packages for additions and modifications.
    pub fn check_for_changes(&self, scope: ExtensionScope) {
        let Some(scope_path) = self.scope_path(scope) else {
            return;
        };
        if !scope_path.exists() {
            return;
        }

        for package_dir in scan_packages(&scope_path) {
            if !is_package_dir(&package_dir) {
                continue;
            }
            let latest = package_mtime(&package_dir);
            let known = self.inner.read().mtimes.get(&package_dir).copied();
            match known {
                None => {
                    tracing::info!(
                        package = %package_dir.display(),
                        scope = %scope,
                        "New extension package"
                    );
                    self.load_package(&package_dir, scope);
                }
                Some(stored) if stored < latest => {
                    tracing::info!(
                        package = %package_dir.display(),
                        scope = %scope,
                        "Reloading extension package"
                    );
                    self.load_package(&package_dir, scope);
                }
                Some(_) => {}
            }
        }
    }

    fn scope_path(&self, scope: ExtensionScope) -> Option<PathBuf> {
        let inner = self.inner.read();
        match scope {
            ExtensionScope::Global => inner.global_path.clone(),
            ExtensionScope::Project => inner.project_path.clone(),
            ExtensionScope::Builtin => None,
        }
    }

    /// Start the mtime-poll watcher for a scope. Replaces a prior watcher.
    pub fn start_watching(self: &Arc<Self>, scope: ExtensionScope, poll_interval: Duration) {
        if scope == ExtensionScope::Builtin {
            return;
        }
        self.stop_watching(scope);
        let registry = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(poll_interval).await;
                registry.check_for_changes(scope);
            }
        });
        self.watchers.lock().insert(scope, handle);
    }

    pub fn stop_watching(&self, scope: ExtensionScope) {
        if let Some(handle) = self.watchers.lock().remove(&scope) {
            handle.abort();
        }
    }

    pub fn stop_all_watchers(&self) {
        let mut watchers = self.watchers.lock();
        for (_, handle) in watchers.drain() {
            handle.abort();
        }
    }

    // -------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------

    pub fn get_unit(&self, unit_id: &str) -> Option<Arc<dyn FlowUnit>> {
        self.inner.read().units.get(unit_id).cloned()
    }

    pub fn get_schema(&self, unit_id: &str) -> Option<UnitSchema> {
        self.inner.read().schemas.get(unit_id).cloned()
    }

    pub fn get_all_schemas(&self) -> Vec<UnitSchema> {
        let inner = self.inner.read();
        let mut schemas: Vec<_> = inner.schemas.values().cloned().collect();
        schemas.sort_by(|a, b| a.unit_id.cmp(&b.unit_id));
        schemas
    }

    pub fn get_scope(&self, unit_id: &str) -> Option<ExtensionScope> {
        self.inner.read().scopes.get(unit_id).copied()
    }

    pub fn unit_count(&self) -> usize {
        self.inner.read().units.len()
    }

    /// Hierarchical menu grouping of schemas by `menu_location`, split on `/`.
    /// Interior keys are objects; leaves are arrays of unit ids.
    pub fn get_menu_tree(&self) -> Value {
        let schemas = self.get_all_schemas();
        let mut tree = serde_json::Map::new();
        for schema in schemas {
            let parts: Vec<&str> = schema.menu_location.split('/').collect();
            let (leaf, branches) = match parts.split_last() {
                Some(split) => split,
                None => continue,
            };

            let inserted = insert_menu_leaf(&mut tree, branches, leaf, &schema.unit_id);
            if !inserted {
                tracing::warn!(
                    menu_location = %schema.menu_location,
                    "Menu location conflicts with an existing leaf"
                );
                continue;
            }
        }
        Value::Object(tree)
    }

    // -------------------------------------------------------------------
    // Reload and teardown
    // -------------------------------------------------------------------

    /// Force reload from both locations (global first, so project wins ties).
    pub fn reload_all(&self) -> usize {
        let (global_path, project_path, packages) = {
            let inner = self.inner.read();
            (
                inner.global_path.clone(),
                inner.project_path.clone(),
                inner.package_units.keys().cloned().collect::<Vec<_>>(),
            )
        };
        for package in packages {
            self.unload_package(&package);
        }
        {
            let mut inner = self.inner.write();
            inner.units.clear();
            inner.schemas.clear();
            inner.source_files.clear();
            inner.scopes.clear();
            inner.mtimes.clear();
        }

        let mut count = 0;
        if let Some(path) = global_path {
            count += self.discover_from_path(&path, ExtensionScope::Global);
        }
        if let Some(path) = project_path {
            count += self.discover_from_path(&path, ExtensionScope::Project);
        }
        count
    }

    pub fn reload_global(&self) -> usize {
        self.reload_scope(ExtensionScope::Global)
    }

    pub fn reload_project(&self) -> usize {
        self.reload_scope(ExtensionScope::Project)
    }

    fn reload_scope(&self, scope: ExtensionScope) -> usize {
        let Some(scope_path) = self.scope_path(scope) else {
            return 0;
        };
        let packages: Vec<PathBuf> = {
            let inner = self.inner.read();
            inner
                .package_units
                .keys()
                .filter(|p| p.starts_with(&scope_path))
                .cloned()
                .collect()
        };
        for package in packages {
            self.unload_package(&package);
        }
        self.discover_from_path(&scope_path, scope)
    }

    /// Drop all project-scope extensions and stop the project watcher.
    /// This is the switch-projects operation.
    pub fn clear_project(&self) {
        self.stop_watching(ExtensionScope::Project);

        let project_path = { self.inner.read().project_path.clone() };
        if let Some(path) = project_path {
            let packages: Vec<PathBuf> = {
                let inner = self.inner.read();
                inner
                    .package_units
                    .keys()
                    .filter(|p| p.starts_with(&path))
                    .cloned()
                    .collect()
            };
            for package in packages {
                self.unload_package(&package);
            }
        }

        let mut inner = self.inner.write();
        let project_units: Vec<String> = inner
            .scopes
            .iter()
            .filter(|(_, scope)| **scope == ExtensionScope::Project)
            .map(|(id, _)| id.clone())
            .collect();
        for unit_id in project_units {
            inner.units.remove(&unit_id);
            inner.schemas.remove(&unit_id);
            inner.source_files.remove(&unit_id);
            inner.scopes.remove(&unit_id);
        }
        inner.project_path = None;
    }

    /// Full teardown: stop watchers and drop every registration.
    pub fn clear_all(&self) {
        self.stop_all_watchers();
        let packages: Vec<PathBuf> = {
            self.inner.read().package_units.keys().cloned().collect()
        };
        for package in packages {
            self.unload_package(&package);
        }
        let mut inner = self.inner.write();
        *inner = Inner::default();
    }
}

impl Default for ExtensionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn register_unit_locked(
    inner: &mut Inner,
    unit: Arc<dyn FlowUnit>,
    source_file: &Path,
    scope: ExtensionScope,
) -> bool {
    let unit_id = unit.unit_id().to_string();

    // Project wins over global for the same id; never the other way around.
    if inner.scopes.get(&unit_id) == Some(&ExtensionScope::Project)
        && scope == ExtensionScope::Global
    {
        tracing::debug!(
            unit_id = %unit_id,
            "Skipping global unit, project version takes precedence"
        );
        return false;
    }

    let schema = match generate_schema(unit.as_ref(), source_file, scope) {
        Ok(schema) => schema,
        Err(error) => {
            tracing::warn!(unit_id = %unit_id, %error, "Schema generation failed");
            return false;
        }
    };

    inner.units.insert(unit_id.clone(), unit);
    inner.schemas.insert(unit_id.clone(), schema);
    inner
        .source_files
        .insert(unit_id.clone(), source_file.to_path_buf());
    inner.scopes.insert(unit_id, scope);
    true
}

static GLOBAL_REGISTRY: OnceLock<Arc<ExtensionRegistry>> = OnceLock::new();

/// The process-wide registry. Created on first use.
pub fn get_registry() -> Arc<ExtensionRegistry> {
    GLOBAL_REGISTRY
        .get_or_init(|| Arc::new(ExtensionRegistry::new()))
        .clone()
}

/// Reset the process-wide registry. Tests and project-close share this path.
pub fn reset_registry() {
    if let Some(registry) = GLOBAL_REGISTRY.get() {
        registry.clear_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ECHO_PKG: &str = r#"
[extension]
name = "echo"

[[units]]
unit_id = "pkg.echo"
label = "Echo"
menu_location = "Custom/Text/Echo"
behavior = "passthrough"
"#;

    fn write_package(root: &Path, name: &str, manifest: &str) {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(MANIFEST_FILE), manifest).unwrap();
    }

    fn fresh_registry() -> Arc<ExtensionRegistry> {
        Arc::new(ExtensionRegistry::with_hooks_registry(Arc::new(
            HooksRegistry::new(),
        )))
    }

    #[test]
    fn discover_registers_declared_units() {
        let tmp = tempfile::tempdir().unwrap();
        write_package(tmp.path(), "echo", ECHO_PKG);

        let registry = fresh_registry();
        let count = registry.discover_project(tmp.path());
        assert_eq!(count, 1);
        assert!(registry.get_unit("pkg.echo").is_some());
        assert_eq!(registry.get_scope("pkg.echo"), Some(ExtensionScope::Project));
        let schema = registry.get_schema("pkg.echo").unwrap();
        assert_eq!(schema.label, "Echo");
    }

    #[test]
    fn project_shadows_global_unit_id() {
        let global = tempfile::tempdir().unwrap();
        let project = tempfile::tempdir().unwrap();
        write_package(global.path(), "echo", ECHO_PKG);
        write_package(
            project.path(),
            "echo",
            &ECHO_PKG.replace("label = \"Echo\"", "label = \"Project Echo\""),
        );

        let registry = fresh_registry();
        // Project loads first; later global discovery must not replace it.
        registry.discover_project(project.path());
        registry.discover_global(global.path());

        assert_eq!(registry.get_scope("pkg.echo"), Some(ExtensionScope::Project));
        assert_eq!(registry.get_schema("pkg.echo").unwrap().label, "Project Echo");
    }

    #[test]
    fn clear_project_drops_project_units() {
        let tmp = tempfile::tempdir().unwrap();
        write_package(tmp.path(), "echo", ECHO_PKG);

        let registry = fresh_registry();
        registry.discover_project(tmp.path());
        assert_eq!(registry.unit_count(), 1);

        registry.clear_project();
        assert_eq!(registry.unit_count(), 0);
        assert!(registry.get_unit("pkg.echo").is_none());
    }

    #[test]
    fn package_hooks_register_and_unload() {
        let tmp = tempfile::tempdir().unwrap();
        write_package(
            tmp.path(),
            "hooked",
            r#"
[extension]
name = "hooked"

[[hooks]]
hook = "before_run"
behavior = "passthrough"
"#,
        );

        let hooks = Arc::new(HooksRegistry::new());
        let registry = Arc::new(ExtensionRegistry::with_hooks_registry(hooks.clone()));
        registry.discover_project(tmp.path());
        assert!(hooks.has_hooks(HookName::BeforeRun));

        registry.clear_project();
        assert!(!hooks.has_hooks(HookName::BeforeRun));
    }

    #[test]
    fn menu_tree_groups_by_location() {
        let tmp = tempfile::tempdir().unwrap();
        write_package(tmp.path(), "echo", ECHO_PKG);
        write_package(
            tmp.path(),
            "other",
            &ECHO_PKG
                .replace("pkg.echo", "pkg.other")
                .replace("Custom/Text/Echo", "Custom/Math"),
        );

        let registry = fresh_registry();
        registry.discover_project(tmp.path());

        let tree = registry.get_menu_tree();
        assert_eq!(tree["Custom"]["Text"]["Echo"], serde_json::json!(["pkg.echo"]));
        assert_eq!(tree["Custom"]["Math"], serde_json::json!(["pkg.other"]));
    }

    #[tokio::test]
    async fn watcher_picks_up_new_package() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = fresh_registry();
        registry.discover_project(tmp.path());
        assert_eq!(registry.unit_count(), 0);

        registry.start_watching(ExtensionScope::Project, Duration::from_millis(20));
        write_package(tmp.path(), "late", ECHO_PKG);

        let mut found = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if registry.get_unit("pkg.echo").is_some() {
                found = true;
                break;
            }
        }
        registry.stop_all_watchers();
        assert!(found, "watcher never discovered the new package");
    }

    #[test]
    fn reload_all_restores_shadowed_precedence() {
        let global = tempfile::tempdir().unwrap();
        let project = tempfile::tempdir().unwrap();
        write_package(global.path(), "echo", ECHO_PKG);
        write_package(
            project.path(),
            "echo",
            &ECHO_PKG.replace("label = \"Echo\"", "label = \"Project Echo\""),
        );

        let registry = fresh_registry();
        registry.discover_global(global.path());
        registry.discover_project(project.path());

        // Global loads first, then project replaces it for the shared id.
        let count = registry.reload_all();
        assert_eq!(count, 2);
        assert_eq!(registry.get_scope("pkg.echo"), Some(ExtensionScope::Project));
        assert_eq!(registry.get_schema("pkg.echo").unwrap().label, "Project Echo");
    }
}

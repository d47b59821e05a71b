//! Extension plane: pluggable FlowUnit computation nodes.
//!
//! Units come from three places:
//! - **Builtin**: native [`unit::FlowUnit`] implementations registered by the
//!   host process.
//! - **Global packages**: `~/.adkflow/adkflow_extensions/<pkg>/extension.toml`.
//! - **Project packages**: `<project>/adkflow_extensions/<pkg>/extension.toml`.
//!
//! Declarative packages bind unit schemas to named behaviors from the
//! [`behavior::BehaviorCatalog`], and may attach lifecycle hooks. The
//! [`registry::ExtensionRegistry`] owns precedence (project shadows global),
//! schema generation for the editor, and mtime-poll hot reload.

pub mod behavior;
pub mod discovery;
pub mod error;
pub mod registry;
pub mod schema;
pub mod unit;

pub use behavior::{BehaviorCatalog, UnitBehavior};
pub use discovery::{DeclaredHookSpec, DeclaredUnitSpec, PackageManifest, MANIFEST_FILE};
pub use error::{ExtensionError, Result};
pub use registry::{
    default_global_path, get_registry, project_extensions_path, reset_registry,
    ExtensionRegistry, DEFAULT_POLL_INTERVAL,
};
pub use schema::{ExtensionScope, FieldSpec, PortSpec, UnitInterface, UnitSchema};
pub use unit::{lazy_input_ids, ExecutionContext, FlowUnit, JsonMap, SharedState, UnitEmitFn};

//! Workflow compiler.
//!
//! Pipeline: loader → flow parser → graph builder → global-variable
//! substitution → IR transformer → validator. [`Compiler::compile`] chains
//! the stages; each stage is usable on its own.

pub mod config;
pub mod error;
pub mod graph;
pub mod hierarchy;
pub mod ir;
pub mod loader;
pub mod parser;
pub mod project;
pub mod substitution;
pub mod transformer;
pub mod validator;

use std::path::Path;
use std::sync::Arc;

use adkflow_extensions::ExtensionRegistry;

pub use config::ExecutionConfig;
pub use error::{CompilationError, ErrorLocation, Result};
pub use graph::{EdgeSemantics, GraphBuilder, WorkflowGraph};
pub use ir::WorkflowIR;
pub use loader::ProjectLoader;
pub use parser::FlowParser;
pub use project::LoadedProject;
pub use substitution::{collect_global_variables, substitute_globals};
pub use transformer::IRTransformer;
pub use validator::{ValidationReport, WorkflowValidator};

pub struct Compiler {
    config: ExecutionConfig,
    registry: Option<Arc<ExtensionRegistry>>,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    pub fn new() -> Self {
        Self {
            config: ExecutionConfig::default(),
            registry: None,
        }
    }

    pub fn with_config(config: ExecutionConfig) -> Self {
        Self {
            config,
            registry: None,
        }
    }

    /// Use a specific extension registry for custom-node metadata.
    pub fn with_registry(mut self, registry: Arc<ExtensionRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Compile a project directory into a validated [`WorkflowIR`].
    pub fn compile(&self, path: impl AsRef<Path>) -> Result<WorkflowIR> {
        let path = path.as_ref();
        tracing::debug!(project = %path.display(), "Compiling workflow");

        let project = ProjectLoader::new(self.config.clone()).load(path)?;
        let parsed = FlowParser::new().parse_project(&project)?;
        let mut graph = GraphBuilder::new().build(&parsed)?;

        let globals = collect_global_variables(&graph);
        substitute_globals(&mut graph, &globals);

        let mut transformer = IRTransformer::new(self.config.clone());
        if let Some(registry) = &self.registry {
            transformer = transformer.with_registry(registry.clone());
        }
        let ir = transformer.transform(&graph, &project)?;

        if self.config.validate {
            let report = WorkflowValidator::new().validate(&graph, &ir);
            if !report.is_valid() {
                return Err(CompilationError::Validation(report.error_summary()));
            }
        }

        Ok(ir)
    }
}

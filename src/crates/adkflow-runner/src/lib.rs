//! Workflow execution engine.
//!
//! The runner drives a compiled [`adkflow_compiler::WorkflowIR`] end to end:
//! the layered [`graph_executor`] runs custom FlowUnit nodes, the
//! [`agent_factory`] tree drives LLM agents through the [`sdk`] boundary
//! with per-agent [`callbacks`], the [`shell`] and [`context_aggregator`]
//! modules back the built-in tools, and [`workflow_runner`] orchestrates a
//! run with hooks, user-input pauses, output files, and events.

pub mod agent_factory;
pub mod cache;
pub mod callbacks;
pub mod context_aggregator;
pub mod engine;
pub mod error;
pub mod events;
pub mod graph_executor;
pub mod sdk;
pub mod shell;
pub mod units;
pub mod user_input;
pub mod workflow_runner;

pub use agent_factory::{AgentFactory, AgentNode, AgentTreeRunner};
pub use cache::ExecutionCache;
pub use callbacks::{
    CallbackContext, CallbackError, CallbackHandler, CallbackMethod, CallbackOutcome,
    CallbackRegistry, Capabilities, ErrorPolicy, SdkCallbacks,
};
pub use context_aggregator::execute_context_aggregator;
pub use engine::{format_error, process_sdk_event, write_output_files};
pub use error::{Result, RunnerError};
pub use events::{EmitFn, EventType, JsonMap, RunEvent, RunResult, RunStatus};
pub use graph_executor::{
    build_execution_graph, partition_custom_nodes, ExecutionGraph, ExecutionNode, GraphExecutor,
};
pub use sdk::{
    AgentSdk, AgentSpec, EventPart, EventView, FinishReason, SdkEvent, SdkEventStream, StaticSdk,
    ToolDecl,
};
pub use shell::{
    create_shell_tool, CommandValidator, ExecutionResult, OutputMode, ShellExecutor, ShellTool,
    ShellWrappers, ValidationResult,
};
pub use units::register_runner_behaviors;
pub use user_input::{handle_user_input, UserInputBroker};
pub use workflow_runner::{run_workflow, RunConfig, WorkflowRunner};

//! Agent-local callback plane: registries, handler chains, and the
//! materialized SDK-facing executor.

pub mod executor;
pub mod registry;
pub mod types;

pub use executor::SdkCallbacks;
pub use registry::CallbackRegistry;
pub use types::{
    CallbackContext, CallbackError, CallbackHandler, CallbackMethod, CallbackOutcome,
    Capabilities, ErrorPolicy, LlmRequest, LlmResponse, SharedState,
};

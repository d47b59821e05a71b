//! Compiler execution configuration.

/// Knobs shared by the loader and transformer.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionConfig {
    /// Model assigned to agents that do not name one.
    pub default_model: String,
    /// Temperature assigned to agents that do not set one.
    pub default_temperature: f64,
    /// Skip reading prompt/context files when false.
    pub load_prompts: bool,
    /// Skip reading tool files when false.
    pub load_tools: bool,
    /// Run the validator after transformation.
    pub validate: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            default_model: "gemini-2.0-flash".to_string(),
            default_temperature: 0.7,
            load_prompts: true,
            load_tools: true,
            validate: true,
        }
    }
}

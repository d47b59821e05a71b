//! Runner-provided unit behaviors.
//!
//! The extension crate ships data-only builtin behaviors; the runner adds
//! the ones that need subprocess or network access. Hosts call
//! [`register_runner_behaviors`] once at startup so declarative packages can
//! bind to them.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use adkflow_compiler::ir::ErrorBehavior;
use adkflow_extensions::{
    ExecutionContext, ExtensionError, ExtensionRegistry, JsonMap, UnitBehavior,
};

use crate::shell::{create_shell_tool, OutputMode, ShellExecutor, ShellWrappers};

/// Register the runner's behaviors into a registry's catalog.
pub fn register_runner_behaviors(registry: &ExtensionRegistry) {
    registry.behaviors().register(Arc::new(ShellCommandBehavior));
    registry.behaviors().register(Arc::new(HttpFetchBehavior));
}

/// Runs a whitelisted shell command.
///
/// Config: `command` (fallback: `command` input), `allowed_patterns`,
/// `timeout`, `output_mode`, `working_directory` (project-relative),
/// `error_behavior`.
pub struct ShellCommandBehavior;

#[async_trait]
impl UnitBehavior for ShellCommandBehavior {
    fn name(&self) -> &str {
        "shell_command"
    }

    async fn run(
        &self,
        inputs: &JsonMap,
        config: &JsonMap,
        ctx: &ExecutionContext,
    ) -> Result<JsonMap, ExtensionError> {
        let command = config
            .get("command")
            .or_else(|| inputs.get("command"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        if command.is_empty() {
            return Err(ExtensionError::InvalidConfig {
                unit_id: "shell_command".into(),
                message: "no command configured".into(),
            });
        }

        let allowed_patterns: Vec<String> = config
            .get("allowed_patterns")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let working_directory = config
            .get("working_directory")
            .and_then(Value::as_str)
            .map(|dir| ctx.project_path.join(dir))
            .or_else(|| Some(ctx.project_path.clone()));

        let executor = ShellExecutor {
            working_directory,
            timeout: Duration::from_secs_f64(
                config.get("timeout").and_then(Value::as_f64).unwrap_or(30.0),
            ),
            output_mode: OutputMode::parse(
                config
                    .get("output_mode")
                    .and_then(Value::as_str)
                    .unwrap_or("combined"),
            ),
            ..Default::default()
        };
        let error_behavior = ErrorBehavior::parse(
            config
                .get("error_behavior")
                .and_then(Value::as_str)
                .unwrap_or("pass_to_model"),
        );

        let tool = create_shell_tool(
            allowed_patterns,
            executor,
            error_behavior,
            ShellWrappers::default(),
        );
        let response = tool
            .call(&command)
            .await
            .map_err(|e| ExtensionError::execution("shell_command", e.to_string()))?;

        let mut outputs = JsonMap::new();
        outputs.insert(
            "output".into(),
            response.get("output").cloned().unwrap_or(Value::Null),
        );
        outputs.insert(
            "exit_code".into(),
            response.get("exit_code").cloned().unwrap_or(json!(-1)),
        );
        outputs.insert(
            "success".into(),
            response.get("success").cloned().unwrap_or(json!(false)),
        );
        if let Some(error) = response.get("error") {
            outputs.insert("error".into(), error.clone());
        }
        Ok(outputs)
    }
}

/// Fetches a URL into the `output` port. Failures become inline placeholder
/// strings, matching the context-aggregator convention.
pub struct HttpFetchBehavior;

#[async_trait]
impl UnitBehavior for HttpFetchBehavior {
    fn name(&self) -> &str {
        "http_fetch"
    }

    async fn run(
        &self,
        inputs: &JsonMap,
        config: &JsonMap,
        _ctx: &ExecutionContext,
    ) -> Result<JsonMap, ExtensionError> {
        let url = config
            .get("url")
            .or_else(|| inputs.get("url"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();

        let timeout = config
            .get("timeout")
            .and_then(Value::as_f64)
            .unwrap_or(30.0);

        let mut outputs = JsonMap::new();
        if url.is_empty() {
            outputs.insert("output".into(), json!(""));
            return Ok(outputs);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs_f64(timeout))
            .build()
            .map_err(|e| ExtensionError::execution("http_fetch", e.to_string()))?;

        match client.get(&url).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                outputs.insert("output".into(), json!(body));
                outputs.insert("status".into(), json!(status));
            }
            Err(error) if error.is_timeout() => {
                outputs.insert("output".into(), json!(format!("[Timeout fetching {url}]")));
            }
            Err(error) => {
                outputs.insert(
                    "output".into(),
                    json!(format!("[Error fetching {url}: {error}]")),
                );
            }
        }
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adkflow_hooks::HooksRegistry;
    use std::path::PathBuf;

    fn ctx(project_path: PathBuf) -> ExecutionContext {
        ExecutionContext {
            session_id: "s".into(),
            run_id: "r".into(),
            node_id: "n".into(),
            node_name: "N".into(),
            project_path,
            state: Arc::new(parking_lot::Mutex::new(JsonMap::new())),
            emit: None,
        }
    }

    #[test]
    fn behaviors_register_into_catalog() {
        let registry =
            ExtensionRegistry::with_hooks_registry(Arc::new(HooksRegistry::new()));
        register_runner_behaviors(&registry);
        assert!(registry.behaviors().get("shell_command").is_some());
        assert!(registry.behaviors().get("http_fetch").is_some());
    }

    #[tokio::test]
    async fn shell_behavior_runs_whitelisted_command() {
        let tmp = tempfile::tempdir().unwrap();
        let behavior = ShellCommandBehavior;
        let mut config = JsonMap::new();
        config.insert("command".into(), json!("echo unit"));
        config.insert("allowed_patterns".into(), json!(["echo:*"]));

        let outputs = behavior
            .run(&JsonMap::new(), &config, &ctx(tmp.path().to_path_buf()))
            .await
            .unwrap();
        assert_eq!(outputs["success"], json!(true));
        assert_eq!(outputs["output"].as_str().unwrap().trim(), "unit");
    }

    #[tokio::test]
    async fn shell_behavior_reports_blocked_command() {
        let tmp = tempfile::tempdir().unwrap();
        let behavior = ShellCommandBehavior;
        let mut config = JsonMap::new();
        config.insert("command".into(), json!("rm -rf /"));
        config.insert("allowed_patterns".into(), json!(["echo:*"]));

        let outputs = behavior
            .run(&JsonMap::new(), &config, &ctx(tmp.path().to_path_buf()))
            .await
            .unwrap();
        assert!(outputs["error"].as_str().unwrap().contains("not in allowed list"));
    }
}

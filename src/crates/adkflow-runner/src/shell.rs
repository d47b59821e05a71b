//! Shell command execution with whitelist-based validation.
//!
//! Pattern format is `command:args_glob`:
//! - `git:*` allows any git invocation
//! - `npm:install *` allows npm install with any package
//! - `ls:-la` allows exactly `ls -la`
//! - `pwd:` (or `pwd` without a colon) allows the bare command only
//!
//! Validation rejects metacharacters that enable chaining or substitution
//! before any pattern matching happens.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use adkflow_compiler::ir::ErrorBehavior;

use crate::error::{Result, RunnerError};

/// Patterns that enable injection or chaining; always rejected.
const DANGEROUS_PATTERNS: &[&str] = &[
    "$(", "`", "${", "&&", "||", ">>", "<<", "|", ";", "&", ">", "<",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// stdout and stderr interleaved.
    Combined,
    Stdout,
    Stderr,
    /// Separate stdout and stderr fields.
    Both,
}

impl OutputMode {
    pub fn parse(raw: &str) -> OutputMode {
        match raw {
            "stdout" => OutputMode::Stdout,
            "stderr" => OutputMode::Stderr,
            "both" => OutputMode::Both,
            _ => OutputMode::Combined,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationResult {
    pub allowed: bool,
    pub command: String,
    pub arguments: String,
    pub matched_pattern: Option<String>,
    pub error: Option<String>,
}

impl ValidationResult {
    fn blocked(command: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            allowed: false,
            command: command.into(),
            arguments: String::new(),
            matched_pattern: None,
            error: Some(error.into()),
        }
    }
}

/// Validates commands against `command:args_glob` whitelist patterns.
pub struct CommandValidator {
    patterns: Vec<(String, String)>,
}

impl CommandValidator {
    pub fn new<I, S>(allowed_patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut patterns = Vec::new();
        for pattern in allowed_patterns {
            let pattern = pattern.as_ref().trim();
            if pattern.is_empty() || pattern.starts_with('#') {
                continue;
            }
            match pattern.split_once(':') {
                Some((cmd, args)) => {
                    patterns.push((cmd.trim().to_string(), args.trim().to_string()));
                }
                None => patterns.push((pattern.to_string(), String::new())),
            }
        }
        Self { patterns }
    }

    pub fn validate(&self, command: &str) -> ValidationResult {
        let command = command.trim();
        if command.is_empty() {
            return ValidationResult::blocked("", "Empty command");
        }

        for pattern in DANGEROUS_PATTERNS {
            if command.contains(pattern) {
                return ValidationResult::blocked(
                    command,
                    format!("Command contains dangerous pattern: {pattern}"),
                );
            }
        }

        let Some(parts) = shlex::split(command) else {
            return ValidationResult::blocked(command, "Invalid command syntax");
        };
        let Some((cmd_name, args)) = parts.split_first() else {
            return ValidationResult::blocked("", "Empty command after parsing");
        };
        let cmd_args = args.join(" ");

        for (pattern_cmd, pattern_args) in &self.patterns {
            if cmd_name != pattern_cmd {
                continue;
            }
            let matched = if pattern_args.is_empty() {
                cmd_args.is_empty()
            } else if pattern_args == "*" {
                true
            } else {
                glob::Pattern::new(pattern_args)
                    .map(|p| p.matches(&cmd_args))
                    .unwrap_or(false)
            };
            if matched {
                return ValidationResult {
                    allowed: true,
                    command: cmd_name.clone(),
                    arguments: cmd_args,
                    matched_pattern: Some(format!("{pattern_cmd}:{pattern_args}")),
                    error: None,
                };
            }
        }

        ValidationResult {
            allowed: false,
            command: cmd_name.clone(),
            arguments: cmd_args,
            matched_pattern: None,
            error: Some(format!("Command '{cmd_name}' not in allowed list")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub output: String,
    pub exit_code: i32,
    pub success: bool,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub error: Option<String>,
    pub truncated: bool,
}

/// Async subprocess execution with timeout and output truncation.
pub struct ShellExecutor {
    pub working_directory: Option<PathBuf>,
    pub timeout: Duration,
    pub output_mode: OutputMode,
    pub max_output_size: usize,
    pub shell: String,
    pub environment_variables: HashMap<String, String>,
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self {
            working_directory: None,
            timeout: Duration::from_secs(30),
            output_mode: OutputMode::Combined,
            max_output_size: 100_000,
            shell: "bash".to_string(),
            environment_variables: HashMap::new(),
        }
    }
}

impl ShellExecutor {
    pub async fn execute(&self, command: &str) -> ExecutionResult {
        // Combined mode lets the shell interleave the streams itself.
        let combined = self.output_mode == OutputMode::Combined;
        let mut cmd = Command::new(&self.shell);
        if combined {
            cmd.arg("-c").arg(format!("{command} 2>&1"));
        } else {
            cmd.arg("-c").arg(command);
        }
        cmd.stdout(Stdio::piped());
        cmd.stderr(if combined { Stdio::null() } else { Stdio::piped() });
        if let Some(cwd) = &self.working_directory {
            cmd.current_dir(cwd);
        }
        for (key, value) in &self.environment_variables {
            cmd.env(key, value);
        }
        cmd.kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(error) => {
                return ExecutionResult {
                    output: String::new(),
                    exit_code: -1,
                    success: false,
                    stdout: None,
                    stderr: None,
                    error: Some(format!("Failed to execute command: {error}")),
                    truncated: false,
                };
            }
        };

        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();

        let waited = tokio::time::timeout(self.timeout, async {
            let mut stdout_buf = Vec::new();
            let mut stderr_buf = Vec::new();
            if let Some(pipe) = stdout_pipe.as_mut() {
                let _ = pipe.read_to_end(&mut stdout_buf).await;
            }
            if let Some(pipe) = stderr_pipe.as_mut() {
                let _ = pipe.read_to_end(&mut stderr_buf).await;
            }
            let status = child.wait().await;
            (stdout_buf, stderr_buf, status)
        })
        .await;

        let (stdout_buf, stderr_buf, status) = match waited {
            Ok(parts) => parts,
            Err(_) => {
                return ExecutionResult {
                    output: String::new(),
                    exit_code: -1,
                    success: false,
                    stdout: None,
                    stderr: None,
                    error: Some(format!(
                        "Command timed out after {}s",
                        self.timeout.as_secs_f64()
                    )),
                    truncated: false,
                };
            }
        };

        let stdout = String::from_utf8_lossy(&stdout_buf).into_owned();
        let stderr = String::from_utf8_lossy(&stderr_buf).into_owned();
        let mut output = match self.output_mode {
            OutputMode::Stderr => stderr.clone(),
            _ => stdout.clone(),
        };

        let mut truncated = false;
        if output.len() > self.max_output_size {
            let mut cut = self.max_output_size;
            while !output.is_char_boundary(cut) {
                cut -= 1;
            }
            output.truncate(cut);
            output.push_str(&format!(
                "\n... [output truncated at {} bytes]",
                self.max_output_size
            ));
            truncated = true;
        }

        let exit_code = status.ok().and_then(|s| s.code()).unwrap_or(-1);
        ExecutionResult {
            output,
            exit_code,
            success: exit_code == 0,
            stdout: (self.output_mode == OutputMode::Both).then_some(stdout),
            stderr: matches!(self.output_mode, OutputMode::Both | OutputMode::Stderr)
                .then_some(stderr),
            error: None,
            truncated,
        }
    }
}

/// Wrapper commands run around the whitelisted main command. These are
/// developer configuration, not model-controlled, and bypass the whitelist.
#[derive(Debug, Clone, Default)]
pub struct ShellWrappers {
    pub pre_shell: Option<String>,
    pub post_shell: Option<String>,
    pub include_pre_shell_output: bool,
    pub include_post_shell_output: bool,
    /// "stop" aborts the main command when pre-shell fails; anything else
    /// continues.
    pub pre_shell_on_fail: String,
    /// "run" executes post-shell even after a failed main command.
    pub post_shell_on_fail: String,
}

/// The agent-facing shell tool: validator + executor + wrappers.
pub struct ShellTool {
    validator: CommandValidator,
    executor: ShellExecutor,
    error_behavior: ErrorBehavior,
    wrappers: ShellWrappers,
}

/// Compose a shell tool for agent use.
pub fn create_shell_tool(
    allowed_patterns: Vec<String>,
    executor: ShellExecutor,
    error_behavior: ErrorBehavior,
    wrappers: ShellWrappers,
) -> ShellTool {
    ShellTool {
        validator: CommandValidator::new(allowed_patterns),
        executor,
        error_behavior,
        wrappers,
    }
}

impl ShellTool {
    /// Execute one agent-issued command. Returns the tool-result payload in
    /// `pass_to_model` mode; raises in `fail_fast` mode.
    pub async fn call(&self, command: &str) -> Result<Value> {
        let validation = self.validator.validate(command);
        if !validation.allowed {
            let message = validation
                .error
                .unwrap_or_else(|| "Command not allowed".to_string());
            if self.error_behavior == ErrorBehavior::FailFast {
                return Err(RunnerError::ShellBlocked(message));
            }
            return Ok(json!({
                "error": message,
                "command": command,
                "allowed": false,
            }));
        }

        let mut output_parts: Vec<String> = Vec::new();
        let mut has_wrapper_output = false;

        if let Some(pre_shell) = self
            .wrappers
            .pre_shell
            .as_deref()
            .filter(|s| !s.trim().is_empty())
        {
            let pre_result = self.executor.execute(pre_shell).await;
            if self.wrappers.include_pre_shell_output && !pre_result.output.is_empty() {
                output_parts.push(format!("[pre-shell]\n{}", pre_result.output));
                has_wrapper_output = true;
            }
            if !pre_result.success && self.wrappers.pre_shell_on_fail == "stop" {
                let reason = pre_result
                    .error
                    .unwrap_or_else(|| format!("exit code {}", pre_result.exit_code));
                return Ok(json!({
                    "output": output_parts.join("\n"),
                    "exit_code": pre_result.exit_code,
                    "success": false,
                    "error": format!("Pre-shell failed: {reason}"),
                }));
            }
        }

        let result = self.executor.execute(command).await;
        if has_wrapper_output {
            output_parts.push(format!("[command]\n{}", result.output));
        } else {
            output_parts = vec![result.output.clone()];
        }

        if let Some(post_shell) = self
            .wrappers
            .post_shell
            .as_deref()
            .filter(|s| !s.trim().is_empty())
        {
            if result.success || self.wrappers.post_shell_on_fail == "run" {
                let post_result = self.executor.execute(post_shell).await;
                if self.wrappers.include_post_shell_output && !post_result.output.is_empty() {
                    output_parts.push(format!("[post-shell]\n{}", post_result.output));
                    has_wrapper_output = true;
                }
            }
        }

        if let Some(error) = &result.error {
            if self.error_behavior == ErrorBehavior::FailFast {
                return Err(RunnerError::ShellFailed(error.clone()));
            }
        }

        let mut response = json!({
            "output": if has_wrapper_output { output_parts.join("\n") } else { result.output.clone() },
            "exit_code": result.exit_code,
            "success": result.success,
        });
        let map = response.as_object_mut().expect("object literal");
        if let Some(error) = result.error {
            map.insert("error".into(), json!(error));
        }
        if result.truncated {
            map.insert("truncated".into(), json!(true));
        }
        if let Some(stdout) = result.stdout {
            map.insert("stdout".into(), json!(stdout));
        }
        if let Some(stderr) = result.stderr {
            map.insert("stderr".into(), json!(stderr));
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_pattern_allows_any_args() {
        let validator = CommandValidator::new(["git:*", "ls:-la"]);
        assert!(validator.validate("git status").allowed);
        assert!(validator.validate("git push origin main").allowed);
    }

    #[test]
    fn exact_args_pattern_is_strict() {
        let validator = CommandValidator::new(["git:*", "ls:-la"]);
        assert!(validator.validate("ls -la").allowed);
        assert!(!validator.validate("ls -la /tmp").allowed);
        assert!(!validator.validate("ls").allowed);
    }

    #[test]
    fn bare_pattern_allows_command_without_args() {
        let validator = CommandValidator::new(["pwd:", "date"]);
        assert!(validator.validate("pwd").allowed);
        assert!(!validator.validate("pwd -P").allowed);
        assert!(validator.validate("date").allowed);
    }

    #[test]
    fn glob_args_pattern_matches() {
        let validator = CommandValidator::new(["npm:install *"]);
        assert!(validator.validate("npm install lodash").allowed);
        assert!(!validator.validate("npm uninstall lodash").allowed);
    }

    #[test]
    fn dangerous_patterns_always_blocked() {
        let validator = CommandValidator::new(["git:*", "ls:*"]);
        for command in [
            "ls && rm -rf /",
            "git status; whoami",
            "git status | tee log",
            "echo $(whoami)",
            "cat `ls`",
            "echo ${HOME}",
            "ls > out.txt",
            "ls < in.txt",
            "ls >> out.txt",
            "cat << EOF",
            "git status & sleep 1",
            "true || false",
        ] {
            let result = validator.validate(command);
            assert!(!result.allowed, "should block: {command}");
            assert!(
                result.error.as_deref().unwrap_or("").contains("dangerous"),
                "error should name the dangerous pattern for: {command}"
            );
        }
    }

    #[test]
    fn comments_and_blank_patterns_are_ignored() {
        let validator = CommandValidator::new(["# comment", "", "git:*"]);
        assert!(validator.validate("git status").allowed);
        assert!(!validator.validate("ls").allowed);
    }

    #[test]
    fn empty_and_unparsable_commands_blocked() {
        let validator = CommandValidator::new(["git:*"]);
        assert!(!validator.validate("").allowed);
        assert!(!validator.validate("   ").allowed);
        assert!(!validator.validate("git 'unterminated").allowed);
    }

    #[tokio::test]
    async fn executor_captures_output() {
        let executor = ShellExecutor::default();
        let result = executor.execute("echo hello").await;
        assert!(result.success);
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.output.trim(), "hello");
    }

    #[tokio::test]
    async fn executor_times_out_and_reports() {
        let executor = ShellExecutor {
            timeout: Duration::from_millis(100),
            ..Default::default()
        };
        let result = executor.execute("sleep 5").await;
        assert!(!result.success);
        assert_eq!(result.exit_code, -1);
        assert!(result.error.as_deref().unwrap_or("").contains("timed out"));
    }

    #[tokio::test]
    async fn executor_truncates_large_output() {
        let executor = ShellExecutor {
            max_output_size: 64,
            ..Default::default()
        };
        let result = executor.execute("printf 'x%.0s' $(seq 200)").await;
        // seq is blocked at the validator layer but fine at executor layer.
        assert!(result.truncated);
        assert!(result.output.contains("[output truncated at 64 bytes]"));
    }

    #[tokio::test]
    async fn executor_runs_in_working_directory() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("probe.txt"), "x").unwrap();
        let executor = ShellExecutor {
            working_directory: Some(tmp.path().to_path_buf()),
            ..Default::default()
        };
        let result = executor.execute("ls").await;
        assert!(result.output.contains("probe.txt"));
    }

    #[tokio::test]
    async fn both_mode_returns_separate_streams() {
        let executor = ShellExecutor {
            output_mode: OutputMode::Both,
            ..Default::default()
        };
        let result = executor.execute("echo out; echo err 1>&2").await;
        assert_eq!(result.stdout.as_deref().map(str::trim), Some("out"));
        assert_eq!(result.stderr.as_deref().map(str::trim), Some("err"));
    }

    #[tokio::test]
    async fn shell_tool_blocks_then_reports_to_model() {
        let tool = create_shell_tool(
            vec!["git:*".into()],
            ShellExecutor::default(),
            ErrorBehavior::PassToModel,
            ShellWrappers::default(),
        );
        let response = tool.call("rm -rf /").await.unwrap();
        assert_eq!(response["allowed"], json!(false));
        assert!(response["error"].as_str().unwrap().contains("not in allowed list"));
    }

    #[tokio::test]
    async fn shell_tool_fail_fast_raises_on_block() {
        let tool = create_shell_tool(
            vec!["git:*".into()],
            ShellExecutor::default(),
            ErrorBehavior::FailFast,
            ShellWrappers::default(),
        );
        let err = tool.call("ls && rm -rf /").await.unwrap_err();
        assert!(matches!(err, RunnerError::ShellBlocked(_)));
    }

    #[tokio::test]
    async fn shell_tool_runs_allowed_command() {
        let tool = create_shell_tool(
            vec!["echo:*".into()],
            ShellExecutor::default(),
            ErrorBehavior::PassToModel,
            ShellWrappers::default(),
        );
        let response = tool.call("echo hi").await.unwrap();
        assert_eq!(response["success"], json!(true));
        assert_eq!(response["output"].as_str().unwrap().trim(), "hi");
    }

    #[tokio::test]
    async fn pre_shell_failure_stops_main_command() {
        let tool = create_shell_tool(
            vec!["echo:*".into()],
            ShellExecutor::default(),
            ErrorBehavior::PassToModel,
            ShellWrappers {
                pre_shell: Some("false".into()),
                pre_shell_on_fail: "stop".into(),
                ..Default::default()
            },
        );
        let response = tool.call("echo hi").await.unwrap();
        assert_eq!(response["success"], json!(false));
        assert!(response["error"].as_str().unwrap().contains("Pre-shell failed"));
    }

    #[tokio::test]
    async fn wrapper_output_is_labeled() {
        let tool = create_shell_tool(
            vec!["echo:*".into()],
            ShellExecutor::default(),
            ErrorBehavior::PassToModel,
            ShellWrappers {
                pre_shell: Some("echo before".into()),
                post_shell: Some("echo after".into()),
                include_pre_shell_output: true,
                include_post_shell_output: true,
                pre_shell_on_fail: "stop".into(),
                post_shell_on_fail: "run".into(),
            },
        );
        let response = tool.call("echo main").await.unwrap();
        let output = response["output"].as_str().unwrap();
        assert!(output.contains("[pre-shell]\nbefore"));
        assert!(output.contains("[command]\nmain"));
        assert!(output.contains("[post-shell]\nafter"));
    }
}

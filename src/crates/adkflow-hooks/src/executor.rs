//! Hook chain executor.
//!
//! Runs the handlers registered for a hook in priority order, enforcing
//! per-handler timeouts. Sync handlers are dispatched to the blocking thread
//! pool; async handlers are awaited on the caller's task. Either way the
//! same timeout applies.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use crate::error::{HookError, Result};
use crate::registry::HooksRegistry;
use crate::types::{
    HookAction, HookContext, HookHandler, HookName, HookResult, HookReturn, HookSpec, JsonMap,
    RetryConfig,
};

pub struct HookExecutor {
    registry: Arc<HooksRegistry>,
}

impl HookExecutor {
    pub fn new(registry: Arc<HooksRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &HooksRegistry {
        &self.registry
    }

    pub fn has_hooks(&self, hook_name: HookName) -> bool {
        self.registry.has_hooks(hook_name)
    }

    /// Execute the chain for `hook_name`.
    ///
    /// Returns the final [`HookResult`] (metadata merged across every handler
    /// that ran) and the payload, which REPLACE handlers may have rewritten.
    /// SKIP stops the chain. ABORT and timeouts surface as typed errors.
    /// RETRY is returned to the caller; see [`Self::execute_with_retry`].
    pub async fn execute(
        &self,
        hook_name: HookName,
        ctx: &HookContext,
        data: Value,
    ) -> Result<(HookResult, Value)> {
        let specs = self.registry.get_hooks(hook_name);
        if specs.is_empty() {
            return Ok((HookResult::continue_(), data));
        }

        let mut current = data;
        let mut merged_metadata = JsonMap::new();
        let mut saw_replace = false;

        for spec in specs {
            let ret = match self.invoke(&spec, ctx, &current).await {
                Ok(ret) => ret,
                Err(err @ HookError::Timeout { .. }) => return Err(err),
                Err(err) => {
                    if self.dispatch_hook_error(hook_name, &spec, ctx, &err).await? {
                        tracing::warn!(
                            hook = %hook_name,
                            extension_id = %spec.extension_id,
                            "Handler error suppressed by on_hook_error"
                        );
                        continue;
                    }
                    return Err(err);
                }
            };

            match ret {
                HookReturn::Pass => continue,
                HookReturn::Value(value) => {
                    // A bare value is an implicit REPLACE.
                    current = value;
                    saw_replace = true;
                }
                HookReturn::Result(mut result) => {
                    for (key, value) in std::mem::take(&mut result.metadata) {
                        merged_metadata.insert(key, value);
                    }
                    match result.action {
                        HookAction::Continue => {}
                        HookAction::Replace => {
                            if let Some(replacement) = result.modified_data.take() {
                                current = replacement;
                            }
                            saw_replace = true;
                        }
                        HookAction::Skip => {
                            tracing::debug!(
                                hook = %hook_name,
                                extension_id = %spec.extension_id,
                                "Handler returned SKIP, stopping chain"
                            );
                            result.metadata = merged_metadata;
                            return Ok((result, current));
                        }
                        HookAction::Abort => {
                            return Err(HookError::Abort {
                                message: result
                                    .error
                                    .unwrap_or_else(|| "Aborted by hook".to_string()),
                                hook_name,
                                extension_id: spec.extension_id.clone(),
                            });
                        }
                        HookAction::Retry => {
                            result.metadata = merged_metadata;
                            return Ok((result, current));
                        }
                    }
                }
            }
        }

        let mut result = HookResult::continue_();
        if saw_replace {
            // Callers distinguish "chain rewrote the payload" from a plain
            // pass-through.
            result.action = HookAction::Replace;
        }
        result.metadata = merged_metadata;
        Ok((result, current))
    }

    /// Execute the chain, honoring RETRY results with bounded exponential
    /// backoff. Returns the first non-RETRY outcome; once attempts are
    /// exhausted the result converts to ABORT so callers never see the
    /// non-terminal RETRY action.
    pub async fn execute_with_retry(
        &self,
        hook_name: HookName,
        ctx: &HookContext,
        data: Value,
    ) -> Result<(HookResult, Value)> {
        let mut attempt: u32 = 0;
        loop {
            let (result, current) = self.execute(hook_name, ctx, data.clone()).await?;
            if result.action != HookAction::Retry {
                return Ok((result, current));
            }

            let config = result.retry_config.clone().unwrap_or_default();
            attempt += 1;
            if attempt >= config.max_attempts {
                tracing::warn!(
                    hook = %hook_name,
                    attempts = attempt,
                    "Retry attempts exhausted"
                );
                let mut aborted = HookResult::abort(format!(
                    "Max retries ({}) exceeded for hook '{hook_name}'",
                    config.max_attempts
                ));
                aborted.metadata = result.metadata;
                return Ok((aborted, current));
            }

            let delay = retry_delay(&config, attempt);
            tracing::debug!(
                hook = %hook_name,
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                "Hook requested retry, backing off"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn invoke(
        &self,
        spec: &HookSpec,
        ctx: &HookContext,
        data: &Value,
    ) -> Result<HookReturn> {
        let timeout = Duration::from_secs_f64(spec.timeout_seconds.max(0.0));
        let mut invocation_ctx = ctx.clone();
        invocation_ctx.hook_name = spec.hook_name;
        invocation_ctx.phase = spec.hook_name.phase().to_string();

        let fut: crate::types::BoxHookFuture = match &spec.handler {
            HookHandler::Async(f) => f(invocation_ctx, data.clone()),
            HookHandler::Sync(f) => {
                let f = f.clone();
                let data = data.clone();
                Box::pin(async move {
                    tokio::task::spawn_blocking(move || f(invocation_ctx, data))
                        .await
                        .map_err(|e| format!("handler panicked: {e}"))?
                })
            }
        };

        match tokio::time::timeout(timeout, fut).await {
            Ok(Ok(ret)) => Ok(ret),
            Ok(Err(message)) => Err(HookError::Handler {
                hook_name: spec.hook_name,
                extension_id: spec.extension_id.clone(),
                message,
            }),
            Err(_) => Err(HookError::Timeout {
                hook_name: spec.hook_name,
                extension_id: spec.extension_id.clone(),
                timeout_seconds: spec.timeout_seconds,
            }),
        }
    }

    /// Route a handler failure through the `on_hook_error` chain.
    ///
    /// Returns `true` when the chain suppressed the error (a SKIP result).
    /// The meta chain never recurses: errors raised while handling
    /// `on_hook_error` itself propagate directly.
    async fn dispatch_hook_error(
        &self,
        source_hook: HookName,
        failed_spec: &HookSpec,
        ctx: &HookContext,
        error: &HookError,
    ) -> Result<bool> {
        if source_hook == HookName::OnHookError
            || !self.registry.has_hooks(HookName::OnHookError)
        {
            return Ok(false);
        }

        let mut error_ctx = ctx.clone();
        error_ctx.hook_name = HookName::OnHookError;
        error_ctx.phase = "meta".to_string();
        let payload = json!({
            "error": error.to_string(),
            "source_hook": source_hook.as_str(),
            "extension_id": failed_spec.extension_id,
        });
        error_ctx.data = payload.clone();

        let (result, _) = Box::pin(self.execute(HookName::OnHookError, &error_ctx, payload))
            .await?;
        Ok(result.action == HookAction::Skip)
    }
}

fn retry_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let base = config.initial_interval * config.backoff_factor.powi(attempt as i32 - 1);
    let capped = base.min(config.max_interval);
    let with_jitter = if config.jitter {
        use rand::Rng;
        let factor: f64 = rand::thread_rng().gen_range(0.0..0.25);
        capped * (1.0 + factor)
    } else {
        capped
    };
    Duration::from_secs_f64(with_jitter.max(0.0))
}

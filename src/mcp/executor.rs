use futures::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use super::protocol::CallToolResponse;
use super::registry::{ToolContext, ToolDescriptor};

/// Runs tool handlers and turns every outcome into a `CallToolResponse`.
///
/// Validation failures, handler errors, handler panics and (when configured) deadline
/// overruns all come back as `isError: true` results; nothing is raised to the caller.
#[derive(Debug, Clone, Default)]
pub struct ToolExecutor {
    timeout: Option<Duration>,
}

impl ToolExecutor {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    pub async fn invoke(
        &self,
        descriptor: &ToolDescriptor,
        raw_input: Option<Value>,
        context: &ToolContext,
    ) -> CallToolResponse {
        let name = descriptor.name();
        let input = raw_input.unwrap_or_else(|| serde_json::json!({}));

        if let Err(reason) = descriptor.validate(&input) {
            tracing::warn!("Rejected arguments for tool {}: {}", name, reason);
            return CallToolResponse::error(format!(
                "Invalid arguments for tool {}: {}",
                name, reason
            ));
        }

        tracing::info!("Tool execution started");
        let started = Instant::now();

        let call = AssertUnwindSafe(descriptor.handler().execute(input, context)).catch_unwind();
        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    tracing::error!("Tool {} timed out after {:?}", name, limit);
                    return CallToolResponse::error(format!(
                        "Tool {} timed out after {}s",
                        name,
                        limit.as_secs()
                    ));
                }
            },
            None => call.await,
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(Ok(content)) => {
                tracing::info!(elapsed_ms, "Tool executed successfully");
                CallToolResponse::success(content)
            }
            Ok(Err(e)) => {
                tracing::error!(elapsed_ms, "Tool execution failed: {}", e);
                CallToolResponse::error(descriptor.handler().failure_message(&e))
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(elapsed_ms, "Tool handler panicked: {}", message);
                CallToolResponse::error(descriptor.handler().failure_message(&message))
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "tool handler panicked".to_string()
    }
}

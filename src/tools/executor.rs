//! 工具执行器
//!
//! 持有 ToolRegistry 与全局超时。execute 永不返回 Err：未知工具、参数错误、执行失败与超时
//! 都转为 `success: false` 的 [`ToolOutcome`]，交还给模型决定下一步；每次调用输出结构化审计日志（JSON）。

use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tokio::time::timeout;

use crate::core::AgentError;
use crate::tools::{ToolContext, ToolRegistry, ToolSpec};

/// 工具调用结果（作为 Observation 回填给模型）
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolOutcome {
    pub tool: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// 错误码，同 [`AgentError::code`]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
}

impl ToolOutcome {
    fn ok(tool: &str, result: Value) -> Self {
        Self {
            tool: tool.to_string(),
            success: true,
            result: Some(result),
            error: None,
            code: None,
        }
    }

    fn failed(tool: &str, error: &AgentError) -> Self {
        Self {
            tool: tool.to_string(),
            success: false,
            result: None,
            error: Some(error.to_string()),
            code: Some(error.code()),
        }
    }

    /// 回填给模型的文本
    pub fn to_observation(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{{\"tool\":\"{}\"}}", self.tool))
    }
}

/// 工具执行器：对每次调用施加超时，并将失败映射为结构化结果
#[derive(Clone)]
pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub async fn execute(&self, tool_name: &str, args: Value, ctx: &ToolContext) -> ToolOutcome {
        let start = Instant::now();
        let args_preview = args_preview(&args);

        let result = match self.registry.get(tool_name) {
            None => Err(AgentError::ToolExecution(format!("Unknown tool: {tool_name}"))),
            Some(tool) => match timeout(self.timeout, tool.execute(args, ctx)).await {
                Ok(result) => result,
                Err(_) => Err(AgentError::ToolExecution(format!(
                    "Tool timed out after {}s",
                    self.timeout.as_secs()
                ))),
            },
        };
        let outcome = match result {
            Ok(value) => ToolOutcome::ok(tool_name, value),
            Err(e) => ToolOutcome::failed(tool_name, &e),
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": outcome.success,
            "error": outcome.error,
            "code": outcome.code,
            "duration_ms": duration_ms,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        outcome
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.registry.specs()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::Tool;
    use async_trait::async_trait;
    use serde_json::json;

    struct Slow;

    #[async_trait]
    impl Tool for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        fn description(&self) -> &str {
            "sleeps"
        }

        async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<Value, AgentError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(json!("late"))
        }
    }

    struct Failing;

    #[async_trait]
    impl Tool for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn description(&self) -> &str {
            "always fails"
        }

        async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<Value, AgentError> {
            Err(AgentError::ToolExecution("database unavailable".to_string()))
        }
    }

    fn executor(timeout_secs: u64) -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(Slow);
        registry.register(Failing);
        ToolExecutor::new(registry, timeout_secs)
    }

    #[tokio::test]
    async fn test_unknown_tool_is_structured_error() {
        let out = executor(1)
            .execute("nope", json!({}), &ToolContext::default())
            .await;
        assert!(!out.success);
        assert_eq!(
            out.error.as_deref(),
            Some("Tool execution failed: Unknown tool: nope")
        );
        assert_eq!(out.code, Some("tool_execution_error"));
    }

    #[tokio::test]
    async fn test_tool_failure_is_captured() {
        let out = executor(1)
            .execute("failing", json!({}), &ToolContext::default())
            .await;
        assert!(!out.success);
        let obs: Value = serde_json::from_str(&out.to_observation()).unwrap();
        assert_eq!(obs["error"], "Tool execution failed: database unavailable");
        assert_eq!(obs["code"], "tool_execution_error");
        assert_eq!(obs["success"], false);
    }

    #[tokio::test]
    async fn test_tool_timeout() {
        let mut exec = executor(1);
        exec.timeout = Duration::from_millis(20);
        let out = exec.execute("slow", json!({}), &ToolContext::default()).await;
        assert!(!out.success);
        assert!(out.error.unwrap().contains("timed out"));
    }
}

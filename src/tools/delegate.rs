//! call_<agent>_agent 工具：把子任务交给另一个 Agent
//!
//! 子 Agent 以独立执行运行：空历史、不共享父级 Session Context，但沿用同一个进度 Writer。
//! 子 Agent 失败不会向上抛出，而是返回 `success: false` 的结构化结果，交给父级推理循环处理。

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::agents::{Agent, AgentInput, AgentRequest};
use crate::core::AgentError;
use crate::envelope::Envelope;
use crate::stream::emit;
use crate::tools::schema::{parse_args, schema_of};
use crate::tools::{Tool, ToolContext};

/// 子 Agent 失败时返回给父级的兜底回复
pub const DELEGATE_APOLOGY: &str =
    "I'm sorry, I couldn't search for products right now. Please try again.";

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DelegateArgs {
    /// The command to hand to the sub-agent, in natural language
    pub command: String,
}

pub struct DelegateTool {
    target: Arc<dyn Agent>,
    tool_name: String,
    description: String,
}

impl DelegateTool {
    pub fn new(target: Arc<dyn Agent>) -> Self {
        let agent = target.name().to_string();
        let description = match target.description() {
            "" => format!("Call the {agent} agent and return its answer."),
            d => format!("Call the {agent} agent: {d}"),
        };
        Self {
            tool_name: format!("call_{agent}_agent"),
            target,
            description,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

#[async_trait]
impl Tool for DelegateTool {
    fn name(&self) -> &str {
        &self.tool_name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<DelegateArgs>()
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value, AgentError> {
        let args: DelegateArgs = parse_args(&self.tool_name, args)?;
        let agent = self.target.name().to_string();
        tracing::info!(agent = %agent, command = %args.command, "Delegating to sub-agent");

        emit(
            ctx.writer(),
            Envelope::loading(format!("상품 에이전트 생각중...: {}", args.command)),
        );

        let input = AgentInput::Structured(json!({ "command": args.command }));
        match self
            .target
            .execute(&input, AgentRequest::isolated(ctx.writer.clone()))
            .await
        {
            Ok(output) => {
                emit(ctx.writer(), Envelope::loading("상품 에이전트 작업 완료"));
                Ok(json!({
                    "agent": agent,
                    "response": output.response,
                    "success": true,
                }))
            }
            Err(e) => {
                tracing::warn!(agent = %agent, "Sub-agent call failed: {}", e);
                Ok(json!({
                    "agent": agent,
                    "response": DELEGATE_APOLOGY,
                    "error": e.to_string(),
                    "success": false,
                }))
            }
        }
    }
}

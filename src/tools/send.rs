//! send_message 工具：把模型拼好的信封推给客户端
//!
//! 信封先经 [`Envelope::from_value`] 校验（缺 id/type、未知类型、缺必填字段一律拒绝），
//! 通过后才交给 Writer；没有 Writer 时只记日志。

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::core::AgentError;
use crate::envelope::Envelope;
use crate::tools::schema::{parse_args, schema_of};
use crate::tools::{Tool, ToolContext};

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SendMessageArgs {
    /// The message object to send. Must include `id` and `type` (chatMessage, product, suggested, loading);
    /// other properties depend on the type. Reviews are sent as a product message with displayType "review".
    pub message: Value,
}

pub struct SendMessageTool;

#[async_trait]
impl Tool for SendMessageTool {
    fn name(&self) -> &str {
        "send_message"
    }

    fn description(&self) -> &str {
        "Send a structured message to the user's screen. Supports chatMessage, product, suggested and loading messages."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<SendMessageArgs>()
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value, AgentError> {
        let args: SendMessageArgs = parse_args(self.name(), args)?;
        let envelope = Envelope::from_value(args.message).map_err(|e| {
            tracing::warn!("Rejected outgoing message: {}", e);
            AgentError::from(e)
        })?;

        let message_id = envelope.id().to_string();
        let kind = envelope.kind();
        let channel = match ctx.writer() {
            Some(writer) => {
                // 客户端已断开时 write 会记录 Transport 错误，消息本身仍算已发送
                let _ = writer.write(envelope);
                "stream"
            }
            None => {
                tracing::info!(
                    envelope_type = kind,
                    envelope = %envelope.to_value(),
                    "Message sent (no stream attached)"
                );
                "log"
            }
        };

        Ok(json!({
            "messageId": message_id,
            "type": kind,
            "success": true,
            "channel": channel,
        }))
    }
}

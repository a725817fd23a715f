//! 网关消息协议定义
//!
//! 每个 WebSocket 文本帧是 `{"event": "...", "data": {...}}`：
//! - 客户端 → 服务端：`chatMessage { message }`
//! - 服务端 → 客户端：`response { type: "response", data: <信封 | 执行结果> }`、
//!   `error { message, details?, code? }`

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{AgentError, Execution};
use crate::envelope::Envelope;

pub const CHAT_MESSAGE_EVENT: &str = "chatMessage";
const RESPONSE_TYPE: &str = "response";

/// 执行失败时给用户看的固定文案；具体原因放在 details
pub const GENERIC_ERROR_MESSAGE: &str =
    "An error occurred while processing your request. Please try again.";
pub const INVALID_MESSAGE: &str = "Invalid message";

/// 客户端帧（宽松解析，事件名与负载分开校验）
#[derive(Debug, Clone, Deserialize)]
pub struct ClientFrame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl ClientFrame {
    /// chatMessage 的 `message` 字段；缺失或不是字符串时返回 None
    pub fn chat_text(&self) -> Option<&str> {
        self.data.get("message").and_then(Value::as_str)
    }
}

/// 服务端帧
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerFrame {
    #[serde(rename = "response")]
    Response(ResponsePayload),
    #[serde(rename = "error")]
    Error(ErrorPayload),
}

/// `response` 事件的负载：进度与最终结果同一形状，内容放在 data 里
#[derive(Debug, Clone, Serialize)]
pub struct ResponsePayload {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub data: ResponseBody,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ResponseBody {
    /// 中间进度：信封原样转发
    Progress(Envelope),
    Final(Execution),
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ServerFrame {
    pub fn progress(envelope: Envelope) -> Self {
        Self::response(ResponseBody::Progress(envelope))
    }

    pub fn result(execution: Execution) -> Self {
        Self::response(ResponseBody::Final(execution))
    }

    fn response(data: ResponseBody) -> Self {
        ServerFrame::Response(ResponsePayload {
            kind: RESPONSE_TYPE,
            data,
        })
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerFrame::Error(ErrorPayload {
            message: message.into(),
            details: None,
            code: None,
        })
    }

    /// 执行失败：固定文案 + 错误详情与错误码
    pub fn execution_error(err: &AgentError) -> Self {
        ServerFrame::Error(ErrorPayload {
            message: GENERIC_ERROR_MESSAGE.to_string(),
            details: Some(err.to_string()),
            code: Some(err.code().to_string()),
        })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

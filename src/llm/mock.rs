//! Mock / Scripted LLM 客户端（用于测试与无 API Key 的本地运行）
//!
//! MockLlmClient 直接回显最后一条 User 消息作为最终回复；
//! ScriptedLlmClient 按顺序返回预设输出，并记录每次收到的消息，便于断言 ReAct 流程。

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::context::{Message, Role};
use crate::llm::{LlmClient, LlmError};

/// Mock 客户端：回显用户最后一条消息，不触发工具
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");

        Ok(format!("Echo from Mock: {}", last_user))
    }
}

/// 预设脚本客户端：每次 complete 弹出一条输出；脚本耗尽后返回错误
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    script: Mutex<VecDeque<Result<String, LlmError>>>,
    calls: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedLlmClient {
    pub fn new<I, S>(outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            script: Mutex::new(outputs.into_iter().map(|s| Ok(s.into())).collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// 追加一条输出（可以是错误）
    pub async fn push(&self, output: Result<String, LlmError>) {
        self.script.lock().await.push_back(output);
    }

    /// 每次调用收到的完整消息列表
    pub async fn calls(&self) -> Vec<Vec<Message>> {
        self.calls.lock().await.clone()
    }

    pub async fn remaining(&self) -> usize {
        self.script.lock().await.len()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.calls.lock().await.push(messages.to_vec());
        self.script
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::InvalidRequest("script exhausted".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_echoes_last_user_message() {
        let client = MockLlmClient;
        let out = client
            .complete(&[
                Message::system("sys"),
                Message::user("first"),
                Message::assistant("reply"),
                Message::user("second"),
            ])
            .await
            .unwrap();
        assert_eq!(out, "Echo from Mock: second");
    }

    #[tokio::test]
    async fn test_scripted_pops_in_order_and_records_calls() {
        let client = ScriptedLlmClient::new(["a", "b"]);
        assert_eq!(client.complete(&[Message::user("1")]).await.unwrap(), "a");
        assert_eq!(client.complete(&[Message::user("2")]).await.unwrap(), "b");
        assert!(client.complete(&[Message::user("3")]).await.is_err());
        let calls = client.calls().await;
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1][0].content, "2");
    }
}

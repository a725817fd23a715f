//! Agent 抽象与注册表
//!
//! 一个 Agent 只需实现 [`Agent::execute`]；需要启动 / 关闭钩子的 Agent 额外实现
//! [`AgentLifecycle`]，并以 [`AgentDescriptor::Managed`] 注册。编排引擎只认 descriptor，
//! 不关心具体 Agent 类型。

pub mod react_agent;
pub mod registry;
pub mod shopping;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::context::Message;
use crate::core::AgentError;
use crate::stream::ProgressWriter;

pub use react_agent::{PromptSource, ReactAgent};
pub use registry::AgentRegistry;
pub use shopping::{
    build_shopping_registry, main_agent, product_agent, AgentSettings, MAIN_AGENT, PRODUCT_AGENT,
};

/// Agent 输入：用户文本，或由其他 Agent 委派时的结构化命令
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AgentInput {
    Text(String),
    Structured(Value),
}

impl AgentInput {
    /// 喂给模型的文本：结构化输入优先取 `query` / `command` 字段，否则序列化整个对象
    pub fn as_prompt(&self) -> String {
        match self {
            AgentInput::Text(s) => s.clone(),
            AgentInput::Structured(v) => ["query", "command"]
                .iter()
                .find_map(|k| v.get(*k).and_then(Value::as_str))
                .map(String::from)
                .unwrap_or_else(|| v.to_string()),
        }
    }
}

impl From<&str> for AgentInput {
    fn from(s: &str) -> Self {
        AgentInput::Text(s.to_string())
    }
}

impl From<String> for AgentInput {
    fn from(s: String) -> Self {
        AgentInput::Text(s)
    }
}

impl From<Value> for AgentInput {
    fn from(v: Value) -> Self {
        match v {
            Value::String(s) => AgentInput::Text(s),
            other => AgentInput::Structured(other),
        }
    }
}

/// Agent 的最终结果
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentOutput {
    pub response: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl AgentOutput {
    pub fn text(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// 单次执行的附带参数：有界历史、可选进度 Writer、所属上下文
#[derive(Clone, Debug, Default)]
pub struct AgentRequest {
    /// 调用方上下文 ID；委派执行时为 None
    pub context_id: Option<String>,
    /// 最近 N 条消息（含本轮用户输入）
    pub history: Vec<Message>,
    pub writer: Option<ProgressWriter>,
}

impl AgentRequest {
    /// 不带历史的独立执行（委派给子 Agent 时使用）
    pub fn isolated(writer: Option<ProgressWriter>) -> Self {
        Self {
            context_id: None,
            history: Vec::new(),
            writer,
        }
    }
}

/// Agent 能力：名字 + 执行
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    /// 一句话描述（状态查询 / 日志使用）
    fn description(&self) -> &str {
        ""
    }

    async fn execute(
        &self,
        input: &AgentInput,
        request: AgentRequest,
    ) -> Result<AgentOutput, AgentError>;
}

/// 可选的生命周期钩子
#[async_trait]
pub trait AgentLifecycle: Send + Sync {
    /// 必须幂等：Registry 初始化失败后重试时会再次调用
    async fn initialize(&self) -> Result<(), AgentError>;

    async fn shutdown(&self) -> Result<(), AgentError> {
        Ok(())
    }
}

/// 注册项：无状态 Agent 或带生命周期的 Agent
#[derive(Clone)]
pub enum AgentDescriptor {
    Stateless(Arc<dyn Agent>),
    Managed {
        agent: Arc<dyn Agent>,
        lifecycle: Arc<dyn AgentLifecycle>,
    },
}

impl AgentDescriptor {
    pub fn stateless<A: Agent + 'static>(agent: A) -> Self {
        AgentDescriptor::Stateless(Arc::new(agent))
    }

    pub fn managed<A: Agent + AgentLifecycle + 'static>(agent: A) -> Self {
        Self::managed_arc(Arc::new(agent))
    }

    /// 同一个实例同时作为 Agent 与 Lifecycle 注册
    pub fn managed_arc<A: Agent + AgentLifecycle + 'static>(agent: Arc<A>) -> Self {
        AgentDescriptor::Managed {
            agent: agent.clone(),
            lifecycle: agent,
        }
    }

    pub fn name(&self) -> &str {
        self.agent_ref().name()
    }

    pub fn agent(&self) -> Arc<dyn Agent> {
        match self {
            AgentDescriptor::Stateless(a) => Arc::clone(a),
            AgentDescriptor::Managed { agent, .. } => Arc::clone(agent),
        }
    }

    pub fn lifecycle(&self) -> Option<&Arc<dyn AgentLifecycle>> {
        match self {
            AgentDescriptor::Stateless(_) => None,
            AgentDescriptor::Managed { lifecycle, .. } => Some(lifecycle),
        }
    }

    fn agent_ref(&self) -> &Arc<dyn Agent> {
        match self {
            AgentDescriptor::Stateless(a) => a,
            AgentDescriptor::Managed { agent, .. } => agent,
        }
    }
}

impl std::fmt::Debug for AgentDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            AgentDescriptor::Stateless(_) => "Stateless",
            AgentDescriptor::Managed { .. } => "Managed",
        };
        f.debug_struct("AgentDescriptor")
            .field("name", &self.name())
            .field("kind", &kind)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_structured_input_prompt() {
        let input = AgentInput::from(json!({"command": "find sunscreen"}));
        assert_eq!(input.as_prompt(), "find sunscreen");

        let input = AgentInput::from(json!({"limit": 3}));
        assert_eq!(input.as_prompt(), r#"{"limit":3}"#);

        let input = AgentInput::from(json!("plain"));
        assert_eq!(input, AgentInput::Text("plain".to_string()));
    }

    #[test]
    fn test_output_metadata_skipped_when_empty() {
        let out = AgentOutput::text("done");
        assert_eq!(serde_json::to_value(&out).unwrap(), json!({"response": "done"}));

        let out = out.with_metadata("rounds", json!(2));
        assert_eq!(out.metadata["rounds"], json!(2));
    }
}

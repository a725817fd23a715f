//! 会话上下文数据模型
//!
//! SessionContext 只由编排引擎修改：追加消息、步数 +1、记录 Agent 状态。
//! 外部调用方只能通过 [`ContextUpdate`] 合并 metadata / max_steps。

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::agents::AgentOutput;

/// 单个上下文的默认步数上限（防死循环）
pub const DEFAULT_MAX_STEPS: u32 = 10;
/// 喂给推理循环的默认历史条数
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 喂给 LLM 的精简消息：只有 role + content
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// 上下文中保存的完整消息；追加后不再修改
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContextMessage {
    /// 位置派生 ID：`msg_<序号>`
    pub id: String,
    pub role: Role,
    pub content: String,
    /// 产生该消息的 Agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    pub timestamp: DateTime<Utc>,
}

/// 待追加的消息（id 与 timestamp 由存储分配）
#[derive(Clone, Debug)]
pub struct NewMessage {
    pub role: Role,
    pub content: String,
    pub agent: Option<String>,
    pub metadata: Option<Map<String, Value>>,
}

impl NewMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            agent: None,
            metadata: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// 某个 Agent 在该上下文中最近一次执行的记录
#[derive(Clone, Debug, Serialize)]
pub struct AgentState {
    pub last_executed_at: DateTime<Utc>,
    pub last_result: AgentOutput,
}

/// 单个会话的上下文
#[derive(Clone, Debug, Serialize)]
pub struct SessionContext {
    pub id: String,
    pub created_at: DateTime<Utc>,
    /// 追加有序，从不重排
    pub messages: Vec<ContextMessage>,
    /// 单调不减
    pub step_count: u32,
    pub max_steps: u32,
    pub agent_states: HashMap<String, AgentState>,
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_execution: Option<DateTime<Utc>>,
}

impl SessionContext {
    pub fn new(id: impl Into<String>, max_steps: u32) -> Self {
        Self {
            id: id.into(),
            created_at: Utc::now(),
            messages: Vec::new(),
            step_count: 0,
            max_steps,
            agent_states: HashMap::new(),
            metadata: Map::new(),
            last_execution: None,
        }
    }

    /// 剩余步数为 0 时，新的编排调用必须被拒绝
    pub fn is_exhausted(&self) -> bool {
        self.step_count >= self.max_steps
    }

    pub(crate) fn push_message(&mut self, message: NewMessage) {
        let id = format!("msg_{}", self.messages.len());
        self.messages.push(ContextMessage {
            id,
            role: message.role,
            content: message.content,
            agent: message.agent,
            metadata: message.metadata,
            timestamp: Utc::now(),
        });
    }

    /// 最近 `limit` 条消息（保持原顺序），更早的只从 LLM 视野中丢弃，不从存储中删除
    pub fn history(&self, limit: usize) -> Vec<Message> {
        let start = self.messages.len().saturating_sub(limit);
        self.messages[start..]
            .iter()
            .map(|m| Message {
                role: m.role,
                content: m.content.clone(),
            })
            .collect()
    }

    pub fn summary(&self) -> ContextSummary {
        ContextSummary {
            id: self.id.clone(),
            step_count: self.step_count,
            messages: self.messages.len(),
        }
    }
}

/// 执行结果中附带的上下文摘要
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSummary {
    pub id: String,
    pub step_count: u32,
    pub messages: usize,
}

/// 调用方可控字段的浅合并
#[derive(Clone, Debug, Default)]
pub struct ContextUpdate {
    /// 按 key 覆盖到 metadata
    pub metadata: Option<Map<String, Value>>,
    /// 不会低于当前 step_count
    pub max_steps: Option<u32>,
}

impl ContextUpdate {
    pub fn metadata(metadata: Map<String, Value>) -> Self {
        Self {
            metadata: Some(metadata),
            ..Self::default()
        }
    }

    pub fn max_steps(max_steps: u32) -> Self {
        Self {
            max_steps: Some(max_steps),
            ..Self::default()
        }
    }

    pub(crate) fn apply(self, ctx: &mut SessionContext) {
        if let Some(metadata) = self.metadata {
            for (k, v) in metadata {
                ctx.metadata.insert(k, v);
            }
        }
        if let Some(max_steps) = self.max_steps {
            ctx.max_steps = max_steps.max(ctx.step_count);
        }
    }
}

//! 编排错误类型
//!
//! 引擎层错误（AgentNotFound / ContextNotFound / StepLimitExceeded）直接返回给调用方；
//! 工具层错误在 ToolExecutor 内转为结构化结果，不会穿透工具边界。

use thiserror::Error;

use crate::catalog::CatalogError;
use crate::envelope::EnvelopeError;
use crate::llm::LlmError;

/// 编排核心中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    /// Registry 或某个 Agent 启动失败（致命，阻断所有编排）
    #[error("Initialization failed: {0}")]
    Initialization(String),

    #[error("Agent '{0}' not found")]
    AgentNotFound(String),

    #[error("Context not found: {0}")]
    ContextNotFound(String),

    /// 防循环保护触发，上下文保持不变
    #[error("Maximum steps ({max_steps}) exceeded for context {context_id}")]
    StepLimitExceeded { context_id: String, max_steps: u32 },

    #[error("Tool execution failed: {0}")]
    ToolExecution(String),

    #[error("Validation error: {0}")]
    Validation(#[from] EnvelopeError),

    /// Writer 投递失败；只记录日志，不会中止所属执行
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Agent 推理过程中的其他失败
    #[error("Agent execution failed: {0}")]
    Execution(String),
}

impl AgentError {
    /// 客户端可见的错误码
    pub fn code(&self) -> &'static str {
        match self {
            AgentError::Initialization(_) => "initialization_error",
            AgentError::AgentNotFound(_) => "agent_not_found",
            AgentError::ContextNotFound(_) => "context_not_found",
            AgentError::StepLimitExceeded { .. } => "step_limit_exceeded",
            AgentError::ToolExecution(_) => "tool_execution_error",
            AgentError::Validation(_) => "validation_error",
            AgentError::Transport(_) => "transport_error",
            AgentError::Llm(_) => "llm_error",
            AgentError::Catalog(_) => "catalog_error",
            AgentError::Execution(_) => "execution_error",
        }
    }

    /// 调用方错误（4xx 语义）：可修正输入后重试
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            AgentError::AgentNotFound(_)
                | AgentError::ContextNotFound(_)
                | AgentError::StepLimitExceeded { .. }
                | AgentError::Validation(_)
        )
    }
}

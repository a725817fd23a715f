//! 会话上下文层：按会话保存消息历史、步数预算、各 Agent 最近结果

pub mod store;
pub mod types;

pub use store::{ContextLease, ContextStore};
pub use types::{
    AgentState, ContextMessage, ContextSummary, ContextUpdate, Message, NewMessage, Role,
    SessionContext, DEFAULT_HISTORY_LIMIT, DEFAULT_MAX_STEPS,
};

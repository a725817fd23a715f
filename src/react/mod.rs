//! 认知层：Planner 与 ReAct 主循环

pub mod loop_;
pub mod planner;

pub use loop_::{react_loop, ReactResult, ReactSession, DEFAULT_MAX_TOOL_ROUNDS};
pub use planner::{parse_llm_output, Generation, Planner, ToolCall};

//! Mocheong - 购物助手智能体编排核心
//!
//! 模块划分：
//! - **agents**: Agent 抽象、注册表、ReAct Agent 与购物助手的 main / product 两个 Agent
//! - **catalog**: 商品与评论检索（SQLite）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **context**: 会话上下文存储（消息历史、步数预算、Agent 状态）
//! - **core**: 错误类型、编排引擎（execute_agent / execute_chain）、优雅关闭
//! - **envelope**: 发往客户端的消息信封与校验
//! - **gateway**: WebSocket 网关
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock / 重试包装）
//! - **react**: Planner 与 ReAct 主循环
//! - **runtime**: 从配置装配整套服务
//! - **stream**: 进度流 Writer
//! - **tools**: 工具协议、执行器与内置工具

pub mod agents;
pub mod catalog;
pub mod config;
pub mod context;
pub mod core;
pub mod envelope;
pub mod gateway;
pub mod llm;
pub mod observability;
pub mod react;
pub mod runtime;
pub mod stream;
pub mod tools;

pub use crate::core::{AgentError, Orchestrator};

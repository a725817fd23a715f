//! 核心编排层：错误类型、编排引擎、优雅关闭

pub mod error;
pub mod orchestrator;
pub mod shutdown;

pub use error::AgentError;
pub use orchestrator::{
    AgentStatus, ChainExecution, ChainStep, Execution, ExecutionOptions, Orchestrator,
    OrchestratorStatus,
};
pub use shutdown::{
    run_with_graceful_shutdown, OrchestratorCleanup, ShutdownCleanup, ShutdownCoordinator,
    ShutdownManager, ShutdownReason,
};

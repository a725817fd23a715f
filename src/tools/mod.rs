//! 工具能力协议与内置工具

pub mod delegate;
pub mod executor;
pub mod product_search;
pub mod registry;
pub mod schema;
pub mod send;
pub mod template;

pub use delegate::{DelegateTool, DELEGATE_APOLOGY};
pub use executor::{ToolExecutor, ToolOutcome};
pub use product_search::{SearchProductsTool, SearchReviewsTool};
pub use registry::{Tool, ToolContext, ToolRegistry, ToolSpec};
pub use schema::tool_call_schema_json;
pub use send::SendMessageTool;
pub use template::MessageTemplateTool;

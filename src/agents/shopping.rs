//! 购物助手的两个 Agent 与注册表装配
//!
//! - `main`：面向用户，负责理解意图、委派商品检索、把结果整理成信封推给客户端
//! - `product`：只负责查商品与评论，被 main 通过 `call_product_agent` 调用

use std::path::PathBuf;
use std::sync::Arc;

use crate::agents::{Agent, AgentDescriptor, AgentRegistry, PromptSource, ReactAgent};
use crate::catalog::ProductCatalog;
use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::react::DEFAULT_MAX_TOOL_ROUNDS;
use crate::tools::{
    DelegateTool, MessageTemplateTool, SearchProductsTool, SearchReviewsTool, SendMessageTool,
    ToolExecutor, ToolRegistry,
};

pub const MAIN_AGENT: &str = "main";
pub const PRODUCT_AGENT: &str = "product";

const MAIN_PROMPT: &str = "You are Mocheong, a friendly shopping assistant for a Korean beauty store. \
Answer in the user's language. For any question about products, prices, rankings, ingredients or reviews, \
call `call_product_agent` with a clear command instead of guessing. Present results to the user with \
`send_message`: use a product message (displayType Box2 for several items, Box1 for one, review for reviews) \
and finish with a suggested message offering follow-up questions. Use `get_message_template` if you are \
unsure about a message shape. Your final plain-text reply is a short summary of what you sent.";

const PRODUCT_PROMPT: &str = "You are the product search agent. Use `search_products` to find products \
matching the command (filters: name, brand, category, ingredients, price and rank ranges, ordering, limit) \
and `search_reviews` to read the reviews of a product by id. Reply with a concise factual summary that \
includes each product's id, name, price, rating and rank. Never invent products that the tools did not return.";

/// Agent 构建参数（来自 [orchestrator] 配置）
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub prompts_path: Option<PathBuf>,
    pub tool_timeout_secs: u64,
    pub max_tool_rounds: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            prompts_path: None,
            tool_timeout_secs: 30,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
        }
    }
}

pub fn product_agent(
    llm: Arc<dyn LlmClient>,
    catalog: Arc<dyn ProductCatalog>,
    settings: &AgentSettings,
) -> ReactAgent {
    let mut tools = ToolRegistry::new();
    tools.register(SearchProductsTool::new(Arc::clone(&catalog)));
    tools.register(SearchReviewsTool::new(catalog));

    ReactAgent::new(
        PRODUCT_AGENT,
        llm,
        ToolExecutor::new(tools, settings.tool_timeout_secs),
        PromptSource::inline(PRODUCT_AGENT, PRODUCT_PROMPT).with_file(settings.prompts_path.clone()),
    )
    .with_description("finds skin care products and their reviews in the catalog")
    .with_max_rounds(settings.max_tool_rounds)
}

pub fn main_agent(
    llm: Arc<dyn LlmClient>,
    product: Arc<dyn Agent>,
    settings: &AgentSettings,
) -> ReactAgent {
    let mut tools = ToolRegistry::new();
    tools.register(
        DelegateTool::new(product).with_description(
            "Call the product search agent to find skin care products based on user queries.",
        ),
    );
    tools.register(MessageTemplateTool);
    tools.register(SendMessageTool);

    ReactAgent::new(
        MAIN_AGENT,
        llm,
        ToolExecutor::new(tools, settings.tool_timeout_secs),
        PromptSource::inline(MAIN_AGENT, MAIN_PROMPT).with_file(settings.prompts_path.clone()),
    )
    .with_description("talks to the user and renders results as messages")
    .with_max_rounds(settings.max_tool_rounds)
}

/// 注册 product 与 main；main 通过委派工具直接持有 product 的句柄
pub fn build_shopping_registry(
    llm: Arc<dyn LlmClient>,
    catalog: Arc<dyn ProductCatalog>,
    settings: &AgentSettings,
) -> Result<AgentRegistry, AgentError> {
    let product = Arc::new(product_agent(Arc::clone(&llm), catalog, settings));
    let main = Arc::new(main_agent(llm, product.clone(), settings));

    let mut registry = AgentRegistry::new();
    registry.register(AgentDescriptor::managed_arc(product))?;
    registry.register(AgentDescriptor::managed_arc(main))?;
    Ok(registry)
}

//! 运行时装配：配置 → LLM 客户端 → 商品库 → Agent 注册表 → 编排引擎
//!
//! 网关与集成测试共用这一套装配逻辑。

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use crate::agents::{build_shopping_registry, AgentSettings};
use crate::catalog::{ProductCatalog, SqliteCatalog};
use crate::config::AppConfig;
use crate::context::ContextStore;
use crate::core::Orchestrator;
use crate::llm::{LlmClient, MockLlmClient, OpenAiClient, RetryConfig, RetryingLlmClient};

/// 按配置创建 LLM 客户端（带超时与重试）
///
/// provider 为 openai 且能拿到 API Key（配置或 OPENAI_API_KEY）时走 OpenAI 兼容端点，否则用 Mock。
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let api_key = cfg
        .llm
        .api_key
        .clone()
        .or_else(|| std::env::var("OPENAI_API_KEY").ok());

    let inner: Arc<dyn LlmClient> = match (provider.as_str(), api_key) {
        ("openai", Some(key)) => {
            tracing::info!(model = %cfg.llm.model, "Using OpenAI LLM");
            let mut client =
                OpenAiClient::new(cfg.llm.base_url.as_deref(), &cfg.llm.model, Some(&key));
            if let Some(t) = cfg.llm.temperature {
                client = client.with_temperature(t);
            }
            Arc::new(client)
        }
        ("mock", _) => {
            tracing::info!("Using Mock LLM");
            Arc::new(MockLlmClient)
        }
        _ => {
            tracing::warn!(provider = %provider, "No API key set or provider unknown, using Mock LLM");
            Arc::new(MockLlmClient)
        }
    };

    let retry = RetryConfig {
        max_attempts: cfg.llm.retry.max_attempts.max(1),
        request_timeout: Duration::from_secs(cfg.llm.timeouts.request),
        initial_backoff: Duration::from_millis(cfg.llm.retry.initial_backoff_ms),
        ..RetryConfig::default()
    };
    Arc::new(RetryingLlmClient::new(inner, retry))
}

pub fn agent_settings(cfg: &AppConfig) -> AgentSettings {
    AgentSettings {
        prompts_path: cfg.orchestrator.prompts_path.clone(),
        tool_timeout_secs: cfg.orchestrator.tool_timeout_secs,
        max_tool_rounds: cfg.orchestrator.max_tool_rounds,
    }
}

/// 用给定的 LLM 与商品库装配并初始化编排引擎
pub async fn build_orchestrator(
    cfg: &AppConfig,
    llm: Arc<dyn LlmClient>,
    catalog: Arc<dyn ProductCatalog>,
) -> anyhow::Result<Arc<Orchestrator>> {
    let registry = build_shopping_registry(llm, catalog, &agent_settings(cfg))
        .context("failed to register agents")?;
    let store = ContextStore::new(cfg.orchestrator.max_steps);
    let orchestrator = Orchestrator::new(Arc::new(registry), Arc::new(store))
        .with_history_limit(cfg.orchestrator.history_limit);
    orchestrator
        .initialize()
        .await
        .context("failed to initialize agents")?;
    Ok(Arc::new(orchestrator))
}

/// 完整启动：打开商品库、创建 LLM、装配编排引擎
pub async fn bootstrap(cfg: &AppConfig) -> anyhow::Result<Arc<Orchestrator>> {
    let catalog = SqliteCatalog::open(&cfg.catalog.database_path).with_context(|| {
        format!(
            "failed to open product database {}",
            cfg.catalog.database_path.display()
        )
    })?;
    match catalog.count() {
        Ok(n) => tracing::info!(products = n, path = %cfg.catalog.database_path.display(), "Product catalog ready"),
        Err(e) => tracing::warn!("Could not count products: {}", e),
    }
    let llm = create_llm_from_config(cfg);
    build_orchestrator(cfg, llm, Arc::new(catalog)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{MAIN_AGENT, PRODUCT_AGENT};

    #[tokio::test]
    async fn test_bootstrap_with_mock_llm() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = AppConfig::default();
        cfg.llm.provider = "mock".to_string();
        cfg.orchestrator.prompts_path = None;
        cfg.catalog.database_path = dir.path().join("db").join("products.db");

        let orchestrator = bootstrap(&cfg).await.unwrap();
        let status = orchestrator.status().await;
        assert!(status.initialized);
        let names: Vec<_> = status.agents.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec![PRODUCT_AGENT, MAIN_AGENT]);
    }
}

//! 基于 ReAct 循环的通用 Agent
//!
//! 名字、工具集与 system prompt 决定它是谁；MainAgent / ProductAgent 都是它的实例。
//! system prompt 在 initialize（或首次 execute）时从 prompts 文件加载，之后不再变化。

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::OnceCell;

use crate::agents::{Agent, AgentInput, AgentLifecycle, AgentOutput, AgentRequest};
use crate::context::{Message, Role};
use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::react::{react_loop, Planner, ReactSession, DEFAULT_MAX_TOOL_ROUNDS};
use crate::tools::ToolExecutor;

/// 模型没有给出任何文本时的回复
const EMPTY_RESPONSE: &str = "No response from agent";

/// system prompt 来源：prompts.toml 中 `[agents.<key>] system_prompt`，缺失时用内置文本
#[derive(Debug, Clone)]
pub struct PromptSource {
    pub key: String,
    pub fallback: String,
    pub file: Option<PathBuf>,
}

impl PromptSource {
    pub fn inline(key: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            fallback: text.into(),
            file: None,
        }
    }

    pub fn with_file(mut self, file: Option<PathBuf>) -> Self {
        self.file = file;
        self
    }

    /// 文件不存在或没有对应条目时退回内置文本；文件存在但无法解析视为初始化失败
    pub async fn load(&self) -> Result<String, AgentError> {
        let Some(path) = &self.file else {
            return Ok(self.fallback.clone());
        };
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), key = %self.key, "Prompt file not found, using built-in prompt");
                return Ok(self.fallback.clone());
            }
            Err(e) => {
                return Err(AgentError::Initialization(format!(
                    "read {}: {}",
                    path.display(),
                    e
                )))
            }
        };
        let doc: toml::Value = toml::from_str(&raw).map_err(|e| {
            AgentError::Initialization(format!("parse {}: {}", path.display(), e))
        })?;
        match doc
            .get("agents")
            .and_then(|a| a.get(&self.key))
            .and_then(|a| a.get("system_prompt"))
            .and_then(toml::Value::as_str)
        {
            Some(prompt) if !prompt.trim().is_empty() => Ok(prompt.trim().to_string()),
            _ => {
                tracing::warn!(path = %path.display(), key = %self.key, "No system_prompt entry, using built-in prompt");
                Ok(self.fallback.clone())
            }
        }
    }
}

pub struct ReactAgent {
    name: String,
    description: String,
    llm: Arc<dyn LlmClient>,
    executor: ToolExecutor,
    prompt: PromptSource,
    max_rounds: usize,
    planner: OnceCell<Planner>,
}

impl ReactAgent {
    pub fn new(
        name: impl Into<String>,
        llm: Arc<dyn LlmClient>,
        executor: ToolExecutor,
        prompt: PromptSource,
    ) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            llm,
            executor,
            prompt,
            max_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            planner: OnceCell::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds.max(1);
        self
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.executor.tool_names()
    }

    async fn planner(&self) -> Result<&Planner, AgentError> {
        self.planner
            .get_or_try_init(|| async {
                let prompt = self.prompt.load().await?;
                tracing::info!(
                    agent = %self.name,
                    tools = ?self.executor.tool_names(),
                    "Agent planner ready"
                );
                Ok::<_, AgentError>(Planner::new(Arc::clone(&self.llm), prompt))
            })
            .await
    }
}

#[async_trait]
impl Agent for ReactAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn execute(
        &self,
        input: &AgentInput,
        request: AgentRequest,
    ) -> Result<AgentOutput, AgentError> {
        let planner = self.planner().await?;
        let prompt = input.as_prompt();
        tracing::info!(
            agent = %self.name,
            context_id = request.context_id.as_deref().unwrap_or("-"),
            history = request.history.len(),
            "Executing agent"
        );

        let mut messages = request.history;
        let already_last = matches!(
            messages.last(),
            Some(m) if m.role == Role::User && m.content == prompt
        );
        if !already_last {
            messages.push(Message::user(prompt));
        }

        let result = react_loop(
            ReactSession {
                planner,
                executor: &self.executor,
                max_rounds: self.max_rounds,
                writer: request.writer,
                agent: &self.name,
            },
            messages,
        )
        .await?;

        let response = if result.response.trim().is_empty() {
            EMPTY_RESPONSE.to_string()
        } else {
            result.response
        };
        Ok(AgentOutput::text(response)
            .with_metadata("rounds", json!(result.rounds))
            .with_metadata("tools", json!(result.tools_used)))
    }
}

#[async_trait]
impl AgentLifecycle for ReactAgent {
    async fn initialize(&self) -> Result<(), AgentError> {
        self.planner().await.map(|_| ())
    }

    async fn shutdown(&self) -> Result<(), AgentError> {
        let (prompt_tokens, completion_tokens, total) = self.llm.token_usage();
        tracing::info!(
            agent = %self.name,
            prompt_tokens,
            completion_tokens,
            total,
            "Agent shutting down"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;
    use crate::tools::ToolRegistry;

    fn agent(llm: Arc<ScriptedLlmClient>, prompt: PromptSource) -> ReactAgent {
        ReactAgent::new("main", llm, ToolExecutor::new(ToolRegistry::new(), 5), prompt)
    }

    #[tokio::test]
    async fn test_prompt_loaded_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prompts.toml");
        std::fs::write(
            &path,
            "[agents.main]\nsystem_prompt = \"\"\"\nYou are Mocheong.\n\"\"\"\n",
        )
        .unwrap();

        let source = PromptSource::inline("main", "fallback").with_file(Some(path));
        assert_eq!(source.load().await.unwrap(), "You are Mocheong.");

        let other = PromptSource::inline("product", "fallback")
            .with_file(Some(dir.path().join("prompts.toml")));
        assert_eq!(other.load().await.unwrap(), "fallback");

        let missing = PromptSource::inline("main", "fallback")
            .with_file(Some(dir.path().join("absent.toml")));
        assert_eq!(missing.load().await.unwrap(), "fallback");
    }

    #[tokio::test]
    async fn test_broken_prompt_file_fails_initialize() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prompts.toml");
        std::fs::write(&path, "[agents.main\nsystem_prompt = ").unwrap();

        let llm = Arc::new(ScriptedLlmClient::new(["unused"]));
        let agent = agent(llm, PromptSource::inline("main", "x").with_file(Some(path)));
        let err = agent.initialize().await.unwrap_err();
        assert!(matches!(err, AgentError::Initialization(_)));
    }

    #[tokio::test]
    async fn test_history_not_duplicated() {
        let llm = Arc::new(ScriptedLlmClient::new(["안녕하세요"]));
        let agent = agent(llm.clone(), PromptSource::inline("main", "sys"));
        let out = agent
            .execute(
                &AgentInput::from("hello"),
                AgentRequest {
                    context_id: Some("session_1".to_string()),
                    history: vec![Message::user("hello")],
                    writer: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(out.response, "안녕하세요");
        assert_eq!(out.metadata["rounds"], json!(1));

        let calls = llm.calls().await;
        assert_eq!(calls[0].len(), 2);
        assert_eq!(calls[0][0].content, "sys");
    }

    #[tokio::test]
    async fn test_empty_model_output() {
        let llm = Arc::new(ScriptedLlmClient::new(["   "]));
        let agent = agent(llm, PromptSource::inline("main", "sys"));
        let out = agent
            .execute(&AgentInput::from("hi"), AgentRequest::default())
            .await
            .unwrap();
        assert_eq!(out.response, EMPTY_RESPONSE);
    }
}

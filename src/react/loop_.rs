//! ReAct 主循环
//!
//! Plan -> Act (Tool) -> Observe -> 下一轮 Plan，直到模型给出最终回复或达到工具轮数上限。
//! 工具失败以结构化 Observation 回填给模型；模型输出的工具调用 JSON 损坏时提示其重写（计入轮数）。
//! 循环对编排引擎不透明：引擎只看到 Writer 上的信封与最终的回复文本。

use crate::context::Message;
use crate::core::AgentError;
use crate::llm::LlmError;
use crate::react::Planner;
use crate::stream::ProgressWriter;
use crate::tools::{ToolContext, ToolExecutor};

/// 未配置时的工具轮数上限
pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 8;
/// 日志中 Observation 预览最大字符数
const OBSERVATION_PREVIEW_CHARS: usize = 200;

/// 一次 ReAct 运行的输入
pub struct ReactSession<'a> {
    pub planner: &'a Planner,
    pub executor: &'a ToolExecutor,
    /// 最多执行多少轮「Plan + 工具调用」
    pub max_rounds: usize,
    pub writer: Option<ProgressWriter>,
    /// 日志标签
    pub agent: &'a str,
}

/// ReAct 循环执行结果：最终回复与执行统计
#[derive(Debug, Clone, PartialEq)]
pub struct ReactResult {
    pub response: String,
    /// 调用 LLM 的轮数
    pub rounds: usize,
    /// 按调用顺序记录的工具名
    pub tools_used: Vec<String>,
}

/// JSON 解析失败时给模型的重试提示
fn retry_prompt(raw: &str) -> String {
    format!(
        "Your previous tool call was not valid JSON: {raw}. \
         To call a tool, output ONLY one JSON object like {{\"tool\": \"<name>\", \"args\": {{...}}}} \
         with no markdown or extra text. Otherwise reply with the final answer as plain text."
    )
}

/// 运行 ReAct 循环；messages 为本轮可见的对话（最后一条通常是用户输入）
pub async fn react_loop(
    session: ReactSession<'_>,
    mut messages: Vec<Message>,
) -> Result<ReactResult, AgentError> {
    let tools = session.executor.specs();
    let ctx = ToolContext::new(session.writer.clone());
    let mut tools_used = Vec::new();

    for round in 1..=session.max_rounds {
        tracing::debug!(agent = session.agent, round, "Planning");
        let generation = match session.planner.generate(&messages, &tools).await {
            Ok(g) => g,
            Err(LlmError::InvalidResponse(raw)) => {
                tracing::warn!(agent = session.agent, round, "Malformed tool call, asking model to retry");
                messages.push(Message::user(retry_prompt(&raw)));
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        if generation.is_final() {
            tracing::info!(
                agent = session.agent,
                rounds = round,
                tools = tools_used.len(),
                "ReAct loop finished"
            );
            return Ok(ReactResult {
                response: generation.content,
                rounds: round,
                tools_used,
            });
        }

        messages.push(Message::assistant(generation.content.clone()));
        for call in &generation.tool_calls {
            tracing::info!(agent = session.agent, tool = %call.tool, call_id = %call.id, "Tool call");
            let outcome = session
                .executor
                .execute(&call.tool, call.args.clone(), &ctx)
                .await;
            let observation = outcome.to_observation();
            let preview: String = observation.chars().take(OBSERVATION_PREVIEW_CHARS).collect();
            tracing::debug!(tool = %call.tool, success = outcome.success, observation = %preview, "Observation");
            tools_used.push(call.tool.clone());
            messages.push(Message::user(format!(
                "Observation from {}: {}",
                call.tool, observation
            )));
        }
    }

    tracing::warn!(agent = session.agent, max_rounds = session.max_rounds, "ReAct round limit reached");
    Err(AgentError::Execution(format!(
        "no final answer within {} tool rounds",
        session.max_rounds
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;
    use crate::tools::{Tool, ToolRegistry};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::Arc;

    struct Lookup;

    #[async_trait]
    impl Tool for Lookup {
        fn name(&self) -> &str {
            "lookup"
        }

        fn description(&self) -> &str {
            "returns a fixed product"
        }

        async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<Value, AgentError> {
            match args.get("id").and_then(Value::as_i64) {
                Some(1) => Ok(json!({"name": "Calm Cream"})),
                _ => Err(AgentError::ToolExecution("no such product".to_string())),
            }
        }
    }

    fn executor() -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(Lookup);
        ToolExecutor::new(registry, 5)
    }

    async fn run(llm: Arc<ScriptedLlmClient>, max_rounds: usize) -> Result<ReactResult, AgentError> {
        let planner = Planner::new(llm, "system");
        let executor = executor();
        react_loop(
            ReactSession {
                planner: &planner,
                executor: &executor,
                max_rounds,
                writer: None,
                agent: "test",
            },
            vec![Message::user("find product 1")],
        )
        .await
    }

    #[tokio::test]
    async fn test_tool_then_answer() {
        let llm = Arc::new(ScriptedLlmClient::new([
            r#"{"tool": "lookup", "args": {"id": 1}}"#,
            "It is Calm Cream.",
        ]));
        let result = run(llm.clone(), 4).await.unwrap();
        assert_eq!(result.response, "It is Calm Cream.");
        assert_eq!(result.rounds, 2);
        assert_eq!(result.tools_used, vec!["lookup"]);

        let second_call = &llm.calls().await[1];
        let observation = &second_call.last().unwrap().content;
        assert!(observation.starts_with("Observation from lookup"));
        assert!(observation.contains("Calm Cream"));
    }

    #[tokio::test]
    async fn test_tool_failure_is_fed_back() {
        let llm = Arc::new(ScriptedLlmClient::new([
            r#"{"tool": "lookup", "args": {"id": 9}}"#,
            "Sorry, not found.",
        ]));
        let result = run(llm.clone(), 4).await.unwrap();
        assert_eq!(result.response, "Sorry, not found.");
        let observation = llm.calls().await[1].last().unwrap().content.clone();
        assert!(observation.contains("\"success\":false"));
        assert!(observation.contains("no such product"));
    }

    #[tokio::test]
    async fn test_malformed_json_retried() {
        let llm = Arc::new(ScriptedLlmClient::new([r#"{"tool": "lookup", "args": "#, "Plain answer."]));
        let result = run(llm.clone(), 4).await.unwrap();
        assert_eq!(result.response, "Plain answer.");
        let retry = llm.calls().await[1].last().unwrap().content.clone();
        assert!(retry.starts_with("Your previous tool call was not valid JSON"));
    }

    #[tokio::test]
    async fn test_round_limit() {
        let llm = Arc::new(ScriptedLlmClient::new([
            r#"{"tool": "lookup", "args": {"id": 1}}"#,
            r#"{"tool": "lookup", "args": {"id": 1}}"#,
        ]));
        let err = run(llm, 2).await.unwrap_err();
        assert!(matches!(err, AgentError::Execution(_)));
    }

    #[tokio::test]
    async fn test_llm_failure_propagates() {
        let llm = Arc::new(ScriptedLlmClient::new(Vec::<String>::new()));
        let err = run(llm, 2).await.unwrap_err();
        assert!(matches!(err, AgentError::Llm(_)));
    }
}

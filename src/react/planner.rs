//! Planner：拼装 system prompt、调用 LLM，并把输出解析为最终回复或 Tool Call
//!
//! 模型以文本形式给出工具调用：单个 `{"tool": "...", "args": {...}}`，或这种对象组成的数组，
//! 可以包在 ```json 代码块里。没有工具调用的输出即为最终回复。

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::Message;
use crate::llm::{LlmClient, LlmError};
use crate::tools::{tool_call_schema_json, ToolSpec};

/// 模型请求的一次工具调用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default)]
    pub id: String,
    pub tool: String,
    #[serde(default)]
    pub args: Value,
}

/// 一轮推理的结果：tool_calls 为空即为最终回复
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Generation {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

impl Generation {
    pub fn is_final(&self) -> bool {
        self.tool_calls.is_empty()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ToolCallPayload {
    Many(Vec<ToolCall>),
    One(ToolCall),
}

fn decode_tool_calls(json_str: &str) -> Result<Vec<ToolCall>, LlmError> {
    let payload: ToolCallPayload = serde_json::from_str(json_str)
        .map_err(|e| LlmError::InvalidResponse(format!("{}: {}", e, json_str)))?;
    let calls = match payload {
        ToolCallPayload::Many(calls) => calls,
        ToolCallPayload::One(call) => vec![call],
    };
    Ok(calls
        .into_iter()
        .filter(|c| !c.tool.trim().is_empty())
        .enumerate()
        .map(|(i, mut c)| {
            if c.id.is_empty() {
                c.id = format!("call_{}", i);
            }
            c
        })
        .collect())
}

/// 解析 LLM 输出
///
/// - ```json 代码块，或整段以 `{` / `[` 开头：必须是合法的工具调用，否则返回 InvalidResponse，
///   由推理循环提示模型重试
/// - 正文中夹带的 `{...}` 只有能解析为工具调用时才算调用，否则整段视为最终回复
pub fn parse_llm_output(output: &str) -> Result<Generation, LlmError> {
    let trimmed = output.trim();

    let strict_json = if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()))
    } else if trimmed.starts_with('{') || trimmed.starts_with('[') {
        Some(trimmed)
    } else {
        None
    };

    let tool_calls = match strict_json {
        Some(json_str) => decode_tool_calls(json_str)?,
        None => match (trimmed.find('{'), trimmed.rfind('}')) {
            (Some(start), Some(end)) if start < end => {
                decode_tool_calls(&trimmed[start..=end]).unwrap_or_default()
            }
            _ => Vec::new(),
        },
    };

    Ok(Generation {
        content: trimmed.to_string(),
        tool_calls,
    })
}

/// Planner：持有 LLM 与基础 system prompt
pub struct Planner {
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>, system_prompt: impl Into<String>) -> Self {
        Self {
            llm,
            system_prompt: system_prompt.into(),
        }
    }

    pub fn base_system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// 获取 LLM 累计 token 使用统计
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    /// 基础 prompt + 可用工具列表 + 调用格式说明
    pub fn system_prompt_with_tools(&self, tools: &[ToolSpec]) -> String {
        if tools.is_empty() {
            return self.system_prompt.clone();
        }
        let tools_json = serde_json::to_string_pretty(tools).unwrap_or_else(|_| "[]".to_string());
        format!(
            "{}\n\n## Available tools\n{}\n\n## Calling a tool\n\
             To call a tool, reply with ONLY a JSON object matching this schema (or a JSON array of such \
             objects to call several tools in order), with no other text:\n{}\n\
             Example: {{\"tool\": \"{}\", \"args\": {{}}}}\n\
             Tool results come back as messages starting with \"Observation\". \
             When you have everything you need, reply with the final answer as plain text.",
            self.system_prompt,
            tools_json,
            tool_call_schema_json(),
            tools[0].name,
        )
    }

    /// 一轮推理：`generate(history, tools) -> {content, tool_calls}`
    pub async fn generate(
        &self,
        history: &[Message],
        tools: &[ToolSpec],
    ) -> Result<Generation, LlmError> {
        let mut full_messages = Vec::with_capacity(history.len() + 1);
        full_messages.push(Message::system(self.system_prompt_with_tools(tools)));
        full_messages.extend_from_slice(history);
        let output = self.llm.complete(&full_messages).await?;
        parse_llm_output(&output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;
    use serde_json::json;

    #[test]
    fn test_parse_plain_response() {
        let g = parse_llm_output("  추천 제품은 다음과 같습니다.  ").unwrap();
        assert!(g.is_final());
        assert_eq!(g.content, "추천 제품은 다음과 같습니다.");
    }

    #[test]
    fn test_parse_single_tool_call() {
        let g = parse_llm_output(r#"{"tool": "search_products", "args": {"brand": "Aqua"}}"#).unwrap();
        assert_eq!(g.tool_calls.len(), 1);
        assert_eq!(g.tool_calls[0].tool, "search_products");
        assert_eq!(g.tool_calls[0].args, json!({"brand": "Aqua"}));
        assert_eq!(g.tool_calls[0].id, "call_0");
    }

    #[test]
    fn test_parse_fenced_array() {
        let out = "Let me check.\n```json\n[{\"tool\": \"a\", \"args\": {}}, {\"tool\": \"b\"}]\n```";
        let g = parse_llm_output(out).unwrap();
        let names: Vec<&str> = g.tool_calls.iter().map(|c| c.tool.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(g.tool_calls[1].args, Value::Null);
    }

    #[test]
    fn test_malformed_json_is_invalid_response() {
        let err = parse_llm_output(r#"{"tool": "search_products", "args": "#).unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse(_)));
    }

    #[test]
    fn test_braces_inside_prose_are_not_tool_calls() {
        let g = parse_llm_output("Use the {brand} filter next time.").unwrap();
        assert!(g.is_final());
    }

    #[tokio::test]
    async fn test_generate_injects_tool_specs() {
        let llm = Arc::new(ScriptedLlmClient::new(["done"]));
        let planner = Planner::new(llm.clone(), "You are a shopping assistant.");
        let tools = vec![ToolSpec {
            name: "search_products".to_string(),
            description: "search".to_string(),
            parameters: json!({"type": "object"}),
        }];
        let g = planner.generate(&[Message::user("hi")], &tools).await.unwrap();
        assert_eq!(g.content, "done");

        let calls = llm.calls().await;
        assert!(calls[0][0].content.starts_with("You are a shopping assistant."));
        assert!(calls[0][0].content.contains("search_products"));
        assert_eq!(calls[0][1].content, "hi");
    }
}

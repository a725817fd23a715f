//! 工具参数与工具调用格式的 JSON Schema（schemars 自动生成）
//!
//! 工具参数用 `#[derive(Deserialize, JsonSchema)]` 的结构体声明，同一个类型既生成给模型看的
//! schema，又负责校验模型给出的 args。

use std::collections::HashMap;

use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::core::AgentError;

/// 工具调用请求格式：与 ReAct 解析的 `{"tool": "...", "args": {...}}` 一致（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ToolCallFormat {
    /// 工具名，如 search_products、send_message
    pub tool: String,
    /// 工具参数，结构见各工具的 parameters
    pub args: HashMap<String, Value>,
}

/// 返回工具调用的 JSON Schema 字符串，可拼入 system prompt
pub fn tool_call_schema_json() -> String {
    let schema = schema_for!(ToolCallFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

/// 参数类型的 JSON Schema
pub fn schema_of<T: JsonSchema>() -> Value {
    serde_json::to_value(schema_for!(T)).unwrap_or_else(|_| serde_json::json!({"type": "object"}))
}

/// 把模型给出的 args 解析为参数结构体；null 视为空对象
pub fn parse_args<T: DeserializeOwned>(tool: &str, args: Value) -> Result<T, AgentError> {
    let args = if args.is_null() {
        Value::Object(Default::default())
    } else {
        args
    };
    serde_json::from_value(args)
        .map_err(|e| AgentError::ToolExecution(format!("Invalid arguments for {tool}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize, JsonSchema)]
    struct Args {
        /// 必填
        command: String,
        #[serde(default)]
        limit: Option<u32>,
    }

    #[test]
    fn test_schema_lists_properties() {
        let schema = schema_of::<Args>();
        assert!(schema["properties"]["command"].is_object());
        assert_eq!(schema["required"], json!(["command"]));
        assert!(tool_call_schema_json().contains("\"tool\""));
    }

    #[test]
    fn test_parse_args_reports_tool_name() {
        let ok: Args = parse_args("t", json!({"command": "x"})).unwrap();
        assert_eq!(ok.command, "x");
        assert!(ok.limit.is_none());

        let err = parse_args::<Args>("call_product_agent", Value::Null).err().unwrap();
        assert!(
            matches!(err, AgentError::ToolExecution(msg) if msg.starts_with("Invalid arguments for call_product_agent"))
        );
    }
}

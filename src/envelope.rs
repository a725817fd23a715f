//! 前端消息信封（Envelope）
//!
//! 发往客户端的内容统一为 4 种信封：chatMessage / product / suggested / loading，
//! 以 `type` 字段区分。来自 LLM 的动态 JSON 必须先经过 [`Envelope::from_value`] 校验，
//! 校验失败的信封永远不会交给 Writer。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// 信封校验错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EnvelopeError {
    #[error("envelope must be a JSON object")]
    NotAnObject,

    #[error("missing required field `{0}`")]
    MissingField(String),

    #[error("unknown envelope type `{0}`")]
    UnknownType(String),

    #[error("invalid field `{field}`: {reason}")]
    InvalidField { field: String, reason: String },
}

/// 已知信封类型及其必填字段（`id` / `type` 之外）
const REQUIRED_FIELDS: &[(&str, &[&str])] = &[
    ("chatMessage", &["role", "content", "timestamp"]),
    ("product", &["products"]),
    ("suggested", &["suggestions"]),
    ("loading", &["content"]),
];

/// 发往客户端的信封
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Envelope {
    #[serde(rename = "chatMessage")]
    ChatMessage(ChatMessage),
    #[serde(rename = "product")]
    Product(ProductMessage),
    #[serde(rename = "suggested")]
    Suggested(SuggestedMessage),
    #[serde(rename = "loading")]
    Loading(LoadingMessage),
}

/// 普通对话消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: ChatRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    Agent,
    User,
}

/// 商品卡片消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductMessage {
    pub id: String,
    pub products: Vec<ProductCard>,
    #[serde(rename = "displayType")]
    pub display_type: DisplayType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// 商品展示形式：Box1 单品、Box2 网格（默认）、review 评论视图
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DisplayType {
    Box1,
    #[default]
    Box2,
    #[serde(rename = "review")]
    Review,
}

/// 商品 ID：数据库里是整数，LLM 生成时常为字符串
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProductId {
    Number(i64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductCard {
    pub id: ProductId,
    pub name: String,
    pub price: f64,
    pub rating: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(rename = "detailLink", default, skip_serializing_if = "Option::is_none")]
    pub detail_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviews: Option<Vec<ReviewCard>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewCard {
    pub text: String,
    pub sentiment: Sentiment,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

/// 快捷回复
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestedMessage {
    pub id: String,
    pub suggestions: Vec<Suggestion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    /// 按钮上显示的文字
    #[serde(rename = "displayMessage")]
    pub display_message: String,
    /// 点击后实际发送的消息
    pub message: String,
}

/// 临时进度提示，被同一流中的下一条 loading 覆盖
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadingMessage {
    pub id: String,
    pub content: String,
}

impl Envelope {
    /// 校验动态 JSON 并转为信封。
    ///
    /// 依次检查：对象、`id`、`type`、类型已知、类型必填字段；
    /// 唯一的隐式默认值是 product 缺省 `displayType` 时补为 `Box2`。
    /// 数字 `id` 会转成字符串。
    pub fn from_value(value: Value) -> Result<Self, EnvelopeError> {
        let Value::Object(mut map) = value else {
            return Err(EnvelopeError::NotAnObject);
        };

        let id = match map.get("id") {
            Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => return Err(EnvelopeError::MissingField("id".to_string())),
        };
        map.insert("id".to_string(), Value::String(id));

        let kind = match map.get("type") {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            _ => return Err(EnvelopeError::MissingField("type".to_string())),
        };

        let required = REQUIRED_FIELDS
            .iter()
            .find(|(name, _)| *name == kind)
            .map(|(_, fields)| *fields)
            .ok_or_else(|| EnvelopeError::UnknownType(kind.clone()))?;

        for field in required {
            if map.get(*field).map_or(true, Value::is_null) {
                return Err(EnvelopeError::MissingField(field.to_string()));
            }
        }

        if kind == "product" && map.get("displayType").map_or(true, Value::is_null) {
            map.insert("displayType".to_string(), Value::String("Box2".to_string()));
        }

        let envelope: Envelope =
            serde_json::from_value(Value::Object(map)).map_err(|e| EnvelopeError::InvalidField {
                field: kind.clone(),
                reason: e.to_string(),
            })?;
        envelope.check_ranges()?;
        Ok(envelope)
    }

    fn check_ranges(&self) -> Result<(), EnvelopeError> {
        if let Envelope::Product(p) = self {
            if let Some(card) = p.products.iter().find(|c| !(0.0..=5.0).contains(&c.rating)) {
                return Err(EnvelopeError::InvalidField {
                    field: "products.rating".to_string(),
                    reason: format!("{} is outside 0..=5 for '{}'", card.rating, card.name),
                });
            }
        }
        Ok(())
    }

    pub fn id(&self) -> &str {
        match self {
            Envelope::ChatMessage(m) => &m.id,
            Envelope::Product(m) => &m.id,
            Envelope::Suggested(m) => &m.id,
            Envelope::Loading(m) => &m.id,
        }
    }

    /// `type` 字段的取值
    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::ChatMessage(_) => "chatMessage",
            Envelope::Product(_) => "product",
            Envelope::Suggested(_) => "suggested",
            Envelope::Loading(_) => "loading",
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn loading(content: impl Into<String>) -> Self {
        Envelope::Loading(LoadingMessage {
            id: uuid::Uuid::new_v4().to_string(),
            content: content.into(),
        })
    }

    pub fn chat(role: ChatRole, content: impl Into<String>) -> Self {
        Envelope::ChatMessage(ChatMessage {
            id: format!("msg_{}", uuid::Uuid::new_v4()),
            role,
            content: content.into(),
            timestamp: Utc::now(),
        })
    }

    pub fn products(products: Vec<ProductCard>, display_type: DisplayType) -> Self {
        Envelope::Product(ProductMessage {
            id: format!("product_{}", uuid::Uuid::new_v4()),
            products,
            display_type,
            timestamp: Some(Utc::now()),
        })
    }

    pub fn suggested(suggestions: Vec<Suggestion>) -> Self {
        Envelope::Suggested(SuggestedMessage {
            id: format!("suggested_{}", uuid::Uuid::new_v4()),
            suggestions,
            timestamp: Some(Utc::now()),
        })
    }
}

//! get_message_template 工具：返回各类信封的示例结构，供模型照着拼 send_message 的参数

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::core::AgentError;
use crate::envelope::Envelope;
use crate::stream::emit;
use crate::tools::schema::{parse_args, schema_of};
use crate::tools::{Tool, ToolContext};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, JsonSchema)]
pub enum TemplateKind {
    #[serde(rename = "chatMessage")]
    ChatMessage,
    #[serde(rename = "product")]
    Product,
    #[serde(rename = "review")]
    Review,
    #[serde(rename = "suggested")]
    Suggested,
    #[serde(rename = "loading")]
    Loading,
}

impl TemplateKind {
    fn as_str(&self) -> &'static str {
        match self {
            TemplateKind::ChatMessage => "chatMessage",
            TemplateKind::Product => "product",
            TemplateKind::Review => "review",
            TemplateKind::Suggested => "suggested",
            TemplateKind::Loading => "loading",
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TemplateArgs {
    /// Which message type to fetch a template for
    pub message_type: TemplateKind,
}

const SAMPLE_IMAGE: &str = "https://mocheong-ai.s3.ap-southeast-2.amazonaws.com/A000000130138.jpg";

fn sample_products() -> Vec<Value> {
    vec![
        json!({"id": 1, "name": "Premium Shampoo for Oily Hair", "price": 2999, "rating": 4.5,
               "image": SAMPLE_IMAGE, "detailLink": "#", "rank": 1}),
        json!({"id": 2, "name": "Gentle Conditioner", "price": 1999, "rating": 4.2,
               "image": SAMPLE_IMAGE, "detailLink": "#", "rank": 2}),
        json!({"id": 3, "name": "Natural Hair Mask", "price": 3999, "rating": 4.8,
               "image": SAMPLE_IMAGE, "detailLink": "#", "rank": 3}),
    ]
}

/// 某类信封的示例；product 同时给出多商品与单商品两种排版
pub fn template_for(kind: TemplateKind) -> Value {
    let now = chrono::Utc::now().to_rfc3339();
    match kind {
        TemplateKind::ChatMessage => json!({
            "id": "1",
            "type": "chatMessage",
            "role": "agent",
            "content": "안녕하세요 무엇을 도와드릴까요??",
            "timestamp": now,
        }),
        TemplateKind::Product => {
            let products = sample_products();
            json!({
                "multiple": {
                    "id": "3",
                    "type": "product",
                    "products": products,
                    "displayType": "Box2",
                    "timestamp": now,
                },
                "single": {
                    "id": "2",
                    "type": "product",
                    "products": &products[..1],
                    "displayType": "Box1",
                    "timestamp": now,
                },
            })
        }
        TemplateKind::Review => json!({
            "id": "4",
            "type": "product",
            "products": [{
                "id": 1,
                "name": "Premium Shampoo for Oily Hair",
                "price": 2999,
                "rating": 4.5,
                "image": "",
                "reviews": [
                    {"text": "This shampoo really controls oil without drying my scalp!",
                     "sentiment": "Positive", "features": ["oil control", "not drying"]},
                    {"text": "Great scent and lathers well. Highly recommend.",
                     "sentiment": "Positive", "features": ["scent", "lathering"]},
                ],
            }],
            "displayType": "review",
            "timestamp": now,
        }),
        TemplateKind::Suggested => json!({
            "id": "7",
            "type": "suggested",
            "suggestions": [
                {"displayMessage": "스킨케어 추천", "message": "스킨케어 제품 추천해줘"},
                {"displayMessage": "인기 제품 추천", "message": "인기 제품 정보 알려줘"},
                {"displayMessage": "6번 제품 리뷰", "message": "6번 제품 리뷰 알려줘"},
            ],
            "timestamp": now,
        }),
        TemplateKind::Loading => json!({
            "id": "6",
            "type": "loading",
            "content": "AI 어시스턴트가 시작되고 있어요...",
        }),
    }
}

pub struct MessageTemplateTool;

#[async_trait]
impl Tool for MessageTemplateTool {
    fn name(&self) -> &str {
        "get_message_template"
    }

    fn description(&self) -> &str {
        "Retrieve the template object for a specific message type (chatMessage, product, review, suggested, loading)."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<TemplateArgs>()
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value, AgentError> {
        let args: TemplateArgs = parse_args(self.name(), args)?;
        let kind = args.message_type.as_str();
        emit(
            ctx.writer(),
            Envelope::loading(format!("응답 템플릿 검색 중... {}", kind)),
        );
        Ok(json!({
            "messageType": kind,
            "template": template_for(args.message_type),
            "success": true,
        }))
    }
}

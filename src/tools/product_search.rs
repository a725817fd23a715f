//! search_products / search_reviews 工具：ProductCatalog 的模型侧入口

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::catalog::{ProductCatalog, ProductFilters};
use crate::core::AgentError;
use crate::tools::schema::{parse_args, schema_of};
use crate::tools::{Tool, ToolContext};

pub struct SearchProductsTool {
    catalog: Arc<dyn ProductCatalog>,
}

impl SearchProductsTool {
    pub fn new(catalog: Arc<dyn ProductCatalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl Tool for SearchProductsTool {
    fn name(&self) -> &str {
        "search_products"
    }

    fn description(&self) -> &str {
        "Search for products by price range, rank, brand, category and ingredients. Returns structured product data without reviews."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<ProductFilters>()
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<Value, AgentError> {
        let filters: ProductFilters = parse_args(self.name(), args)?;
        tracing::debug!(filters = ?filters, "search_products");
        let products = self
            .catalog
            .search_products(filters)
            .await
            .map_err(|e| {
                tracing::warn!("Failed to search products: {}", e);
                AgentError::from(e)
            })?;
        tracing::info!(count = products.len(), "Products found");
        Ok(Value::Array(
            products.iter().map(|p| p.to_summary_value()).collect(),
        ))
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SearchReviewsArgs {
    /// The product ID to search reviews for
    pub product_id: ProductIdArg,
}

/// 模型有时给数字、有时给字符串
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum ProductIdArg {
    Number(i64),
    Text(String),
}

impl ProductIdArg {
    fn into_string(self) -> String {
        match self {
            ProductIdArg::Number(n) => n.to_string(),
            ProductIdArg::Text(s) => s,
        }
    }
}

pub struct SearchReviewsTool {
    catalog: Arc<dyn ProductCatalog>,
}

impl SearchReviewsTool {
    pub fn new(catalog: Arc<dyn ProductCatalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl Tool for SearchReviewsTool {
    fn name(&self) -> &str {
        "search_reviews"
    }

    fn description(&self) -> &str {
        "Fetch the reviews of a specific product by its id."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<SearchReviewsArgs>()
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<Value, AgentError> {
        let args: SearchReviewsArgs = parse_args(self.name(), args)?;
        let product_id = args.product_id.into_string();
        let reviews = self
            .catalog
            .search_reviews(&product_id)
            .await
            .map_err(|e| {
                tracing::warn!(product_id = %product_id, "Failed to search reviews: {}", e);
                AgentError::from(e)
            })?;
        tracing::info!(product_id = %product_id, count = reviews.len(), "Reviews found");
        Ok(Value::Array(reviews))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogError, NewProduct, SqliteCatalog};
    use serde_json::json;

    fn catalog() -> Arc<SqliteCatalog> {
        let catalog = SqliteCatalog::open_in_memory().unwrap();
        catalog
            .insert_product(&NewProduct {
                rank: Some(1),
                name: "Calm Cream".to_string(),
                brand: Some("Aqua".to_string()),
                price: 32000.0,
                rating: 4.8,
                ingredients: vec!["centella".to_string()],
                reviews: vec![json!({"text": "soothing", "sentiment": "Positive"})],
                ..Default::default()
            })
            .unwrap();
        Arc::new(catalog)
    }

    #[tokio::test]
    async fn test_search_products_strips_bulky_fields() {
        let tool = SearchProductsTool::new(catalog());
        let out = tool
            .execute(json!({"brand": "Aqua"}), &ToolContext::default())
            .await
            .unwrap();
        let first = &out.as_array().unwrap()[0];
        assert_eq!(first["name"], "Calm Cream");
        assert!(first.get("reviews").is_none());
        assert!(first.get("ingredients").is_none());
    }

    #[tokio::test]
    async fn test_search_reviews_accepts_numeric_id() {
        let tool = SearchReviewsTool::new(catalog());
        let out = tool
            .execute(json!({"productId": 1}), &ToolContext::default())
            .await
            .unwrap();
        assert_eq!(out[0]["text"], "soothing");

        let err = tool
            .execute(json!({"productId": "42"}), &ToolContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Catalog(CatalogError::ProductNotFound(_))));
        assert_eq!(err.code(), "catalog_error");
    }
}

//! 商品目录：ProductAgent 的只读数据源
//!
//! [`ProductCatalog`] 是工具层看到的唯一接口；[`SqliteCatalog`] 是基于 rusqlite 的实现。

pub mod sqlite;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use sqlite::SqliteCatalog;

/// 未指定 limit 时返回的条数
pub const DEFAULT_SEARCH_LIMIT: u32 = 10;
/// 单次查询的条数上限
pub const MAX_SEARCH_LIMIT: u32 = 100;

/// 允许作为 ORDER BY 的列
pub const ORDERABLE_COLUMNS: &[&str] = &[
    "id", "rank", "name", "brand", "price", "rating", "category", "created_at",
];

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Product not found: {0}")]
    ProductNotFound(String),

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    /// 阻塞任务被取消或 panic、连接锁中毒等
    #[error("Catalog backend failure: {0}")]
    Backend(String),
}

/// 商品 id 过滤：数字（或纯数字字符串）按 id 精确匹配，其余按名称模糊匹配
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum IdFilter {
    Number(i64),
    Text(String),
}

impl IdFilter {
    pub fn as_exact_id(&self) -> Option<i64> {
        match self {
            IdFilter::Number(n) => Some(*n),
            IdFilter::Text(s) => s.trim().parse().ok(),
        }
    }
}

/// search_products 的过滤条件（同时作为工具参数 schema）
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProductFilters {
    /// Product id to filter by (a non-numeric value matches the product name)
    #[serde(default)]
    pub id: Option<IdFilter>,
    /// Product name to filter by (substring match)
    #[serde(default)]
    pub name: Option<String>,
    /// Minimum price filter
    #[serde(default)]
    pub min_price: Option<f64>,
    /// Maximum price filter
    #[serde(default)]
    pub max_price: Option<f64>,
    /// Exact rank to filter by (1 is the best seller)
    #[serde(default)]
    pub rank: Option<i64>,
    /// Minimum rank filter
    #[serde(default)]
    pub min_rank: Option<i64>,
    /// Maximum rank filter
    #[serde(default)]
    pub max_rank: Option<i64>,
    /// Brand name to filter by (substring match)
    #[serde(default)]
    pub brand: Option<String>,
    /// Category to filter by (substring match)
    #[serde(default)]
    pub category: Option<String>,
    /// Ingredient to match, e.g. a chemical name
    #[serde(default)]
    pub ingredients: Option<String>,
    /// Field to order by: id, rank, name, brand, price, rating, category, created_at
    #[serde(default)]
    pub order_by: Option<String>,
    /// Direction to order by (asc or desc)
    #[serde(default)]
    pub order_direction: Option<String>,
    /// Maximum number of results to return (default 10)
    #[serde(default)]
    pub limit: Option<u32>,
    /// Number of results to skip
    #[serde(default)]
    pub offset: Option<u32>,
}

impl ProductFilters {
    pub fn effective_limit(&self) -> u32 {
        self.limit
            .unwrap_or(DEFAULT_SEARCH_LIMIT)
            .clamp(1, MAX_SEARCH_LIMIT)
    }

    /// 校验后的 ORDER BY 子句
    pub fn order_clause(&self) -> Result<String, CatalogError> {
        let column = match self.order_by.as_deref().map(str::trim) {
            None | Some("") => return Ok("\"rating\" DESC, \"id\" ASC".to_string()),
            Some(c) => c.to_lowercase(),
        };
        if !ORDERABLE_COLUMNS.contains(&column.as_str()) {
            return Err(CatalogError::InvalidFilter(format!(
                "cannot order by '{}'",
                column
            )));
        }
        let direction = match self.order_direction.as_deref() {
            Some(d) if d.eq_ignore_ascii_case("desc") => "DESC",
            _ => "ASC",
        };
        Ok(format!("\"{}\" {}", column, direction))
    }
}

/// products 表中的一行
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub id: i64,
    pub rank: Option<i64>,
    pub name: String,
    pub brand: Option<String>,
    pub price: f64,
    pub rating: f64,
    pub category: Option<String>,
    pub url: Option<String>,
    pub image_url: Option<String>,
    pub image_path: Option<String>,
    /// JSON 数组
    pub ingredients: Option<Value>,
    /// JSON 对象
    pub additional_info: Option<Value>,
    /// JSON 数组
    pub reviews: Option<Value>,
}

impl ProductRecord {
    /// 去掉体积大的字段，供模型浏览检索结果
    pub fn to_summary_value(&self) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Value::Object(map) = &mut value {
            for field in ["reviews", "additional_info", "ingredients"] {
                map.remove(field);
            }
        }
        value
    }
}

/// 新增商品（导入 / 测试数据）
#[derive(Clone, Debug, Default, Deserialize)]
pub struct NewProduct {
    pub rank: Option<i64>,
    pub name: String,
    pub brand: Option<String>,
    pub price: f64,
    pub rating: f64,
    pub category: Option<String>,
    pub url: Option<String>,
    pub image_url: Option<String>,
    #[serde(default)]
    pub ingredients: Vec<String>,
    #[serde(default)]
    pub additional_info: Option<Value>,
    #[serde(default)]
    pub reviews: Vec<Value>,
}

#[async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn search_products(
        &self,
        filters: ProductFilters,
    ) -> Result<Vec<ProductRecord>, CatalogError>;

    async fn get_product(&self, id: i64) -> Result<Option<ProductRecord>, CatalogError>;

    /// 商品的评论列表；商品不存在时返回 ProductNotFound
    async fn search_reviews(&self, product_id: &str) -> Result<Vec<Value>, CatalogError> {
        let id: i64 = product_id
            .trim()
            .parse()
            .map_err(|_| CatalogError::ProductNotFound(product_id.to_string()))?;
        let product = self
            .get_product(id)
            .await?
            .ok_or_else(|| CatalogError::ProductNotFound(product_id.to_string()))?;
        Ok(match product.reviews {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        })
    }
}

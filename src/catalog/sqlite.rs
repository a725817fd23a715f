//! 基于 rusqlite 的商品目录
//!
//! 连接放在 `Arc<Mutex<Connection>>` 里，每次查询在 spawn_blocking 中执行，避免阻塞 tokio worker。
//! 过滤条件全部走参数绑定；ORDER BY 列名来自白名单。

use std::fmt::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde_json::Value;

use crate::catalog::{CatalogError, NewProduct, ProductCatalog, ProductFilters, ProductRecord};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS products (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    rank INTEGER,
    name TEXT NOT NULL,
    brand TEXT,
    price REAL,
    rating REAL,
    category TEXT,
    url TEXT,
    image_url TEXT,
    image_path TEXT,
    ingredients TEXT,
    additional_info TEXT,
    reviews TEXT,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);
";

const COLUMNS: &str = "id, rank, name, brand, price, rating, category, url, image_url, image_path, \
                       ingredients, additional_info, reviews";

#[derive(Clone)]
pub struct SqliteCatalog {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCatalog {
    /// 打开（必要时创建）数据库文件并确保表存在
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)
                    .map_err(|e| CatalogError::Backend(format!("create {}: {}", dir.display(), e)))?;
            }
        }
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        tracing::info!(path = %path.display(), "Product catalog opened");
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, CatalogError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, CatalogError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 写入一条商品，返回新 id
    pub fn insert_product(&self, product: &NewProduct) -> Result<i64, CatalogError> {
        let conn = self.lock()?;
        let ingredients = serde_json::to_string(&product.ingredients).unwrap_or_else(|_| "[]".into());
        let reviews = serde_json::to_string(&product.reviews).unwrap_or_else(|_| "[]".into());
        let additional_info = product
            .additional_info
            .as_ref()
            .map(Value::to_string)
            .unwrap_or_else(|| "{}".to_string());
        conn.execute(
            "INSERT INTO products (rank, name, brand, price, rating, category, url, image_url,
                                   ingredients, additional_info, reviews)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                product.rank,
                product.name,
                product.brand,
                product.price,
                product.rating,
                product.category,
                product.url,
                product.image_url,
                ingredients,
                additional_info,
                reviews,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn count(&self) -> Result<i64, CatalogError> {
        let conn = self.lock()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM products", [], |r| r.get(0))?)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, CatalogError> {
        self.conn
            .lock()
            .map_err(|_| CatalogError::Backend("catalog connection lock poisoned".to_string()))
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, CatalogError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, CatalogError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| CatalogError::Backend("catalog connection lock poisoned".to_string()))?;
            f(&guard)
        })
        .await
        .map_err(|e| CatalogError::Backend(e.to_string()))?
    }
}

fn parse_json_column(row: &Row<'_>, column: &str) -> rusqlite::Result<Option<Value>> {
    let raw: Option<String> = row.get(column)?;
    Ok(raw.and_then(|s| serde_json::from_str(&s).ok()))
}

fn map_product_row(row: &Row<'_>) -> rusqlite::Result<ProductRecord> {
    Ok(ProductRecord {
        id: row.get("id")?,
        rank: row.get("rank")?,
        name: row.get("name")?,
        brand: row.get("brand")?,
        price: row.get::<_, Option<f64>>("price")?.unwrap_or_default(),
        rating: row.get::<_, Option<f64>>("rating")?.unwrap_or_default(),
        category: row.get("category")?,
        url: row.get("url")?,
        image_url: row.get("image_url")?,
        image_path: row.get("image_path")?,
        ingredients: parse_json_column(row, "ingredients")?,
        additional_info: parse_json_column(row, "additional_info")?,
        reviews: parse_json_column(row, "reviews")?,
    })
}

/// 根据过滤条件拼出 SQL 与绑定参数
fn build_search_query(filters: &ProductFilters) -> Result<(String, Vec<SqlValue>), CatalogError> {
    let mut sql = format!("SELECT {COLUMNS} FROM products WHERE 1=1");
    let mut params: Vec<SqlValue> = Vec::new();

    let like = |sql: &mut String, params: &mut Vec<SqlValue>, column: &str, needle: &str| {
        let _ = write!(sql, " AND \"{}\" LIKE ?{}", column, params.len() + 1);
        params.push(SqlValue::Text(format!("%{}%", needle)));
    };

    if let Some(id) = &filters.id {
        match (id.as_exact_id(), id) {
            (Some(n), _) => {
                let _ = write!(sql, " AND \"id\" = ?{}", params.len() + 1);
                params.push(SqlValue::Integer(n));
            }
            (None, crate::catalog::IdFilter::Text(name)) => like(&mut sql, &mut params, "name", name),
            (None, crate::catalog::IdFilter::Number(_)) => {}
        }
    }
    if let Some(name) = filters.name.as_deref().filter(|s| !s.is_empty()) {
        like(&mut sql, &mut params, "name", name);
    }
    if let Some(brand) = filters.brand.as_deref().filter(|s| !s.is_empty()) {
        like(&mut sql, &mut params, "brand", brand);
    }
    if let Some(category) = filters.category.as_deref().filter(|s| !s.is_empty()) {
        like(&mut sql, &mut params, "category", category);
    }
    if let Some(ingredients) = filters.ingredients.as_deref().filter(|s| !s.is_empty()) {
        like(&mut sql, &mut params, "ingredients", ingredients);
    }

    let ranges: [(&str, &str, Option<SqlValue>); 5] = [
        ("rank", "=", filters.rank.map(SqlValue::Integer)),
        ("rank", ">=", filters.min_rank.map(SqlValue::Integer)),
        ("rank", "<=", filters.max_rank.map(SqlValue::Integer)),
        ("price", ">=", filters.min_price.map(SqlValue::Real)),
        ("price", "<=", filters.max_price.map(SqlValue::Real)),
    ];
    for (column, op, value) in ranges {
        if let Some(v) = value {
            let _ = write!(sql, " AND \"{}\" {} ?{}", column, op, params.len() + 1);
            params.push(v);
        }
    }

    let _ = write!(
        sql,
        " ORDER BY {} LIMIT {} OFFSET {}",
        filters.order_clause()?,
        filters.effective_limit(),
        filters.offset.unwrap_or(0)
    );
    Ok((sql, params))
}

#[async_trait]
impl ProductCatalog for SqliteCatalog {
    async fn search_products(
        &self,
        filters: ProductFilters,
    ) -> Result<Vec<ProductRecord>, CatalogError> {
        let (sql, params) = build_search_query(&filters)?;
        tracing::debug!(sql = %sql, params = params.len(), "Searching products");
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(params.iter()), map_product_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    async fn get_product(&self, id: i64) -> Result<Option<ProductRecord>, CatalogError> {
        self.with_conn(move |conn| {
            let sql = format!("SELECT {COLUMNS} FROM products WHERE id = ?1");
            Ok(conn.query_row(&sql, [id], map_product_row).optional()?)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn product(name: &str, brand: &str, price: f64, rating: f64, rank: i64) -> NewProduct {
        NewProduct {
            rank: Some(rank),
            name: name.to_string(),
            brand: Some(brand.to_string()),
            price,
            rating,
            category: Some("skincare".to_string()),
            ingredients: vec!["water".to_string(), "glycerin".to_string()],
            reviews: vec![json!({"text": "moist", "sentiment": "positive"})],
            ..Default::default()
        }
    }

    fn seeded() -> SqliteCatalog {
        let catalog = SqliteCatalog::open_in_memory().unwrap();
        catalog.insert_product(&product("Hydra Toner", "Aqua", 18000.0, 4.2, 3)).unwrap();
        catalog.insert_product(&product("Calm Cream", "Aqua", 32000.0, 4.8, 1)).unwrap();
        catalog.insert_product(&product("Sun Fluid", "Solar", 15000.0, 4.8, 2)).unwrap();
        catalog
    }

    #[tokio::test]
    async fn test_default_order_is_rating_then_id() {
        let catalog = seeded();
        let rows = catalog.search_products(ProductFilters::default()).await.unwrap();
        let names: Vec<&str> = rows.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Calm Cream", "Sun Fluid", "Hydra Toner"]);
    }

    #[tokio::test]
    async fn test_filters_combine() {
        let catalog = seeded();
        let rows = catalog
            .search_products(ProductFilters {
                brand: Some("aqua".to_string()),
                max_price: Some(20000.0),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "Hydra Toner");
        assert_eq!(rows[0].ingredients, Some(json!(["water", "glycerin"])));
    }

    #[tokio::test]
    async fn test_rank_range_and_order_by() {
        let catalog = seeded();
        let rows = catalog
            .search_products(ProductFilters {
                min_rank: Some(1),
                max_rank: Some(2),
                order_by: Some("price".to_string()),
                order_direction: Some("asc".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        let names: Vec<&str> = rows.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Sun Fluid", "Calm Cream"]);
    }

    #[tokio::test]
    async fn test_exact_rank() {
        let catalog = seeded();
        let rows = catalog
            .search_products(ProductFilters {
                rank: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "Sun Fluid");

        // 与范围条件同时给出时取交集
        let rows = catalog
            .search_products(ProductFilters {
                rank: Some(3),
                max_rank: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_order_by_rejected() {
        let catalog = seeded();
        let err = catalog
            .search_products(ProductFilters {
                order_by: Some("secret".to_string()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::InvalidFilter(_)));
    }

    #[tokio::test]
    async fn test_search_reviews() {
        let catalog = seeded();
        let reviews = catalog.search_reviews("2").await.unwrap();
        assert_eq!(reviews.len(), 1);
        assert_eq!(reviews[0]["text"], "moist");

        let err = catalog.search_reviews("999").await.unwrap_err();
        assert!(matches!(err, CatalogError::ProductNotFound(_)));
    }

    #[tokio::test]
    async fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("products.db");
        let catalog = SqliteCatalog::open(&path).unwrap();
        catalog.insert_product(&product("Lip Balm", "Soft", 5000.0, 3.9, 9)).unwrap();
        drop(catalog);

        let reopened = SqliteCatalog::open(&path).unwrap();
        assert_eq!(reopened.count().unwrap(), 1);
    }
}

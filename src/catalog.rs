use crate::errors::{SettlementError, SettlementResult};
use crate::models::Product;
use sqlx::PgPool;

/// Read-only view of the product catalog.
///
/// The catalog is owned elsewhere; the settlement core only looks up
/// `{status, moq, wholesale_price, retail_price}` to validate and price
/// order lines, and never writes.
#[derive(Clone)]
pub struct CatalogClient {
    pool: PgPool,
}

impl CatalogClient {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn product(&self, product_id: &str) -> SettlementResult<Product> {
        sqlx::query_as::<_, Product>(
            r#"
            SELECT id, status, moq, wholesale_price, retail_price
            FROM products
            WHERE id = $1
            "#,
        )
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| SettlementError::NotFound(format!("product {}", product_id)))
    }
}

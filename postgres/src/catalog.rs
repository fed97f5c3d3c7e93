//! Product catalogue.

use crate::{PostgresStore, store_error};
use flashsale_core::error::StoreError;
use flashsale_core::repository::ProductCatalog;
use flashsale_core::store::StoreFuture;
use flashsale_core::types::{Product, ProductId};

impl PostgresStore {
    /// Insert or update a product and its stock baseline.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if the write fails.
    pub async fn upsert_product(&self, product: &Product, baseline: u64) -> Result<(), StoreError> {
        let baseline = i64::try_from(baseline)
            .map_err(|_| StoreError::Serialization(format!("Baseline too large: {baseline}")))?;

        sqlx::query(
            r"
            INSERT INTO products (product_id, name, price_cents, stock_baseline)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (product_id) DO UPDATE
            SET name = EXCLUDED.name,
                price_cents = EXCLUDED.price_cents,
                stock_baseline = EXCLUDED.stock_baseline
            ",
        )
        .bind(product.product_id.get())
        .bind(&product.name)
        .bind(product.price_cents)
        .bind(baseline)
        .execute(self.pool())
        .await
        .map_err(|e| store_error("upsert_product", e))?;

        tracing::info!(product_id = %product.product_id, baseline, "Product upserted");
        Ok(())
    }
}

impl ProductCatalog for PostgresStore {
    fn find_product(&self, product_id: ProductId) -> StoreFuture<'_, Option<Product>> {
        Box::pin(async move {
            metrics::counter!("flashsale_durable_product_queries_total").increment(1);
            let row: Option<(i64, String, i64)> = sqlx::query_as(
                r"
                SELECT product_id, name, price_cents
                FROM products
                WHERE product_id = $1
                ",
            )
            .bind(product_id.get())
            .fetch_optional(self.pool())
            .await
            .map_err(|e| store_error("find_product", e))?;

            Ok(row.map(|(id, name, price_cents)| Product {
                product_id: ProductId::new(id),
                name,
                price_cents,
            }))
        })
    }

    fn list_product_ids(&self) -> StoreFuture<'_, Vec<ProductId>> {
        Box::pin(async move {
            let ids: Vec<(i64,)> = sqlx::query_as("SELECT product_id FROM products ORDER BY product_id")
                .fetch_all(self.pool())
                .await
                .map_err(|e| store_error("list_product_ids", e))?;

            Ok(ids.into_iter().map(|(id,)| ProductId::new(id)).collect())
        })
    }

    fn read_stock_baseline(&self, product_id: ProductId) -> StoreFuture<'_, Option<u64>> {
        Box::pin(async move {
            let row: Option<(i64,)> =
                sqlx::query_as("SELECT stock_baseline FROM products WHERE product_id = $1")
                    .bind(product_id.get())
                    .fetch_optional(self.pool())
                    .await
                    .map_err(|e| store_error("read_stock_baseline", e))?;

            row.map(|(baseline,)| {
                u64::try_from(baseline).map_err(|_| {
                    StoreError::Serialization(format!("Negative stock baseline: {baseline}"))
                })
            })
            .transpose()
        })
    }
}

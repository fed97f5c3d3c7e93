//! Order persistence.

use crate::{PostgresStore, store_error};
use chrono::{DateTime, Utc};
use flashsale_core::error::StoreError;
use flashsale_core::repository::OrderRepository;
use flashsale_core::store::StoreFuture;
use flashsale_core::types::{Order, OrderId, OrderStatus, ProductId, UserId};
use sqlx::Row;
use uuid::Uuid;

const ALL_STATUSES: [OrderStatus; 3] = [
    OrderStatus::Pending,
    OrderStatus::Paid,
    OrderStatus::Cancelled,
];

fn row_to_order(row: &sqlx::postgres::PgRow) -> Result<Order, StoreError> {
    let decode = |e| store_error("decode order", e);
    let status: String = row.try_get("status").map_err(decode)?;
    let status = OrderStatus::parse(&status)
        .ok_or_else(|| StoreError::Serialization(format!("Invalid order status: {status}")))?;
    let quantity: i32 = row.try_get("quantity").map_err(decode)?;
    let quantity = u32::try_from(quantity)
        .map_err(|_| StoreError::Serialization(format!("Invalid order quantity: {quantity}")))?;
    let order_id: Uuid = row.try_get("order_id").map_err(decode)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(decode)?;

    Ok(Order {
        order_id: OrderId::from_uuid(order_id),
        user_id: UserId::new(row.try_get("user_id").map_err(decode)?),
        product_id: ProductId::new(row.try_get("product_id").map_err(decode)?),
        quantity,
        amount_cents: row.try_get("amount_cents").map_err(decode)?,
        status,
        created_at,
    })
}

impl OrderRepository for PostgresStore {
    fn insert_order(&self, order: Order) -> StoreFuture<'_, OrderId> {
        Box::pin(async move {
            let quantity = i32::try_from(order.quantity).map_err(|_| {
                StoreError::Serialization(format!("Order quantity too large: {}", order.quantity))
            })?;

            sqlx::query(
                r"
                INSERT INTO orders (
                    order_id, user_id, product_id, quantity, amount_cents, status, created_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7)
                ",
            )
            .bind(order.order_id.as_uuid())
            .bind(order.user_id.get())
            .bind(order.product_id.get())
            .bind(quantity)
            .bind(order.amount_cents)
            .bind(order.status.as_str())
            .bind(order.created_at)
            .execute(self.pool())
            .await
            .map_err(|e| store_error("insert_order", e))?;

            tracing::debug!(
                order_id = %order.order_id,
                product_id = %order.product_id,
                user_id = %order.user_id,
                quantity = order.quantity,
                "Order inserted"
            );
            Ok(order.order_id)
        })
    }

    fn update_order_status(
        &self,
        order_id: OrderId,
        status: OrderStatus,
    ) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let sources: Vec<&str> = ALL_STATUSES
                .into_iter()
                .filter(|from| from.can_transition_to(status))
                .map(OrderStatus::as_str)
                .collect();
            if sources.is_empty() {
                return Ok(false);
            }

            let result = sqlx::query(
                r"
                UPDATE orders
                SET status = $1, updated_at = now()
                WHERE order_id = $2 AND status = ANY($3)
                ",
            )
            .bind(status.as_str())
            .bind(order_id.as_uuid())
            .bind(sources)
            .execute(self.pool())
            .await
            .map_err(|e| store_error("update_order_status", e))?;

            let updated = result.rows_affected() == 1;
            tracing::info!(
                order_id = %order_id,
                status = status.as_str(),
                updated,
                "Order status update"
            );
            Ok(updated)
        })
    }

    fn find_order(&self, order_id: OrderId) -> StoreFuture<'_, Option<Order>> {
        Box::pin(async move {
            let row = sqlx::query(
                r"
                SELECT order_id, user_id, product_id, quantity, amount_cents, status, created_at
                FROM orders
                WHERE order_id = $1
                ",
            )
            .bind(order_id.as_uuid())
            .fetch_optional(self.pool())
            .await
            .map_err(|e| store_error("find_order", e))?;

            row.as_ref().map(row_to_order).transpose()
        })
    }

    fn committed_quantity(&self, product_id: ProductId) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let (committed,): (i64,) = sqlx::query_as(
                r"
                SELECT COALESCE(SUM(quantity), 0)::BIGINT
                FROM orders
                WHERE product_id = $1 AND status <> 'CANCELLED'
                ",
            )
            .bind(product_id.get())
            .fetch_one(self.pool())
            .await
            .map_err(|e| store_error("committed_quantity", e))?;

            u64::try_from(committed).map_err(|_| {
                StoreError::Serialization(format!("Negative committed quantity: {committed}"))
            })
        })
    }
}

//! In-memory durable store for tests.
//!
//! Implements both [`OrderRepository`] and [`ProductCatalog`] over
//! `Arc<Mutex<..>>` maps, counts catalogue queries so tests can assert how many
//! reached the durable store, and can be told to fail or slow down.

use flashsale_core::error::StoreError;
use flashsale_core::repository::{OrderRepository, ProductCatalog};
use flashsale_core::store::StoreFuture;
use flashsale_core::types::{Order, OrderId, OrderStatus, Product, ProductId, UserId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Default)]
struct Tables {
    products: HashMap<ProductId, (Product, u64)>,
    orders: HashMap<OrderId, Order>,
    by_buyer: HashMap<(ProductId, UserId), OrderId>,
}

/// In-memory orders and products.
///
/// `(product_id, user_id)` is unique across live orders, as in the relational
/// schema: a cancelled order does not block a new one.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDurableStore {
    tables: Arc<Mutex<Tables>>,
    product_queries: Arc<AtomicUsize>,
    order_inserts: Arc<AtomicUsize>,
    query_delay: Arc<Mutex<Option<Duration>>>,
    unavailable: Arc<AtomicBool>,
    failing_inserts: Arc<AtomicUsize>,
}

impl InMemoryDurableStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a product with its initial stock.
    pub fn add_product(&self, product: Product, baseline: u64) {
        if let Ok(mut tables) = self.tables.lock() {
            tables
                .products
                .insert(product.product_id, (product, baseline));
        }
    }

    /// Add `count` products with ids `1..=count`, each with `baseline` units.
    pub fn seed_products(&self, count: i64, baseline: u64) {
        for id in 1..=count {
            self.add_product(
                Product {
                    product_id: ProductId::new(id),
                    name: format!("Product {id}"),
                    price_cents: 1_000,
                },
                baseline,
            );
        }
    }

    /// How many times `find_product` reached this store.
    #[must_use]
    pub fn product_queries(&self) -> usize {
        self.product_queries.load(Ordering::SeqCst)
    }

    /// How many order inserts were attempted.
    #[must_use]
    pub fn order_inserts(&self) -> usize {
        self.order_inserts.load(Ordering::SeqCst)
    }

    /// Delay every `find_product` call, widening the window for a stampede.
    pub fn set_query_delay(&self, delay: Option<Duration>) {
        if let Ok(mut slot) = self.query_delay.lock() {
            *slot = delay;
        }
    }

    /// Make every call fail with `StoreError::Unavailable`.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Fail the next `count` order inserts with a transient error.
    pub fn fail_next_inserts(&self, count: usize) {
        self.failing_inserts.store(count, Ordering::SeqCst);
    }

    /// Snapshot of every stored order.
    #[must_use]
    pub fn orders(&self) -> Vec<Order> {
        self.tables
            .lock()
            .map(|tables| tables.orders.values().cloned().collect())
            .unwrap_or_default()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "in-memory durable store switched off".to_string(),
            ));
        }
        Ok(())
    }

    fn with_tables<T>(&self, operation: impl FnOnce(&mut Tables) -> T) -> Result<T, StoreError> {
        self.check_available()?;
        let mut tables = self
            .tables
            .lock()
            .map_err(|_| StoreError::Unavailable("Mutex lock failed".to_string()))?;
        Ok(operation(&mut tables))
    }

    fn current_delay(&self) -> Option<Duration> {
        self.query_delay.lock().ok().and_then(|delay| *delay)
    }
}

impl OrderRepository for InMemoryDurableStore {
    fn insert_order(&self, order: Order) -> StoreFuture<'_, OrderId> {
        Box::pin(async move {
            self.order_inserts.fetch_add(1, Ordering::SeqCst);
            self.check_available()?;
            let failing = self
                .failing_inserts
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
            if failing.is_ok() {
                return Err(StoreError::Unavailable("injected insert failure".to_string()));
            }

            self.with_tables(|tables| {
                let buyer = (order.product_id, order.user_id);
                let live = tables
                    .by_buyer
                    .get(&buyer)
                    .and_then(|existing| tables.orders.get(existing))
                    .is_some_and(|existing| existing.status != OrderStatus::Cancelled);
                if live {
                    return Err(StoreError::Conflict(format!(
                        "order already exists for product {} and user {}",
                        order.product_id, order.user_id
                    )));
                }
                let order_id = order.order_id;
                tables.by_buyer.insert(buyer, order_id);
                tables.orders.insert(order_id, order);
                Ok(order_id)
            })?
        })
    }

    fn update_order_status(
        &self,
        order_id: OrderId,
        status: OrderStatus,
    ) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            self.with_tables(|tables| match tables.orders.get_mut(&order_id) {
                Some(order) if order.status.can_transition_to(status) => {
                    order.status = status;
                    true
                }
                _ => false,
            })
        })
    }

    fn find_order(&self, order_id: OrderId) -> StoreFuture<'_, Option<Order>> {
        Box::pin(async move { self.with_tables(|tables| tables.orders.get(&order_id).cloned()) })
    }

    fn committed_quantity(&self, product_id: ProductId) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            self.with_tables(|tables| {
                tables
                    .orders
                    .values()
                    .filter(|order| {
                        order.product_id == product_id && order.status != OrderStatus::Cancelled
                    })
                    .map(|order| u64::from(order.quantity))
                    .sum()
            })
        })
    }
}

impl ProductCatalog for InMemoryDurableStore {
    fn find_product(&self, product_id: ProductId) -> StoreFuture<'_, Option<Product>> {
        Box::pin(async move {
            self.product_queries.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.current_delay() {
                tokio::time::sleep(delay).await;
            }
            self.with_tables(|tables| {
                tables
                    .products
                    .get(&product_id)
                    .map(|(product, _)| product.clone())
            })
        })
    }

    fn list_product_ids(&self) -> StoreFuture<'_, Vec<ProductId>> {
        Box::pin(async move {
            self.with_tables(|tables| {
                let mut ids: Vec<_> = tables.products.keys().copied().collect();
                ids.sort();
                ids
            })
        })
    }

    fn read_stock_baseline(&self, product_id: ProductId) -> StoreFuture<'_, Option<u64>> {
        Box::pin(async move {
            self.with_tables(|tables| tables.products.get(&product_id).map(|(_, baseline)| *baseline))
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn product(id: i64) -> Product {
        Product {
            product_id: ProductId::new(id),
            name: "Phone".to_string(),
            price_cents: 500,
        }
    }

    #[tokio::test]
    async fn second_order_for_same_buyer_conflicts() {
        let store = InMemoryDurableStore::new();
        let first = Order::pending(UserId::new(1), &product(1), 1, Utc::now());
        let second = Order::pending(UserId::new(1), &product(1), 1, Utc::now());

        store.insert_order(first).await.unwrap();
        assert!(matches!(
            store.insert_order(second).await,
            Err(StoreError::Conflict(_))
        ));
        assert_eq!(store.orders().len(), 1);
    }

    #[tokio::test]
    async fn cancelled_order_does_not_block_a_new_one() {
        let store = InMemoryDurableStore::new();
        let first = Order::pending(UserId::new(1), &product(1), 1, Utc::now());
        let first_id = store.insert_order(first).await.unwrap();
        assert!(store.update_order_status(first_id, OrderStatus::Cancelled).await.unwrap());

        let second = Order::pending(UserId::new(1), &product(1), 1, Utc::now());
        let second_id = store.insert_order(second).await.unwrap();
        assert_ne!(first_id, second_id);

        let third = Order::pending(UserId::new(1), &product(1), 1, Utc::now());
        assert!(matches!(
            store.insert_order(third).await,
            Err(StoreError::Conflict(_))
        ));
        assert_eq!(store.orders().len(), 2);
        assert_eq!(store.committed_quantity(ProductId::new(1)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn injected_insert_failures_are_transient() {
        let store = InMemoryDurableStore::new();
        store.fail_next_inserts(1);
        let order = Order::pending(UserId::new(1), &product(1), 1, Utc::now());

        let err = store.insert_order(order.clone()).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(store.insert_order(order.clone()).await.unwrap(), order.order_id);
        assert_eq!(store.order_inserts(), 2);
    }

    #[tokio::test]
    async fn status_updates_only_leave_pending() {
        let store = InMemoryDurableStore::new();
        let order = Order::pending(UserId::new(1), &product(1), 2, Utc::now());
        let id = store.insert_order(order).await.unwrap();

        assert!(store.update_order_status(id, OrderStatus::Paid).await.unwrap());
        assert!(!store.update_order_status(id, OrderStatus::Cancelled).await.unwrap());
        assert_eq!(store.committed_quantity(ProductId::new(1)).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn catalogue_counts_queries() {
        let store = InMemoryDurableStore::new();
        store.seed_products(3, 10);
        assert!(store.find_product(ProductId::new(2)).await.unwrap().is_some());
        assert!(store.find_product(ProductId::new(9)).await.unwrap().is_none());
        assert_eq!(store.product_queries(), 2);
        assert_eq!(store.list_product_ids().await.unwrap().len(), 3);
        assert_eq!(
            store.read_stock_baseline(ProductId::new(1)).await.unwrap(),
            Some(10)
        );
    }
}

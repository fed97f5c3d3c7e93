//! Durable store contracts.
//!
//! The durable store owns orders and the product catalogue. It is never on the
//! hot path of a stock decrement; the cache protection layer sits in front of
//! [`ProductCatalog`] and only the orchestrator writes through
//! [`OrderRepository`].

use crate::store::StoreFuture;
use crate::types::{Order, OrderId, OrderStatus, Product, ProductId};

/// Order persistence.
pub trait OrderRepository: Send + Sync {
    /// Insert a new order.
    ///
    /// # Errors
    ///
    /// - `Conflict`: a live (not cancelled) order for the same
    ///   `(product_id, user_id)` already exists
    /// - `Unavailable`: the durable store could not be reached
    fn insert_order(&self, order: Order) -> StoreFuture<'_, OrderId>;

    /// Move an order to `status`.
    ///
    /// Returns `false` if the order does not exist or is not in a state that
    /// can move to `status` (see [`OrderStatus::can_transition_to`]).
    fn update_order_status(&self, order_id: OrderId, status: OrderStatus)
    -> StoreFuture<'_, bool>;

    /// Load an order by id.
    fn find_order(&self, order_id: OrderId) -> StoreFuture<'_, Option<Order>>;

    /// Units of `product_id` held by orders that are not cancelled.
    fn committed_quantity(&self, product_id: ProductId) -> StoreFuture<'_, u64>;
}

/// Product catalogue reads.
pub trait ProductCatalog: Send + Sync {
    /// Load a product; `None` if it does not exist.
    fn find_product(&self, product_id: ProductId) -> StoreFuture<'_, Option<Product>>;

    /// Every legitimate product id, used to build the existence filter.
    fn list_product_ids(&self) -> StoreFuture<'_, Vec<ProductId>>;

    /// Initial stock a product was put on sale with.
    fn read_stock_baseline(&self, product_id: ProductId) -> StoreFuture<'_, Option<u64>>;
}

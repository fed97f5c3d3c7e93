//! Key layout in the shared store.
//!
//! All components derive their keys from one [`KeySpace`] so the decrement,
//! expiry and repair scripts, which rebuild keys server-side from the prefix,
//! always agree with the runtime.

use crate::types::{ProductId, UserId};

/// Default prefix for every key the core writes.
pub const DEFAULT_PREFIX: &str = "flashsale:";

/// Namespaced key builder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeySpace {
    prefix: String,
}

impl Default for KeySpace {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}

impl KeySpace {
    /// Creates a key space rooted at `prefix` (should end with `:`).
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// The raw prefix, passed to scripts that build keys themselves.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Stock hash: `{prefix}stock:{product}`
    #[must_use]
    pub fn stock(&self, product_id: ProductId) -> String {
        format!("{}stock:{product_id}", self.prefix)
    }

    /// Reservation mark hash: `{prefix}mark:{product}:{user}`
    #[must_use]
    pub fn mark(&self, product_id: ProductId, user_id: UserId) -> String {
        format!("{}mark:{product_id}:{user_id}", self.prefix)
    }

    /// Sorted set of reserved marks scored by deadline.
    #[must_use]
    pub fn pending_reservations(&self) -> String {
        format!("{}reservations:pending", self.prefix)
    }

    /// Member of the pending set: `product|user|token|quantity`
    #[must_use]
    pub fn pending_member(
        product_id: ProductId,
        user_id: UserId,
        token: &str,
        quantity: u32,
    ) -> String {
        format!("{product_id}|{user_id}|{token}|{quantity}")
    }

    /// Lock lease hash for a resource.
    #[must_use]
    pub fn lock(&self, resource: &str) -> String {
        format!("{}lock:{resource}", self.prefix)
    }

    /// Primary cache entry for a product.
    #[must_use]
    pub fn product_cache(&self, product_id: ProductId) -> String {
        format!("{}cache:product:{product_id}", self.prefix)
    }

    /// Replica `index` of a hot product's cache entry.
    #[must_use]
    pub fn product_cache_replica(&self, product_id: ProductId, index: usize) -> String {
        format!("{}cache:product:{product_id}:replica:{index}", self.prefix)
    }

    /// Short-lived refill lock for a product's cache entry.
    #[must_use]
    pub fn product_refill_lock(&self, product_id: ProductId) -> String {
        format!("{}cache:refill:{product_id}", self.prefix)
    }
}

/// Parse a pending-set member back into its parts.
#[must_use]
pub fn parse_pending_member(member: &str) -> Option<(ProductId, UserId, String, u32)> {
    let mut parts = member.split('|');
    let product = parts.next()?.parse().ok()?;
    let user = parts.next()?.parse().ok()?;
    let token = parts.next()?.to_string();
    let quantity = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((product, user, token, quantity))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_share_the_prefix() {
        let keys = KeySpace::new("test:");
        assert_eq!(keys.stock(ProductId::new(1)), "test:stock:1");
        assert_eq!(keys.mark(ProductId::new(1), UserId::new(2)), "test:mark:1:2");
        assert_eq!(
            keys.product_cache_replica(ProductId::new(3), 4),
            "test:cache:product:3:replica:4"
        );
        assert_eq!(keys.lock("purchase:1"), "test:lock:purchase:1");
    }

    #[test]
    fn pending_member_parses_back() {
        let member = KeySpace::pending_member(ProductId::new(5), UserId::new(6), "tok", 2);
        assert_eq!(
            parse_pending_member(&member),
            Some((ProductId::new(5), UserId::new(6), "tok".to_string(), 2))
        );
        assert_eq!(parse_pending_member("5|6|tok"), None);
        assert_eq!(parse_pending_member("5|6|tok|2|extra"), None);
    }
}

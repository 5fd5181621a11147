use std::{sync::Arc, time::Duration};

use shared::{
    domain::{CartItem, Product, ProductId, UserId},
    protocol::{CartAddQuery, CartRemoveQuery},
};
use tracing::{debug, warn};

use crate::{
    backend::CommerceBackend,
    broadcast::{bind_derived, BroadcastCell},
    error::{ClientError, ClientResult},
    normalizer::normalize_cart,
    optimistic::{Mutation, MutationCoordinator, MutationHandle},
    session::Session,
    status::StatusNotifier,
};

pub struct CartService {
    backend: Arc<dyn CommerceBackend>,
    session: Arc<Session>,
    coordinator: MutationCoordinator<Vec<CartItem>>,
    badge: Arc<BroadcastCell<u32>>,
}

impl CartService {
    pub fn new(
        backend: Arc<dyn CommerceBackend>,
        session: Arc<Session>,
        status: Arc<StatusNotifier>,
        settle_delay: Duration,
    ) -> Self {
        let cell = Arc::new(BroadcastCell::new("cart", Vec::new()));
        let badge = Arc::new(BroadcastCell::new("cart_badge", 0));
        bind_derived(&cell, &badge, |items: &Vec<CartItem>| item_count(items));
        Self {
            backend,
            session,
            coordinator: MutationCoordinator::new("cart", cell, status, settle_delay),
            badge,
        }
    }

    pub fn cell(&self) -> &Arc<BroadcastCell<Vec<CartItem>>> {
        self.coordinator.cell()
    }

    /// Total quantity across lines, kept in sync with the cart.
    pub fn badge(&self) -> &Arc<BroadcastCell<u32>> {
        &self.badge
    }

    pub fn items(&self) -> Arc<Vec<CartItem>> {
        self.cell().current()
    }

    pub fn total(&self) -> f64 {
        self.items().iter().map(CartItem::line_total).sum()
    }

    /// Fetches and normalizes the cart. On failure the previous snapshot is
    /// left in place.
    pub async fn refresh(&self) -> ClientResult<Arc<Vec<CartItem>>> {
        let user_id = self.session.require_user()?;
        match fetch_cart(self.backend.as_ref(), user_id).await {
            Ok(items) => {
                debug!(%user_id, lines = items.len(), "cart: refreshed");
                self.cell().replace(items);
                Ok(self.items())
            }
            Err(err) => {
                warn!(%user_id, error = %err, "cart: refresh failed; keeping last snapshot");
                Err(err)
            }
        }
    }

    pub fn add(&self, product: &Product, quantity: u32) -> ClientResult<MutationHandle> {
        let user_id = self.session.require_user()?;
        let product_id = product
            .id
            .ok_or_else(|| ClientError::validation("Product has no id"))?;
        if quantity == 0 {
            return Err(ClientError::validation("Quantity must be at least 1"));
        }

        let line_product = product.clone();
        let backend = Arc::clone(&self.backend);
        let refetch_backend = Arc::clone(&self.backend);
        let mutation = Mutation::new(
            format!("add product {product_id} to cart"),
            move |items: &Vec<CartItem>| with_added(items, line_product, quantity),
            move |_| {
                let backend = Arc::clone(&backend);
                async move {
                    backend
                        .add_to_cart(&CartAddQuery {
                            user_id: user_id.0,
                            product_id: product_id.0,
                            qty: quantity,
                        })
                        .await
                }
            },
        )
        .entity(cart_key(user_id))
        .revert(move |items: &Vec<CartItem>| with_subtracted(items, product_id, quantity))
        .refetch(move || {
            let backend = Arc::clone(&refetch_backend);
            async move { fetch_cart(backend.as_ref(), user_id).await }
        })
        .retry_on_timeout()
        .on_success("Added to cart")
        .on_failure("Failed to add item to cart");

        Ok(self.coordinator.submit(mutation))
    }

    pub fn remove(&self, product_id: ProductId) -> ClientResult<MutationHandle> {
        let user_id = self.session.require_user()?;
        let removed = self
            .items()
            .iter()
            .find(|item| item.product.id == Some(product_id))
            .cloned();
        let backend = Arc::clone(&self.backend);
        let refetch_backend = Arc::clone(&self.backend);
        let mutation = Mutation::new(
            format!("remove product {product_id} from cart"),
            move |items: &Vec<CartItem>| {
                items
                    .iter()
                    .filter(|item| item.product.id != Some(product_id))
                    .cloned()
                    .collect()
            },
            move |_| {
                let backend = Arc::clone(&backend);
                async move {
                    backend
                        .remove_from_cart(&CartRemoveQuery {
                            user_id: user_id.0,
                            product_id: product_id.0,
                        })
                        .await
                }
            },
        )
        .entity(cart_key(user_id))
        .revert(move |items: &Vec<CartItem>| {
            let mut next = items.clone();
            if let Some(line) = removed {
                if !next.iter().any(|item| item.product.id == Some(product_id)) {
                    next.push(line);
                }
            }
            next
        })
        .refetch(move || {
            let backend = Arc::clone(&refetch_backend);
            async move { fetch_cart(backend.as_ref(), user_id).await }
        })
        .retry_on_timeout()
        .on_success("Removed from cart")
        .on_failure("Failed to remove item from cart");

        Ok(self.coordinator.submit(mutation))
    }

    /// Drops the local snapshot without telling the backend.
    pub fn clear_local(&self) {
        self.cell().replace(Vec::new());
    }
}

pub async fn fetch_cart(
    backend: &dyn CommerceBackend,
    user_id: UserId,
) -> ClientResult<Vec<CartItem>> {
    let raw = backend.cart(user_id).await?;
    Ok(normalize_cart(&raw))
}

fn cart_key(user_id: UserId) -> String {
    format!("cart:{user_id}")
}

fn item_count(items: &[CartItem]) -> u32 {
    items
        .iter()
        .fold(0_u32, |total, item| total.saturating_add(item.quantity))
}

fn with_added(items: &[CartItem], product: Product, quantity: u32) -> Vec<CartItem> {
    let mut next = items.to_vec();
    match next
        .iter_mut()
        .find(|item| item.product.id.is_some() && item.product.id == product.id)
    {
        Some(existing) => existing.quantity = existing.quantity.saturating_add(quantity),
        None => next.push(CartItem {
            id: None,
            cart_id: None,
            product,
            quantity,
        }),
    }
    next
}

/// Takes back `quantity` units of one product, dropping the line at zero.
fn with_subtracted(items: &[CartItem], product_id: ProductId, quantity: u32) -> Vec<CartItem> {
    items
        .iter()
        .filter_map(|item| {
            if item.product.id != Some(product_id) {
                return Some(item.clone());
            }
            let remaining = item.quantity.saturating_sub(quantity);
            (remaining > 0).then(|| CartItem {
                quantity: remaining,
                ..item.clone()
            })
        })
        .collect()
}

#[cfg(test)]
#[path = "tests/cart_tests.rs"]
mod tests;

use std::sync::Arc;

use shared::domain::{Product, ProductId, SellerId};
use tracing::{debug, info};

use crate::{
    backend::{CommerceBackend, DeleteRoute},
    broadcast::BroadcastCell,
    error::{ClientError, ClientResult},
    fallback::{FallbackChain, FallbackSuccess},
    normalizer::{normalize_product, normalize_products},
    status::StatusNotifier,
};

pub struct CatalogService {
    backend: Arc<dyn CommerceBackend>,
    status: Arc<StatusNotifier>,
    products: Arc<BroadcastCell<Vec<Product>>>,
    search_term: Arc<BroadcastCell<String>>,
    visible: Arc<BroadcastCell<Vec<Product>>>,
}

impl CatalogService {
    pub fn new(backend: Arc<dyn CommerceBackend>, status: Arc<StatusNotifier>) -> Self {
        let products = Arc::new(BroadcastCell::new("products", Vec::new()));
        let search_term = Arc::new(BroadcastCell::new("search_term", String::new()));
        let visible = Arc::new(BroadcastCell::new("visible_products", Vec::new()));

        // The visible list depends on two cells; each side reads the other's
        // latest value when it changes.
        let weak_visible = Arc::downgrade(&visible);
        let weak_term = Arc::downgrade(&search_term);
        products.subscribe(move |products: &Vec<Product>| {
            if let (Some(visible), Some(term)) = (weak_visible.upgrade(), weak_term.upgrade()) {
                visible.replace(filter_products(products, &term.current()));
            }
        });
        let weak_visible = Arc::downgrade(&visible);
        let weak_products = Arc::downgrade(&products);
        search_term.subscribe(move |term: &String| {
            let upgraded = (weak_visible.upgrade(), weak_products.upgrade());
            if let (Some(visible), Some(products)) = upgraded {
                visible.replace(filter_products(&products.current(), term));
            }
        });

        Self {
            backend,
            status,
            products,
            search_term,
            visible,
        }
    }

    pub fn products(&self) -> &Arc<BroadcastCell<Vec<Product>>> {
        &self.products
    }

    /// Products matching the current search term.
    pub fn visible(&self) -> &Arc<BroadcastCell<Vec<Product>>> {
        &self.visible
    }

    pub fn set_search_term(&self, term: impl Into<String>) {
        self.search_term.replace(term.into());
    }

    pub fn clear_search(&self) {
        self.search_term.replace(String::new());
    }

    pub fn search_term(&self) -> String {
        (*self.search_term.current()).clone()
    }

    pub async fn refresh(&self) -> ClientResult<Arc<Vec<Product>>> {
        let raw = self.backend.all_products().await?;
        let products = normalize_products(&raw);
        debug!(count = products.len(), "catalog: refreshed");
        self.products.replace(products);
        Ok(self.products.current())
    }

    pub async fn get(&self, id: ProductId) -> ClientResult<Product> {
        let raw = self.backend.product(id).await?;
        if !raw.is_object() {
            return Err(ClientError::Decode(format!("product {id} response was not an object")));
        }
        Ok(normalize_product(&raw))
    }

    pub async fn add(&self, seller_id: SellerId, product: Product) -> ClientResult<Product> {
        validate(&product)?;
        let raw = self
            .backend
            .add_product(seller_id, &product)
            .await
            .inspect_err(|err| {
                self.status
                    .failure(format!("Failed to add product: {}", err.user_message()))
            })?;
        let created = if raw.is_object() {
            normalize_product(&raw)
        } else {
            Product {
                seller_id: Some(seller_id),
                ..product
            }
        };
        self.products.update(|products| {
            let mut next = products.clone();
            next.push(created.clone());
            next
        });
        info!(%seller_id, product_id = ?created.id, "catalog: product added");
        self.status.success("Product added successfully");
        Ok(created)
    }

    pub async fn update(&self, id: ProductId, product: Product) -> ClientResult<Product> {
        validate(&product)?;
        let raw = self
            .backend
            .update_product(id, &product)
            .await
            .inspect_err(|err| {
                self.status
                    .failure(format!("Failed to update product: {}", err.user_message()))
            })?;
        let updated = if raw.is_object() {
            normalize_product(&raw)
        } else {
            Product {
                id: Some(id),
                ..product
            }
        };
        self.products.update(|products| {
            products
                .iter()
                .map(|existing| {
                    if existing.id == Some(id) {
                        updated.clone()
                    } else {
                        existing.clone()
                    }
                })
                .collect()
        });
        self.status.success("Product updated successfully");
        Ok(updated)
    }

    /// Tries each known delete route in order until one is accepted.
    pub async fn delete(&self, id: ProductId) -> ClientResult<FallbackSuccess<()>> {
        let mut chain = FallbackChain::new(format!("delete product {id}"));
        for route in DeleteRoute::ORDERED {
            let backend = Arc::clone(&self.backend);
            chain = chain.then(route.label(), move || async move {
                backend.delete_product(id, route).await
            });
        }

        match chain.execute().await {
            Ok(success) => {
                self.products.update(|products| {
                    products
                        .iter()
                        .filter(|product| product.id != Some(id))
                        .cloned()
                        .collect()
                });
                info!(product_id = %id, route = %success.strategy, "catalog: product deleted");
                self.status.success("Product deleted successfully");
                Ok(success)
            }
            Err(err) => {
                self.status.failure("Failed to delete product");
                Err(err)
            }
        }
    }
}

/// Case-insensitive match of `term` against name or description. A blank
/// term matches everything.
pub fn filter_products(products: &[Product], term: &str) -> Vec<Product> {
    let needle = term.trim().to_lowercase();
    if needle.is_empty() {
        return products.to_vec();
    }
    products
        .iter()
        .filter(|product| {
            product.name.to_lowercase().contains(&needle)
                || product.description.to_lowercase().contains(&needle)
        })
        .cloned()
        .collect()
}

fn validate(product: &Product) -> ClientResult<()> {
    if product.name.trim().is_empty() {
        return Err(ClientError::validation("Product name is required"));
    }
    if !product.price.is_finite() || product.price < 0.0 {
        return Err(ClientError::validation("Product price must be zero or more"));
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/catalog_tests.rs"]
mod tests;

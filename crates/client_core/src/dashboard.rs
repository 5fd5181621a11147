use std::{sync::Arc, time::Duration};

use serde_json::Value;
use shared::{
    domain::{DashboardTotals, Order, Product, SellerId},
    protocol::DashboardSummary,
};
use tracing::{info, warn};

use crate::{
    backend::CommerceBackend,
    broadcast::BroadcastCell,
    error::{ClientError, ClientResult},
    fallback::{FallbackChain, FallbackSuccess},
    normalizer::{normalize_orders, normalize_products},
    polling::PollingController,
    session::Session,
    status::StatusNotifier,
};

pub struct SellerDashboard {
    backend: Arc<dyn CommerceBackend>,
    session: Arc<Session>,
    status: Arc<StatusNotifier>,
    orders: Arc<BroadcastCell<Vec<Order>>>,
    products: Arc<BroadcastCell<Vec<Product>>>,
    totals: Arc<BroadcastCell<DashboardTotals>>,
    order_poller: PollingController,
    product_poller: PollingController,
}

impl SellerDashboard {
    pub fn new(
        backend: Arc<dyn CommerceBackend>,
        session: Arc<Session>,
        status: Arc<StatusNotifier>,
    ) -> Self {
        let orders = Arc::new(BroadcastCell::new("dashboard_orders", Vec::new()));
        let products = Arc::new(BroadcastCell::new("dashboard_products", Vec::new()));
        let totals = Arc::new(BroadcastCell::new(
            "dashboard_totals",
            DashboardTotals::default(),
        ));

        let weak_totals = Arc::downgrade(&totals);
        let weak_products = Arc::downgrade(&products);
        orders.subscribe(move |orders: &Vec<Order>| {
            if let (Some(totals), Some(products)) = (weak_totals.upgrade(), weak_products.upgrade())
            {
                totals.replace(compute_totals(orders, &products.current()));
            }
        });
        let weak_totals = Arc::downgrade(&totals);
        let weak_orders = Arc::downgrade(&orders);
        products.subscribe(move |products: &Vec<Product>| {
            if let (Some(totals), Some(orders)) = (weak_totals.upgrade(), weak_orders.upgrade()) {
                totals.replace(compute_totals(&orders.current(), products));
            }
        });

        Self {
            backend,
            session,
            status,
            orders,
            products,
            totals,
            order_poller: PollingController::new("dashboard_orders"),
            product_poller: PollingController::new("dashboard_products"),
        }
    }

    pub fn orders(&self) -> &Arc<BroadcastCell<Vec<Order>>> {
        &self.orders
    }

    pub fn products(&self) -> &Arc<BroadcastCell<Vec<Product>>> {
        &self.products
    }

    pub fn totals(&self) -> &Arc<BroadcastCell<DashboardTotals>> {
        &self.totals
    }

    /// Manual order refresh. On failure the current list stays on screen.
    pub async fn refresh_orders(&self) -> ClientResult<FallbackSuccess<Vec<Order>>> {
        let admin_id = self.session.admin_id().await;
        match fetch_orders(Arc::clone(&self.backend), admin_id).await {
            Ok(success) => {
                let count = success.value.len();
                self.orders.replace(success.value.clone());
                info!(
                    admin_id = ?admin_id,
                    count,
                    strategy = %success.strategy,
                    "dashboard: orders refreshed"
                );
                self.status
                    .success(format!("Refreshed! {count} orders found"));
                Ok(success)
            }
            Err(err) => {
                warn!(admin_id = ?admin_id, error = %err, "dashboard: order refresh failed");
                self.status
                    .failure(format!("Failed to refresh orders: {}", err.user_message()));
                Err(err)
            }
        }
    }

    pub async fn refresh_products(&self) -> ClientResult<FallbackSuccess<Vec<Product>>> {
        let admin_id = self.session.admin_id().await;
        let success = fetch_products(Arc::clone(&self.backend), admin_id).await?;
        self.products.replace(success.value.clone());
        Ok(success)
    }

    /// Starts (or restarts) both pollers. The seller id is resolved once here.
    pub async fn start_polling(&self, interval: Duration) {
        let admin_id = self.session.admin_id().await;

        let backend = Arc::clone(&self.backend);
        self.order_poller.start(
            interval,
            move || {
                let backend = Arc::clone(&backend);
                async move {
                    fetch_orders(backend, admin_id)
                        .await
                        .map(|success| success.value)
                }
            },
            Arc::clone(&self.orders),
        );

        let backend = Arc::clone(&self.backend);
        self.product_poller.start(
            interval,
            move || {
                let backend = Arc::clone(&backend);
                async move {
                    fetch_products(backend, admin_id)
                        .await
                        .map(|success| success.value)
                }
            },
            Arc::clone(&self.products),
        );
    }

    pub fn stop_polling(&self) {
        self.order_poller.stop();
        self.product_poller.stop();
    }

    pub fn is_polling(&self) -> bool {
        self.order_poller.is_active() || self.product_poller.is_active()
    }

    /// Server-computed summary for the current seller.
    pub async fn remote_summary(&self) -> ClientResult<DashboardSummary> {
        let seller_id = self
            .session
            .admin_id()
            .await
            .ok_or_else(|| ClientError::validation("No seller account is selected"))?;
        self.backend.seller_dashboard(seller_id).await
    }
}

/// Seller-scoped order endpoints when a seller id is known, the global ones
/// otherwise.
pub async fn fetch_orders(
    backend: Arc<dyn CommerceBackend>,
    admin_id: Option<SellerId>,
) -> ClientResult<FallbackSuccess<Vec<Order>>> {
    let primary = Arc::clone(&backend);
    let secondary = backend;
    let chain: FallbackChain<'static, Value> = match admin_id {
        Some(id) => FallbackChain::new(format!("refresh orders for seller {id}"))
            .then("GET /seller/orders/{id}", move || async move {
                primary.seller_orders(id).await
            })
            .then("GET /order/admin/{id}", move || async move {
                secondary.admin_orders(id).await
            }),
        None => FallbackChain::new("refresh all orders")
            .then("GET /seller/all-orders", move || async move {
                primary.seller_all_orders().await
            })
            .then("GET /order/all", move || async move {
                secondary.all_orders().await
            }),
    };
    let success = chain.execute().await?;
    Ok(FallbackSuccess {
        value: normalize_orders(&success.value),
        strategy: success.strategy,
        failures: success.failures,
    })
}

pub async fn fetch_products(
    backend: Arc<dyn CommerceBackend>,
    admin_id: Option<SellerId>,
) -> ClientResult<FallbackSuccess<Vec<Product>>> {
    let primary = Arc::clone(&backend);
    let mut chain: FallbackChain<'static, Value> = FallbackChain::new("refresh products");
    if let Some(id) = admin_id {
        chain = chain.then("GET /product/admin/{id}", move || async move {
            primary.seller_products(id).await
        });
    }
    let chain = chain.then("GET /product/all", move || async move {
        backend.all_products().await
    });
    let success = chain.execute().await?;
    Ok(FallbackSuccess {
        value: normalize_products(&success.value),
        strategy: success.strategy,
        failures: success.failures,
    })
}

pub fn compute_totals(orders: &[Order], products: &[Product]) -> DashboardTotals {
    DashboardTotals {
        total_orders: orders.len(),
        total_revenue: orders.iter().map(Order::total).sum(),
        total_products: products.len(),
    }
}

#[cfg(test)]
#[path = "tests/dashboard_tests.rs"]
mod tests;

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use chrono::Utc;
use shared::{
    domain::{Address, CartItem, LocalOrder, Order, OrderId, UserId},
    protocol::PlaceOrderRequest,
};
use tracing::{debug, info};

use crate::{
    backend::CommerceBackend,
    broadcast::BroadcastCell,
    error::{ClientError, ClientResult},
    local_store::LocalStore,
    normalizer::{normalize_orders, DEFAULT_ORDER_STATUS},
    optimistic::{Mutation, MutationCoordinator},
    session::Session,
    status::StatusNotifier,
};

pub struct OrderService {
    backend: Arc<dyn CommerceBackend>,
    session: Arc<Session>,
    store: Arc<LocalStore<LocalOrder>>,
    coordinator: MutationCoordinator<Vec<LocalOrder>>,
}

impl OrderService {
    pub async fn open(
        backend: Arc<dyn CommerceBackend>,
        session: Arc<Session>,
        store: Arc<LocalStore<LocalOrder>>,
        status: Arc<StatusNotifier>,
    ) -> Self {
        let orders = store.load().await;
        debug!(count = orders.len(), "orders: local history loaded");
        let cell = Arc::new(BroadcastCell::new("orders", orders));
        Self {
            backend,
            session,
            store,
            coordinator: MutationCoordinator::new("orders", cell, status, Duration::ZERO),
        }
    }

    pub fn cell(&self) -> &Arc<BroadcastCell<Vec<LocalOrder>>> {
        self.coordinator.cell()
    }

    /// Orders this device placed for `user_id`, oldest first.
    pub fn history(&self, user_id: UserId) -> Vec<LocalOrder> {
        self.cell()
            .current()
            .iter()
            .filter(|order| order.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Places an order for the current cart and records it locally.
    ///
    /// The order shows up in the history as pending immediately; it is
    /// persisted only once the backend accepts it. A failed history write is
    /// reported as an error even though the backend already has the order.
    pub async fn place_order(
        &self,
        items: &[CartItem],
        address: Option<&Address>,
    ) -> ClientResult<LocalOrder> {
        let user_id = self.session.require_user()?;
        if items.is_empty() {
            return Err(ClientError::validation("Your cart is empty"));
        }
        let address = address
            .ok_or_else(|| ClientError::validation("Please select or create a delivery address"))?;

        let local_id = OrderId(self.store.allocate_id());
        let pending = LocalOrder {
            id: local_id,
            user_id,
            status: DEFAULT_ORDER_STATUS.to_string(),
            items: items.to_vec(),
            total: items.iter().map(CartItem::line_total).sum(),
            address: Some(address.clone()),
            order_date: Utc::now(),
            pending: true,
        };

        let confirmed_slot: Arc<Mutex<Option<LocalOrder>>> = Arc::new(Mutex::new(None));
        let merge_slot = Arc::clone(&confirmed_slot);
        let backend = Arc::clone(&self.backend);
        let store = Arc::clone(&self.store);
        let request = PlaceOrderRequest {
            address_id: Some(address.id),
        };

        let mutation = Mutation::new(
            format!("place order for user {user_id}"),
            move |orders: &Vec<LocalOrder>| {
                let mut next = orders.clone();
                next.push(pending);
                next
            },
            move |_| {
                let backend = Arc::clone(&backend);
                let request = request.clone();
                async move { backend.place_order(user_id, &request).await }
            },
        )
        .entity(format!("order:{local_id}"))
        .revert(move |orders: &Vec<LocalOrder>| {
            orders
                .iter()
                .filter(|order| !(order.id == local_id && order.pending))
                .cloned()
                .collect()
        })
        .merge(move |orders: &Vec<LocalOrder>, placed| {
            orders
                .iter()
                .map(|order| {
                    if order.id != local_id || !order.pending {
                        return order.clone();
                    }
                    let confirmed = LocalOrder {
                        id: placed.order_id.unwrap_or(local_id),
                        status: placed
                            .status
                            .clone()
                            .filter(|s| !s.trim().is_empty())
                            .unwrap_or_else(|| DEFAULT_ORDER_STATUS.to_string()),
                        pending: false,
                        ..order.clone()
                    };
                    *merge_slot.lock().unwrap_or_else(PoisonError::into_inner) =
                        Some(confirmed.clone());
                    confirmed
                })
                .collect()
        })
        .after_commit(move |orders| async move {
            let settled: Vec<LocalOrder> =
                orders.iter().filter(|order| !order.pending).cloned().collect();
            store.save_all(&settled).await
        })
        .on_success("Order placed successfully!")
        .on_failure("Failed to place order");

        self.coordinator
            .submit(mutation)
            .settled()
            .await
            .into_result()?;

        let confirmed = confirmed_slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| ClientError::Decode("placed order missing from history".into()))?;
        info!(%user_id, order_id = %confirmed.id, total = confirmed.total, "orders: placed");
        Ok(confirmed)
    }

    /// The backend's view of the current user's orders.
    pub async fn remote_history(&self) -> ClientResult<Vec<Order>> {
        let user_id = self.session.require_user()?;
        let raw = self.backend.order_history(user_id).await?;
        Ok(normalize_orders(&raw))
    }
}

#[cfg(test)]
#[path = "tests/orders_tests.rs"]
mod tests;

use async_trait::async_trait;
use serde_json::json;
use shared::domain::{AddressId, NewAddress};
use storage::{KeyValueStore, MemoryStore};

use super::*;
use crate::{
    status::StatusKind,
    test_support::{self, product, FakeBackend, Failure, Reply},
};

fn address() -> Address {
    NewAddress {
        user_id: UserId(7),
        full_name: "Ada Lovelace".into(),
        street_address: "12 Analytical Way".into(),
        city: "London".into(),
        state: "LDN".into(),
        postal_code: "N1".into(),
        country: "UK".into(),
        phone_number: "555-0100".into(),
        is_default: true,
    }
    .into_address(AddressId(3))
}

fn cart() -> Vec<CartItem> {
    vec![
        CartItem {
            id: None,
            cart_id: None,
            product: product(1, "Tea", 2.5),
            quantity: 2,
        },
        CartItem {
            id: None,
            cart_id: None,
            product: product(2, "Mug", 8.0),
            quantity: 1,
        },
    ]
}

async fn order_service(kv: Arc<dyn KeyValueStore>) -> (OrderService, Arc<FakeBackend>) {
    let backend = FakeBackend::new();
    let session = test_support::session_for(&backend, Arc::clone(&kv), Some(7)).await;
    let store = Arc::new(LocalStore::<LocalOrder>::open(kv).await);
    let service = OrderService::open(
        Arc::clone(&backend) as Arc<dyn CommerceBackend>,
        session,
        store,
        test_support::status(),
    )
    .await;
    (service, backend)
}

#[tokio::test]
async fn placed_order_is_recorded_with_server_id_and_address() {
    let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let (orders, backend) = order_service(Arc::clone(&kv)).await;
    backend.respond("place_order", Reply::ok(json!({ "orderId": 77, "status": "CONFIRMED" })));

    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&seen);
    orders.cell().subscribe(move |snapshot: &Vec<LocalOrder>| {
        recorder
            .lock()
            .expect("recorder")
            .push(snapshot.iter().map(|o| o.pending).collect::<Vec<_>>());
    });

    let placed = orders
        .place_order(&cart(), Some(&address()))
        .await
        .expect("place order");

    assert_eq!(placed.id, OrderId(77));
    assert_eq!(placed.status, "CONFIRMED");
    assert!((placed.total - 13.0).abs() < 1e-9);
    assert_eq!(placed.address.as_ref().map(|a| a.id), Some(AddressId(3)));
    assert_eq!(
        *seen.lock().expect("seen"),
        vec![vec![], vec![true], vec![false]]
    );
    assert_eq!(backend.bodies("place_order"), vec![json!({ "addressId": 3 })]);

    let reopened = LocalStore::<LocalOrder>::open(kv).await;
    let persisted = reopened.load().await;
    assert_eq!(persisted.len(), 1);
    assert_eq!(persisted[0].id, OrderId(77));
    assert!(!persisted[0].pending);
    assert_eq!(orders.history(UserId(7)).len(), 1);
    assert!(orders.history(UserId(8)).is_empty());
}

#[tokio::test]
async fn missing_server_fields_fall_back_to_local_id_and_placed_status() {
    let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let (orders, backend) = order_service(kv).await;
    backend.respond("place_order", Reply::ok(json!("Order placed")));

    let placed = orders
        .place_order(&cart(), Some(&address()))
        .await
        .expect("place order");
    assert_eq!(placed.status, "Placed");
    assert_eq!(placed.id, OrderId(1));
}

#[tokio::test]
async fn rejected_order_leaves_no_trace() {
    let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let (orders, backend) = order_service(Arc::clone(&kv)).await;
    backend.respond(
        "place_order",
        Reply::fail(Failure::Rejected(400, "Insufficient stock")),
    );

    let err = orders
        .place_order(&cart(), Some(&address()))
        .await
        .expect_err("rejected");
    assert_eq!(err.user_message(), "Insufficient stock");
    assert!(orders.history(UserId(7)).is_empty());
    assert!(LocalStore::<LocalOrder>::open(kv).await.load().await.is_empty());
}

#[tokio::test]
async fn validation_happens_before_any_request() {
    let (orders, backend) = order_service(Arc::new(MemoryStore::new())).await;

    let err = orders
        .place_order(&[], Some(&address()))
        .await
        .expect_err("empty cart");
    assert_eq!(err.user_message(), "Your cart is empty");

    let err = orders
        .place_order(&cart(), None)
        .await
        .expect_err("no address");
    assert_eq!(
        err.user_message(),
        "Please select or create a delivery address"
    );
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn remote_history_is_normalized() {
    let (orders, backend) = order_service(Arc::new(MemoryStore::new())).await;
    backend.respond(
        "order_history",
        Reply::ok(json!([
            {
                "orderId": 5,
                "orderDate": "2024-03-01T10:00:00",
                "orderItems": [{ "productName": "Tea", "price": "2.5", "quantity": "2" }]
            }
        ])),
    );

    let history = orders.remote_history().await.expect("history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, Some(OrderId(5)));
    assert_eq!(history[0].status, "Placed");
    assert!((history[0].total() - 5.0).abs() < 1e-9);
    assert!(history[0].created_date.is_some());
}

/// Accepts single-key writes but fails every batched write.
#[derive(Default)]
struct DiskFullStore {
    inner: MemoryStore,
}

#[async_trait]
impl KeyValueStore for DiskFullStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &str) -> anyhow::Result<()> {
        self.inner.remove(key).await
    }

    async fn set_many(&self, _entries: &[(&str, String)]) -> anyhow::Result<()> {
        anyhow::bail!("disk full")
    }
}

#[tokio::test]
async fn unsaved_history_is_reported_as_failure() {
    let kv: Arc<dyn KeyValueStore> = Arc::new(DiskFullStore::default());
    let backend = FakeBackend::new();
    backend.respond("place_order", Reply::ok(json!({ "orderId": 77 })));
    let session = test_support::session_for(&backend, Arc::clone(&kv), Some(7)).await;
    let status = test_support::status();
    let orders = OrderService::open(
        Arc::clone(&backend) as Arc<dyn CommerceBackend>,
        session,
        Arc::new(LocalStore::<LocalOrder>::open(Arc::clone(&kv)).await),
        Arc::clone(&status),
    )
    .await;

    let err = orders
        .place_order(&cart(), Some(&address()))
        .await
        .expect_err("history write fails");

    assert!(matches!(err, ClientError::Storage(_)));
    assert_eq!(backend.calls_to("place_order"), 1);
    let message = status.current().expect("status message");
    assert_eq!(message.kind, StatusKind::Failure);
    assert_ne!(message.text, "Order placed successfully!");
    assert!(LocalStore::<LocalOrder>::open(kv).await.load().await.is_empty());
}

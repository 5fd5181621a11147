use serde_json::json;
use storage::{KeyValueStore, MemoryStore};

use super::*;
use crate::test_support::{self, product, FakeBackend, Failure, Reply};

async fn favorites_service(
    kv: Arc<dyn KeyValueStore>,
) -> (FavoritesService, Arc<FakeBackend>) {
    let backend = FakeBackend::new();
    let session = test_support::session_for(&backend, Arc::clone(&kv), Some(7)).await;
    let store = Arc::new(LocalStore::<Favorite>::open(kv).await);
    let service = FavoritesService::new(
        Arc::clone(&backend) as Arc<dyn CommerceBackend>,
        session,
        store,
        test_support::status(),
        Duration::from_millis(300),
    );
    (service, backend)
}

#[tokio::test]
async fn toggle_round_trips_while_remote_reads_fail() {
    let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let (favorites, backend) = favorites_service(kv).await;
    backend.respond("user_favorites", Reply::fail(Failure::Network));

    favorites.refresh().await.expect("refresh from cache");
    assert!(!favorites.is_favorite(ProductId(5)));

    let added = favorites
        .add(&product(5, "Lamp", 30.0))
        .expect("submit add")
        .settled()
        .await;
    assert!(added.is_committed());
    assert!(favorites.is_favorite(ProductId(5)));

    favorites.refresh().await.expect("refresh from cache");
    assert!(favorites.is_favorite(ProductId(5)));

    let removed = favorites
        .remove(ProductId(5))
        .expect("submit remove")
        .settled()
        .await;
    assert!(removed.is_committed());
    assert!(!favorites.is_favorite(ProductId(5)));

    favorites.refresh().await.expect("refresh from cache");
    assert!(!favorites.is_favorite(ProductId(5)));
    assert_eq!(backend.calls_to("user_favorites"), 3);
    assert_eq!(backend.calls_to("remove_favorite/7/5"), 1);
}

#[tokio::test]
async fn successful_read_replaces_cache() {
    let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let (favorites, backend) = favorites_service(Arc::clone(&kv)).await;
    backend.script(
        "user_favorites",
        Reply::ok(json!([
            { "id": 40, "userId": 7, "productId": 9, "product": { "id": 9, "name": "Kettle", "price": 25 } },
            { "id": 41, "userId": 7, "productId": 9 }
        ])),
    );
    backend.script("user_favorites", Reply::fail(Failure::Timeout));

    let fresh = favorites.refresh().await.expect("remote refresh");
    assert_eq!(fresh.len(), 1);
    assert_eq!(fresh[0].id, Some(FavoriteId(40)));

    let cached = favorites.refresh().await.expect("cached refresh");
    assert_eq!(cached.len(), 1);
    assert_eq!(cached[0].product_id, ProductId(9));

    let reopened = LocalStore::<Favorite>::open(kv).await;
    assert_eq!(reopened.peek_next_id(), 41);
}

#[tokio::test]
async fn confirmed_favorite_takes_server_id() {
    let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let (favorites, backend) = favorites_service(kv).await;
    backend.respond(
        "add_favorite",
        Reply::ok(json!({ "id": 900, "userId": 7, "productId": 5 })),
    );

    favorites
        .add(&product(5, "Lamp", 30.0))
        .expect("submit")
        .settled()
        .await;

    let current = favorites.favorites();
    assert_eq!(current[0].id, Some(FavoriteId(900)));
    assert_eq!(current[0].product.as_ref().map(|p| p.name.as_str()), Some("Lamp"));
    assert_eq!(
        backend.bodies("add_favorite"),
        vec![json!({ "userId": 7, "productId": 5 })]
    );
}

#[tokio::test]
async fn failed_add_is_rolled_back_and_not_cached() {
    let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let (favorites, backend) = favorites_service(kv).await;
    backend.respond("add_favorite", Reply::fail(Failure::Rejected(409, "Already a favorite")));
    backend.respond("user_favorites", Reply::fail(Failure::Network));

    let outcome = favorites
        .add(&product(5, "Lamp", 30.0))
        .expect("submit")
        .settled()
        .await;
    assert!(!outcome.is_committed());
    assert!(!favorites.is_favorite(ProductId(5)));

    favorites.refresh().await.expect("cached refresh");
    assert!(favorites.favorites().is_empty());
}

#[tokio::test]
async fn duplicate_add_is_rejected_before_any_request() {
    let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let (favorites, backend) = favorites_service(kv).await;
    let lamp = product(5, "Lamp", 30.0);
    favorites.add(&lamp).expect("first").settled().await;

    let err = favorites.add(&lamp).err().expect("duplicate");
    assert!(matches!(err, ClientError::ValidationFailure(_)));
    assert_eq!(backend.calls_to("add_favorite"), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_add_does_not_undo_overlapping_add() {
    let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let (favorites, backend) = favorites_service(kv).await;
    backend.script(
        "add_favorite",
        Reply::fail(Failure::Network).after(Duration::from_millis(100)),
    );
    backend.script(
        "add_favorite",
        Reply::ok(json!({ "id": 61, "userId": 7, "productId": 6 }))
            .after(Duration::from_millis(10)),
    );
    backend.respond("user_favorites", Reply::fail(Failure::Network));

    let first = favorites.add(&product(5, "Lamp", 30.0)).expect("submit first");
    let second = favorites.add(&product(6, "Rug", 45.0)).expect("submit second");

    assert!(second.settled().await.is_committed());
    assert!(!first.settled().await.is_committed());
    assert!(favorites.is_favorite(ProductId(6)));
    assert!(!favorites.is_favorite(ProductId(5)));
    assert_eq!(favorites.favorites()[0].id, Some(FavoriteId(61)));

    favorites.refresh().await.expect("cached refresh");
    assert!(favorites.is_favorite(ProductId(6)));
    assert!(!favorites.is_favorite(ProductId(5)));
}

#[tokio::test]
async fn failed_remove_restores_only_the_removed_entry() {
    let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let (favorites, backend) = favorites_service(kv).await;
    favorites.add(&product(5, "Lamp", 30.0)).expect("add").settled().await;
    backend.respond("remove_favorite/7/5", Reply::fail(Failure::Rejected(500, "Try later")));

    let outcome = favorites
        .remove(ProductId(5))
        .expect("submit remove")
        .settled()
        .await;

    assert!(!outcome.is_committed());
    assert!(favorites.is_favorite(ProductId(5)));
    assert_eq!(favorites.favorites().len(), 1);
}

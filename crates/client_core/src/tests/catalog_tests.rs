use serde_json::json;

use super::*;
use crate::{
    status::StatusKind,
    test_support::{self, product, FakeBackend, Failure, Reply},
};

fn catalog() -> (CatalogService, Arc<FakeBackend>, Arc<StatusNotifier>) {
    let backend = FakeBackend::new();
    let status = test_support::status();
    let service = CatalogService::new(
        Arc::clone(&backend) as Arc<dyn CommerceBackend>,
        Arc::clone(&status),
    );
    (service, backend, status)
}

#[tokio::test]
async fn delete_falls_through_to_post_route() {
    let (catalog, backend, status) = catalog();
    backend.respond("all_products", Reply::ok(json!([{ "id": 9, "name": "Lamp", "price": 30 }])));
    catalog.refresh().await.expect("refresh");

    backend.respond(
        DeleteRoute::DeleteByAction.label(),
        Reply::fail(Failure::Rejected(405, "Method Not Allowed")),
    );
    backend.respond(
        DeleteRoute::DeleteByResource.label(),
        Reply::fail(Failure::Rejected(404, "Not Found")),
    );

    let success = catalog.delete(ProductId(9)).await.expect("delete");

    assert_eq!(success.strategy, DeleteRoute::PostByAction.label());
    assert_eq!(success.failures.len(), 2);
    assert_eq!(
        backend.calls()[1..],
        [
            "DELETE /product/delete/{id}".to_string(),
            "DELETE /product/{id}".to_string(),
            "POST /product/delete/{id}".to_string(),
        ]
    );
    assert!(catalog.products().current().is_empty());
    assert_eq!(status.current().map(|m| m.kind), Some(StatusKind::Success));
}

#[tokio::test]
async fn delete_reports_exhaustion_and_keeps_product() {
    let (catalog, backend, status) = catalog();
    backend.respond("all_products", Reply::ok(json!([{ "id": 9, "name": "Lamp", "price": 30 }])));
    catalog.refresh().await.expect("refresh");
    for route in DeleteRoute::ORDERED {
        backend.respond(route.label(), Reply::fail(Failure::Network));
    }
    backend.respond(
        DeleteRoute::PostByAction.label(),
        Reply::fail(Failure::Rejected(500, "constraint violation")),
    );

    let err = catalog.delete(ProductId(9)).await.expect_err("all routes fail");

    match &err {
        ClientError::AllFallbacksExhausted { attempts, last, .. } => {
            assert_eq!(*attempts, 3);
            assert!(matches!(**last, ClientError::RemoteRejection { status: 500, .. }));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(catalog.products().current().len(), 1);
    assert_eq!(
        status.current().map(|m| m.text),
        Some("Failed to delete product".to_string())
    );
}

#[tokio::test]
async fn search_term_filters_visible_products() {
    let (catalog, backend, _status) = catalog();
    backend.respond(
        "all_products",
        Reply::ok(json!([
            { "id": 1, "name": "Green Tea", "description": "Loose leaf", "price": 4 },
            { "id": 2, "name": "Mug", "description": "Holds tea", "price": 8 },
            { "id": 3, "name": "Lamp", "description": "Desk light", "price": 30 }
        ])),
    );
    catalog.refresh().await.expect("refresh");
    assert_eq!(catalog.visible().current().len(), 3);

    catalog.set_search_term("  TEA ");
    let names: Vec<String> = catalog
        .visible()
        .current()
        .iter()
        .map(|p| p.name.clone())
        .collect();
    assert_eq!(names, vec!["Green Tea".to_string(), "Mug".to_string()]);

    catalog.clear_search();
    assert_eq!(catalog.visible().current().len(), 3);
    assert_eq!(catalog.search_term(), "");
}

#[tokio::test]
async fn add_and_update_keep_the_list_current() {
    let (catalog, backend, _status) = catalog();
    backend.respond(
        "add_product/4",
        Reply::ok(json!({ "productId": 21, "productName": "Kettle", "price": "25.00", "sellerId": 4 })),
    );
    backend.respond("update_product/21", Reply::ok(json!("Product updated")));

    let created = catalog
        .add(SellerId(4), product(0, "Kettle", 25.0))
        .await
        .expect("add");
    assert_eq!(created.id, Some(ProductId(21)));
    assert_eq!(created.seller_id, Some(SellerId(4)));

    let mut renamed = created.clone();
    renamed.name = "Electric Kettle".into();
    catalog
        .update(ProductId(21), renamed)
        .await
        .expect("update");

    let products = catalog.products().current();
    assert_eq!(products.len(), 1);
    assert_eq!(products[0].name, "Electric Kettle");
}

#[tokio::test]
async fn invalid_products_are_rejected_locally() {
    let (catalog, backend, _status) = catalog();
    let err = catalog
        .add(SellerId(4), product(0, "  ", 1.0))
        .await
        .expect_err("blank name");
    assert!(matches!(err, ClientError::ValidationFailure(_)));
    let err = catalog
        .add(SellerId(4), product(0, "Kettle", -1.0))
        .await
        .expect_err("negative price");
    assert!(matches!(err, ClientError::ValidationFailure(_)));
    assert!(backend.calls().is_empty());
}

use std::{
    sync::{Arc, PoisonError, RwLock},
    time::Duration,
};

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde_json::Value;
use shared::{
    domain::{Product, ProductId, SellerId, UserId},
    error::ApiErrorBody,
    protocol::{
        CartAddQuery, CartRemoveQuery, DashboardSummary, FavoriteAddRequest,
        ForgotPasswordRequest, LoginRequest, LoginResponse, OrderPlacedResponse,
        PlaceOrderRequest, RegisterRequest, RegisterResponse,
    },
};
use tracing::{debug, warn};
use url::Url;

use crate::error::{ClientError, ClientResult};

/// The three ways the backend has been seen to accept a product delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteRoute {
    /// `DELETE /product/delete/{id}`
    DeleteByAction,
    /// `DELETE /product/{id}`
    DeleteByResource,
    /// `POST /product/delete/{id}`
    PostByAction,
}

impl DeleteRoute {
    pub const ORDERED: [DeleteRoute; 3] = [
        DeleteRoute::DeleteByAction,
        DeleteRoute::DeleteByResource,
        DeleteRoute::PostByAction,
    ];

    pub fn label(self) -> &'static str {
        match self {
            DeleteRoute::DeleteByAction => "DELETE /product/delete/{id}",
            DeleteRoute::DeleteByResource => "DELETE /product/{id}",
            DeleteRoute::PostByAction => "POST /product/delete/{id}",
        }
    }
}

#[async_trait]
pub trait CommerceBackend: Send + Sync {
    async fn login(&self, request: &LoginRequest) -> ClientResult<LoginResponse>;
    async fn register(&self, request: &RegisterRequest) -> ClientResult<RegisterResponse>;
    async fn logout(&self) -> ClientResult<()>;
    async fn forgot_password(&self, request: &ForgotPasswordRequest) -> ClientResult<Value>;

    async fn all_products(&self) -> ClientResult<Value>;
    async fn seller_products(&self, seller_id: SellerId) -> ClientResult<Value>;
    async fn product(&self, id: ProductId) -> ClientResult<Value>;
    async fn add_product(&self, seller_id: SellerId, product: &Product) -> ClientResult<Value>;
    async fn update_product(&self, id: ProductId, product: &Product) -> ClientResult<Value>;
    async fn delete_product(&self, id: ProductId, route: DeleteRoute) -> ClientResult<()>;

    async fn add_to_cart(&self, query: &CartAddQuery) -> ClientResult<Value>;
    async fn cart(&self, user_id: UserId) -> ClientResult<Value>;
    async fn remove_from_cart(&self, query: &CartRemoveQuery) -> ClientResult<Value>;

    async fn place_order(
        &self,
        user_id: UserId,
        request: &PlaceOrderRequest,
    ) -> ClientResult<OrderPlacedResponse>;
    async fn order_history(&self, user_id: UserId) -> ClientResult<Value>;
    async fn all_orders(&self) -> ClientResult<Value>;
    async fn admin_orders(&self, admin_id: SellerId) -> ClientResult<Value>;

    async fn seller_orders(&self, seller_id: SellerId) -> ClientResult<Value>;
    async fn seller_all_orders(&self) -> ClientResult<Value>;
    async fn seller_dashboard(&self, seller_id: SellerId) -> ClientResult<DashboardSummary>;

    async fn user_favorites(&self, user_id: UserId) -> ClientResult<Value>;
    async fn add_favorite(&self, request: &FavoriteAddRequest) -> ClientResult<Value>;
    async fn remove_favorite(&self, user_id: UserId, product_id: ProductId) -> ClientResult<()>;
}

/// Bearer token shared between the session and the HTTP backend.
#[derive(Debug, Clone, Default)]
pub struct AuthToken {
    inner: Arc<RwLock<Option<String>>>,
}

impl AuthToken {
    pub fn get(&self) -> Option<String> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set(&self, token: Option<String>) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = token;
    }

    pub fn is_present(&self) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

pub struct HttpBackend {
    http: Client,
    base_url: String,
    token: AuthToken,
}

impl HttpBackend {
    pub fn new(base_url: &str, timeout: Duration, token: AuthToken) -> ClientResult<Self> {
        let parsed = Url::parse(base_url).map_err(|err| {
            ClientError::validation(format!("invalid api base url '{base_url}': {err}"))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ClientError::validation(format!(
                "api base url must be http(s), got '{base_url}'"
            )));
        }
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ClientError::from)?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.http.request(method, format!("{}{path}", self.base_url));
        match self.token.get() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, request: RequestBuilder, action: &'static str) -> ClientResult<Value> {
        let response = request.send().await.map_err(|err| {
            warn!(action, error = %err, "backend: request failed");
            ClientError::from(err)
        })?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let parsed = serde_json::from_str::<ApiErrorBody>(&body)
                .unwrap_or_else(|_| ApiErrorBody::new(body.trim()));
            warn!(action, status = status.as_u16(), "backend: request rejected");
            return Err(ClientError::rejection(
                status.as_u16(),
                &parsed,
                &format!("{action} failed with status {}", status.as_u16()),
            ));
        }

        debug!(action, status = status.as_u16(), bytes = body.len(), "backend: response received");
        Ok(parse_body(&body))
    }

    async fn send_typed<T: serde::de::DeserializeOwned>(
        &self,
        request: RequestBuilder,
        action: &'static str,
    ) -> ClientResult<T> {
        let value = self.send(request, action).await?;
        serde_json::from_value(value).map_err(ClientError::from)
    }
}

/// Empty bodies become `null` and plain-text bodies a JSON string.
fn parse_body(body: &str) -> Value {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string()))
}

#[async_trait]
impl CommerceBackend for HttpBackend {
    async fn login(&self, request: &LoginRequest) -> ClientResult<LoginResponse> {
        self.send_typed(
            self.request(Method::POST, "/auth/login").json(request),
            "login",
        )
        .await
    }

    async fn register(&self, request: &RegisterRequest) -> ClientResult<RegisterResponse> {
        let value = self
            .send(
                self.request(Method::POST, "/auth/register").json(request),
                "register",
            )
            .await?;
        // Some deployments answer with a bare confirmation string.
        Ok(match value {
            Value::String(message) => RegisterResponse {
                message,
                email: request.email.clone(),
            },
            other => serde_json::from_value(other)?,
        })
    }

    async fn logout(&self) -> ClientResult<()> {
        self.send(
            self.request(Method::POST, "/auth/logout")
                .json(&serde_json::json!({})),
            "logout",
        )
        .await
        .map(|_| ())
    }

    async fn forgot_password(&self, request: &ForgotPasswordRequest) -> ClientResult<Value> {
        self.send(
            self.request(Method::POST, "/auth/forgot-password").json(request),
            "forgot password",
        )
        .await
    }

    async fn all_products(&self) -> ClientResult<Value> {
        self.send(self.request(Method::GET, "/product/all"), "list products")
            .await
    }

    async fn seller_products(&self, seller_id: SellerId) -> ClientResult<Value> {
        self.send(
            self.request(Method::GET, &format!("/product/admin/{seller_id}")),
            "list seller products",
        )
        .await
    }

    async fn product(&self, id: ProductId) -> ClientResult<Value> {
        self.send(self.request(Method::GET, &format!("/product/{id}")), "get product")
            .await
    }

    async fn add_product(&self, seller_id: SellerId, product: &Product) -> ClientResult<Value> {
        self.send(
            self.request(Method::POST, &format!("/product/add/{seller_id}"))
                .json(product),
            "add product",
        )
        .await
    }

    async fn update_product(&self, id: ProductId, product: &Product) -> ClientResult<Value> {
        self.send(
            self.request(Method::PUT, &format!("/product/update/{id}"))
                .json(product),
            "update product",
        )
        .await
    }

    async fn delete_product(&self, id: ProductId, route: DeleteRoute) -> ClientResult<()> {
        let request = match route {
            DeleteRoute::DeleteByAction => {
                self.request(Method::DELETE, &format!("/product/delete/{id}"))
            }
            DeleteRoute::DeleteByResource => {
                self.request(Method::DELETE, &format!("/product/{id}"))
            }
            DeleteRoute::PostByAction => {
                self.request(Method::POST, &format!("/product/delete/{id}"))
            }
        };
        self.send(request, "delete product").await.map(|_| ())
    }

    async fn add_to_cart(&self, query: &CartAddQuery) -> ClientResult<Value> {
        self.send(
            self.request(Method::POST, "/cart/add").query(query),
            "add to cart",
        )
        .await
    }

    async fn cart(&self, user_id: UserId) -> ClientResult<Value> {
        self.send(self.request(Method::GET, &format!("/cart/{user_id}")), "get cart")
            .await
    }

    async fn remove_from_cart(&self, query: &CartRemoveQuery) -> ClientResult<Value> {
        self.send(
            self.request(Method::DELETE, "/cart/remove").query(query),
            "remove from cart",
        )
        .await
    }

    async fn place_order(
        &self,
        user_id: UserId,
        request: &PlaceOrderRequest,
    ) -> ClientResult<OrderPlacedResponse> {
        let value = self
            .send(
                self.request(Method::POST, &format!("/order/place/{user_id}"))
                    .json(request),
                "place order",
            )
            .await?;
        if value.is_object() {
            Ok(serde_json::from_value(value)?)
        } else {
            Ok(OrderPlacedResponse::default())
        }
    }

    async fn order_history(&self, user_id: UserId) -> ClientResult<Value> {
        self.send(
            self.request(Method::GET, &format!("/order/history/{user_id}")),
            "order history",
        )
        .await
    }

    async fn all_orders(&self) -> ClientResult<Value> {
        self.send(self.request(Method::GET, "/order/all"), "list all orders")
            .await
    }

    async fn admin_orders(&self, admin_id: SellerId) -> ClientResult<Value> {
        self.send(
            self.request(Method::GET, &format!("/order/admin/{admin_id}")),
            "list admin orders",
        )
        .await
    }

    async fn seller_orders(&self, seller_id: SellerId) -> ClientResult<Value> {
        self.send(
            self.request(Method::GET, &format!("/seller/orders/{seller_id}")),
            "list seller orders",
        )
        .await
    }

    async fn seller_all_orders(&self) -> ClientResult<Value> {
        self.send(
            self.request(Method::GET, "/seller/all-orders"),
            "list seller orders",
        )
        .await
    }

    async fn seller_dashboard(&self, seller_id: SellerId) -> ClientResult<DashboardSummary> {
        self.send_typed(
            self.request(Method::GET, &format!("/seller/dashboard/{seller_id}")),
            "seller dashboard",
        )
        .await
    }

    async fn user_favorites(&self, user_id: UserId) -> ClientResult<Value> {
        self.send(
            self.request(Method::GET, &format!("/favorite/user/{user_id}")),
            "list favorites",
        )
        .await
    }

    async fn add_favorite(&self, request: &FavoriteAddRequest) -> ClientResult<Value> {
        self.send(
            self.request(Method::POST, "/favorite/add").json(request),
            "add favorite",
        )
        .await
    }

    async fn remove_favorite(&self, user_id: UserId, product_id: ProductId) -> ClientResult<()> {
        self.send(
            self.request(
                Method::DELETE,
                &format!("/favorite/remove/{user_id}/{product_id}"),
            ),
            "remove favorite",
        )
        .await
        .map(|_| ())
    }
}

#[cfg(test)]
#[path = "tests/backend_tests.rs"]
mod tests;

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
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

use crate::{
    backend::{CommerceBackend, DeleteRoute},
    error::{ClientError, ClientResult},
};

#[derive(Debug, Clone)]
pub enum Failure {
    Timeout,
    Network,
    Rejected(u16, &'static str),
}

impl Failure {
    fn into_error(self) -> ClientError {
        match self {
            Failure::Timeout => ClientError::timeout("operation timed out"),
            Failure::Network => ClientError::network("connection refused"),
            Failure::Rejected(status, message) => {
                ClientError::rejection(status, &ApiErrorBody::new(message), "request failed")
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Reply {
    delay: Duration,
    outcome: Result<Value, Failure>,
}

impl Reply {
    pub fn ok(value: Value) -> Self {
        Self {
            delay: Duration::ZERO,
            outcome: Ok(value),
        }
    }

    pub fn fail(failure: Failure) -> Self {
        Self {
            delay: Duration::ZERO,
            outcome: Err(failure),
        }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Default)]
pub struct FakeBackend {
    defaults: Mutex<HashMap<String, Reply>>,
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<Vec<String>>,
    bodies: Mutex<Vec<(String, Value)>>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Reply used whenever no scripted reply is queued.
    pub fn respond(&self, endpoint: &str, reply: Reply) {
        self.defaults
            .lock()
            .expect("defaults")
            .insert(endpoint.to_string(), reply);
    }

    /// One-shot reply consumed before the default.
    pub fn script(&self, endpoint: &str, reply: Reply) {
        self.scripts
            .lock()
            .expect("scripts")
            .entry(endpoint.to_string())
            .or_default()
            .push_back(reply);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls").clone()
    }

    pub fn calls_to(&self, endpoint: &str) -> usize {
        self.calls
            .lock()
            .expect("calls")
            .iter()
            .filter(|call| call.as_str() == endpoint)
            .count()
    }

    pub fn bodies(&self, endpoint: &str) -> Vec<Value> {
        self.bodies
            .lock()
            .expect("bodies")
            .iter()
            .filter(|(name, _)| name == endpoint)
            .map(|(_, body)| body.clone())
            .collect()
    }

    async fn reply(&self, endpoint: &str, body: Option<Value>) -> ClientResult<Value> {
        self.calls.lock().expect("calls").push(endpoint.to_string());
        if let Some(body) = body {
            self.bodies
                .lock()
                .expect("bodies")
                .push((endpoint.to_string(), body));
        }
        let scripted = self
            .scripts
            .lock()
            .expect("scripts")
            .get_mut(endpoint)
            .and_then(VecDeque::pop_front);
        let reply = scripted.unwrap_or_else(|| {
            self.defaults
                .lock()
                .expect("defaults")
                .get(endpoint)
                .cloned()
                .unwrap_or_else(|| Reply::ok(Value::Null))
        });
        if !reply.delay.is_zero() {
            tokio::time::sleep(reply.delay).await;
        }
        reply.outcome.map_err(Failure::into_error)
    }
}

fn body<T: serde::Serialize>(value: &T) -> Option<Value> {
    serde_json::to_value(value).ok()
}

pub fn delete_endpoint(route: DeleteRoute) -> &'static str {
    route.label()
}

#[async_trait]
impl CommerceBackend for FakeBackend {
    async fn login(&self, request: &LoginRequest) -> ClientResult<LoginResponse> {
        let value = self.reply("login", body(request)).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn register(&self, request: &RegisterRequest) -> ClientResult<RegisterResponse> {
        self.reply("register", body(request)).await?;
        Ok(RegisterResponse {
            message: "registered".into(),
            email: request.email.clone(),
        })
    }

    async fn logout(&self) -> ClientResult<()> {
        self.reply("logout", None).await.map(|_| ())
    }

    async fn forgot_password(&self, request: &ForgotPasswordRequest) -> ClientResult<Value> {
        self.reply("forgot_password", body(request)).await
    }

    async fn all_products(&self) -> ClientResult<Value> {
        self.reply("all_products", None).await
    }

    async fn seller_products(&self, seller_id: SellerId) -> ClientResult<Value> {
        self.reply(&format!("seller_products/{seller_id}"), None).await
    }

    async fn product(&self, id: ProductId) -> ClientResult<Value> {
        self.reply(&format!("product/{id}"), None).await
    }

    async fn add_product(&self, seller_id: SellerId, product: &Product) -> ClientResult<Value> {
        self.reply(&format!("add_product/{seller_id}"), body(product))
            .await
    }

    async fn update_product(&self, id: ProductId, product: &Product) -> ClientResult<Value> {
        self.reply(&format!("update_product/{id}"), body(product)).await
    }

    async fn delete_product(&self, _id: ProductId, route: DeleteRoute) -> ClientResult<()> {
        self.reply(delete_endpoint(route), None).await.map(|_| ())
    }

    async fn add_to_cart(&self, query: &CartAddQuery) -> ClientResult<Value> {
        self.reply("add_to_cart", body(query)).await
    }

    async fn cart(&self, _user_id: UserId) -> ClientResult<Value> {
        self.reply("cart", None).await
    }

    async fn remove_from_cart(&self, query: &CartRemoveQuery) -> ClientResult<Value> {
        self.reply("remove_from_cart", body(query)).await
    }

    async fn place_order(
        &self,
        _user_id: UserId,
        request: &PlaceOrderRequest,
    ) -> ClientResult<OrderPlacedResponse> {
        let value = self.reply("place_order", body(request)).await?;
        Ok(serde_json::from_value(value).unwrap_or_default())
    }

    async fn order_history(&self, _user_id: UserId) -> ClientResult<Value> {
        self.reply("order_history", None).await
    }

    async fn all_orders(&self) -> ClientResult<Value> {
        self.reply("all_orders", None).await
    }

    async fn admin_orders(&self, admin_id: SellerId) -> ClientResult<Value> {
        self.reply(&format!("admin_orders/{admin_id}"), None).await
    }

    async fn seller_orders(&self, seller_id: SellerId) -> ClientResult<Value> {
        self.reply(&format!("seller_orders/{seller_id}"), None).await
    }

    async fn seller_all_orders(&self) -> ClientResult<Value> {
        self.reply("seller_all_orders", None).await
    }

    async fn seller_dashboard(&self, seller_id: SellerId) -> ClientResult<DashboardSummary> {
        let value = self
            .reply(&format!("seller_dashboard/{seller_id}"), None)
            .await?;
        Ok(serde_json::from_value(value).unwrap_or_default())
    }

    async fn user_favorites(&self, _user_id: UserId) -> ClientResult<Value> {
        self.reply("user_favorites", None).await
    }

    async fn add_favorite(&self, request: &FavoriteAddRequest) -> ClientResult<Value> {
        self.reply("add_favorite", body(request)).await
    }

    async fn remove_favorite(&self, user_id: UserId, product_id: ProductId) -> ClientResult<()> {
        self.reply(&format!("remove_favorite/{user_id}/{product_id}"), None)
            .await
            .map(|_| ())
    }
}

pub fn product(id: i64, name: &str, price: f64) -> Product {
    Product {
        id: Some(ProductId(id)),
        name: name.to_string(),
        description: String::new(),
        price,
        photo: None,
        seller_id: Some(SellerId(1)),
    }
}

pub fn status() -> Arc<crate::status::StatusNotifier> {
    Arc::new(crate::status::StatusNotifier::new(
        Duration::from_secs(3),
        Duration::from_secs(4),
    ))
}

/// Session over `kv`, logged in as `user_id` when one is given.
pub async fn session_for(
    backend: &Arc<FakeBackend>,
    kv: Arc<dyn storage::KeyValueStore>,
    user_id: Option<i64>,
) -> Arc<crate::session::Session> {
    if let Some(id) = user_id {
        kv.set(crate::session::TOKEN_KEY, "header.payload.signature")
            .await
            .expect("seed token");
        kv.set(crate::session::USER_ID_KEY, &id.to_string())
            .await
            .expect("seed user id");
    }
    let backend: Arc<dyn CommerceBackend> = Arc::clone(backend) as Arc<dyn CommerceBackend>;
    Arc::new(
        crate::session::Session::restore(backend, kv, crate::backend::AuthToken::default())
            .await
            .expect("session"),
    )
}

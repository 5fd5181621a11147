//! Backend payloads to canonical entities. A row that cannot be read degrades
//! to a placeholder instead of failing the whole view.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value};
use shared::domain::{
    CartId, CartItem, CartItemId, Favorite, FavoriteId, Order, OrderId, OrderItem, Product,
    ProductId, SellerId, UserId,
};
use tracing::{debug, warn};

pub const UNKNOWN_NAME: &str = "Unknown";
pub const UNKNOWN_PRODUCT_NAME: &str = "Unknown Product";
pub const DEFAULT_PRICE: f64 = 0.0;
pub const DEFAULT_QUANTITY: u32 = 1;
pub const DEFAULT_ORDER_STATUS: &str = "Placed";

const ENVELOPE_KEYS: [&str; 3] = ["items", "cartItems", "data"];

/// Shape of one raw line record, detected in priority order.
#[derive(Debug, Clone, Copy)]
pub enum RecordShape<'a> {
    /// The record embeds a `product` object.
    NestedProduct {
        record: &'a Map<String, Value>,
        product: &'a Map<String, Value>,
    },
    /// Product fields sit next to the line fields.
    FlattenedProduct(&'a Map<String, Value>),
    /// Neither; only an id and a quantity can be salvaged.
    Unrecognized(Option<&'a Map<String, Value>>),
}

impl<'a> RecordShape<'a> {
    pub fn detect(raw: &'a Value) -> Self {
        let Some(record) = raw.as_object() else {
            return RecordShape::Unrecognized(None);
        };
        if let Some(product) = record.get("product").and_then(Value::as_object) {
            return RecordShape::NestedProduct { record, product };
        }
        if non_empty_str(record, &["name", "productName"]).is_some() {
            return RecordShape::FlattenedProduct(record);
        }
        RecordShape::Unrecognized(Some(record))
    }

    fn record(&self) -> Option<&'a Map<String, Value>> {
        match *self {
            RecordShape::NestedProduct { record, .. } => Some(record),
            RecordShape::FlattenedProduct(record) => Some(record),
            RecordShape::Unrecognized(record) => record,
        }
    }

    fn product(&self) -> Product {
        match *self {
            RecordShape::NestedProduct { product, .. } => Product {
                id: id_field(product, &["id", "productId"]).map(ProductId),
                name: non_empty_str(product, &["name", "productName"])
                    .unwrap_or(UNKNOWN_NAME)
                    .to_string(),
                description: non_empty_str(product, &["description", "productDescription"])
                    .unwrap_or_default()
                    .to_string(),
                price: price_field(product, "price"),
                photo: non_empty_str(product, &["photo", "productPhoto"]).map(str::to_string),
                seller_id: id_field(product, &["sellerId"]).map(SellerId),
            },
            RecordShape::FlattenedProduct(record) => Product {
                id: id_field(record, &["productId", "id"]).map(ProductId),
                name: non_empty_str(record, &["name", "productName"])
                    .unwrap_or(UNKNOWN_NAME)
                    .to_string(),
                description: non_empty_str(record, &["description", "productDescription"])
                    .unwrap_or_default()
                    .to_string(),
                price: price_field(record, "price"),
                photo: non_empty_str(record, &["photo", "productPhoto"]).map(str::to_string),
                seller_id: id_field(record, &["sellerId"]).map(SellerId),
            },
            RecordShape::Unrecognized(record) => Product {
                id: record
                    .and_then(|r| id_field(r, &["productId", "id"]))
                    .map(ProductId),
                name: UNKNOWN_PRODUCT_NAME.to_string(),
                description: String::new(),
                price: DEFAULT_PRICE,
                photo: None,
                seller_id: None,
            },
        }
    }

    fn quantity(&self) -> u32 {
        self.record()
            .and_then(|r| r.get("quantity"))
            .map(coerce_quantity)
            .unwrap_or(DEFAULT_QUANTITY)
    }
}

pub fn normalize_cart_item(raw: &Value) -> CartItem {
    let shape = RecordShape::detect(raw);
    if matches!(shape, RecordShape::Unrecognized(_)) {
        warn!(raw = %raw, "normalizer: unknown cart item format");
    }
    let record = shape.record();
    CartItem {
        id: record
            .and_then(|r| id_field(r, &["id", "cartItemId"]))
            .map(CartItemId),
        cart_id: record.and_then(|r| id_field(r, &["cartId"])).map(CartId),
        product: shape.product(),
        quantity: shape.quantity(),
    }
}

/// Normalizes a full cart response.
///
/// Lines that resolve to the same product are merged into one line with the
/// summed quantity, keeping the first line's ids.
pub fn normalize_cart(response: &Value) -> Vec<CartItem> {
    let mut items: Vec<CartItem> = Vec::new();
    for raw in extract_records(response) {
        let item = normalize_cart_item(raw);
        let existing = item.product.id.and_then(|product_id| {
            items
                .iter_mut()
                .find(|current| current.product.id == Some(product_id))
        });
        match existing {
            Some(current) => {
                current.quantity = current.quantity.saturating_add(item.quantity);
            }
            None => items.push(item),
        }
    }
    debug!(count = items.len(), "normalizer: cart normalized");
    items
}

pub fn normalize_product(raw: &Value) -> Product {
    let Some(record) = raw.as_object() else {
        warn!(raw = %raw, "normalizer: unknown product format");
        return RecordShape::Unrecognized(None).product();
    };
    Product {
        id: id_field(record, &["id", "productId"]).map(ProductId),
        name: non_empty_str(record, &["name", "productName"])
            .unwrap_or(UNKNOWN_NAME)
            .to_string(),
        description: non_empty_str(record, &["description", "productDescription"])
            .unwrap_or_default()
            .to_string(),
        price: price_field(record, "price"),
        photo: non_empty_str(record, &["photo", "productPhoto"]).map(str::to_string),
        seller_id: id_field(record, &["sellerId"]).map(SellerId),
    }
}

pub fn normalize_products(response: &Value) -> Vec<Product> {
    extract_records(response)
        .into_iter()
        .map(normalize_product)
        .collect()
}

pub fn normalize_order_item(raw: &Value) -> OrderItem {
    let shape = RecordShape::detect(raw);
    let product = shape.product();
    let price = shape
        .record()
        .and_then(|r| r.get("price"))
        .and_then(coerce_price)
        .unwrap_or(product.price);
    OrderItem {
        quantity: shape.quantity(),
        price,
        product,
    }
}

pub fn normalize_order(raw: &Value) -> Order {
    let Some(record) = raw.as_object() else {
        warn!(raw = %raw, "normalizer: unknown order format");
        return Order {
            id: None,
            user_id: None,
            status: DEFAULT_ORDER_STATUS.to_string(),
            items: Vec::new(),
            created_date: None,
        };
    };
    let items = ["items", "orderItems"]
        .iter()
        .find_map(|key| record.get(*key).and_then(Value::as_array))
        .map(|items| items.iter().map(normalize_order_item).collect())
        .unwrap_or_default();
    Order {
        id: id_field(record, &["id", "orderId"]).map(OrderId),
        user_id: id_field(record, &["userId"]).map(UserId),
        status: non_empty_str(record, &["status"])
            .unwrap_or(DEFAULT_ORDER_STATUS)
            .to_string(),
        items,
        created_date: ["createdDate", "orderDate", "createdAt"]
            .iter()
            .find_map(|key| record.get(*key).and_then(parse_timestamp)),
    }
}

pub fn normalize_orders(response: &Value) -> Vec<Order> {
    extract_records(response)
        .into_iter()
        .map(normalize_order)
        .collect()
}

/// Favorites without a resolvable product id are dropped; they cannot be
/// matched against the catalog.
pub fn normalize_favorite(raw: &Value, user_id: UserId) -> Option<Favorite> {
    let record = raw.as_object()?;
    let product = record
        .get("product")
        .filter(|p| p.is_object())
        .map(normalize_product);
    let product_id = id_field(record, &["productId"])
        .map(ProductId)
        .or_else(|| product.as_ref().and_then(|p| p.id));
    let Some(product_id) = product_id else {
        warn!(raw = %raw, "normalizer: favorite without product id dropped");
        return None;
    };
    Some(Favorite {
        id: id_field(record, &["id", "favoriteId"]).map(FavoriteId),
        user_id: id_field(record, &["userId"]).map(UserId).unwrap_or(user_id),
        product_id,
        product,
        created_date: record.get("createdDate").and_then(parse_timestamp),
    })
}

pub fn normalize_favorites(response: &Value, user_id: UserId) -> Vec<Favorite> {
    let mut favorites: Vec<Favorite> = Vec::new();
    for raw in extract_records(response) {
        if let Some(favorite) = normalize_favorite(raw, user_id) {
            if !favorites
                .iter()
                .any(|f| f.user_id == favorite.user_id && f.product_id == favorite.product_id)
            {
                favorites.push(favorite);
            }
        }
    }
    favorites
}

/// Records of a collection response: a bare array, or an object wrapping one
/// under `items`, `cartItems` or `data`. Anything else is empty.
pub fn extract_records(response: &Value) -> Vec<&Value> {
    if let Some(array) = response.as_array() {
        return array.iter().collect();
    }
    ENVELOPE_KEYS
        .iter()
        .find_map(|key| response.get(*key).and_then(Value::as_array))
        .map(|array| array.iter().collect())
        .unwrap_or_default()
}

/// Coerces a JSON number or numeric string. Non-finite results are rejected.
pub fn coerce_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    number.is_finite().then_some(number)
}

fn coerce_price(value: &Value) -> Option<f64> {
    coerce_number(value).filter(|price| *price >= 0.0)
}

fn coerce_quantity(value: &Value) -> u32 {
    match coerce_number(value) {
        Some(q) if q >= 1.0 => {
            if q >= f64::from(u32::MAX) {
                u32::MAX
            } else {
                // Truncation is intended: 2.7 units is 2 units.
                q.floor() as u32
            }
        }
        _ => DEFAULT_QUANTITY,
    }
}

fn price_field(record: &Map<String, Value>, key: &str) -> f64 {
    record
        .get(key)
        .and_then(coerce_price)
        .unwrap_or(DEFAULT_PRICE)
}

/// First key holding a non-zero integral id.
fn id_field(record: &Map<String, Value>, keys: &[&str]) -> Option<i64> {
    keys.iter().find_map(|key| {
        let value = record.get(*key)?;
        let id = match value {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        }?;
        (id != 0).then_some(id)
    })
}

fn non_empty_str<'a>(record: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| {
        record
            .get(*key)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    })
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let raw = value.as_str()?;
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    // Zone-less timestamps are taken as UTC.
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
#[path = "tests/normalizer_tests.rs"]
mod tests;

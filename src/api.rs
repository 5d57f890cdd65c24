//! Server API client.
//!
//! Authenticated HTTP communication with the shop-management backend: order
//! submission, product availability toggles, quick updates, product creation
//! and the paginated catalog fetch. The orchestrator talks to the [`PosApi`]
//! trait so it can run against a scripted double in tests.

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::error::ApiError;
use crate::models::{
    CachedProduct, CreatedProduct, OrderSubmission, ProductChanges, ProductDraft, ProductId,
    ProductPage,
};

/// Default timeout for API requests (30 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// URL normalisation
// ---------------------------------------------------------------------------

/// Normalise the backend base URL:
/// - strip whitespace and trailing slashes
/// - ensure a scheme is present (https, or http for localhost)
/// - ensure a single trailing `/api` segment
pub fn normalize_base_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    // Ensure scheme
    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    // Strip trailing slashes
    while url.ends_with('/') {
        url.pop();
    }

    if !url.ends_with("/api") {
        url.push_str("/api");
    }

    url
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Convert a `reqwest::Error` into a user-friendly message.
fn friendly_error(url: &str, err: &reqwest::Error) -> String {
    if err.is_connect() {
        return format!("Cannot reach server at {url}");
    }
    if err.is_timeout() {
        return format!("Connection to {url} timed out");
    }
    if err.is_builder() {
        return format!("Invalid server URL: {url}");
    }
    format!("Network error communicating with {url}: {err}")
}

/// Convert an HTTP status code into a user-friendly message.
fn status_error(status: StatusCode) -> String {
    match status.as_u16() {
        401 => "Session is invalid or expired".to_string(),
        403 => "Not authorized for this shop".to_string(),
        404 => "Server endpoint not found".to_string(),
        s if s >= 500 => format!("Server error (HTTP {s})"),
        s => format!("Unexpected response from server (HTTP {s})"),
    }
}

/// Classify a non-success response. Content rejections (400/409/422) surface
/// to the caller and must never be queued for retry; everything else is
/// treated as retryable.
fn classify_status(status: StatusCode, detail: String) -> ApiError {
    match status.as_u16() {
        400 | 409 | 422 => ApiError::Validation(detail),
        _ => ApiError::Unexpected(detail),
    }
}

/// Extract the most specific error message the response body offers.
fn response_detail(status: StatusCode, body_text: &str) -> String {
    if let Ok(json) = serde_json::from_str::<Value>(body_text) {
        let message = json
            .get("error")
            .or_else(|| json.get("message"))
            .and_then(Value::as_str)
            .map(|s| s.to_string())
            .unwrap_or_else(|| status_error(status));
        if let Some(details) = json.get("details").or_else(|| json.get("errors")) {
            return format!("{message} (HTTP {}): {details}", status.as_u16());
        }
        return format!("{message} (HTTP {})", status.as_u16());
    }
    if !body_text.trim().is_empty() {
        format!(
            "{} (HTTP {}): {}",
            status_error(status),
            status.as_u16(),
            body_text.trim()
        )
    } else {
        format!("{} (HTTP {})", status_error(status), status.as_u16())
    }
}

// ---------------------------------------------------------------------------
// Server product mapping
// ---------------------------------------------------------------------------

fn json_str(value: &Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(s) = value.get(key).and_then(Value::as_str) {
            let s = s.trim();
            if !s.is_empty() {
                return Some(s.to_string());
            }
        }
    }
    None
}

fn json_f64(value: &Value, keys: &[&str]) -> Option<f64> {
    for key in keys {
        if let Some(v) = value.get(key) {
            if let Some(n) = v.as_f64() {
                return Some(n);
            }
            if let Some(parsed) = v.as_str().and_then(|s| s.trim().parse::<f64>().ok()) {
                return Some(parsed);
            }
        }
    }
    None
}

fn json_i64(value: &Value, keys: &[&str]) -> Option<i64> {
    for key in keys {
        if let Some(n) = value.get(key).and_then(Value::as_i64) {
            return Some(n);
        }
    }
    None
}

fn json_bool(value: &Value, keys: &[&str]) -> Option<bool> {
    for key in keys {
        if let Some(b) = value.get(key).and_then(Value::as_bool) {
            return Some(b);
        }
    }
    None
}

/// Map one server-side shop-product record into a cache entry. Returns `None`
/// when the record lacks an id or a usable name (the server occasionally
/// returns half-provisioned rows; they are skipped, not fatal).
pub fn product_from_server(value: &Value, shop_id: i64) -> Option<CachedProduct> {
    let id = json_i64(value, &["id"])?;
    let master = value.get("masterProduct").cloned().unwrap_or(Value::Null);

    let name = json_str(value, &["displayName", "name"])
        .or_else(|| json_str(&master, &["name"]))?;

    let category = value.get("category").cloned().unwrap_or(Value::Null);

    Some(CachedProduct {
        id: ProductId::Confirmed(id),
        shop_id,
        name,
        name_tamil: json_str(value, &["nameTamil", "displayNameTamil"])
            .or_else(|| json_str(&master, &["nameTamil"])),
        price: json_f64(value, &["price", "sellingPrice"]).unwrap_or(0.0),
        original_price: json_f64(value, &["originalPrice", "mrp"]),
        cost_price: json_f64(value, &["costPrice"]),
        stock: json_i64(value, &["stockQuantity", "stock"]).unwrap_or(0),
        track_inventory: json_bool(value, &["trackInventory"]).unwrap_or(true),
        is_available: json_bool(value, &["isAvailable"]).unwrap_or(true),
        sku: json_str(value, &["sku"])
            .or_else(|| json_str(&master, &["sku"]))
            .unwrap_or_default(),
        barcode1: json_str(value, &["barcode1", "barcode"])
            .or_else(|| json_str(&master, &["barcode"])),
        barcode2: json_str(value, &["barcode2"]),
        barcode3: json_str(value, &["barcode3"]),
        image_url: json_str(value, &["primaryImageUrl", "imageUrl"])
            .or_else(|| json_str(&master, &["imageUrl"])),
        category_id: json_i64(&category, &["id"]).or_else(|| json_i64(value, &["categoryId"])),
        category_name: json_str(&category, &["name"])
            .or_else(|| json_str(value, &["categoryName"])),
        tags: json_str(value, &["tags"]),
        net_qty: json_str(value, &["netQuantity", "netQty"]),
        packed_date: json_str(value, &["packedDate"]),
        expiry_date: json_str(value, &["expiryDate"]),
    })
}

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Quick-update payload: only the changed fields, server field names.
fn changes_payload(changes: &ProductChanges) -> Value {
    let mut body = serde_json::Map::new();
    if let Some(name) = &changes.name {
        body.insert("displayName".into(), json!(name));
    }
    if let Some(name_tamil) = &changes.name_tamil {
        body.insert("nameTamil".into(), json!(name_tamil));
    }
    if let Some(price) = changes.price {
        body.insert("price".into(), json!(price));
    }
    if let Some(original_price) = changes.original_price {
        body.insert("originalPrice".into(), json!(original_price));
    }
    if let Some(stock) = changes.stock {
        body.insert("stockQuantity".into(), json!(stock));
    }
    if let Some(sku) = &changes.sku {
        body.insert("sku".into(), json!(sku));
    }
    if let Some(barcode1) = &changes.barcode1 {
        body.insert("barcode1".into(), json!(barcode1));
    }
    if let Some(barcode2) = &changes.barcode2 {
        body.insert("barcode2".into(), json!(barcode2));
    }
    if let Some(barcode3) = &changes.barcode3 {
        body.insert("barcode3".into(), json!(barcode3));
    }
    if let Some(net_qty) = &changes.net_qty {
        body.insert("netQuantity".into(), json!(net_qty));
    }
    if let Some(packed_date) = &changes.packed_date {
        body.insert("packedDate".into(), json!(packed_date));
    }
    if let Some(expiry_date) = &changes.expiry_date {
        body.insert("expiryDate".into(), json!(expiry_date));
    }
    Value::Object(body)
}

fn draft_payload(draft: &ProductDraft) -> Value {
    json!({
        "displayName": draft.name,
        "nameTamil": draft.name_tamil,
        "price": draft.price,
        "originalPrice": draft.original_price,
        "costPrice": draft.cost_price,
        "stockQuantity": draft.stock,
        "trackInventory": draft.track_inventory,
        "barcode1": draft.barcode1,
        "barcode2": draft.barcode2,
        "barcode3": draft.barcode3,
        "sku": draft.sku,
        "categoryId": draft.category_id,
        "tags": draft.tags,
        "imageUrl": draft.image_url,
        "netQuantity": draft.net_qty,
        "packedDate": draft.packed_date,
        "expiryDate": draft.expiry_date,
    })
}

fn order_payload(order: &OrderSubmission) -> Value {
    json!({
        "shopId": order.shop_id,
        "items": order.items.iter().map(|item| json!({
            "shopProductId": item.product_id.raw(),
            "quantity": item.quantity,
            "unitPrice": item.unit_price,
            "productName": item.product_name,
        })).collect::<Vec<_>>(),
        "paymentMethod": order.payment_method,
        "customerName": order.customer_name,
        "customerPhone": order.customer_phone,
        "notes": order.notes,
        "offlineOrderId": order.offline_order_id,
    })
}

// ---------------------------------------------------------------------------
// PosApi trait + reqwest client
// ---------------------------------------------------------------------------

/// The server operations the sync engine consumes.
#[async_trait]
pub trait PosApi: Send + Sync {
    /// Submit one order. Returns the server's order record.
    async fn submit_order(&self, order: &OrderSubmission) -> Result<Value, ApiError>;

    /// Flip a product's availability flag.
    async fn toggle_availability(&self, product_id: i64, available: bool) -> Result<(), ApiError>;

    /// Push a sparse field update to one product.
    async fn quick_update(
        &self,
        product_id: i64,
        changes: &ProductChanges,
    ) -> Result<Value, ApiError>;

    /// Create a product from a draft. Returns the server-assigned id.
    async fn create_product(
        &self,
        shop_id: i64,
        draft: &ProductDraft,
    ) -> Result<CreatedProduct, ApiError>;

    /// Fetch one page of the shop's catalog.
    async fn fetch_products_page(
        &self,
        shop_id: i64,
        page: u32,
        size: u32,
    ) -> Result<ProductPage, ApiError>;
}

/// Reqwest-backed [`PosApi`] implementation.
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: String,
}

impl ApiClient {
    pub fn new(base_url: &str, token: &str) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| ApiError::Unexpected(format!("Failed to create HTTP client: {e}")))?;
        Ok(ApiClient {
            client,
            base_url: normalize_base_url(base_url),
            token: token.trim().to_string(),
        })
    }

    /// Perform one authenticated request and return the JSON body, unwrapping
    /// a `data` envelope when present.
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, ApiError> {
        let url = format!("{}{path}", self.base_url);
        debug!(%method, %url, "API request");

        let mut req = self
            .client
            .request(method, &url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Content-Type", "application/json");
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| ApiError::Network(friendly_error(&self.base_url, &e)))?;
        let status = resp.status();
        let body_text = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(classify_status(status, response_detail(status, &body_text)));
        }

        if body_text.is_empty() {
            return Ok(Value::Null);
        }
        let parsed: Value = serde_json::from_str(&body_text)
            .map_err(|e| ApiError::Unexpected(format!("Invalid JSON from server: {e}")))?;
        Ok(parsed.get("data").cloned().unwrap_or(parsed))
    }
}

#[async_trait]
impl PosApi for ApiClient {
    async fn submit_order(&self, order: &OrderSubmission) -> Result<Value, ApiError> {
        self.request(Method::POST, "/pos/orders", Some(&order_payload(order)))
            .await
    }

    async fn toggle_availability(&self, product_id: i64, available: bool) -> Result<(), ApiError> {
        self.request(
            Method::PATCH,
            &format!("/shop-products/{product_id}/availability"),
            Some(&json!({ "isAvailable": available })),
        )
        .await?;
        Ok(())
    }

    async fn quick_update(
        &self,
        product_id: i64,
        changes: &ProductChanges,
    ) -> Result<Value, ApiError> {
        self.request(
            Method::PATCH,
            &format!("/shop-products/{product_id}"),
            Some(&changes_payload(changes)),
        )
        .await
    }

    async fn create_product(
        &self,
        shop_id: i64,
        draft: &ProductDraft,
    ) -> Result<CreatedProduct, ApiError> {
        let mut payload = draft_payload(draft);
        if let Some(obj) = payload.as_object_mut() {
            obj.insert("shopId".into(), json!(shop_id));
        }
        let data = self
            .request(Method::POST, "/shop-products", Some(&payload))
            .await?;
        let id = data
            .get("id")
            .and_then(Value::as_i64)
            .ok_or_else(|| ApiError::Unexpected("Create-product response has no id".into()))?;
        Ok(CreatedProduct { id, product: data })
    }

    async fn fetch_products_page(
        &self,
        shop_id: i64,
        page: u32,
        size: u32,
    ) -> Result<ProductPage, ApiError> {
        let data = self
            .request(
                Method::GET,
                &format!("/shop-products/my-products?page={page}&size={size}"),
                None,
            )
            .await?;

        let content = data
            .get("content")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_else(|| data.as_array().cloned().unwrap_or_default());
        let products: Vec<CachedProduct> = content
            .iter()
            .filter_map(|record| product_from_server(record, shop_id))
            .collect();
        let last = data
            .get("last")
            .and_then(Value::as_bool)
            .unwrap_or(products.is_empty());

        Ok(ProductPage { products, last })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(
            normalize_base_url("nammaooru.example.com"),
            "https://nammaooru.example.com/api"
        );
        assert_eq!(
            normalize_base_url("localhost:8080"),
            "http://localhost:8080/api"
        );
        assert_eq!(
            normalize_base_url("https://shop.example.com/api/"),
            "https://shop.example.com/api"
        );
        assert_eq!(
            normalize_base_url("  https://shop.example.com// "),
            "https://shop.example.com/api"
        );
    }

    #[test]
    fn test_classify_status_separates_validation_from_retryable() {
        for code in [400u16, 409, 422] {
            let status = StatusCode::from_u16(code).unwrap();
            assert!(classify_status(status, "bad".into()).is_validation());
        }
        for code in [401u16, 403, 404, 500, 503] {
            let status = StatusCode::from_u16(code).unwrap();
            assert!(!classify_status(status, "err".into()).is_validation());
        }
    }

    #[test]
    fn test_response_detail_prefers_server_message() {
        let status = StatusCode::from_u16(409).unwrap();
        let detail = response_detail(status, r#"{"message":"Barcode already exists"}"#);
        assert!(detail.contains("Barcode already exists"));
        assert!(detail.contains("409"));

        let fallback = response_detail(status, "not json");
        assert!(fallback.contains("not json"));
    }

    #[test]
    fn test_product_from_server_maps_nested_fields() {
        let record = serde_json::json!({
            "id": 42,
            "displayName": "Ponni Rice 5kg",
            "price": "249.50",
            "stockQuantity": 12,
            "isAvailable": true,
            "masterProduct": { "sku": "RICE-5KG", "barcode": "8901234567890" },
            "category": { "id": 3, "name": "Groceries" }
        });
        let product = product_from_server(&record, 7).unwrap();
        assert_eq!(product.id, ProductId::Confirmed(42));
        assert_eq!(product.shop_id, 7);
        assert_eq!(product.name, "Ponni Rice 5kg");
        assert_eq!(product.price, 249.5);
        assert_eq!(product.sku, "RICE-5KG");
        assert_eq!(product.barcode1.as_deref(), Some("8901234567890"));
        assert_eq!(product.category_name.as_deref(), Some("Groceries"));

        // Missing id or name is skipped, not fatal
        assert!(product_from_server(&serde_json::json!({"name": "x"}), 7).is_none());
        assert!(product_from_server(&serde_json::json!({"id": 1}), 7).is_none());
    }

    #[test]
    fn test_changes_payload_only_carries_changed_fields() {
        let changes = ProductChanges {
            price: Some(99.0),
            stock: Some(4),
            ..ProductChanges::default()
        };
        let payload = changes_payload(&changes);
        let obj = payload.as_object().unwrap();
        assert_eq!(obj.len(), 2);
        assert_eq!(obj["price"], json!(99.0));
        assert_eq!(obj["stockQuantity"], json!(4));
    }
}

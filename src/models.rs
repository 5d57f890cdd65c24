//! Data model for the offline-first POS sync engine.
//!
//! Every persisted collection has a typed record here. Product identity is
//! carried as a tagged [`ProductId`] rather than a bare integer so code
//! cannot accidentally treat a not-yet-created product as a confirmed one;
//! the raw `i64` (negative = temporary) remains the storage encoding.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Product identity
// ---------------------------------------------------------------------------

/// A product identifier, tagged by origin.
///
/// `Confirmed` ids are server-assigned (positive). `Pending` ids are
/// client-generated placeholders (negative) for products authored offline
/// that the server has not acknowledged yet. A pending id is remapped to a
/// confirmed one during reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum ProductId {
    Confirmed(i64),
    Pending(i64),
}

impl ProductId {
    /// Decode the storage representation (sign-of-identifier).
    pub fn from_raw(raw: i64) -> Self {
        if raw < 0 {
            ProductId::Pending(raw)
        } else {
            ProductId::Confirmed(raw)
        }
    }

    /// The storage representation.
    pub fn raw(self) -> i64 {
        match self {
            ProductId::Confirmed(id) | ProductId::Pending(id) => id,
        }
    }

    pub fn is_pending(self) -> bool {
        matches!(self, ProductId::Pending(_))
    }
}

impl From<i64> for ProductId {
    fn from(raw: i64) -> Self {
        ProductId::from_raw(raw)
    }
}

impl From<ProductId> for i64 {
    fn from(id: ProductId) -> Self {
        id.raw()
    }
}

impl std::fmt::Display for ProductId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw())
    }
}

// ---------------------------------------------------------------------------
// Product cache
// ---------------------------------------------------------------------------

/// A shop-scoped catalog snapshot entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedProduct {
    pub id: ProductId,
    pub shop_id: i64,
    pub name: String,
    pub name_tamil: Option<String>,
    pub price: f64,
    /// Reference/MRP price.
    pub original_price: Option<f64>,
    pub cost_price: Option<f64>,
    pub stock: i64,
    pub track_inventory: bool,
    pub is_available: bool,
    pub sku: String,
    pub barcode1: Option<String>,
    pub barcode2: Option<String>,
    pub barcode3: Option<String>,
    pub image_url: Option<String>,
    pub category_id: Option<i64>,
    pub category_name: Option<String>,
    pub tags: Option<String>,
    // Label printing metadata
    pub net_qty: Option<String>,
    pub packed_date: Option<String>,
    pub expiry_date: Option<String>,
}

impl CachedProduct {
    /// All non-empty scan codes of this product (SKU plus barcodes).
    pub fn scan_codes(&self) -> Vec<&str> {
        let mut codes = Vec::with_capacity(4);
        if !self.sku.trim().is_empty() {
            codes.push(self.sku.trim());
        }
        for barcode in [&self.barcode1, &self.barcode2, &self.barcode3]
            .into_iter()
            .flatten()
        {
            let trimmed = barcode.trim();
            if !trimmed.is_empty() {
                codes.push(trimmed);
            }
        }
        codes
    }
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

/// A sale line item, snapshotting name and unit price at checkout time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: ProductId,
    pub quantity: i64,
    pub unit_price: f64,
    pub product_name: String,
}

/// Checkout input for [`crate::sync::SyncEngine::create_order`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOrder {
    pub items: Vec<OrderItem>,
    pub payment_method: String,
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub notes: Option<String>,
    pub subtotal: f64,
    pub tax_amount: f64,
    pub total_amount: f64,
}

/// A completed sale not yet acknowledged by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineOrder {
    pub order_id: String,
    pub shop_id: i64,
    pub items: Vec<OrderItem>,
    pub payment_method: String,
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub notes: Option<String>,
    pub subtotal: f64,
    pub tax_amount: f64,
    pub total_amount: f64,
    pub created_at: DateTime<Utc>,
    pub synced: bool,
}

/// Outcome of `create_order`: either the server-confirmed order or a locally
/// queued one. Always usable for receipt printing.
#[derive(Debug, Clone, Serialize)]
pub struct OrderResult {
    pub offline: bool,
    pub order_number: String,
    pub order: serde_json::Value,
}

/// Order submission payload for the server API.
#[derive(Debug, Clone, Serialize)]
pub struct OrderSubmission {
    pub shop_id: i64,
    pub items: Vec<OrderItem>,
    pub payment_method: String,
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub notes: Option<String>,
    /// Present when replaying a queued offline order, for server-side
    /// deduplication.
    pub offline_order_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Product edits
// ---------------------------------------------------------------------------

/// Sparse set of changed product fields. Also used as the previous-values
/// snapshot on an [`OfflineEdit`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProductChanges {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_tamil: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stock: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_available: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub barcode1: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub barcode2: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub barcode3: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub net_qty: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packed_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<String>,
}

impl ProductChanges {
    pub fn is_empty(&self) -> bool {
        *self == ProductChanges::default()
    }

    /// True when any field other than the availability flag changed, i.e.
    /// the quick-update endpoint is needed.
    pub fn has_quick_update_fields(&self) -> bool {
        let mut other = self.clone();
        other.is_available = None;
        !other.is_empty()
    }

    /// The changes with the availability flag stripped, for the quick-update
    /// payload (availability goes through its own endpoint).
    pub fn without_availability(&self) -> ProductChanges {
        let mut stripped = self.clone();
        stripped.is_available = None;
        stripped
    }

    /// Apply the changed fields onto a cached product in place.
    pub fn apply_to(&self, product: &mut CachedProduct) {
        if let Some(name) = &self.name {
            product.name = name.clone();
        }
        if let Some(name_tamil) = &self.name_tamil {
            product.name_tamil = Some(name_tamil.clone());
        }
        if let Some(price) = self.price {
            product.price = price;
        }
        if let Some(original_price) = self.original_price {
            product.original_price = Some(original_price);
        }
        if let Some(stock) = self.stock {
            product.stock = stock;
        }
        if let Some(is_available) = self.is_available {
            product.is_available = is_available;
        }
        if let Some(sku) = &self.sku {
            product.sku = sku.clone();
        }
        if let Some(barcode1) = &self.barcode1 {
            product.barcode1 = Some(barcode1.clone());
        }
        if let Some(barcode2) = &self.barcode2 {
            product.barcode2 = Some(barcode2.clone());
        }
        if let Some(barcode3) = &self.barcode3 {
            product.barcode3 = Some(barcode3.clone());
        }
        if let Some(net_qty) = &self.net_qty {
            product.net_qty = Some(net_qty.clone());
        }
        if let Some(packed_date) = &self.packed_date {
            product.packed_date = Some(packed_date.clone());
        }
        if let Some(expiry_date) = &self.expiry_date {
            product.expiry_date = Some(expiry_date.clone());
        }
    }

    /// Snapshot the fields this change touches from the current product,
    /// for rollback/audit.
    pub fn previous_values_of(&self, product: &CachedProduct) -> ProductChanges {
        ProductChanges {
            name: self.name.as_ref().map(|_| product.name.clone()),
            name_tamil: self
                .name_tamil
                .as_ref()
                .map(|_| product.name_tamil.clone().unwrap_or_default()),
            price: self.price.map(|_| product.price),
            original_price: self
                .original_price
                .map(|_| product.original_price.unwrap_or(product.price)),
            stock: self.stock.map(|_| product.stock),
            is_available: self.is_available.map(|_| product.is_available),
            sku: self.sku.as_ref().map(|_| product.sku.clone()),
            barcode1: self
                .barcode1
                .as_ref()
                .map(|_| product.barcode1.clone().unwrap_or_default()),
            barcode2: self
                .barcode2
                .as_ref()
                .map(|_| product.barcode2.clone().unwrap_or_default()),
            barcode3: self
                .barcode3
                .as_ref()
                .map(|_| product.barcode3.clone().unwrap_or_default()),
            net_qty: self
                .net_qty
                .as_ref()
                .map(|_| product.net_qty.clone().unwrap_or_default()),
            packed_date: self
                .packed_date
                .as_ref()
                .map(|_| product.packed_date.clone().unwrap_or_default()),
            expiry_date: self
                .expiry_date
                .as_ref()
                .map(|_| product.expiry_date.clone().unwrap_or_default()),
        }
    }
}

/// A pending mutation to one product, queued while offline or after a
/// non-validation network failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineEdit {
    pub edit_id: String,
    pub product_id: ProductId,
    pub shop_id: i64,
    pub changes: ProductChanges,
    pub previous_values: ProductChanges,
    pub created_at: DateTime<Utc>,
    pub synced: bool,
    pub sync_error: Option<String>,
}

/// Outcome of `save_edit`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EditResult {
    /// True when the edit was queued locally rather than pushed to the server.
    pub offline: bool,
}

// ---------------------------------------------------------------------------
// Product creations
// ---------------------------------------------------------------------------

/// Fields of a product authored on this device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductDraft {
    pub name: String,
    pub name_tamil: Option<String>,
    pub price: f64,
    pub original_price: Option<f64>,
    pub cost_price: Option<f64>,
    pub stock: i64,
    pub track_inventory: bool,
    pub barcode1: String,
    pub barcode2: Option<String>,
    pub barcode3: Option<String>,
    pub sku: Option<String>,
    pub category_id: Option<i64>,
    pub category_name: Option<String>,
    pub tags: Option<String>,
    pub image_url: Option<String>,
    pub net_qty: Option<String>,
    pub packed_date: Option<String>,
    pub expiry_date: Option<String>,
}

impl ProductDraft {
    /// Merge a queued edit into this draft so the eventual creation request
    /// carries the final field values.
    pub fn apply_changes(&mut self, changes: &ProductChanges) {
        if let Some(v) = &changes.name {
            self.name = v.clone();
        }
        if let Some(v) = &changes.name_tamil {
            self.name_tamil = Some(v.clone());
        }
        if let Some(v) = changes.price {
            self.price = v;
        }
        if let Some(v) = changes.original_price {
            self.original_price = Some(v);
        }
        if let Some(v) = changes.stock {
            self.stock = v;
        }
        if let Some(v) = &changes.sku {
            self.sku = Some(v.clone());
        }
        if let Some(v) = &changes.barcode1 {
            self.barcode1 = v.clone();
        }
        if let Some(v) = &changes.barcode2 {
            self.barcode2 = Some(v.clone());
        }
        if let Some(v) = &changes.barcode3 {
            self.barcode3 = Some(v.clone());
        }
        if let Some(v) = &changes.net_qty {
            self.net_qty = Some(v.clone());
        }
        if let Some(v) = &changes.packed_date {
            self.packed_date = Some(v.clone());
        }
        if let Some(v) = &changes.expiry_date {
            self.expiry_date = Some(v.clone());
        }
    }

    /// Materialize the catalog cache entry used for billing until the server
    /// assigns a real identifier.
    pub fn to_cached_product(&self, temp_id: ProductId, shop_id: i64) -> CachedProduct {
        CachedProduct {
            id: temp_id,
            shop_id,
            name: self.name.clone(),
            name_tamil: self.name_tamil.clone(),
            price: self.price,
            original_price: self.original_price.or(Some(self.price)),
            cost_price: self.cost_price,
            stock: self.stock,
            track_inventory: self.track_inventory,
            is_available: true,
            sku: self.sku.clone().unwrap_or_default(),
            barcode1: Some(self.barcode1.clone()),
            barcode2: self.barcode2.clone(),
            barcode3: self.barcode3.clone(),
            image_url: self.image_url.clone(),
            category_id: self.category_id,
            category_name: self.category_name.clone(),
            tags: self.tags.clone(),
            net_qty: self.net_qty.clone(),
            packed_date: self.packed_date.clone(),
            expiry_date: self.expiry_date.clone(),
        }
    }
}

/// A new product authored entirely offline, queued for server creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineProductCreation {
    pub creation_id: String,
    /// Temporary negative product id under which the draft is materialized
    /// in the product cache.
    pub temp_product_id: ProductId,
    pub shop_id: i64,
    pub draft: ProductDraft,
    pub created_at: DateTime<Utc>,
    pub synced: bool,
    pub sync_error: Option<String>,
}

/// Outcome of `create_product`.
#[derive(Debug, Clone, Serialize)]
pub struct CreationResult {
    pub creation_id: String,
    /// The temporary identifier the product is addressable under until it
    /// syncs.
    pub product_id: ProductId,
}

/// A product created on the server, with its assigned identifier.
#[derive(Debug, Clone)]
pub struct CreatedProduct {
    pub id: i64,
    pub product: serde_json::Value,
}

/// One page of the paginated bulk product fetch.
#[derive(Debug, Clone)]
pub struct ProductPage {
    pub products: Vec<CachedProduct>,
    pub last: bool,
}

// ---------------------------------------------------------------------------
// Sync metadata, status, reports
// ---------------------------------------------------------------------------

/// One record per tracked collection, used for cache staleness decisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMeta {
    pub key: String,
    pub timestamp: DateTime<Utc>,
    pub count: i64,
}

/// URL-addressed binary image, served while offline. Additive only.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageCacheEntry {
    pub url: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
    pub cached_at: DateTime<Utc>,
}

impl ImageCacheEntry {
    /// Render the entry as a `data:` URL for offline display.
    pub fn data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.content_type,
            BASE64_STANDARD.encode(&self.bytes)
        )
    }
}

/// Snapshot published on the status stream after every mutating operation
/// and reconciliation stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncStatus {
    pub online: bool,
    pub syncing: bool,
    pub pending_orders: i64,
    pub pending_edits: i64,
    pub pending_creations: i64,
    pub last_product_sync: Option<DateTime<Utc>>,
}

impl SyncStatus {
    /// Single badge count for the UI.
    pub fn pending_total(&self) -> i64 {
        self.pending_orders + self.pending_edits + self.pending_creations
    }
}

/// Per-stage {synced, failed} counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StageReport {
    pub synced: u32,
    pub failed: u32,
}

/// User-facing summary of a reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncOutcome {
    NothingToSync,
    FullySynced,
    PartiallySynced,
}

/// Aggregated result of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncReport {
    /// True when the pass did not run (another pass active, or offline).
    pub skipped: bool,
    pub orders: StageReport,
    pub edits: StageReport,
    pub creations: StageReport,
    pub catalog_refreshed: bool,
}

impl SyncReport {
    pub fn skipped() -> Self {
        SyncReport {
            skipped: true,
            ..SyncReport::default()
        }
    }

    pub fn total_synced(&self) -> u32 {
        self.orders.synced + self.edits.synced + self.creations.synced
    }

    pub fn total_failed(&self) -> u32 {
        self.orders.failed + self.edits.failed + self.creations.failed
    }

    pub fn outcome(&self) -> SyncOutcome {
        if self.total_synced() == 0 && self.total_failed() == 0 {
            SyncOutcome::NothingToSync
        } else if self.total_failed() == 0 {
            SyncOutcome::FullySynced
        } else {
            SyncOutcome::PartiallySynced
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_id_tagging() {
        assert_eq!(ProductId::from_raw(42), ProductId::Confirmed(42));
        assert_eq!(ProductId::from_raw(-3), ProductId::Pending(-3));
        assert!(ProductId::from_raw(-3).is_pending());
        assert!(!ProductId::from_raw(42).is_pending());
        assert_eq!(ProductId::Pending(-3).raw(), -3);
    }

    #[test]
    fn test_product_id_serde_round_trip() {
        let json = serde_json::to_string(&ProductId::Pending(-7)).unwrap();
        assert_eq!(json, "-7");
        let back: ProductId = serde_json::from_str("-7").unwrap();
        assert_eq!(back, ProductId::Pending(-7));
    }

    #[test]
    fn test_changes_quick_update_detection() {
        let availability_only = ProductChanges {
            is_available: Some(false),
            ..ProductChanges::default()
        };
        assert!(!availability_only.has_quick_update_fields());

        let with_price = ProductChanges {
            is_available: Some(false),
            price: Some(12.0),
            ..ProductChanges::default()
        };
        assert!(with_price.has_quick_update_fields());
        assert_eq!(with_price.without_availability().is_available, None);
        assert_eq!(with_price.without_availability().price, Some(12.0));
    }

    #[test]
    fn test_draft_apply_changes_merges_latest_values() {
        let mut draft = ProductDraft {
            name: "Rice 1kg".into(),
            name_tamil: None,
            price: 55.0,
            original_price: None,
            cost_price: None,
            stock: 10,
            track_inventory: true,
            barcode1: "12345".into(),
            barcode2: None,
            barcode3: None,
            sku: None,
            category_id: None,
            category_name: None,
            tags: None,
            image_url: None,
            net_qty: None,
            packed_date: None,
            expiry_date: None,
        };
        draft.apply_changes(&ProductChanges {
            price: Some(58.0),
            stock: Some(8),
            ..ProductChanges::default()
        });
        assert_eq!(draft.price, 58.0);
        assert_eq!(draft.stock, 8);
        assert_eq!(draft.barcode1, "12345");
    }

    #[test]
    fn test_sync_report_outcome() {
        let mut report = SyncReport::default();
        assert_eq!(report.outcome(), SyncOutcome::NothingToSync);
        report.orders.synced = 2;
        assert_eq!(report.outcome(), SyncOutcome::FullySynced);
        report.edits.failed = 1;
        assert_eq!(report.outcome(), SyncOutcome::PartiallySynced);
    }

    #[test]
    fn test_image_cache_data_url() {
        let entry = ImageCacheEntry {
            url: "https://cdn.example/p.png".into(),
            content_type: "image/png".into(),
            bytes: vec![1, 2, 3],
            cached_at: Utc::now(),
        };
        assert!(entry.data_url().starts_with("data:image/png;base64,"));
    }
}

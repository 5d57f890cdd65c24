//! Local SQLite store for the offline-first POS sync engine.
//!
//! Uses rusqlite with WAL mode. Owns every persisted collection: the
//! shop-scoped product cache, the three pending queues (orders, edits,
//! product creations), sync metadata, the image cache, and the persisted
//! counters (temporary product ids, daily offline order numbers). Provides
//! schema migrations and the barcode-uniqueness validation helper.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

use crate::error::StoreError;
use crate::models::{
    CachedProduct, ImageCacheEntry, OfflineEdit, OfflineOrder, OfflineProductCreation, OrderItem,
    ProductChanges, ProductDraft, ProductId, SyncMeta,
};

/// Shared state holding the database connection.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

impl DbState {
    /// Lock the connection, mapping a poisoned mutex to a store error.
    pub fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 3;

/// Initialize the database at `{data_dir}/pos-sync.db`.
///
/// Creates the directory if needed, opens the connection, sets pragmas,
/// and runs any pending migrations. On corruption or open failure, deletes
/// the file and retries once. A failure after the retry means the store is
/// unavailable and the application must degrade to online-only behaviour.
pub fn init(data_dir: &Path) -> Result<DbState, StoreError> {
    fs::create_dir_all(data_dir)
        .map_err(|e| StoreError::StorageUnavailable(format!("create data dir: {e}")))?;

    let db_path = data_dir.join("pos-sync.db");
    info!("Opening database at {}", db_path.display());

    let conn = match open_and_configure(&db_path) {
        Ok(c) => c,
        Err(first_err) => {
            warn!("Database open failed ({first_err}), deleting and retrying once");
            if db_path.exists() {
                let _ = fs::remove_file(&db_path);
                let _ = fs::remove_file(db_path.with_extension("db-wal"));
                let _ = fs::remove_file(db_path.with_extension("db-shm"));
            }
            open_and_configure(&db_path).map_err(|e| {
                StoreError::StorageUnavailable(format!("open failed after retry: {e}"))
            })?
        }
    };

    run_migrations(&conn)?;

    info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");

    Ok(DbState {
        conn: Mutex::new(conn),
        db_path,
    })
}

/// Open the database file and apply pragmas.
fn open_and_configure(path: &Path) -> Result<Connection, StoreError> {
    let conn = Connection::open(path)
        .map_err(|e| StoreError::StorageUnavailable(format!("sqlite open: {e}")))?;

    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
    .map_err(|e| StoreError::StorageUnavailable(format!("pragma setup: {e}")))?;

    Ok(conn)
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    info!("Migrating database from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < 2 {
        migrate_v2(conn)?;
    }
    if current < 3 {
        migrate_v3(conn)?;
    }

    Ok(())
}

/// Migration v1: product cache, offline orders, offline edits, sync metadata,
/// and the local settings (category/key/value) table that backs the
/// persisted counters.
fn migrate_v1(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS products (
            id INTEGER PRIMARY KEY,
            shop_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            name_tamil TEXT,
            price REAL NOT NULL DEFAULT 0,
            original_price REAL,
            cost_price REAL,
            stock INTEGER NOT NULL DEFAULT 0,
            track_inventory INTEGER NOT NULL DEFAULT 1,
            is_available INTEGER NOT NULL DEFAULT 1,
            sku TEXT NOT NULL DEFAULT '',
            barcode1 TEXT,
            barcode2 TEXT,
            barcode3 TEXT,
            image_url TEXT,
            category_id INTEGER,
            category_name TEXT,
            tags TEXT
        );

        CREATE TABLE IF NOT EXISTS offline_orders (
            order_id TEXT PRIMARY KEY,
            shop_id INTEGER NOT NULL,
            items TEXT NOT NULL DEFAULT '[]',
            payment_method TEXT NOT NULL DEFAULT 'cash',
            customer_name TEXT,
            customer_phone TEXT,
            notes TEXT,
            subtotal REAL NOT NULL DEFAULT 0,
            tax_amount REAL NOT NULL DEFAULT 0,
            total_amount REAL NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            synced INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS offline_edits (
            edit_id TEXT PRIMARY KEY,
            product_id INTEGER NOT NULL,
            shop_id INTEGER NOT NULL,
            changes TEXT NOT NULL DEFAULT '{}',
            previous_values TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            synced INTEGER NOT NULL DEFAULT 0,
            sync_error TEXT
        );

        CREATE TABLE IF NOT EXISTS sync_meta (
            key TEXT PRIMARY KEY,
            timestamp TEXT NOT NULL,
            count INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS local_settings (
            setting_category TEXT NOT NULL,
            setting_key TEXT NOT NULL,
            setting_value TEXT NOT NULL,
            updated_at TEXT DEFAULT (datetime('now')),
            PRIMARY KEY (setting_category, setting_key)
        );

        CREATE INDEX IF NOT EXISTS idx_products_shop_id ON products(shop_id);
        CREATE INDEX IF NOT EXISTS idx_products_sku ON products(sku);
        CREATE INDEX IF NOT EXISTS idx_products_barcode1 ON products(barcode1);
        CREATE INDEX IF NOT EXISTS idx_products_barcode2 ON products(barcode2);
        CREATE INDEX IF NOT EXISTS idx_products_barcode3 ON products(barcode3);
        CREATE INDEX IF NOT EXISTS idx_offline_orders_synced ON offline_orders(synced);
        CREATE INDEX IF NOT EXISTS idx_offline_orders_created_at ON offline_orders(created_at);
        CREATE INDEX IF NOT EXISTS idx_offline_edits_synced ON offline_edits(synced);
        CREATE INDEX IF NOT EXISTS idx_offline_edits_product_id ON offline_edits(product_id);

        INSERT INTO schema_version (version) VALUES (1);
        ",
    )?;

    info!("Applied migration v1");
    Ok(())
}

/// Migration v2: offline product creations queue.
fn migrate_v2(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS offline_product_creations (
            creation_id TEXT PRIMARY KEY,
            temp_product_id INTEGER NOT NULL UNIQUE,
            shop_id INTEGER NOT NULL,
            draft TEXT NOT NULL,
            created_at TEXT NOT NULL,
            synced INTEGER NOT NULL DEFAULT 0,
            sync_error TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_creations_shop_id ON offline_product_creations(shop_id);
        CREATE INDEX IF NOT EXISTS idx_creations_synced ON offline_product_creations(synced);

        INSERT INTO schema_version (version) VALUES (2);
        ",
    )?;

    info!("Applied migration v2 (offline_product_creations)");
    Ok(())
}

/// Migration v3: image cache and label-printing metadata on products.
fn migrate_v3(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS image_cache (
            url TEXT PRIMARY KEY,
            content_type TEXT NOT NULL DEFAULT 'image/jpeg',
            bytes BLOB NOT NULL,
            cached_at TEXT NOT NULL
        );

        ALTER TABLE products ADD COLUMN net_qty TEXT;
        ALTER TABLE products ADD COLUMN packed_date TEXT;
        ALTER TABLE products ADD COLUMN expiry_date TEXT;

        INSERT INTO schema_version (version) VALUES (3);
        ",
    )?;

    info!("Applied migration v3 (image_cache, label fields)");
    Ok(())
}

/// Test helper: run all migrations on an in-memory connection.
#[cfg(test)]
pub fn run_migrations_for_test(conn: &Connection) {
    run_migrations(conn).expect("run migrations");
}

// ---------------------------------------------------------------------------
// Local settings (persisted counters)
// ---------------------------------------------------------------------------

pub fn setting_get(conn: &Connection, category: &str, key: &str) -> Option<String> {
    conn.query_row(
        "SELECT setting_value FROM local_settings \
         WHERE setting_category = ?1 AND setting_key = ?2",
        params![category, key],
        |row| row.get(0),
    )
    .optional()
    .ok()
    .flatten()
}

pub fn setting_set(
    conn: &Connection,
    category: &str,
    key: &str,
    value: &str,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO local_settings (setting_category, setting_key, setting_value, updated_at) \
         VALUES (?1, ?2, ?3, datetime('now')) \
         ON CONFLICT(setting_category, setting_key) DO UPDATE SET \
            setting_value = excluded.setting_value, updated_at = excluded.updated_at",
        params![category, key, value],
    )?;
    Ok(())
}

/// Allocate the next temporary (negative) product identifier.
///
/// The high-water mark is persisted so identifier uniqueness survives a
/// restart mid-session.
pub fn next_temp_product_id(conn: &Connection) -> Result<i64, StoreError> {
    let current: i64 = setting_get(conn, "products", "temp_id_floor")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let next = current.min(0) - 1;
    setting_set(conn, "products", "temp_id_floor", &next.to_string())?;
    Ok(next)
}

/// Generate the next offline order number, format `POS-DDMM-NNN`.
///
/// The counter is keyed by day so it resets naturally at midnight.
pub fn next_offline_order_number(conn: &Connection) -> Result<String, StoreError> {
    let date_prefix = chrono::Local::now().format("%d%m").to_string();
    let key = format!("pos_order_counter_{date_prefix}");

    let current: i64 = setting_get(conn, "orders", &key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let next = current + 1;
    setting_set(conn, "orders", &key, &next.to_string())?;

    Ok(format!("POS-{date_prefix}-{next:03}"))
}

// ---------------------------------------------------------------------------
// Product cache
// ---------------------------------------------------------------------------

fn product_from_row(row: &Row<'_>) -> rusqlite::Result<CachedProduct> {
    Ok(CachedProduct {
        id: ProductId::from_raw(row.get(0)?),
        shop_id: row.get(1)?,
        name: row.get(2)?,
        name_tamil: row.get(3)?,
        price: row.get(4)?,
        original_price: row.get(5)?,
        cost_price: row.get(6)?,
        stock: row.get(7)?,
        track_inventory: row.get::<_, i64>(8)? != 0,
        is_available: row.get::<_, i64>(9)? != 0,
        sku: row.get(10)?,
        barcode1: row.get(11)?,
        barcode2: row.get(12)?,
        barcode3: row.get(13)?,
        image_url: row.get(14)?,
        category_id: row.get(15)?,
        category_name: row.get(16)?,
        tags: row.get(17)?,
        net_qty: row.get(18)?,
        packed_date: row.get(19)?,
        expiry_date: row.get(20)?,
    })
}

const PRODUCT_COLUMNS: &str = "id, shop_id, name, name_tamil, price, original_price, cost_price, \
     stock, track_inventory, is_available, sku, barcode1, barcode2, barcode3, image_url, \
     category_id, category_name, tags, net_qty, packed_date, expiry_date";

/// Insert or replace one product cache entry.
pub fn put_product(conn: &Connection, product: &CachedProduct) -> Result<(), StoreError> {
    conn.execute(
        "INSERT OR REPLACE INTO products (
            id, shop_id, name, name_tamil, price, original_price, cost_price,
            stock, track_inventory, is_available, sku, barcode1, barcode2, barcode3,
            image_url, category_id, category_name, tags, net_qty, packed_date, expiry_date
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)",
        params![
            product.id.raw(),
            product.shop_id,
            product.name,
            product.name_tamil,
            product.price,
            product.original_price,
            product.cost_price,
            product.stock,
            product.track_inventory as i64,
            product.is_available as i64,
            product.sku,
            product.barcode1,
            product.barcode2,
            product.barcode3,
            product.image_url,
            product.category_id,
            product.category_name,
            product.tags,
            product.net_qty,
            product.packed_date,
            product.expiry_date,
        ],
    )?;
    Ok(())
}

pub fn get_product(conn: &Connection, id: ProductId) -> Result<Option<CachedProduct>, StoreError> {
    let product = conn
        .query_row(
            &format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?1"),
            params![id.raw()],
            product_from_row,
        )
        .optional()?;
    Ok(product)
}

pub fn get_products(conn: &Connection, shop_id: i64) -> Result<Vec<CachedProduct>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {PRODUCT_COLUMNS} FROM products WHERE shop_id = ?1 ORDER BY name"
    ))?;
    let products = stmt
        .query_map(params![shop_id], product_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(products)
}

pub fn delete_product(conn: &Connection, id: ProductId) -> Result<(), StoreError> {
    conn.execute("DELETE FROM products WHERE id = ?1", params![id.raw()])?;
    Ok(())
}

/// Scan-to-find: look up a product by any of its scan codes (SKU or one of
/// the three barcodes), case-insensitively.
pub fn find_by_barcode(
    conn: &Connection,
    shop_id: i64,
    code: &str,
) -> Result<Option<CachedProduct>, StoreError> {
    let needle = code.trim().to_lowercase();
    if needle.is_empty() {
        return Ok(None);
    }
    let product = conn
        .query_row(
            &format!(
                "SELECT {PRODUCT_COLUMNS} FROM products \
                 WHERE shop_id = ?1 AND (lower(sku) = ?2 OR lower(barcode1) = ?2 \
                    OR lower(barcode2) = ?2 OR lower(barcode3) = ?2) \
                 LIMIT 1"
            ),
            params![shop_id, needle],
            product_from_row,
        )
        .optional()?;
    Ok(product)
}

pub fn find_by_sku(
    conn: &Connection,
    shop_id: i64,
    sku: &str,
) -> Result<Option<CachedProduct>, StoreError> {
    let needle = sku.trim().to_lowercase();
    if needle.is_empty() {
        return Ok(None);
    }
    let product = conn
        .query_row(
            &format!(
                "SELECT {PRODUCT_COLUMNS} FROM products \
                 WHERE shop_id = ?1 AND lower(sku) = ?2 LIMIT 1"
            ),
            params![shop_id, needle],
            product_from_row,
        )
        .optional()?;
    Ok(product)
}

/// Local substring search across name, Tamil name, SKU and barcodes.
pub fn search_products(
    conn: &Connection,
    shop_id: i64,
    query: &str,
) -> Result<Vec<CachedProduct>, StoreError> {
    let needle = format!("%{}%", query.trim().to_lowercase());
    let mut stmt = conn.prepare(&format!(
        "SELECT {PRODUCT_COLUMNS} FROM products \
         WHERE shop_id = ?1 AND (lower(name) LIKE ?2 OR lower(COALESCE(name_tamil, '')) LIKE ?2 \
            OR lower(sku) LIKE ?2 OR lower(COALESCE(barcode1, '')) LIKE ?2 \
            OR lower(COALESCE(barcode2, '')) LIKE ?2 OR lower(COALESCE(barcode3, '')) LIKE ?2) \
         ORDER BY name"
    ))?;
    let products = stmt
        .query_map(params![shop_id, needle], product_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(products)
}

/// Atomically clear and repopulate the product cache for one shop, recording
/// the sync timestamp in the same unit of work so cache-age queries stay
/// consistent with cache contents.
pub fn replace_all_products(
    conn: &mut Connection,
    products: &[CachedProduct],
    shop_id: i64,
) -> Result<(), StoreError> {
    let tx = conn.transaction()?;

    tx.execute("DELETE FROM products WHERE shop_id = ?1", params![shop_id])?;
    {
        let mut stmt = tx.prepare(
            "INSERT OR REPLACE INTO products (
                id, shop_id, name, name_tamil, price, original_price, cost_price,
                stock, track_inventory, is_available, sku, barcode1, barcode2, barcode3,
                image_url, category_id, category_name, tags, net_qty, packed_date, expiry_date
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)",
        )?;
        for product in products {
            stmt.execute(params![
                product.id.raw(),
                product.shop_id,
                product.name,
                product.name_tamil,
                product.price,
                product.original_price,
                product.cost_price,
                product.stock,
                product.track_inventory as i64,
                product.is_available as i64,
                product.sku,
                product.barcode1,
                product.barcode2,
                product.barcode3,
                product.image_url,
                product.category_id,
                product.category_name,
                product.tags,
                product.net_qty,
                product.packed_date,
                product.expiry_date,
            ])?;
        }
    }
    tx.execute(
        "INSERT OR REPLACE INTO sync_meta (key, timestamp, count) VALUES (?1, ?2, ?3)",
        params![
            products_sync_key(shop_id),
            Utc::now().to_rfc3339(),
            products.len() as i64
        ],
    )?;

    tx.commit()?;
    info!(shop_id, count = products.len(), "Product cache replaced");
    Ok(())
}

/// Apply a sparse change set to a cached product. Returns false when the
/// product is not cached.
pub fn apply_changes_to_product(
    conn: &Connection,
    id: ProductId,
    changes: &ProductChanges,
) -> Result<bool, StoreError> {
    let Some(mut product) = get_product(conn, id)? else {
        return Ok(false);
    };
    changes.apply_to(&mut product);
    put_product(conn, &product)?;
    Ok(true)
}

/// Decrement a cached product's stock by the quantity sold, clamped at zero,
/// only when the product tracks inventory.
pub fn apply_stock_sale(
    conn: &Connection,
    id: ProductId,
    quantity_sold: i64,
) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE products SET stock = max(0, stock - ?2) \
         WHERE id = ?1 AND track_inventory = 1",
        params![id.raw(), quantity_sold],
    )?;
    Ok(())
}

/// Transactionally rewrite a temporary product identifier to its
/// server-assigned one, everywhere it appears in the store.
///
/// If the catalog already holds a row under the real id (a refresh raced the
/// remap), the server copy wins and the temporary row is dropped.
pub fn remap_product_id(
    conn: &mut Connection,
    temp_id: ProductId,
    real_id: i64,
) -> Result<(), StoreError> {
    let tx = conn.transaction()?;

    let real_exists: bool = tx
        .query_row(
            "SELECT 1 FROM products WHERE id = ?1",
            params![real_id],
            |_| Ok(()),
        )
        .optional()?
        .is_some();

    if real_exists {
        tx.execute("DELETE FROM products WHERE id = ?1", params![temp_id.raw()])?;
    } else {
        tx.execute(
            "UPDATE products SET id = ?2 WHERE id = ?1",
            params![temp_id.raw(), real_id],
        )?;
    }
    tx.execute(
        "UPDATE offline_edits SET product_id = ?2 WHERE product_id = ?1",
        params![temp_id.raw(), real_id],
    )?;

    tx.commit()?;
    info!(temp_id = temp_id.raw(), real_id, "Remapped product identifier");
    Ok(())
}

// ---------------------------------------------------------------------------
// Barcode validation
// ---------------------------------------------------------------------------

/// Validate up to three candidate barcode values for uniqueness within a
/// shop, against all cached products (SKU included) and all pending offline
/// creations, skipping the product being edited. Returns a human-readable
/// conflict description, or `None` when the candidates are acceptable.
pub fn validate_barcodes(
    conn: &Connection,
    shop_id: i64,
    barcode1: Option<&str>,
    barcode2: Option<&str>,
    barcode3: Option<&str>,
    exclude: Option<ProductId>,
) -> Result<Option<String>, StoreError> {
    let normalize = |b: Option<&str>| -> Option<String> {
        b.map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase)
    };
    let b1 = normalize(barcode1);
    let b2 = normalize(barcode2);
    let b3 = normalize(barcode3);

    // Duplicates within the same product
    if b1.is_some() && b1 == b2 {
        return Ok(Some("Barcode 1 and Barcode 2 cannot be the same.".into()));
    }
    if b1.is_some() && b1 == b3 {
        return Ok(Some("Barcode 1 and Barcode 3 cannot be the same.".into()));
    }
    if b2.is_some() && b2 == b3 {
        return Ok(Some("Barcode 2 and Barcode 3 cannot be the same.".into()));
    }

    for code in [b1, b2, b3].into_iter().flatten() {
        if barcode_exists(conn, shop_id, &code, exclude)? {
            return Ok(Some(format!(
                "Barcode '{code}' already exists. Please use a unique barcode."
            )));
        }
    }
    Ok(None)
}

/// Check whether a (lowercased, trimmed) scan code is already taken within a
/// shop by a cached product or a pending creation other than `exclude`.
fn barcode_exists(
    conn: &Connection,
    shop_id: i64,
    code: &str,
    exclude: Option<ProductId>,
) -> Result<bool, StoreError> {
    let exclude_raw = exclude.map(ProductId::raw);

    let in_products: bool = conn
        .query_row(
            "SELECT 1 FROM products \
             WHERE shop_id = ?1 AND (?3 IS NULL OR id != ?3) \
               AND (lower(sku) = ?2 OR lower(barcode1) = ?2 \
                    OR lower(barcode2) = ?2 OR lower(barcode3) = ?2) \
             LIMIT 1",
            params![shop_id, code, exclude_raw],
            |_| Ok(()),
        )
        .optional()?
        .is_some();
    if in_products {
        return Ok(true);
    }

    // Pending creations keep their barcodes inside the JSON draft; the queue
    // is small so scanning it here is fine. Skip the creation that backs the
    // product being edited (matched exactly via its temporary id).
    for creation in pending_creations(conn)? {
        if creation.shop_id != shop_id {
            continue;
        }
        if exclude_raw == Some(creation.temp_product_id.raw()) {
            continue;
        }
        let draft = &creation.draft;
        let codes = [
            Some(draft.barcode1.as_str()),
            draft.barcode2.as_deref(),
            draft.barcode3.as_deref(),
            draft.sku.as_deref(),
        ];
        if codes
            .into_iter()
            .flatten()
            .any(|c| c.trim().to_lowercase() == code)
        {
            return Ok(true);
        }
    }
    Ok(false)
}

// ---------------------------------------------------------------------------
// Offline orders
// ---------------------------------------------------------------------------

fn parse_timestamp(collection: &'static str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::corrupt(collection, format!("bad timestamp {raw:?}: {e}")))
}

fn parse_json<T: serde::de::DeserializeOwned>(
    collection: &'static str,
    raw: &str,
) -> Result<T, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::corrupt(collection, e.to_string()))
}

pub fn put_offline_order(conn: &Connection, order: &OfflineOrder) -> Result<(), StoreError> {
    let items = serde_json::to_string(&order.items)
        .map_err(|e| StoreError::corrupt("offline_orders", e.to_string()))?;
    conn.execute(
        "INSERT OR REPLACE INTO offline_orders (
            order_id, shop_id, items, payment_method, customer_name, customer_phone,
            notes, subtotal, tax_amount, total_amount, created_at, synced
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            order.order_id,
            order.shop_id,
            items,
            order.payment_method,
            order.customer_name,
            order.customer_phone,
            order.notes,
            order.subtotal,
            order.tax_amount,
            order.total_amount,
            order.created_at.to_rfc3339(),
            order.synced as i64,
        ],
    )?;
    Ok(())
}

type OrderRow = (
    String,
    i64,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    f64,
    f64,
    f64,
    String,
    i64,
);

fn order_from_parts(parts: OrderRow) -> Result<OfflineOrder, StoreError> {
    let items: Vec<OrderItem> = parse_json("offline_orders", &parts.2)?;
    Ok(OfflineOrder {
        order_id: parts.0,
        shop_id: parts.1,
        items,
        payment_method: parts.3,
        customer_name: parts.4,
        customer_phone: parts.5,
        notes: parts.6,
        subtotal: parts.7,
        tax_amount: parts.8,
        total_amount: parts.9,
        created_at: parse_timestamp("offline_orders", &parts.10)?,
        synced: parts.11 != 0,
    })
}

/// All unsynced orders, in enqueue order.
pub fn pending_orders(conn: &Connection) -> Result<Vec<OfflineOrder>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT order_id, shop_id, items, payment_method, customer_name, customer_phone, \
                notes, subtotal, tax_amount, total_amount, created_at, synced \
         FROM offline_orders WHERE synced = 0 ORDER BY created_at ASC",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
                row.get(7)?,
                row.get(8)?,
                row.get(9)?,
                row.get(10)?,
                row.get(11)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<OrderRow>>>()?;
    rows.into_iter().map(order_from_parts).collect()
}

pub fn mark_order_synced(conn: &Connection, order_id: &str) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE offline_orders SET synced = 1 WHERE order_id = ?1",
        params![order_id],
    )?;
    Ok(())
}

pub fn delete_offline_order(conn: &Connection, order_id: &str) -> Result<(), StoreError> {
    conn.execute(
        "DELETE FROM offline_orders WHERE order_id = ?1",
        params![order_id],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Offline edits
// ---------------------------------------------------------------------------

pub fn put_offline_edit(conn: &Connection, edit: &OfflineEdit) -> Result<(), StoreError> {
    let changes = serde_json::to_string(&edit.changes)
        .map_err(|e| StoreError::corrupt("offline_edits", e.to_string()))?;
    let previous = serde_json::to_string(&edit.previous_values)
        .map_err(|e| StoreError::corrupt("offline_edits", e.to_string()))?;
    conn.execute(
        "INSERT OR REPLACE INTO offline_edits (
            edit_id, product_id, shop_id, changes, previous_values, created_at, synced, sync_error
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            edit.edit_id,
            edit.product_id.raw(),
            edit.shop_id,
            changes,
            previous,
            edit.created_at.to_rfc3339(),
            edit.synced as i64,
            edit.sync_error,
        ],
    )?;
    Ok(())
}

type EditRow = (String, i64, i64, String, String, String, i64, Option<String>);

fn edit_from_parts(parts: EditRow) -> Result<OfflineEdit, StoreError> {
    Ok(OfflineEdit {
        edit_id: parts.0,
        product_id: ProductId::from_raw(parts.1),
        shop_id: parts.2,
        changes: parse_json("offline_edits", &parts.3)?,
        previous_values: parse_json("offline_edits", &parts.4)?,
        created_at: parse_timestamp("offline_edits", &parts.5)?,
        synced: parts.6 != 0,
        sync_error: parts.7,
    })
}

/// All unsynced edits, in enqueue order.
pub fn pending_edits(conn: &Connection) -> Result<Vec<OfflineEdit>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT edit_id, product_id, shop_id, changes, previous_values, created_at, synced, sync_error \
         FROM offline_edits WHERE synced = 0 ORDER BY created_at ASC",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
                row.get(7)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<EditRow>>>()?;
    rows.into_iter().map(edit_from_parts).collect()
}

pub fn delete_offline_edit(conn: &Connection, edit_id: &str) -> Result<(), StoreError> {
    conn.execute(
        "DELETE FROM offline_edits WHERE edit_id = ?1",
        params![edit_id],
    )?;
    Ok(())
}

pub fn set_edit_error(conn: &Connection, edit_id: &str, error: &str) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE offline_edits SET sync_error = ?2 WHERE edit_id = ?1",
        params![edit_id, error],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Offline product creations
// ---------------------------------------------------------------------------

pub fn put_offline_creation(
    conn: &Connection,
    creation: &OfflineProductCreation,
) -> Result<(), StoreError> {
    let draft = serde_json::to_string(&creation.draft)
        .map_err(|e| StoreError::corrupt("offline_product_creations", e.to_string()))?;
    conn.execute(
        "INSERT OR REPLACE INTO offline_product_creations (
            creation_id, temp_product_id, shop_id, draft, created_at, synced, sync_error
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            creation.creation_id,
            creation.temp_product_id.raw(),
            creation.shop_id,
            draft,
            creation.created_at.to_rfc3339(),
            creation.synced as i64,
            creation.sync_error,
        ],
    )?;
    Ok(())
}

type CreationRow = (String, i64, i64, String, String, i64, Option<String>);

fn creation_from_parts(parts: CreationRow) -> Result<OfflineProductCreation, StoreError> {
    let draft: ProductDraft = parse_json("offline_product_creations", &parts.3)?;
    Ok(OfflineProductCreation {
        creation_id: parts.0,
        temp_product_id: ProductId::from_raw(parts.1),
        shop_id: parts.2,
        draft,
        created_at: parse_timestamp("offline_product_creations", &parts.4)?,
        synced: parts.5 != 0,
        sync_error: parts.6,
    })
}

fn creation_rows(
    conn: &Connection,
    sql: &str,
    args: &[&dyn rusqlite::ToSql],
) -> Result<Vec<OfflineProductCreation>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(args, |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<CreationRow>>>()?;
    rows.into_iter().map(creation_from_parts).collect()
}

const CREATION_COLUMNS: &str =
    "creation_id, temp_product_id, shop_id, draft, created_at, synced, sync_error";

/// All unsynced creations across shops, in enqueue order.
pub fn pending_creations(conn: &Connection) -> Result<Vec<OfflineProductCreation>, StoreError> {
    creation_rows(
        conn,
        &format!(
            "SELECT {CREATION_COLUMNS} FROM offline_product_creations \
             WHERE synced = 0 ORDER BY created_at ASC"
        ),
        &[],
    )
}

/// Unsynced creations belonging to one shop, in enqueue order.
pub fn pending_creations_for_shop(
    conn: &Connection,
    shop_id: i64,
) -> Result<Vec<OfflineProductCreation>, StoreError> {
    creation_rows(
        conn,
        &format!(
            "SELECT {CREATION_COLUMNS} FROM offline_product_creations \
             WHERE synced = 0 AND shop_id = ?1 ORDER BY created_at ASC"
        ),
        &[&shop_id],
    )
}

pub fn find_creation_by_temp_id(
    conn: &Connection,
    temp_id: ProductId,
) -> Result<Option<OfflineProductCreation>, StoreError> {
    let mut found = creation_rows(
        conn,
        &format!(
            "SELECT {CREATION_COLUMNS} FROM offline_product_creations \
             WHERE synced = 0 AND temp_product_id = ?1 LIMIT 1"
        ),
        &[&temp_id.raw()],
    )?;
    Ok(found.pop())
}

pub fn update_creation_draft(
    conn: &Connection,
    creation_id: &str,
    draft: &ProductDraft,
) -> Result<(), StoreError> {
    let encoded = serde_json::to_string(draft)
        .map_err(|e| StoreError::corrupt("offline_product_creations", e.to_string()))?;
    conn.execute(
        "UPDATE offline_product_creations SET draft = ?2 WHERE creation_id = ?1",
        params![creation_id, encoded],
    )?;
    Ok(())
}

pub fn set_creation_error(
    conn: &Connection,
    creation_id: &str,
    error: &str,
) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE offline_product_creations SET sync_error = ?2 WHERE creation_id = ?1",
        params![creation_id, error],
    )?;
    Ok(())
}

pub fn delete_offline_creation(conn: &Connection, creation_id: &str) -> Result<(), StoreError> {
    conn.execute(
        "DELETE FROM offline_product_creations WHERE creation_id = ?1",
        params![creation_id],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Pending counts
// ---------------------------------------------------------------------------

/// The three offline queues the status stream reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingQueue {
    Orders,
    Edits,
    Creations,
}

/// Fast pending-item count without materializing records.
pub fn count_pending(conn: &Connection, queue: PendingQueue) -> Result<i64, StoreError> {
    let table = match queue {
        PendingQueue::Orders => "offline_orders",
        PendingQueue::Edits => "offline_edits",
        PendingQueue::Creations => "offline_product_creations",
    };
    let count = conn.query_row(
        &format!("SELECT COUNT(*) FROM {table} WHERE synced = 0"),
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}

// ---------------------------------------------------------------------------
// Sync metadata
// ---------------------------------------------------------------------------

pub fn products_sync_key(shop_id: i64) -> String {
    format!("products_sync_{shop_id}")
}

pub fn set_sync_meta(conn: &Connection, key: &str, count: i64) -> Result<(), StoreError> {
    conn.execute(
        "INSERT OR REPLACE INTO sync_meta (key, timestamp, count) VALUES (?1, ?2, ?3)",
        params![key, Utc::now().to_rfc3339(), count],
    )?;
    Ok(())
}

pub fn get_sync_meta(conn: &Connection, key: &str) -> Result<Option<SyncMeta>, StoreError> {
    let row: Option<(String, i64)> = conn
        .query_row(
            "SELECT timestamp, count FROM sync_meta WHERE key = ?1",
            params![key],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    match row {
        Some((timestamp, count)) => Ok(Some(SyncMeta {
            key: key.to_string(),
            timestamp: parse_timestamp("sync_meta", &timestamp)?,
            count,
        })),
        None => Ok(None),
    }
}

/// When the product cache for a shop was last replaced, if ever.
pub fn products_sync_time(
    conn: &Connection,
    shop_id: i64,
) -> Result<Option<DateTime<Utc>>, StoreError> {
    Ok(get_sync_meta(conn, &products_sync_key(shop_id))?.map(|meta| meta.timestamp))
}

// ---------------------------------------------------------------------------
// Image cache
// ---------------------------------------------------------------------------

pub fn put_image(conn: &Connection, entry: &ImageCacheEntry) -> Result<(), StoreError> {
    conn.execute(
        "INSERT OR REPLACE INTO image_cache (url, content_type, bytes, cached_at) \
         VALUES (?1, ?2, ?3, ?4)",
        params![
            entry.url,
            entry.content_type,
            entry.bytes,
            entry.cached_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub fn get_image(conn: &Connection, url: &str) -> Result<Option<ImageCacheEntry>, StoreError> {
    let row: Option<(String, Vec<u8>, String)> = conn
        .query_row(
            "SELECT content_type, bytes, cached_at FROM image_cache WHERE url = ?1",
            params![url],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;
    match row {
        Some((content_type, bytes, cached_at)) => Ok(Some(ImageCacheEntry {
            url: url.to_string(),
            content_type,
            bytes,
            cached_at: parse_timestamp("image_cache", &cached_at)?,
        })),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProductDraft;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;
             PRAGMA synchronous = NORMAL;",
        )
        .expect("pragma setup");
        run_migrations_for_test(&conn);
        conn
    }

    fn sample_product(id: i64, shop_id: i64) -> CachedProduct {
        CachedProduct {
            id: ProductId::from_raw(id),
            shop_id,
            name: format!("Product {id}"),
            name_tamil: None,
            price: 10.0,
            original_price: Some(12.0),
            cost_price: None,
            stock: 5,
            track_inventory: true,
            is_available: true,
            sku: format!("SKU-{id}"),
            barcode1: Some(format!("BC-{id}")),
            barcode2: None,
            barcode3: None,
            image_url: None,
            category_id: None,
            category_name: None,
            tags: None,
            net_qty: None,
            packed_date: None,
            expiry_date: None,
        }
    }

    fn sample_draft(name: &str, barcode1: &str) -> ProductDraft {
        ProductDraft {
            name: name.into(),
            name_tamil: None,
            price: 55.0,
            original_price: None,
            cost_price: None,
            stock: 10,
            track_inventory: true,
            barcode1: barcode1.into(),
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
        }
    }

    #[test]
    fn test_put_get_round_trip_product() {
        let conn = test_conn();
        let product = sample_product(10, 1);
        put_product(&conn, &product).unwrap();

        let loaded = get_product(&conn, ProductId::Confirmed(10))
            .unwrap()
            .unwrap();
        assert_eq!(loaded, product);
        assert!(get_product(&conn, ProductId::Confirmed(11))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_find_by_barcode_matches_any_scan_code() {
        let conn = test_conn();
        put_product(&conn, &sample_product(10, 1)).unwrap();

        let by_barcode = find_by_barcode(&conn, 1, "bc-10").unwrap();
        assert!(by_barcode.is_some());
        let by_sku = find_by_barcode(&conn, 1, "SKU-10").unwrap();
        assert!(by_sku.is_some());
        // Wrong shop
        assert!(find_by_barcode(&conn, 2, "BC-10").unwrap().is_none());
    }

    #[test]
    fn test_stock_sale_clamps_at_zero_and_respects_tracking() {
        let conn = test_conn();
        let mut tracked = sample_product(10, 1);
        tracked.stock = 3;
        put_product(&conn, &tracked).unwrap();

        let mut untracked = sample_product(11, 1);
        untracked.track_inventory = false;
        untracked.stock = 3;
        put_product(&conn, &untracked).unwrap();

        apply_stock_sale(&conn, ProductId::Confirmed(10), 5).unwrap();
        apply_stock_sale(&conn, ProductId::Confirmed(11), 5).unwrap();

        let tracked = get_product(&conn, ProductId::Confirmed(10))
            .unwrap()
            .unwrap();
        let untracked = get_product(&conn, ProductId::Confirmed(11))
            .unwrap()
            .unwrap();
        assert_eq!(tracked.stock, 0);
        assert_eq!(untracked.stock, 3);
    }

    #[test]
    fn test_validate_barcodes_detects_intra_product_duplicates() {
        let conn = test_conn();
        let msg = validate_barcodes(&conn, 1, Some("123"), Some("123"), None, None)
            .unwrap()
            .unwrap();
        assert!(msg.contains("Barcode 1 and Barcode 2"));
    }

    #[test]
    fn test_validate_barcodes_against_cache_and_pending_creations() {
        let conn = test_conn();
        put_product(&conn, &sample_product(10, 1)).unwrap();

        // Conflicts with a cached product's barcode (case-insensitive)
        let msg = validate_barcodes(&conn, 1, Some("bc-10"), None, None, None).unwrap();
        assert!(msg.is_some());
        // Conflicts with a cached product's SKU
        let msg = validate_barcodes(&conn, 1, Some("sku-10"), None, None, None).unwrap();
        assert!(msg.is_some());
        // Editing the product itself is allowed to keep its own codes
        let msg = validate_barcodes(
            &conn,
            1,
            Some("BC-10"),
            None,
            None,
            Some(ProductId::Confirmed(10)),
        )
        .unwrap();
        assert!(msg.is_none());
        // Different shop does not conflict
        let msg = validate_barcodes(&conn, 2, Some("BC-10"), None, None, None).unwrap();
        assert!(msg.is_none());

        // Pending creation holds the code too
        let creation = OfflineProductCreation {
            creation_id: "OFFPROD-1".into(),
            temp_product_id: ProductId::Pending(-1),
            shop_id: 1,
            draft: sample_draft("Rice 1kg", "12345"),
            created_at: Utc::now(),
            synced: false,
            sync_error: None,
        };
        put_offline_creation(&conn, &creation).unwrap();
        let msg = validate_barcodes(&conn, 1, Some("12345"), None, None, None).unwrap();
        assert!(msg.is_some());
        // The creation's own product may keep its code
        let msg = validate_barcodes(
            &conn,
            1,
            Some("12345"),
            None,
            None,
            Some(ProductId::Pending(-1)),
        )
        .unwrap();
        assert!(msg.is_none());
    }

    #[test]
    fn test_replace_all_products_records_sync_meta_atomically() {
        let conn = &mut test_conn();
        put_product(conn, &sample_product(10, 1)).unwrap();
        put_product(conn, &sample_product(99, 2)).unwrap();

        let fresh = vec![sample_product(20, 1), sample_product(21, 1)];
        replace_all_products(conn, &fresh, 1).unwrap();

        let shop1 = get_products(conn, 1).unwrap();
        assert_eq!(shop1.len(), 2);
        assert!(get_product(conn, ProductId::Confirmed(10))
            .unwrap()
            .is_none());
        // Other shop untouched
        assert!(get_product(conn, ProductId::Confirmed(99))
            .unwrap()
            .is_some());

        let meta = get_sync_meta(conn, &products_sync_key(1)).unwrap().unwrap();
        assert_eq!(meta.count, 2);
        assert!(products_sync_time(conn, 1).unwrap().is_some());
        assert!(products_sync_time(conn, 2).unwrap().is_none());
    }

    #[test]
    fn test_temp_id_allocator_is_monotonic_and_persisted() {
        let conn = test_conn();
        let first = next_temp_product_id(&conn).unwrap();
        let second = next_temp_product_id(&conn).unwrap();
        assert_eq!(first, -1);
        assert_eq!(second, -2);
        assert_eq!(
            setting_get(&conn, "products", "temp_id_floor").as_deref(),
            Some("-2")
        );
    }

    #[test]
    fn test_offline_order_number_format_and_sequence() {
        let conn = test_conn();
        let first = next_offline_order_number(&conn).unwrap();
        let second = next_offline_order_number(&conn).unwrap();
        let prefix = chrono::Local::now().format("%d%m").to_string();
        assert_eq!(first, format!("POS-{prefix}-001"));
        assert_eq!(second, format!("POS-{prefix}-002"));
    }

    #[test]
    fn test_offline_order_round_trip_and_pending_count() {
        let conn = test_conn();
        let order = OfflineOrder {
            order_id: "POS-0101-001".into(),
            shop_id: 1,
            items: vec![OrderItem {
                product_id: ProductId::Confirmed(10),
                quantity: 2,
                unit_price: 10.0,
                product_name: "Product 10".into(),
            }],
            payment_method: "cash".into(),
            customer_name: None,
            customer_phone: None,
            notes: None,
            subtotal: 20.0,
            tax_amount: 0.0,
            total_amount: 20.0,
            created_at: Utc::now(),
            synced: false,
        };
        put_offline_order(&conn, &order).unwrap();

        let pending = pending_orders(&conn).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].items[0].quantity, 2);
        assert_eq!(count_pending(&conn, PendingQueue::Orders).unwrap(), 1);

        mark_order_synced(&conn, "POS-0101-001").unwrap();
        assert_eq!(count_pending(&conn, PendingQueue::Orders).unwrap(), 0);
        delete_offline_order(&conn, "POS-0101-001").unwrap();
        assert!(pending_orders(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_remap_product_id_rewrites_cache_and_edit_references() {
        let conn = &mut test_conn();
        put_product(conn, &sample_product(-5, 1)).unwrap();
        let edit = OfflineEdit {
            edit_id: "EDIT-1".into(),
            product_id: ProductId::Pending(-5),
            shop_id: 1,
            changes: ProductChanges {
                price: Some(99.0),
                ..ProductChanges::default()
            },
            previous_values: ProductChanges::default(),
            created_at: Utc::now(),
            synced: false,
            sync_error: None,
        };
        put_offline_edit(conn, &edit).unwrap();

        remap_product_id(conn, ProductId::Pending(-5), 700).unwrap();

        assert!(get_product(conn, ProductId::Pending(-5)).unwrap().is_none());
        assert!(get_product(conn, ProductId::Confirmed(700))
            .unwrap()
            .is_some());
        let edits = pending_edits(conn).unwrap();
        assert_eq!(edits[0].product_id, ProductId::Confirmed(700));
    }

    #[test]
    fn test_remap_prefers_server_copy_when_real_id_already_cached() {
        let conn = &mut test_conn();
        put_product(conn, &sample_product(-5, 1)).unwrap();
        let mut server_copy = sample_product(700, 1);
        server_copy.sku = "SKU-server".into();
        server_copy.barcode1 = Some("BC-server".into());
        put_product(conn, &server_copy).unwrap();

        remap_product_id(conn, ProductId::Pending(-5), 700).unwrap();

        assert!(get_product(conn, ProductId::Pending(-5)).unwrap().is_none());
        let kept = get_product(conn, ProductId::Confirmed(700))
            .unwrap()
            .unwrap();
        assert_eq!(kept.sku, "SKU-server");
    }

    #[test]
    fn test_image_cache_round_trip() {
        let conn = test_conn();
        let entry = ImageCacheEntry {
            url: "https://cdn.example/p.png".into(),
            content_type: "image/png".into(),
            bytes: vec![0xFF, 0xD8, 0xFF],
            cached_at: Utc::now(),
        };
        put_image(&conn, &entry).unwrap();

        let loaded = get_image(&conn, "https://cdn.example/p.png")
            .unwrap()
            .unwrap();
        assert_eq!(loaded.bytes, entry.bytes);
        assert_eq!(loaded.content_type, "image/png");
        assert!(get_image(&conn, "https://cdn.example/missing.png")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_search_products_matches_name_and_codes() {
        let conn = test_conn();
        put_product(&conn, &sample_product(10, 1)).unwrap();
        put_product(&conn, &sample_product(11, 1)).unwrap();

        assert_eq!(search_products(&conn, 1, "product").unwrap().len(), 2);
        assert_eq!(search_products(&conn, 1, "BC-11").unwrap().len(), 1);
        assert!(search_products(&conn, 1, "nothing").unwrap().is_empty());
    }
}

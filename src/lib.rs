//! Offline-first point-of-sale synchronization engine.
//!
//! Keeps a shop terminal fully operational without a network connection:
//! sales, product edits, and product creations are applied to a durable
//! local SQLite store immediately, queued, and reconciled with the server
//! once connectivity returns. Reconciliation runs the queues in a fixed
//! order (orders, edits, creations, then a staleness-gated catalog
//! refresh), remaps client-generated temporary product identifiers to their
//! server-assigned ones, and surfaces progress through a watchable status
//! stream.
//!
//! Typical wiring:
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use nammaooru_pos_sync::{db, ApiClient, NetworkMonitor, SyncEngine};
//!
//! # async fn wire() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(db::init(Path::new("/var/lib/pos"))?);
//! let api = Arc::new(ApiClient::new("https://shop.example.com", "token")?);
//! let network = Arc::new(NetworkMonitor::new(true));
//! let engine = SyncEngine::new(store, api, network, 1)?;
//! engine.clone().start();
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod db;
pub mod error;
pub mod logging;
pub mod models;
pub mod network;
pub mod preload;
pub mod sync;

pub use api::{normalize_base_url, ApiClient, PosApi};
pub use error::{ApiError, StoreError, SyncError};
pub use models::{
    CachedProduct, CreationResult, EditResult, NewOrder, OfflineEdit, OfflineOrder,
    OfflineProductCreation, OrderItem, OrderResult, ProductChanges, ProductDraft, ProductId,
    StageReport, SyncOutcome, SyncReport, SyncStatus,
};
pub use network::NetworkMonitor;
pub use preload::preload_products;
pub use sync::SyncEngine;

//! Sync orchestrator.
//!
//! Owns the optimistic local mutations (orders, product edits, product
//! creations) and the reconciliation pass that drains the offline queues
//! once connectivity returns. Queues are drained in a fixed order: orders,
//! then edits, then creations, then an optional catalog refresh. Each queue
//! item succeeds or fails independently so one rejected record never blocks
//! the rest.

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::PosApi;
use crate::db::{self, DbState, PendingQueue};
use crate::error::{ApiError, SyncError};
use crate::models::{
    CreationResult, EditResult, NewOrder, OfflineEdit, OfflineOrder, OfflineProductCreation,
    OrderResult, OrderSubmission, ProductChanges, ProductDraft, ProductId, StageReport,
    SyncReport, SyncStatus,
};
use crate::network::NetworkMonitor;
use crate::preload;

/// Catalog cache age beyond which a reconnect triggers a refresh.
const CATALOG_STALE_SECS: i64 = 3600;

/// Queue record id: `{prefix}-{millis}-{suffix}`.
fn queue_id(prefix: &str) -> String {
    let millis = Utc::now().timestamp_millis();
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{prefix}-{millis}-{}", &suffix[..9])
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct SyncEngine {
    db: Arc<DbState>,
    api: Arc<dyn PosApi>,
    network: Arc<NetworkMonitor>,
    shop_id: i64,
    syncing: AtomicBool,
    status_tx: tokio::sync::watch::Sender<SyncStatus>,
}

impl SyncEngine {
    pub fn new(
        db: Arc<DbState>,
        api: Arc<dyn PosApi>,
        network: Arc<NetworkMonitor>,
        shop_id: i64,
    ) -> Result<Arc<Self>, SyncError> {
        let initial = {
            let conn = db.lock()?;
            SyncStatus {
                online: network.is_online(),
                syncing: false,
                pending_orders: db::count_pending(&conn, PendingQueue::Orders)?,
                pending_edits: db::count_pending(&conn, PendingQueue::Edits)?,
                pending_creations: db::count_pending(&conn, PendingQueue::Creations)?,
                last_product_sync: db::products_sync_time(&conn, shop_id)?,
            }
        };
        let (status_tx, _) = tokio::sync::watch::channel(initial);

        Ok(Arc::new(SyncEngine {
            db,
            api,
            network,
            shop_id,
            syncing: AtomicBool::new(false),
            status_tx,
        }))
    }

    /// Status change stream for badges and indicators.
    pub fn status(&self) -> tokio::sync::watch::Receiver<SyncStatus> {
        self.status_tx.subscribe()
    }

    /// Recompute pending counts from the store and publish a status snapshot.
    fn publish_status(&self) {
        let snapshot = (|| -> Result<SyncStatus, SyncError> {
            let conn = self.db.lock()?;
            Ok(SyncStatus {
                online: self.network.is_online(),
                syncing: self.syncing.load(Ordering::SeqCst),
                pending_orders: db::count_pending(&conn, PendingQueue::Orders)?,
                pending_edits: db::count_pending(&conn, PendingQueue::Edits)?,
                pending_creations: db::count_pending(&conn, PendingQueue::Creations)?,
                last_product_sync: db::products_sync_time(&conn, self.shop_id)?,
            })
        })();
        match snapshot {
            Ok(status) => {
                self.status_tx.send_replace(status);
            }
            Err(e) => warn!("Failed to refresh sync status: {e}"),
        }
    }

    // -----------------------------------------------------------------------
    // Orders
    // -----------------------------------------------------------------------

    /// Record a sale. Submits immediately when online; any submission failure
    /// or offline state falls back to the local queue with a client-generated
    /// order number. Stock decrements are applied locally exactly once on
    /// either path. This operation never fails due to connectivity.
    pub async fn create_order(&self, order: NewOrder) -> Result<OrderResult, SyncError> {
        if self.network.is_online() {
            let submission = OrderSubmission {
                shop_id: self.shop_id,
                items: order.items.clone(),
                payment_method: order.payment_method.clone(),
                customer_name: order.customer_name.clone(),
                customer_phone: order.customer_phone.clone(),
                notes: order.notes.clone(),
                offline_order_id: None,
            };
            match self.api.submit_order(&submission).await {
                Ok(server_order) => {
                    {
                        let conn = self.db.lock()?;
                        for item in &order.items {
                            db::apply_stock_sale(&conn, item.product_id, item.quantity)?;
                        }
                    }
                    let order_number = server_order
                        .get("orderNumber")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string();
                    self.publish_status();
                    return Ok(OrderResult {
                        offline: false,
                        order_number,
                        order: server_order,
                    });
                }
                Err(e) => {
                    warn!("Order submission failed ({e}), saving offline");
                }
            }
        }

        let offline_order = {
            let conn = self.db.lock()?;
            let order_number = db::next_offline_order_number(&conn)?;
            let record = OfflineOrder {
                order_id: order_number,
                shop_id: self.shop_id,
                items: order.items.clone(),
                payment_method: order.payment_method,
                customer_name: order.customer_name,
                customer_phone: order.customer_phone,
                notes: order.notes,
                subtotal: order.subtotal,
                tax_amount: order.tax_amount,
                total_amount: order.total_amount,
                created_at: Utc::now(),
                synced: false,
            };
            db::put_offline_order(&conn, &record)?;
            for item in &record.items {
                db::apply_stock_sale(&conn, item.product_id, item.quantity)?;
            }
            record
        };

        info!(order_id = %offline_order.order_id, "Order saved offline");
        self.publish_status();
        let order_number = offline_order.order_id.clone();
        let order_json = serde_json::to_value(&offline_order).unwrap_or(Value::Null);
        Ok(OrderResult {
            offline: true,
            order_number,
            order: order_json,
        })
    }

    // -----------------------------------------------------------------------
    // Product edits
    // -----------------------------------------------------------------------

    /// Apply a product edit. Barcode conflicts are rejected up front and
    /// never queued. Edits to a pending (not yet created) product always take
    /// the offline path. Otherwise the edit is pushed immediately when
    /// online; a server content rejection propagates, while a connectivity
    /// failure falls back to the queue. The local cache is always updated.
    pub async fn save_edit(
        &self,
        product_id: ProductId,
        changes: ProductChanges,
    ) -> Result<EditResult, SyncError> {
        if changes.is_empty() {
            return Ok(EditResult { offline: false });
        }

        let (product, previous_values) = {
            let conn = self.db.lock()?;
            let product = db::get_product(&conn, product_id)?
                .ok_or(SyncError::ProductNotFound(product_id.raw()))?;

            let touches_barcodes = changes.barcode1.is_some()
                || changes.barcode2.is_some()
                || changes.barcode3.is_some();
            if touches_barcodes {
                let b1 = changes.barcode1.clone().or_else(|| product.barcode1.clone());
                let b2 = changes.barcode2.clone().or_else(|| product.barcode2.clone());
                let b3 = changes.barcode3.clone().or_else(|| product.barcode3.clone());
                if let Some(conflict) = db::validate_barcodes(
                    &conn,
                    self.shop_id,
                    b1.as_deref(),
                    b2.as_deref(),
                    b3.as_deref(),
                    Some(product_id),
                )? {
                    return Err(SyncError::DuplicateBarcode(conflict));
                }
            }

            let previous = changes.previous_values_of(&product);
            (product, previous)
        };

        let try_online = !product_id.is_pending() && self.network.is_online();
        if try_online {
            match self.push_edit_remote(product_id.raw(), &changes).await {
                Ok(()) => {
                    let conn = self.db.lock()?;
                    db::apply_changes_to_product(&conn, product_id, &changes)?;
                    drop(conn);
                    self.publish_status();
                    return Ok(EditResult { offline: false });
                }
                Err(e) if e.is_validation() => {
                    return Err(SyncError::Validation(e.to_string()));
                }
                Err(e) => {
                    warn!(product_id = product_id.raw(), "Edit push failed ({e}), saving offline");
                }
            }
        }

        {
            let conn = self.db.lock()?;
            let edit = OfflineEdit {
                edit_id: queue_id("EDIT"),
                product_id,
                shop_id: product.shop_id,
                changes: changes.clone(),
                previous_values,
                created_at: Utc::now(),
                synced: false,
                sync_error: None,
            };
            db::put_offline_edit(&conn, &edit)?;
            db::apply_changes_to_product(&conn, product_id, &changes)?;
        }

        debug!(product_id = product_id.raw(), "Edit saved offline");
        self.publish_status();
        Ok(EditResult { offline: true })
    }

    /// Translate one change set into the availability and quick-update calls.
    async fn push_edit_remote(
        &self,
        product_id: i64,
        changes: &ProductChanges,
    ) -> Result<(), ApiError> {
        if let Some(available) = changes.is_available {
            self.api.toggle_availability(product_id, available).await?;
        }
        if changes.has_quick_update_fields() {
            self.api
                .quick_update(product_id, &changes.without_availability())
                .await?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Product creations
    // -----------------------------------------------------------------------

    /// Create a product. Always local-first: validate barcodes, allocate a
    /// temporary identifier, persist the creation record, and materialise
    /// the product in the cache so it is immediately sellable. When online,
    /// a reconciliation pass is attempted right away on a best-effort basis.
    pub async fn create_product(&self, draft: ProductDraft) -> Result<CreationResult, SyncError> {
        let (creation_id, temp_id) = {
            let conn = self.db.lock()?;
            if let Some(conflict) = db::validate_barcodes(
                &conn,
                self.shop_id,
                Some(&draft.barcode1),
                draft.barcode2.as_deref(),
                draft.barcode3.as_deref(),
                None,
            )? {
                return Err(SyncError::DuplicateBarcode(conflict));
            }

            let temp_id = ProductId::from_raw(db::next_temp_product_id(&conn)?);
            let creation = OfflineProductCreation {
                creation_id: queue_id("OFFPROD"),
                temp_product_id: temp_id,
                shop_id: self.shop_id,
                draft: draft.clone(),
                created_at: Utc::now(),
                synced: false,
                sync_error: None,
            };
            db::put_offline_creation(&conn, &creation)?;
            db::put_product(&conn, &draft.to_cached_product(temp_id, self.shop_id))?;
            (creation.creation_id, temp_id)
        };

        info!(temp_id = temp_id.raw(), "Product created locally");
        self.publish_status();

        if self.network.is_online() {
            if let Err(e) = self.reconcile(false).await {
                warn!("Post-create reconcile failed: {e}");
            }
        }

        Ok(CreationResult {
            creation_id,
            product_id: temp_id,
        })
    }

    // -----------------------------------------------------------------------
    // Reconciliation
    // -----------------------------------------------------------------------

    /// Drain the offline queues against the server. At most one pass runs at
    /// a time; a second trigger (or an offline trigger) gets a report marked
    /// skipped. Stage order is fixed: orders, edits, creations, then an
    /// optional staleness-gated catalog refresh.
    pub async fn reconcile(&self, refresh_catalog: bool) -> Result<SyncReport, SyncError> {
        if !self.network.is_online() {
            debug!("Reconcile requested while offline, skipping");
            return Ok(SyncReport::skipped());
        }
        if self
            .syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Reconcile already running, skipping");
            return Ok(SyncReport::skipped());
        }

        self.publish_status();
        let result = self.reconcile_inner(refresh_catalog).await;
        self.syncing.store(false, Ordering::SeqCst);
        self.publish_status();

        if let Ok(report) = &result {
            info!(
                synced = report.total_synced(),
                failed = report.total_failed(),
                catalog_refreshed = report.catalog_refreshed,
                "Reconcile pass finished"
            );
        }
        result
    }

    async fn reconcile_inner(&self, refresh_catalog: bool) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::default();

        report.orders = self.sync_pending_orders().await?;
        self.publish_status();

        report.edits = self.sync_pending_edits().await?;
        self.publish_status();

        report.creations = self.sync_pending_creations().await?;
        self.publish_status();

        if refresh_catalog && self.catalog_is_stale()? {
            match preload::preload_products(&self.db, self.api.as_ref(), self.shop_id).await {
                Ok(count) => {
                    debug!(count, "Catalog refreshed after reconcile");
                    report.catalog_refreshed = true;
                }
                Err(e) => warn!("Catalog refresh failed: {e}"),
            }
        }

        Ok(report)
    }

    /// Stage 1: submit queued orders, oldest first.
    async fn sync_pending_orders(&self) -> Result<StageReport, SyncError> {
        let pending = {
            let conn = self.db.lock()?;
            db::pending_orders(&conn)?
        };
        let mut stage = StageReport::default();

        for order in pending {
            let submission = OrderSubmission {
                shop_id: order.shop_id,
                items: order.items.clone(),
                payment_method: order.payment_method.clone(),
                customer_name: order.customer_name.clone(),
                customer_phone: order.customer_phone.clone(),
                notes: order.notes.clone(),
                offline_order_id: Some(order.order_id.clone()),
            };
            match self.api.submit_order(&submission).await {
                Ok(_) => {
                    let conn = self.db.lock()?;
                    db::delete_offline_order(&conn, &order.order_id)?;
                    stage.synced += 1;
                    debug!(order_id = %order.order_id, "Offline order synced");
                }
                Err(e) => {
                    stage.failed += 1;
                    warn!(order_id = %order.order_id, "Order sync failed: {e}");
                }
            }
        }
        Ok(stage)
    }

    /// Stage 2: push queued edits, oldest first. Edits that target a still
    /// pending product are folded into its creation draft and removed; they
    /// are never sent over the wire.
    async fn sync_pending_edits(&self) -> Result<StageReport, SyncError> {
        let pending = {
            let conn = self.db.lock()?;
            db::pending_edits(&conn)?
        };
        let mut stage = StageReport::default();

        for edit in pending {
            if edit.product_id.is_pending() {
                let conn = self.db.lock()?;
                match db::find_creation_by_temp_id(&conn, edit.product_id)? {
                    Some(mut creation) => {
                        creation.draft.apply_changes(&edit.changes);
                        db::update_creation_draft(&conn, &creation.creation_id, &creation.draft)?;
                        db::delete_offline_edit(&conn, &edit.edit_id)?;
                        stage.synced += 1;
                        debug!(
                            edit_id = %edit.edit_id,
                            temp_id = edit.product_id.raw(),
                            "Edit merged into pending creation"
                        );
                    }
                    None => {
                        // Without its creation record the edit can never be
                        // delivered; keeping it would pend forever.
                        warn!(
                            edit_id = %edit.edit_id,
                            temp_id = edit.product_id.raw(),
                            "Dropping edit for missing pending creation"
                        );
                        db::delete_offline_edit(&conn, &edit.edit_id)?;
                        stage.failed += 1;
                    }
                }
                continue;
            }

            match self.push_edit_remote(edit.product_id.raw(), &edit.changes).await {
                Ok(()) => {
                    let conn = self.db.lock()?;
                    db::delete_offline_edit(&conn, &edit.edit_id)?;
                    stage.synced += 1;
                    debug!(edit_id = %edit.edit_id, "Offline edit synced");
                }
                Err(e) => {
                    let conn = self.db.lock()?;
                    db::set_edit_error(&conn, &edit.edit_id, &e.to_string())?;
                    stage.failed += 1;
                    warn!(edit_id = %edit.edit_id, "Edit sync failed: {e}");
                }
            }
        }
        Ok(stage)
    }

    /// Stage 3: create queued products, oldest first, current shop only. On
    /// success the temporary identifier is rewritten to the server-assigned
    /// one everywhere it appears.
    async fn sync_pending_creations(&self) -> Result<StageReport, SyncError> {
        let pending = {
            let conn = self.db.lock()?;
            db::pending_creations_for_shop(&conn, self.shop_id)?
        };
        let mut stage = StageReport::default();

        for creation in pending {
            match self.api.create_product(self.shop_id, &creation.draft).await {
                Ok(created) => {
                    let mut conn = self.db.lock()?;
                    db::remap_product_id(&mut conn, creation.temp_product_id, created.id)?;
                    db::delete_offline_creation(&conn, &creation.creation_id)?;
                    stage.synced += 1;
                    info!(
                        creation_id = %creation.creation_id,
                        temp_id = creation.temp_product_id.raw(),
                        real_id = created.id,
                        "Offline creation synced"
                    );
                }
                Err(e) => {
                    let conn = self.db.lock()?;
                    db::set_creation_error(&conn, &creation.creation_id, &e.to_string())?;
                    stage.failed += 1;
                    warn!(creation_id = %creation.creation_id, "Creation sync failed: {e}");
                }
            }
        }
        Ok(stage)
    }

    fn catalog_is_stale(&self) -> Result<bool, SyncError> {
        let conn = self.db.lock()?;
        let last = db::products_sync_time(&conn, self.shop_id)?;
        Ok(match last {
            Some(ts) => Utc::now() - ts > ChronoDuration::seconds(CATALOG_STALE_SECS),
            None => true,
        })
    }

    /// Manual sync trigger. Always asks for a catalog refresh; the staleness
    /// gate still applies.
    pub async fn force_sync(&self) -> Result<SyncReport, SyncError> {
        self.reconcile(true).await
    }

    /// Replace the local catalog from the server regardless of staleness.
    pub async fn refresh_product_cache(&self) -> Result<usize, SyncError> {
        let count = preload::preload_products(&self.db, self.api.as_ref(), self.shop_id).await?;
        self.publish_status();
        Ok(count)
    }

    /// Spawn the background task that watches the network monitor. The
    /// offline-to-online transition is the only automatic reconciliation
    /// trigger; every settled change republishes the status snapshot.
    pub fn start(self: Arc<Self>) {
        let engine = self;
        tokio::spawn(async move {
            let mut stream = engine.network.subscribe();
            let mut was_online = *stream.borrow();

            while stream.changed().await.is_ok() {
                let online = *stream.borrow();
                engine.publish_status();

                if online && !was_online {
                    info!("Connectivity restored, starting reconcile");
                    if let Err(e) = engine.reconcile(true).await {
                        warn!("Reconnect reconcile failed: {e}");
                    }
                }
                was_online = online;
            }
        });
    }
}

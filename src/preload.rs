//! Catalog preload.
//!
//! Pages through the bulk product endpoint and swaps the full snapshot into
//! the local cache in one transaction. Run once after login so scan-to-sell
//! works before any sync cycle, and again by the orchestrator when the cache
//! goes stale.

use tracing::info;

use crate::api::PosApi;
use crate::db::{self, DbState};
use crate::error::SyncError;
use crate::models::CachedProduct;

/// Page size for the bulk fetch.
const PRELOAD_PAGE_SIZE: u32 = 500;

/// Fetch the shop's full catalog and replace the local product cache.
/// Returns the number of products cached.
pub async fn preload_products(
    db: &DbState,
    api: &dyn PosApi,
    shop_id: i64,
) -> Result<usize, SyncError> {
    let mut products: Vec<CachedProduct> = Vec::new();
    let mut page = 0u32;

    loop {
        let fetched = api
            .fetch_products_page(shop_id, page, PRELOAD_PAGE_SIZE)
            .await?;
        let done = fetched.last || fetched.products.is_empty();
        products.extend(fetched.products);
        if done {
            break;
        }
        page += 1;
    }

    let count = products.len();
    {
        let mut conn = db.lock()?;
        db::replace_all_products(&mut conn, &products, shop_id)?;
    }

    info!(shop_id, count, "Catalog preload complete");
    Ok(count)
}

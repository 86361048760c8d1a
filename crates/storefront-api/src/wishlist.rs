//! Wishlist collection: optimistic adds and removals.

use serde_json::json;
use tokio::sync::watch;

use storefront_app_state::{KeyedItem, OptimisticStore, Reconciliation, StoreError};
use storefront_client_core::{ApiError, ApiRequest, SessionCoordinator};

use crate::dto::{ProductSummary, WishlistEntry, decode};
use crate::paths;

#[derive(Clone)]
pub struct WishlistStore {
    store: OptimisticStore<WishlistEntry>,
    coordinator: SessionCoordinator,
}

impl WishlistStore {
    pub(crate) fn new(coordinator: SessionCoordinator) -> Self {
        Self {
            store: OptimisticStore::new(),
            coordinator,
        }
    }

    #[must_use]
    pub fn watch(&self) -> watch::Receiver<Vec<WishlistEntry>> {
        self.store.watch()
    }

    pub async fn entries(&self) -> Vec<WishlistEntry> {
        self.store.items().await
    }

    pub async fn load(&self) -> Result<(), ApiError> {
        let response = self
            .coordinator
            .call(ApiRequest::get(paths::WISHLISTS))
            .await?;
        let entries: Vec<WishlistEntry> = decode(response.body)?;
        self.store.replace_all(entries).await;
        Ok(())
    }

    pub async fn add(&self, product: ProductSummary) -> Result<(), StoreError> {
        let product_id = product.id;
        let request = ApiRequest::post(paths::WISHLISTS_ADD, json!({"product_id": product_id}));
        let coordinator = self.coordinator.clone();
        self.store
            .mutate(
                product_id,
                move |entries| {
                    if !entries.iter().any(|entry| entry.key() == product_id) {
                        entries.push(WishlistEntry {
                            id: None,
                            product,
                            created: None,
                            updated: None,
                        });
                    }
                },
                async move {
                    coordinator.call(request).await?;
                    Ok(Reconciliation::LocalIsFinal)
                },
            )
            .await
    }

    pub async fn remove(&self, product_id: u64) -> Result<(), StoreError> {
        let request = ApiRequest::delete(paths::wishlist_item_delete(product_id));
        let coordinator = self.coordinator.clone();
        self.store
            .mutate(
                product_id,
                move |entries| entries.retain(|entry| entry.key() != product_id),
                async move {
                    coordinator.call(request).await?;
                    Ok(Reconciliation::LocalIsFinal)
                },
            )
            .await
    }

    pub(crate) async fn discard(&self) {
        self.store.clear().await;
    }
}

//! Cart collection: optimistic adds, removals, and debounced quantity edits.

use std::collections::HashMap;

use serde_json::json;
use tokio::sync::watch;

use storefront_app_state::{
    DebounceBuffer, KeyedItem, OptimisticStore, Reconciliation, StoreError,
};
use storefront_client_core::{ApiError, ApiRequest, ClientConfig, SessionCoordinator};

use crate::dto::{CartLine, ProductSummary, decode};
use crate::paths;

#[derive(Clone)]
pub struct CartStore {
    store: OptimisticStore<CartLine>,
    coordinator: SessionCoordinator,
    quantities: DebounceBuffer<u64>,
}

impl CartStore {
    pub(crate) fn new(coordinator: SessionCoordinator, config: &ClientConfig) -> Self {
        let store = OptimisticStore::new();
        let quantities = DebounceBuffer::new(config.debounce_window, config.quantity_bounds.clone(), {
            let store = store.clone();
            let coordinator = coordinator.clone();
            Box::new(move |product_id: u64, quantity: u32| {
                let store = store.clone();
                let coordinator = coordinator.clone();
                Box::pin(
                    async move { commit_quantity(&store, &coordinator, product_id, quantity).await },
                )
            })
        });
        Self {
            store,
            coordinator,
            quantities,
        }
    }

    #[must_use]
    pub fn watch(&self) -> watch::Receiver<Vec<CartLine>> {
        self.store.watch()
    }

    pub async fn lines(&self) -> Vec<CartLine> {
        self.store.items().await
    }

    /// Pending (not yet committed) quantity edits, keyed by product id.
    #[must_use]
    pub fn quantity_overlay(&self) -> watch::Receiver<HashMap<u64, u32>> {
        self.quantities.overlay()
    }

    /// The quantity the UI should show for a line: a pending debounced edit
    /// if there is one, otherwise the collection's value.
    pub async fn displayed_quantity(&self, product_id: u64) -> Option<u32> {
        if let Some(pending) = self.quantities.pending_value(&product_id) {
            return Some(pending);
        }
        self.store
            .get(&product_id)
            .await
            .map(|line| line.quantity)
    }

    /// Replace the cart with the server's snapshot.
    pub async fn load(&self) -> Result<(), ApiError> {
        let response = self.coordinator.call(ApiRequest::get(paths::CARTS)).await?;
        let lines: Vec<CartLine> = decode(response.body)?;
        self.store.replace_all(lines).await;
        Ok(())
    }

    /// Upsert a line at `quantity`, mirroring the server's add semantics.
    pub async fn add(&self, product: ProductSummary, quantity: u32) -> Result<(), StoreError> {
        let product_id = product.id;
        let request = ApiRequest::post(
            paths::CARTS_ADD,
            json!({"product_id": product_id, "quantity": quantity}),
        );
        let coordinator = self.coordinator.clone();
        self.store
            .mutate(
                product_id,
                move |lines| match lines.iter_mut().find(|line| line.key() == product_id) {
                    Some(line) => line.quantity = quantity,
                    None => lines.push(CartLine {
                        id: None,
                        product,
                        quantity,
                    }),
                },
                async move {
                    coordinator.call(request).await?;
                    Ok(Reconciliation::LocalIsFinal)
                },
            )
            .await
    }

    /// Commit a quantity change immediately (no debounce).
    pub async fn set_quantity(&self, product_id: u64, quantity: u32) -> Result<(), StoreError> {
        commit_quantity(&self.store, &self.coordinator, product_id, quantity).await
    }

    /// Record a quantity edit; the display updates now, the commit fires
    /// after the quiet window with the last value seen.
    pub fn edit_quantity(&self, product_id: u64, quantity: u32) {
        self.quantities.edit(product_id, quantity);
    }

    pub async fn remove(&self, product_id: u64) -> Result<(), StoreError> {
        let request = ApiRequest::delete(paths::cart_item_delete(product_id));
        let coordinator = self.coordinator.clone();
        self.store
            .mutate(
                product_id,
                move |lines| lines.retain(|line| line.key() != product_id),
                async move {
                    coordinator.call(request).await?;
                    Ok(Reconciliation::LocalIsFinal)
                },
            )
            .await
    }

    /// Drop all client-held cart state (logout).
    pub(crate) async fn discard(&self) {
        self.quantities.clear();
        self.store.clear().await;
    }
}

/// The PATCH response carries the recomputed line; reconcile to it.
async fn commit_quantity(
    store: &OptimisticStore<CartLine>,
    coordinator: &SessionCoordinator,
    product_id: u64,
    quantity: u32,
) -> Result<(), StoreError> {
    let request = ApiRequest::patch(paths::cart_item(product_id), json!({"quantity": quantity}));
    let coordinator = coordinator.clone();
    store
        .mutate(
            product_id,
            move |lines| {
                if let Some(line) = lines.iter_mut().find(|line| line.key() == product_id) {
                    line.quantity = quantity;
                }
            },
            async move {
                let response = coordinator.call(request).await?;
                let line: CartLine = decode(response.body)?;
                Ok(Reconciliation::Item(line))
            },
        )
        .await
}

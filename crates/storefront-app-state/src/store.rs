//! Generic optimistic collection store: apply-now, confirm-or-rollback.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{Mutex, watch};

use storefront_client_core::ApiError;

/// An entry in a client-held collection, keyed by product identity. At most
/// one entry per key per collection.
pub trait KeyedItem: Clone + PartialEq + Send + Sync + 'static {
    type Key: Clone + Eq + Hash + Send + Sync + 'static;

    fn key(&self) -> Self::Key;
}

/// Authoritative state carried by a successful commit response.
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciliation<I: KeyedItem> {
    /// The server confirmed without returning state; the optimistic result
    /// stands.
    LocalIsFinal,
    /// The server recomputed the touched line; replace it.
    Item(I),
    /// The server returned the whole collection; replace it.
    Collection(Vec<I>),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The commit was rejected and the collection was rolled back to the
    /// pre-mutation snapshot.
    #[error("commit_rolled_back:{0}")]
    Commit(ApiError),
    /// The collection was cleared or reloaded while the commit was in
    /// flight; its resolution was discarded.
    #[error("stale_commit_discarded")]
    Stale,
}

struct StoreState<I: KeyedItem> {
    items: Vec<I>,
    /// Bumped on `clear` and `replace_all`. A commit that resolves under an
    /// older generation is discarded instead of applied.
    generation: u64,
}

struct StoreInner<I: KeyedItem> {
    state: Mutex<StoreState<I>>,
    tx: watch::Sender<Vec<I>>,
    /// One guard per key: concurrent mutations on the same key are
    /// serialized, cross-key mutations proceed independently.
    locks: Mutex<HashMap<I::Key, Arc<Mutex<()>>>>,
}

/// Holds a collection keyed by item identity; applies a local mutation
/// immediately, issues the matching network commit, and rolls back to the
/// pre-mutation snapshot if the commit fails. The store owns its collection:
/// all writes go through the methods below.
pub struct OptimisticStore<I: KeyedItem> {
    inner: Arc<StoreInner<I>>,
}

impl<I: KeyedItem> Clone for OptimisticStore<I> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<I: KeyedItem> Default for OptimisticStore<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: KeyedItem> OptimisticStore<I> {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Vec::new());
        Self {
            inner: Arc::new(StoreInner {
                state: Mutex::new(StoreState {
                    items: Vec::new(),
                    generation: 0,
                }),
                tx,
                locks: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Observe the collection. The receiver starts at the current value and
    /// sees every optimistic apply, reconciliation, and rollback.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<Vec<I>> {
        self.inner.tx.subscribe()
    }

    pub async fn items(&self) -> Vec<I> {
        self.inner.state.lock().await.items.clone()
    }

    pub async fn get(&self, key: &I::Key) -> Option<I> {
        self.inner
            .state
            .lock()
            .await
            .items
            .iter()
            .find(|item| item.key() == *key)
            .cloned()
    }

    /// Replace the collection with a server snapshot (non-optimistic). Any
    /// commit still in flight resolves as stale.
    pub async fn replace_all(&self, items: Vec<I>) {
        let mut state = self.inner.state.lock().await;
        state.items = items;
        state.generation += 1;
        self.inner.tx.send_replace(state.items.clone());
    }

    /// Empty the collection (logout). Any commit still in flight resolves
    /// as stale.
    pub async fn clear(&self) {
        self.replace_all(Vec::new()).await;
    }

    /// Apply `transform` locally right away, then confirm it with `commit`.
    ///
    /// On success the snapshot is dropped and any authoritative state from
    /// the response is reconciled in; on failure the collection is restored
    /// to the snapshot exactly. Mutations on the same key are serialized:
    /// the second waits for the first commit to resolve, so it never applies
    /// against a stale snapshot.
    pub async fn mutate<F, Fut>(
        &self,
        key: I::Key,
        transform: F,
        commit: Fut,
    ) -> Result<(), StoreError>
    where
        F: FnOnce(&mut Vec<I>),
        Fut: Future<Output = Result<Reconciliation<I>, ApiError>>,
    {
        let key_lock = {
            let mut locks = self.inner.locks.lock().await;
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        let _serialized = key_lock.lock().await;

        let (snapshot, generation) = {
            let mut state = self.inner.state.lock().await;
            let snapshot = state.items.clone();
            transform(&mut state.items);
            self.inner.tx.send_replace(state.items.clone());
            (snapshot, state.generation)
        };

        let outcome = commit.await;

        let mut state = self.inner.state.lock().await;
        if state.generation != generation {
            tracing::debug!("discarding commit that resolved against a replaced collection");
            return Err(StoreError::Stale);
        }
        match outcome {
            Ok(reconciliation) => {
                match reconciliation {
                    Reconciliation::LocalIsFinal => {}
                    Reconciliation::Item(item) => {
                        let incoming = item.key();
                        match state.items.iter_mut().find(|line| line.key() == incoming) {
                            Some(line) => *line = item,
                            None => state.items.push(item),
                        }
                    }
                    Reconciliation::Collection(items) => state.items = items,
                }
                self.inner.tx.send_replace(state.items.clone());
                Ok(())
            }
            Err(ApiError::Stale) => {
                // The session ended while the commit was in flight; restore
                // the snapshot and let the session watcher clear the store.
                state.items = snapshot;
                self.inner.tx.send_replace(state.items.clone());
                Err(StoreError::Stale)
            }
            Err(error) => {
                state.items = snapshot;
                self.inner.tx.send_replace(state.items.clone());
                Err(StoreError::Commit(error))
            }
        }
    }
}

//! Coalesces rapid repeated quantity edits into a single committed value.

use std::collections::HashMap;
use std::hash::Hash;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::store::StoreError;

/// The deferred commit a quiet window ends with. Failures are already
/// resolved by the store's rollback; the buffer only logs them.
pub type DebounceCommit<K> =
    dyn Fn(K, u32) -> BoxFuture<'static, Result<(), StoreError>> + Send + Sync;

/// One per edited line. A superseded value cancels and replaces the pending
/// timer; only the last value within the quiet window is committed.
struct PendingEdit {
    edit_id: u64,
    timer: JoinHandle<()>,
}

struct DebounceInner<K: Eq + Hash> {
    window: Duration,
    bounds: RangeInclusive<u32>,
    pending: Mutex<HashMap<K, PendingEdit>>,
    /// Display overlay: the value the UI shows for a line while its commit
    /// is pending. Removed once the commit resolves, at which point the
    /// collection itself (confirmed or rolled back) is authoritative.
    overlay_tx: watch::Sender<HashMap<K, u32>>,
    commit: Box<DebounceCommit<K>>,
    next_edit_id: AtomicU64,
}

/// Sits between rapid UI edits and the optimistic store's commit call.
/// `edit` updates the visible value immediately; the network commit is
/// issued only after a quiet window, carrying the last value seen.
pub struct DebounceBuffer<K: Clone + Eq + Hash + Send + Sync + 'static> {
    inner: Arc<DebounceInner<K>>,
}

impl<K: Clone + Eq + Hash + Send + Sync + 'static> Clone for DebounceBuffer<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: Clone + Eq + Hash + Send + Sync + 'static> DebounceBuffer<K> {
    pub fn new(
        window: Duration,
        bounds: RangeInclusive<u32>,
        commit: Box<DebounceCommit<K>>,
    ) -> Self {
        let (overlay_tx, _) = watch::channel(HashMap::new());
        Self {
            inner: Arc::new(DebounceInner {
                window,
                bounds,
                pending: Mutex::new(HashMap::new()),
                overlay_tx,
                commit,
                next_edit_id: AtomicU64::new(0),
            }),
        }
    }

    /// Observe the display overlay. A key present here overrides the
    /// collection's value for display purposes.
    #[must_use]
    pub fn overlay(&self) -> watch::Receiver<HashMap<K, u32>> {
        self.inner.overlay_tx.subscribe()
    }

    /// The pending display value for `key`, if an edit is awaiting commit.
    #[must_use]
    pub fn pending_value(&self, key: &K) -> Option<u32> {
        self.inner.overlay_tx.borrow().get(key).copied()
    }

    /// Record a new value for `key`. The display updates immediately; the
    /// commit fires once the quiet window elapses without another edit.
    /// Values are clamped to the configured bounds before entering the
    /// buffer.
    pub fn edit(&self, key: K, value: u32) {
        let value = value.clamp(*self.inner.bounds.start(), *self.inner.bounds.end());
        let edit_id = self.inner.next_edit_id.fetch_add(1, Ordering::Relaxed);

        self.inner.overlay_tx.send_modify(|overlay| {
            overlay.insert(key.clone(), value);
        });

        let timer = Self::spawn_timer(&self.inner, key.clone(), value, edit_id);
        let mut pending = lock_pending(&self.inner.pending);
        if let Some(previous) = pending.insert(key, PendingEdit { edit_id, timer }) {
            previous.timer.abort();
        }
    }

    /// Discard every pending edit without committing (logout). Commits
    /// already in flight resolve against the store's generation guard.
    pub fn clear(&self) {
        let mut pending = lock_pending(&self.inner.pending);
        for (_, edit) in pending.drain() {
            edit.timer.abort();
        }
        drop(pending);
        self.inner.overlay_tx.send_replace(HashMap::new());
    }

    fn spawn_timer(
        inner: &Arc<DebounceInner<K>>,
        key: K,
        value: u32,
        edit_id: u64,
    ) -> JoinHandle<()> {
        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            tokio::time::sleep(inner.window).await;

            // Claim the pending slot. A newer edit may have replaced this
            // one between wake-up and here; if so, the newer timer owns the
            // key and this value is superseded. Once the entry is removed,
            // nothing can abort the commit below mid-flight.
            let claimed = {
                let mut pending = lock_pending(&inner.pending);
                match pending.get(&key) {
                    Some(entry) if entry.edit_id == edit_id => {
                        pending.remove(&key);
                        true
                    }
                    _ => false,
                }
            };
            if !claimed {
                return;
            }

            if let Err(error) = (inner.commit)(key.clone(), value).await {
                tracing::debug!(error = %error, "debounced commit rejected");
            }

            // Drop the overlay entry unless a newer edit took the key over
            // while the commit was in flight.
            let pending = lock_pending(&inner.pending);
            if !pending.contains_key(&key) {
                inner.overlay_tx.send_modify(|overlay| {
                    overlay.remove(&key);
                });
            }
        })
    }
}

fn lock_pending<K: Eq + Hash>(
    pending: &Mutex<HashMap<K, PendingEdit>>,
) -> MutexGuard<'_, HashMap<K, PendingEdit>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

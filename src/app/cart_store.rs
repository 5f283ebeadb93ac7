use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;

use crate::app::kv_store::{self, KvStore, StoreKey};
use crate::app::model::CartEntry;
use crate::catalog::CatalogSnapshot;
use crate::formats::{Chapter, Price};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CartAddOutcome {
    Added,
    AlreadyOwned,
    AlreadyFree,
    AlreadyInCart,
}

/// Chapters waiting for checkout, in the order they were added.
pub struct CartStore {
    kv: Arc<dyn KvStore>,
    entries: Mutex<Vec<CartEntry>>,
}

impl CartStore {
    pub async fn load(kv: Arc<dyn KvStore>) -> Self {
        let mut entries: Vec<CartEntry> =
            kv_store::load_or_default(kv.as_ref(), StoreKey::Cart).await;
        let mut seen = BTreeSet::new();
        entries.retain(|e| seen.insert(e.chapter_id.clone()));
        tracing::debug!(entries = entries.len(), "loaded cart");
        Self {
            kv,
            entries: Mutex::new(entries),
        }
    }

    pub async fn add(&self, chapter: &Chapter, owned: &BTreeSet<String>) -> CartAddOutcome {
        if owned.contains(&chapter.id) {
            return CartAddOutcome::AlreadyOwned;
        }
        if chapter.is_free {
            return CartAddOutcome::AlreadyFree;
        }

        let mut entries = self.entries.lock().await;
        if entries.iter().any(|e| e.chapter_id == chapter.id) {
            return CartAddOutcome::AlreadyInCart;
        }
        entries.push(CartEntry {
            chapter_id: chapter.id.clone(),
            book_id: chapter.book_id.clone(),
            added_at: Utc::now(),
        });
        self.persist(&entries).await;
        CartAddOutcome::Added
    }

    pub async fn remove(&self, chapter_id: &str) -> bool {
        self.remove_many(&[chapter_id.to_owned()]).await > 0
    }

    pub async fn remove_many(&self, chapter_ids: &[String]) -> usize {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|e| !chapter_ids.contains(&e.chapter_id));
        let removed = before - entries.len();
        if removed > 0 {
            self.persist(&entries).await;
        }
        removed
    }

    pub async fn clear(&self) {
        let mut entries = self.entries.lock().await;
        if entries.is_empty() {
            return;
        }
        entries.clear();
        self.persist(&entries).await;
    }

    pub async fn is_in_cart(&self, chapter_id: &str) -> bool {
        self.entries
            .lock()
            .await
            .iter()
            .any(|e| e.chapter_id == chapter_id)
    }

    /// Raw entries, stale ones included.
    pub async fn entries(&self) -> Vec<CartEntry> {
        self.entries.lock().await.clone()
    }

    /// Entries whose chapter still exists, is paid and is not owned.
    /// Recomputed on every call so purchases made elsewhere drop out.
    pub async fn valid_items(
        &self,
        catalog: &CatalogSnapshot,
        owned: &BTreeSet<String>,
    ) -> Vec<Chapter> {
        self.entries
            .lock()
            .await
            .iter()
            .filter_map(|e| match catalog.chapter(&e.chapter_id) {
                Some(chapter) if !chapter.is_free && !owned.contains(&chapter.id) => {
                    Some(chapter.clone())
                }
                _ => {
                    tracing::debug!(chapter_id = %e.chapter_id, "skipping stale cart entry");
                    None
                }
            })
            .collect()
    }

    pub async fn total(&self, catalog: &CatalogSnapshot, owned: &BTreeSet<String>) -> Price {
        self.valid_items(catalog, owned)
            .await
            .iter()
            .map(Chapter::purchase_price)
            .sum()
    }

    async fn persist(&self, entries: &[CartEntry]) {
        if let Err(err) = kv_store::save(self.kv.as_ref(), StoreKey::Cart, &entries).await {
            tracing::warn!(?err, "persist cart failed; keeping in memory");
        }
    }
}

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::app::kv_store::{self, KvStore, StoreKey};

pub const RECENTLY_VIEWED_LIMIT: usize = 10;

/// Most-recent-first list of opened chapter ids.
pub struct RecentlyViewedStore {
    kv: Arc<dyn KvStore>,
    ids: Mutex<Vec<String>>,
}

impl RecentlyViewedStore {
    pub async fn load(kv: Arc<dyn KvStore>) -> Self {
        let mut ids: Vec<String> =
            kv_store::load_or_default(kv.as_ref(), StoreKey::RecentlyViewed).await;
        let mut deduped = Vec::with_capacity(ids.len());
        for id in ids.drain(..) {
            if !deduped.contains(&id) {
                deduped.push(id);
            }
        }
        deduped.truncate(RECENTLY_VIEWED_LIMIT);
        Self {
            kv,
            ids: Mutex::new(deduped),
        }
    }

    pub async fn record(&self, chapter_id: &str) {
        let mut ids = self.ids.lock().await;
        ids.retain(|id| id != chapter_id);
        ids.insert(0, chapter_id.to_owned());
        ids.truncate(RECENTLY_VIEWED_LIMIT);
        if let Err(err) =
            kv_store::save(self.kv.as_ref(), StoreKey::RecentlyViewed, &*ids).await
        {
            tracing::warn!(?err, "persist recently viewed failed; keeping in memory");
        }
    }

    pub async fn ids(&self) -> Vec<String> {
        self.ids.lock().await.clone()
    }
}

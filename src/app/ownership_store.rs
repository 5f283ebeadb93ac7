use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Context as _;
use tokio::sync::Mutex;

use crate::app::kv_store::{self, KvStore, StoreKey};
use crate::app::model::OwnershipRecord;

/// Append-only set of purchased chapter ids, cached in memory.
pub struct OwnershipStore {
    kv: Arc<dyn KvStore>,
    record: Mutex<OwnershipRecord>,
}

impl OwnershipStore {
    pub async fn load(kv: Arc<dyn KvStore>) -> Self {
        let record: OwnershipRecord =
            kv_store::load_or_default(kv.as_ref(), StoreKey::OwnedChapters).await;
        tracing::debug!(owned = record.chapter_ids.len(), "loaded ownership");
        Self {
            kv,
            record: Mutex::new(record),
        }
    }

    pub async fn owned_ids(&self) -> BTreeSet<String> {
        self.record.lock().await.chapter_ids.clone()
    }

    pub async fn is_owned(&self, chapter_id: &str) -> bool {
        self.record.lock().await.chapter_ids.contains(chapter_id)
    }

    /// Durably adds chapter ids. The cache only changes after the write succeeds.
    pub async fn add_all<I, S>(&self, chapter_ids: I) -> anyhow::Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut record = self.record.lock().await;
        let mut next = record.clone();
        let before = next.chapter_ids.len();
        next.chapter_ids
            .extend(chapter_ids.into_iter().map(Into::into));
        let added = next.chapter_ids.len() - before;
        if added == 0 {
            return Ok(0);
        }

        kv_store::save(self.kv.as_ref(), StoreKey::OwnedChapters, &next)
            .await
            .context("save ownership")?;
        *record = next;
        tracing::info!(added, owned = record.chapter_ids.len(), "ownership updated");
        Ok(added)
    }
}

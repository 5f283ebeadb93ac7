use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;

use crate::app::kv_store::{self, KvStore, StoreKey};
use crate::app::model::{BookProgress, ReadingProgressEntry};

pub const COMPLETE: u8 = 100;

/// Reading progress keyed by chapter id.
pub struct ProgressStore {
    kv: Arc<dyn KvStore>,
    entries: Mutex<BTreeMap<String, ReadingProgressEntry>>,
}

impl ProgressStore {
    pub async fn load(kv: Arc<dyn KvStore>) -> Self {
        let mut entries: BTreeMap<String, ReadingProgressEntry> =
            kv_store::load_or_default(kv.as_ref(), StoreKey::ReadingProgress).await;
        for entry in entries.values_mut() {
            entry.progress = entry.progress.min(COMPLETE);
            if entry.progress == COMPLETE {
                entry.completed = true;
            }
        }
        tracing::debug!(entries = entries.len(), "loaded reading progress");
        Self {
            kv,
            entries: Mutex::new(entries),
        }
    }

    pub async fn get(&self, chapter_id: &str) -> Option<ReadingProgressEntry> {
        self.entries.lock().await.get(chapter_id).cloned()
    }

    pub async fn entries(&self) -> Vec<ReadingProgressEntry> {
        self.entries.lock().await.values().cloned().collect()
    }

    /// Records that a chapter was opened without moving its progress.
    pub async fn touch(&self, book_id: &str, chapter_id: &str) -> ReadingProgressEntry {
        self.write(book_id, chapter_id, None).await
    }

    pub async fn upsert(
        &self,
        book_id: &str,
        chapter_id: &str,
        progress: u8,
    ) -> ReadingProgressEntry {
        self.write(book_id, chapter_id, Some(progress)).await
    }

    pub async fn mark_completed(&self, book_id: &str, chapter_id: &str) -> ReadingProgressEntry {
        self.write(book_id, chapter_id, Some(COMPLETE)).await
    }

    async fn write(
        &self,
        book_id: &str,
        chapter_id: &str,
        progress: Option<u8>,
    ) -> ReadingProgressEntry {
        let mut entries = self.entries.lock().await;
        let now = Utc::now();
        let entry = entries
            .entry(chapter_id.to_owned())
            .or_insert_with(|| ReadingProgressEntry {
                book_id: book_id.to_owned(),
                chapter_id: chapter_id.to_owned(),
                progress: 0,
                completed: false,
                last_read_at: now,
            });
        if let Some(progress) = progress {
            entry.progress = progress.min(COMPLETE);
        }
        if entry.progress == COMPLETE {
            entry.completed = true;
        }
        entry.last_read_at = now;
        let updated = entry.clone();

        if let Err(err) =
            kv_store::save(self.kv.as_ref(), StoreKey::ReadingProgress, &*entries).await
        {
            tracing::warn!(chapter_id, ?err, "persist reading progress failed; keeping in memory");
        }
        updated
    }

    pub async fn book_progress(&self, book_id: &str, chapter_ids: &[String]) -> BookProgress {
        let entries = self.entries.lock().await;
        let completed_chapters = chapter_ids
            .iter()
            .filter(|id| {
                entries
                    .get(id.as_str())
                    .is_some_and(|e| e.book_id == book_id && e.completed)
            })
            .count();
        BookProgress {
            completed_chapters,
            total_chapters: chapter_ids.len(),
        }
    }

    /// Most recently read chapter of a book, for "continue reading".
    pub async fn last_read_in_book(&self, book_id: &str) -> Option<ReadingProgressEntry> {
        self.entries
            .lock()
            .await
            .values()
            .filter(|e| e.book_id == book_id)
            .max_by_key(|e| e.last_read_at)
            .cloned()
    }
}

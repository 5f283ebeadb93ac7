use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::formats::Price;

/// Chapter ids the current user has purchased.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OwnershipRecord {
    pub chapter_ids: BTreeSet<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadingProgressEntry {
    pub book_id: String,
    pub chapter_id: String,
    /// Live position in whole percent; may go down on a re-read.
    pub progress: u8,
    /// Set the first time progress reaches 100 and never cleared.
    #[serde(default)]
    pub completed: bool,
    pub last_read_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CartEntry {
    pub chapter_id: String,
    pub book_id: String,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PurchaseReceipt {
    pub order_id: String,
    pub chapter_ids: Vec<String>,
    pub total: Price,
    pub payment_reference: String,
    pub purchased_at: DateTime<Utc>,
}

/// Completion summary of one book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookProgress {
    pub completed_chapters: usize,
    pub total_chapters: usize,
}

impl BookProgress {
    pub fn percent(&self) -> u8 {
        if self.total_chapters == 0 {
            return 0;
        }
        ((self.completed_chapters * 100) / self.total_chapters) as u8
    }
}

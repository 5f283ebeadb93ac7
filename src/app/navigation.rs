use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::access::{self, AccessDecision};
use crate::app::progress_store::{COMPLETE, ProgressStore};
use crate::formats::Chapter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavState {
    Reading(usize),
    LockedAt(usize),
}

impl NavState {
    pub fn index(self) -> usize {
        match self {
            Self::Reading(i) | Self::LockedAt(i) => i,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavOutcome {
    Moved {
        state: NavState,
        chapter_id: String,
    },
    Locked {
        index: usize,
        chapter_id: String,
        decision: AccessDecision,
    },
    /// Nothing to resume; the navigator is already reading.
    Stayed(NavState),
    AtStart,
    End,
}

/// Who is reading, as seen by the access evaluator.
#[derive(Debug, Clone, Copy)]
pub struct AccessContext<'a> {
    pub is_authenticated: bool,
    pub owned: &'a BTreeSet<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollMetrics {
    pub scroll_top: f64,
    pub scroll_height: f64,
    pub client_height: f64,
}

impl ScrollMetrics {
    /// Whole-percent position; a chapter that fits on screen counts as read.
    pub fn progress(&self) -> u8 {
        let range = self.scroll_height - self.client_height;
        if !range.is_finite() || range <= 0.0 {
            return COMPLETE;
        }
        let percent = (self.scroll_top / range * 100.0).clamp(0.0, 100.0);
        if percent.is_nan() {
            return 0;
        }
        percent.round() as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressDebounce {
    pub min_interval: Duration,
    pub min_delta: u8,
}

impl Default for ProgressDebounce {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(500),
            min_delta: 5,
        }
    }
}

#[derive(Debug, Default)]
struct ScrollTracker {
    last_written: Option<(u8, Instant)>,
    unsaved: Option<u8>,
}

/// Walks a book's chapters in sequence order, checking access on every advance.
pub struct ReadingNavigator {
    book_id: String,
    chapters: Vec<Chapter>,
    state: NavState,
    progress: Arc<ProgressStore>,
    debounce: ProgressDebounce,
    scroll: ScrollTracker,
}

impl ReadingNavigator {
    /// `chapters` must already be sorted by sequence.
    pub fn new(
        book_id: impl Into<String>,
        chapters: Vec<Chapter>,
        start_index: usize,
        progress: Arc<ProgressStore>,
        debounce: ProgressDebounce,
    ) -> anyhow::Result<Self> {
        let book_id = book_id.into();
        if start_index >= chapters.len() {
            anyhow::bail!(
                "chapter index {start_index} out of range for book {book_id} ({} chapters)",
                chapters.len()
            );
        }
        Ok(Self {
            book_id,
            chapters,
            state: NavState::Reading(start_index),
            progress,
            debounce,
            scroll: ScrollTracker::default(),
        })
    }

    pub fn book_id(&self) -> &str {
        &self.book_id
    }

    pub fn state(&self) -> NavState {
        self.state
    }

    /// Chapter at the current state's index (the locked one when locked).
    pub fn chapter(&self) -> &Chapter {
        &self.chapters[self.state.index()]
    }

    pub async fn previous(&mut self) -> NavOutcome {
        let target = match self.state {
            NavState::Reading(0) => return NavOutcome::AtStart,
            NavState::Reading(i) => i - 1,
            NavState::LockedAt(i) => i.saturating_sub(1),
        };
        self.flush_progress().await;
        self.enter(NavState::Reading(target))
    }

    pub async fn next(&mut self, ctx: AccessContext<'_>) -> NavOutcome {
        let target = match self.state {
            NavState::Reading(i) => i + 1,
            NavState::LockedAt(t) => t,
        };
        if target >= self.chapters.len() {
            return NavOutcome::End;
        }
        self.advance_to(target, ctx).await
    }

    /// Retries a locked advance after its gate resolved.
    pub async fn resume(&mut self, ctx: AccessContext<'_>) -> NavOutcome {
        match self.state {
            NavState::LockedAt(t) => self.advance_to(t, ctx).await,
            reading @ NavState::Reading(_) => NavOutcome::Stayed(reading),
        }
    }

    async fn advance_to(&mut self, target: usize, ctx: AccessContext<'_>) -> NavOutcome {
        let chapter = &self.chapters[target];
        let decision = access::evaluate(chapter, ctx.is_authenticated, ctx.owned);
        if !decision.is_allowed() {
            tracing::debug!(chapter_id = %chapter.id, ?decision, "navigation locked");
            self.state = NavState::LockedAt(target);
            return NavOutcome::Locked {
                index: target,
                chapter_id: chapter.id.clone(),
                decision,
            };
        }

        if target > 0 {
            self.scroll.unsaved = None;
            let finished = &self.chapters[target - 1];
            self.progress
                .mark_completed(&self.book_id, &finished.id)
                .await;
        }
        self.enter(NavState::Reading(target))
    }

    fn enter(&mut self, state: NavState) -> NavOutcome {
        self.state = state;
        self.scroll = ScrollTracker::default();
        NavOutcome::Moved {
            state,
            chapter_id: self.chapters[state.index()].id.clone(),
        }
    }

    /// Applies one scroll tick; returns the value written, if any.
    pub async fn record_scroll(&mut self, metrics: ScrollMetrics, now: Instant) -> Option<u8> {
        let NavState::Reading(index) = self.state else {
            return None;
        };
        let value = metrics.progress();
        let due = match self.scroll.last_written {
            None => true,
            Some((last, _)) if last == value => false,
            Some((last, _)) if value == COMPLETE && last != COMPLETE => true,
            Some((last, at)) => {
                now.duration_since(at) >= self.debounce.min_interval
                    && value.abs_diff(last) >= self.debounce.min_delta
            }
        };
        if !due {
            let changed = self.scroll.last_written.is_none_or(|(last, _)| last != value);
            self.scroll.unsaved = changed.then_some(value);
            return None;
        }

        let chapter_id = self.chapters[index].id.clone();
        self.progress.upsert(&self.book_id, &chapter_id, value).await;
        self.scroll.last_written = Some((value, now));
        self.scroll.unsaved = None;
        Some(value)
    }

    /// Writes the latest debounced scroll value, if one is pending.
    pub async fn flush_progress(&mut self) -> Option<u8> {
        let value = self.scroll.unsaved.take()?;
        let NavState::Reading(index) = self.state else {
            return None;
        };
        let chapter_id = self.chapters[index].id.clone();
        self.progress.upsert(&self.book_id, &chapter_id, value).await;
        self.scroll.last_written = Some((value, Instant::now()));
        Some(value)
    }
}

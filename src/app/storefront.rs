//! Session-level control flow: access gates, login replay, purchase resume
//! and chapter navigation over one reader's stores.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::Context as _;
use tokio_util::sync::CancellationToken;

use crate::access::{self, AccessDecision, GateAction};
use crate::app::cart_store::{CartAddOutcome, CartStore};
use crate::app::kv_store::KvStore;
use crate::app::model::{BookProgress, PurchaseReceipt, ReadingProgressEntry};
use crate::app::navigation::{
    AccessContext, NavOutcome, NavState, ProgressDebounce, ReadingNavigator, ScrollMetrics,
};
use crate::app::notify::{ItemType, Notification, Notifier};
use crate::app::ownership_store::OwnershipStore;
use crate::app::payment::PaymentGateway;
use crate::app::pending::{BoxFuture, Gate, PendingAction, PendingSlot};
use crate::app::progress_store::ProgressStore;
use crate::app::purchase::PurchaseOrchestrator;
use crate::app::recent_store::RecentlyViewedStore;
use crate::catalog::{CatalogProvider, CatalogSnapshot};
use crate::config::StorefrontConfig;
use crate::error::PurchaseError;
use crate::formats::{Book, Chapter, Price};

pub struct StorefrontDeps {
    pub catalog: Arc<dyn CatalogProvider>,
    pub kv: Arc<dyn KvStore>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub notifier: Arc<dyn Notifier>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Opened { chapter: Chapter },
    LoginRequired { action: GateAction },
    PurchaseRequired { chapter_id: String },
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CartOutcome {
    Added,
    AlreadyOwned,
    AlreadyFree,
    AlreadyInCart,
    LoginRequired,
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChapterBadge {
    Free,
    Owned,
    InCart,
    Locked,
}

#[derive(Debug, Clone)]
pub struct CartSummary {
    pub items: Vec<Chapter>,
    pub total: Price,
    /// Entries skipped because their chapter is now free, owned or gone.
    pub stale: usize,
}

#[derive(Debug, Clone)]
pub struct BookListing {
    pub book: Book,
    pub author: Option<String>,
    pub category: Option<String>,
    pub chapters: Vec<(Chapter, ChapterBadge)>,
    pub progress: BookProgress,
    pub continue_at: Option<String>,
}

/// A running purchase flow's cancel token, registered until dropped.
struct ActivePurchase {
    flows: Arc<Mutex<HashMap<u64, CancellationToken>>>,
    id: u64,
    token: CancellationToken,
}

impl Drop for ActivePurchase {
    fn drop(&mut self) {
        self.flows
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&self.id);
    }
}

pub struct Storefront {
    catalog: Arc<dyn CatalogProvider>,
    notifier: Arc<dyn Notifier>,
    user: Mutex<Option<String>>,
    ownership: Arc<OwnershipStore>,
    progress: Arc<ProgressStore>,
    cart: Arc<CartStore>,
    recent: RecentlyViewedStore,
    pending: Arc<PendingSlot>,
    purchases: PurchaseOrchestrator,
    reader: tokio::sync::Mutex<Option<ReadingNavigator>>,
    active_purchases: Arc<Mutex<HashMap<u64, CancellationToken>>>,
    next_purchase_id: AtomicU64,
    debounce: ProgressDebounce,
}

impl Storefront {
    /// Loads persisted state once and wires the session together.
    pub async fn open(deps: StorefrontDeps, config: &StorefrontConfig) -> Arc<Self> {
        let ownership = Arc::new(OwnershipStore::load(Arc::clone(&deps.kv)).await);
        let progress = Arc::new(ProgressStore::load(Arc::clone(&deps.kv)).await);
        let cart = Arc::new(CartStore::load(Arc::clone(&deps.kv)).await);
        let recent = RecentlyViewedStore::load(Arc::clone(&deps.kv)).await;
        let pending = Arc::new(PendingSlot::new());
        let purchases = PurchaseOrchestrator::new(
            deps.gateway,
            Arc::clone(&ownership),
            Arc::clone(&cart),
            Arc::clone(&pending),
            Arc::clone(&deps.notifier),
        )
        .with_timeout(config.purchase_timeout);

        Arc::new(Self {
            catalog: deps.catalog,
            notifier: deps.notifier,
            user: Mutex::new(None),
            ownership,
            progress,
            cart,
            recent,
            pending,
            purchases,
            reader: tokio::sync::Mutex::new(None),
            active_purchases: Arc::new(Mutex::new(HashMap::new())),
            next_purchase_id: AtomicU64::new(0),
            debounce: config.progress_debounce,
        })
    }

    pub fn user_id(&self) -> Option<String> {
        self.user.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_id().is_some()
    }

    pub fn pending_gate(&self) -> Option<Gate> {
        self.pending.gate()
    }

    async fn snapshot(&self) -> anyhow::Result<CatalogSnapshot> {
        CatalogSnapshot::fetch(self.catalog.as_ref())
            .await
            .context("fetch catalog")
    }

    fn suspend<F>(&self, gate: Gate, label: String, resume: F)
    where
        F: FnOnce() -> BoxFuture<'static, ()> + Send + 'static,
    {
        tracing::debug!(label = %label, ?gate, "suspending action");
        self.pending.set(PendingAction::new(gate, label, resume));
    }

    // --- login -------------------------------------------------------------

    /// Called by the login collaborator. Replays an action suspended on login;
    /// returns whether one ran.
    pub async fn login_succeeded(&self, user_id: &str) -> bool {
        *self.user.lock().unwrap_or_else(|p| p.into_inner()) = Some(user_id.to_owned());
        tracing::info!(user_id, "logged in");
        match self.pending.take_login() {
            Some(action) => {
                action.run().await;
                true
            }
            None => false,
        }
    }

    pub fn login_cancelled(&self) {
        if let Some(action) = self.pending.take_login() {
            tracing::debug!(label = action.label(), "login cancelled; dropping pending action");
        }
    }

    pub async fn logout(&self) {
        self.flush_progress().await;
        *self.reader.lock().await = None;
        self.pending.clear();
        self.abandon_purchase();
        *self.user.lock().unwrap_or_else(|p| p.into_inner()) = None;
        tracing::info!("logged out");
    }

    // --- reading -----------------------------------------------------------

    /// Opens a chapter if access allows it, otherwise suspends the open
    /// behind the matching gate.
    pub fn open_chapter(
        self: &Arc<Self>,
        chapter_id: &str,
    ) -> BoxFuture<'static, anyhow::Result<ReadOutcome>> {
        let this = Arc::clone(self);
        let chapter_id = chapter_id.to_owned();
        Box::pin(async move { this.open_chapter_now(chapter_id).await })
    }

    async fn open_chapter_now(self: Arc<Self>, chapter_id: String) -> anyhow::Result<ReadOutcome> {
        let snapshot = self.snapshot().await?;
        let Some(chapter) = snapshot.chapter(&chapter_id).cloned() else {
            tracing::error!(chapter_id, "chapter not found");
            return Ok(ReadOutcome::NotFound);
        };
        let owned = self.ownership.owned_ids().await;

        let replay = {
            let this = Arc::clone(&self);
            let chapter_id = chapter_id.clone();
            move || -> BoxFuture<'static, ()> {
                Box::pin(async move {
                    if let Err(err) = this.open_chapter(&chapter_id).await {
                        tracing::error!(chapter_id, ?err, "replayed open failed");
                    }
                })
            }
        };

        match access::evaluate(&chapter, self.is_authenticated(), &owned) {
            AccessDecision::Allow => {
                let chapters = snapshot.chapters_of(&chapter.book_id);
                let index = chapters
                    .iter()
                    .position(|c| c.id == chapter.id)
                    .with_context(|| format!("chapter {chapter_id} missing from its book"))?;
                let navigator = ReadingNavigator::new(
                    chapter.book_id.clone(),
                    chapters,
                    index,
                    Arc::clone(&self.progress),
                    self.debounce,
                )?;

                let mut reader = self.reader.lock().await;
                if let Some(previous) = reader.as_mut() {
                    previous.flush_progress().await;
                }
                *reader = Some(navigator);
                drop(reader);

                self.progress.touch(&chapter.book_id, &chapter.id).await;
                self.recent.record(&chapter.id).await;
                tracing::info!(chapter_id, book_id = %chapter.book_id, "chapter opened");
                Ok(ReadOutcome::Opened { chapter })
            }
            AccessDecision::RequireLogin { action } => {
                self.suspend(Gate::Login, format!("open {chapter_id}"), replay);
                self.notifier.notify(Notification::LoginRequired {
                    action,
                    item_type: ItemType::Chapter,
                });
                Ok(ReadOutcome::LoginRequired { action })
            }
            AccessDecision::RequirePurchase => {
                self.suspend(
                    Gate::Purchase {
                        chapter_id: chapter_id.clone(),
                    },
                    format!("open {chapter_id}"),
                    replay,
                );
                self.notifier.notify(Notification::PurchaseRequired {
                    chapter_id: chapter_id.clone(),
                });
                Ok(ReadOutcome::PurchaseRequired { chapter_id })
            }
        }
    }

    /// Book id, state and chapter id of the open navigator.
    pub async fn reading_position(&self) -> Option<(String, NavState, String)> {
        let reader = self.reader.lock().await;
        reader
            .as_ref()
            .map(|nav| (nav.book_id().to_owned(), nav.state(), nav.chapter().id.clone()))
    }

    pub async fn next_chapter(self: &Arc<Self>) -> anyhow::Result<NavOutcome> {
        let owned = self.ownership.owned_ids().await;
        let ctx = AccessContext {
            is_authenticated: self.is_authenticated(),
            owned: &owned,
        };
        let outcome = {
            let mut reader = self.reader.lock().await;
            let nav = reader.as_mut().context("no chapter is open")?;
            nav.next(ctx).await
        };
        self.after_navigation(&outcome).await;
        Ok(outcome)
    }

    pub async fn previous_chapter(self: &Arc<Self>) -> anyhow::Result<NavOutcome> {
        let outcome = {
            let mut reader = self.reader.lock().await;
            let nav = reader.as_mut().context("no chapter is open")?;
            nav.previous().await
        };
        self.after_navigation(&outcome).await;
        Ok(outcome)
    }

    /// Retries a navigation that stopped at a gate.
    pub fn resume_navigation(self: &Arc<Self>) -> BoxFuture<'static, anyhow::Result<NavOutcome>> {
        let this = Arc::clone(self);
        Box::pin(async move {
            let owned = this.ownership.owned_ids().await;
            let ctx = AccessContext {
                is_authenticated: this.is_authenticated(),
                owned: &owned,
            };
            let outcome = {
                let mut reader = this.reader.lock().await;
                let nav = reader.as_mut().context("no chapter is open")?;
                nav.resume(ctx).await
            };
            this.after_navigation(&outcome).await;
            Ok(outcome)
        })
    }

    async fn after_navigation(self: &Arc<Self>, outcome: &NavOutcome) {
        match outcome {
            NavOutcome::Moved { chapter_id, .. } => {
                if let Some((book_id, _, _)) = self.reading_position().await {
                    self.progress.touch(&book_id, chapter_id).await;
                }
                self.recent.record(chapter_id).await;
            }
            NavOutcome::Locked {
                chapter_id,
                decision,
                ..
            } => {
                let this = Arc::clone(self);
                let resume = move || -> BoxFuture<'static, ()> {
                    Box::pin(async move {
                        if let Err(err) = this.resume_navigation().await {
                            tracing::error!(?err, "resumed navigation failed");
                        }
                    })
                };
                let label = format!("next to {chapter_id}");
                match *decision {
                    AccessDecision::RequireLogin { action } => {
                        self.suspend(Gate::Login, label, resume);
                        self.notifier.notify(Notification::LoginRequired {
                            action,
                            item_type: ItemType::Chapter,
                        });
                    }
                    AccessDecision::RequirePurchase => {
                        self.suspend(
                            Gate::Purchase {
                                chapter_id: chapter_id.clone(),
                            },
                            label,
                            resume,
                        );
                        self.notifier.notify(Notification::PurchaseRequired {
                            chapter_id: chapter_id.clone(),
                        });
                    }
                    AccessDecision::Allow => {}
                }
            }
            NavOutcome::Stayed(_) | NavOutcome::AtStart | NavOutcome::End => {}
        }
    }

    /// Feeds one scroll tick of the open chapter.
    pub async fn record_scroll(&self, metrics: ScrollMetrics, now: Instant) -> Option<u8> {
        let mut reader = self.reader.lock().await;
        match reader.as_mut() {
            Some(nav) => nav.record_scroll(metrics, now).await,
            None => None,
        }
    }

    pub async fn flush_progress(&self) -> Option<u8> {
        let mut reader = self.reader.lock().await;
        match reader.as_mut() {
            Some(nav) => nav.flush_progress().await,
            None => None,
        }
    }

    // --- cart --------------------------------------------------------------

    pub fn add_to_cart(
        self: &Arc<Self>,
        chapter_id: &str,
    ) -> BoxFuture<'static, anyhow::Result<CartOutcome>> {
        let this = Arc::clone(self);
        let chapter_id = chapter_id.to_owned();
        Box::pin(async move { this.add_to_cart_now(chapter_id).await })
    }

    async fn add_to_cart_now(self: Arc<Self>, chapter_id: String) -> anyhow::Result<CartOutcome> {
        let snapshot = self.snapshot().await?;
        let Some(chapter) = snapshot.chapter(&chapter_id) else {
            tracing::error!(chapter_id, "cart add for unknown chapter");
            return Ok(CartOutcome::NotFound);
        };

        if !self.is_authenticated() {
            let this = Arc::clone(&self);
            let id = chapter_id.clone();
            let label = format!("add {chapter_id} to cart");
            self.suspend(Gate::Login, label, move || -> BoxFuture<'static, ()> {
                Box::pin(async move {
                    if let Err(err) = this.add_to_cart(&id).await {
                        tracing::error!(chapter_id = %id, ?err, "replayed cart add failed");
                    }
                })
            });
            self.notifier.notify(Notification::LoginRequired {
                action: GateAction::AddToCart,
                item_type: ItemType::Chapter,
            });
            return Ok(CartOutcome::LoginRequired);
        }

        let owned = self.ownership.owned_ids().await;
        let chapter_id = chapter.id.clone();
        let outcome = match self.cart.add(chapter, &owned).await {
            CartAddOutcome::Added => {
                self.notifier
                    .notify(Notification::CartAdded { chapter_id });
                CartOutcome::Added
            }
            CartAddOutcome::AlreadyOwned => {
                self.notifier
                    .notify(Notification::AlreadyOwned { chapter_id });
                CartOutcome::AlreadyOwned
            }
            CartAddOutcome::AlreadyFree => {
                self.notifier
                    .notify(Notification::AlreadyFree { chapter_id });
                CartOutcome::AlreadyFree
            }
            CartAddOutcome::AlreadyInCart => {
                self.notifier
                    .notify(Notification::AlreadyInCart { chapter_id });
                CartOutcome::AlreadyInCart
            }
        };
        Ok(outcome)
    }

    pub async fn remove_from_cart(&self, chapter_id: &str) -> bool {
        self.cart.remove(chapter_id).await
    }

    pub async fn clear_cart(&self) {
        self.cart.clear().await;
    }

    pub async fn cart_summary(&self) -> anyhow::Result<CartSummary> {
        let snapshot = self.snapshot().await?;
        let owned = self.ownership.owned_ids().await;
        let items = self.cart.valid_items(&snapshot, &owned).await;
        let stale = self.cart.entries().await.len().saturating_sub(items.len());
        let total = items.iter().map(Chapter::purchase_price).sum();
        Ok(CartSummary {
            items,
            total,
            stale,
        })
    }

    // --- purchases ---------------------------------------------------------

    pub fn checkout(
        self: &Arc<Self>,
    ) -> BoxFuture<'static, Result<PurchaseReceipt, PurchaseError>> {
        let this = Arc::clone(self);
        Box::pin(async move {
            let Some(user_id) = this.user_id() else {
                this.require_login(GateAction::Checkout, ItemType::Cart, "checkout", {
                    let this = Arc::clone(&this);
                    move || this.checkout()
                });
                return Err(PurchaseError::LoginRequired);
            };
            let snapshot = this
                .snapshot()
                .await
                .map_err(PurchaseError::CatalogUnavailable)?;

            let flow = this.begin_purchase();
            this.purchases
                .checkout(&user_id, &snapshot, &flow.token)
                .await
        })
    }

    pub fn buy_chapter(
        self: &Arc<Self>,
        chapter_id: &str,
    ) -> BoxFuture<'static, Result<PurchaseReceipt, PurchaseError>> {
        let this = Arc::clone(self);
        let chapter_id = chapter_id.to_owned();
        Box::pin(async move {
            let snapshot = this
                .snapshot()
                .await
                .map_err(PurchaseError::CatalogUnavailable)?;
            let Some(chapter) = snapshot.chapter(&chapter_id).cloned() else {
                tracing::error!(chapter_id, "purchase of unknown chapter");
                return Err(PurchaseError::NotFound(chapter_id));
            };
            let Some(user_id) = this.user_id() else {
                let label = format!("buy {chapter_id}");
                this.require_login(GateAction::Purchase, ItemType::Chapter, &label, {
                    let this = Arc::clone(&this);
                    move || this.buy_chapter(&chapter_id)
                });
                return Err(PurchaseError::LoginRequired);
            };

            let flow = this.begin_purchase();
            this.purchases
                .purchase_single(&user_id, &chapter, &flow.token)
                .await
        })
    }

    pub fn buy_book(
        self: &Arc<Self>,
        book_id: &str,
    ) -> BoxFuture<'static, Result<PurchaseReceipt, PurchaseError>> {
        let this = Arc::clone(self);
        let book_id = book_id.to_owned();
        Box::pin(async move {
            let snapshot = this
                .snapshot()
                .await
                .map_err(PurchaseError::CatalogUnavailable)?;
            let Some(book) = snapshot.book(&book_id).cloned() else {
                tracing::error!(book_id, "purchase of unknown book");
                return Err(PurchaseError::NotFound(book_id));
            };
            let Some(user_id) = this.user_id() else {
                let label = format!("buy book {book_id}");
                this.require_login(GateAction::Purchase, ItemType::Book, &label, {
                    let this = Arc::clone(&this);
                    move || this.buy_book(&book_id)
                });
                return Err(PurchaseError::LoginRequired);
            };

            let chapters = snapshot.chapters_of(&book.id);
            let flow = this.begin_purchase();
            this.purchases
                .purchase_book(&user_id, &book, &chapters, &flow.token)
                .await
        })
    }

    fn require_login<F>(&self, action: GateAction, item_type: ItemType, label: &str, replay: F)
    where
        F: FnOnce() -> BoxFuture<'static, Result<PurchaseReceipt, PurchaseError>> + Send + 'static,
    {
        let label = label.to_owned();
        let log_label = label.clone();
        self.suspend(Gate::Login, label, move || -> BoxFuture<'static, ()> {
            Box::pin(async move {
                if let Err(err) = replay().await {
                    tracing::warn!(label = %log_label, %err, "replayed purchase failed");
                }
            })
        });
        self.notifier
            .notify(Notification::LoginRequired { action, item_type });
    }

    /// Registers a purchase flow; the returned guard unregisters it on drop.
    fn begin_purchase(&self) -> ActivePurchase {
        let id = self.next_purchase_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        self.active_purchases
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(id, token.clone());
        ActivePurchase {
            flows: Arc::clone(&self.active_purchases),
            id,
            token,
        }
    }

    /// The user closed the purchase prompt: cancel every running payment and
    /// drop an action waiting on a purchase.
    pub fn abandon_purchase(&self) -> bool {
        let tokens: Vec<CancellationToken> = self
            .active_purchases
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .drain()
            .map(|(_, token)| token)
            .collect();
        for token in &tokens {
            token.cancel();
        }
        let cancelled = !tokens.is_empty();
        let dropped = matches!(self.pending.gate(), Some(Gate::Purchase { .. }))
            && self.pending.clear().is_some();
        cancelled || dropped
    }

    // --- library -----------------------------------------------------------

    pub async fn chapter_badge(&self, chapter: &Chapter) -> ChapterBadge {
        if chapter.is_free {
            ChapterBadge::Free
        } else if self.ownership.is_owned(&chapter.id).await {
            ChapterBadge::Owned
        } else if self.cart.is_in_cart(&chapter.id).await {
            ChapterBadge::InCart
        } else {
            ChapterBadge::Locked
        }
    }

    pub async fn book_listings(&self) -> anyhow::Result<Vec<BookListing>> {
        let snapshot = self.snapshot().await?;
        let mut listings = Vec::new();
        for book in snapshot.books() {
            let chapters = snapshot.chapters_of(&book.id);
            let mut badged = Vec::with_capacity(chapters.len());
            for chapter in chapters {
                let badge = self.chapter_badge(&chapter).await;
                badged.push((chapter, badge));
            }
            let ids: Vec<String> = badged.iter().map(|(c, _)| c.id.clone()).collect();
            listings.push(BookListing {
                book: book.clone(),
                author: snapshot.author(&book.author_id).map(|a| a.name.clone()),
                category: snapshot.category(&book.category_id).map(|c| c.name.clone()),
                chapters: badged,
                progress: self.progress.book_progress(&book.id, &ids).await,
                continue_at: self
                    .progress
                    .last_read_in_book(&book.id)
                    .await
                    .map(|e| e.chapter_id),
            });
        }
        Ok(listings)
    }

    pub async fn owned_chapter_ids(&self) -> Vec<String> {
        self.ownership.owned_ids().await.into_iter().collect()
    }

    pub async fn reading_progress(&self) -> Vec<ReadingProgressEntry> {
        self.progress.entries().await
    }

    pub async fn recently_viewed(&self) -> Vec<String> {
        self.recent.ids().await
    }
}

use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::app::cart_store::CartStore;
use crate::app::model::PurchaseReceipt;
use crate::app::notify::{Notification, Notifier};
use crate::app::ownership_store::OwnershipStore;
use crate::app::payment::{ChargeRequest, PaymentGateway};
use crate::app::pending::PendingSlot;
use crate::catalog::CatalogSnapshot;
use crate::error::PurchaseError;
use crate::formats::{Book, Chapter, Price, PricingType};

pub const DEFAULT_PURCHASE_TIMEOUT: Duration = Duration::from_secs(30);

/// Chapter ids with a purchase currently running.
#[derive(Debug, Default, Clone)]
struct InFlightChapters {
    ids: Arc<Mutex<HashSet<String>>>,
}

impl InFlightChapters {
    fn claim(&self, chapter_ids: &[String]) -> Result<InFlightGuard, PurchaseError> {
        let mut ids = self.ids.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(busy) = chapter_ids.iter().find(|id| ids.contains(*id)) {
            return Err(PurchaseError::AlreadyInFlight(busy.clone()));
        }
        ids.extend(chapter_ids.iter().cloned());
        Ok(InFlightGuard {
            ids: Arc::clone(&self.ids),
            claimed: chapter_ids.to_vec(),
        })
    }
}

/// Releases the claimed ids when the purchase finishes, fails or is dropped.
struct InFlightGuard {
    ids: Arc<Mutex<HashSet<String>>>,
    claimed: Vec<String>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut ids = self.ids.lock().unwrap_or_else(|p| p.into_inner());
        for id in &self.claimed {
            ids.remove(id);
        }
    }
}

pub struct PurchaseOrchestrator {
    gateway: Arc<dyn PaymentGateway>,
    ownership: Arc<OwnershipStore>,
    cart: Arc<CartStore>,
    pending: Arc<PendingSlot>,
    notifier: Arc<dyn Notifier>,
    in_flight: InFlightChapters,
    timeout: Duration,
}

impl PurchaseOrchestrator {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        ownership: Arc<OwnershipStore>,
        cart: Arc<CartStore>,
        pending: Arc<PendingSlot>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            gateway,
            ownership,
            cart,
            pending,
            notifier,
            in_flight: InFlightChapters::default(),
            timeout: DEFAULT_PURCHASE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn purchase_single(
        &self,
        user_id: &str,
        chapter: &Chapter,
        cancel: &CancellationToken,
    ) -> Result<PurchaseReceipt, PurchaseError> {
        if chapter.is_free {
            self.notifier.notify(Notification::AlreadyFree {
                chapter_id: chapter.id.clone(),
            });
            return Err(PurchaseError::NothingToPurchase);
        }
        if self.ownership.is_owned(&chapter.id).await {
            self.notifier.notify(Notification::AlreadyOwned {
                chapter_id: chapter.id.clone(),
            });
            return Err(PurchaseError::NothingToPurchase);
        }

        let result = self
            .settle(
                user_id,
                vec![chapter.id.clone()],
                chapter.purchase_price(),
                cancel,
            )
            .await;
        self.finish(result).await
    }

    /// All-or-nothing purchase of several chapters. Free, owned and repeated
    /// chapters are skipped; matching cart entries are removed on success.
    pub async fn purchase_batch(
        &self,
        user_id: &str,
        chapters: &[Chapter],
        cancel: &CancellationToken,
    ) -> Result<PurchaseReceipt, PurchaseError> {
        let owned = self.ownership.owned_ids().await;
        let payable = payable_chapters(chapters, &owned);
        if payable.is_empty() {
            return self.finish(Err(PurchaseError::NothingToPurchase)).await;
        }

        let amount: Price = payable.iter().map(|c| c.purchase_price()).sum();
        let ids: Vec<String> = payable.into_iter().map(|c| c.id.clone()).collect();
        let result = self.settle(user_id, ids, amount, cancel).await;
        self.finish(result).await
    }

    /// Buys every paid chapter of a book the user does not own yet.
    pub async fn purchase_book(
        &self,
        user_id: &str,
        book: &Book,
        chapters: &[Chapter],
        cancel: &CancellationToken,
    ) -> Result<PurchaseReceipt, PurchaseError> {
        let owned = self.ownership.owned_ids().await;
        let in_book: Vec<Chapter> = chapters
            .iter()
            .filter(|c| c.book_id == book.id)
            .cloned()
            .collect();
        let payable = payable_chapters(&in_book, &owned);
        if payable.is_empty() {
            return self.finish(Err(PurchaseError::NothingToPurchase)).await;
        }

        let amount: Price = match (book.pricing_type, book.book_price) {
            (PricingType::Book, Some(price)) => price,
            _ => payable.iter().map(|c| c.purchase_price()).sum(),
        };
        let ids: Vec<String> = payable.into_iter().map(|c| c.id.clone()).collect();
        let result = self.settle(user_id, ids, amount, cancel).await;
        self.finish(result).await
    }

    /// Buys the cart's valid items and empties the cart on success. On
    /// failure the cart is left as it was.
    pub async fn checkout(
        &self,
        user_id: &str,
        catalog: &CatalogSnapshot,
        cancel: &CancellationToken,
    ) -> Result<PurchaseReceipt, PurchaseError> {
        let owned = self.ownership.owned_ids().await;
        let items = self.cart.valid_items(catalog, &owned).await;
        tracing::info!(items = items.len(), "checkout");
        let receipt = self.purchase_batch(user_id, &items, cancel).await?;
        self.cart.clear().await;
        Ok(receipt)
    }

    async fn settle(
        &self,
        user_id: &str,
        chapter_ids: Vec<String>,
        amount: Price,
        cancel: &CancellationToken,
    ) -> Result<PurchaseReceipt, PurchaseError> {
        let _guard = self.in_flight.claim(&chapter_ids)?;

        // Another flow may have bought these between the caller's check and the claim.
        let owned = self.ownership.owned_ids().await;
        if let Some(chapter_id) = chapter_ids.iter().find(|id| owned.contains(*id)) {
            tracing::warn!(chapter_id = %chapter_id, "chapter already owned; not charging");
            return Err(PurchaseError::NothingToPurchase);
        }

        let request = ChargeRequest {
            order_id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_owned(),
            chapter_ids,
            amount,
        };
        tracing::info!(
            order_id = %request.order_id,
            chapters = ?request.chapter_ids,
            amount = %request.amount,
            "charging"
        );

        let confirmation = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!(order_id = %request.order_id, "purchase abandoned");
                return Err(PurchaseError::Cancelled);
            }
            charged = tokio::time::timeout(self.timeout, self.gateway.charge(&request)) => {
                match charged {
                    Err(_) => return Err(PurchaseError::TimedOut),
                    Ok(Err(declined)) => {
                        return Err(PurchaseError::PaymentFailed {
                            reason: declined.reason,
                            retryable: declined.retryable,
                        });
                    }
                    Ok(Ok(confirmation)) => confirmation,
                }
            }
        };

        // Past this point the user has paid; ownership must be recorded.
        if let Err(source) = self.ownership.add_all(request.chapter_ids.clone()).await {
            tracing::error!(
                order_id = %request.order_id,
                payment_reference = %confirmation.reference,
                chapters = ?request.chapter_ids,
                err = ?source,
                "payment captured but ownership write failed"
            );
            return Err(PurchaseError::OwnershipNotRecorded {
                payment_reference: confirmation.reference,
                source,
            });
        }
        self.cart.remove_many(&request.chapter_ids).await;

        Ok(PurchaseReceipt {
            order_id: request.order_id,
            chapter_ids: request.chapter_ids,
            total: confirmation.amount,
            payment_reference: confirmation.reference,
            purchased_at: Utc::now(),
        })
    }

    async fn finish(
        &self,
        result: Result<PurchaseReceipt, PurchaseError>,
    ) -> Result<PurchaseReceipt, PurchaseError> {
        match &result {
            Ok(receipt) => {
                tracing::info!(
                    order_id = %receipt.order_id,
                    total = %receipt.total,
                    "purchase succeeded"
                );
                for chapter_id in &receipt.chapter_ids {
                    self.notifier.notify(Notification::PurchaseSucceeded {
                        chapter_id: chapter_id.clone(),
                    });
                }
                if let Some(action) = self.pending.take_purchased(&receipt.chapter_ids) {
                    action.run().await;
                }
            }
            Err(err) => {
                tracing::warn!(%err, retryable = err.is_retryable(), "purchase failed");
                self.notifier.notify(Notification::PurchaseFailed {
                    reason: err.to_string(),
                });
            }
        }
        result
    }
}

fn payable_chapters<'a>(chapters: &'a [Chapter], owned: &BTreeSet<String>) -> Vec<&'a Chapter> {
    let mut seen = HashSet::new();
    chapters
        .iter()
        .filter(|c| !c.is_free && !owned.contains(&c.id))
        .filter(|c| seen.insert(c.id.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::app::kv_store::{InMemoryKvStore, KvStore};
    use crate::app::notify::CollectingNotifier;
    use crate::app::payment::{PaymentConfirmation, PaymentDeclined};
    use crate::app::pending::{Gate, PendingAction};

    #[derive(Default)]
    struct CountingGateway {
        charges: AtomicUsize,
        latency: Duration,
    }

    #[async_trait]
    impl PaymentGateway for CountingGateway {
        async fn charge(
            &self,
            request: &ChargeRequest,
        ) -> Result<PaymentConfirmation, PaymentDeclined> {
            self.charges.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.latency).await;
            Ok(PaymentConfirmation {
                reference: format!("ref-{}", request.order_id),
                amount: request.amount,
            })
        }
    }

    struct HangingGateway;

    #[async_trait]
    impl PaymentGateway for HangingGateway {
        async fn charge(
            &self,
            _request: &ChargeRequest,
        ) -> Result<PaymentConfirmation, PaymentDeclined> {
            std::future::pending().await
        }
    }

    fn paid(id: &str, cents: u64) -> Chapter {
        Chapter {
            id: id.to_owned(),
            book_id: "b1".to_owned(),
            sequence: 1,
            title: id.to_owned(),
            is_free: false,
            price: Some(Price::from_cents(cents)),
            content: Vec::new(),
        }
    }

    struct Fixture {
        orchestrator: PurchaseOrchestrator,
        ownership: Arc<OwnershipStore>,
        pending: Arc<PendingSlot>,
        notifier: Arc<CollectingNotifier>,
    }

    async fn fixture(gateway: Arc<dyn PaymentGateway>) -> Fixture {
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
        let ownership = Arc::new(OwnershipStore::load(Arc::clone(&kv)).await);
        let cart = Arc::new(CartStore::load(kv).await);
        let pending = Arc::new(PendingSlot::new());
        let notifier = Arc::new(CollectingNotifier::new());
        let orchestrator = PurchaseOrchestrator::new(
            gateway,
            Arc::clone(&ownership),
            cart,
            Arc::clone(&pending),
            notifier.clone(),
        );
        Fixture {
            orchestrator,
            ownership,
            pending,
            notifier,
        }
    }

    #[tokio::test]
    async fn single_purchase_records_ownership_and_resumes_pending() -> anyhow::Result<()> {
        let f = fixture(Arc::new(CountingGateway::default())).await;
        let resumed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&resumed);
        f.pending.set(PendingAction::new(
            Gate::Purchase {
                chapter_id: "c2".to_owned(),
            },
            "open c2",
            move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        ));

        let receipt = f
            .orchestrator
            .purchase_single("u1", &paid("c2", 299), &CancellationToken::new())
            .await?;
        assert_eq!(receipt.total, Price::from_cents(299));
        assert!(f.ownership.is_owned("c2").await);
        assert_eq!(resumed.load(Ordering::SeqCst), 1);
        assert!(f.notifier.take().contains(&Notification::PurchaseSucceeded {
            chapter_id: "c2".to_owned()
        }));
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_purchase_of_same_chapter_is_rejected() {
        let gateway = Arc::new(CountingGateway {
            charges: AtomicUsize::new(0),
            latency: Duration::from_millis(50),
        });
        let f = fixture(gateway.clone()).await;
        let chapter = paid("c2", 299);
        let cancel = CancellationToken::new();

        let (first, second) = tokio::join!(
            f.orchestrator.purchase_single("u1", &chapter, &cancel),
            f.orchestrator.purchase_single("u1", &chapter, &cancel),
        );
        assert!(first.is_ok());
        assert!(matches!(second, Err(PurchaseError::AlreadyInFlight(id)) if id == "c2"));
        assert_eq!(gateway.charges.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn settle_skips_charge_for_chapter_owned_after_check() -> anyhow::Result<()> {
        let gateway = Arc::new(CountingGateway::default());
        let f = fixture(gateway.clone()).await;
        f.ownership.add_all(["c2"]).await?;

        let err = f
            .orchestrator
            .settle(
                "u1",
                vec!["c1".to_owned(), "c2".to_owned()],
                Price::from_cents(598),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PurchaseError::NothingToPurchase));
        assert_eq!(gateway.charges.load(Ordering::SeqCst), 0);
        assert!(!f.ownership.is_owned("c1").await);

        let receipt = f
            .orchestrator
            .settle(
                "u1",
                vec!["c1".to_owned()],
                Price::from_cents(299),
                &CancellationToken::new(),
            )
            .await?;
        assert_eq!(receipt.chapter_ids, vec!["c1"]);
        Ok(())
    }

    #[tokio::test]
    async fn hanging_payment_times_out_without_ownership() {
        let f = fixture(Arc::new(HangingGateway)).await;
        let orchestrator = f.orchestrator.with_timeout(Duration::from_millis(20));
        let err = orchestrator
            .purchase_single("u1", &paid("c2", 299), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PurchaseError::TimedOut));
        assert!(!f.ownership.is_owned("c2").await);
    }

    #[tokio::test]
    async fn cancelled_purchase_changes_nothing() {
        let f = fixture(Arc::new(HangingGateway)).await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = f
            .orchestrator
            .purchase_single("u1", &paid("c2", 299), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, PurchaseError::Cancelled));
        assert!(!f.ownership.is_owned("c2").await);
        assert!(matches!(
            f.notifier.take().as_slice(),
            [Notification::PurchaseFailed { .. }]
        ));
    }

    #[tokio::test]
    async fn book_purchase_charges_book_price() -> anyhow::Result<()> {
        let f = fixture(Arc::new(CountingGateway::default())).await;
        let book = Book {
            id: "b1".to_owned(),
            title: "Bundle".to_owned(),
            pricing_type: PricingType::Book,
            book_price: Some(Price::from_cents(500)),
            author_id: "a1".to_owned(),
            category_id: "k1".to_owned(),
        };
        let receipt = f
            .orchestrator
            .purchase_book(
                "u1",
                &book,
                &[paid("c2", 299), paid("c3", 299)],
                &CancellationToken::new(),
            )
            .await?;
        assert_eq!(receipt.total, Price::from_cents(500));
        assert_eq!(f.ownership.owned_ids().await.len(), 2);
        Ok(())
    }

    #[test]
    fn payable_chapters_skips_free_owned_and_repeats() {
        let mut free = paid("c1", 0);
        free.is_free = true;
        let owned: BTreeSet<String> = ["c3".to_string()].into();
        let chapters = vec![free, paid("c2", 1), paid("c2", 1), paid("c3", 1)];
        let ids: Vec<_> = payable_chapters(&chapters, &owned)
            .into_iter()
            .map(|c| c.id.as_str())
            .collect();
        assert_eq!(ids, vec!["c2"]);
    }
}

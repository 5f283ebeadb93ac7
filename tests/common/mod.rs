#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use storyshelf::app::kv_store::{InMemoryKvStore, KvStore, StoreKey};
use storyshelf::app::notify::CollectingNotifier;
use storyshelf::app::payment::{PaymentGateway, PaymentMode, SimulatedPaymentGateway};
use storyshelf::app::storefront::{Storefront, StorefrontDeps};
use storyshelf::catalog::InMemoryCatalog;
use storyshelf::config::StorefrontConfig;
use storyshelf::formats::CatalogFile;

pub const CATALOG_YAML: &str = r#"
authors:
  - id: a1
    name: Mina Arai
categories:
  - id: k1
    name: Fantasy
books:
  - id: b1
    title: The Salt Road
    pricing_type: chapter
    author_id: a1
    category_id: k1
  - id: b2
    title: Lantern Season
    pricing_type: book
    book_price_cents: 500
    author_id: a1
    category_id: k1
chapters:
  - id: c1
    book_id: b1
    sequence: 1
    title: Departure
    is_free: true
    content:
      - type: heading
        text: Departure
      - type: paragraph
        text: The caravan left before dawn.
  - id: c2
    book_id: b1
    sequence: 2
    title: The Toll Gate
    price_cents: 299
  - id: c3
    book_id: b1
    sequence: 3
    title: Interlude
    is_free: true
  - id: d1
    book_id: b2
    sequence: 1
    title: First Light
    price_cents: 199
  - id: d2
    book_id: b2
    sequence: 2
    title: Ember
    price_cents: 199
"#;

pub fn catalog_file() -> CatalogFile {
    serde_yaml::from_str(CATALOG_YAML).expect("parse fixture catalog")
}

pub fn test_config() -> StorefrontConfig {
    StorefrontConfig {
        payment_latency: Duration::ZERO,
        ..StorefrontConfig::default()
    }
}

pub fn approving_gateway(latency: Duration) -> Arc<dyn PaymentGateway> {
    Arc::new(SimulatedPaymentGateway::new(PaymentMode::Approve, latency))
}

pub fn declining_gateway() -> Arc<dyn PaymentGateway> {
    Arc::new(SimulatedPaymentGateway::new(
        PaymentMode::Decline,
        Duration::ZERO,
    ))
}

pub async fn storefront_with(
    kv: Arc<dyn KvStore>,
    gateway: Arc<dyn PaymentGateway>,
) -> (Arc<Storefront>, Arc<CollectingNotifier>) {
    let notifier = Arc::new(CollectingNotifier::new());
    let deps = StorefrontDeps {
        catalog: Arc::new(InMemoryCatalog::new(catalog_file())),
        kv,
        gateway,
        notifier: notifier.clone(),
    };
    let storefront = Storefront::open(deps, &test_config()).await;
    (storefront, notifier)
}

pub async fn storefront() -> (Arc<Storefront>, Arc<CollectingNotifier>) {
    storefront_with(
        Arc::new(InMemoryKvStore::new()),
        approving_gateway(Duration::ZERO),
    )
    .await
}

/// Store whose writes fail for one key.
#[derive(Debug)]
pub struct FailingKvStore {
    inner: InMemoryKvStore,
    failing: StoreKey,
}

impl FailingKvStore {
    pub fn new(failing: StoreKey) -> Self {
        Self {
            inner: InMemoryKvStore::new(),
            failing,
        }
    }
}

#[async_trait]
impl KvStore for FailingKvStore {
    async fn get(&self, key: StoreKey) -> anyhow::Result<Option<Vec<u8>>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: StoreKey, value: &[u8]) -> anyhow::Result<()> {
        if key == self.failing {
            anyhow::bail!("disk full");
        }
        self.inner.set(key, value).await
    }
}

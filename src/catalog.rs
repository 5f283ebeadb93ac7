use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use async_trait::async_trait;
use tokio::fs;

use crate::formats::{Author, Book, CatalogFile, Category, Chapter, PricingType};

/// Read-only source of catalog records.
#[async_trait]
pub trait CatalogProvider: Send + Sync {
    async fn list_books(&self) -> anyhow::Result<Vec<Book>>;
    async fn list_chapters(&self) -> anyhow::Result<Vec<Chapter>>;
    async fn list_authors(&self) -> anyhow::Result<Vec<Author>>;
    async fn list_categories(&self) -> anyhow::Result<Vec<Category>>;
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    data: CatalogFile,
}

impl InMemoryCatalog {
    pub fn new(data: CatalogFile) -> Self {
        Self { data }
    }
}

#[async_trait]
impl CatalogProvider for InMemoryCatalog {
    async fn list_books(&self) -> anyhow::Result<Vec<Book>> {
        Ok(self.data.books.clone())
    }

    async fn list_chapters(&self) -> anyhow::Result<Vec<Chapter>> {
        Ok(self.data.chapters.clone())
    }

    async fn list_authors(&self) -> anyhow::Result<Vec<Author>> {
        Ok(self.data.authors.clone())
    }

    async fn list_categories(&self) -> anyhow::Result<Vec<Category>> {
        Ok(self.data.categories.clone())
    }
}

/// Catalog read from a YAML or JSON file on every call.
#[derive(Debug, Clone)]
pub struct LocalFsCatalog {
    path: PathBuf,
}

impl LocalFsCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn read(&self) -> anyhow::Result<CatalogFile> {
        let bytes = fs::read(&self.path)
            .await
            .with_context(|| format!("read catalog: {}", self.path.display()))?;
        parse_catalog(&self.path, &bytes)
            .with_context(|| format!("parse catalog: {}", self.path.display()))
    }
}

fn parse_catalog(path: &Path, bytes: &[u8]) -> anyhow::Result<CatalogFile> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => serde_yaml::from_slice(bytes).context("deserialize yaml"),
        _ => serde_json::from_slice(bytes).context("deserialize json"),
    }
}

#[async_trait]
impl CatalogProvider for LocalFsCatalog {
    async fn list_books(&self) -> anyhow::Result<Vec<Book>> {
        Ok(self.read().await?.books)
    }

    async fn list_chapters(&self) -> anyhow::Result<Vec<Chapter>> {
        Ok(self.read().await?.chapters)
    }

    async fn list_authors(&self) -> anyhow::Result<Vec<Author>> {
        Ok(self.read().await?.authors)
    }

    async fn list_categories(&self) -> anyhow::Result<Vec<Category>> {
        Ok(self.read().await?.categories)
    }
}

/// Indexed view of the catalog, valid for the duration of one user action.
#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    books: HashMap<String, Book>,
    book_order: Vec<String>,
    chapters: HashMap<String, Chapter>,
    chapters_by_book: HashMap<String, Vec<String>>,
    authors: HashMap<String, Author>,
    categories: HashMap<String, Category>,
}

impl CatalogSnapshot {
    pub async fn fetch(provider: &dyn CatalogProvider) -> anyhow::Result<Self> {
        let books = provider.list_books().await.context("list books")?;
        let chapters = provider.list_chapters().await.context("list chapters")?;
        let authors = provider.list_authors().await.context("list authors")?;
        let categories = provider
            .list_categories()
            .await
            .context("list categories")?;

        Ok(Self::from_records(CatalogFile {
            books,
            chapters,
            authors,
            categories,
        }))
    }

    /// Builds the snapshot, dropping records that break catalog invariants.
    pub fn from_records(data: CatalogFile) -> Self {
        let mut snapshot = Self::default();

        for book in data.books {
            if book.pricing_type == PricingType::Book && book.book_price.is_none() {
                tracing::warn!(book_id = %book.id, "skipping book priced per book without book_price");
                continue;
            }
            snapshot.book_order.push(book.id.clone());
            snapshot.books.insert(book.id.clone(), book);
        }

        let mut seen_ids: HashSet<String> = HashSet::new();
        let mut seen_sequences: HashSet<(String, u32)> = HashSet::new();
        let mut chapters = data.chapters;
        chapters.sort_by(|a, b| (&a.book_id, a.sequence).cmp(&(&b.book_id, b.sequence)));
        for chapter in chapters {
            if !chapter.is_free && chapter.price.is_none() {
                tracing::warn!(chapter_id = %chapter.id, "skipping paid chapter without price");
                continue;
            }
            if chapter.sequence == 0 {
                tracing::warn!(chapter_id = %chapter.id, "skipping chapter with sequence 0");
                continue;
            }
            if seen_ids.contains(&chapter.id) {
                tracing::warn!(
                    chapter_id = %chapter.id,
                    book_id = %chapter.book_id,
                    "skipping chapter with duplicate id"
                );
                continue;
            }
            if !seen_sequences.insert((chapter.book_id.clone(), chapter.sequence)) {
                tracing::warn!(
                    chapter_id = %chapter.id,
                    book_id = %chapter.book_id,
                    sequence = chapter.sequence,
                    "skipping chapter with duplicate sequence"
                );
                continue;
            }
            seen_ids.insert(chapter.id.clone());
            snapshot
                .chapters_by_book
                .entry(chapter.book_id.clone())
                .or_default()
                .push(chapter.id.clone());
            snapshot.chapters.insert(chapter.id.clone(), chapter);
        }

        snapshot.authors = data
            .authors
            .into_iter()
            .map(|a| (a.id.clone(), a))
            .collect();
        snapshot.categories = data
            .categories
            .into_iter()
            .map(|c| (c.id.clone(), c))
            .collect();

        snapshot
    }

    pub fn book(&self, book_id: &str) -> Option<&Book> {
        self.books.get(book_id)
    }

    pub fn chapter(&self, chapter_id: &str) -> Option<&Chapter> {
        self.chapters.get(chapter_id)
    }

    pub fn author(&self, author_id: &str) -> Option<&Author> {
        self.authors.get(author_id)
    }

    pub fn category(&self, category_id: &str) -> Option<&Category> {
        self.categories.get(category_id)
    }

    /// Books in catalog order.
    pub fn books(&self) -> impl Iterator<Item = &Book> {
        self.book_order.iter().filter_map(|id| self.books.get(id))
    }

    /// Chapters of a book ordered by sequence.
    pub fn chapters_of(&self, book_id: &str) -> Vec<Chapter> {
        self.chapters_by_book
            .get(book_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.chapters.get(id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::Price;

    fn chapter(id: &str, book_id: &str, sequence: u32, price: Option<u64>) -> Chapter {
        Chapter {
            id: id.to_owned(),
            book_id: book_id.to_owned(),
            sequence,
            title: id.to_owned(),
            is_free: price.is_none(),
            price: price.map(Price::from_cents),
            content: Vec::new(),
        }
    }

    #[test]
    fn chapters_are_ordered_by_sequence() {
        let snapshot = CatalogSnapshot::from_records(CatalogFile {
            chapters: vec![
                chapter("c3", "b1", 3, None),
                chapter("c1", "b1", 1, None),
                chapter("c2", "b1", 2, Some(199)),
            ],
            ..CatalogFile::default()
        });
        let ids: Vec<_> = snapshot
            .chapters_of("b1")
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec!["c1", "c2", "c3"]);
    }

    #[test]
    fn invalid_records_are_dropped() {
        let mut unpriced = chapter("c2", "b1", 2, Some(1));
        unpriced.price = None;
        let snapshot = CatalogSnapshot::from_records(CatalogFile {
            books: vec![Book {
                id: "b2".to_owned(),
                title: "Bundle".to_owned(),
                pricing_type: PricingType::Book,
                book_price: None,
                author_id: "a1".to_owned(),
                category_id: "k1".to_owned(),
            }],
            chapters: vec![
                chapter("c1", "b1", 1, None),
                unpriced,
                chapter("dup", "b1", 1, None),
            ],
            ..CatalogFile::default()
        });
        assert!(snapshot.book("b2").is_none());
        assert!(snapshot.chapter("c2").is_none());
        assert!(snapshot.chapter("dup").is_none());
        assert!(snapshot.chapter("c1").is_some());
    }

    #[test]
    fn duplicate_chapter_id_keeps_first_in_book_order() {
        let snapshot = CatalogSnapshot::from_records(CatalogFile {
            chapters: vec![chapter("x", "b2", 1, None), chapter("x", "b1", 1, None)],
            ..CatalogFile::default()
        });
        let b1: Vec<_> = snapshot.chapters_of("b1");
        assert_eq!(b1.len(), 1);
        assert_eq!(b1[0].book_id, "b1");
        assert!(snapshot.chapters_of("b2").is_empty());
        assert_eq!(snapshot.chapter("x").map(|c| c.book_id.as_str()), Some("b1"));
    }

    #[test]
    fn parse_catalog_picks_format_by_extension() -> anyhow::Result<()> {
        let yaml = b"books: []\nchapters:\n  - id: c1\n    book_id: b1\n    sequence: 1\n    title: One\n    is_free: true\n";
        let parsed = parse_catalog(Path::new("catalog.yaml"), yaml)?;
        assert_eq!(parsed.chapters.len(), 1);

        let json = br#"{"chapters":[{"id":"c1","book_id":"b1","sequence":1,"title":"One","price_cents":99}]}"#;
        let parsed = parse_catalog(Path::new("catalog.json"), json)?;
        assert_eq!(parsed.chapters[0].price, Some(Price::from_cents(99)));
        Ok(())
    }
}

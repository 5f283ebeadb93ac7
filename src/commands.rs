use std::sync::Arc;
use std::time::Instant;

use anyhow::Context as _;
use tokio::sync::mpsc;

use crate::access::AccessDecision;
use crate::app::kv_store::LocalFsKvStore;
use crate::app::model::PurchaseReceipt;
use crate::app::navigation::{NavOutcome, ScrollMetrics};
use crate::app::notify::{ChannelNotifier, Notification};
use crate::app::payment::SimulatedPaymentGateway;
use crate::app::storefront::{CartOutcome, ChapterBadge, ReadOutcome, Storefront, StorefrontDeps};
use crate::catalog::LocalFsCatalog;
use crate::cli::{BuyArgs, CartCommand, Cli, Command, NextArgs, ScrollArgs, SessionArgs};
use crate::config::{StorageScope, StorefrontConfig};
use crate::error::PurchaseError;
use crate::formats::ContentBlock;

/// One CLI invocation's storefront plus the notifications it emits.
pub struct Session {
    pub storefront: Arc<Storefront>,
    notices: mpsc::UnboundedReceiver<Notification>,
}

impl Session {
    pub async fn open(args: &SessionArgs, mut config: StorefrontConfig) -> anyhow::Result<Self> {
        if let Some(scope) = args.scope.as_deref() {
            config.scope = StorageScope::parse(scope).context("parse --scope")?;
        }
        let namespace = config.scope.namespace(args.user.as_deref());
        tracing::debug!(
            data_dir = %args.data_dir.display(),
            namespace,
            "opening storefront"
        );

        let (notifier, notices) = ChannelNotifier::new();
        let deps = StorefrontDeps {
            catalog: Arc::new(LocalFsCatalog::new(&args.catalog)),
            kv: Arc::new(LocalFsKvStore::new(&args.data_dir, namespace)),
            gateway: Arc::new(SimulatedPaymentGateway::new(
                config.payment_mode,
                config.payment_latency,
            )),
            notifier: Arc::new(notifier),
        };
        let storefront = Storefront::open(deps, &config).await;
        if let Some(user) = args.user.as_deref() {
            storefront.login_succeeded(user).await;
        }

        Ok(Self {
            storefront,
            notices,
        })
    }

    /// Prints every notification emitted so far.
    pub fn print_notices(&mut self) {
        while let Ok(notice) = self.notices.try_recv() {
            println!("notice: {notice}");
        }
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = StorefrontConfig::from_env().context("load config")?;
    let mut session = Session::open(&cli.session, config).await?;

    let result = dispatch(&session.storefront, cli.command).await;
    session.storefront.flush_progress().await;
    session.print_notices();
    result
}

async fn dispatch(storefront: &Arc<Storefront>, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Catalog => print_catalog(storefront).await,
        Command::Read(args) => {
            read(storefront, &args.chapter).await?;
            Ok(())
        }
        Command::Next(args) => next(storefront, args).await,
        Command::Prev(args) => {
            if !read(storefront, &args.chapter).await? {
                return Ok(());
            }
            match storefront.previous_chapter().await? {
                NavOutcome::Moved { chapter_id, .. } => println!("at {chapter_id}"),
                NavOutcome::AtStart => println!("start of book"),
                other => tracing::debug!(?other, "unexpected previous outcome"),
            }
            Ok(())
        }
        Command::Scroll(args) => scroll(storefront, args).await,
        Command::Cart { command } => cart(storefront, command).await,
        Command::Checkout => report_purchase(storefront.checkout().await),
        Command::Buy(args) => buy(storefront, args).await,
        Command::Progress => {
            for entry in storefront.reading_progress().await {
                let status = if entry.completed { "completed" } else { "reading" };
                println!(
                    "{}\t{}\t{}%\t{status}",
                    entry.book_id, entry.chapter_id, entry.progress
                );
            }
            Ok(())
        }
        Command::Recent => {
            for chapter_id in storefront.recently_viewed().await {
                println!("{chapter_id}");
            }
            Ok(())
        }
    }
}

/// Opens a chapter and prints it; returns whether it opened.
async fn read(storefront: &Arc<Storefront>, chapter_id: &str) -> anyhow::Result<bool> {
    match storefront.open_chapter(chapter_id).await? {
        ReadOutcome::Opened { chapter } => {
            println!("opened {}: {}", chapter.id, chapter.title);
            for block in &chapter.content {
                match block {
                    ContentBlock::Heading { text } => println!("## {text}"),
                    ContentBlock::Paragraph { text } => println!("{text}"),
                    ContentBlock::Image { src, alt } => println!("[image: {alt}]({src})"),
                }
            }
            Ok(true)
        }
        ReadOutcome::LoginRequired { .. } | ReadOutcome::PurchaseRequired { .. } => {
            println!("locked {chapter_id}");
            Ok(false)
        }
        ReadOutcome::NotFound => anyhow::bail!("chapter not found: {chapter_id}"),
    }
}

async fn next(storefront: &Arc<Storefront>, args: NextArgs) -> anyhow::Result<()> {
    if !read(storefront, &args.chapter).await? {
        return Ok(());
    }
    match storefront.next_chapter().await? {
        NavOutcome::Moved { chapter_id, .. } => println!("at {chapter_id}"),
        NavOutcome::End => println!("end of book"),
        NavOutcome::Locked {
            chapter_id,
            decision,
            ..
        } => {
            println!("locked {chapter_id}");
            if args.buy && decision == AccessDecision::RequirePurchase {
                report_purchase(storefront.buy_chapter(&chapter_id).await)?;
                if let Some((_, _, at)) = storefront.reading_position().await {
                    println!("at {at}");
                }
            }
        }
        other => tracing::debug!(?other, "unexpected next outcome"),
    }
    Ok(())
}

async fn scroll(storefront: &Arc<Storefront>, args: ScrollArgs) -> anyhow::Result<()> {
    if !read(storefront, &args.chapter).await? {
        return Ok(());
    }
    let metrics = ScrollMetrics {
        scroll_top: args.top,
        scroll_height: args.height,
        client_height: args.client,
    };
    if let Some(progress) = storefront.record_scroll(metrics, Instant::now()).await {
        println!("progress {progress}%");
    }
    Ok(())
}

async fn cart(storefront: &Arc<Storefront>, command: CartCommand) -> anyhow::Result<()> {
    match command {
        CartCommand::Add(args) => {
            if storefront.add_to_cart(&args.chapter).await? == CartOutcome::NotFound {
                anyhow::bail!("chapter not found: {}", args.chapter);
            }
        }
        CartCommand::Remove(args) => {
            if !storefront.remove_from_cart(&args.chapter).await {
                println!("not in cart {}", args.chapter);
            }
        }
        CartCommand::List => {
            let summary = storefront.cart_summary().await?;
            for chapter in &summary.items {
                println!("{}\t{}\t{}", chapter.id, chapter.title, chapter.purchase_price());
            }
            println!("total {}", summary.total);
        }
        CartCommand::Clear => storefront.clear_cart().await,
    }
    Ok(())
}

async fn buy(storefront: &Arc<Storefront>, args: BuyArgs) -> anyhow::Result<()> {
    let result = match (args.chapter, args.book) {
        (Some(chapter_id), _) => storefront.buy_chapter(&chapter_id).await,
        (None, Some(book_id)) => storefront.buy_book(&book_id).await,
        (None, None) => anyhow::bail!("pass --chapter or --book"),
    };
    report_purchase(result)
}

fn report_purchase(result: Result<PurchaseReceipt, PurchaseError>) -> anyhow::Result<()> {
    match result {
        Ok(receipt) => {
            println!(
                "purchased {} for {} ({})",
                receipt.chapter_ids.join(","),
                receipt.total,
                receipt.payment_reference
            );
            Ok(())
        }
        // The login prompt is reported through notifications.
        Err(PurchaseError::LoginRequired) => Ok(()),
        Err(PurchaseError::NothingToPurchase) => {
            println!("nothing to purchase");
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

async fn print_catalog(storefront: &Arc<Storefront>) -> anyhow::Result<()> {
    for listing in storefront.book_listings().await? {
        println!(
            "{}\t{}\t{}\t{}/{} read",
            listing.book.id,
            listing.book.title,
            listing.author.as_deref().unwrap_or("unknown author"),
            listing.progress.completed_chapters,
            listing.progress.total_chapters,
        );
        for (chapter, badge) in &listing.chapters {
            let badge = match badge {
                ChapterBadge::Free => "free".to_string(),
                ChapterBadge::Owned => "owned".to_string(),
                ChapterBadge::InCart => "in cart".to_string(),
                ChapterBadge::Locked => chapter.purchase_price().to_string(),
            };
            println!(
                "  {}. {}\t{}\t{badge}",
                chapter.sequence, chapter.id, chapter.title
            );
        }
    }
    Ok(())
}

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(flatten)]
    pub session: SessionArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Who is using the storefront and where their state lives.
#[derive(Debug, Args)]
pub struct SessionArgs {
    /// Catalog file (YAML or JSON).
    #[arg(long, global = true, default_value = "catalog.yaml")]
    pub catalog: PathBuf,

    /// Directory holding persisted ownership, cart, progress and history.
    #[arg(long, global = true, default_value = ".storyshelf")]
    pub data_dir: PathBuf,

    /// Log in as this user before running the command.
    #[arg(long, global = true)]
    pub user: Option<String>,

    /// Storage scope (`device` or `user`). Overrides STORYSHELF_STORAGE_SCOPE.
    #[arg(long, global = true)]
    pub scope: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List books with per-chapter badges and reading progress.
    Catalog,
    /// Open a chapter.
    Read(ChapterArgs),
    /// Open a chapter, then advance to the next one.
    Next(NextArgs),
    /// Open a chapter, then go back one.
    Prev(ChapterArgs),
    /// Record a scroll position for a chapter.
    Scroll(ScrollArgs),
    Cart {
        #[command(subcommand)]
        command: CartCommand,
    },
    /// Buy every valid item in the cart.
    Checkout,
    /// Buy a single chapter or a whole book.
    Buy(BuyArgs),
    /// Show saved reading progress.
    Progress,
    /// Show recently viewed chapters, newest first.
    Recent,
}

#[derive(Debug, Args)]
pub struct ChapterArgs {
    /// Chapter id.
    #[arg(long)]
    pub chapter: String,
}

#[derive(Debug, Args)]
pub struct NextArgs {
    /// Chapter id to start from.
    #[arg(long)]
    pub chapter: String,

    /// Buy the next chapter if it is locked behind a purchase.
    #[arg(long, default_value_t = false)]
    pub buy: bool,
}

#[derive(Debug, Args)]
pub struct ScrollArgs {
    /// Chapter id.
    #[arg(long)]
    pub chapter: String,

    /// Scroll offset of the top of the viewport.
    #[arg(long)]
    pub top: f64,

    /// Total scrollable height of the chapter.
    #[arg(long)]
    pub height: f64,

    /// Height of the viewport.
    #[arg(long, default_value_t = 800.0)]
    pub client: f64,
}

#[derive(Debug, Subcommand)]
pub enum CartCommand {
    /// Add a chapter to the cart.
    Add(ChapterArgs),
    /// Remove a chapter from the cart.
    Remove(ChapterArgs),
    /// Show valid cart items and the total.
    List,
    /// Empty the cart.
    Clear,
}

#[derive(Debug, Args)]
#[group(required = true, multiple = false)]
pub struct BuyArgs {
    /// Chapter id.
    #[arg(long)]
    pub chapter: Option<String>,

    /// Book id.
    #[arg(long)]
    pub book: Option<String>,
}

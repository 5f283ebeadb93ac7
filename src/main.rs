use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    storyshelf::logging::init().context("init logging")?;

    let cli = storyshelf::cli::Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    let command = command_name(&cli.command);
    storyshelf::commands::run(cli).await.context(command)?;

    Ok(())
}

fn command_name(command: &storyshelf::cli::Command) -> &'static str {
    use storyshelf::cli::{CartCommand, Command};

    match command {
        Command::Catalog => "catalog",
        Command::Read(_) => "read",
        Command::Next(_) => "next",
        Command::Prev(_) => "prev",
        Command::Scroll(_) => "scroll",
        Command::Cart {
            command: CartCommand::Add(_),
        } => "cart add",
        Command::Cart {
            command: CartCommand::Remove(_),
        } => "cart remove",
        Command::Cart {
            command: CartCommand::List,
        } => "cart list",
        Command::Cart {
            command: CartCommand::Clear,
        } => "cart clear",
        Command::Checkout => "checkout",
        Command::Buy(_) => "buy",
        Command::Progress => "progress",
        Command::Recent => "recent",
    }
}

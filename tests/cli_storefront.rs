mod common;

use std::fs;
use std::path::Path;

use predicates::prelude::*;

fn storyshelf(dir: &Path) -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("storyshelf");
    cmd.env_remove("RUST_LOG")
        .env_remove("STORYSHELF_STORAGE_SCOPE")
        .env_remove("STORYSHELF_PAYMENT_MODE")
        .env("STORYSHELF_PAYMENT_LATENCY_MS", "0")
        .arg("--catalog")
        .arg(dir.join("catalog.yaml"))
        .arg("--data-dir")
        .arg(dir.join("data"));
    cmd
}

fn workspace() -> anyhow::Result<tempfile::TempDir> {
    let dir = tempfile::tempdir()?;
    fs::write(dir.path().join("catalog.yaml"), common::CATALOG_YAML)?;
    Ok(dir)
}

#[test]
fn catalog_lists_books_with_prices() -> anyhow::Result<()> {
    let dir = workspace()?;
    storyshelf(dir.path())
        .arg("catalog")
        .assert()
        .success()
        .stdout(predicate::str::contains("b1\tThe Salt Road\tMina Arai\t0/3 read"))
        .stdout(predicate::str::contains("2. c2\tThe Toll Gate\t$2.99"))
        .stdout(predicate::str::contains("1. c1\tDeparture\tfree"));
    Ok(())
}

#[test]
fn anonymous_read_asks_for_login() -> anyhow::Result<()> {
    let dir = workspace()?;
    storyshelf(dir.path())
        .args(["read", "--chapter", "c1"])
        .assert()
        .success()
        .stdout("locked c1\nnotice: login_required action=read item=Chapter\n");
    Ok(())
}

#[test]
fn purchase_persists_between_runs() -> anyhow::Result<()> {
    let dir = workspace()?;
    storyshelf(dir.path())
        .args(["--user", "alice", "read", "--chapter", "c2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("notice: purchase_required c2"));

    storyshelf(dir.path())
        .args(["--user", "alice", "buy", "--chapter", "c2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("purchased c2 for $2.99 (sim-"))
        .stdout(predicate::str::contains("notice: purchase_succeeded c2"));

    storyshelf(dir.path())
        .args(["--user", "alice", "read", "--chapter", "c2"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("opened c2: The Toll Gate\n"));
    Ok(())
}

#[test]
fn next_with_buy_resumes_into_purchased_chapter() -> anyhow::Result<()> {
    let dir = workspace()?;
    storyshelf(dir.path())
        .args(["--user", "alice", "next", "--chapter", "c1", "--buy"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "opened c1: Departure\n## Departure\nThe caravan left before dawn.\nlocked c2\n",
        ))
        .stdout(predicate::str::contains("at c2\n"));

    storyshelf(dir.path())
        .args(["--user", "alice", "progress"])
        .assert()
        .success()
        .stdout(predicate::str::contains("b1\tc1\t100%\tcompleted"));
    Ok(())
}

#[test]
fn cart_checkout_empties_cart() -> anyhow::Result<()> {
    let dir = workspace()?;
    storyshelf(dir.path())
        .args(["--user", "alice", "cart", "add", "--chapter", "c2"])
        .assert()
        .success()
        .stdout("notice: cart_added c2\n");

    storyshelf(dir.path())
        .args(["--user", "alice", "cart", "list"])
        .assert()
        .success()
        .stdout("c2\tThe Toll Gate\t$2.99\ntotal $2.99\n");

    storyshelf(dir.path())
        .args(["--user", "alice", "checkout"])
        .assert()
        .success()
        .stdout(predicate::str::contains("purchased c2 for $2.99"));

    storyshelf(dir.path())
        .args(["--user", "alice", "cart", "list"])
        .assert()
        .success()
        .stdout("total $0.00\n");
    Ok(())
}

#[test]
fn declined_payment_fails_the_command() -> anyhow::Result<()> {
    let dir = workspace()?;
    storyshelf(dir.path())
        .env("STORYSHELF_PAYMENT_MODE", "decline")
        .args(["--user", "alice", "buy", "--chapter", "c2"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("payment failed: card declined"));

    storyshelf(dir.path())
        .args(["--user", "alice", "read", "--chapter", "c2"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("locked c2\n"));
    Ok(())
}

#[test]
fn user_scope_keeps_users_apart() -> anyhow::Result<()> {
    let dir = workspace()?;
    storyshelf(dir.path())
        .args(["--scope", "user", "--user", "alice", "buy", "--chapter", "c2"])
        .assert()
        .success();

    storyshelf(dir.path())
        .args(["--scope", "user", "--user", "bob", "read", "--chapter", "c2"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("locked c2\n"));
    Ok(())
}

#[test]
fn unknown_scope_is_rejected() -> anyhow::Result<()> {
    let dir = workspace()?;
    storyshelf(dir.path())
        .args(["--scope", "team", "catalog"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unsupported storage scope"));
    Ok(())
}

#[test]
fn rust_log_debug_emits_debug_line_to_stderr() -> anyhow::Result<()> {
    let dir = workspace()?;
    storyshelf(dir.path())
        .env("RUST_LOG", "debug")
        .arg("catalog")
        .assert()
        .success()
        .stderr(predicate::str::contains("parsed cli"));
    Ok(())
}

#[test]
fn scroll_records_progress() -> anyhow::Result<()> {
    let dir = workspace()?;
    storyshelf(dir.path())
        .args(["--user", "alice", "scroll", "--chapter", "c1"])
        .args(["--top", "300", "--height", "1400", "--client", "800"])
        .assert()
        .success()
        .stdout(predicate::str::contains("progress 50%\n"));

    storyshelf(dir.path())
        .args(["--user", "alice", "progress"])
        .assert()
        .success()
        .stdout("b1\tc1\t50%\treading\n");
    Ok(())
}

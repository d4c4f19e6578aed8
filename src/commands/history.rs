//! One-shot chat management commands
//!
//! Each handler loads the first page of chats, resolves its target and
//! performs a single store operation, printing the result.

use std::io::{BufRead, Write};

use colored::Colorize;

use super::{resolve_chat, stream_reply, App};
use crate::config::Config;
use crate::error::{LepotatoError, Result};
use crate::view;

/// List chats from the backend, or from the local mirror
pub async fn handle_list(config: &Config, all: bool, cached: bool) -> Result<()> {
    let app = App::build(config)?;

    if cached {
        let Some(cache) = &app.cache else {
            println!("{}", "Local chat mirror is unavailable.".yellow());
            return Ok(());
        };
        let summaries = cache.list_summaries()?;
        if summaries.is_empty() {
            println!("{}", "No chats in the local mirror.".yellow());
            return Ok(());
        }
        println!("\nCached chats:");
        view::cached_table(&summaries).printstd();
        println!();
        return Ok(());
    }

    let store = &app.store;
    store.load_chats().await;
    if all {
        while store.has_more() && store.load_more_chats().await > 0 {}
    }

    let chats = store.chats();
    if chats.is_empty() {
        println!("{}", "No chats found.".yellow());
        return Ok(());
    }

    println!("\nChats:");
    view::chat_table(&chats, store.current_chat_id().as_deref()).printstd();
    println!("\nShowing {} of {} chats.", chats.len(), store.total_chats());
    if store.has_more() {
        println!("Use {} to see all of them.", "lepotato list --all".cyan());
    }
    println!();
    Ok(())
}

/// Print the transcript of one chat
pub async fn handle_show(config: &Config, reference: &str) -> Result<()> {
    let app = App::build(config)?;
    app.store.load_chats().await;

    let id = resolve_chat(&app.store, reference).await?;
    app.store.select_chat(&id)?;
    let chat = app
        .store
        .current_chat()
        .ok_or_else(|| LepotatoError::ChatNotFound(id.clone()))?;

    println!(
        "\n{}",
        view::render_top_bar(Some(&chat.title), &app.store.token_stats())
    );
    println!("{}", "-".repeat(40).dimmed());
    println!("{}\n", view::render_transcript(&chat));
    Ok(())
}

/// Create a chat and print its id
pub async fn handle_new(config: &Config) -> Result<()> {
    let app = App::build(config)?;
    let chat = app.store.create_chat().await?;
    println!("{}", chat.id);
    Ok(())
}

/// Send one message and stream the reply
///
/// Without a target the most recent chat is used, or a new one is created
/// when there is none.
pub async fn handle_send(config: &Config, message: &str, reference: Option<&str>) -> Result<()> {
    let message = message.trim();
    if message.is_empty() {
        anyhow::bail!("Message cannot be empty");
    }

    let app = App::build(config)?;
    let store = &app.store;
    store.load_chats().await;

    match reference {
        Some(reference) => {
            let id = resolve_chat(store, reference).await?;
            store.select_chat(&id)?;
        }
        None if store.current_chat_id().is_none() => {
            store.create_chat().await?;
        }
        None => {}
    }

    println!("{} {}", "You:".cyan().bold(), message);
    stream_reply(store, message).await
}

/// Rename one chat
pub async fn handle_rename(config: &Config, reference: &str, title: &str) -> Result<()> {
    let title = title.trim();
    if title.is_empty() {
        anyhow::bail!("Title cannot be empty");
    }

    let app = App::build(config)?;
    app.store.load_chats().await;
    let id = resolve_chat(&app.store, reference).await?;
    app.store.rename_chat(&id, title).await?;

    println!("{}", format!("Renamed chat {} to {}", id, title).green());
    Ok(())
}

/// Delete one chat
pub async fn handle_delete(config: &Config, reference: &str) -> Result<()> {
    let app = App::build(config)?;
    app.store.load_chats().await;
    let id = resolve_chat(&app.store, reference).await?;
    app.store.delete_chat(&id).await?;

    println!("{}", format!("Deleted chat {}", id).green());
    Ok(())
}

/// Delete every chat, asking first unless `yes`
pub async fn handle_clear(config: &Config, yes: bool) -> Result<()> {
    if !yes && !confirm("Delete every chat? [y/N] ")? {
        println!("Cancelled.");
        return Ok(());
    }

    let app = App::build(config)?;
    app.store.clear_all_chats().await?;
    println!("{}", "All chats deleted".green());
    Ok(())
}

/// Print context usage of one chat
pub async fn handle_context(config: &Config, reference: Option<&str>) -> Result<()> {
    let app = App::build(config)?;
    let store = &app.store;
    store.load_chats().await;

    let id = match reference {
        Some(reference) => resolve_chat(store, reference).await?,
        None => store.current_chat_id().ok_or(LepotatoError::NoActiveChat)?,
    };
    let stats = store.refresh_context(&id).await;
    let title = store
        .chats()
        .into_iter()
        .find(|c| c.id == id)
        .map(|c| c.title);

    println!("{}", view::render_top_bar(title.as_deref(), &stats));
    println!("Context usage: {:.1}%", stats.usage_ratio() * 100.0);
    Ok(())
}

fn confirm(question: &str) -> Result<bool> {
    print!("{}", question);
    std::io::stdout().flush()?;

    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

/*!
Command handlers for the CLI

This module provides command handlers invoked by the CLI entrypoint.

- `chat`: interactive front-end (sidebar, composer, streamed replies)
- `history`: one-shot list/show/new/send/rename/delete/clear/context

Both build an [`App`] from the configuration: an [`HttpChatService`]
mirrored into the local SQLite cache, wrapped by a [`ChatStore`] whose
token stats live in the session file.
*/

use std::sync::Arc;

use colored::Colorize;

use crate::config::Config;
use crate::error::{LepotatoError, Result};
use crate::service::HttpChatService;
use crate::storage::{SessionStatsStore, SqliteChatCache, PREF_HISTORY_EXPANDED};
use crate::store::{ChatStore, StoreEvent};
use crate::view;

// Special commands parser for the interactive front-end
pub mod special_commands;

// One-shot chat management commands
pub mod history;

/// Everything a command handler needs
pub struct App {
    /// Shared state store
    pub store: Arc<ChatStore>,
    /// Local mirror, absent when it could not be opened
    pub cache: Option<SqliteChatCache>,
}

impl App {
    /// Wire service, mirror, session stats and store from `config`
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be created. A mirror that
    /// cannot be opened is logged and skipped.
    pub fn build(config: &Config) -> Result<Self> {
        let cache_path = match &config.storage.cache_path {
            Some(path) => Ok(path.clone()),
            None => SqliteChatCache::default_path(),
        };
        let cache = match cache_path.and_then(SqliteChatCache::new_with_path) {
            Ok(cache) => Some(cache),
            Err(e) => {
                tracing::warn!("Local chat mirror unavailable: {}", e);
                None
            }
        };

        let mut service = HttpChatService::new(&config.backend)?;
        if let Some(cache) = &cache {
            service = service.with_cache(cache.clone());
        }

        let session = SessionStatsStore::new(
            config.storage.session_dir(),
            &config.storage.session_name,
        );

        let store = ChatStore::new(Arc::new(service))
            .with_session(session)
            .with_more_page_size(config.chat.more_page_size)
            .with_default_max_tokens(config.chat.default_max_tokens);

        Ok(Self {
            store: Arc::new(store),
            cache,
        })
    }

    /// Whether the sidebar's "more" section is expanded
    pub fn history_expanded(&self) -> bool {
        self.cache
            .as_ref()
            .and_then(|cache| cache.preference(PREF_HISTORY_EXPANDED).ok().flatten())
            .is_some_and(|value| value == "true")
    }

    /// Persist the sidebar's expanded state
    pub fn set_history_expanded(&self, expanded: bool) {
        if let Some(cache) = &self.cache {
            let value = if expanded { "true" } else { "false" };
            if let Err(e) = cache.set_preference(PREF_HISTORY_EXPANDED, value) {
                tracing::warn!("Failed to save sidebar state: {}", e);
            }
        }
    }
}

/// Resolve a chat reference to a chat id
///
/// `reference` is a 1-based list position or a chat id. Older pages are
/// loaded as needed.
///
/// # Errors
///
/// Returns [`LepotatoError::ChatNotFound`] if nothing matches
pub async fn resolve_chat(store: &ChatStore, reference: &str) -> Result<String> {
    let reference = reference.trim();

    loop {
        let chats = store.chats();

        if let Ok(position) = reference.parse::<usize>() {
            if position >= 1 {
                if let Some(chat) = chats.get(position - 1) {
                    return Ok(chat.id.clone());
                }
            }
        }
        if let Some(chat) = chats.iter().find(|c| c.id == reference) {
            return Ok(chat.id.clone());
        }

        if !store.has_more() || store.load_more_chats().await == 0 {
            return Err(LepotatoError::ChatNotFound(reference.to_string()).into());
        }
    }
}

/// Send `text` on the active chat, echoing the reply as it streams
///
/// Ctrl-C stops the stream and keeps the partial reply.
pub async fn stream_reply(store: &ChatStore, text: &str) -> Result<()> {
    let mut events = store.subscribe();
    let mut printed = 0usize;
    let mut stopped = false;

    print!("{} ", "Le Potato:".green().bold());
    flush_stdout();

    let send = store.send_message(text);
    tokio::pin!(send);

    let result = loop {
        tokio::select! {
            result = &mut send => break result,
            Ok(event) = events.recv() => print_delta(&event, &mut printed),
            _ = tokio::signal::ctrl_c(), if !stopped => {
                store.stop_streaming();
                stopped = true;
            }
        }
    };

    while let Ok(event) = events.try_recv() {
        print_delta(&event, &mut printed);
    }
    println!();

    if stopped {
        println!("{}", "(stopped)".yellow());
    }
    println!(
        "{}\n",
        view::render_top_bar(
            store.current_chat().as_ref().map(|c| c.title.as_str()),
            &store.token_stats()
        )
    );

    result
}

fn print_delta(event: &StoreEvent, printed: &mut usize) {
    if let StoreEvent::ContentUpdated { content, .. } = event {
        if let Some(delta) = content.get(*printed..) {
            print!("{}", delta);
            flush_stdout();
            *printed = content.len();
        }
    }
}

fn flush_stdout() {
    use std::io::Write;
    let _ = std::io::stdout().flush();
}

// Chat command handler
pub mod chat {
    //! Interactive front-end.
    //!
    //! Loads the chat list, then runs a readline loop: plain input is sent
    //! to the active chat and the reply is streamed to the terminal; input
    //! starting with `/` manages chats.

    use super::*;
    use crate::commands::special_commands::{parse_special_command, print_help, SpecialCommand};
    use rustyline::error::ReadlineError;
    use rustyline::DefaultEditor;

    /// Start the interactive front-end
    ///
    /// # Arguments
    ///
    /// * `config` - Global configuration (consumed)
    /// * `open` - Optional chat to open instead of the most recent one
    ///
    /// # Examples
    ///
    /// ```
    /// use lepotato::commands::chat;
    /// use lepotato::config::Config;
    ///
    /// // In application code:
    /// // chat::run_chat(Config::default(), None).await?;
    /// ```
    pub async fn run_chat(config: Config, open: Option<String>) -> Result<()> {
        tracing::info!("Starting interactive chat");

        let app = App::build(&config)?;
        let store = app.store.clone();

        store.load_chats().await;
        if let Some(reference) = open {
            let id = resolve_chat(&store, &reference).await?;
            store.select_chat(&id)?;
        }
        if app.history_expanded() && store.has_more() {
            store.load_more_chats().await;
        }

        let mut rl = DefaultEditor::new()?;

        print_banner(&app);

        loop {
            match rl.readline(&prompt(&store)) {
                Ok(line) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    rl.add_history_entry(trimmed)?;

                    let command = match parse_special_command(trimmed) {
                        Ok(command) => command,
                        Err(e) => {
                            eprintln!("{}\n", e.to_string().red());
                            continue;
                        }
                    };

                    match command {
                        SpecialCommand::Exit => break,
                        SpecialCommand::None => {
                            if store.current_chat_id().is_none() {
                                if let Err(e) = store.create_chat().await {
                                    report(Err(e));
                                    continue;
                                }
                            }
                            report(stream_reply(&store, trimmed).await);
                        }
                        SpecialCommand::ClearAll => {
                            let answer = rl.readline("Delete every chat? [y/N] ");
                            if matches!(answer.as_deref().map(str::trim), Ok("y" | "Y" | "yes")) {
                                report(handle_command(&app, SpecialCommand::ClearAll).await);
                            } else {
                                println!("Cancelled.\n");
                            }
                        }
                        command => report(handle_command(&app, command).await),
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    println!("CTRL-C");
                    break;
                }
                Err(ReadlineError::Eof) => {
                    println!("CTRL-D");
                    break;
                }
                Err(err) => {
                    tracing::error!("Readline error: {:?}", err);
                    break;
                }
            }
        }

        println!("Goodbye!");
        Ok(())
    }

    fn report(result: Result<()>) {
        if let Err(e) = result {
            eprintln!("{}\n", format!("Error: {}", e).red());
        }
    }

    /// Run one chat-management command against the store
    pub(crate) async fn handle_command(app: &App, command: SpecialCommand) -> Result<()> {
        let store = &app.store;

        match command {
            SpecialCommand::NewChat => {
                let chat = store.create_chat().await?;
                println!("{}\n", format!("Started chat {}", chat.id).green());
            }
            SpecialCommand::ListChats => print_sidebar(app),
            SpecialCommand::ExpandHistory => {
                app.set_history_expanded(true);
                if store.has_more() {
                    store.load_more_chats().await;
                }
                print_sidebar(app);
            }
            SpecialCommand::CollapseHistory => {
                app.set_history_expanded(false);
                print_sidebar(app);
            }
            SpecialCommand::Switch(reference) => {
                let id = resolve_chat(store, &reference).await?;
                store.select_chat(&id)?;
                if let Some(chat) = store.current_chat() {
                    println!("{}\n", view::render_transcript(&chat));
                }
            }
            SpecialCommand::Rename(title) => {
                let id = store
                    .current_chat_id()
                    .ok_or(LepotatoError::NoActiveChat)?;
                store.rename_chat(&id, &title).await?;
                println!("{}\n", format!("Renamed to {}", title).green());
            }
            SpecialCommand::Delete(reference) => {
                let id = match reference {
                    Some(reference) => resolve_chat(store, &reference).await?,
                    None => store
                        .current_chat_id()
                        .ok_or(LepotatoError::NoActiveChat)?,
                };
                store.delete_chat(&id).await?;
                println!("{}\n", "Chat deleted".green());
            }
            SpecialCommand::ClearAll => {
                store.clear_all_chats().await?;
                println!("{}\n", "All chats deleted".green());
            }
            SpecialCommand::ShowStats => {
                let stats = store.token_stats();
                println!(
                    "{}\n",
                    view::render_top_bar(
                        store.current_chat().as_ref().map(|c| c.title.as_str()),
                        &stats
                    )
                );
            }
            SpecialCommand::Help => print_help(),
            SpecialCommand::Exit | SpecialCommand::None => {}
        }
        Ok(())
    }

    fn print_sidebar(app: &App) {
        let store = &app.store;
        println!(
            "{}",
            view::render_sidebar(
                &store.chats(),
                store.current_chat_id().as_deref(),
                store.total_chats(),
                app.history_expanded()
            )
        );
    }

    fn print_banner(app: &App) {
        let store = &app.store;
        println!(
            "\n{}",
            view::render_top_bar(
                store.current_chat().as_ref().map(|c| c.title.as_str()),
                &store.token_stats()
            )
        );
        println!("{}", "-".repeat(40).dimmed());
        print_sidebar(app);
        println!("Type {} for commands.\n", "/help".cyan());
        if let Some(chat) = store.current_chat() {
            if !chat.messages.is_empty() {
                println!("{}\n", view::render_transcript(&chat));
            }
        }
    }

    fn prompt(store: &ChatStore) -> String {
        match store.current_chat() {
            Some(chat) => format!("[{}] >> ", chat.title),
            None => ">> ".to_string(),
        }
    }
}

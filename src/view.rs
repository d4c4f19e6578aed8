//! Terminal rendering of the store's state
//!
//! Everything here is a pure function from state to text so the front-end
//! can redraw on any [`StoreEvent`](crate::store::StoreEvent).

use colored::Colorize;
use prettytable::{format, Table};

use crate::storage::CachedChatSummary;
use crate::types::{Chat, Message, Role, TokenStats};

/// Top bar title when no chat is active
pub const DEFAULT_TITLE: &str = "Le Potato v2";

/// Chats shown in the sidebar before the "more" section
pub const VISIBLE_CHATS: usize = 3;

const TITLE_WIDTH: usize = 40;

/// Top bar: title, context usage and generation speed
///
/// # Examples
///
/// ```
/// use lepotato::types::TokenStats;
/// use lepotato::view::render_top_bar;
///
/// colored::control::set_override(false);
/// let bar = render_top_bar(None, &TokenStats::default());
/// assert_eq!(bar, "Le Potato v2 | Context: 0/8192 | Speed: 0.00 t/s");
/// ```
pub fn render_top_bar(title: Option<&str>, stats: &TokenStats) -> String {
    let title = title.unwrap_or(DEFAULT_TITLE);
    let context = format!("Context: {}/{}", stats.total_tokens, stats.max_tokens);
    let context = if stats.usage_ratio() >= 0.9 {
        context.red().to_string()
    } else {
        context
    };
    format!(
        "{} | {} | Speed: {:.2} t/s",
        title.bold(),
        context,
        stats.tokens_per_second
    )
}

/// Sidebar listing
///
/// The first [`VISIBLE_CHATS`] entries are always listed. When the backend
/// holds more, a "more" section follows, expanded or collapsed. Entries are
/// numbered from 1 so they can be picked with `/switch <n>`.
pub fn render_sidebar(
    chats: &[Chat],
    current: Option<&str>,
    total: usize,
    expanded: bool,
) -> String {
    if chats.is_empty() {
        return format!("{}", "No chats yet. Type /new to start one.".yellow());
    }

    let mut out = String::new();
    for (index, chat) in chats.iter().enumerate().take(VISIBLE_CHATS) {
        out.push_str(&sidebar_line(index, chat, current));
    }

    if total > VISIBLE_CHATS {
        let hidden = total - VISIBLE_CHATS;
        if expanded {
            out.push_str(&format!("{}\n", format!("More ({})", hidden).dimmed()));
            for (index, chat) in chats.iter().enumerate().skip(VISIBLE_CHATS) {
                out.push_str(&sidebar_line(index, chat, current));
            }
            if chats.len() < total {
                out.push_str(&format!(
                    "  {}\n",
                    format!("{} more, /more to load", total - chats.len()).dimmed()
                ));
            }
        } else {
            out.push_str(&format!(
                "{}\n",
                format!("More ({}), /more to expand", hidden).dimmed()
            ));
        }
    }

    out
}

fn sidebar_line(index: usize, chat: &Chat, current: Option<&str>) -> String {
    let title = truncate(&chat.title, TITLE_WIDTH);
    if current == Some(chat.id.as_str()) {
        format!("{} {}\n", format!("{:>2}.", index + 1).green(), title.green().bold())
    } else {
        format!("{:>2}. {}\n", index + 1, title)
    }
}

/// One transcript entry
pub fn render_message(message: &Message) -> String {
    match message.role {
        Role::User => format!("{} {}", "You:".cyan().bold(), message.content),
        Role::Assistant => format!("{} {}", "Le Potato:".green().bold(), message.content),
    }
}

/// Whole transcript of a chat, one entry per paragraph
pub fn render_transcript(chat: &Chat) -> String {
    if chat.messages.is_empty() {
        return format!("{}", "No messages yet.".yellow());
    }
    chat.messages
        .iter()
        .map(render_message)
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Table of chats for the `list` command
pub fn chat_table(chats: &[Chat], current: Option<&str>) -> Table {
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);

    table.add_row(prettytable::row![
        "#".bold(),
        "ID".bold(),
        "Title".bold(),
        "Messages".bold(),
        "Created".bold()
    ]);

    for (index, chat) in chats.iter().enumerate() {
        let marker = if current == Some(chat.id.as_str()) { "*" } else { "" };
        table.add_row(prettytable::row![
            format!("{}{}", index + 1, marker),
            short_id(&chat.id).cyan(),
            truncate(&chat.title, TITLE_WIDTH),
            chat.messages.len(),
            chat.created_at.format("%Y-%m-%d %H:%M")
        ]);
    }

    table
}

/// Table of the local mirror for `list --cached`
pub fn cached_table(summaries: &[CachedChatSummary]) -> Table {
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);

    table.add_row(prettytable::row![
        "ID".bold(),
        "Title".bold(),
        "Messages".bold(),
        "Last Updated".bold()
    ]);

    for summary in summaries {
        table.add_row(prettytable::row![
            short_id(&summary.id).cyan(),
            truncate(&summary.title, TITLE_WIDTH),
            summary.message_count,
            summary.updated_at.format("%Y-%m-%d %H:%M")
        ]);
    }

    table
}

fn short_id(id: &str) -> &str {
    match id.char_indices().nth(8) {
        Some((end, _)) => &id[..end],
        None => id,
    }
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let kept: String = text.chars().take(width.saturating_sub(3)).collect();
    format!("{}...", kept)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain() {
        colored::control::set_override(false);
    }

    fn chats(n: usize) -> Vec<Chat> {
        (0..n)
            .map(|i| Chat {
                title: format!("chat {}", i + 1),
                ..Chat::new()
            })
            .collect()
    }

    #[test]
    fn test_top_bar_with_stats() {
        plain();
        let stats = TokenStats {
            total_tokens: 1234,
            max_tokens: 8192,
            tokens_per_second: 17.456,
        };
        assert_eq!(
            render_top_bar(Some("Soup"), &stats),
            "Soup | Context: 1234/8192 | Speed: 17.46 t/s"
        );
    }

    #[test]
    fn test_sidebar_hides_more_section_when_collapsed() {
        plain();
        let list = chats(5);
        let out = render_sidebar(&list, Some(&list[0].id), 5, false);
        assert!(out.contains(" 1. chat 1"));
        assert!(out.contains(" 3. chat 3"));
        assert!(!out.contains("chat 4"));
        assert!(out.contains("More (2)"));
    }

    #[test]
    fn test_sidebar_expanded_lists_loaded_and_hint() {
        plain();
        let list = chats(4);
        let out = render_sidebar(&list, None, 6, true);
        assert!(out.contains(" 4. chat 4"));
        assert!(out.contains("2 more, /more to load"));
    }

    #[test]
    fn test_sidebar_without_more_section() {
        plain();
        let out = render_sidebar(&chats(2), None, 2, false);
        assert!(!out.contains("More"));
    }

    #[test]
    fn test_sidebar_empty() {
        plain();
        assert!(render_sidebar(&[], None, 0, false).contains("/new"));
    }

    #[test]
    fn test_render_message_roles() {
        plain();
        assert_eq!(render_message(&Message::user("hi")), "You: hi");
        let mut reply = Message::assistant_placeholder();
        reply.content = "hello".to_string();
        assert_eq!(render_message(&reply), "Le Potato: hello");
    }

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("pommes de terre frites", 10), "pommes ...");
        assert_eq!(truncate("ééééééééééé", 5), "éé...");
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("0123456789abcdef"), "01234567");
        assert_eq!(short_id("abc"), "abc");
    }

    #[test]
    fn test_chat_table_has_header_and_rows() {
        plain();
        let list = chats(2);
        let table = chat_table(&list, Some(&list[1].id));
        assert_eq!(table.len(), 3);
        assert!(table.to_string().contains("2*"));
    }
}

//! Special commands parser for the interactive chat front-end
//!
//! Input starting with `/` is a command for the client itself rather than a
//! message for the backend. Command names are case-insensitive; arguments
//! keep their case.

use thiserror::Error;

/// Errors that can occur when parsing special commands
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Unknown command was entered
    #[error("Unknown command: {0}\n\nType '/help' to see available commands")]
    UnknownCommand(String),

    /// Command requires an argument but none was provided
    #[error("Command {command} requires an argument\n\nUsage: {usage}")]
    MissingArgument { command: String, usage: String },

    /// Command takes no argument but one was given
    #[error("Command {command} takes no argument, got: {arg}")]
    UnexpectedArgument { command: String, arg: String },
}

/// Special commands that can be executed during interactive chat
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecialCommand {
    /// Create a chat and make it active
    NewChat,

    /// Print the sidebar
    ListChats,

    /// Expand the sidebar's "more" section, loading the next page
    ExpandHistory,

    /// Collapse the sidebar's "more" section
    CollapseHistory,

    /// Activate a chat by list position or id
    Switch(String),

    /// Rename the active chat
    Rename(String),

    /// Delete a chat by position or id, or the active chat
    Delete(Option<String>),

    /// Delete every chat
    ClearAll,

    /// Show context and speed of the active chat
    ShowStats,

    /// Display help information
    Help,

    /// Exit the interactive session
    Exit,

    /// Not a special command; send the input as a message
    None,
}

/// Parse one line of user input
///
/// # Errors
///
/// Returns [`CommandError`] for unknown commands and bad arguments
///
/// # Examples
///
/// ```
/// use lepotato::commands::special_commands::{parse_special_command, SpecialCommand};
///
/// assert_eq!(parse_special_command("/NEW").unwrap(), SpecialCommand::NewChat);
/// assert_eq!(
///     parse_special_command("/rename Weekend Plans").unwrap(),
///     SpecialCommand::Rename("Weekend Plans".to_string())
/// );
/// assert_eq!(parse_special_command("hello").unwrap(), SpecialCommand::None);
/// ```
pub fn parse_special_command(input: &str) -> Result<SpecialCommand, CommandError> {
    let trimmed = input.trim();
    let lower = trimmed.to_lowercase();

    if !trimmed.starts_with('/') {
        return match lower.as_str() {
            "exit" | "quit" => Ok(SpecialCommand::Exit),
            _ => Ok(SpecialCommand::None),
        };
    }

    let (name, arg) = match trimmed.split_once(char::is_whitespace) {
        Some((name, arg)) => (name.to_lowercase(), arg.trim()),
        None => (lower.clone(), ""),
    };

    let no_arg = |command: SpecialCommand| {
        if arg.is_empty() {
            Ok(command)
        } else {
            Err(CommandError::UnexpectedArgument {
                command: name.clone(),
                arg: arg.to_string(),
            })
        }
    };

    match name.as_str() {
        "/new" => no_arg(SpecialCommand::NewChat),
        "/list" | "/chats" => no_arg(SpecialCommand::ListChats),
        "/more" => no_arg(SpecialCommand::ExpandHistory),
        "/less" => no_arg(SpecialCommand::CollapseHistory),
        "/clear" => no_arg(SpecialCommand::ClearAll),
        "/stats" | "/context" => no_arg(SpecialCommand::ShowStats),
        "/help" | "/?" => Ok(SpecialCommand::Help),
        "/exit" | "/quit" => Ok(SpecialCommand::Exit),

        "/switch" | "/open" => {
            if arg.is_empty() {
                Err(CommandError::MissingArgument {
                    command: "/switch".to_string(),
                    usage: "/switch <number|id>".to_string(),
                })
            } else {
                Ok(SpecialCommand::Switch(arg.to_string()))
            }
        }

        "/rename" => {
            if arg.is_empty() {
                Err(CommandError::MissingArgument {
                    command: "/rename".to_string(),
                    usage: "/rename <title>".to_string(),
                })
            } else {
                Ok(SpecialCommand::Rename(arg.to_string()))
            }
        }

        "/delete" => Ok(SpecialCommand::Delete(
            (!arg.is_empty()).then(|| arg.to_string()),
        )),

        _ => Err(CommandError::UnknownCommand(name.clone())),
    }
}

/// Print help for the special commands
pub fn print_help() {
    println!(
        r#"
Special Commands
================

CHATS:
  /new              - Start a new chat
  /list             - Show the chat list
  /more             - Expand the list and load older chats
  /less             - Collapse the list to the three most recent chats
  /switch <n|id>    - Open chat number n of the list, or by id
  /rename <title>   - Rename the active chat
  /delete [n|id]    - Delete a chat (the active one by default)
  /clear            - Delete every chat

SESSION:
  /stats            - Show context usage and generation speed
  /help             - Show this help message
  /exit             - Exit (also: exit, quit)

Anything else is sent as a message. Press Ctrl-C while a reply is
streaming to stop it; the partial reply is kept.
"#
    );
}

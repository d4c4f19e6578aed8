//! Command-line interface definition for lepotato
//!
//! This module defines the CLI structure using clap's derive API: an
//! interactive chat front-end plus one-shot commands for scripting.

use clap::{Parser, Subcommand};

/// lepotato - terminal client for the Le Potato chat backend
///
/// Chat with a streaming backend, browse the chat history and inspect
/// context usage from the terminal.
#[derive(Parser, Debug, Clone)]
#[command(name = "lepotato")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Override the backend base URL
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    /// Session name used for the token stats file
    #[arg(long, global = true)]
    pub session: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for lepotato
///
/// A `CHAT` argument is either a 1-based position in the chat list or a
/// chat id.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the interactive chat front-end
    Chat {
        /// Chat to open instead of the most recent one
        #[arg(long)]
        open: Option<String>,
    },

    /// List chats, most recently active first
    List {
        /// Fetch every chat instead of the first page
        #[arg(short, long)]
        all: bool,

        /// Read the local mirror instead of the backend
        #[arg(long)]
        cached: bool,
    },

    /// Print the transcript of a chat
    Show {
        /// Chat position or id
        chat: String,
    },

    /// Create a new chat
    New,

    /// Send a message and stream the reply
    Send {
        /// Message text
        message: String,

        /// Chat position or id (defaults to the most recent chat)
        #[arg(long)]
        chat: Option<String>,
    },

    /// Rename a chat
    Rename {
        /// Chat position or id
        chat: String,

        /// New title
        title: String,
    },

    /// Delete a chat
    Delete {
        /// Chat position or id
        chat: String,
    },

    /// Delete every chat
    Clear {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Show context usage of a chat
    Context {
        /// Chat position or id (defaults to the most recent chat)
        chat: Option<String>,
    },
}

impl Cli {
    /// Parse command-line arguments
    ///
    /// # Returns
    ///
    /// Returns the parsed CLI structure
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: Some("config/config.yaml".to_string()),
            verbose: false,
            base_url: None,
            session: None,
            command: Commands::Chat { open: None },
        }
    }
}

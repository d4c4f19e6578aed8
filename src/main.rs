//! lepotato - terminal chat client
//!
#![doc = "Main entry point for the lepotato terminal client."]

use anyhow::Result;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use lepotato::cli::{Cli, Commands};
use lepotato::commands::{self, history};
use lepotato::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    init_tracing(cli.verbose);

    let config_path = cli.config.as_deref().unwrap_or("config/config.yaml");
    let config = Config::load(config_path, &cli)?;

    config.validate()?;

    match cli.command {
        Commands::Chat { open } => {
            if let Some(reference) = &open {
                tracing::debug!("Opening chat: {}", reference);
            }
            commands::chat::run_chat(config, open).await?;
        }
        Commands::List { all, cached } => history::handle_list(&config, all, cached).await?,
        Commands::Show { chat } => history::handle_show(&config, &chat).await?,
        Commands::New => history::handle_new(&config).await?,
        Commands::Send { message, chat } => {
            history::handle_send(&config, &message, chat.as_deref()).await?
        }
        Commands::Rename { chat, title } => history::handle_rename(&config, &chat, &title).await?,
        Commands::Delete { chat } => history::handle_delete(&config, &chat).await?,
        Commands::Clear { yes } => history::handle_clear(&config, yes).await?,
        Commands::Context { chat } => history::handle_context(&config, chat.as_deref()).await?,
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "lepotato=debug" } else { "lepotato=info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

//! tempotune - Generate workout playlists and keep them in sync with Spotify

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod calendar;
mod cli;
mod config;
mod error;
mod openai;
mod pipeline;
mod spotify;
mod store;
mod utils;

use cli::commands::{self, Env};
use cli::{Cli, Commands, RequestCommand, UserCommand};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "tempotune=debug,reqwest=debug"
    } else {
        "tempotune=info"
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let secrets = &cli.secrets;
    let config = cli.config.as_deref();

    match cli.command {
        Commands::Auth { force, clear } => {
            commands::auth(secrets, force, clear)?;
        }
        Commands::Completion { shell } => {
            commands::completion(shell);
        }
        Commands::User { action } => {
            let env = Env::open(config)?;
            match action {
                UserCommand::Add {
                    email,
                    refresh_token,
                    calendar_url,
                    timezone,
                    no_auto_cleanup,
                    private,
                } => {
                    commands::user_add(&env, email, refresh_token, calendar_url, timezone, no_auto_cleanup, private)?;
                }
                UserCommand::List => commands::user_list(&env)?,
            }
        }
        Commands::Request { action } => {
            let env = Env::open(config)?;
            match action {
                RequestCommand::Set { user, prompt } => commands::request_set(&env, &user, &prompt)?,
                RequestCommand::Activate { id } => commands::request_activate(&env, id)?,
                RequestCommand::Delete { id } => commands::request_delete(&env, id)?,
                RequestCommand::List { user } => commands::request_list(&env, &user)?,
            }
        }
        Commands::Sweep { user } => {
            commands::sweep(&Env::open(config)?, secrets, user.as_deref()).await?;
        }
        Commands::Regenerate { playlist } => {
            commands::regenerate(&Env::open(config)?, secrets, playlist).await?;
        }
        Commands::RegenerateAll { user } => {
            commands::regenerate_all(&Env::open(config)?, secrets, &user).await?;
        }
        Commands::Cover { playlist } => {
            commands::cover(&Env::open(config)?, secrets, playlist).await?;
        }
        Commands::Lock { playlist } => {
            commands::lock(&Env::open(config)?, playlist)?;
        }
        Commands::Follow { playlist } => {
            commands::follow(&Env::open(config)?, secrets, playlist, true).await?;
        }
        Commands::Unfollow { playlist } => {
            commands::follow(&Env::open(config)?, secrets, playlist, false).await?;
        }
        Commands::DeleteActivity { activity } => {
            commands::delete_activity(&Env::open(config)?, secrets, activity).await?;
        }
        Commands::Status { user, limit } => {
            commands::status(&Env::open(config)?, user.as_deref(), limit)?;
        }
        Commands::Cleanup { user } => {
            commands::cleanup(&Env::open(config)?, secrets, user.as_deref()).await?;
        }
        Commands::Worker { interval } => {
            commands::worker(&Env::open(config)?, secrets, interval).await?;
        }
    }

    Ok(())
}

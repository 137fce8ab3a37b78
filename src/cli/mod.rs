//! CLI module for tempotune

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

pub mod auth;
pub mod commands;

pub use auth::AuthManager;

#[derive(Parser, Debug)]
#[command(name = "tempotune", about = "Generate workout playlists and keep them in sync with Spotify")]
#[command(version, author)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file (defaults to the user config directory)
    #[arg(long, global = true, env = "TEMPOTUNE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub secrets: SecretArgs,
}

/// API secrets; anything missing here is read from the keyring
#[derive(Args, Debug, Clone, Default)]
pub struct SecretArgs {
    /// OpenAI API key
    #[arg(long, global = true, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    /// Spotify application client id
    #[arg(long, global = true, env = "SPOTIFY_CLIENT_ID")]
    pub spotify_client_id: Option<String>,

    /// Spotify application client secret
    #[arg(long, global = true, env = "SPOTIFY_CLIENT_SECRET", hide_env_values = true)]
    pub spotify_client_secret: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Store API secrets in the system keyring
    Auth {
        /// Prompt again even if secrets are already stored
        #[arg(long)]
        force: bool,

        /// Remove stored secrets
        #[arg(long, conflicts_with = "force")]
        clear: bool,
    },

    /// Manage users
    User {
        #[command(subcommand)]
        action: UserCommand,
    },

    /// Manage music requests (the taste prompt used for generation)
    Request {
        #[command(subcommand)]
        action: RequestCommand,
    },

    /// Pull today's workouts from the calendar and start new playlists
    Sweep {
        /// Only sweep this user (email)
        #[arg(short, long)]
        user: Option<String>,
    },

    /// Regenerate one playlist
    Regenerate {
        #[arg(value_name = "PLAYLIST_ID")]
        playlist: i64,
    },

    /// Regenerate all of today's unlocked playlists for a user
    RegenerateAll {
        /// User email
        user: String,
    },

    /// Generate a new cover for a published playlist
    Cover {
        #[arg(value_name = "PLAYLIST_ID")]
        playlist: i64,
    },

    /// Toggle the lock on a playlist
    Lock {
        #[arg(value_name = "PLAYLIST_ID")]
        playlist: i64,
    },

    /// Follow a published playlist again
    Follow {
        #[arg(value_name = "PLAYLIST_ID")]
        playlist: i64,
    },

    /// Remove a published playlist from the library
    Unfollow {
        #[arg(value_name = "PLAYLIST_ID")]
        playlist: i64,
    },

    /// Delete an activity and its playlist
    DeleteActivity {
        #[arg(value_name = "ACTIVITY_ID")]
        activity: i64,
    },

    /// Show recent playlists and their state
    Status {
        /// Only show this user (email)
        #[arg(short, long)]
        user: Option<String>,

        /// Number of playlists per user
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Unfollow stale playlists and remove old or vanished activities
    Cleanup {
        /// Only clean up this user (email)
        #[arg(short, long)]
        user: Option<String>,
    },

    /// Run the task queue until interrupted, sweeping on an interval
    Worker {
        /// Minutes between sweeps (overrides the config)
        #[arg(short, long)]
        interval: Option<u64>,
    },

    /// Generate shell completions
    Completion {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand, Debug)]
pub enum UserCommand {
    /// Register a user
    Add {
        email: String,

        /// Spotify refresh token for the user's account
        #[arg(long, env = "SPOTIFY_REFRESH_TOKEN", hide_env_values = true)]
        refresh_token: Option<String>,

        /// iCalendar feed with the user's workouts
        #[arg(long)]
        calendar_url: Option<String>,

        /// IANA timezone such as America/Denver, or a UTC offset such as +02:00
        #[arg(long, default_value = "UTC")]
        timezone: String,

        /// Keep old playlists in the library
        #[arg(long)]
        no_auto_cleanup: bool,

        /// Create playlists as private
        #[arg(long)]
        private: bool,
    },

    /// List users
    List,
}

#[derive(Subcommand, Debug)]
pub enum RequestCommand {
    /// Set and activate the music request of a user
    Set {
        /// User email
        user: String,
        prompt: String,
    },

    /// Make an earlier request active again
    Activate {
        #[arg(value_name = "REQUEST_ID")]
        id: i64,
    },

    /// Delete a request
    Delete {
        #[arg(value_name = "REQUEST_ID")]
        id: i64,
    },

    /// List the requests of a user
    List {
        /// User email
        user: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parses_nested_request_command() {
        let cli = Cli::try_parse_from(["tempotune", "request", "set", "a@example.com", "90s house"]).unwrap();
        match cli.command {
            Commands::Request {
                action: RequestCommand::Set { user, prompt },
            } => {
                assert_eq!(user, "a@example.com");
                assert_eq!(prompt, "90s house");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_regenerate_needs_numeric_id() {
        assert!(Cli::try_parse_from(["tempotune", "regenerate", "seven"]).is_err());
        assert!(Cli::try_parse_from(["tempotune", "regenerate", "7"]).is_ok());
    }
}

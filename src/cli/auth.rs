//! Keyring-based storage for API secrets

use anyhow::{Context, Result};
use dialoguer::{Input, Password};
use keyring::Entry;
use tracing::{debug, info};

use super::SecretArgs;
use crate::spotify::SpotifyCredentials;

const KEYRING_SERVICE: &str = "tempotune";

const OPENAI_API_KEY: &str = "openai:api_key";
const SPOTIFY_CLIENT_ID: &str = "spotify:client_id";
const SPOTIFY_CLIENT_SECRET: &str = "spotify:client_secret";

/// Everything needed to talk to the external services
#[derive(Debug, Clone)]
pub struct Secrets {
    pub openai_api_key: String,
    pub spotify: SpotifyCredentials,
}

/// Manages API secret storage
pub struct AuthManager;

impl AuthManager {
    /// Store secrets, prompting for whatever was not passed in
    ///
    /// Values already in the keyring are kept unless `force` is set.
    pub fn configure(args: &SecretArgs, force: bool) -> Result<Secrets> {
        if force {
            debug!("Force flag set, ignoring stored secrets");
        }

        let openai_api_key = Self::value_or_prompt(OPENAI_API_KEY, &args.openai_api_key, force, || {
            Password::new()
                .with_prompt("OpenAI API key")
                .interact()
                .context("Failed to read API key")
        })?;
        let client_id = Self::value_or_prompt(SPOTIFY_CLIENT_ID, &args.spotify_client_id, force, || {
            Input::<String>::new()
                .with_prompt("Spotify client id")
                .interact_text()
                .context("Failed to read client id")
        })?;
        let client_secret =
            Self::value_or_prompt(SPOTIFY_CLIENT_SECRET, &args.spotify_client_secret, force, || {
                Password::new()
                    .with_prompt("Spotify client secret")
                    .interact()
                    .context("Failed to read client secret")
            })?;

        Self::store(OPENAI_API_KEY, &openai_api_key)?;
        Self::store(SPOTIFY_CLIENT_ID, &client_id)?;
        Self::store(SPOTIFY_CLIENT_SECRET, &client_secret)?;
        info!("Secrets stored in keyring");

        Ok(Secrets {
            openai_api_key,
            spotify: SpotifyCredentials { client_id, client_secret },
        })
    }

    /// Secrets from the command line or environment, falling back to the keyring
    pub fn load(args: &SecretArgs) -> Result<Secrets> {
        let openai_api_key = Self::resolve(OPENAI_API_KEY, &args.openai_api_key)?;
        let client_id = Self::resolve(SPOTIFY_CLIENT_ID, &args.spotify_client_id)?;
        let client_secret = Self::resolve(SPOTIFY_CLIENT_SECRET, &args.spotify_client_secret)?;

        Ok(Secrets {
            openai_api_key,
            spotify: SpotifyCredentials { client_id, client_secret },
        })
    }

    /// Clear stored secrets
    pub fn clear() -> Result<()> {
        for key in [OPENAI_API_KEY, SPOTIFY_CLIENT_ID, SPOTIFY_CLIENT_SECRET] {
            let _ = Self::get_entry(key)?.delete_credential();
        }
        info!("Secrets cleared from keyring");
        Ok(())
    }

    fn resolve(key: &str, provided: &Option<String>) -> Result<String> {
        if let Some(value) = non_empty(provided) {
            return Ok(value);
        }
        Self::get_entry(key)?
            .get_password()
            .with_context(|| format!("No {key} configured. Run 'tempotune auth' first."))
    }

    fn value_or_prompt(
        key: &str,
        provided: &Option<String>,
        force: bool,
        prompt: impl FnOnce() -> Result<String>,
    ) -> Result<String> {
        if let Some(value) = non_empty(provided) {
            return Ok(value);
        }
        if !force {
            if let Ok(value) = Self::get_entry(key)?.get_password() {
                debug!("Keeping stored {}", key);
                return Ok(value);
            }
        }
        let value = prompt()?;
        non_empty(&Some(value)).with_context(|| format!("{key} cannot be empty"))
    }

    fn store(key: &str, value: &str) -> Result<()> {
        Self::get_entry(key)?
            .set_password(value)
            .with_context(|| format!("Failed to store {key} in keyring"))
    }

    /// Get a keyring entry for a given key
    fn get_entry(key: &str) -> Result<Entry> {
        Entry::new(KEYRING_SERVICE, key).context("Failed to access keyring")
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_secrets_skip_the_keyring() {
        let args = SecretArgs {
            openai_api_key: Some(" sk-test ".into()),
            spotify_client_id: Some("client".into()),
            spotify_client_secret: Some("secret".into()),
        };

        let secrets = AuthManager::load(&args).unwrap();
        assert_eq!(secrets.openai_api_key, "sk-test");
        assert_eq!(secrets.spotify.client_id, "client");
        assert_eq!(secrets.spotify.client_secret, "secret");
    }

    #[test]
    fn test_blank_values_are_ignored() {
        assert_eq!(non_empty(&Some("   ".into())), None);
        assert_eq!(non_empty(&None), None);
        assert_eq!(non_empty(&Some("x".into())), Some("x".into()));
    }
}

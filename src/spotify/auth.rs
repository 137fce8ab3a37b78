//! Spotify authentication
//!
//! Sessions are opened by exchanging the user's long-lived refresh token for a
//! short-lived access token (OAuth refresh-token grant, client credentials in
//! a basic auth header).

use reqwest::Client;
use tracing::debug;

use super::models::TokenResponse;
use crate::error::{PipelineError, PipelineResult};
use crate::utils::http::{check_status, send_error};

const SERVICE: &str = "spotify";

/// Application credentials registered with Spotify
#[derive(Debug, Clone)]
pub struct SpotifyCredentials {
    pub client_id: String,
    pub client_secret: String,
}

/// Exchange a refresh token for an access token
pub async fn refresh_access_token(
    http: &Client,
    accounts_url: &str,
    credentials: &SpotifyCredentials,
    refresh_token: &str,
) -> PipelineResult<String> {
    let url = format!("{}/api/token", accounts_url.trim_end_matches('/'));
    debug!("Refreshing Spotify access token");

    let response = http
        .post(&url)
        .basic_auth(&credentials.client_id, Some(&credentials.client_secret))
        .form(&[("grant_type", "refresh_token"), ("refresh_token", refresh_token)])
        .send()
        .await
        .map_err(|e| send_error(SERVICE, e))?;

    let token: TokenResponse = check_status(SERVICE, response)
        .await?
        .json()
        .await
        .map_err(|e| PipelineError::upstream(SERVICE, None, format!("Failed to parse token response: {e}")))?;

    debug!("Got access token (expires in {:?}s)", token.expires_in);
    Ok(token.access_token)
}

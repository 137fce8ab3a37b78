//! Spotify Web API HTTP client

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::debug;

use super::auth::{refresh_access_token, SpotifyCredentials};
use super::models::*;
use crate::config::ServiceSettings;
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::services::{CatalogTrack, MusicProvider, MusicSession};
use crate::store::User;
use crate::utils::http::{build_client, check_status, send_error};

const SERVICE: &str = "spotify";

/// Maximum URIs per add/replace request
const TRACKS_PER_REQUEST: usize = 100;

/// Spotify limits on playlist text fields
const MAX_NAME_CHARS: usize = 100;
const MAX_DESCRIPTION_CHARS: usize = 300;

/// Opens per-user Spotify sessions
#[derive(Clone)]
pub struct SpotifyProvider {
    api_url: String,
    accounts_url: String,
    credentials: SpotifyCredentials,
    http_client: Client,
}

impl SpotifyProvider {
    pub fn new(settings: &ServiceSettings, credentials: SpotifyCredentials) -> PipelineResult<Self> {
        Ok(Self {
            api_url: settings.spotify_api_url.trim_end_matches('/').to_string(),
            accounts_url: settings.spotify_accounts_url.clone(),
            credentials,
            http_client: build_client()?,
        })
    }
}

#[async_trait]
impl MusicProvider for SpotifyProvider {
    async fn connect(&self, user: &User) -> PipelineResult<Arc<dyn MusicSession>> {
        let access_token = refresh_access_token(
            &self.http_client,
            &self.accounts_url,
            &self.credentials,
            &user.refresh_token,
        )
        .await?;

        let mut session = SpotifySession {
            api_url: self.api_url.clone(),
            access_token,
            user_id: String::new(),
            http_client: self.http_client.clone(),
        };
        let me: CurrentUser = session.get_json(session.get("/me")).await?;
        debug!(user_id = user.id, "Connected to Spotify as {}", me.id);
        session.user_id = me.id;

        Ok(Arc::new(session))
    }
}

/// An authenticated Spotify session for one user
pub struct SpotifySession {
    api_url: String,
    access_token: String,
    user_id: String,
    http_client: Client,
}

impl SpotifySession {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.http_client.get(self.url(path)).bearer_auth(&self.access_token)
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.http_client.post(self.url(path)).bearer_auth(&self.access_token)
    }

    fn put(&self, path: &str) -> RequestBuilder {
        self.http_client.put(self.url(path)).bearer_auth(&self.access_token)
    }

    fn delete(&self, path: &str) -> RequestBuilder {
        self.http_client.delete(self.url(path)).bearer_auth(&self.access_token)
    }

    async fn send(&self, request: RequestBuilder) -> PipelineResult<reqwest::Response> {
        let response = request.send().await.map_err(|e| send_error(SERVICE, e))?;
        check_status(SERVICE, response).await
    }

    async fn get_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> PipelineResult<T> {
        self.send(request)
            .await?
            .json()
            .await
            .map_err(|e| PipelineError::upstream(SERVICE, None, format!("Failed to parse response: {e}")))
    }
}

#[async_trait]
impl MusicSession for SpotifySession {
    fn provider_user_id(&self) -> &str {
        &self.user_id
    }

    async fn search_track(&self, title: &str, artist: &str) -> PipelineResult<Option<CatalogTrack>> {
        let query = search_query(title, artist);
        debug!("Searching Spotify: {}", query);

        let response: SearchResponse = self
            .get_json(
                self.get("/search")
                    .query(&[("q", query.as_str()), ("type", "track"), ("limit", "1")]),
            )
            .await?;

        Ok(response.tracks.items.into_iter().next().map(|item| CatalogTrack {
            uri: item.uri,
            duration_ms: item.duration_ms,
        }))
    }

    async fn create_playlist(&self, name: &str, description: &str, public: bool) -> PipelineResult<String> {
        let name = clean_text(name, MAX_NAME_CHARS);
        let description = clean_text(description, MAX_DESCRIPTION_CHARS);
        debug!("Creating Spotify playlist {:?}", name);

        let created: PlaylistRef = self
            .get_json(
                self.post(&format!("/users/{}/playlists", self.user_id))
                    .json(&CreatePlaylist { name: &name, description: &description, public }),
            )
            .await?;
        Ok(created.id)
    }

    async fn update_playlist(&self, external_id: &str, name: &str, description: &str) -> PipelineResult<()> {
        let name = clean_text(name, MAX_NAME_CHARS);
        let description = clean_text(description, MAX_DESCRIPTION_CHARS);
        debug!("Updating Spotify playlist {}", external_id);

        self.send(
            self.put(&format!("/playlists/{external_id}"))
                .json(&UpdatePlaylist { name: &name, description: &description }),
        )
        .await?;
        Ok(())
    }

    async fn replace_tracks(&self, external_id: &str, uris: &[String]) -> PipelineResult<()> {
        debug!("Replacing {} tracks on Spotify playlist {}", uris.len(), external_id);

        let path = format!("/playlists/{external_id}/tracks");
        let mut chunks = uris.chunks(TRACKS_PER_REQUEST);

        // The first request replaces everything, the rest append in order
        let first = chunks.next().unwrap_or(&[]);
        self.send(self.put(&path).json(&TrackUris { uris: first })).await?;

        for chunk in chunks {
            self.send(self.post(&path).json(&TrackUris { uris: chunk })).await?;
        }
        Ok(())
    }

    async fn set_cover(&self, external_id: &str, jpeg: &[u8]) -> PipelineResult<()> {
        let payload = STANDARD.encode(jpeg);
        debug!("Uploading {} byte cover to Spotify playlist {}", payload.len(), external_id);

        self.send(
            self.put(&format!("/playlists/{external_id}/images"))
                .header(CONTENT_TYPE, "image/jpeg")
                .body(payload),
        )
        .await?;
        Ok(())
    }

    async fn follow(&self, external_id: &str) -> PipelineResult<()> {
        debug!("Following Spotify playlist {}", external_id);
        self.send(
            self.put(&format!("/playlists/{external_id}/followers"))
                .json(&serde_json::json!({})),
        )
        .await?;
        Ok(())
    }

    async fn unfollow(&self, external_id: &str) -> PipelineResult<()> {
        debug!("Unfollowing Spotify playlist {}", external_id);
        self.send(self.delete(&format!("/playlists/{external_id}/followers")))
            .await?;
        Ok(())
    }
}

/// Field-filtered search query for one candidate
pub fn search_query(title: &str, artist: &str) -> String {
    format!("{} artist:{}", title.trim(), artist.trim())
}

/// Single-line text truncated to `max` characters
fn clean_text(text: &str, max: usize) -> String {
    let single_line = text.split_whitespace().collect::<Vec<_>>().join(" ");
    single_line.chars().take(max).collect()
}

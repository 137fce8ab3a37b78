//! Spotify Web API request and response models

use serde::{Deserialize, Serialize};

/// Token endpoint response for the refresh-token grant
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// Current user profile (`GET /me`)
#[derive(Debug, Clone, Deserialize)]
pub struct CurrentUser {
    pub id: String,
}

// Search response (`GET /search?type=track`)
#[derive(Debug, Clone, Deserialize)]
pub struct SearchResponse {
    pub tracks: TrackPage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackPage {
    #[serde(default)]
    pub items: Vec<TrackItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackItem {
    pub uri: String,
    pub duration_ms: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatePlaylist<'a> {
    pub name: &'a str,
    pub description: &'a str,
    pub public: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdatePlaylist<'a> {
    pub name: &'a str,
    pub description: &'a str,
}

/// Created playlist (only the id is needed)
#[derive(Debug, Clone, Deserialize)]
pub struct PlaylistRef {
    pub id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackUris<'a> {
    pub uris: &'a [String],
}

/// Error envelope returned by the Web API
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    pub error: ApiError,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiError {
    #[serde(default)]
    pub message: String,
}

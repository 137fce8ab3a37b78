//! Seams to the external services the pipeline depends on

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::sync::Arc;

use crate::error::PipelineResult;
use crate::store::{NewActivity, User};

/// Language model that answers with a JSON object
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    /// `user_tag` identifies the end user to the provider for abuse tracking
    async fn complete_json(&self, system: &str, user: &str, user_tag: &str) -> PipelineResult<Value>;
}

/// A catalog match for a generated candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogTrack {
    pub uri: String,
    pub duration_ms: i64,
}

/// Opens authenticated sessions against the music service
#[async_trait]
pub trait MusicProvider: Send + Sync {
    /// Exchange the user's refresh token for a session
    async fn connect(&self, user: &User) -> PipelineResult<Arc<dyn MusicSession>>;
}

/// Catalog search and playlist management for one user
#[async_trait]
pub trait MusicSession: Send + Sync {
    fn provider_user_id(&self) -> &str;

    /// First catalog match for `title` by `artist`, if any
    async fn search_track(&self, title: &str, artist: &str) -> PipelineResult<Option<CatalogTrack>>;

    /// Create a playlist and return its external id
    async fn create_playlist(&self, name: &str, description: &str, public: bool) -> PipelineResult<String>;

    async fn update_playlist(&self, external_id: &str, name: &str, description: &str) -> PipelineResult<()>;

    /// Replace the whole track list; calling twice with the same list is a no-op
    async fn replace_tracks(&self, external_id: &str, uris: &[String]) -> PipelineResult<()>;

    /// Upload a JPEG cover
    async fn set_cover(&self, external_id: &str, jpeg: &[u8]) -> PipelineResult<()>;

    async fn follow(&self, external_id: &str) -> PipelineResult<()>;

    async fn unfollow(&self, external_id: &str) -> PipelineResult<()>;
}

/// Text-to-image generation
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Location of a generated image, or `None` when the service declined
    async fn generate(&self, prompt: &str, user_tag: &str) -> PipelineResult<Option<String>>;

    async fn download(&self, url: &str) -> PipelineResult<Bytes>;
}

/// Scheduled workouts for today
#[async_trait]
pub trait WorkoutSource: Send + Sync {
    async fn todays_activities(&self, calendar_url: &str, timezone: &str) -> PipelineResult<Vec<NewActivity>>;
}

/// The external collaborators, bundled for the orchestrator
#[derive(Clone)]
pub struct Services {
    pub generator: Arc<dyn ContentGenerator>,
    pub music: Arc<dyn MusicProvider>,
    pub images: Arc<dyn ImageGenerator>,
    pub workouts: Arc<dyn WorkoutSource>,
}

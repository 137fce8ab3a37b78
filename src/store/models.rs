//! Row types persisted by the store

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    /// Spotify user id, learned on the first authenticated session
    pub provider_user_id: Option<String>,
    #[serde(skip_serializing)]
    pub refresh_token: String,
    pub calendar_url: Option<String>,
    /// IANA name such as `America/Denver`, or a UTC offset such as `+02:00`
    pub timezone: String,
    pub auto_cleanup: bool,
    pub public_playlists: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub refresh_token: String,
    pub calendar_url: Option<String>,
    pub timezone: String,
    pub auto_cleanup: bool,
    pub public_playlists: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MusicRequest {
    pub id: i64,
    pub user_id: i64,
    pub prompt: String,
    pub active: bool,
    pub last_used_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Activity {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    /// Description as it appeared in the calendar feed
    pub original_description: String,
    pub duration_minutes: i64,
    pub description: Option<String>,
    pub sport: Option<String>,
    pub activity_type: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Activity {
    pub fn duration_ms(&self) -> i64 {
        self.duration_minutes * 60_000
    }

    pub fn has_details(&self) -> bool {
        self.description.as_deref().is_some_and(|d| !d.is_empty())
            && self.sport.is_some()
            && self.activity_type.is_some()
    }

    /// Generated description if present, otherwise the calendar one
    pub fn effective_description(&self) -> &str {
        match self.description.as_deref() {
            Some(d) if !d.is_empty() => d,
            _ => &self.original_description,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewActivity {
    pub name: String,
    pub original_description: String,
    pub duration_minutes: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityDetails {
    pub description: String,
    pub sport: String,
    pub activity_type: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Playlist {
    pub id: i64,
    pub user_id: i64,
    pub activity_id: i64,
    pub music_request_id: Option<i64>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub cover_prompt: Option<String>,
    /// Spotify playlist id, set on first sync
    pub external_id: Option<String>,
    pub locked: bool,
    pub processing: bool,
    pub generating_cover_image: bool,
    pub following: bool,
    pub cover_image_url: Option<String>,
    pub cover_image_updated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Playlist {
    pub fn has_cover_prompt(&self) -> bool {
        self.cover_prompt.as_deref().is_some_and(|p| !p.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Track {
    pub id: i64,
    pub playlist_id: i64,
    pub title: String,
    pub artist: String,
    pub provider_uri: Option<String>,
    pub duration_ms: Option<i64>,
    /// Catalog search already came back empty for this candidate
    pub catalog_miss: bool,
    pub position: i64,
    /// Candidate awaiting resolution, not part of the visible list
    pub staged: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTrack {
    pub artist: String,
    pub title: String,
}

/// Generation output waiting for resolution to commit it
#[derive(Debug, Clone)]
pub struct PlaylistDraft {
    pub playlist_id: i64,
    pub name: String,
    pub description: String,
    pub cover_prompt: String,
    pub extension_rounds: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDraft {
    pub name: String,
    pub description: String,
    pub cover_prompt: String,
}

/// Outcome of a catalog lookup for one staged candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Found {
        track_id: i64,
        uri: String,
        duration_ms: i64,
    },
    Miss {
        track_id: i64,
    },
}

/// Result of trying to make a draft visible
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed { tracks: usize },
    /// The playlist was locked (or stopped processing) before commit
    Refused,
}

//! Pipeline tasks and their scheduling policy
//!
//! A task only carries ids. Every stage re-reads what it needs from the
//! store when it runs, so a task that sat in the queue (or was retried)
//! always works on current state.

use rand::Rng;
use std::fmt;
use std::time::Duration;

/// Queue class a task is dispatched from
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    High,
    Default,
    Low,
}

/// How many times a failed task runs and how long it may wait in between
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub const STANDARD: RetryPolicy = RetryPolicy {
        max_attempts: 3,
        max_delay: Duration::from_secs(60),
    };

    /// Cover uploads are best-effort but the provider is flaky about them
    pub const EXTENDED: RetryPolicy = RetryPolicy {
        max_attempts: 12,
        max_delay: Duration::from_secs(5 * 60),
    };

    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    /// Fill in generated description, sport and type, then generate
    EnrichActivity { playlist_id: i64 },
    GeneratePlaylist { playlist_id: i64 },
    /// Ask for more candidates after resolution ran dry
    ExtendTracks { playlist_id: i64 },
    ResolveTracks { playlist_id: i64 },
    SyncPlaylist { playlist_id: i64 },
    GenerateCover { playlist_id: i64 },
    SetCover { playlist_id: i64 },
    Follow { user_id: i64, external_id: String },
    Unfollow { user_id: i64, external_id: String },
}

impl Task {
    pub fn priority(&self) -> Priority {
        match self {
            Task::EnrichActivity { .. }
            | Task::GeneratePlaylist { .. }
            | Task::ExtendTracks { .. }
            | Task::ResolveTracks { .. } => Priority::High,
            Task::SyncPlaylist { .. } | Task::GenerateCover { .. } | Task::SetCover { .. } => {
                Priority::Default
            }
            Task::Follow { .. } | Task::Unfollow { .. } => Priority::Low,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            Task::SetCover { .. } => RetryPolicy::EXTENDED,
            _ => RetryPolicy::STANDARD,
        }
    }

    /// Playlist the task works on, if it is a playlist stage
    pub fn playlist_id(&self) -> Option<i64> {
        match self {
            Task::EnrichActivity { playlist_id }
            | Task::GeneratePlaylist { playlist_id }
            | Task::ExtendTracks { playlist_id }
            | Task::ResolveTracks { playlist_id }
            | Task::SyncPlaylist { playlist_id }
            | Task::GenerateCover { playlist_id }
            | Task::SetCover { playlist_id } => Some(*playlist_id),
            Task::Follow { .. } | Task::Unfollow { .. } => None,
        }
    }

    /// Stages that run while the playlist is `processing`
    pub fn is_content_stage(&self) -> bool {
        matches!(
            self,
            Task::EnrichActivity { .. }
                | Task::GeneratePlaylist { .. }
                | Task::ExtendTracks { .. }
                | Task::ResolveTracks { .. }
                | Task::SyncPlaylist { .. }
        )
    }

    /// Stages that run while the playlist is `generating_cover_image`
    pub fn is_cover_stage(&self) -> bool {
        matches!(self, Task::GenerateCover { .. } | Task::SetCover { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Task::EnrichActivity { .. } => "enrich_activity",
            Task::GeneratePlaylist { .. } => "generate_playlist",
            Task::ExtendTracks { .. } => "extend_tracks",
            Task::ResolveTracks { .. } => "resolve_tracks",
            Task::SyncPlaylist { .. } => "sync_playlist",
            Task::GenerateCover { .. } => "generate_cover",
            Task::SetCover { .. } => "set_cover",
            Task::Follow { .. } => "follow",
            Task::Unfollow { .. } => "unfollow",
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::Follow { external_id, .. } | Task::Unfollow { external_id, .. } => {
                write!(f, "{}({})", self.name(), external_id)
            }
            _ => match self.playlist_id() {
                Some(id) => write!(f, "{}(playlist {})", self.name(), id),
                None => f.write_str(self.name()),
            },
        }
    }
}

/// Delay before retry number `attempt` (1-based count of failures so far)
///
/// Doubles from `base`, never exceeds `max`, and adds up to a quarter of
/// jitter on top of the doubled value (still clamped to `max`).
pub fn backoff_delay(base: Duration, attempt: u32, max: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(20);
    let doubled = base.saturating_mul(1u32 << exponent).min(max);

    let jitter_ms = (doubled.as_millis() / 4) as u64;
    let jitter = if jitter_ms > 0 {
        Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    } else {
        Duration::ZERO
    };

    (doubled + jitter).min(max)
}

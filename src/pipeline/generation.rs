//! Content generation: prompts, calls and response validation
//!
//! The language model is asked for JSON objects. Responses are validated in
//! full before anything is written, so a malformed answer never touches the
//! store.

use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

use super::services::ContentGenerator;
use crate::error::{PipelineError, PipelineResult};
use crate::store::{Activity, ActivityDetails, NewDraft, NewTrack, Track};

const PLAYLIST_SYSTEM_PROMPT: &str = r#"You are a music assistant that builds a cohesive Spotify playlist for the user's workout of the day.

- You will receive the name and description of the workout, followed by the user's music preferences.
- Match the energy of the songs to the intensity of the workout: easy efforts get mellow songs, hard efforts get intense, energetic songs.
- The playlist must contain at least 100 songs.
- Use the genres and artists the user likes as a guide, and leave out anything they ask to avoid.
- Aim for variety and avoid repeating the same artist.
- You may also receive a list of songs used in previous playlists. Do not include them.
- Name the playlist with the name of the workout, followed by a colon, followed by a short description of the workout.
- Write a description that summarizes the workout at a glance, in no more than 300 characters.
- Write a detailed prompt for an image generator to create a cover for the playlist that represents the workout creatively. Avoid anything that could violate the image generator's content policy.

Respond with a JSON object with exactly this structure:

{
  "name": "Workout name: short description",
  "description": "Summary of the workout.",
  "cover_prompt": "Prompt for the cover image.",
  "tracks": [
    {"artist": "Artist Name 1", "track": "Track Name 1"},
    {"artist": "Artist Name 2", "track": "Track Name 2"}
  ]
}"#;

const EXTENSION_SYSTEM_PROMPT: &str = r#"You are a music assistant that suggests songs to add to the user's Spotify playlist.

- You will receive the songs currently in the playlist and must suggest new ones that fit with them.
- Suggest at least 50 songs.
- Use the genres and artists the user likes as a guide, and leave out anything they ask to avoid.
- You may receive a list of songs used in other playlists. Do not include them.
- Do not suggest songs with long stretches of silence, such as songs with hidden tracks.

Respond with a JSON object with exactly this structure:

{
  "tracks": [
    {"artist": "Artist Name 1", "track": "Track Name 1"},
    {"artist": "Artist Name 2", "track": "Track Name 2"}
  ]
}"#;

const DETAILS_SYSTEM_PROMPT: &str = r#"You are a fitness assistant that turns a short text about an exercise activity into structured data.

- You will receive the name of the activity, followed by its description.
- Write a new description that summarizes the activity in about 300 characters, adding detail if the original is very short.
- Determine the sport, usually "Cycling", "Running" or "Swimming", but possibly something else such as "Yoga" or "Strength Training".
- Determine the type of activity, either "Workout" or "Race".

Respond with a JSON object with exactly this structure:

{
  "name": "Name of the activity",
  "description": "About 300 characters summarizing the activity.",
  "sport": "Sport of the activity",
  "activity_type": "Workout or Race"
}"#;

/// Everything the model needs to write a playlist
#[derive(Debug, Clone)]
pub struct PlaylistContext<'a> {
    pub workout_name: &'a str,
    pub workout_description: &'a str,
    pub music_request: &'a str,
    /// Pre-formatted list of tracks to avoid, may be empty
    pub exclusions: &'a str,
}

/// A validated generation result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedPlaylist {
    pub draft: NewDraft,
    pub tracks: Vec<NewTrack>,
}

pub fn playlist_prompt(context: &PlaylistContext<'_>) -> String {
    format!(
        "{}\n{}\n\n{}\n\n{}",
        context.workout_name, context.workout_description, context.music_request, context.exclusions
    )
}

pub fn extension_prompt(current: &[Track], music_request: &str, exclusions: &str) -> String {
    let listing: Vec<String> = current
        .iter()
        .map(|track| format!("- {} - {}", track.artist, track.title))
        .collect();
    format!(
        "Here are the songs currently in the playlist:\n{}\n\n{}\n\n{}",
        listing.join("\n"),
        music_request,
        exclusions
    )
}

pub fn details_prompt(activity: &Activity) -> String {
    format!("{}\n\n{}", activity.name, activity.original_description)
}

fn as_object(value: &Value) -> PipelineResult<&Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| PipelineError::InvalidGenerationResponse("response is not an object".into()))
}

/// A present, non-blank string field
fn required_str(object: &Map<String, Value>, key: &str) -> PipelineResult<String> {
    match object.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
        Some(Value::String(_)) => Err(PipelineError::InvalidGenerationResponse(format!("`{key}` is empty"))),
        Some(_) => Err(PipelineError::InvalidGenerationResponse(format!("`{key}` is not a string"))),
        None => Err(PipelineError::InvalidGenerationResponse(format!("`{key}` is missing"))),
    }
}

/// `tracks` must be a non-empty list of `{artist, track}` objects
fn required_tracks(object: &Map<String, Value>) -> PipelineResult<Vec<NewTrack>> {
    let items = match object.get("tracks") {
        Some(Value::Array(items)) if !items.is_empty() => items,
        Some(Value::Array(_)) => {
            return Err(PipelineError::InvalidGenerationResponse("`tracks` is empty".into()));
        }
        Some(_) => {
            return Err(PipelineError::InvalidGenerationResponse("`tracks` is not a list".into()));
        }
        None => return Err(PipelineError::InvalidGenerationResponse("`tracks` is missing".into())),
    };

    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let entry = item.as_object().ok_or_else(|| {
                PipelineError::InvalidGenerationResponse(format!("track {index} is not an object"))
            })?;
            let field = |key: &str| {
                required_str(entry, key).map_err(|e| {
                    PipelineError::InvalidGenerationResponse(format!("track {index}: {}", reason(&e)))
                })
            };
            Ok(NewTrack {
                artist: field("artist")?,
                title: field("track")?,
            })
        })
        .collect()
}

fn reason(error: &PipelineError) -> String {
    match error {
        PipelineError::InvalidGenerationResponse(reason) => reason.clone(),
        other => other.to_string(),
    }
}

pub fn validate_playlist(value: &Value) -> PipelineResult<GeneratedPlaylist> {
    let object = as_object(value)?;
    Ok(GeneratedPlaylist {
        draft: NewDraft {
            name: required_str(object, "name")?,
            description: required_str(object, "description")?,
            cover_prompt: required_str(object, "cover_prompt")?,
        },
        tracks: required_tracks(object)?,
    })
}

pub fn validate_tracks(value: &Value) -> PipelineResult<Vec<NewTrack>> {
    required_tracks(as_object(value)?)
}

pub fn validate_details(value: &Value) -> PipelineResult<ActivityDetails> {
    let object = as_object(value)?;
    // The model echoes the name back; it must be there but is not stored
    required_str(object, "name")?;
    Ok(ActivityDetails {
        description: required_str(object, "description")?,
        sport: required_str(object, "sport")?,
        activity_type: required_str(object, "activity_type")?,
    })
}

/// Prompts, calls and validates against a [`ContentGenerator`]
#[derive(Clone)]
pub struct ContentGeneration {
    generator: Arc<dyn ContentGenerator>,
}

impl ContentGeneration {
    pub fn new(generator: Arc<dyn ContentGenerator>) -> Self {
        Self { generator }
    }

    pub async fn generate_playlist(
        &self,
        context: &PlaylistContext<'_>,
        user_tag: &str,
    ) -> PipelineResult<GeneratedPlaylist> {
        let response = self
            .generator
            .complete_json(PLAYLIST_SYSTEM_PROMPT, &playlist_prompt(context), user_tag)
            .await?;
        let generated = validate_playlist(&response)?;
        debug!("Generated {} candidate tracks", generated.tracks.len());
        Ok(generated)
    }

    pub async fn more_tracks(
        &self,
        current: &[Track],
        music_request: &str,
        exclusions: &str,
        user_tag: &str,
    ) -> PipelineResult<Vec<NewTrack>> {
        let response = self
            .generator
            .complete_json(
                EXTENSION_SYSTEM_PROMPT,
                &extension_prompt(current, music_request, exclusions),
                user_tag,
            )
            .await?;
        let tracks = validate_tracks(&response)?;
        debug!("Generated {} extra candidate tracks", tracks.len());
        Ok(tracks)
    }

    pub async fn describe_activity(&self, activity: &Activity, user_tag: &str) -> PipelineResult<ActivityDetails> {
        let response = self
            .generator
            .complete_json(DETAILS_SYSTEM_PROMPT, &details_prompt(activity), user_tag)
            .await?;
        validate_details(&response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn valid() -> Value {
        json!({
            "name": "Pettit: steady aerobic endurance",
            "description": "An hour of Zone 2 with short cadence drills.",
            "cover_prompt": "A lone cyclist on a misty valley road at sunrise",
            "tracks": [
                {"artist": "Queen", "track": "Don't Stop Me Now"},
                {"artist": "Daft Punk", "track": "Harder, Better, Faster, Stronger"}
            ]
        })
    }

    #[test]
    fn test_valid_playlist() {
        let generated = validate_playlist(&valid()).unwrap();
        assert_eq!(generated.draft.name, "Pettit: steady aerobic endurance");
        assert_eq!(
            generated.tracks[1],
            NewTrack {
                artist: "Daft Punk".into(),
                title: "Harder, Better, Faster, Stronger".into()
            }
        );
    }

    #[test]
    fn test_missing_or_blank_fields_are_rejected() {
        for key in ["name", "description", "cover_prompt", "tracks"] {
            let mut value = valid();
            value.as_object_mut().unwrap().remove(key);
            assert_matches!(
                validate_playlist(&value),
                Err(PipelineError::InvalidGenerationResponse(reason)) if reason.contains(key)
            );
        }

        let mut value = valid();
        value["description"] = json!("   ");
        assert_matches!(validate_playlist(&value), Err(PipelineError::InvalidGenerationResponse(_)));

        let mut value = valid();
        value["name"] = json!(42);
        assert_matches!(validate_playlist(&value), Err(PipelineError::InvalidGenerationResponse(_)));
    }

    #[test]
    fn test_bad_tracks_are_rejected() {
        for tracks in [
            json!([]),
            json!("Queen - Don't Stop Me Now"),
            json!([{"artist": "Queen"}]),
            json!([{"artist": "", "track": "Untitled"}]),
            json!([{"artist": "Queen", "track": "Bohemian Rhapsody"}, "Daft Punk"]),
        ] {
            let mut value = valid();
            value["tracks"] = tracks.clone();
            assert_matches!(
                validate_playlist(&value),
                Err(PipelineError::InvalidGenerationResponse(_)),
                "accepted {tracks}"
            );
        }
    }

    #[test]
    fn test_non_object_response_is_rejected() {
        assert_matches!(validate_playlist(&json!([1, 2])), Err(PipelineError::InvalidGenerationResponse(_)));
        assert_matches!(validate_tracks(&json!(null)), Err(PipelineError::InvalidGenerationResponse(_)));
    }

    #[test]
    fn test_extension_only_needs_tracks() {
        let tracks = validate_tracks(&json!({"tracks": [{"artist": "Muse", "track": "Uprising"}]})).unwrap();
        assert_eq!(tracks.len(), 1);
    }

    #[test]
    fn test_details_require_all_fields() {
        let details = validate_details(&json!({
            "name": "Pettit",
            "description": "Steady endurance ride",
            "sport": "Cycling",
            "activity_type": "Workout"
        }))
        .unwrap();
        assert_eq!(details.sport, "Cycling");

        assert_matches!(
            validate_details(&json!({"name": "Pettit", "description": "x", "sport": "Cycling"})),
            Err(PipelineError::InvalidGenerationResponse(reason)) if reason.contains("activity_type")
        );
    }

    #[test]
    fn test_playlist_prompt_layout() {
        let prompt = playlist_prompt(&PlaylistContext {
            workout_name: "Pettit",
            workout_description: "Endurance ride",
            music_request: "Upbeat pop",
            exclusions: "",
        });
        assert_eq!(prompt, "Pettit\nEndurance ride\n\nUpbeat pop\n\n");
    }
}

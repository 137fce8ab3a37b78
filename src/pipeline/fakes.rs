//! In-memory stand-ins for the external services

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use super::queue::Scheduler;
use super::services::{
    CatalogTrack, ContentGenerator, ImageGenerator, MusicProvider, MusicSession, Services, WorkoutSource,
};
use super::task::Task;
use crate::error::{PipelineError, PipelineResult};
use crate::store::{NewActivity, User};

/// Answers completions from a script, in order
#[derive(Default)]
pub struct FakeGenerator {
    script: Mutex<VecDeque<PipelineResult<Value>>>,
    prompts: Mutex<Vec<(String, String)>>,
}

impl FakeGenerator {
    pub fn push(&self, response: Value) {
        self.script.lock().unwrap().push_back(Ok(response));
    }

    pub fn push_err(&self, error: PipelineError) {
        self.script.lock().unwrap().push_back(Err(error));
    }

    /// (system, user) prompt pairs received so far
    pub fn prompts(&self) -> Vec<(String, String)> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContentGenerator for FakeGenerator {
    async fn complete_json(&self, system: &str, user: &str, _user_tag: &str) -> PipelineResult<Value> {
        self.prompts.lock().unwrap().push((system.to_string(), user.to_string()));
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(PipelineError::Logic("no scripted completion left".into())))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemotePlaylist {
    pub name: String,
    pub description: String,
    pub public: bool,
    pub uris: Vec<String>,
    pub cover: Option<Vec<u8>>,
    pub followed: bool,
}

#[derive(Default)]
struct SessionState {
    catalog: HashMap<(String, String), CatalogTrack>,
    searches: Vec<(String, String)>,
    fail_searches_after: Option<usize>,
    playlists: HashMap<String, RemotePlaylist>,
    calls: Vec<String>,
    cover_failures: u32,
}

/// A music service account held in memory
#[derive(Default)]
pub struct FakeSession {
    state: Mutex<SessionState>,
}

impl FakeSession {
    pub fn uri_for(&self, artist: &str, title: &str) -> String {
        crate::store::fixtures::uri(artist, title)
    }

    /// Make `title` by `artist` findable
    pub fn add(&self, artist: &str, title: &str, duration_ms: i64) {
        let track = CatalogTrack {
            uri: self.uri_for(artist, title),
            duration_ms,
        };
        self.state
            .lock()
            .unwrap()
            .catalog
            .insert((artist.to_string(), title.to_string()), track);
    }

    /// Searches after the first `n` fail with an upstream error
    pub fn fail_searches_after(&self, n: usize) {
        self.state.lock().unwrap().fail_searches_after = Some(n);
    }

    /// The next `n` cover uploads fail with an upstream error
    pub fn fail_cover_uploads(&self, n: u32) {
        self.state.lock().unwrap().cover_failures = n;
    }

    pub fn searches(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().searches.clone()
    }

    /// Mutating calls in order, e.g. `create`, `replace_tracks`
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn playlist(&self, external_id: &str) -> Option<RemotePlaylist> {
        self.state.lock().unwrap().playlists.get(external_id).cloned()
    }

    pub fn playlist_count(&self) -> usize {
        self.state.lock().unwrap().playlists.len()
    }

    fn with_playlist<T>(
        &self,
        call: &str,
        external_id: &str,
        f: impl FnOnce(&mut RemotePlaylist) -> T,
    ) -> PipelineResult<T> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call.to_string());
        state
            .playlists
            .get_mut(external_id)
            .map(f)
            .ok_or_else(|| PipelineError::from_status("fake", 404, format!("no playlist {external_id}")))
    }
}

#[async_trait]
impl MusicSession for FakeSession {
    fn provider_user_id(&self) -> &str {
        "fake-user"
    }

    async fn search_track(&self, title: &str, artist: &str) -> PipelineResult<Option<CatalogTrack>> {
        let mut state = self.state.lock().unwrap();
        if state.fail_searches_after.is_some_and(|n| state.searches.len() >= n) {
            return Err(PipelineError::upstream("fake", Some(503), "search unavailable"));
        }
        state.searches.push((artist.to_string(), title.to_string()));
        Ok(state.catalog.get(&(artist.to_string(), title.to_string())).cloned())
    }

    async fn create_playlist(&self, name: &str, description: &str, public: bool) -> PipelineResult<String> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("create".into());
        let id = format!("remote-{}", state.playlists.len() + 1);
        state.playlists.insert(
            id.clone(),
            RemotePlaylist {
                name: name.to_string(),
                description: description.to_string(),
                public,
                followed: true,
                ..Default::default()
            },
        );
        Ok(id)
    }

    async fn update_playlist(&self, external_id: &str, name: &str, description: &str) -> PipelineResult<()> {
        self.with_playlist("update", external_id, |playlist| {
            playlist.name = name.to_string();
            playlist.description = description.to_string();
        })
    }

    async fn replace_tracks(&self, external_id: &str, uris: &[String]) -> PipelineResult<()> {
        self.with_playlist("replace_tracks", external_id, |playlist| {
            playlist.uris = uris.to_vec();
        })
    }

    async fn set_cover(&self, external_id: &str, jpeg: &[u8]) -> PipelineResult<()> {
        {
            let mut state = self.state.lock().unwrap();
            if state.cover_failures > 0 {
                state.cover_failures -= 1;
                state.calls.push("set_cover".into());
                return Err(PipelineError::upstream("fake", Some(502), "cover upload failed"));
            }
        }
        self.with_playlist("set_cover", external_id, |playlist| {
            playlist.cover = Some(jpeg.to_vec());
        })
    }

    async fn follow(&self, external_id: &str) -> PipelineResult<()> {
        self.with_playlist("follow", external_id, |playlist| playlist.followed = true)
    }

    async fn unfollow(&self, external_id: &str) -> PipelineResult<()> {
        self.with_playlist("unfollow", external_id, |playlist| playlist.followed = false)
    }
}

/// Hands out the same [`FakeSession`] to every user
#[derive(Default)]
pub struct FakeMusic {
    pub session: Arc<FakeSession>,
}

#[async_trait]
impl MusicProvider for FakeMusic {
    async fn connect(&self, _user: &User) -> PipelineResult<Arc<dyn MusicSession>> {
        Ok(self.session.clone())
    }
}

/// Serves one fixed image for every prompt
#[derive(Default)]
pub struct FakeImages {
    image: Mutex<Option<Vec<u8>>>,
    prompts: Mutex<Vec<String>>,
}

impl FakeImages {
    pub fn serve(&self, image: Vec<u8>) {
        *self.image.lock().unwrap() = Some(image);
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageGenerator for FakeImages {
    async fn generate(&self, prompt: &str, _user_tag: &str) -> PipelineResult<Option<String>> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let available = self.image.lock().unwrap().is_some();
        Ok(available.then(|| "https://images.example/cover.png".to_string()))
    }

    async fn download(&self, _url: &str) -> PipelineResult<Bytes> {
        self.image
            .lock()
            .unwrap()
            .clone()
            .map(Bytes::from)
            .ok_or_else(|| PipelineError::from_status("fake", 404, "image expired"))
    }
}

/// Today's calendar, set by the test
#[derive(Default)]
pub struct FakeWorkouts {
    workouts: Mutex<Vec<NewActivity>>,
    unavailable: Mutex<bool>,
}

impl FakeWorkouts {
    pub fn set(&self, workouts: Vec<NewActivity>) {
        *self.workouts.lock().unwrap() = workouts;
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock().unwrap() = unavailable;
    }
}

#[async_trait]
impl WorkoutSource for FakeWorkouts {
    async fn todays_activities(&self, _calendar_url: &str, _timezone: &str) -> PipelineResult<Vec<NewActivity>> {
        if *self.unavailable.lock().unwrap() {
            return Err(PipelineError::upstream("calendar", Some(503), "unavailable"));
        }
        Ok(self.workouts.lock().unwrap().clone())
    }
}

/// Remembers scheduled tasks instead of running them
#[derive(Default)]
pub struct RecordingScheduler {
    tasks: Mutex<Vec<Task>>,
}

impl RecordingScheduler {
    pub fn take(&self) -> Vec<Task> {
        std::mem::take(&mut *self.tasks.lock().unwrap())
    }
}

impl Scheduler for RecordingScheduler {
    fn schedule(&self, task: Task) {
        self.tasks.lock().unwrap().push(task);
    }
}

/// One of each fake, wired into [`Services`]
#[derive(Default, Clone)]
pub struct Fakes {
    pub generator: Arc<FakeGenerator>,
    pub music: Arc<FakeMusic>,
    pub images: Arc<FakeImages>,
    pub workouts: Arc<FakeWorkouts>,
}

impl Fakes {
    pub fn session(&self) -> &FakeSession {
        &self.music.session
    }

    pub fn services(&self) -> Services {
        Services {
            generator: self.generator.clone(),
            music: self.music.clone(),
            images: self.images.clone(),
            workouts: self.workouts.clone(),
        }
    }
}

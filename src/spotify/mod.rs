//! Spotify Web API client module

pub mod auth;
pub mod client;
pub mod models;

pub use auth::SpotifyCredentials;
pub use client::{SpotifyProvider, SpotifySession};

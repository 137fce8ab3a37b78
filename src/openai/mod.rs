//! OpenAI API client module (chat completions and image generation)

pub mod client;
pub mod models;

pub use client::OpenAiClient;

//! Utility functions

pub mod cover_art;
pub mod http;
pub mod time;

//! Mixtape CLI
//!
//! Operator commands over a local `SQLite` store: create and join groups,
//! import playlists, sort, like and export.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod transport;

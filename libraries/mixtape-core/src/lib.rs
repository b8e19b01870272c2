//! Mixtape Core
//!
//! Shared domain types, traits, configuration and error handling for the
//! Mixtape group-playlist engine.
//!
//! # Architecture
//!
//! The core crate defines:
//! - **Domain Types**: `Group`, `Member`, `Playlist`, `Song`, `Like`
//! - **Collaborator Traits**: `GroupStorage`, `OrderScorer`, `TrackResolver`, `Clock`
//! - **Configuration**: `EngineConfig` with defaults for every tunable
//! - **Error Handling**: the `MixtapeError` taxonomy and `Result` alias
//!
//! # Example
//!
//! ```rust
//! use mixtape_core::types::{CreateGroup, JoinCode, Platform, UserId};
//!
//! let owner = UserId::new("user-1");
//! let group = CreateGroup::new("Road trip", owner);
//! assert_eq!(group.name, "Road trip");
//!
//! let code = JoinCode::parse("ab7k").unwrap();
//! assert_eq!(code.as_str(), "AB7K");
//!
//! assert_eq!(Platform::Spotify.native_uri("4uLU6hMC"), "spotify:track:4uLU6hMC");
//! ```

#![forbid(unsafe_code)]

pub mod clock;
pub mod config;
pub mod error;
pub mod storage;
pub mod traits;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use clock::{Clock, SystemClock};
pub use config::EngineConfig;
pub use error::{MixtapeError, Result};
pub use storage::GroupStorage;
pub use traits::{OrderScorer, ScoreOutcome, TrackResolver};

pub use types::{
    CreateGroup, CreatePlaylist, Group, GroupId, ImportedSong, JoinCode, Like, Member, Platform,
    Playlist, PlaylistId, Song, SongId, UserId,
};

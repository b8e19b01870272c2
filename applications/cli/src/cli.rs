/// Command line definition
use clap::{Parser, Subcommand};
use mixtape_core::Platform;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "mixtape")]
#[command(about = "Manage Mixtape groups and their shared playlists", long_about = None)]
pub struct Cli {
    /// Configuration file path (defaults to ./mixtape.toml when present)
    #[arg(short, long, global = true, env = "MIXTAPE_CONFIG")]
    pub config: Option<PathBuf>,

    /// SQLite database URL, overriding the configuration file
    #[arg(long, global = true, env = "MIXTAPE_DATABASE_URL")]
    pub database_url: Option<String>,

    /// User the command acts as
    #[arg(short, long, global = true, env = "MIXTAPE_USER", default_value = "local")]
    pub user: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create a group owned by the acting user
    CreateGroup {
        /// Group name
        name: String,
    },
    /// Join a group with its join code
    Join {
        /// Join code (case-insensitive)
        code: String,
    },
    /// Add a playlist of songs read from a JSON file
    Import {
        /// Group ID
        group: String,
        /// JSON array of {title, artist, external_id?, position}
        file: PathBuf,
        /// Playlist name
        #[arg(short, long)]
        name: String,
        /// Platform the songs came from
        #[arg(short, long, default_value = "spotify", value_parser = parse_platform)]
        platform: Platform,
    },
    /// Print a group's songs in order
    Order {
        /// Group ID
        group: String,
    },
    /// Interleave the members' playlists and save the result
    Sort {
        /// Group ID
        group: String,
    },
    /// Drop the saved order and every rank
    ResetSort {
        /// Group ID
        group: String,
    },
    /// Toggle the acting user's like on a song
    Like {
        /// Group ID
        group: String,
        /// Song ID
        song: String,
    },
    /// Export a group, or one of its playlists, to the configured platform
    Export {
        /// Group ID
        group: String,
        /// Name of the playlist to create
        #[arg(short, long)]
        name: String,
        /// Export only this playlist
        #[arg(long)]
        playlist: Option<String>,
        /// Make the created playlist public
        #[arg(long)]
        public: bool,
        /// Let others edit the created playlist
        #[arg(long)]
        collaborative: bool,
        /// Playlist description
        #[arg(short, long)]
        description: Option<String>,
    },
    /// Print a group's order whenever it changes, until interrupted
    Watch {
        /// Group ID
        group: String,
    },
}

fn parse_platform(s: &str) -> Result<Platform, String> {
    Platform::from_str(&s.to_ascii_lowercase())
        .ok_or_else(|| format!("unknown platform '{s}' (spotify, youtube_music, apple_music)"))
}

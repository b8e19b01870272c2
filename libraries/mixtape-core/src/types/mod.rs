mod group;
mod ids;
mod join_code;
mod like;
mod platform;
mod playlist;
mod song;

pub use group::{CreateGroup, Group, Member};
pub use ids::{GroupId, PlaylistId, SongId, UserId};
pub use join_code::{JoinCode, DEFAULT_CODE_ALPHABET, DEFAULT_CODE_LENGTH};
pub use like::{Like, LikeSummary};
pub use platform::Platform;
pub use playlist::{CreatePlaylist, Playlist};
pub use song::{ImportedSong, Song};

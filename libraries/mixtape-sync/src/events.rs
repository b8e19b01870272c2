//! Change events
//!
//! The transport delivers untyped row payloads. They are converted here, once,
//! into a closed set of per-table variants so nothing past the hub inspects
//! raw JSON.

use mixtape_core::types::{Group, Like, Member, Playlist, Song};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Tables that emit live changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Groups,
    GroupMembers,
    Playlists,
    Songs,
    Likes,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Groups => "groups",
            Table::GroupMembers => "group_members",
            Table::Playlists => "playlists",
            Table::Songs => "songs",
            Table::Likes => "likes",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "groups" => Some(Table::Groups),
            "group_members" => Some(Table::GroupMembers),
            "playlists" => Some(Table::Playlists),
            "songs" => Some(Table::Songs),
            "likes" => Some(Table::Likes),
            _ => None,
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Updated,
    Removed,
}

impl ChangeKind {
    /// Map a transport event type (`INSERT`, `UPDATE`, `DELETE`)
    pub fn from_event_type(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "INSERT" => Some(ChangeKind::Created),
            "UPDATE" => Some(ChangeKind::Updated),
            "DELETE" => Some(ChangeKind::Removed),
            _ => None,
        }
    }
}

/// Which event kinds a channel listens for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventFilter {
    All,
    Only(ChangeKind),
}

impl EventFilter {
    pub fn matches(&self, kind: ChangeKind) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Only(k) => *k == kind,
        }
    }

    /// Transport-level event name
    pub fn as_transport_event(&self) -> &'static str {
        match self {
            EventFilter::All => "*",
            EventFilter::Only(ChangeKind::Created) => "INSERT",
            EventFilter::Only(ChangeKind::Updated) => "UPDATE",
            EventFilter::Only(ChangeKind::Removed) => "DELETE",
        }
    }
}

/// Row change exactly as the transport delivers it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawChange {
    pub table: String,
    #[serde(rename = "eventType")]
    pub event_type: String,
    #[serde(default)]
    pub new: Value,
    #[serde(default)]
    pub old: Value,
}

/// A typed change to one record
#[derive(Debug, Clone, PartialEq)]
pub struct RecordChange<T> {
    pub kind: ChangeKind,
    /// Primary key of the changed row (composite keys joined with `:`)
    pub record_id: String,
    /// Row after the change; absent for removals
    pub new: Option<T>,
    /// Row before the change when the transport supplies a full snapshot
    pub old: Option<T>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    GroupChanged(RecordChange<Group>),
    MemberChanged(RecordChange<Member>),
    PlaylistChanged(RecordChange<Playlist>),
    SongChanged(RecordChange<Song>),
    LikeChanged(RecordChange<Like>),
}

impl ChangeEvent {
    pub fn kind(&self) -> ChangeKind {
        match self {
            ChangeEvent::GroupChanged(c) => c.kind,
            ChangeEvent::MemberChanged(c) => c.kind,
            ChangeEvent::PlaylistChanged(c) => c.kind,
            ChangeEvent::SongChanged(c) => c.kind,
            ChangeEvent::LikeChanged(c) => c.kind,
        }
    }

    pub fn table(&self) -> Table {
        match self {
            ChangeEvent::GroupChanged(_) => Table::Groups,
            ChangeEvent::MemberChanged(_) => Table::GroupMembers,
            ChangeEvent::PlaylistChanged(_) => Table::Playlists,
            ChangeEvent::SongChanged(_) => Table::Songs,
            ChangeEvent::LikeChanged(_) => Table::Likes,
        }
    }

    pub fn record_id(&self) -> &str {
        match self {
            ChangeEvent::GroupChanged(c) => &c.record_id,
            ChangeEvent::MemberChanged(c) => &c.record_id,
            ChangeEvent::PlaylistChanged(c) => &c.record_id,
            ChangeEvent::SongChanged(c) => &c.record_id,
            ChangeEvent::LikeChanged(c) => &c.record_id,
        }
    }
}

/// Why a raw payload could not be converted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionError {
    UnknownTable(String),
    UnknownEventType(String),
    MissingKey(Table),
    Malformed { table: Table, reason: String },
}

impl fmt::Display for ConversionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversionError::UnknownTable(t) => write!(f, "unknown table '{t}'"),
            ConversionError::UnknownEventType(e) => write!(f, "unknown event type '{e}'"),
            ConversionError::MissingKey(t) => write!(f, "{t} change carries no primary key"),
            ConversionError::Malformed { table, reason } => {
                write!(f, "malformed {table} row: {reason}")
            }
        }
    }
}

impl TryFrom<RawChange> for ChangeEvent {
    type Error = ConversionError;

    fn try_from(raw: RawChange) -> Result<Self, Self::Error> {
        let table =
            Table::from_str(&raw.table).ok_or_else(|| ConversionError::UnknownTable(raw.table.clone()))?;
        let kind = ChangeKind::from_event_type(&raw.event_type)
            .ok_or_else(|| ConversionError::UnknownEventType(raw.event_type.clone()))?;

        let event = match table {
            Table::Groups => ChangeEvent::GroupChanged(typed(table, kind, &raw, &["id"])?),
            Table::GroupMembers => {
                ChangeEvent::MemberChanged(typed(table, kind, &raw, &["group_id", "user_id"])?)
            }
            Table::Playlists => ChangeEvent::PlaylistChanged(typed(table, kind, &raw, &["id"])?),
            Table::Songs => ChangeEvent::SongChanged(typed(table, kind, &raw, &["id"])?),
            Table::Likes => {
                ChangeEvent::LikeChanged(typed(table, kind, &raw, &["song_id", "user_id"])?)
            }
        };
        Ok(event)
    }
}

fn typed<T: DeserializeOwned>(
    table: Table,
    kind: ChangeKind,
    raw: &RawChange,
    key_fields: &[&str],
) -> Result<RecordChange<T>, ConversionError> {
    let record_id = record_key(&raw.new, key_fields)
        .or_else(|| record_key(&raw.old, key_fields))
        .ok_or(ConversionError::MissingKey(table))?;

    // The new row must be complete; the old row is often only the primary key
    let new = match kind {
        ChangeKind::Removed => None,
        ChangeKind::Created | ChangeKind::Updated => Some(
            serde_json::from_value(raw.new.clone()).map_err(|e| ConversionError::Malformed {
                table,
                reason: e.to_string(),
            })?,
        ),
    };
    let old = if is_empty(&raw.old) {
        None
    } else {
        serde_json::from_value(raw.old.clone()).ok()
    };

    Ok(RecordChange {
        kind,
        record_id,
        new,
        old,
    })
}

fn record_key(row: &Value, key_fields: &[&str]) -> Option<String> {
    let parts: Option<Vec<String>> = key_fields
        .iter()
        .map(|field| match row.get(*field)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .collect();
    parts.map(|p| p.join(":"))
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

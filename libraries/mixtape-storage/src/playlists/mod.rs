use crate::error::{Result, StorageError};
use crate::time;
use chrono::{DateTime, Utc};
use mixtape_core::types::{CreatePlaylist, GroupId, Platform, Playlist, PlaylistId, UserId};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

const COLUMNS: &str = "id, group_id, platform, name, added_by, smart_sorted_order, created_at";

fn from_row(row: &SqliteRow) -> Result<Playlist> {
    let platform: String = row.try_get("platform")?;
    let added_by: Option<String> = row.try_get("added_by")?;

    Ok(Playlist {
        id: PlaylistId::new(row.try_get::<String, _>("id")?),
        group_id: GroupId::new(row.try_get::<String, _>("group_id")?),
        platform: Platform::from_str(&platform)
            .ok_or_else(|| StorageError::corrupt("playlists.platform", &platform))?,
        name: row.try_get("name")?,
        added_by: added_by.map(UserId::new),
        smart_sorted_order: row.try_get("smart_sorted_order")?,
        created_at: time::decode(
            "playlists.created_at",
            &row.try_get::<String, _>("created_at")?,
        )?,
    })
}

pub async fn insert(
    tx: &mut Transaction<'_, Sqlite>,
    playlist: CreatePlaylist,
    created_at: DateTime<Utc>,
) -> Result<Playlist> {
    let created = Playlist {
        id: PlaylistId::generate(),
        group_id: playlist.group_id,
        platform: playlist.platform,
        name: playlist.name,
        added_by: playlist.added_by,
        smart_sorted_order: None,
        created_at,
    };

    sqlx::query(
        r#"
        INSERT INTO playlists (id, group_id, platform, name, added_by, smart_sorted_order, created_at)
        VALUES (?, ?, ?, ?, ?, NULL, ?)
        "#,
    )
    .bind(created.id.as_str())
    .bind(created.group_id.as_str())
    .bind(created.platform.as_str())
    .bind(&created.name)
    .bind(created.added_by.as_ref().map(|u| u.as_str().to_string()))
    .bind(time::encode(&created.created_at))
    .execute(&mut **tx)
    .await?;

    Ok(created)
}

pub async fn get_by_id(pool: &SqlitePool, id: &PlaylistId) -> Result<Option<Playlist>> {
    let row = sqlx::query(&format!("SELECT {COLUMNS} FROM playlists WHERE id = ?"))
        .bind(id.as_str())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(from_row).transpose()
}

/// Playlists of a group, oldest first
pub async fn list_by_group(pool: &SqlitePool, group_id: &GroupId) -> Result<Vec<Playlist>> {
    let rows = sqlx::query(&format!(
        "SELECT {COLUMNS} FROM playlists WHERE group_id = ? ORDER BY created_at, rowid"
    ))
    .bind(group_id.as_str())
    .fetch_all(pool)
    .await?;

    rows.iter().map(from_row).collect()
}

/// Remove a playlist; its songs and their likes cascade
pub async fn delete(pool: &SqlitePool, id: &PlaylistId) -> Result<()> {
    sqlx::query("DELETE FROM playlists WHERE id = ?")
        .bind(id.as_str())
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn set_rank(pool: &SqlitePool, id: &PlaylistId, rank: Option<i64>) -> Result<()> {
    let result = sqlx::query("UPDATE playlists SET smart_sorted_order = ? WHERE id = ?")
        .bind(rank)
        .bind(id.as_str())
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(StorageError::not_found("playlist", id.as_str()));
    }
    Ok(())
}

pub async fn clear_ranks(tx: &mut Transaction<'_, Sqlite>, group_id: &GroupId) -> Result<()> {
    sqlx::query("UPDATE playlists SET smart_sorted_order = NULL WHERE group_id = ?")
        .bind(group_id.as_str())
        .execute(&mut **tx)
        .await?;
    Ok(())
}

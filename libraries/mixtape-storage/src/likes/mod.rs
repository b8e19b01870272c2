use crate::error::Result;
use crate::time;
use chrono::{DateTime, Utc};
use mixtape_core::types::{GroupId, Like, SongId, UserId};
use sqlx::{Row, SqlitePool};

pub async fn add(
    pool: &SqlitePool,
    song_id: &SongId,
    user_id: &UserId,
    at: &DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO likes (song_id, user_id, created_at)
        VALUES (?, ?, ?)
        ON CONFLICT (song_id, user_id) DO NOTHING
        "#,
    )
    .bind(song_id.as_str())
    .bind(user_id.as_str())
    .bind(time::encode(at))
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn remove(pool: &SqlitePool, song_id: &SongId, user_id: &UserId) -> Result<()> {
    sqlx::query("DELETE FROM likes WHERE song_id = ? AND user_id = ?")
        .bind(song_id.as_str())
        .bind(user_id.as_str())
        .execute(pool)
        .await?;
    Ok(())
}

/// Likes on every song in the group's playlists
pub async fn list_by_group(pool: &SqlitePool, group_id: &GroupId) -> Result<Vec<Like>> {
    let rows = sqlx::query(
        r#"
        SELECT l.song_id, l.user_id
        FROM likes l
        INNER JOIN songs s ON l.song_id = s.id
        INNER JOIN playlists p ON s.playlist_id = p.id
        WHERE p.group_id = ?
        ORDER BY l.created_at, l.rowid
        "#,
    )
    .bind(group_id.as_str())
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| -> Result<Like> {
            Ok(Like {
                song_id: SongId::new(row.try_get::<String, _>("song_id")?),
                user_id: UserId::new(row.try_get::<String, _>("user_id")?),
            })
        })
        .collect()
}

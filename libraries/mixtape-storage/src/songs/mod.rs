use crate::error::{Result, StorageError};
use mixtape_core::types::{GroupId, ImportedSong, PlaylistId, Song, SongId};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

fn from_row(row: &SqliteRow) -> Result<Song> {
    Ok(Song {
        id: SongId::new(row.try_get::<String, _>("id")?),
        playlist_id: PlaylistId::new(row.try_get::<String, _>("playlist_id")?),
        title: row.try_get("title")?,
        artist: row.try_get("artist")?,
        external_id: row.try_get("external_id")?,
        position: row.try_get("position")?,
        smart_sorted_order: row.try_get("smart_sorted_order")?,
    })
}

/// Insert imported rows for a playlist, returned in position order
pub async fn insert_many(
    tx: &mut Transaction<'_, Sqlite>,
    playlist_id: &PlaylistId,
    songs: Vec<ImportedSong>,
) -> Result<Vec<Song>> {
    let mut created = Vec::with_capacity(songs.len());

    for imported in songs {
        let song = Song {
            id: SongId::generate(),
            playlist_id: playlist_id.clone(),
            title: imported.title,
            artist: imported.artist,
            external_id: imported.external_id,
            position: imported.position,
            smart_sorted_order: None,
        };

        sqlx::query(
            r#"
            INSERT INTO songs (id, playlist_id, title, artist, external_id, position, smart_sorted_order)
            VALUES (?, ?, ?, ?, ?, ?, NULL)
            "#,
        )
        .bind(song.id.as_str())
        .bind(song.playlist_id.as_str())
        .bind(&song.title)
        .bind(&song.artist)
        .bind(&song.external_id)
        .bind(song.position)
        .execute(&mut **tx)
        .await?;

        created.push(song);
    }

    created.sort_by_key(|s| s.position);
    Ok(created)
}

/// Songs of a playlist by position; equal positions keep insertion order
pub async fn list_by_playlist(pool: &SqlitePool, playlist_id: &PlaylistId) -> Result<Vec<Song>> {
    let rows = sqlx::query(
        r#"
        SELECT id, playlist_id, title, artist, external_id, position, smart_sorted_order
        FROM songs
        WHERE playlist_id = ?
        ORDER BY position, rowid
        "#,
    )
    .bind(playlist_id.as_str())
    .fetch_all(pool)
    .await?;

    rows.iter().map(from_row).collect()
}

pub async fn set_rank(pool: &SqlitePool, id: &SongId, rank: Option<i64>) -> Result<()> {
    let result = sqlx::query("UPDATE songs SET smart_sorted_order = ? WHERE id = ?")
        .bind(rank)
        .bind(id.as_str())
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(StorageError::not_found("song", id.as_str()));
    }
    Ok(())
}

pub async fn clear_ranks(tx: &mut Transaction<'_, Sqlite>, group_id: &GroupId) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE songs SET smart_sorted_order = NULL
        WHERE playlist_id IN (SELECT id FROM playlists WHERE group_id = ?)
        "#,
    )
    .bind(group_id.as_str())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

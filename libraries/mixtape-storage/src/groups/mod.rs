use crate::error::{Result, StorageError};
use crate::time;
use chrono::{DateTime, Utc};
use mixtape_core::types::{Group, GroupId, JoinCode, SongId, UserId};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

const COLUMNS: &str = "id, name, owner_id, join_code, sort_order, sorted_at, created_at";

fn from_row(row: &SqliteRow) -> Result<Group> {
    let code: String = row.try_get("join_code")?;
    let sort_order: Option<String> = row.try_get("sort_order")?;
    let sort_order = sort_order
        .map(|raw| serde_json::from_str::<Vec<SongId>>(&raw))
        .transpose()
        .map_err(|e| StorageError::corrupt("groups.sort_order", e))?;

    Ok(Group {
        id: GroupId::new(row.try_get::<String, _>("id")?),
        name: row.try_get("name")?,
        owner_id: UserId::new(row.try_get::<String, _>("owner_id")?),
        join_code: JoinCode::parse(&code).map_err(|e| StorageError::corrupt("groups.join_code", e))?,
        sort_order,
        sorted_at: time::decode_opt("groups.sorted_at", row.try_get("sorted_at")?)?,
        created_at: time::decode("groups.created_at", &row.try_get::<String, _>("created_at")?)?,
    })
}

/// Insert a group row inside `tx`
///
/// Fails with a unique violation when `group.join_code` is taken.
pub async fn insert(tx: &mut Transaction<'_, Sqlite>, group: &Group) -> Result<()> {
    let sort_order = group
        .sort_order
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    sqlx::query(
        r#"
        INSERT INTO groups (id, name, owner_id, join_code, sort_order, sorted_at, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(group.id.as_str())
    .bind(&group.name)
    .bind(group.owner_id.as_str())
    .bind(group.join_code.as_str())
    .bind(sort_order)
    .bind(group.sorted_at.as_ref().map(time::encode))
    .bind(time::encode(&group.created_at))
    .execute(&mut **tx)
    .await?;

    Ok(())
}

pub async fn get_by_id(pool: &SqlitePool, id: &GroupId) -> Result<Option<Group>> {
    let row = sqlx::query(&format!("SELECT {COLUMNS} FROM groups WHERE id = ?"))
        .bind(id.as_str())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(from_row).transpose()
}

pub async fn get_by_code(pool: &SqlitePool, code: &JoinCode) -> Result<Option<Group>> {
    let row = sqlx::query(&format!("SELECT {COLUMNS} FROM groups WHERE join_code = ?"))
        .bind(code.as_str())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(from_row).transpose()
}

/// Delete a group; members, playlists, songs and likes cascade
pub async fn delete(pool: &SqlitePool, id: &GroupId, requested_by: &UserId) -> Result<()> {
    let group = get_by_id(pool, id)
        .await?
        .ok_or_else(|| StorageError::not_found("group", id.as_str()))?;

    if &group.owner_id != requested_by {
        return Err(StorageError::Forbidden(
            "Only the owner can delete a group".to_string(),
        ));
    }

    sqlx::query("DELETE FROM groups WHERE id = ?")
        .bind(id.as_str())
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn set_sort_order(
    pool: &SqlitePool,
    id: &GroupId,
    order: Option<&[SongId]>,
    sorted_at: Option<&DateTime<Utc>>,
) -> Result<Group> {
    let encoded = order.map(serde_json::to_string).transpose()?;

    let result = sqlx::query("UPDATE groups SET sort_order = ?, sorted_at = ? WHERE id = ?")
        .bind(encoded)
        .bind(sorted_at.map(time::encode))
        .bind(id.as_str())
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(StorageError::not_found("group", id.as_str()));
    }

    get_by_id(pool, id)
        .await?
        .ok_or_else(|| StorageError::not_found("group", id.as_str()))
}

pub async fn exists(pool: &SqlitePool, id: &GroupId) -> Result<bool> {
    let row = sqlx::query("SELECT 1 FROM groups WHERE id = ?")
        .bind(id.as_str())
        .fetch_optional(pool)
        .await?;
    Ok(row.is_some())
}

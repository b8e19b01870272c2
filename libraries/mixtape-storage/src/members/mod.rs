use crate::error::Result;
use crate::time;
use chrono::{DateTime, Utc};
use mixtape_core::types::{GroupId, Member, UserId};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

fn from_row(row: &SqliteRow) -> Result<Member> {
    Ok(Member {
        group_id: GroupId::new(row.try_get::<String, _>("group_id")?),
        user_id: UserId::new(row.try_get::<String, _>("user_id")?),
        joined_at: time::decode(
            "group_members.joined_at",
            &row.try_get::<String, _>("joined_at")?,
        )?,
    })
}

/// Add a membership; an existing one is left as it was
pub async fn add(
    conn: &mut SqliteConnection,
    group_id: &GroupId,
    user_id: &UserId,
    joined_at: &DateTime<Utc>,
) -> Result<Member> {
    sqlx::query(
        r#"
        INSERT INTO group_members (group_id, user_id, joined_at)
        VALUES (?, ?, ?)
        ON CONFLICT (group_id, user_id) DO NOTHING
        "#,
    )
    .bind(group_id.as_str())
    .bind(user_id.as_str())
    .bind(time::encode(joined_at))
    .execute(&mut *conn)
    .await?;

    let row = sqlx::query(
        "SELECT group_id, user_id, joined_at FROM group_members WHERE group_id = ? AND user_id = ?",
    )
    .bind(group_id.as_str())
    .bind(user_id.as_str())
    .fetch_one(&mut *conn)
    .await?;

    from_row(&row)
}

/// Members ordered by join time
pub async fn list(pool: &SqlitePool, group_id: &GroupId) -> Result<Vec<Member>> {
    let rows = sqlx::query(
        r#"
        SELECT group_id, user_id, joined_at
        FROM group_members
        WHERE group_id = ?
        ORDER BY joined_at, rowid
        "#,
    )
    .bind(group_id.as_str())
    .fetch_all(pool)
    .await?;

    rows.iter().map(from_row).collect()
}

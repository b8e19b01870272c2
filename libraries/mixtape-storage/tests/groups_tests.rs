//! Integration tests for the groups and members slices
//!
//! Tests:
//! - Join codes are unique and collisions are retried
//! - The owner becomes the first member, joins are idempotent
//! - Sort-order vectors round-trip through JSON
//! - Only the owner deletes, and deletion cascades


use chrono::Utc;
use mixtape_core::types::*;
use mixtape_core::{GroupStorage, MixtapeError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use test_helpers::*;

#[tokio::test]
async fn test_create_group_adds_owner_as_member() {
    let test_db = TestDb::new().await;
    let store = test_db.store();

    let group = create_test_group(&store, "owner-1").await;
    assert_eq!(group.owner_id, UserId::new("owner-1"));
    assert!(group.sort_order.is_none());

    let members = store.list_members(&group.id).await.unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].user_id, UserId::new("owner-1"));

    let by_code = store.find_group_by_code(&group.join_code).await.unwrap();
    assert_eq!(by_code, Some(group.clone()));
    assert_eq!(store.get_group(&group.id).await.unwrap(), Some(group));
}

#[tokio::test]
async fn test_join_code_collision_is_retried() {
    let test_db = TestDb::new().await;

    // The first two codes handed out are identical
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let store = test_db.store().with_code_generator(move || {
        match counter.fetch_add(1, Ordering::SeqCst) {
            0 | 1 => JoinCode::parse("AAAA").unwrap(),
            _ => JoinCode::parse("BBBB").unwrap(),
        }
    });

    let first = create_test_group(&store, "a").await;
    let second = create_test_group(&store, "b").await;

    assert_eq!(first.join_code.as_str(), "AAAA");
    assert_eq!(second.join_code.as_str(), "BBBB");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(store.list_members(&second.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_exhausted_code_space_fails() {
    let test_db = TestDb::new().await;
    let store = test_db
        .store()
        .with_code_generator(|| JoinCode::parse("CCCC").unwrap());

    create_test_group(&store, "a").await;
    let err = store
        .create_group(CreateGroup::new("Second", UserId::new("b")))
        .await
        .unwrap_err();
    assert!(matches!(err, MixtapeError::Storage(_)));
}

#[tokio::test]
async fn test_add_member_is_idempotent() {
    let test_db = TestDb::new().await;
    let store = test_db.store();
    let group = create_test_group(&store, "owner").await;

    let first = store.add_member(&group.id, &UserId::new("guest")).await.unwrap();
    let again = store.add_member(&group.id, &UserId::new("guest")).await.unwrap();
    assert_eq!(first, again);
    assert_eq!(store.list_members(&group.id).await.unwrap().len(), 2);

    let missing = store
        .add_member(&GroupId::new("nope"), &UserId::new("guest"))
        .await
        .unwrap_err();
    assert!(matches!(missing, MixtapeError::NotFound { .. }));
}

#[tokio::test]
async fn test_sort_order_round_trip() {
    let test_db = TestDb::new().await;
    let store = test_db.store();
    let group = create_test_group(&store, "owner").await;

    let order = vec![SongId::new("s-3"), SongId::new("s-1"), SongId::new("s-2")];
    let now = Utc::now();
    let updated = store
        .set_sort_order(&group.id, Some(order.clone()), Some(now))
        .await
        .unwrap();
    assert_eq!(updated.sort_order, Some(order));
    assert!(updated.sorted_at.is_some());

    let cleared = store.set_sort_order(&group.id, None, None).await.unwrap();
    assert!(cleared.sort_order.is_none());
    assert!(cleared.sorted_at.is_none());

    let err = store
        .set_sort_order(&GroupId::new("nope"), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, MixtapeError::NotFound { .. }));
}

#[tokio::test]
async fn test_only_owner_deletes_and_delete_cascades() {
    let test_db = TestDb::new().await;
    let store = test_db.store();
    let group = create_test_group(&store, "owner").await;
    let (playlist, songs) = create_test_playlist(&store, &group, Platform::Spotify, 3).await;
    store.like(&songs[0].id, &UserId::new("owner")).await.unwrap();

    let err = store
        .delete_group(&group.id, &UserId::new("guest"))
        .await
        .unwrap_err();
    assert!(matches!(err, MixtapeError::ValidationFailed(_)));

    store.delete_group(&group.id, &UserId::new("owner")).await.unwrap();
    assert!(store.get_group(&group.id).await.unwrap().is_none());
    assert!(store.get_playlist(&playlist.id).await.unwrap().is_none());
    assert!(store.list_songs(&playlist.id).await.unwrap().is_empty());
    assert!(store.list_members(&group.id).await.unwrap().is_empty());

    let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM likes")
        .fetch_one(test_db.pool())
        .await
        .unwrap();
    assert_eq!(remaining, 0);
}

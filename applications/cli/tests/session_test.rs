//! Session tests against a real SQLite database in a temp directory.

use mixtape_cli::commands::{render_order, ExportOptions, Session};
use mixtape_cli::config::CliConfig;
use mixtape_cli::error::CliError;
use mixtape_core::{MixtapeError, Platform, UserId};
use std::path::PathBuf;
use tempfile::TempDir;

fn config_for(dir: &TempDir) -> CliConfig {
    let mut config = CliConfig::default();
    config.database.url = format!("sqlite://{}", dir.path().join("mixtape.db").display());
    config
}

fn songs_file(dir: &TempDir, name: &str, titles: &[&str]) -> PathBuf {
    let songs: Vec<serde_json::Value> = titles
        .iter()
        .enumerate()
        .map(|(i, title)| {
            serde_json::json!({
                "title": title,
                "artist": format!("Artist {i}"),
                "external_id": format!("{name}-{i}"),
                "position": i,
            })
        })
        .collect();
    let path = dir.path().join(format!("{name}.json"));
    std::fs::write(&path, serde_json::to_string(&songs).unwrap()).unwrap();
    path
}

fn titles(order: &mixtape_client::GroupOrder) -> Vec<String> {
    order.songs.iter().map(|s| s.song.title.clone()).collect()
}

#[tokio::test]
async fn group_lifecycle_over_sqlite() {
    let dir = TempDir::new().unwrap();
    let owner = Session::open(config_for(&dir), UserId::new("alice"))
        .await
        .unwrap();

    let group = owner.create_group("Road trip").await.unwrap();
    let alice_songs = songs_file(&dir, "alice", &["A1", "A2"]);
    let (_, imported) = owner
        .import(group.id.as_str(), &alice_songs, "Alice's picks", Platform::Spotify)
        .await
        .unwrap();
    assert_eq!(imported, 2);
    owner.close().await.unwrap();

    let friend = Session::open(config_for(&dir), UserId::new("bob"))
        .await
        .unwrap();
    let joined = friend
        .join(&group.join_code.as_str().to_ascii_lowercase())
        .await
        .unwrap();
    assert_eq!(joined.id, group.id);

    let bob_songs = songs_file(&dir, "bob", &["B1", "B2"]);
    friend
        .import(group.id.as_str(), &bob_songs, "Bob's picks", Platform::Spotify)
        .await
        .unwrap();

    let (order, _) = friend.order(group.id.as_str()).await.unwrap();
    assert_eq!(titles(&order), vec!["A1", "A2", "B1", "B2"]);

    let sorted = friend.sort(group.id.as_str()).await.unwrap();
    assert_eq!(titles(&sorted), vec!["A1", "B1", "A2", "B2"]);

    let b1 = sorted.songs[1].song.id.clone();
    assert!(friend.toggle_like(group.id.as_str(), b1.as_str()).await.unwrap());
    let (order, likes) = friend.order(group.id.as_str()).await.unwrap();
    assert_eq!(titles(&order), vec!["A1", "B1", "A2", "B2"]);
    assert!(render_order(&order, &likes).contains("B1 - Artist 0 [Spotify] +1 (you)"));

    let reset = friend.reset_sort(group.id.as_str()).await.unwrap();
    assert_eq!(titles(&reset), vec!["A1", "A2", "B1", "B2"]);
    friend.close().await.unwrap();
}

#[tokio::test]
async fn unknown_join_code_is_not_found() {
    let dir = TempDir::new().unwrap();
    let session = Session::open(config_for(&dir), UserId::new("bob"))
        .await
        .unwrap();

    let err = session.join("ZZZZ").await.unwrap_err();
    assert!(matches!(err, CliError::Engine(MixtapeError::NotFound { .. })));
    session.close().await.unwrap();
}

#[tokio::test]
async fn export_requires_credentials() {
    let dir = TempDir::new().unwrap();
    let session = Session::open(config_for(&dir), UserId::new("alice"))
        .await
        .unwrap();
    let group = session.create_group("Road trip").await.unwrap();

    let err = session
        .export(group.id.as_str(), "Mix", ExportOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CliError::Config(_)));
    session.close().await.unwrap();
}

#[tokio::test]
async fn invalid_engine_config_is_rejected_before_connecting() {
    let dir = TempDir::new().unwrap();
    let mut config = config_for(&dir);
    config.engine.export.batch_size = 0;

    let result = Session::open(config, UserId::new("alice")).await;
    assert!(matches!(result, Err(CliError::Config(_))));
    assert!(!dir.path().join("mixtape.db").exists());
}

#[tokio::test]
async fn cached_order_survives_a_restart() {
    let dir = TempDir::new().unwrap();
    let first = Session::open(config_for(&dir), UserId::new("alice"))
        .await
        .unwrap();
    let group = first.create_group("Road trip").await.unwrap();
    first.order(group.id.as_str()).await.unwrap();
    first.close().await.unwrap();

    let second = Session::open(config_for(&dir), UserId::new("alice"))
        .await
        .unwrap();
    let key = mixtape_client::group_order_key(&group.id);
    assert!(second.engine().cache().get(&key).is_some());
    second.close().await.unwrap();
}

//! Live group order
//!
//! Keeps a group's order query current from change events. The group row,
//! the group's playlists and each playlist's songs get a channel. Relevant
//! events schedule a re-sort through the debouncer, so a burst costs one
//! refetch. Channels that fall back to polling hand the same refetch to the
//! polling service until they reconnect.

use crate::engine::MixtapeEngine;
use crate::order::GroupOrder;
use crate::query::{Query, QueryState};
use mixtape_core::types::{GroupId, PlaylistId};
use mixtape_core::Result;
use mixtape_sync::{
    ChangeEvent, ChangeKind, ChannelKey, ConnectionState, Debouncer, HubSignal, PollingService,
    RecordChange, Subscription, SubscriptionHub, Table,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

static NEXT_VIEW: AtomicU64 = AtomicU64::new(1);

struct LiveShared {
    group_id: GroupId,
    hub: SubscriptionHub,
    polling: PollingService,
    poll_key: String,
    debouncer: Debouncer,
    query: Query<GroupOrder>,
    group_subscriptions: Mutex<Vec<Subscription>>,
    song_subscriptions: Mutex<HashMap<PlaylistId, Subscription>>,
}

pub struct LiveGroupOrder {
    shared: Arc<LiveShared>,
    cancel: CancellationToken,
}

impl LiveGroupOrder {
    /// Load the group's order and start following changes to it
    pub async fn start(engine: &MixtapeEngine, group_id: GroupId) -> Result<Self> {
        let query = engine.group_order_query(&group_id);
        query.refresh().await?;
        let playlists = engine.store().list_playlists(&group_id).await?;

        let view = NEXT_VIEW.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::new(LiveShared {
            poll_key: format!("live-order:{group_id}:{view}"),
            group_id,
            hub: engine.hub().clone(),
            polling: engine.polling().clone(),
            debouncer: Debouncer::new(
                engine.scheduler().clone(),
                engine.config().ordering.resort_debounce(),
            ),
            query,
            group_subscriptions: Mutex::new(Vec::new()),
            song_subscriptions: Mutex::new(HashMap::new()),
        });
        let cancel = engine.scheduler().child_token();

        // Listen before subscribing so no transition is missed
        spawn_signal_listener(
            Arc::downgrade(&shared),
            engine.hub().signals(),
            cancel.clone(),
        );
        shared.subscribe_group();
        for playlist in playlists {
            shared.watch_playlist(playlist.id);
        }

        info!(group_id = %shared.group_id, "Following group order");
        Ok(Self { shared, cancel })
    }

    pub fn group_id(&self) -> &GroupId {
        &self.shared.group_id
    }

    pub fn order(&self) -> Option<GroupOrder> {
        self.shared.query.data()
    }

    pub fn subscribe(&self) -> watch::Receiver<QueryState<GroupOrder>> {
        self.shared.query.subscribe()
    }

    pub fn query(&self) -> &Query<GroupOrder> {
        &self.shared.query
    }

    /// Whether the polling fallback is standing in for live updates
    pub fn is_polling(&self) -> bool {
        self.shared.polling.is_polling(&self.shared.poll_key)
    }

    /// Channel keys currently followed
    pub fn channels(&self) -> Vec<ChannelKey> {
        self.shared.watched_keys()
    }

    /// Unsubscribe, cancel pending re-sorts and stop polling
    pub fn dispose(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        self.shared.debouncer.cancel();
        self.shared.polling.stop(&self.shared.poll_key);
        self.shared.query.dispose();

        let group = std::mem::take(&mut *lock(&self.shared.group_subscriptions));
        let songs = std::mem::take(&mut *lock(&self.shared.song_subscriptions));
        drop(group);
        drop(songs);
        debug!(group_id = %self.shared.group_id, "Stopped following group order");
    }
}

impl Drop for LiveGroupOrder {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LiveShared {
    fn group_key(&self) -> ChannelKey {
        ChannelKey::new(Table::Groups)
            .only(ChangeKind::Updated)
            .where_eq("id", &self.group_id)
    }

    fn playlists_key(&self) -> ChannelKey {
        ChannelKey::new(Table::Playlists).where_eq("group_id", &self.group_id)
    }

    fn songs_key(playlist_id: &PlaylistId) -> ChannelKey {
        ChannelKey::new(Table::Songs).where_eq("playlist_id", playlist_id)
    }

    fn watched_keys(&self) -> Vec<ChannelKey> {
        let mut keys: Vec<ChannelKey> = lock(&self.group_subscriptions)
            .iter()
            .map(|s| s.key().clone())
            .collect();
        keys.extend(lock(&self.song_subscriptions).values().map(|s| s.key().clone()));
        keys
    }

    fn subscribe_group(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let group = self.hub.subscribe(self.group_key(), move |event| {
            if let Some(shared) = weak.upgrade() {
                shared.on_group_event(event);
            }
        });

        let weak = Arc::downgrade(self);
        let playlists = self.hub.subscribe(self.playlists_key(), move |event| {
            if let Some(shared) = weak.upgrade() {
                shared.on_playlist_event(event);
            }
        });

        lock(&self.group_subscriptions).extend([group, playlists]);
    }

    fn watch_playlist(self: &Arc<Self>, playlist_id: PlaylistId) {
        if lock(&self.song_subscriptions).contains_key(&playlist_id) {
            return;
        }
        let weak = Arc::downgrade(self);
        let subscription = self.hub.subscribe(Self::songs_key(&playlist_id), move |event| {
            if let Some(shared) = weak.upgrade() {
                shared.on_song_event(event);
            }
        });
        lock(&self.song_subscriptions).insert(playlist_id, subscription);
    }

    fn unwatch_playlist(&self, playlist_id: &PlaylistId) {
        let removed = lock(&self.song_subscriptions).remove(playlist_id);
        drop(removed);
    }

    fn on_group_event(&self, event: &ChangeEvent) {
        if let ChangeEvent::GroupChanged(change) = event {
            if changed(change, |g| g.sort_order.clone()) {
                self.schedule_resort("sort order changed");
            }
        }
    }

    fn on_playlist_event(self: &Arc<Self>, event: &ChangeEvent) {
        let ChangeEvent::PlaylistChanged(change) = event else {
            return;
        };
        match change.kind {
            ChangeKind::Created => {
                if let Some(playlist) = &change.new {
                    self.watch_playlist(playlist.id.clone());
                }
                self.schedule_resort("playlist added");
            }
            ChangeKind::Removed => {
                self.unwatch_playlist(&PlaylistId::new(change.record_id.as_str()));
                self.schedule_resort("playlist removed");
            }
            ChangeKind::Updated => {
                if changed(change, |p| p.smart_sorted_order) {
                    self.schedule_resort("playlist rank changed");
                }
            }
        }
    }

    fn on_song_event(&self, event: &ChangeEvent) {
        let ChangeEvent::SongChanged(change) = event else {
            return;
        };
        match change.kind {
            ChangeKind::Created => self.schedule_resort("song added"),
            ChangeKind::Removed => self.schedule_resort("song removed"),
            ChangeKind::Updated => {
                if changed(change, |s| (s.position, s.smart_sorted_order)) {
                    self.schedule_resort("song moved");
                }
            }
        }
    }

    fn schedule_resort(&self, reason: &'static str) {
        debug!(group_id = %self.group_id, reason, "Re-sort scheduled");
        let query = self.query.clone();
        let group_id = self.group_id.clone();
        self.debouncer.trigger(async move {
            if let Err(e) = query.refresh().await {
                warn!(group_id = %group_id, error = %e, "Re-sort failed");
            }
        });
    }

    fn on_signal(&self, signal: &HubSignal) {
        let keys = self.watched_keys();
        if !keys.contains(&signal.key) {
            return;
        }

        match signal.state {
            ConnectionState::FallbackPolling => {
                if !self.polling.is_polling(&self.poll_key) {
                    warn!(
                        group_id = %self.group_id,
                        channel = %signal.key,
                        "Live updates unavailable, polling instead"
                    );
                    let query = self.query.clone();
                    self.polling.start(self.poll_key.clone(), move || {
                        let query = query.clone();
                        async move {
                            if let Err(e) = query.refresh().await {
                                debug!(error = %e, "Poll fetch failed");
                            }
                        }
                    });
                }
            }
            ConnectionState::Connected => {
                let still_degraded = keys
                    .iter()
                    .any(|k| self.hub.channel_state(k) == ConnectionState::FallbackPolling);
                if !still_degraded && self.polling.stop(&self.poll_key) {
                    info!(group_id = %self.group_id, "Live updates restored, polling stopped");
                    // Catch up on anything missed while polling
                    self.schedule_resort("reconnected");
                }
            }
            _ => {}
        }
    }
}

/// Whether a projection of the record differs between the old and new rows
///
/// Without a previous snapshot the change is assumed relevant.
fn changed<T, K: PartialEq>(change: &RecordChange<T>, project: impl Fn(&T) -> K) -> bool {
    match (&change.old, &change.new) {
        (Some(old), Some(new)) => project(old) != project(new),
        _ => true,
    }
}

fn spawn_signal_listener(
    shared: Weak<LiveShared>,
    mut signals: broadcast::Receiver<HubSignal>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            let signal = tokio::select! {
                () = cancel.cancelled() => break,
                received = signals.recv() => received,
            };
            match signal {
                Ok(signal) => match shared.upgrade() {
                    Some(shared) => shared.on_signal(&signal),
                    None => break,
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Missed hub signals");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

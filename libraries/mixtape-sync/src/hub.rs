//! Subscription hub
//!
//! One transport channel per [`ChannelKey`]. Subscribers with the same key
//! share the channel and are fanned out to in registration order. Each
//! channel is owned by a driver task that reads transport messages, delivers
//! changes and reconnects with exponential backoff. Once the reconnect
//! budget is spent the channel moves to [`ConnectionState::FallbackPolling`]
//! and a [`HubSignal`] tells consumers to poll instead.

use crate::events::{ChangeEvent, ChangeKind, EventFilter, RawChange, Table};
use crate::transport::{ChannelStatus, LiveTransport, TransportMessage};
use mixtape_core::config::HubSettings;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const SIGNAL_CAPACITY: usize = 64;

/// Identity of a shared channel
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelKey {
    pub table: Table,
    pub event: EventFilter,
    /// Row filter in transport syntax (`column=eq.value`)
    pub filter: Option<String>,
}

impl ChannelKey {
    /// Every change on `table`
    pub fn new(table: Table) -> Self {
        Self {
            table,
            event: EventFilter::All,
            filter: None,
        }
    }

    pub fn only(mut self, kind: ChangeKind) -> Self {
        self.event = EventFilter::Only(kind);
        self
    }

    /// Restrict to rows whose `column` equals `value`
    pub fn where_eq(mut self, column: &str, value: impl fmt::Display) -> Self {
        self.filter = Some(format!("{column}=eq.{value}"));
        self
    }

    /// Name the channel is opened under on the transport
    pub fn channel_name(&self) -> String {
        match &self.filter {
            Some(filter) => format!(
                "{}:{}:{}",
                self.table,
                self.event.as_transport_event(),
                filter
            ),
            None => format!("{}:{}", self.table, self.event.as_transport_event()),
        }
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.channel_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    FallbackPolling,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "DISCONNECTED",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Reconnecting => "RECONNECTING",
            ConnectionState::FallbackPolling => "FALLBACK_POLLING",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broadcast whenever a channel changes state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubSignal {
    pub key: ChannelKey,
    pub state: ConnectionState,
}

type Callback = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

struct Subscriber {
    id: u64,
    active: Arc<AtomicBool>,
    callback: Callback,
}

struct Channel {
    subscribers: Vec<Subscriber>,
    state: ConnectionState,
    cancel: CancellationToken,
}

struct HubInner {
    transport: Arc<dyn LiveTransport>,
    settings: HubSettings,
    channels: Mutex<HashMap<ChannelKey, Channel>>,
    signals: broadcast::Sender<HubSignal>,
    next_subscriber: AtomicU64,
    shutdown: CancellationToken,
}

/// Multiplexes local subscribers onto shared transport channels
#[derive(Clone)]
pub struct SubscriptionHub {
    inner: Arc<HubInner>,
}

impl SubscriptionHub {
    pub fn new(transport: Arc<dyn LiveTransport>, settings: HubSettings) -> Self {
        let (signals, _) = broadcast::channel(SIGNAL_CAPACITY);
        Self {
            inner: Arc::new(HubInner {
                transport,
                settings,
                channels: Mutex::new(HashMap::new()),
                signals,
                next_subscriber: AtomicU64::new(1),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Register `callback` for changes matching `key`
    ///
    /// Opens a transport channel if none exists for `key`, otherwise joins
    /// the existing one. Must be called from within a Tokio runtime.
    pub fn subscribe<F>(&self, key: ChannelKey, callback: F) -> Subscription
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(true));
        let subscriber = Subscriber {
            id,
            active: Arc::clone(&active),
            callback: Arc::new(callback),
        };

        let opened = {
            let mut channels = self.inner.lock();
            match channels.get_mut(&key) {
                Some(channel) => {
                    channel.subscribers.push(subscriber);
                    None
                }
                None => {
                    let cancel = self.inner.shutdown.child_token();
                    channels.insert(
                        key.clone(),
                        Channel {
                            subscribers: vec![subscriber],
                            state: ConnectionState::Connecting,
                            cancel: cancel.clone(),
                        },
                    );
                    Some(cancel)
                }
            }
        };

        match opened {
            Some(cancel) => {
                debug!(channel = %key, "Opening channel");
                self.inner.emit(&key, ConnectionState::Connecting);
                spawn_driver(Arc::clone(&self.inner), key.clone(), cancel);
            }
            None => debug!(channel = %key, subscriber = id, "Joined existing channel"),
        }

        Subscription {
            hub: Arc::downgrade(&self.inner),
            key,
            id,
            active,
        }
    }

    /// Aggregate state across channels
    ///
    /// The least healthy channel wins; with no channels the hub is
    /// disconnected.
    pub fn state(&self) -> ConnectionState {
        let channels = self.inner.lock();
        let states: Vec<ConnectionState> = channels.values().map(|c| c.state).collect();
        if states.is_empty() {
            return ConnectionState::Disconnected;
        }
        [
            ConnectionState::FallbackPolling,
            ConnectionState::Reconnecting,
            ConnectionState::Connecting,
        ]
        .into_iter()
        .find(|s| states.contains(s))
        .unwrap_or(ConnectionState::Connected)
    }

    pub fn channel_state(&self, key: &ChannelKey) -> ConnectionState {
        self.inner
            .lock()
            .get(key)
            .map_or(ConnectionState::Disconnected, |c| c.state)
    }

    pub fn channel_count(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn subscriber_count(&self, key: &ChannelKey) -> usize {
        self.inner
            .lock()
            .get(key)
            .map_or(0, |c| c.subscribers.len())
    }

    /// State transitions for every channel
    pub fn signals(&self) -> broadcast::Receiver<HubSignal> {
        self.inner.signals.subscribe()
    }

    /// Retry every channel that gave up and fell back to polling, typically
    /// after the network comes back. Returns how many were restarted.
    pub fn reconnect_all(&self) -> usize {
        let restarted: Vec<(ChannelKey, CancellationToken)> = {
            let mut channels = self.inner.lock();
            channels
                .iter_mut()
                .filter(|(_, c)| c.state == ConnectionState::FallbackPolling)
                .map(|(key, c)| {
                    c.state = ConnectionState::Connecting;
                    (key.clone(), c.cancel.clone())
                })
                .collect()
        };

        for (key, cancel) in &restarted {
            info!(channel = %key, "Retrying live channel");
            self.inner.emit_transition(key, ConnectionState::Connecting);
            spawn_driver(Arc::clone(&self.inner), key.clone(), cancel.clone());
        }
        restarted.len()
    }

    /// Close every channel and stop all drivers
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let closed: Vec<ChannelKey> = {
            let mut channels = self.inner.lock();
            channels
                .drain()
                .map(|(key, channel)| {
                    for subscriber in &channel.subscribers {
                        subscriber.active.store(false, Ordering::SeqCst);
                    }
                    key
                })
                .collect()
        };
        for key in &closed {
            self.inner.emit(key, ConnectionState::Disconnected);
        }
        info!(channels = closed.len(), "Subscription hub shut down");
    }
}

impl HubInner {
    fn lock(&self) -> MutexGuard<'_, HashMap<ChannelKey, Channel>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, key: &ChannelKey, state: ConnectionState) {
        // No receivers is fine
        let _ = self.signals.send(HubSignal {
            key: key.clone(),
            state,
        });
    }

    fn emit_transition(&self, key: &ChannelKey, state: ConnectionState) {
        info!(channel = %key, state = %state, "Channel state changed");
        self.emit(key, state);
    }

    /// Returns false when the channel no longer exists
    fn set_state(&self, key: &ChannelKey, state: ConnectionState) -> bool {
        let changed = {
            let mut channels = self.lock();
            let Some(channel) = channels.get_mut(key) else {
                return false;
            };
            let changed = channel.state != state;
            channel.state = state;
            changed
        };
        if changed {
            self.emit_transition(key, state);
        }
        true
    }

    fn deliver(&self, key: &ChannelKey, raw: RawChange) {
        let event = match ChangeEvent::try_from(raw) {
            Ok(event) => event,
            Err(e) => {
                warn!(channel = %key, error = %e, "Dropping malformed change");
                return;
            }
        };
        if !key.event.matches(event.kind()) {
            return;
        }

        // Callbacks run outside the lock so they may subscribe or unsubscribe
        let targets: Vec<(Arc<AtomicBool>, Callback)> = self
            .lock()
            .get(key)
            .map(|c| {
                c.subscribers
                    .iter()
                    .map(|s| (Arc::clone(&s.active), Arc::clone(&s.callback)))
                    .collect()
            })
            .unwrap_or_default();

        for (active, callback) in targets {
            if !active.load(Ordering::SeqCst) {
                continue;
            }
            if catch_unwind(AssertUnwindSafe(|| callback(&event))).is_err() {
                error!(
                    channel = %key,
                    record = event.record_id(),
                    "Subscriber callback panicked"
                );
            }
        }
    }

    fn remove_subscriber(&self, key: &ChannelKey, id: u64) {
        let torn_down = {
            let mut channels = self.lock();
            let Some(channel) = channels.get_mut(key) else {
                return;
            };
            channel.subscribers.retain(|s| s.id != id);
            if channel.subscribers.is_empty() {
                channels.remove(key).map(|c| c.cancel)
            } else {
                None
            }
        };

        if let Some(cancel) = torn_down {
            cancel.cancel();
            debug!(channel = %key, "Last subscriber left, channel closed");
            self.emit(key, ConnectionState::Disconnected);
        }
    }
}

fn spawn_driver(inner: Arc<HubInner>, key: ChannelKey, cancel: CancellationToken) {
    tokio::spawn(drive(inner, key, cancel));
}

/// Owns one transport channel for its whole life, across reconnects
async fn drive(inner: Arc<HubInner>, key: ChannelKey, cancel: CancellationToken) {
    let name = key.channel_name();
    let mut attempts: u32 = 0;

    loop {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let transport_id =
            inner
                .transport
                .open(&name, key.table, key.event, key.filter.as_deref(), tx);

        let status = loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    inner.transport.remove(transport_id);
                    return;
                }
                message = rx.recv() => match message {
                    Some(TransportMessage::Status(ChannelStatus::Subscribed)) => {
                        attempts = 0;
                        if !inner.set_state(&key, ConnectionState::Connected) {
                            inner.transport.remove(transport_id);
                            return;
                        }
                    }
                    Some(TransportMessage::Status(status)) => break status,
                    Some(TransportMessage::Change(raw)) => inner.deliver(&key, raw),
                    None => break ChannelStatus::Closed,
                }
            }
        };

        inner.transport.remove(transport_id);

        if attempts >= inner.settings.max_reconnect_attempts {
            warn!(
                channel = %key,
                attempts,
                "Reconnect attempts exhausted, falling back to polling"
            );
            inner.set_state(&key, ConnectionState::FallbackPolling);
            return;
        }

        attempts += 1;
        let delay = inner.settings.backoff_for(attempts);
        warn!(
            channel = %key,
            status = ?status,
            attempt = attempts,
            delay_ms = delay.as_millis() as u64,
            "Channel dropped, reconnecting"
        );
        if !inner.set_state(&key, ConnectionState::Reconnecting) {
            return;
        }

        tokio::select! {
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(delay) => {}
        }
    }
}

/// A live registration on the hub
///
/// Dropping it unsubscribes; the shared channel closes with its last
/// subscriber.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    hub: Weak<HubInner>,
    key: ChannelKey,
    id: u64,
    active: Arc<AtomicBool>,
}

impl Subscription {
    pub fn key(&self) -> &ChannelKey {
        &self.key
    }

    /// False once unsubscribed or the hub has shut down
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> ConnectionState {
        match self.hub.upgrade() {
            Some(inner) => inner
                .lock()
                .get(&self.key)
                .map_or(ConnectionState::Disconnected, |c| c.state),
            None => ConnectionState::Disconnected,
        }
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
        if let Some(inner) = self.hub.upgrade() {
            inner.remove_subscriber(&self.key, self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

//! Scriptable in-memory transport
//!
//! Each `open` consumes the next scripted behaviour (or the default one) and
//! reports the matching status straight into the channel's sink. Tests then
//! push row changes with [`MockTransport::emit`] or break channels with
//! [`MockTransport::drop_all`].

use crate::events::{EventFilter, RawChange, Table};
use crate::transport::{
    ChannelStatus, LiveTransport, TransportChannelId, TransportMessage, TransportSink,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// What the transport does when a channel is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenBehavior {
    /// Report `SUBSCRIBED`
    Subscribe,
    /// Report the given failure status
    Fail(ChannelStatus),
    /// Report nothing; the channel stays connecting
    Silent,
}

struct OpenChannel {
    table: Table,
    event: EventFilter,
    filter: Option<String>,
    sink: TransportSink,
}

struct MockInner {
    next_id: u64,
    open: HashMap<u64, OpenChannel>,
    names: Vec<String>,
    script: VecDeque<OpenBehavior>,
    default: OpenBehavior,
}

pub struct MockTransport {
    inner: Mutex<MockInner>,
}

impl MockTransport {
    /// Transport whose channels subscribe successfully
    pub fn new() -> Arc<Self> {
        Self::with_default(OpenBehavior::Subscribe)
    }

    /// Transport whose channels always fail to open
    pub fn failing() -> Arc<Self> {
        Self::with_default(OpenBehavior::Fail(ChannelStatus::ChannelError))
    }

    pub fn with_default(default: OpenBehavior) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(MockInner {
                next_id: 0,
                open: HashMap::new(),
                names: Vec::new(),
                script: VecDeque::new(),
                default,
            }),
        })
    }

    /// Queue behaviours for the next opens, ahead of the default
    pub fn script(&self, behaviors: impl IntoIterator<Item = OpenBehavior>) {
        self.lock().script.extend(behaviors);
    }

    pub fn set_default(&self, behavior: OpenBehavior) {
        self.lock().default = behavior;
    }

    /// Total number of `open` calls so far
    pub fn open_count(&self) -> usize {
        self.lock().names.len()
    }

    /// Channel names in the order they were opened
    pub fn opened_names(&self) -> Vec<String> {
        self.lock().names.clone()
    }

    /// Channels currently open
    pub fn live_channels(&self) -> usize {
        self.lock().open.len()
    }

    /// Deliver a change to every open channel whose table, event and filter
    /// match. Returns the number of channels it reached.
    pub fn emit(&self, raw: RawChange) -> usize {
        let inner = self.lock();
        let Some(table) = Table::from_str(&raw.table) else {
            return 0;
        };
        let kind = crate::events::ChangeKind::from_event_type(&raw.event_type);
        let mut delivered = 0;
        for channel in inner.open.values() {
            let event_ok = kind.map_or(true, |k| channel.event.matches(k));
            if channel.table == table
                && event_ok
                && matches_filter(channel.filter.as_deref(), &raw)
                && channel.sink.send(TransportMessage::Change(raw.clone())).is_ok()
            {
                delivered += 1;
            }
        }
        delivered
    }

    /// Report `status` on every open channel, as a network drop would
    pub fn drop_all(&self, status: ChannelStatus) {
        let inner = self.lock();
        for channel in inner.open.values() {
            let _ = channel.sink.send(TransportMessage::Status(status));
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl LiveTransport for MockTransport {
    fn open(
        &self,
        name: &str,
        table: Table,
        event: EventFilter,
        filter: Option<&str>,
        sink: TransportSink,
    ) -> TransportChannelId {
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.names.push(name.to_string());

        let behavior = inner.script.pop_front().unwrap_or(inner.default);
        match behavior {
            OpenBehavior::Subscribe => {
                let _ = sink.send(TransportMessage::Status(ChannelStatus::Subscribed));
            }
            OpenBehavior::Fail(status) => {
                let _ = sink.send(TransportMessage::Status(status));
            }
            OpenBehavior::Silent => {}
        }

        inner.open.insert(
            id,
            OpenChannel {
                table,
                event,
                filter: filter.map(str::to_string),
                sink,
            },
        );
        TransportChannelId(id)
    }

    fn remove(&self, id: TransportChannelId) {
        self.lock().open.remove(&id.0);
    }
}

/// Filters look like `column=eq.value`
fn matches_filter(filter: Option<&str>, raw: &RawChange) -> bool {
    let Some(filter) = filter else {
        return true;
    };
    let Some((column, value)) = filter.split_once("=eq.") else {
        return true;
    };
    let row = if raw.new.get(column).is_some() {
        &raw.new
    } else {
        &raw.old
    };
    match row.get(column) {
        Some(serde_json::Value::String(s)) => s == value,
        Some(other) => other.to_string() == value,
        None => false,
    }
}

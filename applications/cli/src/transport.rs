//! Transport for a process with no live-change feed
//!
//! Every channel reports `CLOSED` as soon as it opens, so the hub runs its
//! reconnect budget and then hands live views to the polling fallback.

use mixtape_sync::{
    ChannelStatus, EventFilter, LiveTransport, Table, TransportChannelId, TransportMessage,
    TransportSink,
};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

#[derive(Debug, Default)]
pub struct OfflineTransport {
    next_id: AtomicU64,
}

impl OfflineTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LiveTransport for OfflineTransport {
    fn open(
        &self,
        name: &str,
        _table: Table,
        _event: EventFilter,
        _filter: Option<&str>,
        sink: TransportSink,
    ) -> TransportChannelId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(channel = name, "No live feed, closing channel");
        // The hub may already have dropped the receiver
        let _ = sink.send(TransportMessage::Status(ChannelStatus::Closed));
        TransportChannelId(id)
    }

    fn remove(&self, _id: TransportChannelId) {}
}

//! Live-change transport boundary
//!
//! A transport opens named channels and pushes two kinds of messages into the
//! sink it was given: channel status updates and raw row changes. Status is
//! the only signal of channel health the hub looks at.

use crate::events::{EventFilter, RawChange, Table};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Channel status as reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelStatus {
    Subscribed,
    Closed,
    ChannelError,
    TimedOut,
}

impl ChannelStatus {
    /// Parse a transport status string
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "SUBSCRIBED" => Some(ChannelStatus::Subscribed),
            "CLOSED" => Some(ChannelStatus::Closed),
            "CHANNEL_ERROR" => Some(ChannelStatus::ChannelError),
            "TIMED_OUT" => Some(ChannelStatus::TimedOut),
            _ => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        !matches!(self, ChannelStatus::Subscribed)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportMessage {
    Status(ChannelStatus),
    Change(RawChange),
}

/// Where a transport delivers messages for one opened channel
pub type TransportSink = mpsc::UnboundedSender<TransportMessage>;

/// Transport-assigned identifier of an opened channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransportChannelId(pub u64);

/// The live-change transport collaborator
pub trait LiveTransport: Send + Sync {
    /// Open a channel listening for `event` changes on `table` rows matching
    /// `filter`. Messages for this channel go to `sink` until it is removed.
    fn open(
        &self,
        name: &str,
        table: Table,
        event: EventFilter,
        filter: Option<&str>,
        sink: TransportSink,
    ) -> TransportChannelId;

    /// Tear a channel down; no further messages are sent to its sink
    fn remove(&self, id: TransportChannelId);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings() {
        assert_eq!(ChannelStatus::from_str("SUBSCRIBED"), Some(ChannelStatus::Subscribed));
        assert_eq!(ChannelStatus::from_str("CHANNEL_ERROR"), Some(ChannelStatus::ChannelError));
        assert_eq!(ChannelStatus::from_str("bogus"), None);
        assert!(ChannelStatus::Closed.is_failure());
        assert!(!ChannelStatus::Subscribed.is_failure());
    }
}

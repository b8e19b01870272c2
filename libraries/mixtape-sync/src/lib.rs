//! Mixtape - Live Synchronization
//!
//! Keeps many connected clients consistent with the shared store.
//!
//! This crate provides:
//! - **Subscription hub**: one live channel per (table, event, filter), many
//!   local listeners fanned out from it, reconnect with exponential backoff
//!   and a switch to polling when the channel cannot be restored
//! - **Typed change events**: raw transport payloads converted at the
//!   boundary into one variant per table
//! - **Polling fallback**: interval re-fetch that slows down while hidden
//! - **Scheduler**: delayed tasks with cancellation handles, and a debouncer
//! - **Cache**: TTL entries with a staleness flag, persisted through a
//!   pluggable store
//! - **Optimistic mutations**: snapshot, provisional publish, restore on failure
//! - **Conflict resolution**: per-field diff of two record versions and four
//!   resolution strategies, with a bounded audit log
//!
//! # Architecture
//!
//! ```text
//!  transport ──raw──▶ SubscriptionHub ──ChangeEvent──▶ callbacks
//!      ▲                   │ drop
//!      │ reopen            ▼
//!      └──── backoff ◀── RECONNECTING ──(attempts exhausted)──▶ FALLBACK_POLLING
//!                                                                   │
//!                                                      PollingService ◀┘
//! ```
//!
//! All shared maps (hub channels, cache entries) are guarded by plain mutexes
//! that are never held across an `.await`, so every update is applied as one
//! non-yielding step.

mod cache;
mod conflict;
mod events;
mod hub;
mod optimistic;
mod polling;
mod scheduler;
mod transport;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use cache::{Cache, CacheEntry, CacheLookup, CacheSlot, CacheStore, MemoryCacheStore};
pub use conflict::{
    deep_equal, detect, ConflictReport, ConflictResolver, PendingDecision, Resolution, ResolutionRecord,
    Side, Strategy,
};
pub use events::{ChangeEvent, ChangeKind, EventFilter, RawChange, RecordChange, Table};
pub use hub::{ChannelKey, ConnectionState, HubSignal, Subscription, SubscriptionHub};
pub use optimistic::{apply_with_snapshot, Mutation, Snapshot, StateCell};
pub use polling::{PollHandle, PollingService, Visibility};
pub use scheduler::{Debouncer, Scheduler, TaskHandle};
pub use transport::{ChannelStatus, LiveTransport, TransportChannelId, TransportMessage, TransportSink};

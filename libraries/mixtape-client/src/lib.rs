//! Mixtape Client
//!
//! The process-scoped engine applications talk to. It ties the store, the
//! cache and the live subscription hub together behind one handle.
//!
//! # Features
//!
//! - **Cached queries**: stale-while-revalidate reads with request dedupe,
//!   retry and optimistic mutation ([`Query`])
//! - **Live group order**: re-sorts on change events and falls back to
//!   polling when live channels give up ([`LiveGroupOrder`])
//! - **Sorting**: smart sort through an [`mixtape_core::OrderScorer`], quick
//!   sort and reset
//! - **Likes**: optimistic toggles with rollback
//! - **Export**: hands a group's order to an [`mixtape_export::ExportTarget`]
//!
//! # Example
//!
//! ```rust,ignore
//! use mixtape_client::{LiveGroupOrder, MixtapeEngine};
//!
//! let engine = MixtapeEngine::new(config, transport, store, None)?;
//! engine.hydrate().await?;
//!
//! let live = LiveGroupOrder::start(&engine, group_id).await?;
//! let mut updates = live.subscribe();
//! while updates.changed().await.is_ok() {
//!     render(updates.borrow().data.as_ref());
//! }
//!
//! engine.shutdown().await?;
//! ```

#![forbid(unsafe_code)]

mod engine;
mod export;
mod groups;
mod likes;
mod live_order;
mod order;
mod query;

pub use engine::{group_order_key, likes_key, EngineBuilder, MixtapeEngine};
pub use groups::SortOutcome;
pub use likes::summarize;
pub use live_order::LiveGroupOrder;
pub use order::{GroupOrder, OrderedSong};
pub use query::{Query, QueryData, QueryState, Updater};

pub use mixtape_sync::Visibility;

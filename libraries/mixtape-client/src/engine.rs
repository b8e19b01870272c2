//! Process-scoped engine
//!
//! Owns the cache, the subscription hub, the polling service and the
//! scheduler. Build it once at startup, call [`MixtapeEngine::hydrate`]
//! before the first read and [`MixtapeEngine::shutdown`] on exit.

use crate::order::{load_group_order, GroupOrder};
use crate::query::{Query, QueryData, QueryRegistry};
use mixtape_core::types::{GroupId, LikeSummary, UserId};
use mixtape_core::{Clock, EngineConfig, GroupStorage, Result, SystemClock, TrackResolver};
use mixtape_sync::{
    Cache, CacheStore, LiveTransport, PollingService, Scheduler, SubscriptionHub, Visibility,
};
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

/// Cache key of a group's rendered order
pub fn group_order_key(group_id: &GroupId) -> String {
    format!("group:{group_id}:order")
}

/// Cache key of a user's view of a group's likes
pub fn likes_key(group_id: &GroupId, user_id: &UserId) -> String {
    format!("group:{group_id}:likes:{user_id}")
}

pub(crate) struct EngineInner {
    pub(crate) config: EngineConfig,
    pub(crate) store: Arc<dyn GroupStorage>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) cache: Cache,
    pub(crate) hub: SubscriptionHub,
    pub(crate) polling: PollingService,
    pub(crate) scheduler: Scheduler,
    pub(crate) resolver: Option<Arc<dyn TrackResolver>>,
    pub(crate) queries: QueryRegistry,
}

#[derive(Clone)]
pub struct MixtapeEngine {
    pub(crate) inner: Arc<EngineInner>,
}

pub struct EngineBuilder {
    config: EngineConfig,
    transport: Arc<dyn LiveTransport>,
    store: Arc<dyn GroupStorage>,
    cache_store: Option<Arc<dyn CacheStore>>,
    clock: Arc<dyn Clock>,
    resolver: Option<Arc<dyn TrackResolver>>,
}

impl EngineBuilder {
    /// Persist cache entries so they survive a restart
    pub fn cache_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.cache_store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Cross-platform lookup used by exports
    pub fn resolver(mut self, resolver: Arc<dyn TrackResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn build(self) -> Result<MixtapeEngine> {
        self.config.validate()?;

        let ttl = self.config.cache.default_ttl();
        let cache = match self.cache_store {
            Some(store) => Cache::with_store(Arc::clone(&self.clock), ttl, store),
            None => Cache::new(Arc::clone(&self.clock), ttl),
        };

        Ok(MixtapeEngine {
            inner: Arc::new(EngineInner {
                hub: SubscriptionHub::new(self.transport, self.config.hub.clone()),
                polling: PollingService::new(self.config.polling.clone()),
                scheduler: Scheduler::new(),
                config: self.config,
                store: self.store,
                clock: self.clock,
                cache,
                resolver: self.resolver,
                queries: QueryRegistry::default(),
            }),
        })
    }
}

impl MixtapeEngine {
    pub fn new(
        config: EngineConfig,
        transport: Arc<dyn LiveTransport>,
        store: Arc<dyn GroupStorage>,
        cache_store: Option<Arc<dyn CacheStore>>,
    ) -> Result<Self> {
        let mut builder = Self::builder(config, transport, store);
        builder.cache_store = cache_store;
        builder.build()
    }

    pub fn builder(
        config: EngineConfig,
        transport: Arc<dyn LiveTransport>,
        store: Arc<dyn GroupStorage>,
    ) -> EngineBuilder {
        EngineBuilder {
            config,
            transport,
            store,
            cache_store: None,
            clock: Arc::new(SystemClock),
            resolver: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<dyn GroupStorage> {
        &self.inner.store
    }

    pub fn cache(&self) -> &Cache {
        &self.inner.cache
    }

    pub fn hub(&self) -> &SubscriptionHub {
        &self.inner.hub
    }

    pub fn polling(&self) -> &PollingService {
        &self.inner.polling
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    /// Load persisted cache entries; returns how many were restored
    pub async fn hydrate(&self) -> Result<usize> {
        let restored = self.inner.cache.hydrate().await?;
        info!(entries = restored, "Cache hydrated");
        Ok(restored)
    }

    /// Write pending cache changes to the cache store
    pub async fn flush(&self) -> Result<usize> {
        self.inner.cache.flush().await
    }

    /// Close every channel, cancel pollers and timers, then flush the cache
    pub async fn shutdown(&self) -> Result<()> {
        self.inner.queries.dispose_all();
        self.inner.hub.shutdown();
        self.inner.polling.shutdown();
        self.inner.scheduler.shutdown();

        match self.inner.cache.flush().await {
            Ok(written) => {
                info!(cache_writes = written, "Engine shut down");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Cache flush failed during shutdown");
                Err(e)
            }
        }
    }

    /// The consuming view regained focus
    pub fn on_focus(&self) -> usize {
        self.inner.polling.set_visibility(Visibility::Visible);
        self.inner.queries.revalidate_all()
    }

    /// The network came back
    pub fn on_reconnect(&self) -> usize {
        let channels = self.inner.hub.reconnect_all();
        let queries = self.inner.queries.revalidate_all();
        info!(channels, queries, "Reconnected");
        queries
    }

    pub fn set_visibility(&self, visibility: Visibility) {
        self.inner.polling.set_visibility(visibility);
        if visibility == Visibility::Visible {
            self.inner.queries.revalidate_all();
        }
    }

    /// Cached query registered for focus and reconnect revalidation
    pub fn query<T, F, Fut>(&self, key: impl Into<String>, fetch: F) -> Query<T>
    where
        T: QueryData,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let query = Query::new(
            key,
            self.inner.cache.clone(),
            self.inner.config.cache.clone(),
            fetch,
        );
        self.inner.queries.register(&query);
        query
    }

    /// The group's reconciled song order
    pub fn group_order_query(&self, group_id: &GroupId) -> Query<GroupOrder> {
        let store = Arc::clone(&self.inner.store);
        let id = group_id.clone();
        self.query(group_order_key(group_id), move || {
            let store = Arc::clone(&store);
            let id = id.clone();
            async move { load_group_order(store.as_ref(), &id).await }
        })
    }

    /// Like counts for the group's songs as seen by `user_id`
    pub fn likes_query(&self, group_id: &GroupId, user_id: &UserId) -> Query<Vec<LikeSummary>> {
        let store = Arc::clone(&self.inner.store);
        let group = group_id.clone();
        let user = user_id.clone();
        self.query(likes_key(group_id, user_id), move || {
            let store = Arc::clone(&store);
            let group = group.clone();
            let user = user.clone();
            async move { crate::likes::load_like_counts(store.as_ref(), &group, &user).await }
        })
    }

    /// Store a freshly computed order and push it to open queries
    pub(crate) fn publish_order(&self, order: &GroupOrder) {
        let key = group_order_key(&order.group.id);
        if let Err(e) = self.inner.cache.set_as(key.clone(), order, None) {
            warn!(group_id = %order.group.id, error = %e, "Failed to cache group order");
            return;
        }
        self.inner.queries.sync_key(&key);
    }

    /// Mark the group's cached order stale and refetch it
    pub(crate) fn invalidate_order(&self, group_id: &GroupId) {
        let key = group_order_key(group_id);
        self.inner.cache.mark_stale(&key);
        self.inner.queries.revalidate_key(&key);
    }
}

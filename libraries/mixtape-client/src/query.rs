//! Cached queries
//!
//! A [`Query`] serves its cache entry immediately, stale or not, and
//! revalidates in the background when the entry is stale or missing.
//! Revalidations started within the dedupe window of the previous one are
//! dropped. Failed fetches retry with exponential backoff while the error is
//! recoverable. Once disposed, results still in flight are discarded.
//!
//! Every fetch and every [`Query::mutate`] takes a sequence number. A fetch
//! result is applied only if nothing newer has written the data since that
//! fetch started, so a slow response never overwrites a later mutation or a
//! later confirmed fetch.

use futures_util::future::BoxFuture;
use mixtape_core::config::CacheSettings;
use mixtape_core::{MixtapeError, Result};
use mixtape_sync::{Cache, CacheEntry, Snapshot, StateCell};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Values a query can cache
pub trait QueryData: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> QueryData for T where T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

type Fetcher<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T>> + Send + Sync>;

/// What a consumer renders
#[derive(Debug, Clone)]
pub struct QueryState<T> {
    pub data: Option<T>,
    /// Last fetch failure, cleared by the next success
    pub error: Option<MixtapeError>,
    pub is_stale: bool,
    pub is_validating: bool,
}

impl<T> Default for QueryState<T> {
    fn default() -> Self {
        Self {
            data: None,
            error: None,
            is_stale: true,
            is_validating: false,
        }
    }
}

/// New data for [`Query::mutate`]
pub enum Updater<T> {
    Value(T),
    Apply(Box<dyn FnOnce(Option<&T>) -> T + Send>),
}

impl<T> Updater<T> {
    pub fn value(value: T) -> Self {
        Self::Value(value)
    }

    /// Derive the new value from the current one
    pub fn apply(f: impl FnOnce(Option<&T>) -> T + Send + 'static) -> Self {
        Self::Apply(Box::new(f))
    }
}

#[derive(Default)]
struct Gate {
    last_started: Option<Instant>,
    in_flight: usize,
    /// Last sequence number handed out
    issued: u64,
    /// Sequence number of the write the current data came from
    applied: u64,
}

impl Gate {
    fn next_seq(&mut self) -> u64 {
        self.issued += 1;
        self.issued
    }
}

struct QueryInner<T> {
    key: String,
    cache: Cache,
    settings: CacheSettings,
    fetcher: Fetcher<T>,
    state: StateCell<QueryState<T>>,
    gate: Mutex<Gate>,
    disposed: CancellationToken,
}

pub struct Query<T> {
    inner: Arc<QueryInner<T>>,
}

impl<T> Clone for Query<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: QueryData> Query<T> {
    /// Query `key`, loading it with `fetch` when the cache cannot answer
    pub fn new<F, Fut>(key: impl Into<String>, cache: Cache, settings: CacheSettings, fetch: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let key = key.into();
        let mut initial = QueryState::default();
        if let Some(cached) = cache.get_as::<T>(&key) {
            initial.data = Some(cached.value);
            initial.is_stale = cached.is_stale;
        }

        Self {
            inner: Arc::new(QueryInner {
                key,
                cache,
                settings,
                fetcher: Arc::new(move || -> BoxFuture<'static, Result<T>> { Box::pin(fetch()) }),
                state: StateCell::new(initial),
                gate: Mutex::new(Gate::default()),
                disposed: CancellationToken::new(),
            }),
        }
    }

    pub fn key(&self) -> &str {
        &self.inner.key
    }

    /// Cached data right now, revalidating in the background if it is stale
    /// or missing
    ///
    /// Must be called from within a Tokio runtime.
    pub fn read(&self) -> Option<T> {
        match self.inner.cache.get_as::<T>(&self.inner.key) {
            Some(cached) => {
                let value = cached.value.clone();
                self.inner.publish(cached.value, cached.is_stale);
                if cached.is_stale {
                    self.revalidate();
                }
                Some(value)
            }
            None => {
                self.revalidate();
                self.inner.state.get().data
            }
        }
    }

    pub fn state(&self) -> QueryState<T> {
        self.inner.state.get()
    }

    pub fn data(&self) -> Option<T> {
        self.inner.state.get().data
    }

    pub fn subscribe(&self) -> watch::Receiver<QueryState<T>> {
        self.inner.state.subscribe()
    }

    /// Start a background fetch unless one is running, one started within
    /// the dedupe window, or the query is disposed. Returns whether a fetch
    /// started.
    pub fn revalidate(&self) -> bool {
        Arc::clone(&self.inner).spawn_revalidate(false)
    }

    /// Fetch now, ignoring the dedupe window
    ///
    /// The fetched value is returned even when a newer write has already
    /// replaced it in the query.
    pub async fn refresh(&self) -> Result<T> {
        let Some(seq) = self.inner.begin(true) else {
            return Err(MixtapeError::Other(format!(
                "query {} has been disposed",
                self.inner.key
            )));
        };
        self.inner.execute(seq).await
    }

    /// Replace the data locally
    ///
    /// The cache is written before this returns. With `revalidate` a fetch
    /// follows to confirm the value against the source.
    pub fn mutate(&self, updater: Updater<T>, revalidate: bool) {
        let next = match updater {
            Updater::Value(value) => value,
            Updater::Apply(f) => f(self.inner.current().as_ref()),
        };
        {
            let mut gate = self.inner.gate();
            gate.applied = gate.next_seq();
            self.inner.store(&next);
            self.inner.state.update(|s| {
                s.data = Some(next);
                s.is_stale = false;
            });
        }

        if revalidate {
            Arc::clone(&self.inner).spawn_revalidate(true);
        }
    }

    /// Mark the cached entry stale and revalidate
    pub fn invalidate(&self) -> bool {
        self.inner.cache.mark_stale(&self.inner.key);
        self.inner.state.update(|s| s.is_stale = true);
        self.revalidate()
    }

    /// Stop serving this consumer; in-flight results are dropped
    pub fn dispose(&self) {
        self.inner.disposed.cancel();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.is_cancelled()
    }

    pub(crate) fn hooks(&self) -> Weak<dyn QueryHooks> {
        let weak: Weak<QueryInner<T>> = Arc::downgrade(&self.inner);
        weak
    }
}

impl<T: QueryData> QueryInner<T> {
    fn gate(&self) -> MutexGuard<'_, Gate> {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim a fetch slot and its sequence number; `force` skips the
    /// in-flight and dedupe checks
    fn begin(&self, force: bool) -> Option<u64> {
        if self.disposed.is_cancelled() {
            return None;
        }
        let mut gate = self.gate();
        if !force {
            if gate.in_flight > 0 {
                return None;
            }
            let window = self.settings.dedupe_window();
            if gate.last_started.is_some_and(|at| at.elapsed() < window) {
                debug!(query = %self.key, "Revalidation deduped");
                return None;
            }
        }
        gate.in_flight += 1;
        gate.last_started = Some(Instant::now());
        Some(gate.next_seq())
    }

    fn spawn_revalidate(self: Arc<Self>, force: bool) -> bool {
        let Some(seq) = self.begin(force) else {
            return false;
        };
        tokio::spawn(async move {
            // Failures are recorded in the query state
            let _ = self.execute(seq).await;
        });
        true
    }

    async fn execute(&self, seq: u64) -> Result<T> {
        self.state.update(|s| s.is_validating = true);
        let result = self.fetch_with_retry().await;

        let mut gate = self.gate();
        gate.in_flight -= 1;
        let still_validating = gate.in_flight > 0;

        if self.disposed.is_cancelled() {
            debug!(query = %self.key, "Discarding result for disposed query");
            self.state.update(|s| s.is_validating = false);
            return result;
        }

        if seq < gate.applied {
            debug!(query = %self.key, seq, applied = gate.applied, "Discarding superseded fetch");
            self.state.update(|s| s.is_validating = still_validating);
            return result;
        }

        match &result {
            Ok(value) => {
                gate.applied = seq;
                self.store(value);
                self.state.update(|s| {
                    s.data = Some(value.clone());
                    s.error = None;
                    s.is_stale = false;
                    s.is_validating = still_validating;
                });
            }
            Err(e) => {
                self.state.update(|s| {
                    s.error = Some(e.clone());
                    s.is_validating = still_validating;
                });
            }
        }
        result
    }

    async fn fetch_with_retry(&self) -> Result<T> {
        let mut attempt = 0;
        loop {
            match (self.fetcher)().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.settings.retry_count && e.is_recoverable() => {
                    attempt += 1;
                    let delay = self.settings.retry_delay(attempt);
                    warn!(
                        query = %self.key,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Fetch failed, retrying"
                    );
                    tokio::select! {
                        () = self.disposed.cancelled() => return Err(e),
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn current(&self) -> Option<T> {
        self.cache
            .get_as::<T>(&self.key)
            .map(|cached| cached.value)
            .or_else(|| self.state.get().data)
    }

    fn store(&self, value: &T) {
        if let Err(e) = self.cache.set_as(self.key.clone(), value, None) {
            warn!(query = %self.key, error = %e, "Failed to cache query data");
        }
    }

    fn publish(&self, value: T, is_stale: bool) {
        self.state.update(|s| {
            s.data = Some(value);
            s.is_stale = is_stale;
        });
    }
}

/// Snapshot of both the rendered state and the cache entry behind it
impl<T: QueryData> Snapshot for Query<T> {
    type Snap = (QueryState<T>, Option<CacheEntry>);

    fn snapshot(&self) -> Self::Snap {
        (self.inner.state.get(), self.inner.cache.entry(&self.inner.key))
    }

    fn restore(&self, (state, entry): Self::Snap) {
        self.inner.cache.restore_entry(&self.inner.key, entry);
        self.inner.state.set(state);
    }
}

/// Type-erased view of a query for engine-wide triggers
pub(crate) trait QueryHooks: Send + Sync {
    fn key(&self) -> &str;
    fn is_disposed(&self) -> bool;
    fn revalidate(self: Arc<Self>) -> bool;
    /// Re-read the cache after another writer changed it
    fn sync_from_cache(&self);
    fn dispose(&self);
}

impl<T: QueryData> QueryHooks for QueryInner<T> {
    fn key(&self) -> &str {
        &self.key
    }

    fn is_disposed(&self) -> bool {
        self.disposed.is_cancelled()
    }

    fn revalidate(self: Arc<Self>) -> bool {
        self.spawn_revalidate(false)
    }

    fn sync_from_cache(&self) {
        if let Some(cached) = self.cache.get_as::<T>(&self.key) {
            self.publish(cached.value, cached.is_stale);
        }
    }

    fn dispose(&self) {
        self.disposed.cancel();
    }
}

/// Live queries created through the engine
#[derive(Default)]
pub(crate) struct QueryRegistry {
    entries: Mutex<Vec<Weak<dyn QueryHooks>>>,
}

impl QueryRegistry {
    pub(crate) fn register<T: QueryData>(&self, query: &Query<T>) {
        self.lock().push(query.hooks());
    }

    fn live(&self) -> Vec<Arc<dyn QueryHooks>> {
        let mut entries = self.lock();
        let mut live = Vec::with_capacity(entries.len());
        entries.retain(|weak| match weak.upgrade() {
            Some(hooks) if !hooks.is_disposed() => {
                live.push(hooks);
                true
            }
            _ => false,
        });
        live
    }

    /// Revalidate every live query; returns how many fetches started
    pub(crate) fn revalidate_all(&self) -> usize {
        self.live()
            .into_iter()
            .filter(|hooks| Arc::clone(hooks).revalidate())
            .count()
    }

    pub(crate) fn sync_key(&self, key: &str) {
        for hooks in self.live() {
            if hooks.key() == key {
                hooks.sync_from_cache();
            }
        }
    }

    /// Revalidate live queries for `key`
    pub(crate) fn revalidate_key(&self, key: &str) -> usize {
        self.live()
            .into_iter()
            .filter(|hooks| hooks.key() == key)
            .filter(|hooks| Arc::clone(hooks).revalidate())
            .count()
    }

    pub(crate) fn len(&self) -> usize {
        self.live().len()
    }

    pub(crate) fn dispose_all(&self) {
        for hooks in self.lock().drain(..) {
            if let Some(hooks) = hooks.upgrade() {
                hooks.dispose();
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Weak<dyn QueryHooks>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mixtape_core::clock::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn settings() -> CacheSettings {
        CacheSettings {
            default_ttl_secs: 60,
            dedupe_window_ms: 2000,
            retry_count: 3,
            retry_base_ms: 1000,
        }
    }

    fn counting_query(
        cache: &Cache,
        calls: &Arc<AtomicUsize>,
    ) -> Query<Vec<String>> {
        let calls = Arc::clone(calls);
        Query::new("songs:g1", cache.clone(), settings(), move || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Ok(vec![format!("fetch-{n}")]) }
        })
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn missing_entry_fetches_in_background() {
        let cache = Cache::new(Arc::new(ManualClock::new(chrono::Utc::now())), Duration::from_secs(60));
        let calls = Arc::new(AtomicUsize::new(0));
        let query = counting_query(&cache, &calls);

        assert_eq!(query.read(), None);
        settle().await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(query.data(), Some(vec!["fetch-1".to_string()]));
        assert!(cache.get("songs:g1").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_entry_is_served_without_fetching() {
        let cache = Cache::new(Arc::new(ManualClock::new(chrono::Utc::now())), Duration::from_secs(60));
        cache.set("songs:g1", serde_json::json!(["cached"]), None);
        let calls = Arc::new(AtomicUsize::new(0));
        let query = counting_query(&cache, &calls);

        assert_eq!(query.read(), Some(vec!["cached".to_string()]));
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_entry_is_served_then_revalidated() {
        let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
        let cache = Cache::new(clock.clone(), Duration::from_secs(60));
        cache.set("songs:g1", serde_json::json!(["old"]), None);
        clock.advance(chrono::Duration::seconds(61));

        let calls = Arc::new(AtomicUsize::new(0));
        let query = counting_query(&cache, &calls);

        assert_eq!(query.read(), Some(vec!["old".to_string()]));
        settle().await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(query.read(), Some(vec!["fetch-1".to_string()]));
        assert!(!query.state().is_stale);
    }

    #[tokio::test(start_paused = true)]
    async fn revalidations_inside_window_are_deduped() {
        let cache = Cache::new(Arc::new(ManualClock::new(chrono::Utc::now())), Duration::from_secs(60));
        let calls = Arc::new(AtomicUsize::new(0));
        let query = counting_query(&cache, &calls);

        assert!(query.revalidate());
        settle().await;
        assert!(!query.revalidate());
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!query.revalidate());
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(query.revalidate());
        settle().await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn recoverable_failures_retry_with_backoff() {
        let cache = Cache::new(Arc::new(ManualClock::new(chrono::Utc::now())), Duration::from_secs(60));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let query: Query<u32> = Query::new("n", cache, settings(), move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(MixtapeError::storage("busy"))
                } else {
                    Ok(7)
                }
            }
        });

        let started = Instant::now();
        assert_eq!(query.refresh().await.unwrap(), 7);

        // 1s then 2s of backoff
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(3) && waited < Duration::from_millis(3100));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(query.state().error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_surface_the_error() {
        let cache = Cache::new(Arc::new(ManualClock::new(chrono::Utc::now())), Duration::from_secs(60));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let query: Query<u32> = Query::new("n", cache, settings(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(MixtapeError::storage("down")) }
        });

        assert!(query.refresh().await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(matches!(query.state().error, Some(MixtapeError::Storage(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn non_recoverable_failures_do_not_retry() {
        let cache = Cache::new(Arc::new(ManualClock::new(chrono::Utc::now())), Duration::from_secs(60));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let query: Query<u32> = Query::new("n", cache, settings(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(MixtapeError::not_found("group", "g1")) }
        });

        assert!(query.refresh().await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn mutate_writes_cache_synchronously() {
        let cache = Cache::new(Arc::new(ManualClock::new(chrono::Utc::now())), Duration::from_secs(60));
        let calls = Arc::new(AtomicUsize::new(0));
        let query = counting_query(&cache, &calls);

        query.mutate(Updater::value(vec!["a".to_string()]), false);
        assert_eq!(cache.get_as::<Vec<String>>("songs:g1").unwrap().value, ["a"]);

        query.mutate(
            Updater::apply(|prev: Option<&Vec<String>>| {
                let mut next = prev.cloned().unwrap_or_default();
                next.push("b".to_string());
                next
            }),
            false,
        );
        assert_eq!(query.data(), Some(vec!["a".to_string(), "b".to_string()]));

        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn mutate_can_schedule_revalidation() {
        let cache = Cache::new(Arc::new(ManualClock::new(chrono::Utc::now())), Duration::from_secs(60));
        let calls = Arc::new(AtomicUsize::new(0));
        let query = counting_query(&cache, &calls);

        query.mutate(Updater::value(vec!["optimistic".to_string()]), true);
        assert_eq!(query.data(), Some(vec!["optimistic".to_string()]));

        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(query.data(), Some(vec!["fetch-1".to_string()]));
    }

    #[tokio::test(start_paused = true)]
    async fn disposed_query_discards_in_flight_result() {
        let cache = Cache::new(Arc::new(ManualClock::new(chrono::Utc::now())), Duration::from_secs(60));
        let query: Query<u32> = Query::new("slow", cache.clone(), settings(), || async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(1)
        });

        assert!(query.revalidate());
        settle().await;
        query.dispose();
        tokio::time::sleep(Duration::from_millis(600)).await;

        assert_eq!(query.data(), None);
        assert!(cache.get("slow").is_none());
        assert!(!query.revalidate());
    }

    fn slow_then_fast_query(cache: &Cache) -> Query<String> {
        let calls = Arc::new(AtomicUsize::new(0));
        Query::new("order:g1", cache.clone(), settings(), move || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    Ok("server-before-edit".to_string())
                } else {
                    Ok("server-after-edit".to_string())
                }
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn slow_fetch_does_not_overwrite_later_mutation() {
        let cache = Cache::new(Arc::new(ManualClock::new(chrono::Utc::now())), Duration::from_secs(60));
        let query = slow_then_fast_query(&cache);

        assert!(query.revalidate());
        tokio::time::sleep(Duration::from_millis(100)).await;
        query.mutate(Updater::value("edited".to_string()), true);
        settle().await;
        assert_eq!(query.data().as_deref(), Some("server-after-edit"));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(query.data().as_deref(), Some("server-after-edit"));
        assert_eq!(
            cache.get_as::<String>("order:g1").unwrap().value,
            "server-after-edit"
        );
        assert!(!query.state().is_validating);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_fetch_does_not_overwrite_local_only_mutation() {
        let cache = Cache::new(Arc::new(ManualClock::new(chrono::Utc::now())), Duration::from_secs(60));
        let query = slow_then_fast_query(&cache);

        assert!(query.revalidate());
        tokio::time::sleep(Duration::from_millis(100)).await;
        query.mutate(Updater::value("edited".to_string()), false);
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(query.data().as_deref(), Some("edited"));
        assert_eq!(cache.get_as::<String>("order:g1").unwrap().value, "edited");
        assert!(!query.state().is_validating);
    }

    #[tokio::test(start_paused = true)]
    async fn disposed_query_clears_validating_flag() {
        let cache = Cache::new(Arc::new(ManualClock::new(chrono::Utc::now())), Duration::from_secs(60));
        let query = slow_then_fast_query(&cache);

        assert!(query.revalidate());
        settle().await;
        assert!(query.state().is_validating);
        query.dispose();
        tokio::time::sleep(Duration::from_millis(600)).await;

        assert!(!query.state().is_validating);
        assert_eq!(query.data(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn registry_fans_out_and_forgets_disposed_queries() {
        let cache = Cache::new(Arc::new(ManualClock::new(chrono::Utc::now())), Duration::from_secs(60));
        let calls = Arc::new(AtomicUsize::new(0));
        let first = counting_query(&cache, &calls);
        let counter = Arc::clone(&calls);
        let second: Query<u32> = Query::new("other", cache, settings(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(1) }
        });

        let registry = QueryRegistry::default();
        registry.register(&first);
        registry.register(&second);
        assert_eq!(registry.revalidate_all(), 2);

        second.dispose();
        assert_eq!(registry.len(), 1);
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}

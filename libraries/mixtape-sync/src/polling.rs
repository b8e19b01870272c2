//! Polling fallback
//!
//! Interval re-fetch for reads whose live channel is unavailable. The
//! interval follows view visibility, and becoming visible polls at once.

use mixtape_core::config::PollingSettings;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Visibility {
    Visible,
    Hidden,
}

/// Handle to one running poller
#[derive(Debug, Clone)]
pub struct PollHandle {
    key: String,
    token: CancellationToken,
}

impl PollHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[derive(Clone)]
pub struct PollingService {
    settings: PollingSettings,
    visibility: Arc<watch::Sender<Visibility>>,
    pollers: Arc<Mutex<HashMap<String, CancellationToken>>>,
    root: CancellationToken,
}

impl PollingService {
    pub fn new(settings: PollingSettings) -> Self {
        let (visibility, _) = watch::channel(Visibility::Visible);
        Self {
            settings,
            visibility: Arc::new(visibility),
            pollers: Arc::new(Mutex::new(HashMap::new())),
            root: CancellationToken::new(),
        }
    }

    /// Poll `fetch` under `key` until stopped
    ///
    /// Starting a key that is already polling replaces the old poller. The
    /// first fetch happens after one interval.
    pub fn start<F, Fut>(&self, key: impl Into<String>, fetch: F) -> PollHandle
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let key = key.into();
        let token = self.root.child_token();
        if let Some(previous) = self.lock().insert(key.clone(), token.clone()) {
            debug!(poller = %key, "Replacing existing poller");
            previous.cancel();
        }
        info!(poller = %key, "Polling fallback started");

        let settings = self.settings.clone();
        let mut visibility = self.visibility.subscribe();
        let loop_token = token.clone();
        let pollers = Arc::clone(&self.pollers);
        let loop_key = key.clone();

        tokio::spawn(async move {
            loop {
                let interval = interval_for(&settings, *visibility.borrow_and_update());
                tokio::select! {
                    () = loop_token.cancelled() => break,
                    () = tokio::time::sleep(interval) => fetch().await,
                    changed = visibility.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        if *visibility.borrow() == Visibility::Visible {
                            fetch().await;
                        }
                    }
                }
            }

            // Only forget the entry if it still belongs to this poller
            let mut pollers = pollers.lock().unwrap_or_else(PoisonError::into_inner);
            if pollers
                .get(&loop_key)
                .is_some_and(|current| current.is_cancelled())
            {
                pollers.remove(&loop_key);
            }
            debug!(poller = %loop_key, "Poller stopped");
        });

        PollHandle { key, token }
    }

    pub fn stop(&self, key: &str) -> bool {
        match self.lock().remove(key) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_polling(&self, key: &str) -> bool {
        self.lock().get(key).is_some_and(|t| !t.is_cancelled())
    }

    pub fn active_count(&self) -> usize {
        self.lock().values().filter(|t| !t.is_cancelled()).count()
    }

    pub fn set_visibility(&self, visibility: Visibility) {
        self.visibility.send_if_modified(|current| {
            let changed = *current != visibility;
            *current = visibility;
            changed
        });
    }

    pub fn visibility(&self) -> Visibility {
        *self.visibility.borrow()
    }

    pub fn current_interval(&self) -> Duration {
        interval_for(&self.settings, self.visibility())
    }

    pub fn shutdown(&self) {
        self.root.cancel();
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CancellationToken>> {
        self.pollers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn interval_for(settings: &PollingSettings, visibility: Visibility) -> Duration {
    match visibility {
        Visibility::Visible => settings.visible_interval(),
        Visibility::Hidden => settings.hidden_interval(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(service: &PollingService, key: &str) -> (Arc<AtomicUsize>, PollHandle) {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let handle = service.start(key, move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        (count, handle)
    }

    #[tokio::test(start_paused = true)]
    async fn polls_at_visible_interval() {
        let service = PollingService::new(PollingSettings::default());
        let (count, _handle) = counting(&service, "group:g-1");

        tokio::time::sleep(Duration::from_millis(4_900)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(10_200)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn hidden_view_slows_down_and_visible_polls_immediately() {
        let service = PollingService::new(PollingSettings::default());
        let (count, _handle) = counting(&service, "group:g-1");
        tokio::time::sleep(Duration::from_millis(1)).await;

        service.set_visibility(Visibility::Hidden);
        assert_eq!(service.current_interval(), Duration::from_secs(30));
        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        service.set_visibility(Visibility::Visible);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_and_replace() {
        let service = PollingService::new(PollingSettings::default());
        let (first, handle) = counting(&service, "k");
        let (second, _new) = counting(&service, "k");
        assert!(handle.is_stopped());
        assert_eq!(service.active_count(), 1);

        tokio::time::sleep(Duration::from_millis(5_100)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);

        assert!(service.stop("k"));
        assert!(!service.is_polling("k"));
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_every_poller() {
        let service = PollingService::new(PollingSettings::default());
        let (a, _ha) = counting(&service, "a");
        let (b, _hb) = counting(&service, "b");

        service.shutdown();
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(a.load(Ordering::SeqCst), 0);
        assert_eq!(b.load(Ordering::SeqCst), 0);
        assert_eq!(service.active_count(), 0);
    }
}

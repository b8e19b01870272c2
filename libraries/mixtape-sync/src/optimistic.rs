//! Optimistic mutations
//!
//! A mutation takes an explicit snapshot, publishes a provisional state at
//! once, then performs the remote write. If the write fails the snapshot is
//! restored as a whole and observers see the previous state again; they never
//! see a partially applied change.

use mixtape_core::{MixtapeError, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// State that can be captured and put back
pub trait Snapshot {
    type Snap;

    fn snapshot(&self) -> Self::Snap;

    fn restore(&self, snap: Self::Snap);
}

/// Observable value replaced in single steps
#[derive(Debug)]
pub struct StateCell<T> {
    tx: Arc<watch::Sender<T>>,
}

impl<T> Clone for StateCell<T> {
    fn clone(&self) -> Self {
        Self {
            tx: Arc::clone(&self.tx),
        }
    }
}

impl<T: Clone> StateCell<T> {
    pub fn new(initial: T) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    pub fn get(&self) -> T {
        self.tx.borrow().clone()
    }

    pub fn set(&self, value: T) {
        self.tx.send_replace(value);
    }

    pub fn update(&self, f: impl FnOnce(&mut T)) {
        self.tx.send_modify(f);
    }

    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }
}

impl<T: Clone> Snapshot for StateCell<T> {
    type Snap = T;

    fn snapshot(&self) -> T {
        self.get()
    }

    fn restore(&self, snap: T) {
        self.set(snap);
    }
}

/// Snapshot `target`, apply `mutate`, run `write`, and restore the snapshot
/// if `write` fails
pub async fn apply_with_snapshot<S, M, W, Fut, R>(target: &S, mutate: M, write: W) -> Result<R>
where
    S: Snapshot,
    M: FnOnce(&S),
    W: FnOnce() -> Fut,
    Fut: Future<Output = Result<R>>,
{
    let snap = target.snapshot();
    mutate(target);
    match write().await {
        Ok(value) => Ok(value),
        Err(e) => {
            debug!(error = %e, "Optimistic write failed, restoring snapshot");
            target.restore(snap);
            Err(e)
        }
    }
}

type FailHook<'a> = Box<dyn FnOnce(&MixtapeError) + Send + 'a>;

/// Builder for an optimistic change to a [`StateCell`]
///
/// ```
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// use mixtape_sync::{Mutation, StateCell};
///
/// let likes = StateCell::new(vec!["u-1".to_string()]);
/// let result: mixtape_core::Result<()> = Mutation::new(&likes, |prev: &Vec<String>| {
///     let mut next = prev.clone();
///     next.push("u-2".to_string());
///     next
/// })
/// .run(|_provisional| async { Err(mixtape_core::MixtapeError::AuthRequired) })
/// .await;
///
/// assert!(result.is_err());
/// assert_eq!(likes.get(), vec!["u-1".to_string()]);
/// # }
/// ```
pub struct Mutation<'a, T, M> {
    cell: &'a StateCell<T>,
    mutate: M,
    on_fail: Option<FailHook<'a>>,
}

impl<'a, T, M> Mutation<'a, T, M>
where
    T: Clone,
    M: FnOnce(&T) -> T,
{
    pub fn new(cell: &'a StateCell<T>, mutate: M) -> Self {
        Self {
            cell,
            mutate,
            on_fail: None,
        }
    }

    /// Called with the write error after the snapshot has been restored
    pub fn on_fail(mut self, hook: impl FnOnce(&MixtapeError) + Send + 'a) -> Self {
        self.on_fail = Some(Box::new(hook));
        self
    }

    /// Publish the provisional state and perform `write`
    pub async fn run<W, Fut, R>(self, write: W) -> Result<R>
    where
        W: FnOnce(T) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        self.commit_with(write, |_, _| None).await
    }

    /// Like [`run`](Self::run), but `on_commit` may replace the provisional
    /// state with a server-confirmed one
    pub async fn commit_with<W, Fut, R, C>(self, write: W, on_commit: C) -> Result<R>
    where
        W: FnOnce(T) -> Fut,
        Fut: Future<Output = Result<R>>,
        C: FnOnce(&T, &R) -> Option<T>,
    {
        let snapshot = self.cell.get();
        let provisional = (self.mutate)(&snapshot);
        self.cell.set(provisional.clone());

        match write(provisional.clone()).await {
            Ok(confirmed) => {
                if let Some(state) = on_commit(&provisional, &confirmed) {
                    self.cell.set(state);
                }
                Ok(confirmed)
            }
            Err(e) => {
                self.cell.set(snapshot);
                if let Some(hook) = self.on_fail {
                    hook(&e);
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[tokio::test]
    async fn provisional_state_visible_during_write() {
        let cell = StateCell::new(1);
        let observer = cell.clone();

        let seen = Mutation::new(&cell, |n: &i32| n + 1)
            .run(|provisional| async move {
                assert_eq!(provisional, 2);
                Ok(observer.get())
            })
            .await
            .unwrap();

        assert_eq!(seen, 2);
        assert_eq!(cell.get(), 2);
    }

    #[tokio::test]
    async fn failed_write_restores_exact_snapshot() {
        let cell = StateCell::new(vec![("s-1", 3), ("s-2", 0)]);
        let before = cell.get();
        let failures = Mutex::new(Vec::new());

        let result: Result<()> = Mutation::new(&cell, |prev: &Vec<(&str, i32)>| {
            prev.iter().map(|(id, n)| (*id, n + 1)).collect()
        })
        .on_fail(|e| failures.lock().unwrap().push(e.to_string()))
        .run(|_| async { Err(MixtapeError::storage("write rejected")) })
        .await;

        assert!(result.is_err());
        assert_eq!(cell.get(), before);
        assert_eq!(failures.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn commit_replaces_with_confirmed_state() {
        let cell = StateCell::new(0u32);
        Mutation::new(&cell, |n: &u32| n + 1)
            .commit_with(|_| async { Ok(10u32) }, |_, confirmed| Some(*confirmed))
            .await
            .unwrap();
        assert_eq!(cell.get(), 10);
    }

    #[tokio::test]
    async fn subscribers_see_rollback() {
        let cell = StateCell::new("a".to_string());
        let mut rx = cell.subscribe();

        let _ = Mutation::new(&cell, |_: &String| "b".to_string())
            .run(|_| async { Err::<(), _>(MixtapeError::AuthRequired) })
            .await;

        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), "a");
    }

    #[tokio::test]
    async fn snapshot_helper_restores_on_error() {
        let cell = StateCell::new(5);
        let result: Result<()> = apply_with_snapshot(
            &cell,
            |c| c.set(99),
            || async { Err(MixtapeError::validation("nope")) },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(cell.get(), 5);
    }
}

//! Request coalescing for source loads.
//!
//! A [`Flight`] group ensures at most one in-flight execution per key.
//! Concurrent callers for the same key wait on the leader's outcome instead
//! of starting their own. The leader runs in a detached task: dropping a
//! waiter's future never cancels the work, and a panic inside the work is
//! converted into an error delivered to every waiter rather than crashing
//! the process.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use crate::error::CacheError;

type Outcome<T> = Option<Result<T, CacheError>>;
type CallMap<T> = HashMap<String, watch::Receiver<Outcome<T>>>;

pub(crate) struct Flight<T> {
    calls: Arc<Mutex<CallMap<T>>>,
}

impl<T> Flight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new() -> Self {
        Flight {
            calls: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Run `work` for `key`, sharing one in-flight execution among all
    /// concurrent callers. Every caller receives a clone of the leader's
    /// outcome.
    pub(crate) async fn run<F>(&self, key: &str, work: F) -> Result<T, CacheError>
    where
        F: Future<Output = Result<T, CacheError>> + Send + 'static,
    {
        let mut rx = self.join(key, work);
        loop {
            {
                let outcome = rx.borrow_and_update();
                if let Some(result) = outcome.as_ref() {
                    return result.clone();
                }
            }
            if rx.changed().await.is_err() {
                return Err(CacheError::loader("in-flight load abandoned"));
            }
        }
    }

    /// Subscribe to the in-flight call for `key`, spawning it as leader if
    /// none exists.
    fn join<F>(&self, key: &str, work: F) -> watch::Receiver<Outcome<T>>
    where
        F: Future<Output = Result<T, CacheError>> + Send + 'static,
    {
        let mut calls = lock(&self.calls);
        if let Some(rx) = calls.get(key) {
            return rx.clone();
        }

        let (tx, rx) = watch::channel(None);
        calls.insert(key.to_string(), rx.clone());

        // The work runs in its own task so a panic surfaces as a JoinError
        // instead of poisoning unrelated waiters.
        let handle = tokio::spawn(work);
        let call_map = Arc::clone(&self.calls);
        let key = key.to_string();
        tokio::spawn(async move {
            let result = match handle.await {
                Ok(result) => result,
                Err(err) if err.is_panic() => {
                    Err(CacheError::loader(format!("panic in loader: {err}")))
                }
                Err(err) => Err(CacheError::loader(format!("loader task failed: {err}"))),
            };
            // Deregister before publishing so late arrivals start a fresh
            // flight instead of observing a finished one.
            lock(&call_map).remove(&key);
            let _ = tx.send(Some(result));
        });
        rx
    }
}

fn lock<T>(calls: &Arc<Mutex<CallMap<T>>>) -> MutexGuard<'_, CallMap<T>> {
    calls.lock().unwrap_or_else(PoisonError::into_inner)
}

//! Bounded single-flight memoization for remote fetches.

use crate::ChainError;
use futures::{
    FutureExt,
    future::{BoxFuture, Shared},
};
use lru::LruCache;
use std::{
    fmt,
    future::Future,
    hash::Hash,
    num::NonZeroUsize,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

type SharedFetch<V> = Shared<BoxFuture<'static, Result<V, Arc<ChainError>>>>;

/// One cached fetch: the shared result plus a flag marking it failed once
/// the underlying future resolved to an error.
struct Slot<V: Clone> {
    fetch: SharedFetch<V>,
    failed: Arc<AtomicBool>,
}

/// A bounded, recency-evicting cache of single-flight fetches.
///
/// [`RequestCache::get`] installs at most one underlying fetch per key; every
/// concurrent caller for the same key awaits the same shared result. A fetch
/// that resolved to an error stays observable for callers already awaiting
/// it, but the slot is marked failed so the *next* call retries instead of
/// replaying the failure forever.
pub struct RequestCache<K: Hash + Eq, V: Clone> {
    slots: spin::Mutex<LruCache<K, Slot<V>>>,
}

impl<K, V> RequestCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone + Send + Sync + 'static,
{
    /// Creates a cache retaining at most `capacity` slots (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self { slots: spin::Mutex::new(LruCache::new(capacity)) }
    }

    /// Returns the cached result for `key`, invoking `fetch` only when no
    /// live slot exists (or the existing one has failed).
    pub async fn get<F, Fut>(&self, key: K, fetch: F) -> Result<V, Arc<ChainError>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, ChainError>> + Send + 'static,
    {
        let shared = {
            let mut slots = self.slots.lock();
            match slots.get(&key) {
                Some(slot) if !slot.failed.load(Ordering::Acquire) => slot.fetch.clone(),
                _ => {
                    let failed = Arc::new(AtomicBool::new(false));
                    let mark = failed.clone();
                    let fut = fetch();
                    let shared = async move {
                        fut.await.map_err(|err| {
                            mark.store(true, Ordering::Release);
                            Arc::new(err)
                        })
                    }
                    .boxed()
                    .shared();
                    slots.put(key, Slot { fetch: shared.clone(), failed });
                    shared
                }
            }
        };

        shared.await
    }

    /// Installs an already-known result, bypassing any fetch.
    pub fn seed(&self, key: K, value: V) {
        let fetch = async move { Ok(value) }.boxed().shared();
        let slot = Slot { fetch, failed: Arc::new(AtomicBool::new(false)) };
        self.slots.lock().put(key, slot);
    }

    /// Drops the slot for `key`, if any.
    pub fn invalidate(&self, key: &K) {
        self.slots.lock().pop(key);
    }

    /// The number of live slots.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    /// Whether the cache holds no slots.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Hash + Eq, V: Clone> fmt::Debug for RequestCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestCache").field("len", &self.slots.lock().len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NetworkError;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    fn counting_fetch(
        counter: &Arc<AtomicUsize>,
        gate: &Arc<Notify>,
        value: u32,
    ) -> impl Future<Output = Result<u32, ChainError>> + Send + 'static {
        let counter = counter.clone();
        let gate = gate.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            gate.notified().await;
            Ok(value)
        }
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_fetch() {
        let cache: RequestCache<u32, u32> = RequestCache::new(4);
        let counter = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());

        let first = cache.get(7, || counting_fetch(&counter, &gate, 42));
        let second = cache.get(7, || counting_fetch(&counter, &gate, 43));

        let release = async {
            // Both callers are awaiting the shared slot by now.
            gate.notify_waiters();
            gate.notify_waiters();
        };
        let (first, second, ()) = tokio::join!(first, second, release);

        assert_eq!(first.unwrap(), 42);
        assert_eq!(second.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_slot_is_retried_on_the_next_call() {
        let cache: RequestCache<u32, u32> = RequestCache::new(4);
        let counter = Arc::new(AtomicUsize::new(0));

        let tally = counter.clone();
        let err = cache
            .get(1, move || async move {
                tally.fetch_add(1, Ordering::SeqCst);
                Err(ChainError::Network(NetworkError::Transport("boom".into())))
            })
            .await
            .unwrap_err();
        assert!(matches!(&*err, ChainError::Network(NetworkError::Transport(_))));

        let tally = counter.clone();
        let value = cache
            .get(1, move || async move {
                tally.fetch_add(1, Ordering::SeqCst);
                Ok(5)
            })
            .await
            .unwrap();
        assert_eq!(value, 5);
        assert_eq!(counter.load(Ordering::SeqCst), 2);

        // The successful slot is reused without a third fetch.
        let value = cache.get(1, || async { unreachable!() }).await.unwrap();
        assert_eq!(value, 5);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn seeded_values_bypass_the_fetcher() {
        let cache: RequestCache<u32, u32> = RequestCache::new(4);
        cache.seed(9, 99);
        let value = cache.get(9, || async { unreachable!() }).await.unwrap();
        assert_eq!(value, 99);
    }

    #[tokio::test]
    async fn capacity_pressure_evicts_least_recent() {
        let cache: RequestCache<u32, u32> = RequestCache::new(2);
        cache.seed(1, 1);
        cache.seed(2, 2);
        cache.seed(3, 3);
        assert_eq!(cache.len(), 2);

        // Key 1 was evicted; its fetcher runs again.
        let value = cache.get(1, || async { Ok(10) }).await.unwrap();
        assert_eq!(value, 10);
    }

    #[tokio::test]
    async fn invalidate_drops_a_slot() {
        let cache: RequestCache<u32, u32> = RequestCache::new(4);
        cache.seed(5, 50);
        cache.invalidate(&5);
        assert!(cache.is_empty());
        let value = cache.get(5, || async { Ok(51) }).await.unwrap();
        assert_eq!(value, 51);
    }
}

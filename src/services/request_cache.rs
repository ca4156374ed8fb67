use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tracing::debug;

use crate::error::UpstreamError;
use crate::models::config::CacheConfig;

type Shared<V> = Arc<OnceCell<Result<V, UpstreamError>>>;

struct Resolved<V> {
    data: V,
    cached_at: Instant,
    ttl: Duration,
}

struct Failed {
    error: UpstreamError,
    failed_at: Instant,
    cooldown: Duration,
}

struct CacheState<K, V> {
    in_flight: HashMap<K, Shared<V>>,
    resolved: HashMap<K, Resolved<V>>,
    failed: HashMap<K, Failed>,
}

/// Keyed request deduplication with success TTLs and failure cooldowns.
///
/// At most one producer runs per key at a time; concurrent callers share
/// its outcome. Aborted outcomes are handed to the waiters of that run but
/// never cached.
pub struct RequestCache<K, V> {
    state: Mutex<CacheState<K, V>>,
    policy: CacheConfig,
}

impl<K, V> RequestCache<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: Clone,
{
    pub fn new(policy: CacheConfig) -> Self {
        Self {
            state: Mutex::new(CacheState {
                in_flight: HashMap::new(),
                resolved: HashMap::new(),
                failed: HashMap::new(),
            }),
            policy,
        }
    }

    /// Return the cached value for `key`, or run `producer` once for all
    /// concurrent callers.
    pub async fn request<F, Fut>(&self, key: K, ttl: Duration, producer: F) -> Result<V, UpstreamError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, UpstreamError>>,
    {
        let cell = {
            let mut state = self.state.lock();
            let now = Instant::now();

            if let Some(entry) = state.resolved.get(&key) {
                if now.duration_since(entry.cached_at) < entry.ttl {
                    return Ok(entry.data.clone());
                }
            }

            if let Some(entry) = state.failed.get(&key) {
                if now.duration_since(entry.failed_at) < entry.cooldown {
                    debug!(?key, error = %entry.error, "Replaying cached failure");
                    return Err(entry.error.clone());
                }
            }

            state
                .in_flight
                .entry(key.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let mut ran = false;
        let result = cell
            .get_or_init(|| {
                ran = true;
                producer()
            })
            .await
            .clone();

        if ran {
            self.record(&key, &cell, &result, ttl);
        }

        result
    }

    fn record(&self, key: &K, cell: &Shared<V>, result: &Result<V, UpstreamError>, ttl: Duration) {
        let mut state = self.state.lock();
        let now = Instant::now();

        if state
            .in_flight
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, cell))
        {
            state.in_flight.remove(key);
        }

        match result {
            Ok(data) => {
                state.failed.remove(key);
                state.resolved.insert(
                    key.clone(),
                    Resolved {
                        data: data.clone(),
                        cached_at: now,
                        ttl,
                    },
                );
            }
            Err(error) => match error.cooldown(&self.policy) {
                Some(cooldown) => {
                    debug!(?key, %error, ?cooldown, "Caching failure");
                    state.failed.insert(
                        key.clone(),
                        Failed {
                            error: error.clone(),
                            failed_at: now,
                            cooldown,
                        },
                    );
                }
                None => debug!(?key, "Aborted request not cached"),
            },
        }
    }

    /// Drop every cached outcome for `key`
    pub fn invalidate(&self, key: &K) {
        let mut state = self.state.lock();
        state.resolved.remove(key);
        state.failed.remove(key);
    }

    pub fn is_in_flight(&self, key: &K) -> bool {
        self.state.lock().in_flight.contains_key(key)
    }

    pub fn has_failure(&self, key: &K) -> bool {
        self.state.lock().failed.contains_key(key)
    }
}

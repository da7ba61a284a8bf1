//! Cache layer that orchestrates caching logic with upstream fetching.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::clock::Clock;
use super::flight::SingleFlight;
use super::storage::{CacheStorage, CachedEntry, EntryMeta};
use super::traits::{Cacheable, LookupResult, UpstreamFetcher};
use crate::error::LookupError;
use crate::lookup::{Domain, LookupKey};

/// Per-domain caching policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerPolicy {
  /// How long a fetched value counts as fresh
  pub ttl: Duration,
  /// Deadline for one upstream call
  pub fetch_timeout: Duration,
  /// Serve the last known-good value when upstream is unavailable
  pub serve_stale: bool,
  /// Age past which a value is dropped instead of served stale
  pub max_age: Option<Duration>,
}

impl Default for LayerPolicy {
  fn default() -> Self {
    Self {
      ttl: Duration::from_secs(5 * 60),
      fetch_timeout: Duration::from_secs(5),
      serve_stale: true,
      max_age: None,
    }
  }
}

/// Cache-aside lookups for one domain.
///
/// 1. Check cache - if fresh, return immediately
/// 2. If stale/missing, fetch from upstream (one fetch per key at a time)
/// 3. On success, store and return the new value
/// 4. On transient failure, return the stale value if there is one
pub struct LookupService<V: Cacheable, S: CacheStorage> {
  fetcher: Arc<dyn UpstreamFetcher<Value = V>>,
  storage: Arc<S>,
  clock: Arc<dyn Clock>,
  flights: SingleFlight<LookupKey, V>,
  policy: LayerPolicy,
}

impl<V: Cacheable, S: CacheStorage> LookupService<V, S> {
  pub fn new(
    fetcher: Arc<dyn UpstreamFetcher<Value = V>>,
    storage: Arc<S>,
    clock: Arc<dyn Clock>,
    policy: LayerPolicy,
  ) -> Self {
    Self {
      fetcher,
      storage,
      clock,
      flights: SingleFlight::new(),
      policy,
    }
  }

  pub fn domain(&self) -> Domain {
    self.fetcher.domain()
  }

  /// Look up a raw natural key in this service's domain.
  pub async fn lookup(&self, raw_key: &str) -> LookupResult<V> {
    let key = LookupKey::new(self.domain(), raw_key);
    self.lookup_key(&key).await
  }

  pub async fn lookup_key(&self, key: &LookupKey) -> LookupResult<V> {
    if key.is_empty() {
      return LookupResult::Failed(LookupError::rejected("empty key"));
    }
    if key.domain() != self.domain() {
      return LookupResult::Failed(LookupError::rejected(format!(
        "key for {} sent to {} lookup",
        key.domain(),
        self.domain()
      )));
    }

    if let Some(entry) = self.cached_entry(key) {
      if entry.is_fresh(self.clock.now()) {
        debug!(key = %key.fingerprint(), "Cache hit");
        return LookupResult::Fresh(entry.value);
      }
      debug!(key = %key.fingerprint(), "Cache entry stale, refreshing");
    } else {
      debug!(key = %key.fingerprint(), "Cache miss");
    }

    let outcome = self
      .flights
      .run_exclusive(key, || self.fetch_and_store(key.clone()))
      .await;

    match outcome {
      Ok(value) => LookupResult::Fresh(value),
      Err(err) => self.on_failure(key, err),
    }
  }

  /// Read the current entry, treating corrupt and expired entries as absent.
  fn cached_entry(&self, key: &LookupKey) -> Option<CachedEntry<V>> {
    match self.storage.get::<V>(key) {
      Ok(Some(entry)) if entry.is_expired(self.clock.now()) => {
        debug!(key = %key.fingerprint(), "Cache entry past max age, evicting");
        self.storage.remove(key);
        None
      }
      Ok(entry) => entry,
      Err(err) => {
        warn!(key = %key.fingerprint(), error = %err, "Dropping corrupt cache entry");
        self.storage.remove(key);
        None
      }
    }
  }

  /// Settle a failed fetch against what the store holds now, which may be
  /// newer than what this caller saw before the fetch.
  fn on_failure(&self, key: &LookupKey, err: LookupError) -> LookupResult<V> {
    if !err.is_transient() {
      warn!(key = %key.fingerprint(), error = %err, "Upstream rejected lookup");
      return LookupResult::Failed(err);
    }

    let now = self.clock.now();
    match self.cached_entry(key) {
      Some(entry) if entry.is_fresh(now) => {
        debug!(
          key = %key.fingerprint(),
          error = %err,
          "Fetch failed but the entry was refreshed meanwhile"
        );
        LookupResult::Fresh(entry.value)
      }
      Some(entry) if self.policy.serve_stale => {
        let age = entry.age(now);
        warn!(
          key = %key.fingerprint(),
          error = %err,
          age_secs = age.as_secs(),
          "Upstream unavailable, serving stale value"
        );
        LookupResult::Stale(entry.value, age)
      }
      _ => {
        warn!(key = %key.fingerprint(), error = %err, "Lookup failed");
        LookupResult::Failed(err)
      }
    }
  }

  /// The shared fetch: bounded upstream call, then a cache write on success.
  ///
  /// Runs detached from any caller, so it owns everything it touches.
  fn fetch_and_store(
    &self,
    key: LookupKey,
  ) -> impl std::future::Future<Output = Result<V, LookupError>> + Send + 'static {
    let fetcher = Arc::clone(&self.fetcher);
    let storage = Arc::clone(&self.storage);
    let clock = Arc::clone(&self.clock);
    let policy = self.policy;

    async move {
      // An earlier flight may have refreshed the entry after the caller read it.
      if let Ok(Some(entry)) = storage.get::<V>(&key) {
        if entry.is_fresh(clock.now()) {
          debug!(key = %key.fingerprint(), "Entry refreshed by an earlier flight");
          return Ok(entry.value);
        }
      }

      let value = match tokio::time::timeout(policy.fetch_timeout, fetcher.fetch(&key)).await {
        Ok(Ok(value)) => value,
        Ok(Err(err)) => return Err(err),
        Err(_) => {
          return Err(LookupError::unavailable(format!(
            "timed out after {}",
            humantime::format_duration(policy.fetch_timeout)
          )))
        }
      };

      let meta = EntryMeta {
        fetched_at: clock.now(),
        ttl: policy.ttl,
        max_age: policy.max_age,
      };
      // A failed write only costs a future cache hit.
      if let Err(err) = storage.put(&key, &value, meta) {
        warn!(key = %key.fingerprint(), error = %err, "Failed to cache fetched value");
      }

      Ok(value)
    }
  }
}

/// Periodically evict entries past their max age.
pub fn spawn_sweeper<S: CacheStorage>(
  storage: Arc<S>,
  clock: Arc<dyn Clock>,
  every: Duration,
) -> JoinHandle<()> {
  tokio::spawn(async move {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
      interval.tick().await;
      let evicted = storage.evict_expired(clock.now());
      if evicted > 0 {
        debug!(evicted, remaining = storage.len(), "Swept expired cache entries");
      }
    }
  })
}

//! Request coalescing: at most one upstream fetch per key at a time.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::debug;

use crate::error::LookupError;

type Outcome<V> = Result<V, LookupError>;
type FlightReceiver<V> = watch::Receiver<Option<Outcome<V>>>;
type FlightSender<V> = watch::Sender<Option<Outcome<V>>>;
type FlightMap<K, V> = Arc<Mutex<HashMap<K, FlightReceiver<V>>>>;

/// Collapses concurrent fetches for the same key into one call.
///
/// The fetch runs on its own task. Callers only wait for its outcome, so a
/// caller that gives up (timeout, dropped future) never cancels the fetch
/// other callers are waiting on.
pub struct SingleFlight<K, V> {
  in_flight: FlightMap<K, V>,
}

impl<K, V> SingleFlight<K, V>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Clone + Send + Sync + 'static,
{
  pub fn new() -> Self {
    Self {
      in_flight: Arc::new(Mutex::new(HashMap::new())),
    }
  }

  /// Run `fetch` for `key` unless a fetch for it is already running, and
  /// return the outcome of whichever fetch that is.
  ///
  /// Every caller of one flight gets the same outcome, failures included.
  /// Once the flight finishes the key is free again and the next call starts
  /// a new fetch.
  pub async fn run_exclusive<F, Fut>(&self, key: &K, fetch: F) -> Outcome<V>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Outcome<V>> + Send + 'static,
  {
    let (rx, leader_tx) = {
      let mut in_flight = lock(&self.in_flight);
      match in_flight.get(key) {
        Some(rx) => {
          debug!(in_flight = in_flight.len(), "Joining in-flight fetch");
          (rx.clone(), None)
        }
        None => {
          let (tx, rx) = watch::channel(None);
          in_flight.insert(key.clone(), rx.clone());
          (rx, Some(tx))
        }
      }
    };

    if let Some(tx) = leader_tx {
      let guard = FlightGuard {
        key: key.clone(),
        in_flight: Arc::clone(&self.in_flight),
        tx: Some(tx),
      };
      let fut = fetch();
      tokio::spawn(async move {
        let outcome = fut.await;
        guard.complete(outcome);
      });
    }

    wait_for(rx).await
  }

  /// Number of keys with a fetch currently running.
  #[cfg(test)]
  pub fn in_flight(&self) -> usize {
    lock(&self.in_flight).len()
  }
}

impl<K, V> Default for SingleFlight<K, V>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Clone + Send + Sync + 'static,
{
  fn default() -> Self {
    Self::new()
  }
}

fn lock<K, V>(map: &FlightMap<K, V>) -> MutexGuard<'_, HashMap<K, FlightReceiver<V>>> {
  map.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn wait_for<V: Clone>(mut rx: FlightReceiver<V>) -> Outcome<V> {
  loop {
    if let Some(outcome) = rx.borrow_and_update().as_ref() {
      return outcome.clone();
    }
    if rx.changed().await.is_err() {
      // Sender gone; it may still have published right before dropping.
      return rx
        .borrow()
        .clone()
        .unwrap_or_else(|| Err(LookupError::unavailable("in-flight fetch was abandoned")));
    }
  }
}

/// Owned by the task running a fetch. Releases the key and publishes an
/// outcome even if the task panics or is aborted.
struct FlightGuard<K: Eq + Hash, V> {
  key: K,
  in_flight: FlightMap<K, V>,
  tx: Option<FlightSender<V>>,
}

impl<K: Eq + Hash, V> FlightGuard<K, V> {
  fn complete(mut self, outcome: Outcome<V>) {
    // Release the key before publishing so that anyone who sees the outcome
    // and calls again starts a new fetch instead of rejoining this one.
    lock(&self.in_flight).remove(&self.key);
    if let Some(tx) = self.tx.take() {
      // Fails only when every waiter has gone away, and then nobody needs it.
      let _ = tx.send(Some(outcome));
    }
  }
}

impl<K: Eq + Hash, V> Drop for FlightGuard<K, V> {
  fn drop(&mut self) {
    if let Some(tx) = self.tx.take() {
      lock(&self.in_flight).remove(&self.key);
      // No receivers left is fine here too.
      let _ = tx.send(Some(Err(LookupError::unavailable(
        "fetch was cancelled or panicked",
      ))));
    }
  }
}

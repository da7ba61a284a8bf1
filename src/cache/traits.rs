//! Core traits and types for the caching system.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;

use crate::error::LookupError;
use crate::lookup::{Domain, LookupKey};

/// Trait for payloads that can be cached.
///
/// Payloads are stored serialized, so they must round-trip through serde.
pub trait Cacheable: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
  /// Entity type name stored next to the payload (e.g., "vehicle").
  fn entity_type() -> &'static str;
}

/// Capability to fetch one value from an external source.
///
/// There is one implementation per data domain. Implementations must report
/// transient trouble as `UpstreamUnavailable` and definitive negative answers
/// as `UpstreamRejected`; the lookup service treats the two very differently.
#[async_trait]
pub trait UpstreamFetcher: Send + Sync + 'static {
  type Value: Cacheable;

  /// Domain this fetcher serves.
  fn domain(&self) -> Domain;

  async fn fetch(&self, key: &LookupKey) -> Result<Self::Value, LookupError>;
}

/// Outcome of a lookup. Exactly one of fresh, stale or failed.
#[derive(Debug, Clone, PartialEq)]
pub enum LookupResult<T> {
  /// Value is within its TTL (served from cache or just fetched)
  Fresh(T),
  /// Upstream was unavailable; this is the last known-good value and its age
  Stale(T, Duration),
  /// No value could be produced
  Failed(LookupError),
}

impl<T> LookupResult<T> {
  /// The value, if any (fresh or stale).
  #[cfg(test)]
  pub fn value(&self) -> Option<&T> {
    match self {
      Self::Fresh(v) | Self::Stale(v, _) => Some(v),
      Self::Failed(_) => None,
    }
  }

  #[cfg(test)]
  pub fn is_fresh(&self) -> bool {
    matches!(self, Self::Fresh(_))
  }

  #[cfg(test)]
  pub fn is_stale(&self) -> bool {
    matches!(self, Self::Stale(..))
  }

  pub fn is_failed(&self) -> bool {
    matches!(self, Self::Failed(_))
  }

  pub fn status(&self) -> &'static str {
    match self {
      Self::Fresh(_) => "fresh",
      Self::Stale(..) => "stale",
      Self::Failed(_) => "failed",
    }
  }

  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> LookupResult<U> {
    match self {
      Self::Fresh(v) => LookupResult::Fresh(f(v)),
      Self::Stale(v, age) => LookupResult::Stale(f(v), age),
      Self::Failed(e) => LookupResult::Failed(e),
    }
  }
}

impl<T: Serialize> LookupResult<T> {
  /// Render as a JSON report for the given domain and key.
  pub fn to_report(&self, domain: Domain, key: &str) -> serde_json::Value {
    let mut report = serde_json::json!({
      "domain": domain,
      "key": key,
      "status": self.status(),
    });

    match self {
      Self::Fresh(v) => {
        report["value"] = serde_json::to_value(v).unwrap_or(serde_json::Value::Null);
      }
      Self::Stale(v, age) => {
        report["value"] = serde_json::to_value(v).unwrap_or(serde_json::Value::Null);
        report["age_secs"] = age.as_secs().into();
      }
      Self::Failed(e) => {
        report["error"] = serde_json::json!({
          "kind": e.kind(),
          "message": e.to_string(),
        });
      }
    }

    report
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_map_preserves_variant_and_age() {
    let stale: LookupResult<u32> = LookupResult::Stale(30, Duration::from_secs(90));
    assert_eq!(
      stale.map(|p| p.to_string()),
      LookupResult::Stale("30".to_string(), Duration::from_secs(90))
    );

    let failed: LookupResult<u32> = LookupResult::Failed(LookupError::rejected("nope"));
    assert!(failed.map(|p| p + 1).is_failed());
  }

  #[test]
  fn test_report_for_stale_carries_age() {
    let result = LookupResult::Stale(serde_json::json!({"points": 30}), Duration::from_secs(90));
    let report = result.to_report(Domain::LicensePoints, "0912345678");

    assert_eq!(report["status"], "stale");
    assert_eq!(report["domain"], "license_points");
    assert_eq!(report["value"]["points"], 30);
    assert_eq!(report["age_secs"], 90);
    assert!(report.get("error").is_none());
  }

  #[test]
  fn test_report_for_failure_carries_kind() {
    let result: LookupResult<()> = LookupResult::Failed(LookupError::unavailable("timed out"));
    let report = result.to_report(Domain::Vehicle, "PBX1234");

    assert_eq!(report["status"], "failed");
    assert_eq!(report["error"]["kind"], "upstream_unavailable");
    assert!(report.get("value").is_none());
  }
}

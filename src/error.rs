//! Failure taxonomy for lookups.

/// Why a lookup (or one of its steps) failed.
///
/// Only the upstream variants ever reach a caller: a corrupt cache entry is
/// handled inside the lookup service by treating the entry as absent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
  /// Transient failure: timeout, connection error, 5xx.
  #[error("upstream unavailable: {0}")]
  UpstreamUnavailable(String),

  /// The source gave a definitive negative answer (not found, invalid key).
  #[error("upstream rejected: {0}")]
  UpstreamRejected(String),

  /// A stored entry could not be decoded.
  #[error("corrupt cache entry for {key}: {reason}")]
  CacheCorrupt { key: String, reason: String },
}

impl LookupError {
  pub fn unavailable(reason: impl Into<String>) -> Self {
    Self::UpstreamUnavailable(reason.into())
  }

  pub fn rejected(reason: impl Into<String>) -> Self {
    Self::UpstreamRejected(reason.into())
  }

  /// Whether stale data may be served in place of this failure.
  pub fn is_transient(&self) -> bool {
    matches!(self, Self::UpstreamUnavailable(_))
  }

  /// Short machine-readable kind, used in reports.
  pub fn kind(&self) -> &'static str {
    match self {
      Self::UpstreamUnavailable(_) => "upstream_unavailable",
      Self::UpstreamRejected(_) => "upstream_rejected",
      Self::CacheCorrupt { .. } => "cache_corrupt",
    }
  }
}

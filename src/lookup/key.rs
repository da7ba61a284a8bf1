//! Domain-qualified lookup keys.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A government data domain, each backed by its own upstream.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
  /// Tax-ID (RUC) validation
  TaxId,
  /// Taxpayer registry information
  Taxpayer,
  /// Vehicle registration by plate
  Vehicle,
  /// Driver's license points by national ID
  LicensePoints,
}

impl Domain {
  pub const ALL: [Domain; 4] = [
    Domain::TaxId,
    Domain::Taxpayer,
    Domain::Vehicle,
    Domain::LicensePoints,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::TaxId => "tax_id",
      Self::Taxpayer => "taxpayer",
      Self::Vehicle => "vehicle",
      Self::LicensePoints => "license_points",
    }
  }
}

impl fmt::Display for Domain {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl std::str::FromStr for Domain {
  type Err = String;

  /// Accepts both `license_points` and `license-points` spellings.
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let wanted = s.trim().to_lowercase().replace('-', "_");
    Domain::ALL
      .into_iter()
      .find(|d| d.as_str() == wanted)
      .ok_or_else(|| format!("unknown domain '{}'", s.trim()))
  }
}

/// Identifier of one cached value: a domain plus its natural key.
///
/// The natural key is normalized on construction (trimmed, uppercased), so two
/// keys are equal exactly when their normalized strings match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LookupKey {
  domain: Domain,
  id: String,
}

impl LookupKey {
  pub fn new(domain: Domain, raw: &str) -> Self {
    Self {
      domain,
      id: normalize_id(raw),
    }
  }

  pub fn domain(&self) -> Domain {
    self.domain
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  pub fn is_empty(&self) -> bool {
    self.id.is_empty()
  }

  /// Short stable hash of the key, safe to write to logs.
  ///
  /// Natural keys are national IDs and plates, so logs carry this instead.
  pub fn fingerprint(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.domain.as_str().as_bytes());
    hasher.update(b":");
    hasher.update(self.id.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("{}:{}", self.domain, &digest[..12])
  }
}

impl fmt::Display for LookupKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.domain, self.id)
  }
}

fn normalize_id(raw: &str) -> String {
  raw.trim().to_uppercase()
}

//! Simulated upstreams.
//!
//! The real services (SRI for tax data and vehicles, ANT for license points)
//! need credentials and have no public test environment. These stand-ins
//! return the same fixed records for well-formed keys and reject malformed
//! ones, after an optional artificial delay.

use async_trait::async_trait;
use std::marker::PhantomData;
use std::time::Duration;
use tracing::info;

use super::key::{Domain, LookupKey};
use super::types::{LicensePoints, TaxIdStatus, TaxpayerInfo, VehicleInfo};
use crate::cache::UpstreamFetcher;
use crate::error::LookupError;

/// Fixed-data upstream for the domain whose payload is `V`.
pub struct Simulated<V> {
  latency: Duration,
  _value: PhantomData<fn() -> V>,
}

impl<V> Simulated<V> {
  pub fn new(latency: Duration) -> Self {
    Self {
      latency,
      _value: PhantomData,
    }
  }

  async fn delay(&self) {
    if !self.latency.is_zero() {
      tokio::time::sleep(self.latency).await;
    }
  }
}

#[async_trait]
impl UpstreamFetcher for Simulated<TaxIdStatus> {
  type Value = TaxIdStatus;

  fn domain(&self) -> Domain {
    Domain::TaxId
  }

  async fn fetch(&self, key: &LookupKey) -> Result<TaxIdStatus, LookupError> {
    info!(key = %key.fingerprint(), "Validating RUC upstream");
    self.delay().await;

    let ruc = key.id();
    if !is_digits(ruc) {
      return Err(LookupError::rejected("RUC must be numeric"));
    }

    Ok(TaxIdStatus {
      ruc: ruc.to_string(),
      valid: is_registered_ruc(ruc),
    })
  }
}

#[async_trait]
impl UpstreamFetcher for Simulated<TaxpayerInfo> {
  type Value = TaxpayerInfo;

  fn domain(&self) -> Domain {
    Domain::Taxpayer
  }

  async fn fetch(&self, key: &LookupKey) -> Result<TaxpayerInfo, LookupError> {
    info!(key = %key.fingerprint(), "Fetching taxpayer upstream");
    self.delay().await;

    let ruc = key.id();
    if !is_registered_ruc(ruc) {
      return Err(LookupError::rejected("no taxpayer registered under this RUC"));
    }

    Ok(TaxpayerInfo {
      ruc: ruc.to_string(),
      name: "CIUDADANO EJEMPLO".to_string(),
      kind: "PERSONA NATURAL".to_string(),
    })
  }
}

#[async_trait]
impl UpstreamFetcher for Simulated<VehicleInfo> {
  type Value = VehicleInfo;

  fn domain(&self) -> Domain {
    Domain::Vehicle
  }

  async fn fetch(&self, key: &LookupKey) -> Result<VehicleInfo, LookupError> {
    info!(key = %key.fingerprint(), "Fetching vehicle upstream");
    self.delay().await;

    let plate = key.id();
    if !is_plate(plate) {
      return Err(LookupError::rejected(format!(
        "'{}' is not a valid plate",
        plate
      )));
    }

    Ok(VehicleInfo {
      plate: plate.to_string(),
      make: "CHEVROLET".to_string(),
      model: "SAIL".to_string(),
    })
  }
}

#[async_trait]
impl UpstreamFetcher for Simulated<LicensePoints> {
  type Value = LicensePoints;

  fn domain(&self) -> Domain {
    Domain::LicensePoints
  }

  async fn fetch(&self, key: &LookupKey) -> Result<LicensePoints, LookupError> {
    info!(key = %key.fingerprint(), "Fetching license points upstream");
    self.delay().await;

    let id_number = key.id();
    if id_number.len() != 10 || !is_digits(id_number) {
      return Err(LookupError::rejected("national ID must be 10 digits"));
    }

    Ok(LicensePoints {
      id_number: id_number.to_string(),
      points: 30,
      source: "ANT".to_string(),
    })
  }
}

fn is_digits(s: &str) -> bool {
  !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// 13 digits ending in the "001" establishment suffix.
fn is_registered_ruc(ruc: &str) -> bool {
  ruc.len() == 13 && is_digits(ruc) && ruc.ends_with("001")
}

/// Three letters then three or four digits, with an optional dash.
fn is_plate(plate: &str) -> bool {
  let compact: String = plate.chars().filter(|c| *c != '-').collect();
  if !compact.is_ascii() || !(6..=7).contains(&compact.len()) {
    return false;
  }
  let (letters, digits) = compact.split_at(3);
  letters.bytes().all(|b| b.is_ascii_uppercase()) && is_digits(digits)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn key(domain: Domain, id: &str) -> LookupKey {
    LookupKey::new(domain, id)
  }

  #[tokio::test]
  async fn test_tax_id_validity() {
    let upstream = Simulated::<TaxIdStatus>::new(Duration::ZERO);

    let ok = upstream.fetch(&key(Domain::TaxId, "0912345678001")).await.unwrap();
    assert!(ok.valid);

    let wrong_suffix = upstream.fetch(&key(Domain::TaxId, "0912345678002")).await.unwrap();
    assert!(!wrong_suffix.valid);

    let short = upstream.fetch(&key(Domain::TaxId, "091234001")).await.unwrap();
    assert!(!short.valid);

    let err = upstream.fetch(&key(Domain::TaxId, "09123ABC78001")).await.unwrap_err();
    assert!(matches!(err, LookupError::UpstreamRejected(_)));
  }

  #[tokio::test]
  async fn test_taxpayer_rejects_unregistered_ruc() {
    let upstream = Simulated::<TaxpayerInfo>::new(Duration::ZERO);

    let info = upstream.fetch(&key(Domain::Taxpayer, "0912345678001")).await.unwrap();
    assert_eq!(info.name, "CIUDADANO EJEMPLO");

    let err = upstream.fetch(&key(Domain::Taxpayer, "0912345678")).await.unwrap_err();
    assert!(matches!(err, LookupError::UpstreamRejected(_)));
  }

  #[tokio::test]
  async fn test_vehicle_plate_formats() {
    let upstream = Simulated::<VehicleInfo>::new(Duration::ZERO);

    for plate in ["pbx-1234", "PBX123", "GSA0001"] {
      let info = upstream.fetch(&key(Domain::Vehicle, plate)).await.unwrap();
      assert_eq!(info.make, "CHEVROLET");
    }

    for plate in ["PB-1234", "PBX12345", "1234PBX", "ÑBX1234"] {
      let err = upstream.fetch(&key(Domain::Vehicle, plate)).await.unwrap_err();
      assert!(matches!(err, LookupError::UpstreamRejected(_)), "{}", plate);
    }
  }

  #[tokio::test]
  async fn test_license_points() {
    let upstream = Simulated::<LicensePoints>::new(Duration::ZERO);

    let points = upstream.fetch(&key(Domain::LicensePoints, "0912345678")).await.unwrap();
    assert_eq!(points.points, 30);
    assert_eq!(points.source, "ANT");

    let err = upstream.fetch(&key(Domain::LicensePoints, "091234")).await.unwrap_err();
    assert!(matches!(err, LookupError::UpstreamRejected(_)));
  }

  #[tokio::test(start_paused = true)]
  async fn test_latency_is_applied() {
    let upstream = Simulated::<LicensePoints>::new(Duration::from_secs(2));
    let started = tokio::time::Instant::now();

    upstream.fetch(&key(Domain::LicensePoints, "0912345678")).await.unwrap();
    assert!(started.elapsed() >= Duration::from_secs(2));
  }
}

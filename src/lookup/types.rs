use serde::{Deserialize, Serialize};

use crate::cache::Cacheable;

/// Whether a RUC (tax ID) is registered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxIdStatus {
  pub ruc: String,
  pub valid: bool,
}

/// Taxpayer registry entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxpayerInfo {
  pub ruc: String,
  pub name: String,
  pub kind: String, // "PERSONA NATURAL" or "SOCIEDAD"
}

/// Vehicle registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleInfo {
  pub plate: String,
  pub make: String,
  pub model: String,
}

/// Points left on a driver's license
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicensePoints {
  pub id_number: String,
  pub points: u32,
  pub source: String,
}

/// Any domain's payload, for the untyped `lookup(domain, key)` entry point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum LookupValue {
  TaxId(TaxIdStatus),
  Taxpayer(TaxpayerInfo),
  Vehicle(VehicleInfo),
  LicensePoints(LicensePoints),
}

impl Cacheable for TaxIdStatus {
  fn entity_type() -> &'static str {
    "tax_id"
  }
}

impl Cacheable for TaxpayerInfo {
  fn entity_type() -> &'static str {
    "taxpayer"
  }
}

impl Cacheable for VehicleInfo {
  fn entity_type() -> &'static str {
    "vehicle"
  }
}

impl Cacheable for LicensePoints {
  fn entity_type() -> &'static str {
    "license_points"
  }
}

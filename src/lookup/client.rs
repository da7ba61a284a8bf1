//! Lookup client that puts every domain behind one cache.

use color_eyre::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::cache::{
  spawn_sweeper, CacheStorage, Cacheable, Clock, LookupResult, LookupService, MemoryStorage,
  SystemClock, UpstreamFetcher,
};
use crate::config::{Config, DomainsConfig, UpstreamConfig};

use super::http::HttpFetcher;
use super::key::Domain;
use super::simulated::Simulated;
use super::types::{LicensePoints, LookupValue, TaxIdStatus, TaxpayerInfo, VehicleInfo};

/// Entry point for all lookups.
///
/// Each domain has its own upstream and policy; all of them share one
/// process-local store.
pub struct LookupClient {
  storage: Arc<MemoryStorage>,
  clock: Arc<dyn Clock>,
  sweep_interval: Duration,
  tax_id: LookupService<TaxIdStatus, MemoryStorage>,
  taxpayer: LookupService<TaxpayerInfo, MemoryStorage>,
  vehicle: LookupService<VehicleInfo, MemoryStorage>,
  license_points: LookupService<LicensePoints, MemoryStorage>,
}

impl LookupClient {
  /// Create a client with the upstreams and policies from `config`.
  pub fn new(config: &Config) -> Result<Self> {
    Self::with_clock(config, Arc::new(SystemClock))
  }

  pub fn with_clock(config: &Config, clock: Arc<dyn Clock>) -> Result<Self> {
    let storage = Arc::new(MemoryStorage::new());
    let domains = &config.domains;

    Ok(Self {
      tax_id: build_service(Domain::TaxId, domains, &storage, &clock)?,
      taxpayer: build_service(Domain::Taxpayer, domains, &storage, &clock)?,
      vehicle: build_service(Domain::Vehicle, domains, &storage, &clock)?,
      license_points: build_service(Domain::LicensePoints, domains, &storage, &clock)?,
      sweep_interval: config.cache.sweep_interval,
      storage,
      clock,
    })
  }

  /// Whether a RUC is registered.
  pub async fn verify_tax_id(&self, ruc: &str) -> LookupResult<TaxIdStatus> {
    self.tax_id.lookup(ruc).await
  }

  pub async fn taxpayer(&self, ruc: &str) -> LookupResult<TaxpayerInfo> {
    self.taxpayer.lookup(ruc).await
  }

  pub async fn vehicle(&self, plate: &str) -> LookupResult<VehicleInfo> {
    self.vehicle.lookup(plate).await
  }

  pub async fn license_points(&self, id_number: &str) -> LookupResult<LicensePoints> {
    self.license_points.lookup(id_number).await
  }

  /// Look up `key` in `domain`.
  pub async fn lookup(&self, domain: Domain, key: &str) -> LookupResult<LookupValue> {
    match domain {
      Domain::TaxId => self.verify_tax_id(key).await.map(LookupValue::TaxId),
      Domain::Taxpayer => self.taxpayer(key).await.map(LookupValue::Taxpayer),
      Domain::Vehicle => self.vehicle(key).await.map(LookupValue::Vehicle),
      Domain::LicensePoints => self
        .license_points(key)
        .await
        .map(LookupValue::LicensePoints),
    }
  }

  /// Start evicting entries past their max age in the background.
  pub fn spawn_sweeper(&self) -> JoinHandle<()> {
    spawn_sweeper(
      Arc::clone(&self.storage),
      Arc::clone(&self.clock),
      self.sweep_interval,
    )
  }

  /// Number of entries currently cached, across all domains.
  pub fn cached_entries(&self) -> usize {
    self.storage.len()
  }
}

fn build_service<V>(
  domain: Domain,
  domains: &DomainsConfig,
  storage: &Arc<MemoryStorage>,
  clock: &Arc<dyn Clock>,
) -> Result<LookupService<V, MemoryStorage>>
where
  V: Cacheable,
  Simulated<V>: UpstreamFetcher<Value = V>,
{
  let cfg = domains.get(domain);
  let fetcher: Arc<dyn UpstreamFetcher<Value = V>> = match domains.upstream(domain) {
    UpstreamConfig::Simulated { latency } => Arc::new(Simulated::<V>::new(latency)),
    UpstreamConfig::Http {
      base_url,
      token_env,
    } => {
      let token = token_env.as_deref().map(Config::get_token).transpose()?;
      Arc::new(HttpFetcher::<V>::new(
        domain,
        &base_url,
        token,
        cfg.fetch_timeout,
      )?)
    }
  };

  tracing::debug!(%domain, policy = ?cfg.policy(), "Configured lookup service");
  Ok(LookupService::new(
    fetcher,
    Arc::clone(storage),
    Arc::clone(clock),
    cfg.policy(),
  ))
}

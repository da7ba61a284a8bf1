use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::cache::LayerPolicy;
use crate::lookup::Domain;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub domains: DomainsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
  /// How often entries past their max age are swept out
  #[serde(with = "humantime_serde")]
  pub sweep_interval: Duration,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      sweep_interval: Duration::from_secs(60),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DomainsConfig {
  pub tax_id: DomainConfig,
  pub taxpayer: DomainConfig,
  pub vehicle: DomainConfig,
  pub license_points: DomainConfig,
}

impl DomainsConfig {
  pub fn get(&self, domain: Domain) -> &DomainConfig {
    match domain {
      Domain::TaxId => &self.tax_id,
      Domain::Taxpayer => &self.taxpayer,
      Domain::Vehicle => &self.vehicle,
      Domain::LicensePoints => &self.license_points,
    }
  }

  /// The configured upstream for `domain`, or its built-in one.
  ///
  /// Resolved per field, so a section that only sets `ttl` still keeps the
  /// domain's default upstream.
  pub fn upstream(&self, domain: Domain) -> UpstreamConfig {
    self
      .get(domain)
      .upstream
      .clone()
      .unwrap_or_else(|| UpstreamConfig::default_for(domain))
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DomainConfig {
  /// How long a fetched value counts as fresh
  #[serde(with = "humantime_serde")]
  pub ttl: Duration,
  /// Deadline for one upstream call
  #[serde(with = "humantime_serde")]
  pub fetch_timeout: Duration,
  /// Serve the last known-good value when the upstream is down
  pub serve_stale: bool,
  /// Drop values older than this instead of serving them stale
  #[serde(with = "humantime_serde")]
  pub max_age: Option<Duration>,
  /// Unset means the domain's built-in upstream
  pub upstream: Option<UpstreamConfig>,
}

impl Default for DomainConfig {
  fn default() -> Self {
    let policy = LayerPolicy::default();
    Self {
      ttl: policy.ttl,
      fetch_timeout: policy.fetch_timeout,
      serve_stale: policy.serve_stale,
      max_age: policy.max_age,
      upstream: None,
    }
  }
}

impl DomainConfig {
  pub fn policy(&self) -> LayerPolicy {
    LayerPolicy {
      ttl: self.ttl,
      fetch_timeout: self.fetch_timeout,
      serve_stale: self.serve_stale,
      max_age: self.max_age,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum UpstreamConfig {
  /// Built-in fixed data, with an artificial delay
  Simulated {
    #[serde(default, with = "humantime_serde")]
    latency: Duration,
  },
  /// JSON gateway reached at `{base_url}/{key}`
  Http {
    base_url: String,
    /// Name of the environment variable holding a bearer token
    #[serde(default)]
    token_env: Option<String>,
  },
}

impl UpstreamConfig {
  /// Built-in upstream per domain. The license points service is the slow one.
  pub fn default_for(domain: Domain) -> Self {
    let latency = match domain {
      Domain::LicensePoints => Duration::from_secs(2),
      _ => Duration::ZERO,
    };
    Self::Simulated { latency }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./govlookup.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/govlookup/config.yaml
  ///
  /// Without any file the built-in defaults are used.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let config = match path {
      Some(p) => {
        tracing::info!(path = %p.display(), "Loading configuration");
        Self::load_from_path(&p)?
      }
      None => {
        tracing::info!("No configuration file found, using defaults");
        Self::default()
      }
    };

    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("govlookup.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("govlookup").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    Ok(serde_yaml::from_str(contents)?)
  }

  /// Reject settings the lookup layer cannot work with.
  pub fn validate(&self) -> Result<()> {
    if self.cache.sweep_interval.is_zero() {
      return Err(eyre!("cache.sweep_interval must be greater than zero"));
    }

    for domain in Domain::ALL {
      let cfg = self.domains.get(domain);

      if cfg.fetch_timeout.is_zero() {
        return Err(eyre!("domains.{}.fetch_timeout must be greater than zero", domain));
      }

      if let Some(max_age) = cfg.max_age {
        if max_age < cfg.ttl {
          return Err(eyre!(
            "domains.{}.max_age ({}) is shorter than its ttl ({})",
            domain,
            humantime::format_duration(max_age),
            humantime::format_duration(cfg.ttl)
          ));
        }
      }

      if let Some(UpstreamConfig::Http { base_url, .. }) = &cfg.upstream {
        let url = Url::parse(base_url)
          .map_err(|e| eyre!("domains.{}.upstream.base_url is invalid: {}", domain, e))?;
        if !matches!(url.scheme(), "http" | "https") {
          return Err(eyre!(
            "domains.{}.upstream.base_url must be http or https, got '{}'",
            domain,
            url.scheme()
          ));
        }
      }
    }

    Ok(())
  }

  /// Read the bearer token for an HTTP upstream from the environment.
  pub fn get_token(var: &str) -> Result<String> {
    std::env::var(var)
      .map_err(|_| eyre!("Upstream token not found. Set the {} environment variable.", var))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults() {
    let config = Config::default();
    config.validate().unwrap();

    let tax = config.domains.get(Domain::TaxId);
    assert_eq!(tax.ttl, Duration::from_secs(300));
    assert_eq!(tax.fetch_timeout, Duration::from_secs(5));
    assert!(tax.serve_stale);
    assert_eq!(
      config.domains.upstream(Domain::TaxId),
      UpstreamConfig::Simulated {
        latency: Duration::ZERO
      }
    );

    assert_eq!(
      config.domains.upstream(Domain::LicensePoints),
      UpstreamConfig::Simulated {
        latency: Duration::from_secs(2)
      }
    );
  }

  #[test]
  fn test_empty_document_uses_defaults() {
    let config = Config::from_yaml("{}").unwrap();
    assert_eq!(config.cache.sweep_interval, Duration::from_secs(60));
    assert_eq!(
      config.domains.upstream(Domain::LicensePoints),
      UpstreamConfig::Simulated {
        latency: Duration::from_secs(2)
      }
    );
  }

  #[test]
  fn test_partial_section_keeps_default_upstream() {
    let config = Config::from_yaml("domains:\n  license_points:\n    ttl: 10m\n").unwrap();
    config.validate().unwrap();

    assert_eq!(config.domains.license_points.ttl, Duration::from_secs(600));
    assert_eq!(
      config.domains.upstream(Domain::LicensePoints),
      UpstreamConfig::Simulated {
        latency: Duration::from_secs(2)
      }
    );
  }

  #[test]
  fn test_parse_full_document() {
    let yaml = r#"
cache:
  sweep_interval: 30s
domains:
  license_points:
    ttl: 10m
    fetch_timeout: 3s
    serve_stale: true
    max_age: 24h
    upstream:
      kind: http
      base_url: https://gateway.example/ant/points
      token_env: ANT_TOKEN
  vehicle:
    serve_stale: false
    upstream:
      kind: simulated
      latency: 250ms
"#;
    let config = Config::from_yaml(yaml).unwrap();
    config.validate().unwrap();

    assert_eq!(config.cache.sweep_interval, Duration::from_secs(30));

    let points = &config.domains.license_points;
    assert_eq!(points.ttl, Duration::from_secs(600));
    assert_eq!(points.max_age, Some(Duration::from_secs(86_400)));
    assert_eq!(
      config.domains.upstream(Domain::LicensePoints),
      UpstreamConfig::Http {
        base_url: "https://gateway.example/ant/points".to_string(),
        token_env: Some("ANT_TOKEN".to_string()),
      }
    );

    let vehicle = config.domains.get(Domain::Vehicle);
    assert!(!vehicle.serve_stale);
    assert_eq!(vehicle.ttl, Duration::from_secs(300));
    assert_eq!(
      config.domains.upstream(Domain::Vehicle),
      UpstreamConfig::Simulated {
        latency: Duration::from_millis(250)
      }
    );
    assert!(!vehicle.policy().serve_stale);
  }

  #[test]
  fn test_unknown_fields_rejected() {
    assert!(Config::from_yaml("domains:\n  weather: {}\n").is_err());
    assert!(Config::from_yaml("domains:\n  vehicle:\n    tll: 5m\n").is_err());
  }

  #[test]
  fn test_max_age_shorter_than_ttl_rejected() {
    let yaml = "domains:\n  vehicle:\n    ttl: 10m\n    max_age: 5m\n";
    let err = Config::from_yaml(yaml).unwrap().validate().unwrap_err();
    assert!(err.to_string().contains("domains.vehicle.max_age"));
  }

  #[test]
  fn test_zero_timeout_rejected() {
    let yaml = "domains:\n  tax_id:\n    fetch_timeout: 0s\n";
    assert!(Config::from_yaml(yaml).unwrap().validate().is_err());
  }

  #[test]
  fn test_bad_base_url_rejected() {
    let yaml = "domains:\n  taxpayer:\n    upstream:\n      kind: http\n      base_url: ftp://sri.example\n";
    assert!(Config::from_yaml(yaml).unwrap().validate().is_err());

    let yaml = "domains:\n  taxpayer:\n    upstream:\n      kind: http\n      base_url: nope\n";
    assert!(Config::from_yaml(yaml).unwrap().validate().is_err());
  }

  #[test]
  fn test_missing_explicit_path_is_error() {
    let err = Config::load(Some(Path::new("/nonexistent/govlookup.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }
}

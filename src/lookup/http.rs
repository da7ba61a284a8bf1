//! Generic JSON-over-HTTP upstream.
//!
//! Fetches `GET {base_url}/{key}` and decodes the body straight into the
//! domain payload. Anything service-specific (SOAP envelopes, scraping) lives
//! behind a gateway that speaks this shape.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::StatusCode;
use std::marker::PhantomData;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use super::key::{Domain, LookupKey};
use crate::cache::{Cacheable, UpstreamFetcher};
use crate::error::LookupError;

pub struct HttpFetcher<V> {
  client: reqwest::Client,
  domain: Domain,
  base_url: Url,
  token: Option<String>,
  _value: PhantomData<fn() -> V>,
}

impl<V> HttpFetcher<V> {
  /// Create a fetcher for `domain` rooted at `base_url`.
  ///
  /// `connect_timeout` only bounds connection setup; the lookup service puts
  /// its own deadline around the whole call.
  pub fn new(
    domain: Domain,
    base_url: &str,
    token: Option<String>,
    connect_timeout: Duration,
  ) -> Result<Self> {
    let base_url =
      Url::parse(base_url).map_err(|e| eyre!("Invalid base URL '{}': {}", base_url, e))?;
    if base_url.cannot_be_a_base() {
      return Err(eyre!("Base URL '{}' cannot have a path appended", base_url));
    }

    let client = reqwest::Client::builder()
      .connect_timeout(connect_timeout)
      .user_agent(concat!("govlookup/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      domain,
      base_url,
      token,
      _value: PhantomData,
    })
  }

  fn endpoint(&self, key: &LookupKey) -> Url {
    let mut url = self.base_url.clone();
    // cannot_be_a_base was ruled out in new()
    if let Ok(mut segments) = url.path_segments_mut() {
      segments.pop_if_empty().push(key.id());
    }
    url
  }
}

#[async_trait]
impl<V: Cacheable> UpstreamFetcher for HttpFetcher<V> {
  type Value = V;

  fn domain(&self) -> Domain {
    self.domain
  }

  async fn fetch(&self, key: &LookupKey) -> Result<V, LookupError> {
    let url = self.endpoint(key);
    info!(key = %key.fingerprint(), host = url.host_str().unwrap_or(""), "Fetching upstream");

    let mut request = self.client.get(url);
    if let Some(token) = &self.token {
      request = request.bearer_auth(token);
    }

    let response = request.send().await.map_err(transport_error)?;
    let status = response.status();
    debug!(key = %key.fingerprint(), %status, "Upstream responded");

    if let Some(err) = classify_status(status) {
      return Err(err);
    }

    response
      .json::<V>()
      .await
      .map_err(|e| LookupError::unavailable(format!("undecodable response body: {}", e)))
  }
}

/// Map a non-success status to the failure it stands for.
///
/// Only answers that say "this key has no record" are definitive; everything
/// else may succeed on a later attempt.
fn classify_status(status: StatusCode) -> Option<LookupError> {
  if status.is_success() {
    return None;
  }

  Some(match status {
    StatusCode::BAD_REQUEST
    | StatusCode::NOT_FOUND
    | StatusCode::GONE
    | StatusCode::UNPROCESSABLE_ENTITY => LookupError::rejected(format!("upstream answered {}", status)),
    _ => LookupError::unavailable(format!("upstream answered {}", status)),
  })
}

fn transport_error(e: reqwest::Error) -> LookupError {
  if e.is_timeout() {
    LookupError::unavailable("request timed out")
  } else if e.is_connect() {
    LookupError::unavailable(format!("connection failed: {}", e))
  } else {
    LookupError::unavailable(e.to_string())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::lookup::VehicleInfo;
  use httpmock::prelude::*;

  fn fetcher(base: &str) -> HttpFetcher<VehicleInfo> {
    HttpFetcher::new(Domain::Vehicle, base, None, Duration::from_secs(1)).unwrap()
  }

  fn plate() -> LookupKey {
    LookupKey::new(Domain::Vehicle, "pbx-1234")
  }

  #[test]
  fn test_endpoint_appends_key_segment() {
    let key = LookupKey::new(Domain::Vehicle, "pbx-1234");

    let url = fetcher("https://gateway.example/vehicles").endpoint(&key);
    assert_eq!(url.as_str(), "https://gateway.example/vehicles/PBX-1234");

    let url = fetcher("https://gateway.example/vehicles/").endpoint(&key);
    assert_eq!(url.as_str(), "https://gateway.example/vehicles/PBX-1234");
  }

  #[test]
  fn test_endpoint_escapes_key() {
    let key = LookupKey::new(Domain::Vehicle, "A/B C");
    let url = fetcher("https://gateway.example/vehicles").endpoint(&key);
    assert_eq!(url.as_str(), "https://gateway.example/vehicles/A%2FB%20C");
  }

  #[test]
  fn test_rejects_unusable_base_url() {
    assert!(HttpFetcher::<VehicleInfo>::new(
      Domain::Vehicle,
      "not a url",
      None,
      Duration::from_secs(1)
    )
    .is_err());
    assert!(HttpFetcher::<VehicleInfo>::new(
      Domain::Vehicle,
      "mailto:sri@example.com",
      None,
      Duration::from_secs(1)
    )
    .is_err());
  }

  #[test]
  fn test_status_classification() {
    assert!(classify_status(StatusCode::OK).is_none());

    for status in [StatusCode::NOT_FOUND, StatusCode::BAD_REQUEST, StatusCode::GONE] {
      assert!(matches!(
        classify_status(status),
        Some(LookupError::UpstreamRejected(_))
      ));
    }

    for status in [
      StatusCode::INTERNAL_SERVER_ERROR,
      StatusCode::BAD_GATEWAY,
      StatusCode::SERVICE_UNAVAILABLE,
      StatusCode::TOO_MANY_REQUESTS,
      StatusCode::UNAUTHORIZED,
    ] {
      assert!(matches!(
        classify_status(status),
        Some(LookupError::UpstreamUnavailable(_))
      ));
    }
  }

  #[tokio::test]
  async fn test_fetch_decodes_body_and_sends_token() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
      when
        .method(GET)
        .path("/vehicles/PBX-1234")
        .header("authorization", "Bearer sri-token");
      then
        .status(200)
        .header("content-type", "application/json")
        .json_body(serde_json::json!({
          "plate": "PBX-1234",
          "make": "CHEVROLET",
          "model": "SAIL",
        }));
    });

    let upstream = HttpFetcher::<VehicleInfo>::new(
      Domain::Vehicle,
      &server.url("/vehicles"),
      Some("sri-token".to_string()),
      Duration::from_secs(1),
    )
    .unwrap();

    let vehicle = upstream.fetch(&plate()).await.unwrap();
    assert_eq!(
      vehicle,
      VehicleInfo {
        plate: "PBX-1234".to_string(),
        make: "CHEVROLET".to_string(),
        model: "SAIL".to_string(),
      }
    );
    mock.assert();
  }

  #[tokio::test]
  async fn test_fetch_not_found_is_rejected() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
      when.method(GET).path("/vehicles/PBX-1234");
      then.status(404).body("Not Found");
    });

    let result = fetcher(&server.url("/vehicles")).fetch(&plate()).await;
    assert!(matches!(result, Err(LookupError::UpstreamRejected(_))));
    mock.assert();
  }

  #[tokio::test]
  async fn test_fetch_server_error_is_unavailable() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
      when.method(GET).path("/vehicles/PBX-1234");
      then.status(503).body("Service Unavailable");
    });

    let result = fetcher(&server.url("/vehicles")).fetch(&plate()).await;
    assert!(matches!(result, Err(LookupError::UpstreamUnavailable(_))));
    mock.assert();
  }

  #[tokio::test]
  async fn test_fetch_undecodable_body_is_unavailable() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
      when.method(GET).path("/vehicles/PBX-1234");
      then
        .status(200)
        .header("content-type", "text/html")
        .body("<html>gateway maintenance</html>");
    });

    let result = fetcher(&server.url("/vehicles")).fetch(&plate()).await;
    assert!(matches!(result, Err(LookupError::UpstreamUnavailable(_))));
    mock.assert();
  }

  #[tokio::test]
  async fn test_fetch_refused_connection_is_unavailable() {
    // Grab a free port, then close it so nothing is listening there.
    let port = std::net::TcpListener::bind("127.0.0.1:0")
      .unwrap()
      .local_addr()
      .unwrap()
      .port();

    let result = fetcher(&format!("http://127.0.0.1:{}/vehicles", port))
      .fetch(&plate())
      .await;
    assert!(matches!(result, Err(LookupError::UpstreamUnavailable(_))));
  }
}

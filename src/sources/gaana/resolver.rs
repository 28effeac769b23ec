use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use super::crypto::decrypt_stream_path;
use crate::{
  common::{errors::ResolveError, http::HttpTransport},
  configs::GaanaConfig,
};

/// Hands out a fresh, short-lived URL for a track's HLS entry playlist.
pub trait MediaUrlResolver: Send + Sync {
  fn resolve(&self, track_id: &str) -> Result<String, ResolveError>;
}

/// Resolver backed by Gaana's stream-url endpoint.
pub struct GaanaStreamResolver {
  transport: Arc<dyn HttpTransport>,
  api_url: String,
  quality: String,
  stream_format: String,
}

impl GaanaStreamResolver {
  pub fn new(transport: Arc<dyn HttpTransport>, config: &GaanaConfig) -> Self {
    Self {
      transport,
      api_url: config.stream_api_url.clone(),
      quality: config.stream_quality.clone(),
      stream_format: config.stream_format.clone(),
    }
  }
}

impl MediaUrlResolver for GaanaStreamResolver {
  fn resolve(&self, track_id: &str) -> Result<String, ResolveError> {
    let body = format!(
      "quality={}&track_id={}&stream_format={}",
      urlencoding::encode(&self.quality),
      urlencoding::encode(track_id),
      urlencoding::encode(&self.stream_format)
    );

    let res = self
      .transport
      .post_form(&self.api_url, body)
      .map_err(|e| ResolveError::Request(e.to_string()))?;

    if !res.is_success() {
      warn!("Gaana: stream URL API returned {}", res.status);
      return Err(ResolveError::Status(res.status));
    }

    let data: Value = serde_json::from_slice(&res.body)
      .map_err(|e| ResolveError::Request(format!("invalid stream URL response: {}", e)))?;

    match data.get("api_status").and_then(Value::as_str) {
      Some("success") => {}
      other => return Err(ResolveError::ApiStatus(other.unwrap_or("missing").to_string())),
    }

    let encrypted_path = data
      .get("data")
      .and_then(|d| d.get("stream_path"))
      .and_then(Value::as_str)
      .filter(|p| !p.is_empty())
      .ok_or(ResolveError::MissingStreamPath)?;

    let hls_url = decrypt_stream_path(encrypted_path)?;
    debug!("Gaana: resolved track {} to {}", track_id, hls_url);
    Ok(hls_url)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    common::http::mock::MockTransport,
    sources::gaana::crypto::{HLS_BASE_URL, tests::encrypt_stream_path},
  };

  const API: &str = "https://gaana.test/api/stream-url";

  fn resolver(transport: &Arc<MockTransport>) -> GaanaStreamResolver {
    let config = GaanaConfig {
      stream_api_url: API.to_string(),
      ..GaanaConfig::default()
    };
    GaanaStreamResolver::new(transport.clone(), &config)
  }

  #[test]
  fn resolves_encrypted_stream_path() {
    let transport = Arc::new(MockTransport::new());
    let path = encrypt_stream_path("hls/high/42/index.m3u8?t=1");
    transport.ok(
      API,
      format!(r#"{{"api_status":"success","data":{{"stream_path":"{}"}}}}"#, path),
    );

    let url = resolver(&transport).resolve("42").unwrap();
    assert_eq!(url, format!("{}hls/high/42/index.m3u8?t=1", HLS_BASE_URL));
    assert_eq!(transport.count(API), 1);
  }

  #[test]
  fn non_success_api_status_is_rejected() {
    let transport = Arc::new(MockTransport::new());
    transport.ok(API, r#"{"api_status":"failure","data":{}}"#);
    assert!(matches!(
      resolver(&transport).resolve("42"),
      Err(ResolveError::ApiStatus(s)) if s == "failure"
    ));

    transport.ok(API, r#"{"data":{"stream_path":"abc"}}"#);
    assert!(matches!(
      resolver(&transport).resolve("42"),
      Err(ResolveError::ApiStatus(_))
    ));
  }

  #[test]
  fn empty_stream_path_is_missing() {
    let transport = Arc::new(MockTransport::new());
    transport.ok(API, r#"{"api_status":"success","data":{"stream_path":""}}"#);
    assert!(matches!(
      resolver(&transport).resolve("42"),
      Err(ResolveError::MissingStreamPath)
    ));
  }

  #[test]
  fn http_failure_is_reported() {
    let transport = Arc::new(MockTransport::new());
    assert!(matches!(
      resolver(&transport).resolve("42"),
      Err(ResolveError::Status(404))
    ));
  }
}

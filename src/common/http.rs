use std::time::Duration;

use bytes::Bytes;
use reqwest::{
  Client,
  header::{self, HeaderMap, HeaderValue},
};
use thiserror::Error;
use tokio::runtime::Runtime;
use tracing::debug;

use crate::{common::types::AnyResult, configs::HttpProxyConfig};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/134.0.0.0 Safari/537.36";

/// Connection-level failure: nothing came back from the server.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

#[derive(Debug, Clone)]
pub struct HttpResponse {
  pub status: u16,
  pub body: Bytes,
}

impl HttpResponse {
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }
}

/// Blocking HTTP calls used by the playlist, segment and stream-url code.
///
/// Every caller runs on a plain OS thread (the decoder thread or the segment
/// worker), never inside an async task.
pub trait HttpTransport: Send + Sync {
  fn get(&self, url: &str) -> Result<HttpResponse, TransportError>;

  fn post_form(&self, url: &str, body: String) -> Result<HttpResponse, TransportError>;
}

/// [`HttpTransport`] over an async reqwest client driven by a private runtime.
pub struct ReqwestTransport {
  client: Client,
  runtime: Runtime,
}

impl ReqwestTransport {
  pub fn new(
    user_agent: &str,
    timeout: Duration,
    proxy: Option<&HttpProxyConfig>,
  ) -> AnyResult<Self> {
    let mut headers = HeaderMap::new();
    headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));
    headers.insert(header::ORIGIN, HeaderValue::from_static("https://gaana.com"));
    headers.insert(header::REFERER, HeaderValue::from_static("https://gaana.com/"));

    let mut builder = Client::builder()
      .user_agent(user_agent)
      .default_headers(headers)
      .timeout(timeout);

    if let Some(proxy_config) = proxy {
      if let Some(url) = &proxy_config.url {
        debug!("Configuring proxy for Gaana HTTP transport: {}", url);
        let mut proxy_obj = reqwest::Proxy::all(url)?;
        if let (Some(username), Some(password)) = (&proxy_config.username, &proxy_config.password) {
          proxy_obj = proxy_obj.basic_auth(username, password);
        }
        builder = builder.proxy(proxy_obj);
      }
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
      .worker_threads(1)
      .thread_name("gaana-http")
      .enable_all()
      .build()?;

    Ok(Self {
      client: builder.build()?,
      runtime,
    })
  }

  fn execute(&self, request: reqwest::RequestBuilder) -> Result<HttpResponse, TransportError> {
    self.runtime.block_on(async move {
      let res = request
        .send()
        .await
        .map_err(|e| TransportError(e.to_string()))?;
      let status = res.status().as_u16();
      let body = res.bytes().await.map_err(|e| TransportError(e.to_string()))?;
      Ok(HttpResponse { status, body })
    })
  }
}

impl HttpTransport for ReqwestTransport {
  fn get(&self, url: &str) -> Result<HttpResponse, TransportError> {
    self.execute(self.client.get(url))
  }

  fn post_form(&self, url: &str, body: String) -> Result<HttpResponse, TransportError> {
    self.execute(
      self
        .client
        .post(url)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .header(header::ACCEPT, "application/json")
        .body(body),
    )
  }
}

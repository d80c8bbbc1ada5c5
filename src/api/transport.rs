//! HTTP transport seam. The executor only ever talks to a `Transport`.

use std::time::Duration;

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use url::Url;

use super::error::ApiError;
use super::types::{TransportRequest, TransportResponse};

#[async_trait]
pub trait Transport: Send + Sync {
  /// Send one request. Only failures before a response exists are errors;
  /// any HTTP status comes back as a `TransportResponse`.
  async fn send(&self, request: TransportRequest) -> Result<TransportResponse, ApiError>;

  /// Absolute URL for a path relative to the API root.
  fn url_for(&self, path: &str) -> String;
}

/// `reqwest`-backed transport rooted at a base URL.
#[derive(Clone)]
pub struct ReqwestTransport {
  client: reqwest::Client,
  base_url: String,
}

impl ReqwestTransport {
  pub fn new(base_url: &Url, timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    Ok(Self {
      client,
      base_url: base_url.as_str().trim_end_matches('/').to_string(),
    })
  }
}

#[async_trait]
impl Transport for ReqwestTransport {
  async fn send(&self, request: TransportRequest) -> Result<TransportResponse, ApiError> {
    let mut builder = self.client.request(request.method, &request.url);
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = request.body {
      builder = builder.body(body);
    }

    let response = builder
      .send()
      .await
      .map_err(|e| ApiError::Network(e.to_string()))?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();
    let body_text = response
      .text()
      .await
      .map_err(|e| ApiError::Network(e.to_string()))?;

    Ok(TransportResponse {
      status,
      headers,
      body_text,
    })
  }

  fn url_for(&self, path: &str) -> String {
    if path.starts_with('/') {
      format!("{}{}", self.base_url, path)
    } else {
      format!("{}/{}", self.base_url, path)
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use reqwest::Method;
  use wiremock::matchers::{body_string, header, method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  fn transport_for(server: &MockServer) -> ReqwestTransport {
    let base = Url::parse(&server.uri()).unwrap();
    ReqwestTransport::new(&base, Duration::from_secs(5)).unwrap()
  }

  #[test]
  fn test_url_for_joins_without_double_slash() {
    let base = Url::parse("https://shop.example.com/").unwrap();
    let transport = ReqwestTransport::new(&base, Duration::from_secs(1)).unwrap();
    assert_eq!(
      transport.url_for("/api/user/balance"),
      "https://shop.example.com/api/user/balance"
    );
    assert_eq!(
      transport.url_for("api/orders"),
      "https://shop.example.com/api/orders"
    );
  }

  #[tokio::test]
  async fn test_send_passes_headers_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/api/cart/items"))
      .and(header("authorization", "Bearer t0ken"))
      .and(body_string(r#"{"sku":"A1"}"#))
      .respond_with(ResponseTemplate::new(201).set_body_string(r#"{"ok":true}"#))
      .expect(1)
      .mount(&server)
      .await;

    let transport = transport_for(&server);
    let response = transport
      .send(TransportRequest {
        url: transport.url_for("/api/cart/items"),
        method: Method::POST,
        headers: vec![("Authorization".into(), "Bearer t0ken".into())],
        body: Some(r#"{"sku":"A1"}"#.into()),
      })
      .await
      .unwrap();

    assert_eq!(response.status, 201);
    assert_eq!(response.body_text, r#"{"ok":true}"#);
  }

  #[tokio::test]
  async fn test_error_status_is_not_a_transport_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/admin/users"))
      .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
      .mount(&server)
      .await;

    let transport = transport_for(&server);
    let response = transport
      .send(TransportRequest {
        url: transport.url_for("/api/admin/users"),
        method: Method::GET,
        headers: Vec::new(),
        body: None,
      })
      .await
      .unwrap();

    assert_eq!(response.status, 403);
    assert_eq!(response.body_text, "forbidden");
  }

  #[tokio::test]
  async fn test_unreachable_host_is_network_error() {
    let base = Url::parse("http://127.0.0.1:1").unwrap();
    let transport = ReqwestTransport::new(&base, Duration::from_secs(2)).unwrap();
    let err = transport
      .send(TransportRequest {
        url: transport.url_for("/api/ping"),
        method: Method::GET,
        headers: Vec::new(),
        body: None,
      })
      .await
      .unwrap_err();

    assert!(err.is_network());
  }
}

//! Request and response shapes shared by the executor and its transports.

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// A request as issued by a collaborator: a path relative to the API base URL.
#[derive(Debug, Clone)]
pub struct ApiRequest {
  pub path: String,
  pub method: Method,
  pub body: Option<Value>,
}

impl ApiRequest {
  pub fn get(path: impl Into<String>) -> Self {
    Self {
      path: path.into(),
      method: Method::GET,
      body: None,
    }
  }

  pub fn new(method: Method, path: impl Into<String>, body: Option<Value>) -> Self {
    Self {
      path: path.into(),
      method,
      body,
    }
  }

  /// GET and HEAD never carry a body and never count as mutations.
  pub fn is_get_like(&self) -> bool {
    self.method == Method::GET || self.method == Method::HEAD
  }
}

/// What the transport is asked to send.
#[derive(Debug, Clone)]
pub struct TransportRequest {
  pub url: String,
  pub method: Method,
  pub headers: Vec<(String, String)>,
  pub body: Option<String>,
}

impl TransportRequest {
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}

/// What the transport hands back: the raw status, headers and body text.
#[derive(Debug, Clone)]
pub struct TransportResponse {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body_text: String,
}

/// Decoded result of a successful call.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
  Json(Value),
  /// The call succeeded with an empty body.
  NoContent,
}

impl Payload {
  pub fn json(&self) -> Option<&Value> {
    match self {
      Payload::Json(value) => Some(value),
      Payload::NoContent => None,
    }
  }

  pub fn is_empty(&self) -> bool {
    matches!(self, Payload::NoContent)
  }

  /// Deserialize the JSON body into a typed value. `None` for `NoContent`.
  pub fn decode<T: DeserializeOwned>(&self) -> Option<serde_json::Result<T>> {
    self
      .json()
      .map(|value| serde_json::from_value(value.clone()))
  }
}

/// Success marker returned for a state-changing call.
///
/// The executor never touches the cache; whoever holds this forwards
/// `endpoint` to the invalidation policy.
#[derive(Debug, Clone)]
#[must_use = "a mutation receipt must be forwarded to the invalidation policy"]
pub struct MutationReceipt {
  pub method: Method,
  pub endpoint: String,
  pub payload: Payload,
}

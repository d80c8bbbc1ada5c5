//! Request executor: one network call, credentials attached, response normalized.

use std::sync::Arc;

use reqwest::StatusCode;
use tracing::{debug, warn};

use super::credentials::CredentialSource;
use super::error::ApiError;
use super::transport::Transport;
use super::types::{ApiRequest, MutationReceipt, Payload, TransportRequest, TransportResponse};

/// How much of an undecodable body is kept for diagnostics.
const BODY_PREFIX_CHARS: usize = 200;

/// Executes requests against the API.
///
/// Never retries and never touches the cache. Mutations come back as a
/// [`MutationReceipt`] for the caller to forward to the invalidation policy.
#[derive(Clone)]
pub struct Executor {
  transport: Arc<dyn Transport>,
  credentials: Arc<dyn CredentialSource>,
}

impl Executor {
  pub fn new(transport: Arc<dyn Transport>, credentials: Arc<dyn CredentialSource>) -> Self {
    Self {
      transport,
      credentials,
    }
  }

  /// Perform one call and normalize the outcome.
  pub async fn execute(&self, request: ApiRequest) -> Result<Payload, ApiError> {
    let method = request.method.clone();
    let path = request.path.clone();
    let outgoing = self.build(request);

    let result = match self.transport.send(outgoing).await {
      Ok(response) => normalize(response),
      Err(e) => Err(e),
    };

    match &result {
      Ok(_) => debug!(%method, %path, "request succeeded"),
      Err(e) => warn!(%method, %path, error = %e, "request failed"),
    }
    result
  }

  /// Perform a state-changing call. Success yields a receipt naming the endpoint.
  pub async fn mutate(&self, request: ApiRequest) -> Result<MutationReceipt, ApiError> {
    let method = request.method.clone();
    let endpoint = request.path.clone();
    let payload = self.execute(request).await?;

    Ok(MutationReceipt {
      method,
      endpoint,
      payload,
    })
  }

  fn build(&self, request: ApiRequest) -> TransportRequest {
    let mut headers = vec![("Accept".to_string(), "application/json".to_string())];

    if let Some(token) = self.credentials.token() {
      headers.push(("Authorization".to_string(), format!("Bearer {}", token)));
    }

    let body = match request.body {
      Some(_) if request.is_get_like() => {
        warn!(method = %request.method, path = %request.path, "dropping body on GET-like request");
        None
      }
      Some(value) => {
        headers.push(("Content-Type".to_string(), "application/json".to_string()));
        Some(value.to_string())
      }
      None => None,
    };

    TransportRequest {
      url: self.transport.url_for(&request.path),
      method: request.method,
      headers,
      body,
    }
  }
}

/// Map a raw response onto success, empty success, HTTP error or malformed body.
pub fn normalize(response: TransportResponse) -> Result<Payload, ApiError> {
  let TransportResponse {
    status,
    headers,
    body_text,
  } = response;

  if !(200..300).contains(&status) {
    let message = if body_text.trim().is_empty() {
      status_text(status)
    } else {
      body_text
    };
    return Err(ApiError::Http { status, message });
  }

  if body_text.trim().is_empty() {
    return Ok(Payload::NoContent);
  }

  serde_json::from_str(&body_text)
    .map(Payload::Json)
    .map_err(|_| ApiError::MalformedResponse {
      status,
      headers,
      body_prefix: body_text.chars().take(BODY_PREFIX_CHARS).collect(),
    })
}

fn status_text(status: u16) -> String {
  StatusCode::from_u16(status)
    .ok()
    .and_then(|s| s.canonical_reason())
    .map(String::from)
    .unwrap_or_else(|| format!("HTTP error {}", status))
}

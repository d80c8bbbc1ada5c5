//! Error taxonomy for requests issued through the executor.

use thiserror::Error;

/// A normalized request failure.
///
/// `Clone` so a single failure can be handed to every caller that attached to
/// the same in-flight fetch, and kept on the cache entry for display.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
  /// Non-2xx response. `message` is the body text, or the status reason when the body is empty.
  #[error("HTTP {status}: {message}")]
  Http { status: u16, message: String },

  /// 2xx response whose body could not be decoded.
  #[error("malformed response (HTTP {status}): {body_prefix}")]
  MalformedResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body_prefix: String,
  },

  /// The transport failed before any response arrived.
  #[error("network error: {0}")]
  Network(String),
}

impl ApiError {
  /// HTTP status attached to the failure, if a response was received.
  pub fn status(&self) -> Option<u16> {
    match self {
      ApiError::Http { status, .. } | ApiError::MalformedResponse { status, .. } => Some(*status),
      ApiError::Network(_) => None,
    }
  }

  pub fn is_network(&self) -> bool {
    matches!(self, ApiError::Network(_))
  }

  /// Message suitable for showing next to a failed query.
  pub fn user_message(&self) -> String {
    match self {
      ApiError::Http { message, .. } => message.clone(),
      ApiError::MalformedResponse { status, .. } => {
        format!("Unexpected response from server (HTTP {})", status)
      }
      ApiError::Network(_) => "Could not reach the server".to_string(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_status_accessor() {
    let http = ApiError::Http {
      status: 404,
      message: "Not Found".into(),
    };
    assert_eq!(http.status(), Some(404));
    assert!(!http.is_network());

    let net = ApiError::Network("connection refused".into());
    assert_eq!(net.status(), None);
    assert!(net.is_network());
  }

  #[test]
  fn test_display_includes_status_and_message() {
    let err = ApiError::Http {
      status: 401,
      message: "Unauthorized".into(),
    };
    assert_eq!(err.to_string(), "HTTP 401: Unauthorized");
  }
}

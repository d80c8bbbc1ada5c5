//! Cache entry snapshots, query status and per-entry options.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use super::key::CacheKey;
use crate::api::{ApiError, Payload};

/// Lifecycle of a cached query.
///
/// `Idle -> Loading -> {Success, Error}`; a settled entry may go back to
/// `Loading` on refetch but never back to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
  /// Known to the store but never fetched
  Idle,
  /// Foreground fetch in progress
  Loading,
  Success,
  Error,
}

impl QueryStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      QueryStatus::Idle => "idle",
      QueryStatus::Loading => "loading",
      QueryStatus::Success => "success",
      QueryStatus::Error => "error",
    }
  }
}

/// Freshness and polling settings for one query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
  /// How long a successful result is served without refetching
  pub stale_after: Duration,
  /// Periodic silent refetch while the entry has subscribers
  pub refetch_interval: Option<Duration>,
}

impl Default for QueryOptions {
  fn default() -> Self {
    Self {
      stale_after: Duration::from_secs(60),
      refetch_interval: None,
    }
  }
}

impl QueryOptions {
  pub fn stale_after(mut self, duration: Duration) -> Self {
    self.stale_after = duration;
    self
  }

  pub fn refetch_every(mut self, interval: Duration) -> Self {
    self.refetch_interval = Some(interval);
    self
  }
}

/// Point-in-time copy of a cache entry, as handed to collaborators.
#[derive(Debug, Clone)]
pub struct CacheEntry {
  pub key: CacheKey,
  /// Last successful payload; kept across errors and refetches
  pub data: Option<Payload>,
  pub status: QueryStatus,
  pub error: Option<ApiError>,
  pub last_fetched_at: Option<Instant>,
  /// Wall-clock time of the last success, for display
  pub fetched_at: Option<DateTime<Utc>>,
  pub stale_after: Duration,
  /// Marked stale by an invalidation since the last fetch started
  pub is_invalidated: bool,
  /// A silent background fetch is running
  pub is_fetching: bool,
}

impl CacheEntry {
  pub(crate) fn new(key: CacheKey, stale_after: Duration) -> Self {
    Self {
      key,
      data: None,
      status: QueryStatus::Idle,
      error: None,
      last_fetched_at: None,
      fetched_at: None,
      stale_after,
      is_invalidated: false,
      is_fetching: false,
    }
  }

  /// Servable without a refetch at `now`.
  pub fn is_fresh(&self, now: Instant) -> bool {
    if self.status != QueryStatus::Success || self.is_invalidated {
      return false;
    }
    self
      .last_fetched_at
      .map(|at| now.saturating_duration_since(at) < self.stale_after)
      .unwrap_or(false)
  }

  pub fn is_stale(&self, now: Instant) -> bool {
    !self.is_fresh(now)
  }

  pub fn is_loading(&self) -> bool {
    self.status == QueryStatus::Loading
  }
}

/// Where a `read` result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// This call started the fetch
  Network,
  /// Attached to a fetch another caller had already started
  Shared,
  /// Served from a fresh entry
  Cache,
}

/// Result of a cache read, including metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult {
  pub data: Payload,
  pub source: CacheSource,
  pub fetched_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_fresh_only_after_success_within_window() {
    let now = Instant::now();
    let mut entry = CacheEntry::new(CacheKey::path("/api/user/balance"), Duration::from_secs(120));
    assert!(entry.is_stale(now));

    entry.status = QueryStatus::Success;
    entry.last_fetched_at = Some(now);
    assert!(entry.is_fresh(now + Duration::from_secs(10)));
    assert!(entry.is_stale(now + Duration::from_secs(120)));
  }

  #[test]
  fn test_invalidated_entry_is_stale_inside_window() {
    let now = Instant::now();
    let mut entry = CacheEntry::new(CacheKey::path("/api/user/balance"), Duration::from_secs(120));
    entry.status = QueryStatus::Success;
    entry.last_fetched_at = Some(now);
    entry.is_invalidated = true;
    assert!(entry.is_stale(now));
  }

  #[test]
  fn test_error_entry_is_never_fresh() {
    let now = Instant::now();
    let mut entry = CacheEntry::new(CacheKey::path("/api/orders"), Duration::from_secs(120));
    entry.status = QueryStatus::Error;
    entry.last_fetched_at = Some(now);
    entry.data = Some(Payload::NoContent);
    assert!(entry.is_stale(now));
  }
}

//! Collaborator-side handle on a cached query.
//!
//! Inspired by TanStack Query's `useQuery`: a `Query` binds one cache key and
//! loader to a subscription, and exposes the `{data, status, error}` triple a
//! page renders from.
//!
//! # Example
//!
//! ```ignore
//! // Starts fetching right away (served from cache when fresh)
//! let mut query = client.use_resource(
//!     "/api/user/balance",
//!     QueryOptions::default().stale_after(Duration::from_secs(120)),
//! );
//!
//! // In event loop tick
//! if query.poll() {
//!     // State changed, trigger re-render
//! }
//!
//! // In render
//! match query.status() {
//!     QueryStatus::Loading => render_spinner(query.data()),
//!     QueryStatus::Success => render_data(query.data()),
//!     QueryStatus::Error => render_error(query.error(), query.data()),
//!     QueryStatus::Idle => {}
//! }
//! ```

use serde::de::DeserializeOwned;
use tokio::time::Instant;
use tracing::debug;

use crate::api::{ApiError, Payload};
use crate::cache::{
  CacheEntry, CacheKey, CacheStore, Loader, QueryOptions, QueryStatus, Subscription,
};

/// The `{data, status, error}` triple handed to a page.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryState {
  pub data: Option<Payload>,
  pub status: QueryStatus,
  pub error: Option<ApiError>,
}

/// Observer for one cached query.
///
/// Dropping the query unsubscribes; a fetch it started still completes and
/// fills the shared cache.
pub struct Query {
  store: CacheStore,
  options: QueryOptions,
  loader: Loader,
  subscription: Subscription,
  snapshot: CacheEntry,
}

impl Query {
  pub(crate) fn new(
    store: CacheStore,
    key: CacheKey,
    options: QueryOptions,
    loader: Loader,
  ) -> Self {
    let mut subscription = store.subscribe(&key);
    let snapshot = subscription
      .latest()
      .unwrap_or_else(|| CacheEntry::new(key, options.stale_after));

    Self {
      store,
      options,
      loader,
      subscription,
      snapshot,
    }
  }

  pub fn key(&self) -> &CacheKey {
    self.subscription.key()
  }

  /// Current `{data, status, error}`.
  pub fn state(&self) -> QueryState {
    QueryState {
      data: self.snapshot.data.clone(),
      status: self.snapshot.status,
      error: self.snapshot.error.clone(),
    }
  }

  pub fn entry(&self) -> &CacheEntry {
    &self.snapshot
  }

  pub fn status(&self) -> QueryStatus {
    self.snapshot.status
  }

  /// Last good data; still present while refetching or after an error.
  pub fn data(&self) -> Option<&Payload> {
    self.snapshot.data.as_ref()
  }

  /// Decode the data into a typed value.
  pub fn data_as<T: DeserializeOwned>(&self) -> Option<serde_json::Result<T>> {
    self.snapshot.data.as_ref().and_then(|p| p.decode())
  }

  pub fn error(&self) -> Option<&ApiError> {
    self.snapshot.error.as_ref()
  }

  pub fn is_loading(&self) -> bool {
    self.snapshot.is_loading()
  }

  pub fn is_success(&self) -> bool {
    self.snapshot.status == QueryStatus::Success
  }

  pub fn is_error(&self) -> bool {
    self.snapshot.status == QueryStatus::Error
  }

  /// Check if the data is stale (older than stale_after, or invalidated).
  pub fn is_stale(&self) -> bool {
    self.snapshot.is_stale(Instant::now())
  }

  /// Read through the cache in the background. Served from cache when fresh;
  /// joins a fetch already running for the key.
  pub fn fetch(&self) {
    let store = self.store.clone();
    let key = self.key().clone();
    let options = self.options;
    let loader = self.loader.clone();

    tokio::spawn(async move {
      if let Err(e) = store.read_with(&key, options, loader).await {
        debug!(key = %key, error = %e, "query fetch failed");
      }
    });
  }

  /// Invalidate and fetch again, even if the data is fresh.
  pub fn refetch(&self) {
    self.store.invalidate(self.key());
    self.fetch();
  }

  /// Apply queued state changes.
  ///
  /// Returns `true` if the state changed. Call this in your event loop tick handler.
  pub fn poll(&mut self) -> bool {
    match self.subscription.latest() {
      Some(entry) => {
        self.snapshot = entry;
        true
      }
      None => false,
    }
  }

  /// Wait for the next state change and apply it.
  pub async fn changed(&mut self) -> Option<&CacheEntry> {
    let entry = self.subscription.recv().await?;
    self.snapshot = entry;
    Some(&self.snapshot)
  }
}

impl std::fmt::Debug for Query {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Query")
      .field("key", self.key())
      .field("status", &self.snapshot.status)
      .field("options", &self.options)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::loader;
  use serde_json::json;
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::sync::Arc;
  use std::time::Duration;

  fn query_for(store: &CacheStore, path: &str, fetcher: Loader) -> Query {
    Query::new(
      store.clone(),
      CacheKey::path(path),
      QueryOptions::default(),
      fetcher,
    )
  }

  #[tokio::test]
  async fn test_query_success() {
    let store = CacheStore::new(QueryOptions::default());
    let mut query = query_for(
      &store,
      "/api/products",
      loader(|| async { Ok(Payload::Json(json!([1, 2, 3]))) }),
    );

    assert_eq!(query.status(), QueryStatus::Idle);

    query.fetch();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(query.poll());
    assert!(query.is_success());
    assert_eq!(query.data_as::<Vec<u32>>().unwrap().unwrap(), vec![1, 2, 3]);
  }

  #[tokio::test]
  async fn test_query_error() {
    let store = CacheStore::new(QueryOptions::default());
    let mut query = query_for(
      &store,
      "/api/orders",
      loader(|| async {
        Err(ApiError::Http {
          status: 403,
          message: "Forbidden".into(),
        })
      }),
    );

    query.fetch();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(query.poll());
    assert!(query.is_error());
    assert_eq!(query.error().and_then(|e| e.status()), Some(403));
    assert_eq!(query.data(), None);
  }

  #[tokio::test]
  async fn test_poll_without_changes_is_false() {
    let store = CacheStore::new(QueryOptions::default());
    let mut query = query_for(&store, "/api/cart", loader(|| async { Ok(Payload::NoContent) }));
    assert!(!query.poll());
  }

  #[tokio::test]
  async fn test_two_queries_share_one_fetch() {
    let counter = Arc::new(AtomicU32::new(0));
    let fetcher = {
      let counter = counter.clone();
      loader(move || {
        let counter = counter.clone();
        async move {
          tokio::time::sleep(Duration::from_millis(20)).await;
          Ok(Payload::Json(json!(counter.fetch_add(1, Ordering::SeqCst))))
        }
      })
    };
    let store = CacheStore::new(QueryOptions::default());
    let mut first = query_for(&store, "/api/user/balance", fetcher.clone());
    let mut second = query_for(&store, "/api/user/balance", fetcher);

    first.fetch();
    second.fetch();
    tokio::time::sleep(Duration::from_millis(50)).await;

    first.poll();
    second.poll();
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(first.data(), second.data());
  }

  #[tokio::test]
  async fn test_refetch_shows_old_data_until_new_arrives() {
    let counter = Arc::new(AtomicU32::new(0));
    let fetcher = {
      let counter = counter.clone();
      loader(move || {
        let counter = counter.clone();
        async move {
          tokio::time::sleep(Duration::from_millis(20)).await;
          Ok(Payload::Json(json!(counter.fetch_add(1, Ordering::SeqCst))))
        }
      })
    };
    let store = CacheStore::new(QueryOptions::default());
    let mut query = query_for(&store, "/api/orders", fetcher);

    query.fetch();
    tokio::time::sleep(Duration::from_millis(50)).await;
    query.poll();
    assert_eq!(query.data(), Some(&Payload::Json(json!(0))));

    query.refetch();
    tokio::time::sleep(Duration::from_millis(5)).await;
    query.poll();
    assert!(query.is_loading());
    assert_eq!(query.data(), Some(&Payload::Json(json!(0))));

    tokio::time::sleep(Duration::from_millis(50)).await;
    query.poll();
    assert!(query.is_success());
    assert_eq!(query.data(), Some(&Payload::Json(json!(1))));
  }
}

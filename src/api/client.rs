//! Data client that ties the executor, the cache and the invalidation policy together.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use color_eyre::Result;
use reqwest::Method;
use serde_json::Value;
use tracing::info;

use crate::cache::{loader, CacheKey, CacheResult, CacheStore, Loader, QueryOptions};
use crate::config::Config;
use crate::gesture::{GestureConfig, PullToRefresh};
use crate::invalidation::InvalidationPolicy;
use crate::query::Query;

use super::credentials::{CredentialSource, EnvToken, FirstOf, TokenFile};
use super::error::ApiError;
use super::executor::Executor;
use super::transport::ReqwestTransport;
use super::types::{ApiRequest, Payload};

/// Outcome of a successful mutation.
#[derive(Debug, Clone)]
pub struct MutationResult {
  pub payload: Payload,
  /// Keys (or prefixes) marked stale before this result was returned
  pub invalidated: Vec<CacheKey>,
}

/// Entry point for pages: cached reads, mutations with invalidation, and
/// pull-to-refresh bindings, all sharing one cache.
#[derive(Clone)]
pub struct DataClient {
  executor: Executor,
  store: CacheStore,
  policy: Arc<InvalidationPolicy>,
  gesture: GestureConfig,
}

impl DataClient {
  pub fn new(
    executor: Executor,
    store: CacheStore,
    policy: InvalidationPolicy,
    gesture: GestureConfig,
  ) -> Self {
    Self {
      executor,
      store,
      policy: Arc::new(policy),
      gesture,
    }
  }

  /// Build the production client: reqwest transport, env/file token, the
  /// storefront table plus configured descriptors.
  pub fn from_config(config: &Config) -> Result<Self> {
    let base_url = config.base_url()?;
    let timeout = Duration::from_millis(config.api.request_timeout_ms);
    let transport = ReqwestTransport::new(&base_url, timeout)?;

    let credentials: Arc<dyn CredentialSource> = Arc::new(FirstOf(vec![
      Box::new(EnvToken::default()),
      Box::new(TokenFile::new(config.token_path()?)),
    ]));

    let executor = Executor::new(Arc::new(transport), credentials);
    let store = CacheStore::new(config.cache.query_options());

    Ok(Self::new(
      executor,
      store,
      config.invalidation_policy(),
      config.gesture,
    ))
  }

  pub fn store(&self) -> &CacheStore {
    &self.store
  }

  pub fn executor(&self) -> &Executor {
    &self.executor
  }

  pub fn policy(&self) -> &InvalidationPolicy {
    &self.policy
  }

  /// Loader that GETs `path` through the executor.
  pub fn get_loader(&self, path: &str) -> Loader {
    let executor = self.executor.clone();
    let path = path.to_string();
    loader(move || {
      let executor = executor.clone();
      let request = ApiRequest::get(path.clone());
      async move { executor.execute(request).await }
    })
  }

  /// Observe `key`, fetching with `fetcher` when needed.
  pub fn use_cached_query<F, Fut>(
    &self,
    key: CacheKey,
    fetcher: F,
    options: QueryOptions,
  ) -> Query
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Payload, ApiError>> + Send + 'static,
  {
    let query = Query::new(self.store.clone(), key, options, loader(fetcher));
    query.fetch();
    query
  }

  /// Observe a plain GET resource, keyed by its path.
  pub fn use_resource(&self, path: &str, options: QueryOptions) -> Query {
    let query = Query::new(
      self.store.clone(),
      CacheKey::path(path),
      options,
      self.get_loader(path),
    );
    query.fetch();
    query
  }

  /// Read a GET resource through the cache.
  pub async fn read(&self, path: &str, options: QueryOptions) -> Result<CacheResult, ApiError> {
    self
      .store
      .read_with(&CacheKey::path(path), options, self.get_loader(path))
      .await
  }

  /// Run a state-changing call. On success the matching cache entries are
  /// invalidated before this returns; on failure nothing is invalidated.
  pub async fn execute_mutation(
    &self,
    method: Method,
    path: &str,
    body: Option<Value>,
  ) -> Result<MutationResult, ApiError> {
    let request = ApiRequest::new(method, path, body);
    if request.is_get_like() {
      let payload = self.executor.execute(request).await?;
      return Ok(MutationResult {
        payload,
        invalidated: Vec::new(),
      });
    }

    let receipt = self.executor.mutate(request).await?;
    let invalidated = self
      .policy
      .on_mutation_success(&receipt.endpoint, &self.store);
    info!(
      method = %receipt.method,
      endpoint = %receipt.endpoint,
      invalidated = invalidated.len(),
      empty = receipt.payload.is_empty(),
      "mutation succeeded"
    );

    Ok(MutationResult {
      payload: receipt.payload,
      invalidated,
    })
  }

  /// Bind a gesture controller to a surface with a custom refresh callback.
  pub fn bind_pull_to_refresh<F, Fut>(&self, surface: &str, on_refresh: F) -> Arc<PullToRefresh>
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ApiError>> + Send + 'static,
  {
    PullToRefresh::new(surface, self.gesture, on_refresh)
  }

  /// Bind a gesture controller whose refresh invalidates and re-reads `keys`.
  /// Every key is refreshed; the first failure is reported.
  pub fn bind_pull_to_refresh_keys(
    &self,
    surface: &str,
    keys: Vec<CacheKey>,
  ) -> Arc<PullToRefresh> {
    let store = self.store.clone();
    let keys = Arc::new(keys);
    self.bind_pull_to_refresh(surface, move || {
      let store = store.clone();
      let keys = Arc::clone(&keys);
      async move {
        let results =
          futures::future::join_all(keys.iter().map(|key| store.refresh(key))).await;
        results.into_iter().find_map(Result::err).map_or(Ok(()), Err)
      }
    })
  }
}

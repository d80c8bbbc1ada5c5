//! Process-wide query cache.
//!
//! The store owns every entry. Collaborators read through [`CacheStore::read`],
//! mark entries stale through [`CacheStore::invalidate`], and observe changes
//! through [`CacheStore::subscribe`]; nothing else can touch an entry.
//!
//! Fetches run as spawned tasks so a caller that gives up waiting does not
//! cancel the fetch: the result still lands in the cache for everyone else.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use super::entry::{CacheEntry, CacheResult, CacheSource, QueryOptions, QueryStatus};
use super::key::CacheKey;
use crate::api::{ApiError, Payload};

type FetchResult = Result<Payload, ApiError>;

/// A factory function that creates futures for fetching data.
pub type Loader = Arc<dyn Fn() -> BoxFuture<'static, FetchResult> + Send + Sync>;

/// Wrap a closure into a [`Loader`].
pub fn loader<F, Fut>(fetcher: F) -> Loader
where
  F: Fn() -> Fut + Send + Sync + 'static,
  Fut: Future<Output = FetchResult> + Send + 'static,
{
  Arc::new(move || fetcher().boxed())
}

type InFlight = Shared<BoxFuture<'static, FetchResult>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchMode {
  /// Visible as `Loading`
  Foreground,
  /// Status untouched unless the fetch fails
  Background,
}

struct Slot {
  entry: CacheEntry,
  options: QueryOptions,
  loader: Option<Loader>,
  in_flight: Option<InFlight>,
  subscribers: Vec<(u64, mpsc::UnboundedSender<CacheEntry>)>,
  poller: Option<(Duration, JoinHandle<()>)>,
}

impl Slot {
  fn new(key: CacheKey, options: QueryOptions) -> Self {
    Self {
      entry: CacheEntry::new(key, options.stale_after),
      options,
      loader: None,
      in_flight: None,
      subscribers: Vec::new(),
      poller: None,
    }
  }

  /// Push the current state to every live subscriber, dropping closed ones.
  fn notify(&mut self) {
    let snapshot = self.entry.clone();
    self
      .subscribers
      .retain(|(_, tx)| tx.send(snapshot.clone()).is_ok());
  }

  fn has_subscribers(&mut self) -> bool {
    self.subscribers.retain(|(_, tx)| !tx.is_closed());
    !self.subscribers.is_empty()
  }
}

struct Inner {
  slots: Mutex<HashMap<CacheKey, Slot>>,
  defaults: QueryOptions,
  next_subscriber: AtomicU64,
}

impl Inner {
  fn lock(&self) -> MutexGuard<'_, HashMap<CacheKey, Slot>> {
    self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Start a fetch for `slot` and record it as the key's single in-flight call.
  fn begin_fetch(
    inner: &Arc<Inner>,
    key: &CacheKey,
    slot: &mut Slot,
    loader: Loader,
    mode: FetchMode,
  ) -> InFlight {
    slot.entry.is_invalidated = false;
    if mode == FetchMode::Foreground || slot.entry.status == QueryStatus::Idle {
      slot.entry.status = QueryStatus::Loading;
    } else {
      slot.entry.is_fetching = true;
    }
    slot.notify();

    let store = Arc::clone(inner);
    let task_key = key.clone();
    let handle = tokio::spawn(async move {
      // Calling the loader is inside the guard too: it may panic before
      // handing back a future.
      let result = AssertUnwindSafe(async { loader().await })
        .catch_unwind()
        .await
        .unwrap_or_else(|_| Err(ApiError::Network("loader panicked".to_string())));
      Inner::complete(&store, &task_key, &result);
      result
    });

    let weak = Arc::downgrade(inner);
    let task_key = key.clone();
    let in_flight = async move {
      match handle.await {
        Ok(result) => result,
        Err(e) => {
          // The task died before settling the entry; settle it here.
          let result = Err(ApiError::Network(format!("fetch task failed: {}", e)));
          if let Some(inner) = weak.upgrade() {
            Inner::complete(&inner, &task_key, &result);
          }
          result
        }
      }
    }
    .boxed()
    .shared();

    slot.in_flight = Some(in_flight.clone());
    in_flight
  }

  /// Apply a finished fetch to the entry and notify subscribers.
  fn complete(inner: &Arc<Inner>, key: &CacheKey, result: &FetchResult) {
    let mut slots = inner.lock();
    let Some(slot) = slots.get_mut(key) else {
      return;
    };

    slot.in_flight = None;
    slot.entry.is_fetching = false;
    match result {
      Ok(payload) => {
        slot.entry.status = QueryStatus::Success;
        slot.entry.data = Some(payload.clone());
        slot.entry.error = None;
        slot.entry.last_fetched_at = Some(Instant::now());
        slot.entry.fetched_at = Some(Utc::now());
        debug!(key = %key, "fetch succeeded");
      }
      Err(e) => {
        // Previous data stays visible; only the status and error change.
        slot.entry.status = QueryStatus::Error;
        slot.entry.error = Some(e.clone());
        warn!(key = %key, error = %e, "fetch failed");
      }
    }
    slot.notify();

    // Invalidated while this fetch was running: observers need a fresh value.
    if slot.entry.is_invalidated && slot.has_subscribers() {
      if let Some(loader) = slot.loader.clone() {
        debug!(key = %key, "refetching entry invalidated during fetch");
        let _ = Inner::begin_fetch(inner, key, slot, loader, FetchMode::Foreground);
      }
    }
  }

  /// (Re)arm the periodic refresh timer to match the slot's options.
  fn ensure_poller(inner: &Arc<Inner>, key: &CacheKey, slot: &mut Slot) {
    let Some(interval) = slot.options.refetch_interval else {
      if let Some((_, poller)) = slot.poller.take() {
        poller.abort();
      }
      return;
    };

    if let Some((current, poller)) = &slot.poller {
      if *current == interval && !poller.is_finished() {
        return;
      }
      poller.abort();
    }

    let weak: Weak<Inner> = Arc::downgrade(inner);
    let key = key.clone();
    let poller = tokio::spawn(async move {
      let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
      loop {
        ticker.tick().await;
        let Some(inner) = weak.upgrade() else {
          break;
        };
        Inner::background_refresh(&inner, &key);
      }
    });
    slot.poller = Some((interval, poller));
  }

  fn background_refresh(inner: &Arc<Inner>, key: &CacheKey) {
    let mut slots = inner.lock();
    let Some(slot) = slots.get_mut(key) else {
      return;
    };
    if slot.in_flight.is_some() || !slot.has_subscribers() {
      return;
    }
    if let Some(loader) = slot.loader.clone() {
      debug!(key = %key, "background refresh");
      let _ = Inner::begin_fetch(inner, key, slot, loader, FetchMode::Background);
    }
  }
}

impl Drop for Inner {
  fn drop(&mut self) {
    let slots = self
      .slots
      .get_mut()
      .unwrap_or_else(|poisoned| poisoned.into_inner());
    for slot in slots.values_mut() {
      if let Some((_, poller)) = slot.poller.take() {
        poller.abort();
      }
    }
  }
}

/// What a reader should do after inspecting the slot.
enum Step {
  Await(InFlight, CacheSource),
  /// Wait for an outdated in-flight fetch to settle, then look again
  Settle(InFlight),
}

/// Keyed cache of query results with freshness tracking, request
/// de-duplication and ordered change notification.
///
/// Cloning is cheap and every clone refers to the same cache.
#[derive(Clone)]
pub struct CacheStore {
  inner: Arc<Inner>,
}

impl CacheStore {
  /// Create an empty store. `defaults` apply to keys first seen via `subscribe`.
  pub fn new(defaults: QueryOptions) -> Self {
    Self {
      inner: Arc::new(Inner {
        slots: Mutex::new(HashMap::new()),
        defaults,
        next_subscriber: AtomicU64::new(1),
      }),
    }
  }

  pub fn defaults(&self) -> QueryOptions {
    self.inner.defaults
  }

  /// Read through the cache.
  ///
  /// A fresh successful entry is returned without calling `fetcher`. If a
  /// fetch for the key is already running, the caller attaches to it.
  /// Otherwise the entry goes to `Loading` and `fetcher` runs.
  pub async fn read<F, Fut>(
    &self,
    key: &CacheKey,
    options: QueryOptions,
    fetcher: F,
  ) -> Result<CacheResult, ApiError>
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = FetchResult> + Send + 'static,
  {
    self.read_with(key, options, loader(fetcher)).await
  }

  /// [`read`](Self::read) with an already boxed loader.
  pub async fn read_with(
    &self,
    key: &CacheKey,
    options: QueryOptions,
    loader: Loader,
  ) -> Result<CacheResult, ApiError> {
    loop {
      let step = {
        let mut slots = self.inner.lock();
        let slot = slots
          .entry(key.clone())
          .or_insert_with(|| Slot::new(key.clone(), options));
        slot.options = options;
        slot.entry.stale_after = options.stale_after;
        slot.loader = Some(Arc::clone(&loader));
        Inner::ensure_poller(&self.inner, key, slot);

        if let (true, Some(data)) = (slot.entry.is_fresh(Instant::now()), &slot.entry.data) {
          return Ok(CacheResult {
            data: data.clone(),
            source: CacheSource::Cache,
            fetched_at: slot.entry.fetched_at,
          });
        }

        match slot.in_flight.clone() {
          // Started before an invalidation; its result is already outdated.
          Some(in_flight) if slot.entry.is_invalidated => Step::Settle(in_flight),
          Some(in_flight) => Step::Await(in_flight, CacheSource::Shared),
          None => Step::Await(
            Inner::begin_fetch(
              &self.inner,
              key,
              slot,
              Arc::clone(&loader),
              FetchMode::Foreground,
            ),
            CacheSource::Network,
          ),
        }
      };

      match step {
        Step::Settle(in_flight) => {
          let _ = in_flight.await;
        }
        Step::Await(in_flight, source) => {
          let data = in_flight.await?;
          let fetched_at = self.entry(key).and_then(|e| e.fetched_at);
          return Ok(CacheResult {
            data,
            source,
            fetched_at,
          });
        }
      }
    }
  }

  /// Current snapshot of `key`. Starts a fetch with the retained loader when
  /// the entry is stale and nothing is in flight. Never waits.
  pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
    let mut slots = self.inner.lock();
    let slot = slots.get_mut(key)?;

    if slot.in_flight.is_none() && slot.entry.is_stale(Instant::now()) && has_runtime() {
      if let Some(loader) = slot.loader.clone() {
        let _ = Inner::begin_fetch(&self.inner, key, slot, loader, FetchMode::Foreground);
      }
    }
    Some(slot.entry.clone())
  }

  /// Snapshot of `key` without side effects.
  pub fn entry(&self, key: &CacheKey) -> Option<CacheEntry> {
    self.inner.lock().get(key).map(|slot| slot.entry.clone())
  }

  /// Mark every entry under `prefix` stale, keeping its data visible.
  ///
  /// Entries that are currently observed are refetched right away.
  /// Returns the number of entries matched.
  pub fn invalidate(&self, prefix: &CacheKey) -> usize {
    let mut slots = self.inner.lock();
    let runtime = has_runtime();
    let mut matched = 0;

    for (key, slot) in slots.iter_mut().filter(|(k, _)| k.starts_with(prefix)) {
      matched += 1;
      slot.entry.is_invalidated = true;

      if slot.in_flight.is_none() && runtime && slot.has_subscribers() {
        if let Some(loader) = slot.loader.clone() {
          let _ = Inner::begin_fetch(&self.inner, key, slot, loader, FetchMode::Foreground);
        }
      }
    }

    debug!(prefix = %prefix, matched, "invalidated");
    matched
  }

  /// Invalidate `key` and read it again with the loader it was last read with.
  /// `Ok(None)` when the key has never been read.
  pub async fn refresh(&self, key: &CacheKey) -> Result<Option<CacheResult>, ApiError> {
    let retained = {
      let slots = self.inner.lock();
      slots
        .get(key)
        .and_then(|slot| slot.loader.clone().map(|l| (l, slot.options)))
    };
    let Some((loader, options)) = retained else {
      return Ok(None);
    };

    self.invalidate(key);
    self.read_with(key, options, loader).await.map(Some)
  }

  /// Observe `key`. The current state is delivered first, then every change
  /// in the order it happened. Dropping the handle unsubscribes.
  pub fn subscribe(&self, key: &CacheKey) -> Subscription {
    let (tx, rx) = mpsc::unbounded_channel();
    let id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);

    let mut slots = self.inner.lock();
    let slot = slots
      .entry(key.clone())
      .or_insert_with(|| Slot::new(key.clone(), self.inner.defaults));
    let _ = tx.send(slot.entry.clone());
    slot.subscribers.push((id, tx));

    Subscription {
      id,
      key: key.clone(),
      rx,
      store: Arc::downgrade(&self.inner),
    }
  }

  /// Callback flavour of [`subscribe`](Self::subscribe). The callback runs on
  /// a spawned task, in notification order, until the handle is dropped.
  pub fn subscribe_fn<F>(&self, key: &CacheKey, callback: F) -> CallbackSubscription
  where
    F: Fn(&CacheEntry) + Send + 'static,
  {
    let mut subscription = self.subscribe(key);
    let task = tokio::spawn(async move {
      while let Some(entry) = subscription.recv().await {
        callback(&entry);
      }
    });
    CallbackSubscription { task }
  }

  pub fn subscriber_count(&self, key: &CacheKey) -> usize {
    let mut slots = self.inner.lock();
    slots
      .get_mut(key)
      .map(|slot| {
        slot.has_subscribers();
        slot.subscribers.len()
      })
      .unwrap_or(0)
  }

  /// Keys currently held, sorted.
  pub fn keys(&self) -> Vec<CacheKey> {
    let mut keys: Vec<CacheKey> = self.inner.lock().keys().cloned().collect();
    keys.sort();
    keys
  }

  /// Stop refresh timers and drop all entries and subscribers.
  pub fn shutdown(&self) {
    let mut slots = self.inner.lock();
    for slot in slots.values_mut() {
      if let Some((_, poller)) = slot.poller.take() {
        poller.abort();
      }
    }
    slots.clear();
  }
}

fn has_runtime() -> bool {
  tokio::runtime::Handle::try_current().is_ok()
}

/// Receiving end of a subscription. Deregisters itself on drop.
pub struct Subscription {
  id: u64,
  key: CacheKey,
  rx: mpsc::UnboundedReceiver<CacheEntry>,
  store: Weak<Inner>,
}

impl Subscription {
  pub fn key(&self) -> &CacheKey {
    &self.key
  }

  /// Wait for the next state change.
  pub async fn recv(&mut self) -> Option<CacheEntry> {
    self.rx.recv().await
  }

  /// Next queued state change, if any.
  pub fn try_recv(&mut self) -> Option<CacheEntry> {
    self.rx.try_recv().ok()
  }

  /// Drain the queue and return the newest state.
  pub fn latest(&mut self) -> Option<CacheEntry> {
    let mut latest = None;
    while let Ok(entry) = self.rx.try_recv() {
      latest = Some(entry);
    }
    latest
  }

  pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
  fn drop(&mut self) {
    if let Some(inner) = self.store.upgrade() {
      let mut slots = inner.lock();
      if let Some(slot) = slots.get_mut(&self.key) {
        slot.subscribers.retain(|(id, _)| *id != self.id);
      }
    }
  }
}

/// Handle for [`CacheStore::subscribe_fn`]. Dropping it stops the callback.
pub struct CallbackSubscription {
  task: JoinHandle<()>,
}

impl CallbackSubscription {
  pub fn unsubscribe(self) {}
}

impl Drop for CallbackSubscription {
  fn drop(&mut self) {
    self.task.abort();
  }
}

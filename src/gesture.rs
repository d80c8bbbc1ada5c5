//! Pull-to-refresh recognizer.
//!
//! One [`PullToRefresh`] per scrollable surface. A downward drag that starts
//! at the top of the surface is tracked with a resistance curve; releasing
//! past the threshold commits a refresh, releasing short of it cancels.
//!
//! ```text
//! Idle --start@top--> Tracking --end, pull >= threshold--> Committing --> Refreshing
//!  ^                     |                                                   |
//!  +---------------------+-- end, pull < threshold              done --------+
//! ```

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};

use color_eyre::{eyre::eyre, Result};
use futures::future::{BoxFuture, FutureExt};
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::ApiError;
use crate::event::TouchEvent;

/// Tuning for the drag.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct GestureConfig {
  /// Pull distance at which a release commits a refresh
  pub threshold: f64,
  /// Upper bound on the visible pull
  pub max_pull: f64,
  /// Fraction of finger travel that becomes pull, in (0, 1]
  pub resistance: f64,
}

impl Default for GestureConfig {
  fn default() -> Self {
    Self {
      threshold: 80.0,
      max_pull: 120.0,
      resistance: 0.5,
    }
  }
}

impl GestureConfig {
  pub fn validate(&self) -> Result<()> {
    if !(self.resistance > 0.0 && self.resistance <= 1.0) {
      return Err(eyre!(
        "gesture.resistance must be in (0, 1], got {}",
        self.resistance
      ));
    }
    if self.threshold <= 0.0 {
      return Err(eyre!("gesture.threshold must be positive, got {}", self.threshold));
    }
    if self.max_pull < self.threshold {
      return Err(eyre!(
        "gesture.max_pull ({}) must not be below gesture.threshold ({})",
        self.max_pull,
        self.threshold
      ));
    }
    Ok(())
  }

  /// Pull distance for a finger travel of `delta_y`: linear at `resistance`
  /// rate, capped at `max_pull`, zero for non-positive travel.
  pub fn resistance_curve(&self, delta_y: f64) -> f64 {
    if delta_y <= 0.0 {
      return 0.0;
    }
    (delta_y * self.resistance).min(self.max_pull)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GesturePhase {
  Idle,
  Tracking,
  Committing,
  Refreshing,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GestureState {
  pub phase: GesturePhase,
  pub start_y: f64,
  pub current_pull: f64,
}

impl GestureState {
  fn idle() -> Self {
    Self {
      phase: GesturePhase::Idle,
      start_y: 0.0,
      current_pull: 0.0,
    }
  }
}

/// What a touch event did to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GestureOutcome {
  /// Event accepted while tracking a drag
  Tracking,
  /// Event not applicable in the current phase
  Ignored,
  /// Released short of the threshold
  Cancelled,
  Refreshed,
  /// The refresh callback failed; the controller is back to idle anyway
  RefreshFailed,
}

/// What the surface should render.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PullView {
  pub pull_distance: f64,
  pub is_refreshing: bool,
  pub progress_percent: f64,
}

/// Callback run when a pull commits.
pub type RefreshFn = Arc<dyn Fn() -> BoxFuture<'static, Result<(), ApiError>> + Send + Sync>;

/// Gesture controller bound to one surface.
pub struct PullToRefresh {
  surface: String,
  config: GestureConfig,
  state: Mutex<GestureState>,
  on_refresh: RefreshFn,
  view_tx: watch::Sender<PullView>,
}

impl PullToRefresh {
  pub fn new<F, Fut>(surface: impl Into<String>, config: GestureConfig, on_refresh: F) -> Arc<Self>
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<(), ApiError>> + Send + 'static,
  {
    let state = GestureState::idle();
    let (view_tx, _) = watch::channel(view_of(&config, &state));
    Arc::new(Self {
      surface: surface.into(),
      config,
      state: Mutex::new(state),
      on_refresh: Arc::new(move || on_refresh().boxed()),
      view_tx,
    })
  }

  pub fn surface(&self) -> &str {
    &self.surface
  }

  pub fn config(&self) -> &GestureConfig {
    &self.config
  }

  pub fn state(&self) -> GestureState {
    *self.lock()
  }

  pub fn phase(&self) -> GesturePhase {
    self.lock().phase
  }

  pub fn view(&self) -> PullView {
    view_of(&self.config, &self.lock())
  }

  /// Receiver that sees every view change.
  pub fn watch(&self) -> watch::Receiver<PullView> {
    self.view_tx.subscribe()
  }

  /// Feed one touch event. Only a committing release waits (for the refresh).
  pub async fn handle(self: &Arc<Self>, event: TouchEvent) -> GestureOutcome {
    match event {
      TouchEvent::Start { y, scroll_top } => self.touch_start(y, scroll_top),
      TouchEvent::Move { y, scroll_top } => self.touch_move(y, scroll_top),
      TouchEvent::End => self.touch_end().await,
    }
  }

  pub fn touch_start(&self, y: f64, scroll_top: f64) -> GestureOutcome {
    let mut state = self.lock();
    // Also rejects starts during Committing/Refreshing: one refresh at a time.
    if state.phase != GesturePhase::Idle || scroll_top > 0.0 {
      return GestureOutcome::Ignored;
    }

    *state = GestureState {
      phase: GesturePhase::Tracking,
      start_y: y,
      current_pull: 0.0,
    };
    self.publish(&state);
    GestureOutcome::Tracking
  }

  pub fn touch_move(&self, y: f64, scroll_top: f64) -> GestureOutcome {
    let mut state = self.lock();
    if state.phase != GesturePhase::Tracking {
      return GestureOutcome::Ignored;
    }

    let delta_y = y - state.start_y;
    state.current_pull = if scroll_top > 0.0 {
      0.0
    } else {
      self.config.resistance_curve(delta_y)
    };
    self.publish(&state);
    GestureOutcome::Tracking
  }

  /// Release. Past the threshold this runs the refresh to completion; the
  /// cycle keeps running even if the returned future is dropped.
  pub async fn touch_end(self: &Arc<Self>) -> GestureOutcome {
    {
      let mut state = self.lock();
      if state.phase != GesturePhase::Tracking {
        return GestureOutcome::Ignored;
      }

      if state.current_pull < self.config.threshold {
        debug!(surface = %self.surface, pull = state.current_pull, "pull cancelled");
        *state = GestureState::idle();
        self.publish(&state);
        return GestureOutcome::Cancelled;
      }

      state.phase = GesturePhase::Committing;
      state.current_pull = self.config.threshold;
      self.publish(&state);

      state.phase = GesturePhase::Refreshing;
      self.publish(&state);
    }

    info!(surface = %self.surface, "pull-to-refresh committed");
    let controller = Arc::clone(self);
    let cycle = tokio::spawn(async move { controller.run_refresh().await });

    cycle.await.unwrap_or_else(|e| {
      warn!(error = %e, "refresh cycle task failed");
      GestureOutcome::RefreshFailed
    })
  }

  async fn run_refresh(&self) -> GestureOutcome {
    let refresh = (self.on_refresh)();
    let outcome = match AssertUnwindSafe(refresh).catch_unwind().await {
      Ok(Ok(())) => GestureOutcome::Refreshed,
      Ok(Err(e)) => {
        warn!(surface = %self.surface, error = %e, "refresh failed");
        GestureOutcome::RefreshFailed
      }
      Err(_) => {
        warn!(surface = %self.surface, "refresh callback panicked");
        GestureOutcome::RefreshFailed
      }
    };

    let mut state = self.lock();
    *state = GestureState::idle();
    self.publish(&state);
    outcome
  }

  fn lock(&self) -> MutexGuard<'_, GestureState> {
    self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  fn publish(&self, state: &GestureState) {
    self.view_tx.send_replace(view_of(&self.config, state));
  }
}

fn view_of(config: &GestureConfig, state: &GestureState) -> PullView {
  PullView {
    pull_distance: state.current_pull,
    is_refreshing: matches!(
      state.phase,
      GesturePhase::Committing | GesturePhase::Refreshing
    ),
    progress_percent: (state.current_pull / config.threshold * 100.0).min(100.0),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::time::Duration;
  use tokio::sync::Notify;

  fn controller_with<F, Fut>(on_refresh: F) -> Arc<PullToRefresh>
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<(), ApiError>> + Send + 'static,
  {
    PullToRefresh::new("orders", GestureConfig::default(), on_refresh)
  }

  fn counting(calls: &Arc<AtomicUsize>) -> Arc<PullToRefresh> {
    let calls = Arc::clone(calls);
    controller_with(move || {
      let calls = Arc::clone(&calls);
      async move {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
      }
    })
  }

  #[test]
  fn test_resistance_curve_is_half_rate_and_capped() {
    let config = GestureConfig::default();
    assert_eq!(config.resistance_curve(-20.0), 0.0);
    assert_eq!(config.resistance_curve(0.0), 0.0);
    assert_eq!(config.resistance_curve(100.0), 50.0);
    assert_eq!(config.resistance_curve(200.0), 100.0);
    assert_eq!(config.resistance_curve(1000.0), 120.0);
  }

  #[test]
  fn test_config_validation() {
    assert!(GestureConfig::default().validate().is_ok());
    let bad_resistance = GestureConfig {
      resistance: 1.5,
      ..GestureConfig::default()
    };
    assert!(bad_resistance.validate().is_err());
    let bad_cap = GestureConfig {
      max_pull: 40.0,
      ..GestureConfig::default()
    };
    assert!(bad_cap.validate().is_err());
  }

  #[tokio::test]
  async fn test_pull_to_threshold_refreshes() {
    let calls = Arc::new(AtomicUsize::new(0));
    let controller = counting(&calls);
    let threshold = controller.config().threshold;

    assert_eq!(controller.touch_start(300.0, 0.0), GestureOutcome::Tracking);
    controller.touch_move(300.0 + threshold / 0.5, 0.0);
    assert_eq!(controller.state().current_pull, threshold);

    assert_eq!(controller.touch_end().await, GestureOutcome::Refreshed);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(controller.state(), GestureState::idle());
  }

  #[tokio::test]
  async fn test_short_pull_cancels() {
    let calls = Arc::new(AtomicUsize::new(0));
    let controller = counting(&calls);
    let threshold = controller.config().threshold;

    controller.touch_start(300.0, 0.0);
    controller.touch_move(300.0 + threshold / 0.5 - 1.0, 0.0);
    assert!(controller.state().current_pull < threshold);

    assert_eq!(controller.touch_end().await, GestureOutcome::Cancelled);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(controller.phase(), GesturePhase::Idle);
    assert_eq!(controller.view().pull_distance, 0.0);
  }

  #[tokio::test]
  async fn test_refreshing_phase_pins_pull_and_blocks_new_touches() {
    let release = Arc::new(Notify::new());
    let calls = Arc::new(AtomicUsize::new(0));
    let controller = {
      let release = Arc::clone(&release);
      let calls = Arc::clone(&calls);
      controller_with(move || {
        let release = Arc::clone(&release);
        let calls = Arc::clone(&calls);
        async move {
          calls.fetch_add(1, Ordering::SeqCst);
          release.notified().await;
          Ok(())
        }
      })
    };

    controller.touch_start(100.0, 0.0);
    controller.touch_move(300.0, 0.0);
    assert_eq!(controller.state().current_pull, 100.0);

    let ending = {
      let controller = Arc::clone(&controller);
      tokio::spawn(async move { controller.touch_end().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(controller.phase(), GesturePhase::Refreshing);
    let view = controller.view();
    assert!(view.is_refreshing);
    assert_eq!(view.pull_distance, 80.0);
    assert_eq!(view.progress_percent, 100.0);

    assert_eq!(controller.touch_start(100.0, 0.0), GestureOutcome::Ignored);
    assert_eq!(controller.touch_end().await, GestureOutcome::Ignored);

    release.notify_one();
    assert_eq!(ending.await.unwrap(), GestureOutcome::Refreshed);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(controller.phase(), GesturePhase::Idle);
  }

  #[tokio::test]
  async fn test_failing_refresh_still_returns_to_idle() {
    let controller = controller_with(|| async {
      Err(ApiError::Http {
        status: 500,
        message: "Internal Server Error".into(),
      })
    });

    controller.touch_start(0.0, 0.0);
    controller.touch_move(200.0, 0.0);
    assert_eq!(controller.state().current_pull, 100.0);

    assert_eq!(controller.touch_end().await, GestureOutcome::RefreshFailed);
    assert_eq!(controller.state(), GestureState::idle());
  }

  #[tokio::test]
  async fn test_panicking_refresh_still_returns_to_idle() {
    let controller = controller_with(|| async {
      if refresh_should_panic() {
        panic!("page torn down");
      }
      Ok(())
    });

    controller.touch_start(0.0, 0.0);
    controller.touch_move(200.0, 0.0);

    assert_eq!(controller.touch_end().await, GestureOutcome::RefreshFailed);
    assert_eq!(controller.state(), GestureState::idle());
  }

  fn refresh_should_panic() -> bool {
    true
  }

  #[tokio::test]
  async fn test_upward_or_scrolled_move_resets_pull_but_keeps_tracking() {
    let controller = counting(&Arc::new(AtomicUsize::new(0)));
    controller.touch_start(100.0, 0.0);
    controller.touch_move(200.0, 0.0);
    assert_eq!(controller.state().current_pull, 50.0);

    controller.touch_move(90.0, 0.0);
    assert_eq!(controller.state().current_pull, 0.0);
    assert_eq!(controller.phase(), GesturePhase::Tracking);

    controller.touch_move(400.0, 12.0);
    assert_eq!(controller.state().current_pull, 0.0);
    assert_eq!(controller.phase(), GesturePhase::Tracking);

    controller.touch_move(400.0, 0.0);
    assert_eq!(controller.state().current_pull, 120.0);
  }

  #[tokio::test]
  async fn test_events_outside_tracking_are_ignored() {
    let controller = counting(&Arc::new(AtomicUsize::new(0)));
    assert_eq!(controller.touch_move(300.0, 0.0), GestureOutcome::Ignored);
    assert_eq!(controller.touch_end().await, GestureOutcome::Ignored);
    assert_eq!(controller.touch_start(100.0, 35.0), GestureOutcome::Ignored);
    assert_eq!(controller.phase(), GesturePhase::Idle);
  }

  #[tokio::test]
  async fn test_watch_reports_progress() {
    let controller = counting(&Arc::new(AtomicUsize::new(0)));
    let rx = controller.watch();

    controller.handle(TouchEvent::Start { y: 0.0, scroll_top: 0.0 }).await;
    controller.handle(TouchEvent::Move { y: 80.0, scroll_top: 0.0 }).await;

    let view = *rx.borrow();
    assert_eq!(view.pull_distance, 40.0);
    assert_eq!(view.progress_percent, 50.0);
    assert!(!view.is_refreshing);
  }
}

// src/registry/record.rs
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::window::ResponseTimeWindow;

/// A backend URL. Opaque, non-empty, compared byte-exact.
pub type BackendUrl = String;

/// Per-backend health/latency state (component B).
///
/// Plain-atomics-plus-narrow-mutex, in the shape of the teacher's `Backend`:
/// independent fields use independent atomics, and only the rare
/// multi-field transition (`mark_slow` / cooldown clear) takes a lock.
pub struct BackendRecord {
    pub url: BackendUrl,
    healthy: AtomicBool,
    ema_latency_ms: AtomicI64,
    pub window: ResponseTimeWindow,
    consecutive_failures: AtomicUsize,
    last_health_check_at: Mutex<Option<Instant>>,
    slow_state: Mutex<SlowState>,
    total_requests: AtomicU64,
}

#[derive(Clone, Copy)]
struct SlowState {
    in_cooldown: bool,
    last_slow_at: Option<Instant>,
}

impl BackendRecord {
    pub fn new(
        url: BackendUrl,
        initial_latency_ms: i64,
        window_time: Duration,
        window_max_entries: usize,
    ) -> Self {
        Self {
            url,
            healthy: AtomicBool::new(true),
            ema_latency_ms: AtomicI64::new(initial_latency_ms),
            window: ResponseTimeWindow::new(window_time, window_max_entries),
            consecutive_failures: AtomicUsize::new(0),
            last_health_check_at: Mutex::new(None),
            slow_state: Mutex::new(SlowState {
                in_cooldown: false,
                last_slow_at: None,
            }),
            total_requests: AtomicU64::new(0),
        }
    }

    pub fn healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    pub fn ema_latency_ms(&self) -> i64 {
        self.ema_latency_ms.load(Ordering::Acquire)
    }

    pub fn consecutive_failures(&self) -> usize {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    pub fn last_health_check_at(&self) -> Option<Instant> {
        *self.last_health_check_at.lock().unwrap()
    }

    pub fn in_slow_cooldown(&self) -> bool {
        self.slow_state.lock().unwrap().in_cooldown
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    /// `inSlowCooldown && lastSlowAt != nil && now < lastSlowAt + cooldown`.
    pub fn still_in_slow_cooldown(&self, cooldown: Duration) -> bool {
        let state = self.slow_state.lock().unwrap();
        match (state.in_cooldown, state.last_slow_at) {
            (true, Some(since)) => since.elapsed() < cooldown,
            _ => false,
        }
    }

    /// Idempotent: clears cooldown fields regardless of current state.
    pub fn clear_slow_cooldown(&self) {
        let mut state = self.slow_state.lock().unwrap();
        state.in_cooldown = false;
        state.last_slow_at = None;
    }

    /// Sets `lastSlowAt := now`, `inSlowCooldown := true`, `healthy := false`
    /// as a single critical section.
    fn mark_slow(&self, now: Instant) {
        let mut state = self.slow_state.lock().unwrap();
        state.in_cooldown = true;
        state.last_slow_at = Some(now);
        drop(state);
        self.set_healthy(false);
    }

    /// Record a user-request latency sample: update the window, the EMA,
    /// and (if the slowness policy fires) start a cooldown. Health-probe
    /// latencies must never reach this method.
    pub fn record_latency(
        &self,
        latency_ms: i64,
        slow_threshold_ms: i64,
        slowness_window_size: usize,
        slowness_threshold_ratio: f64,
    ) {
        let now = Instant::now();
        self.window.add(latency_ms, now);
        self.update_ema(latency_ms);
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        if self.window.has_enough(slowness_window_size)
            && self.window.slow_ratio(slow_threshold_ms) >= slowness_threshold_ratio
            && !self.in_slow_cooldown()
        {
            self.mark_slow(now);
        }
    }

    /// `ema := (ema*4 + x) / 5`.
    fn update_ema(&self, sample_ms: i64) {
        let mut current = self.ema_latency_ms.load(Ordering::Acquire);
        loop {
            let updated = (current * 4 + sample_ms) / 5;
            match self.ema_latency_ms.compare_exchange_weak(
                current,
                updated,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }

    /// Transition `healthy` to `value`. Increments `consecutiveFailures`
    /// whenever `value` is false (on true→false or on a reassertion of
    /// false), resets it on false→true.
    pub fn set_healthy(&self, value: bool) {
        let previous = self.healthy.swap(value, Ordering::AcqRel);
        if value {
            if !previous {
                self.consecutive_failures.store(0, Ordering::Release);
            }
        } else {
            self.consecutive_failures.fetch_add(1, Ordering::AcqRel);
        }
    }

    pub fn touch_health_check(&self) {
        *self.last_health_check_at.lock().unwrap() = Some(Instant::now());
    }

    /// Apply a health-probe outcome under the monitor's cooldown-dominance
    /// policy (SPEC_FULL §4.E step 3).
    pub fn apply_health_probe(&self, probe_healthy: bool, cooldown: Duration) {
        if self.still_in_slow_cooldown(cooldown) {
            self.set_healthy(false);
            self.touch_health_check();
            return;
        }
        if self.in_slow_cooldown() {
            self.clear_slow_cooldown();
        }
        self.set_healthy(probe_healthy);
        self.touch_health_check();
    }
}

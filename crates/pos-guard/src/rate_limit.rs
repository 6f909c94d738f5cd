//! Fixed-window request limiting and progressive slow-down.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::config::{RateLimitConfig, SlowDownConfig};

/// Outcome of recording one request against a limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    /// Whether the request is within the limit.
    pub allowed: bool,
    /// Configured cap per window.
    pub limit: u32,
    /// Requests seen in the current window, this one included.
    pub hits: u32,
    /// Requests left in the current window.
    pub remaining: u32,
    /// Time until the current window resets.
    pub reset_after: Duration,
}

/// Request counter for one identity.
#[derive(Debug)]
struct FixedWindow {
    hits: u32,
    started: Instant,
}

impl FixedWindow {
    fn new(now: Instant) -> Self {
        Self { hits: 0, started: now }
    }

    fn is_expired(&self, now: Instant, window: Duration) -> bool {
        now.saturating_duration_since(self.started) >= window
    }
}

/// Per-identity request limiter using fixed windows.
///
/// Each identity's window starts at its first request and resets once the
/// window length has elapsed. Every request is counted, including the
/// ones that get rejected.
#[derive(Debug)]
pub struct FixedWindowLimiter {
    max_requests: u32,
    window: Duration,
    enabled: bool,
    windows: RwLock<HashMap<String, FixedWindow>>,
    last_sweep: Mutex<Instant>,
}

impl FixedWindowLimiter {
    /// Create a limiter allowing `max_requests` per `window`.
    #[must_use]
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            enabled: true,
            windows: RwLock::new(HashMap::new()),
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    /// Create from configuration.
    #[must_use]
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self {
            enabled: config.enabled,
            ..Self::new(config.max_requests, config.window)
        }
    }

    /// Record a request and decide whether it is within the limit.
    #[must_use]
    pub fn hit(&self, identity: &str) -> RateDecision {
        if !self.enabled {
            return RateDecision {
                allowed: true,
                limit: self.max_requests,
                hits: 0,
                remaining: self.max_requests,
                reset_after: Duration::ZERO,
            };
        }

        let now = Instant::now();
        self.maybe_sweep(now);

        let mut windows = self.windows.write();
        let window = windows
            .entry(identity.to_string())
            .or_insert_with(|| FixedWindow::new(now));

        if window.is_expired(now, self.window) {
            *window = FixedWindow::new(now);
        }

        window.hits = window.hits.saturating_add(1);
        let elapsed = now.saturating_duration_since(window.started);

        RateDecision {
            allowed: window.hits <= self.max_requests,
            limit: self.max_requests,
            hits: window.hits,
            remaining: self.max_requests.saturating_sub(window.hits),
            reset_after: self.window.saturating_sub(elapsed),
        }
    }

    /// Requests recorded for an identity in its current window.
    #[must_use]
    pub fn current_hits(&self, identity: &str) -> u32 {
        let now = Instant::now();
        self.windows
            .read()
            .get(identity)
            .filter(|w| !w.is_expired(now, self.window))
            .map_or(0, |w| w.hits)
    }

    /// Time until the identity's window resets (zero when untracked).
    #[must_use]
    pub fn time_until_reset(&self, identity: &str) -> Duration {
        let now = Instant::now();
        self.windows.read().get(identity).map_or(Duration::ZERO, |w| {
            self.window
                .saturating_sub(now.saturating_duration_since(w.started))
        })
    }

    /// Forget an identity's counter.
    pub fn reset(&self, identity: &str) {
        self.windows.write().remove(identity);
    }

    /// Forget every counter.
    pub fn clear(&self) {
        self.windows.write().clear();
    }

    /// Number of tracked identities.
    #[must_use]
    pub fn tracked_count(&self) -> usize {
        self.windows.read().len()
    }

    /// Configured cap per window.
    #[must_use]
    pub const fn max_requests(&self) -> u32 {
        self.max_requests
    }

    /// Window length.
    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }

    /// Whether limiting is enabled.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Drop expired windows, at most once per window length.
    fn maybe_sweep(&self, now: Instant) {
        {
            let mut last = self.last_sweep.lock();
            if now.saturating_duration_since(*last) < self.window {
                return;
            }
            *last = now;
        }

        let mut windows = self.windows.write();
        let before = windows.len();
        windows.retain(|_, w| !w.is_expired(now, self.window));
        let removed = before.saturating_sub(windows.len());
        if removed > 0 {
            debug!(removed, "Swept expired rate-limit windows");
        }
    }
}

/// Progressive delay for identities that exceed a soft request threshold.
///
/// Within one window the first `delay_after` requests pass untouched; the
/// n-th request after that waits `n * delay_step`, never more than
/// `max_delay`.
#[derive(Debug)]
pub struct SlowDown {
    counter: FixedWindowLimiter,
    delay_after: u32,
    delay_step: Duration,
    max_delay: Duration,
    enabled: bool,
}

impl SlowDown {
    /// Create from configuration.
    #[must_use]
    pub fn from_config(config: &SlowDownConfig) -> Self {
        Self {
            counter: FixedWindowLimiter::new(config.delay_after, config.window),
            delay_after: config.delay_after,
            delay_step: config.delay_step,
            max_delay: config.max_delay,
            enabled: config.enabled,
        }
    }

    /// Record a request and return how long it should be held back.
    #[must_use]
    pub fn delay_for(&self, identity: &str) -> Duration {
        if !self.enabled {
            return Duration::ZERO;
        }
        let hits = self.counter.hit(identity).hits;
        self.delay_for_hits(hits)
    }

    /// Delay for the request with the given position in its window.
    #[must_use]
    pub fn delay_for_hits(&self, hits: u32) -> Duration {
        if hits <= self.delay_after {
            return Duration::ZERO;
        }
        self.delay_step
            .saturating_mul(hits - self.delay_after)
            .min(self.max_delay)
    }

    /// Requests recorded for an identity in its current window.
    #[must_use]
    pub fn current_hits(&self, identity: &str) -> u32 {
        self.counter.current_hits(identity)
    }

    /// Whether slow-down is enabled.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }
}

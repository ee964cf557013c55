/*
 * Copyright (c) 2024. Govcraft
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */

//! Sliding-window restart budget with exponential backoff.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Restart budget of one instance.
///
/// Used as the `[restart]` section of the runtime configuration and as the optional
/// `[restart.limits]` table of a descriptor.
///
/// With the defaults, at most 5 restarts are allowed per 60 seconds and the delays
/// grow 100ms, 200ms, 400ms... up to 30s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestartLimiterConfig {
    /// When false, restarts are never refused and never delayed.
    pub enabled: bool,
    /// Restarts allowed within `window_secs`.
    pub max_restarts: u32,
    /// Length of the sliding window.
    pub window_secs: u64,
    /// Delay before the first restart in a streak.
    pub initial_backoff_ms: u64,
    /// Ceiling for the delay.
    pub max_backoff_ms: u64,
    /// Growth factor between consecutive restarts.
    pub backoff_multiplier: f64,
}

impl Default for RestartLimiterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_restarts: 5,
            window_secs: 60,
            initial_backoff_ms: 100,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RestartLimiterConfig {
    /// A configuration that allows every restart immediately.
    #[must_use]
    pub const fn unlimited() -> Self {
        Self {
            enabled: false,
            max_restarts: 0,
            window_secs: 0,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
            backoff_multiplier: 1.0,
        }
    }

    /// The sliding window as a duration.
    #[must_use]
    pub const fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Snapshot of a limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartStats {
    /// Restarts counted in the current window.
    pub restarts_in_window: usize,
    /// Restarts since the last [`RestartLimiter::reset_consecutive`].
    pub consecutive_restarts: u32,
    /// Configured budget.
    pub max_restarts: u32,
}

/// Tracks restarts of one instance.
#[derive(Debug)]
pub struct RestartLimiter {
    config: RestartLimiterConfig,
    history: Vec<Instant>,
    consecutive: u32,
}

impl RestartLimiter {
    /// A limiter with an empty history.
    #[must_use]
    pub const fn new(config: RestartLimiterConfig) -> Self {
        Self {
            config,
            history: Vec::new(),
            consecutive: 0,
        }
    }

    /// Whether another restart fits in the budget.
    pub fn can_restart(&mut self) -> bool {
        if !self.config.enabled {
            return true;
        }
        self.forget_expired();
        self.history.len() < self.config.max_restarts as usize
    }

    /// Counts a restart and returns how long to wait before performing it.
    pub fn record_restart(&mut self) -> Duration {
        let delay = self.peek_backoff();
        if self.config.enabled {
            self.history.push(Instant::now());
        }
        self.consecutive = self.consecutive.saturating_add(1);
        delay
    }

    /// The delay the next [`record_restart`](Self::record_restart) would return.
    #[must_use]
    pub fn peek_backoff(&self) -> Duration {
        if !self.config.enabled {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(self.consecutive).unwrap_or(i32::MAX);
        #[allow(clippy::cast_precision_loss)]
        let uncapped = self.config.initial_backoff_ms as f64 * self.config.backoff_multiplier.powi(exponent);
        #[allow(
            clippy::cast_sign_loss,
            clippy::cast_possible_truncation,
            clippy::cast_precision_loss
        )]
        let millis = uncapped.min(self.config.max_backoff_ms as f64).max(0.0) as u64;
        Duration::from_millis(millis)
    }

    /// Starts a new backoff streak; the window is untouched.
    pub fn reset_consecutive(&mut self) {
        self.consecutive = 0;
    }

    /// Restarts counted in the current window.
    #[must_use]
    pub fn restarts_in_window(&self) -> usize {
        self.history.len()
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> RestartStats {
        RestartStats {
            restarts_in_window: self.history.len(),
            consecutive_restarts: self.consecutive,
            max_restarts: self.config.max_restarts,
        }
    }

    fn forget_expired(&mut self) {
        let window = self.config.window();
        self.history.retain(|at| at.elapsed() < window);
    }
}

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

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::module::RestartLimiterConfig;
use crate::routing::BackpressurePolicy;

/// Configuration for the Armature runtime.
///
/// Loaded from TOML files in XDG-compliant directories. Every section is optional in
/// the file; missing values fall back to [`Default`].
///
/// ```toml
/// [timeouts]
/// stop_grace_ms = 2000
///
/// [routing]
/// default_backpressure = "drop_oldest"
///
/// [supervision]
/// warn_threshold = 3
/// warn_window_ms = 10000
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ArmatureConfig {
    /// Timeout configuration
    pub timeouts: TimeoutConfig,
    /// Queue and channel capacities
    pub limits: LimitsConfig,
    /// Delivery defaults
    pub routing: RoutingConfig,
    /// Fault monitor thresholds
    pub supervision: SupervisionConfig,
    /// Default restart limiter for modules that do not declare one
    pub restart: RestartLimiterConfig,
    /// Tracing and logging configuration
    pub tracing: TracingConfig,
    /// Path configuration
    pub paths: PathsConfig,
}

/// Timeout-related configuration values, all in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// How long a stopping module may take to honor cancellation before it is aborted
    pub stop_grace_ms: u64,
    /// Upper bound for stopping every instance during runtime shutdown
    pub system_shutdown_ms: u64,
    /// Default bounded wait for `BlockProducer` subscribers
    pub block_producer_timeout_ms: u64,
}

/// Capacity configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Queue capacity for subscribers that do not declare one
    pub default_queue_capacity: usize,
    /// Queue capacity of the fault monitor's health subscription
    pub health_queue_capacity: usize,
    /// Capacity of lifecycle and fatal-condition broadcast channels
    pub event_broadcast_capacity: usize,
}

/// Delivery defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Backpressure policy for subscribers that do not declare one
    pub default_backpressure: BackpressureKind,
}

/// Serializable form of a backpressure policy; the `BlockProducer` timeout is taken
/// from the declaring document or from [`TimeoutConfig::block_producer_timeout_ms`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressureKind {
    /// Wait for space, up to a timeout
    BlockProducer,
    /// Evict the oldest queued message
    #[default]
    DropOldest,
    /// Discard the incoming message
    DropNewest,
}

impl BackpressureKind {
    /// Resolves the kind into a concrete policy with the given blocking timeout.
    #[must_use]
    pub const fn with_timeout(self, timeout: Duration) -> BackpressurePolicy {
        match self {
            Self::BlockProducer => BackpressurePolicy::BlockProducer { timeout },
            Self::DropOldest => BackpressurePolicy::DropOldest,
            Self::DropNewest => BackpressurePolicy::DropNewest,
        }
    }
}

/// Fault monitor thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisionConfig {
    /// Consecutive `Warn` signals that degrade an instance
    pub warn_threshold: usize,
    /// Window in which those warnings must fall, in milliseconds
    pub warn_window_ms: u64,
    /// Longest an instance may stay `Degraded` before a restart is requested
    pub degraded_ceiling_ms: u64,
    /// Fraction of a channel's subscribers that must be `Failed` to mark it at risk
    pub at_risk_fraction: f64,
    /// Smallest subscriber population for which the at-risk rule applies
    pub at_risk_min_subscribers: usize,
    /// How long a channel may stay at risk before it becomes a fatal condition
    pub at_risk_ceiling_ms: u64,
    /// Interval of the monitor's housekeeping tick
    pub tick_interval_ms: u64,
    /// Whether queue drops observed at a tick count as a `Warn` for the subscriber
    pub drops_as_warnings: bool,
}

/// Tracing and logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TracingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,
    /// Write logs to a rolling file under [`PathsConfig::log_directory`]
    pub log_to_file: bool,
    /// File name prefix of the rolling log
    pub log_file_prefix: String,
}

/// Path configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory for log files
    pub log_directory: String,
    /// Directory scanned for module descriptors at startup
    pub descriptor_directory: String,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            stop_grace_ms: 2_000,
            system_shutdown_ms: 30_000,
            block_producer_timeout_ms: 250,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            default_queue_capacity: 64,
            health_queue_capacity: 1_024,
            event_broadcast_capacity: 256,
        }
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            default_backpressure: BackpressureKind::DropOldest,
        }
    }
}

impl Default for SupervisionConfig {
    fn default() -> Self {
        Self {
            warn_threshold: 3,
            warn_window_ms: 10_000,
            degraded_ceiling_ms: 30_000,
            at_risk_fraction: 0.5,
            at_risk_min_subscribers: 2,
            at_risk_ceiling_ms: 60_000,
            tick_interval_ms: 250,
            drops_as_warnings: true,
        }
    }
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_to_file: false,
            log_file_prefix: "armature.log".to_string(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            log_directory: "~/.local/share/armature/logs".to_string(),
            descriptor_directory: "~/.config/armature/modules".to_string(),
        }
    }
}

impl TimeoutConfig {
    /// Default stop grace period.
    #[must_use]
    pub const fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    /// Runtime shutdown bound.
    #[must_use]
    pub const fn system_shutdown(&self) -> Duration {
        Duration::from_millis(self.system_shutdown_ms)
    }

    /// Default `BlockProducer` timeout.
    #[must_use]
    pub const fn block_producer_timeout(&self) -> Duration {
        Duration::from_millis(self.block_producer_timeout_ms)
    }
}

impl SupervisionConfig {
    /// Warning window as a duration.
    #[must_use]
    pub const fn warn_window(&self) -> Duration {
        Duration::from_millis(self.warn_window_ms)
    }

    /// Degraded ceiling as a duration.
    #[must_use]
    pub const fn degraded_ceiling(&self) -> Duration {
        Duration::from_millis(self.degraded_ceiling_ms)
    }

    /// At-risk ceiling as a duration.
    #[must_use]
    pub const fn at_risk_ceiling(&self) -> Duration {
        Duration::from_millis(self.at_risk_ceiling_ms)
    }

    /// Housekeeping tick interval; never zero.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

impl ArmatureConfig {
    /// The default backpressure policy with its blocking timeout resolved.
    #[must_use]
    pub const fn default_backpressure(&self) -> BackpressurePolicy {
        self.routing
            .default_backpressure
            .with_timeout(self.timeouts.block_producer_timeout())
    }

    /// Parses a configuration document.
    ///
    /// # Errors
    ///
    /// Returns the TOML error if the document is malformed.
    pub fn from_toml_str(document: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(document)
    }

    /// Reads and parses a configuration file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or parsed.
    pub fn load_from_path(path: &Path) -> anyhow::Result<Self> {
        let document = std::fs::read_to_string(path)?;
        Ok(Self::from_toml_str(&document)?)
    }

    /// Load configuration from XDG-compliant locations.
    ///
    /// Looks for `armature/config.toml` under `$XDG_CONFIG_HOME` (falling back to
    /// `~/.config`). A missing file yields the defaults; a malformed file is logged
    /// and the defaults are used.
    pub fn load() -> Self {
        let xdg_dirs = match xdg::BaseDirectories::with_prefix("armature") {
            Ok(dirs) => dirs,
            Err(e) => {
                error!("Failed to initialize XDG directories: {}", e);
                return Self::default();
            }
        };

        let Some(path) = xdg_dirs.find_config_file("config.toml") else {
            info!("No configuration file found, using defaults");
            return Self::default();
        };

        info!("Loading configuration from: {}", path.display());
        match Self::load_from_path(&path) {
            Ok(config) => {
                info!("Successfully loaded configuration");
                config
            }
            Err(e) => {
                error!("Failed to load configuration file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_document_keeps_defaults_for_missing_values() {
        let config = ArmatureConfig::from_toml_str(
            r#"
            [timeouts]
            stop_grace_ms = 500

            [supervision]
            warn_threshold = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.timeouts.stop_grace(), Duration::from_millis(500));
        assert_eq!(config.timeouts.block_producer_timeout_ms, 250);
        assert_eq!(config.supervision.warn_threshold, 5);
        assert_eq!(config.supervision.warn_window_ms, 10_000);
        assert_eq!(config.limits.default_queue_capacity, 64);
    }

    #[test]
    fn default_backpressure_is_drop_oldest() {
        let config = ArmatureConfig::default();
        assert_eq!(config.default_backpressure(), BackpressurePolicy::DropOldest);
    }

    #[test]
    fn block_producer_default_takes_configured_timeout() {
        let config = ArmatureConfig::from_toml_str(
            r#"
            [routing]
            default_backpressure = "block_producer"

            [timeouts]
            block_producer_timeout_ms = 40
            "#,
        )
        .unwrap();

        assert_eq!(
            config.default_backpressure(),
            BackpressurePolicy::BlockProducer {
                timeout: Duration::from_millis(40)
            }
        );
    }

    #[test]
    fn restart_section_overrides_limiter() {
        let config = ArmatureConfig::from_toml_str(
            r#"
            [restart]
            max_restarts = 2
            max_backoff_ms = 800
            "#,
        )
        .unwrap();
        assert_eq!(config.restart.max_restarts, 2);
        assert_eq!(config.restart.max_backoff_ms, 800);
        assert_eq!(config.restart.initial_backoff_ms, 100);
    }
}

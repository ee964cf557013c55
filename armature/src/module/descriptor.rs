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

//! Module descriptors: the static declaration of a module's identity, channels,
//! restart behaviour and resources.
//!
//! ```toml
//! name = "lidar-driver"
//! version = "1.2.0"
//!
//! [[outputs]]
//! channel = "lidar/scan"
//! schema = "scan.v1"
//!
//! [[inputs]]
//! channel = "lidar/control"
//! schema = "lidar.control@1.0.0"
//! capacity = 16
//! backpressure = "block_producer"
//! block_timeout_ms = 100
//!
//! [restart]
//! policy = "transient"
//!
//! [restart.limits]
//! max_restarts = 3
//!
//! [resources]
//! stop_grace_ms = 1000
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::common::config::{ArmatureConfig, BackpressureKind};
use crate::common::{is_valid_channel_name, ArmatureError, ArmatureResult, ChannelName};
use crate::message::{SchemaId, SchemaRegistry, HEALTH_CHANNEL};
use crate::module::{RestartLimiterConfig, RestartPolicy};
use crate::routing::SubscriptionOptions;

/// A declared input channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputSpec {
    /// Channel to subscribe to.
    pub channel: ChannelName,
    /// Expected schema.
    pub schema: SchemaId,
    /// Queue capacity; the configured default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<usize>,
    /// Backpressure policy; the configured default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backpressure: Option<BackpressureKind>,
    /// `block_producer` wait bound; the configured default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_timeout_ms: Option<u64>,
}

/// A declared output channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputSpec {
    /// Channel to publish on.
    pub channel: ChannelName,
    /// Schema of published messages.
    pub schema: SchemaId,
}

/// The `[restart]` table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RestartSpec {
    /// When the instance is restarted.
    pub policy: RestartPolicy,
    /// Restart budget; the configured default when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limits: Option<RestartLimiterConfig>,
}

/// The `[resources]` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResourceSpec {
    /// Grace period between cancellation and abort.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_grace_ms: Option<u64>,
    /// Upper bound for every input's queue capacity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_queue_capacity: Option<usize>,
    /// Advisory memory requirement, reported but not enforced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<u64>,
}

/// Static declaration of a module. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleDescriptor {
    /// Module name; also the key of its registered factory.
    pub name: String,
    /// Module version.
    pub version: Version,
    /// Channels the module subscribes to.
    #[serde(default)]
    pub inputs: Vec<InputSpec>,
    /// Channels the module publishes on.
    #[serde(default)]
    pub outputs: Vec<OutputSpec>,
    /// Restart behaviour.
    #[serde(default)]
    pub restart: RestartSpec,
    /// Resource requirements.
    #[serde(default)]
    pub resources: ResourceSpec,
}

fn invalid(name: &str, reason: impl std::fmt::Display) -> ArmatureError {
    ArmatureError::InvalidDescriptor(format!("{name}: {reason}"))
}

impl ModuleDescriptor {
    /// A descriptor with no channels and default policies.
    #[must_use]
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
            inputs: Vec::new(),
            outputs: Vec::new(),
            restart: RestartSpec::default(),
            resources: ResourceSpec::default(),
        }
    }

    /// Adds an input with default queue options.
    #[must_use]
    pub fn with_input(mut self, channel: &str, schema: SchemaId) -> Self {
        self.inputs.push(InputSpec {
            channel: channel.to_string(),
            schema,
            capacity: None,
            backpressure: None,
            block_timeout_ms: None,
        });
        self
    }

    /// Adds an input with explicit queue options.
    #[must_use]
    pub fn with_input_options(
        mut self,
        channel: &str,
        schema: SchemaId,
        capacity: usize,
        backpressure: BackpressureKind,
        block_timeout_ms: Option<u64>,
    ) -> Self {
        self.inputs.push(InputSpec {
            channel: channel.to_string(),
            schema,
            capacity: Some(capacity),
            backpressure: Some(backpressure),
            block_timeout_ms,
        });
        self
    }

    /// Adds an output.
    #[must_use]
    pub fn with_output(mut self, channel: &str, schema: SchemaId) -> Self {
        self.outputs.push(OutputSpec {
            channel: channel.to_string(),
            schema,
        });
        self
    }

    /// Sets the restart policy.
    #[must_use]
    pub fn with_restart_policy(mut self, policy: RestartPolicy) -> Self {
        self.restart.policy = policy;
        self
    }

    /// Sets the restart budget.
    #[must_use]
    pub fn with_restart_limits(mut self, limits: RestartLimiterConfig) -> Self {
        self.restart.limits = Some(limits);
        self
    }

    /// Sets the stop grace period.
    #[must_use]
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.resources.stop_grace_ms = Some(u64::try_from(grace.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Parses and structurally checks a TOML descriptor.
    ///
    /// # Errors
    ///
    /// [`ArmatureError::InvalidDescriptor`] for malformed documents or declarations.
    pub fn from_toml_str(document: &str) -> ArmatureResult<Self> {
        let descriptor: Self = toml::from_str(document)
            .map_err(|e| ArmatureError::InvalidDescriptor(e.to_string()))?;
        descriptor.check_structure()?;
        Ok(descriptor)
    }

    /// Reads and parses a TOML descriptor file.
    ///
    /// # Errors
    ///
    /// [`ArmatureError::InvalidDescriptor`] if the file is unreadable or malformed.
    pub fn from_path(path: &Path) -> ArmatureResult<Self> {
        let document = std::fs::read_to_string(path).map_err(|e| {
            ArmatureError::InvalidDescriptor(format!("{}: {e}", path.display()))
        })?;
        Self::from_toml_str(&document)
    }

    /// Checks the declarations that do not depend on the schema registry.
    ///
    /// # Errors
    ///
    /// [`ArmatureError::InvalidDescriptor`] describing the first problem.
    pub fn check_structure(&self) -> ArmatureResult<()> {
        if self.name.trim().is_empty() {
            return Err(ArmatureError::InvalidDescriptor(
                "module name must not be empty".to_string(),
            ));
        }

        let mut seen_inputs = HashSet::new();
        for input in &self.inputs {
            self.check_channel(&input.channel)?;
            if !seen_inputs.insert(input.channel.as_str()) {
                return Err(invalid(&self.name, format!("input '{}' declared twice", input.channel)));
            }
            if let (Some(capacity), Some(max)) = (input.capacity, self.resources.max_queue_capacity) {
                if capacity > max {
                    return Err(invalid(
                        &self.name,
                        format!("input '{}' capacity {capacity} exceeds {max}", input.channel),
                    ));
                }
            }
            if input.block_timeout_ms == Some(0) {
                return Err(invalid(
                    &self.name,
                    format!("input '{}' has a zero block_timeout_ms", input.channel),
                ));
            }
            if input.capacity == Some(0) {
                return Err(invalid(
                    &self.name,
                    format!("input '{}' has a zero capacity", input.channel),
                ));
            }
        }

        let mut seen_outputs = HashSet::new();
        for output in &self.outputs {
            self.check_channel(&output.channel)?;
            if !seen_outputs.insert(output.channel.as_str()) {
                return Err(invalid(&self.name, format!("output '{}' declared twice", output.channel)));
            }
        }
        Ok(())
    }

    fn check_channel(&self, channel: &str) -> ArmatureResult<()> {
        if channel == HEALTH_CHANNEL {
            return Err(invalid(&self.name, format!("channel '{channel}' is reserved")));
        }
        if !is_valid_channel_name(channel) {
            return Err(invalid(&self.name, format!("invalid channel name '{channel}'")));
        }
        Ok(())
    }

    /// Full validation: structure plus every referenced schema being registered.
    ///
    /// # Errors
    ///
    /// [`ArmatureError::InvalidDescriptor`] describing the first problem.
    pub fn validate(&self, registry: &SchemaRegistry) -> ArmatureResult<()> {
        self.check_structure()?;
        let schemas = self
            .inputs
            .iter()
            .map(|input| &input.schema)
            .chain(self.outputs.iter().map(|output| &output.schema));
        for schema in schemas {
            if !registry.contains(schema) {
                return Err(invalid(&self.name, format!("unknown schema {schema}")));
            }
        }
        Ok(())
    }

    /// Queue options of `input`, falling back to the configuration.
    #[must_use]
    pub fn input_options(&self, input: &InputSpec, config: &ArmatureConfig) -> SubscriptionOptions {
        let timeout = input
            .block_timeout_ms
            .map_or_else(|| config.timeouts.block_producer_timeout(), Duration::from_millis);
        let kind = input
            .backpressure
            .unwrap_or(config.routing.default_backpressure);
        let capacity = input
            .capacity
            .unwrap_or(config.limits.default_queue_capacity);
        let capacity = self
            .resources
            .max_queue_capacity
            .map_or(capacity, |max| capacity.min(max));
        SubscriptionOptions::new(capacity, kind.with_timeout(timeout))
    }

    /// Stop grace period, falling back to `default`.
    #[must_use]
    pub fn stop_grace(&self, default: Duration) -> Duration {
        self.resources
            .stop_grace_ms
            .map_or(default, Duration::from_millis)
    }

    /// Restart budget, falling back to `default`.
    #[must_use]
    pub fn restart_limits(&self, default: &RestartLimiterConfig) -> RestartLimiterConfig {
        self.restart.limits.clone().unwrap_or_else(|| default.clone())
    }

    /// Names of the declared input channels.
    pub fn input_channels(&self) -> impl Iterator<Item = &str> {
        self.inputs.iter().map(|input| input.channel.as_str())
    }
}

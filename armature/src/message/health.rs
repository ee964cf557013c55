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

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::common::InstanceId;
use crate::message::{EncodingSpec, FieldKind, SchemaId};
use crate::traits::ArmatureMessage;

/// Reserved channel carrying [`HealthSignal`]s to the fault monitor.
pub const HEALTH_CHANNEL: &str = "$health";

/// Name of the health schema.
pub const HEALTH_SCHEMA_NAME: &str = "armature.health";

/// The schema id of health signals, `armature.health@1.0.0`.
#[must_use]
pub fn health_schema_id() -> SchemaId {
    SchemaId::new(HEALTH_SCHEMA_NAME, Version::new(1, 0, 0))
}

/// The encoding of health signals.
#[must_use]
pub fn health_schema_spec() -> EncodingSpec {
    EncodingSpec::json()
        .required("instance", FieldKind::String)
        .required("status", FieldKind::String)
        .required("timestamp_ms", FieldKind::Integer)
        .optional("diagnostic", FieldKind::String)
}

/// Health reported by a module instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Operating normally.
    Ok,
    /// Operating, but something needs attention.
    Warn,
    /// Unable to operate.
    Fail,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Warn => write!(f, "warn"),
            Self::Fail => write!(f, "fail"),
        }
    }
}

/// A single health report. Consumed by the fault monitor and discarded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSignal {
    /// Reporting instance.
    pub instance: InstanceId,
    /// Reported status.
    pub status: HealthStatus,
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    /// Optional free-form diagnostic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

impl ArmatureMessage for HealthSignal {}

impl HealthSignal {
    /// A signal stamped with the current time.
    #[must_use]
    pub fn now(instance: InstanceId, status: HealthStatus, diagnostic: Option<String>) -> Self {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or_default();
        Self {
            instance,
            status,
            timestamp_ms,
            diagnostic,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::SchemaRegistry;

    #[test]
    fn health_signal_passes_its_own_schema() {
        let registry = SchemaRegistry::new();
        registry
            .register(health_schema_id(), health_schema_spec())
            .unwrap();
        let signal = HealthSignal::now(
            InstanceId::from("mod_test"),
            HealthStatus::Warn,
            Some("queue lagging".into()),
        );
        let bytes = registry.encode_typed(&health_schema_id(), &signal).unwrap();
        let decoded: HealthSignal = registry.decode_typed(&health_schema_id(), &bytes).unwrap();
        assert_eq!(decoded, signal);
        assert_eq!(health_schema_id().to_string(), "armature.health@1.0.0");
    }
}

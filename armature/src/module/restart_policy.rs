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

//! Restart policies for module instances.
//!
//! - [`RestartPolicy::Permanent`]: restart after any termination except an operator stop
//! - [`RestartPolicy::Transient`]: restart only after abnormal termination
//! - [`RestartPolicy::Temporary`]: never restart

use serde::{Deserialize, Serialize};

/// Declared in a descriptor's `[restart]` table as `policy = "permanent"` and so on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartPolicy {
    /// The module must always be running.
    #[default]
    Permanent,
    /// The module may finish on its own; only failures are restarted.
    Transient,
    /// The module is run once; failures are recorded, not retried.
    Temporary,
}

/// Why an instance ended, as seen by the fault monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// `run` returned `Ok` without being asked to stop.
    Normal,
    /// `run` returned an error.
    Error(String),
    /// `run` panicked.
    Panic(String),
    /// The instance reported a `Fail` health signal.
    HealthFailure(String),
    /// The instance stayed degraded past the ceiling.
    DegradedTimeout,
    /// An operator or the runtime stopped the instance.
    OperatorStop,
}

impl TerminationReason {
    /// Whether the termination was abnormal.
    #[must_use]
    pub const fn is_abnormal(&self) -> bool {
        !matches!(self, Self::Normal | Self::OperatorStop)
    }
}

impl RestartPolicy {
    /// Whether an instance with this policy is restarted after `reason`.
    #[must_use]
    pub const fn should_restart(&self, reason: &TerminationReason) -> bool {
        if matches!(reason, TerminationReason::OperatorStop) {
            return false;
        }
        match self {
            Self::Permanent => true,
            Self::Transient => reason.is_abnormal(),
            Self::Temporary => false,
        }
    }
}

impl std::fmt::Display for RestartPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Permanent => write!(f, "permanent"),
            Self::Transient => write!(f, "transient"),
            Self::Temporary => write!(f, "temporary"),
        }
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => write!(f, "exited normally"),
            Self::Error(msg) => write!(f, "error: {msg}"),
            Self::Panic(msg) => write!(f, "panic: {msg}"),
            Self::HealthFailure(msg) => write!(f, "health failure: {msg}"),
            Self::DegradedTimeout => write!(f, "degraded too long"),
            Self::OperatorStop => write!(f, "stopped by operator"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_stop_is_never_restarted() {
        for policy in [
            RestartPolicy::Permanent,
            RestartPolicy::Transient,
            RestartPolicy::Temporary,
        ] {
            assert!(!policy.should_restart(&TerminationReason::OperatorStop));
        }
    }

    #[test]
    fn permanent_restarts_normal_exits() {
        assert!(RestartPolicy::Permanent.should_restart(&TerminationReason::Normal));
        assert!(RestartPolicy::Permanent.should_restart(&TerminationReason::DegradedTimeout));
    }

    #[test]
    fn transient_restarts_only_failures() {
        let policy = RestartPolicy::Transient;
        assert!(!policy.should_restart(&TerminationReason::Normal));
        assert!(policy.should_restart(&TerminationReason::Panic("boom".into())));
        assert!(policy.should_restart(&TerminationReason::HealthFailure("lidar offline".into())));
    }

    #[test]
    fn temporary_never_restarts() {
        assert!(!RestartPolicy::Temporary.should_restart(&TerminationReason::Error("x".into())));
    }

    #[test]
    fn policy_parses_from_snake_case() {
        #[derive(Deserialize)]
        struct Holder {
            policy: RestartPolicy,
        }
        let holder: Holder = toml::from_str(r#"policy = "transient""#).unwrap();
        assert_eq!(holder.policy, RestartPolicy::Transient);
    }
}

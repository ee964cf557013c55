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
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// State of a module instance.
///
/// Allowed transitions:
///
/// ```text
/// Starting -> Running | Failed | Stopping
/// Running  -> Degraded | Stopping
/// Degraded -> Running | Failed | Stopping
/// Stopping -> Stopped
/// Stopped  -> Starting
/// Failed   -> Stopping
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    /// Registering channels and spawning the task.
    Starting,
    /// Task running and healthy.
    Running,
    /// Task running but reporting warnings.
    Degraded,
    /// Cancellation requested; waiting for the task to end.
    Stopping,
    /// Task ended and channels released.
    Stopped,
    /// Task ended abnormally or could not start.
    Failed,
}

impl InstanceState {
    /// Whether the state machine allows moving from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        use InstanceState::{Degraded, Failed, Running, Starting, Stopped, Stopping};
        matches!(
            (self, next),
            (Starting, Running | Failed | Stopping)
                | (Running, Degraded | Stopping)
                | (Degraded, Running | Failed | Stopping)
                | (Stopping, Stopped)
                | (Stopped, Starting)
                | (Failed, Stopping)
        )
    }

    /// Whether the instance's task may be executing.
    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Starting | Self::Running | Self::Degraded | Self::Stopping)
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Degraded => "degraded",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One recorded state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTransition {
    /// Previous state; `None` for the initial `Starting`.
    pub from: Option<InstanceState>,
    /// New state.
    pub to: InstanceState,
    /// When the change happened.
    pub at: SystemTime,
}

#[cfg(test)]
mod tests {
    use super::InstanceState::*;

    #[test]
    fn restart_path_goes_through_stopped() {
        assert!(Running.can_transition_to(Stopping));
        assert!(Stopping.can_transition_to(Stopped));
        assert!(Stopped.can_transition_to(Starting));
        assert!(!Running.can_transition_to(Starting));
        assert!(!Running.can_transition_to(Running));
        assert!(!Failed.can_transition_to(Starting));
    }

    #[test]
    fn failure_edges() {
        assert!(Starting.can_transition_to(Failed));
        assert!(Degraded.can_transition_to(Failed));
        assert!(!Running.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Stopping));
        assert!(!Stopped.can_transition_to(Stopping));
        assert!(!Stopped.can_transition_to(Failed));
    }

    #[test]
    fn degraded_round_trip() {
        assert!(Running.can_transition_to(Degraded));
        assert!(Degraded.can_transition_to(Running));
        assert!(Degraded.can_transition_to(Stopping));
    }
}

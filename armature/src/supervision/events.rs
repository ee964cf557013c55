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

use std::time::SystemTime;

use crate::common::{ArmatureError, InstanceId};
use crate::module::{RestartPolicy, TerminationReason};

/// Events the lifecycle manager forwards to the fault monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    /// An instance's task ended without being asked to stop.
    Terminated {
        /// The instance.
        instance: InstanceId,
        /// How it ended.
        reason: TerminationReason,
        /// Its restart policy.
        policy: RestartPolicy,
    },
    /// An instance exhausted its restart budget and is pinned.
    Pinned {
        /// The instance.
        instance: InstanceId,
        /// Restarts counted in the window.
        attempts: usize,
    },
}

/// A condition that needs an operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FatalCondition {
    /// The fatal error; [`ArmatureError::is_fatal`] holds.
    pub error: ArmatureError,
    /// When it was raised.
    pub raised_at: SystemTime,
}

impl FatalCondition {
    /// Stamps a fatal error with the current time.
    #[must_use]
    pub fn now(error: ArmatureError) -> Self {
        Self {
            error,
            raised_at: SystemTime::now(),
        }
    }
}

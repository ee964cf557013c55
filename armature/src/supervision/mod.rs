//! Fault supervision.
//!
//! *   [`FaultMonitor`]: the task that consumes `$health`, drop counters and
//!     [`SupervisorEvent`]s and decides between degrade, recover, restart and fail.
//! *   [`MonitorHandle`]: at-risk channels and fatal conditions for operators.

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

// --- Public Re-exports ---
pub use events::{FatalCondition, SupervisorEvent};
pub use monitor::{FaultMonitor, MonitorHandle};

// --- Submodules ---

/// Defines [`SupervisorEvent`] and [`FatalCondition`].
mod events;
/// Defines [`FaultMonitor`] and [`MonitorHandle`].
mod monitor;
/// Rolling window of health warnings.
mod window;

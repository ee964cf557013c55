//! Module descriptors and the lifecycle of module instances.
//!
//! *   [`ModuleDescriptor`] / [`DescriptorStore`]: static declarations loaded from TOML.
//! *   [`LifecycleManager`]: starts, stops and restarts instances through
//!     [`InstanceState`].
//! *   [`ModuleContext`]: what a running instance sees of the runtime.
//! *   [`RestartPolicy`] / [`RestartLimiter`]: when and how often to restart.

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
pub use context::ModuleContext;
pub use descriptor::{InputSpec, ModuleDescriptor, OutputSpec, ResourceSpec, RestartSpec};
pub use descriptor_store::{DescriptorLoadFailure, DescriptorStore};
pub use lifecycle::{InstanceInfo, LifecycleEvent, LifecycleManager};
pub use restart_limiter::{RestartLimiter, RestartLimiterConfig, RestartStats};
pub use restart_policy::{RestartPolicy, TerminationReason};
pub use state::{InstanceState, StateTransition};

// --- Submodules ---

/// Defines [`ModuleContext`].
mod context;
/// Defines [`ModuleDescriptor`] and its parts.
mod descriptor;
/// Defines [`DescriptorStore`].
mod descriptor_store;
/// Defines [`LifecycleManager`].
mod lifecycle;
/// Defines [`RestartLimiter`].
mod restart_limiter;
/// Defines [`RestartPolicy`] and [`TerminationReason`].
mod restart_policy;
/// Defines [`InstanceState`].
mod state;

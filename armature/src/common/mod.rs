//! Shared types, configuration, logging and the runtime entry points.
//!
//! # Key Re-exported Components:
//!
//! *   [`ArmatureApp`]: launches a system.
//! *   [`Runtime`]: the running system; the administrative surface goes through it.
//! *   [`ArmatureConfig`]: configuration loaded from `config.toml`.
//! *   [`ArmatureError`]: the error taxonomy shared by every component.
//! *   [`InstanceId`] and [`ChannelName`]: identifiers.

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
pub use app::ArmatureApp;
pub use config::{ArmatureConfig, BackpressureKind};
pub use error::{ArmatureError, ArmatureResult};
pub use runtime::Runtime;
pub use types::*;

// --- Submodules ---

/// Defines identifier types.
mod types;

/// Defines [`ArmatureApp`].
mod app;
/// Defines [`ArmatureError`].
mod error;
/// Defines [`Runtime`].
mod runtime;
/// Defines the configuration system.
pub mod config;
/// Defines tracing initialization.
pub mod logging;

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

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Armature
//!
//! A module orchestration and message-routing runtime. Independently developed
//! modules (sensor drivers, perception, planners, comms links) exchange typed,
//! versioned messages over named channels and are supervised as one system.
//!
//! ## Key Concepts
//!
//! - **Schemas (`SchemaRegistry`)**: every payload belongs to a `name@version` schema;
//!   newer versions in the same major line must stay compatible with older ones.
//! - **Channels (`ChannelDirectory`)**: named pipes bound to one schema id for their
//!   whole lifetime, with per-subscriber bounded queues.
//! - **Routing (`Router`, `Publisher`, `Subscription`)**: ordered fan-out of published
//!   messages under a per-subscriber backpressure policy.
//! - **Modules (`Module`, `ModuleDescriptor`, `LifecycleManager`)**: declared in TOML,
//!   created by registered factories, run as their own tokio task.
//! - **Supervision (`FaultMonitor`)**: health signals on `$health`, restart policies,
//!   restart budgets and at-risk channel containment.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use armature::prelude::*;
//!
//! #[armature_message]
//! struct Scan {
//!     ranges: Vec<f64>,
//! }
//!
//! struct Lidar;
//!
//! #[async_trait]
//! impl Module for Lidar {
//!     async fn run(&mut self, ctx: ModuleContext) -> anyhow::Result<()> {
//!         while !ctx.is_cancelled() {
//!             ctx.publish_typed("lidar/scan", &Scan { ranges: vec![1.0] }).await?;
//!         }
//!         Ok(())
//!     }
//! }
//! ```

extern crate self as armature;

#[doc(hidden)]
pub use serde;

/// Shared types, configuration, logging and the runtime entry points.
pub mod common;

/// Message envelopes, schemas and the schema registry.
pub mod message;

/// Module descriptors and instance lifecycle.
pub mod module;

/// The channel directory and the routing engine.
pub mod routing;

/// Fault supervision.
pub mod supervision;

/// Traits at the seams between the runtime and module code.
pub mod traits;

/// A prelude module for conveniently importing the most commonly used items.
///
/// # Re-exports
///
/// ## Macros (from `armature-macro`)
/// *   [`armature_macro::armature_message`]: Attribute macro for defining channel payloads.
/// *   [`armature_macro::armature_main`]: Attribute macro for an async `main`.
///
/// ## External Crates
/// *   [`async_trait::async_trait`](https://docs.rs/async-trait/latest/async_trait/attr.async_trait.html): needed to implement [`Module`](crate::traits::Module).
/// *   [`tokio`](https://docs.rs/tokio): the runtime modules run on.
///
/// ## Core Types
/// *   [`crate::common::ArmatureApp`] and [`crate::common::Runtime`]: launching and operating a system.
/// *   [`crate::common::ArmatureConfig`], [`crate::common::ArmatureError`], [`crate::common::InstanceId`].
/// *   [`crate::message::SchemaId`], [`crate::message::EncodingSpec`], [`crate::message::HealthStatus`].
/// *   [`crate::module::ModuleDescriptor`], [`crate::module::ModuleContext`], [`crate::module::RestartPolicy`].
/// *   [`crate::routing::BackpressurePolicy`], [`crate::routing::Subscription`], [`crate::routing::Publisher`].
/// *   [`crate::traits::Module`] and [`crate::traits::ArmatureMessage`].
pub mod prelude {
    // Macros from armature-macro
    pub use armature_macro::*;

    // External crate re-exports
    pub use async_trait::async_trait;
    pub use tokio;

    // Core types
    pub use crate::common::{
        ArmatureApp, ArmatureConfig, ArmatureError, ArmatureResult, ChannelName, InstanceId,
        Runtime,
    };
    pub use crate::message::{
        EncodingSpec, FieldKind, Format, HealthSignal, HealthStatus, Message, SchemaId,
        SchemaRegistry, HEALTH_CHANNEL,
    };
    pub use crate::module::{
        DescriptorStore, InstanceState, ModuleContext, ModuleDescriptor, RestartLimiterConfig,
        RestartPolicy,
    };
    pub use crate::routing::{BackpressurePolicy, Publisher, Subscription, SubscriptionOptions};
    pub use crate::supervision::FatalCondition;
    pub use crate::traits::{ArmatureMessage, Module, ModuleFactory};
}

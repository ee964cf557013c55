//! Channel directory and the routing and delivery engine.
//!
//! *   [`ChannelDirectory`]: who publishes and subscribes on which channel.
//! *   [`Router`] and [`Publisher`]: fan-out of published messages, preserving each
//!     producer's order per subscriber.
//! *   [`Subscription`]: the bounded receiving queue of one subscriber, governed by a
//!     [`BackpressurePolicy`].

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
pub use directory::{ChannelDirectory, ChannelInfo, ChannelStats, ChannelStatsSnapshot, SubscriberInfo};
pub use queue::{BackpressurePolicy, Subscription, SubscriptionOptions};
pub use router::{PublishReport, Publisher, Router};

// --- Submodules ---

/// Defines [`ChannelDirectory`].
mod directory;
/// Defines subscriber queues and [`Subscription`].
mod queue;
/// Defines [`Router`] and [`Publisher`].
mod router;

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

use std::fmt::Debug;

/// Marker for typed payloads that can be published with
/// [`Publisher::publish_typed`](crate::routing::Publisher::publish_typed) and read with
/// [`Subscription::recv_typed`](crate::routing::Subscription::recv_typed).
///
/// Implemented by the `#[armature_message]` attribute, which also derives the serde
/// traits the conversions need.
pub trait ArmatureMessage: Clone + Debug + Send + Sync + 'static {}

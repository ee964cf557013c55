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

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::common::{ArmatureResult, ChannelName, InstanceId};
use crate::message::{SchemaId, SchemaRegistry};

/// A published message.
///
/// Messages are immutable once built by a [`Publisher`](crate::routing::Publisher) and
/// are shared as `Arc<Message>` by every subscriber queue they are delivered to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    schema: SchemaId,
    channel: ChannelName,
    producer: InstanceId,
    sequence: u64,
    payload: Vec<u8>,
    created_at: SystemTime,
}

impl Message {
    /// Builds a message stamped with the current time.
    #[must_use]
    pub fn new(
        schema: SchemaId,
        channel: ChannelName,
        producer: InstanceId,
        sequence: u64,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            schema,
            channel,
            producer,
            sequence,
            payload,
            created_at: SystemTime::now(),
        }
    }

    /// Schema of the payload.
    #[must_use]
    pub const fn schema(&self) -> &SchemaId {
        &self.schema
    }

    /// Channel the message was published on.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Instance that published the message.
    #[must_use]
    pub const fn producer(&self) -> &InstanceId {
        &self.producer
    }

    /// Per-producer, per-channel sequence number, starting at 1.
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Encoded payload bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// Decodes the payload with the message's schema.
    ///
    /// # Errors
    ///
    /// See [`SchemaRegistry::decode`].
    pub fn decode(&self, registry: &SchemaRegistry) -> ArmatureResult<Value> {
        registry.decode(&self.schema, &self.payload)
    }

    /// Decodes the payload into a concrete type.
    ///
    /// # Errors
    ///
    /// See [`SchemaRegistry::decode_typed`].
    pub fn decode_typed<T: DeserializeOwned>(&self, registry: &SchemaRegistry) -> ArmatureResult<T> {
        registry.decode_typed(&self.schema, &self.payload)
    }
}

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

//! Delivery of published messages to subscriber queues.

use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{trace, warn};

use crate::common::{ArmatureError, ArmatureResult, ChannelName, InstanceId};
use crate::message::{Message, SchemaId, SchemaRegistry};
use crate::routing::directory::ChannelDirectory;
use crate::routing::queue::Offer;
use crate::traits::ArmatureMessage;

type SequenceKey = (ChannelName, InstanceId);

/// Outcome of one [`Publisher::publish`] call.
///
/// Drops and timeouts are reported here and in the channel counters; they are never
/// returned as errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReport {
    /// Sequence number assigned to the message.
    pub sequence: u64,
    /// Queues the message was placed in.
    pub delivered: usize,
    /// Messages lost because of this publish: evicted, rejected or timed out.
    pub dropped: usize,
    /// Subscribers whose `BlockProducer` wait expired.
    pub timed_out: Vec<InstanceId>,
}

impl PublishReport {
    /// The timeouts as [`ArmatureError::DeliveryTimeout`] events.
    #[must_use]
    pub fn timeout_events(&self, channel: &str) -> Vec<ArmatureError> {
        self.timed_out
            .iter()
            .map(|subscriber| ArmatureError::DeliveryTimeout {
                channel: channel.to_string(),
                subscriber: subscriber.clone(),
            })
            .collect()
    }
}

/// Routes messages from publishers to the queues registered in a [`ChannelDirectory`].
///
/// Sequence counters are kept per (channel, producer) for the router's lifetime, so a
/// restarted instance continues where it left off and never reuses a number.
#[derive(Debug)]
pub struct Router {
    registry: Arc<SchemaRegistry>,
    directory: Arc<ChannelDirectory>,
    sequences: DashMap<SequenceKey, Arc<Mutex<u64>>>,
}

impl Router {
    /// Creates a router over a registry and a directory.
    #[must_use]
    pub fn new(registry: Arc<SchemaRegistry>, directory: Arc<ChannelDirectory>) -> Self {
        Self {
            registry,
            directory,
            sequences: DashMap::new(),
        }
    }

    /// A publishing handle for `instance` on `channel`.
    ///
    /// # Errors
    ///
    /// [`ArmatureError::UnknownChannel`] unless `instance` was registered with
    /// [`ChannelDirectory::publish_on`] first.
    pub fn publisher(&self, channel: &str, instance: &InstanceId) -> ArmatureResult<Publisher> {
        let entry = self
            .directory
            .entry(channel)
            .filter(|entry| entry.is_publisher(instance))
            .ok_or_else(|| ArmatureError::UnknownChannel(channel.to_string()))?;

        let sequence = Arc::clone(
            self.sequences
                .entry((channel.to_string(), instance.clone()))
                .or_default()
                .value(),
        );

        Ok(Publisher {
            channel: channel.to_string(),
            instance: instance.clone(),
            schema: entry.schema().clone(),
            registry: Arc::clone(&self.registry),
            directory: Arc::clone(&self.directory),
            sequence,
        })
    }

    /// Last sequence number assigned to `instance` on `channel`, if it ever published.
    pub async fn last_sequence(&self, channel: &str, instance: &InstanceId) -> Option<u64> {
        let counter = self
            .sequences
            .get(&(channel.to_string(), instance.clone()))
            .map(|entry| Arc::clone(entry.value()))?;
        let last = *counter.lock().await;
        (last > 0).then_some(last)
    }
}

/// Publishing handle of one instance on one channel.
///
/// Clones share the sequence counter. The counter lock is held while a message is
/// handed to every queue, so each subscriber sees one producer's messages in
/// sequence order.
#[derive(Debug, Clone)]
pub struct Publisher {
    channel: ChannelName,
    instance: InstanceId,
    schema: SchemaId,
    registry: Arc<SchemaRegistry>,
    directory: Arc<ChannelDirectory>,
    sequence: Arc<Mutex<u64>>,
}

impl Publisher {
    /// Channel this handle publishes on.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Schema of the channel.
    #[must_use]
    pub const fn schema(&self) -> &SchemaId {
        &self.schema
    }

    /// Validates and encodes `value`, then delivers it.
    ///
    /// # Errors
    ///
    /// [`ArmatureError::SchemaMismatch`] for a bad value,
    /// [`ArmatureError::UnknownChannel`] once the instance is deregistered.
    pub async fn publish(&self, value: &Value) -> ArmatureResult<PublishReport> {
        let payload = self.registry.encode(&self.schema, value)?;
        self.deliver(payload).await
    }

    /// Encodes a typed message through the same validation as [`publish`](Self::publish).
    ///
    /// # Errors
    ///
    /// As [`publish`](Self::publish).
    pub async fn publish_typed<T>(&self, message: &T) -> ArmatureResult<PublishReport>
    where
        T: ArmatureMessage + Serialize,
    {
        let payload = self.registry.encode_typed(&self.schema, message)?;
        self.deliver(payload).await
    }

    /// Delivers already-encoded bytes after checking they decode with the schema.
    ///
    /// # Errors
    ///
    /// [`ArmatureError::DecodeError`] for bytes that do not match the schema,
    /// [`ArmatureError::UnknownChannel`] once the instance is deregistered.
    pub async fn publish_encoded(&self, payload: Vec<u8>) -> ArmatureResult<PublishReport> {
        self.registry.decode(&self.schema, &payload)?;
        self.deliver(payload).await
    }

    async fn deliver(&self, payload: Vec<u8>) -> ArmatureResult<PublishReport> {
        let mut last = self.sequence.lock().await;

        let unknown = || ArmatureError::UnknownChannel(self.channel.clone());
        let entry = self
            .directory
            .entry(&self.channel)
            .filter(|entry| *entry.schema() == self.schema)
            .ok_or_else(unknown)?;
        let targets = entry.delivery_targets(&self.instance).ok_or_else(unknown)?;

        *last += 1;
        let sequence = *last;
        let message = Arc::new(Message::new(
            self.schema.clone(),
            self.channel.clone(),
            self.instance.clone(),
            sequence,
            payload,
        ));

        let offers = join_all(targets.iter().map(|queue| queue.offer(Arc::clone(&message)))).await;

        let mut report = PublishReport {
            sequence,
            delivered: 0,
            dropped: 0,
            timed_out: Vec::new(),
        };
        for (queue, offer) in targets.iter().zip(offers) {
            match offer {
                Offer::Delivered => report.delivered += 1,
                Offer::DeliveredEvicting => {
                    report.delivered += 1;
                    report.dropped += 1;
                }
                Offer::Dropped => report.dropped += 1,
                Offer::TimedOut => {
                    warn!(
                        channel = %self.channel,
                        subscriber = %queue.subscriber(),
                        sequence,
                        "delivery timed out"
                    );
                    report.dropped += 1;
                    report.timed_out.push(queue.subscriber().clone());
                }
                Offer::Closed => {}
            }
        }
        entry
            .stats()
            .record_publish(report.delivered, report.dropped, report.timed_out.len());
        drop(last);

        if report.dropped > 0 {
            warn!(channel = %self.channel, sequence, dropped = report.dropped, "messages dropped");
        }
        trace!(channel = %self.channel, sequence, delivered = report.delivered, "published");
        Ok(report)
    }
}

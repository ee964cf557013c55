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

//! Bounded per-subscriber queues and their backpressure policies.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::trace;

use crate::common::{ArmatureError, ArmatureResult, ChannelName, InstanceId};
use crate::message::{Message, SchemaRegistry};
use crate::traits::ArmatureMessage;

/// Behaviour of a subscriber queue when it is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackpressurePolicy {
    /// The publisher waits for space, at most `timeout`. On expiry the message is
    /// skipped for this subscriber and counted as a timeout.
    BlockProducer {
        /// Upper bound for the wait; must be non-zero.
        timeout: Duration,
    },
    /// The oldest queued message is evicted to make room.
    #[default]
    DropOldest,
    /// The incoming message is discarded.
    DropNewest,
}

/// Capacity and policy of one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionOptions {
    /// Maximum number of queued messages.
    pub capacity: usize,
    /// What to do when the queue is full.
    pub policy: BackpressurePolicy,
}

impl Default for SubscriptionOptions {
    fn default() -> Self {
        Self {
            capacity: 64,
            policy: BackpressurePolicy::DropOldest,
        }
    }
}

impl SubscriptionOptions {
    /// Options with the given capacity and policy.
    #[must_use]
    pub const fn new(capacity: usize, policy: BackpressurePolicy) -> Self {
        Self { capacity, policy }
    }

    /// Rejects a zero capacity and a zero `BlockProducer` timeout.
    ///
    /// # Errors
    ///
    /// [`ArmatureError::InvalidDescriptor`] describing the bad option.
    pub fn validate(&self) -> ArmatureResult<()> {
        if self.capacity == 0 {
            return Err(ArmatureError::InvalidDescriptor(
                "queue capacity must be at least 1".to_string(),
            ));
        }
        if let BackpressurePolicy::BlockProducer { timeout } = self.policy {
            if timeout.is_zero() {
                return Err(ArmatureError::InvalidDescriptor(
                    "block_producer requires a non-zero timeout".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Result of offering one message to one queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Offer {
    /// Enqueued without loss.
    Delivered,
    /// Enqueued after evicting the oldest message.
    DeliveredEvicting,
    /// Discarded because the queue was full.
    Dropped,
    /// The `BlockProducer` wait expired.
    TimedOut,
    /// The queue was closed by deregistration.
    Closed,
}

#[derive(Debug, Default)]
struct QueueState {
    buffer: VecDeque<Arc<Message>>,
    closed: bool,
}

/// The bounded queue between the router and one subscriber.
#[derive(Debug)]
pub(crate) struct SubscriberQueue {
    channel: ChannelName,
    subscriber: InstanceId,
    options: SubscriptionOptions,
    state: Mutex<QueueState>,
    items: Notify,
    space: Notify,
    dropped: AtomicUsize,
    timeouts: AtomicUsize,
}

impl SubscriberQueue {
    pub(crate) fn new(channel: ChannelName, subscriber: InstanceId, options: SubscriptionOptions) -> Self {
        Self {
            channel,
            subscriber,
            options,
            state: Mutex::new(QueueState::default()),
            items: Notify::new(),
            space: Notify::new(),
            dropped: AtomicUsize::new(0),
            timeouts: AtomicUsize::new(0),
        }
    }

    pub(crate) const fn subscriber(&self) -> &InstanceId {
        &self.subscriber
    }

    pub(crate) fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    pub(crate) fn timeouts(&self) -> usize {
        self.timeouts.load(Ordering::Relaxed)
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().buffer.len()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Hands a message to the queue according to its policy.
    pub(crate) async fn offer(&self, message: Arc<Message>) -> Offer {
        match self.options.policy {
            BackpressurePolicy::DropOldest => {
                let evicted = {
                    let mut state = self.state.lock();
                    if state.closed {
                        return Offer::Closed;
                    }
                    let evicted = if state.buffer.len() >= self.options.capacity {
                        state.buffer.pop_front()
                    } else {
                        None
                    };
                    state.buffer.push_back(message);
                    evicted
                };
                self.items.notify_one();
                if let Some(evicted) = evicted {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    trace!(channel = %self.channel, subscriber = %self.subscriber, sequence = evicted.sequence(), "evicted oldest message");
                    Offer::DeliveredEvicting
                } else {
                    Offer::Delivered
                }
            }
            BackpressurePolicy::DropNewest => {
                {
                    let mut state = self.state.lock();
                    if state.closed {
                        return Offer::Closed;
                    }
                    if state.buffer.len() >= self.options.capacity {
                        drop(state);
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        trace!(channel = %self.channel, subscriber = %self.subscriber, sequence = message.sequence(), "dropped newest message");
                        return Offer::Dropped;
                    }
                    state.buffer.push_back(message);
                }
                self.items.notify_one();
                Offer::Delivered
            }
            BackpressurePolicy::BlockProducer { timeout } => {
                let deadline = Instant::now() + timeout;
                loop {
                    let space = self.space.notified();
                    tokio::pin!(space);
                    space.as_mut().enable();
                    {
                        let mut state = self.state.lock();
                        if state.closed {
                            return Offer::Closed;
                        }
                        if state.buffer.len() < self.options.capacity {
                            state.buffer.push_back(message);
                            drop(state);
                            self.items.notify_one();
                            return Offer::Delivered;
                        }
                    }
                    if tokio::time::timeout_at(deadline, space).await.is_err() {
                        self.timeouts.fetch_add(1, Ordering::Relaxed);
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        return Offer::TimedOut;
                    }
                }
            }
        }
    }

    fn pop(&self) -> Option<Arc<Message>> {
        let message = self.state.lock().buffer.pop_front();
        if message.is_some() {
            self.space.notify_waiters();
        }
        message
    }

    async fn recv(&self) -> Option<Arc<Message>> {
        loop {
            let items = self.items.notified();
            tokio::pin!(items);
            items.as_mut().enable();
            if let Some(message) = self.pop() {
                return Some(message);
            }
            if self.is_closed() {
                return None;
            }
            items.await;
        }
    }

    /// Closes the queue; queued messages stay readable.
    pub(crate) fn close(&self) {
        self.state.lock().closed = true;
        self.items.notify_waiters();
        self.space.notify_waiters();
    }
}

/// The receiving end of one subscriber's queue on one channel.
///
/// Returned by [`ChannelDirectory::subscribe_with`](crate::routing::ChannelDirectory::subscribe_with)
/// and handed to modules through their context. Once the subscriber is deregistered the
/// queue is closed: remaining messages can still be drained, then `recv` yields `None`.
#[derive(Debug, Clone)]
pub struct Subscription {
    queue: Arc<SubscriberQueue>,
}

impl Subscription {
    pub(crate) const fn new(queue: Arc<SubscriberQueue>) -> Self {
        Self { queue }
    }

    /// The channel this subscription reads from.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.queue.channel
    }

    /// The subscribing instance.
    #[must_use]
    pub fn subscriber(&self) -> &InstanceId {
        self.queue.subscriber()
    }

    /// The capacity and policy of the queue.
    #[must_use]
    pub fn options(&self) -> SubscriptionOptions {
        self.queue.options
    }

    /// Waits for the next message; `None` once the queue is closed and drained.
    pub async fn recv(&self) -> Option<Arc<Message>> {
        self.queue.recv().await
    }

    /// Takes the next message if one is queued.
    #[must_use]
    pub fn try_recv(&self) -> Option<Arc<Message>> {
        self.queue.pop()
    }

    /// Waits at most `timeout` for the next message.
    pub async fn recv_timeout(&self, timeout: Duration) -> Option<Arc<Message>> {
        tokio::time::timeout(timeout, self.queue.recv())
            .await
            .ok()
            .flatten()
    }

    /// Waits for the next message and decodes it with its schema.
    pub async fn recv_decoded(&self, registry: &SchemaRegistry) -> Option<ArmatureResult<Value>> {
        let message = self.recv().await?;
        Some(message.decode(registry))
    }

    /// Waits for the next message and decodes it into `T`.
    pub async fn recv_typed<T>(&self, registry: &SchemaRegistry) -> Option<ArmatureResult<T>>
    where
        T: ArmatureMessage + DeserializeOwned,
    {
        let message = self.recv().await?;
        Some(message.decode_typed(registry))
    }

    /// Number of queued messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether no message is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Messages lost by this subscriber, including `BlockProducer` timeouts.
    #[must_use]
    pub fn dropped(&self) -> usize {
        self.queue.dropped()
    }

    /// Whether the queue was closed by deregistration.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::SchemaId;

    fn message(sequence: u64) -> Arc<Message> {
        Arc::new(Message::new(
            "scan@1.0.0".parse::<SchemaId>().unwrap(),
            "lidar/scan".into(),
            InstanceId::from("mod_producer"),
            sequence,
            Vec::new(),
        ))
    }

    fn queue(capacity: usize, policy: BackpressurePolicy) -> Arc<SubscriberQueue> {
        Arc::new(SubscriberQueue::new(
            "lidar/scan".into(),
            InstanceId::from("mod_subscriber"),
            SubscriptionOptions::new(capacity, policy),
        ))
    }

    #[tokio::test]
    async fn drop_oldest_keeps_latest_messages() {
        let queue = queue(10, BackpressurePolicy::DropOldest);
        for sequence in 1..=15 {
            queue.offer(message(sequence)).await;
        }
        let subscription = Subscription::new(queue);
        assert_eq!(subscription.dropped(), 5);
        let seen: Vec<u64> = std::iter::from_fn(|| subscription.try_recv())
            .map(|m| m.sequence())
            .collect();
        assert_eq!(seen, (6..=15).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn drop_newest_keeps_earliest_messages() {
        let queue = queue(2, BackpressurePolicy::DropNewest);
        assert_eq!(queue.offer(message(1)).await, Offer::Delivered);
        assert_eq!(queue.offer(message(2)).await, Offer::Delivered);
        assert_eq!(queue.offer(message(3)).await, Offer::Dropped);
        let subscription = Subscription::new(queue);
        assert_eq!(subscription.try_recv().map(|m| m.sequence()), Some(1));
        assert_eq!(subscription.dropped(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn block_producer_times_out_when_nobody_reads() {
        let queue = queue(1, BackpressurePolicy::BlockProducer {
            timeout: Duration::from_millis(50),
        });
        assert_eq!(queue.offer(message(1)).await, Offer::Delivered);
        assert_eq!(queue.offer(message(2)).await, Offer::TimedOut);
        assert_eq!(queue.timeouts(), 1);
        assert_eq!(queue.dropped(), 1);
    }

    #[tokio::test]
    async fn block_producer_resumes_when_space_frees() {
        let queue = queue(1, BackpressurePolicy::BlockProducer {
            timeout: Duration::from_secs(5),
        });
        queue.offer(message(1)).await;
        let subscription = Subscription::new(queue.clone());
        let reader = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            subscription.recv().await.map(|m| m.sequence())
        });
        assert_eq!(queue.offer(message(2)).await, Offer::Delivered);
        assert_eq!(reader.await.unwrap(), Some(1));
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn closed_queue_drains_then_ends() {
        let queue = queue(4, BackpressurePolicy::DropOldest);
        queue.offer(message(1)).await;
        queue.close();
        assert_eq!(queue.offer(message(2)).await, Offer::Closed);
        let subscription = Subscription::new(queue);
        assert_eq!(subscription.recv().await.map(|m| m.sequence()), Some(1));
        assert!(subscription.recv().await.is_none());
    }

    #[test]
    fn zero_timeout_and_zero_capacity_are_rejected() {
        let zero_timeout = SubscriptionOptions::new(
            4,
            BackpressurePolicy::BlockProducer {
                timeout: Duration::ZERO,
            },
        );
        assert!(zero_timeout.validate().is_err());
        assert!(SubscriptionOptions::new(0, BackpressurePolicy::DropNewest)
            .validate()
            .is_err());
        assert!(SubscriptionOptions::default().validate().is_ok());
    }
}

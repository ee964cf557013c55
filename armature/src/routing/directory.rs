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

//! The channel directory: which instances publish and subscribe where.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, instrument, trace};

use crate::common::{is_valid_channel_name, ArmatureError, ArmatureResult, ChannelName, InstanceId};
use crate::message::{health_schema_id, SchemaId, HEALTH_CHANNEL};
use crate::routing::queue::{SubscriberQueue, Subscription, SubscriptionOptions};

/// Delivery counters of one channel.
#[derive(Debug, Default)]
pub struct ChannelStats {
    published: AtomicUsize,
    delivered: AtomicUsize,
    dropped: AtomicUsize,
    timeouts: AtomicUsize,
}

impl ChannelStats {
    pub(crate) fn record_publish(&self, delivered: usize, dropped: usize, timeouts: usize) {
        self.published.fetch_add(1, Ordering::Relaxed);
        self.delivered.fetch_add(delivered, Ordering::Relaxed);
        self.dropped.fetch_add(dropped, Ordering::Relaxed);
        self.timeouts.fetch_add(timeouts, Ordering::Relaxed);
    }

    /// Point-in-time copy of the counters.
    #[must_use]
    pub fn snapshot(&self) -> ChannelStatsSnapshot {
        ChannelStatsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }
}

/// Copy of a channel's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStatsSnapshot {
    /// Messages published.
    pub published: usize,
    /// Queue insertions, one per subscriber per message.
    pub delivered: usize,
    /// Messages lost to a full queue, including timeouts.
    pub dropped: usize,
    /// `BlockProducer` waits that expired.
    pub timeouts: usize,
}

/// A subscriber as seen through [`ChannelInfo`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberInfo {
    /// The subscribing instance.
    pub instance: InstanceId,
    /// Messages currently queued.
    pub queued: usize,
    /// Messages this subscriber lost.
    pub dropped: usize,
    /// `BlockProducer` waits on this subscriber that expired.
    pub timeouts: usize,
}

/// Snapshot of one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    /// Channel name.
    pub name: ChannelName,
    /// Schema every party uses.
    pub schema: SchemaId,
    /// Publishing instances.
    pub publishers: Vec<InstanceId>,
    /// Subscribing instances.
    pub subscribers: Vec<SubscriberInfo>,
    /// Delivery counters.
    pub stats: ChannelStatsSnapshot,
}

#[derive(Debug, Default)]
struct ChannelState {
    publishers: BTreeSet<InstanceId>,
    subscribers: BTreeMap<InstanceId, Arc<SubscriberQueue>>,
    retired: bool,
}

impl ChannelState {
    fn is_unused(&self) -> bool {
        self.publishers.is_empty() && self.subscribers.is_empty()
    }
}

/// One channel: a fixed schema plus its parties behind a per-channel lock.
#[derive(Debug)]
pub(crate) struct ChannelEntry {
    name: ChannelName,
    schema: SchemaId,
    state: RwLock<ChannelState>,
    stats: ChannelStats,
}

impl ChannelEntry {
    fn new(name: &str, schema: SchemaId) -> Self {
        Self {
            name: name.to_string(),
            schema,
            state: RwLock::new(ChannelState::default()),
            stats: ChannelStats::default(),
        }
    }

    pub(crate) const fn schema(&self) -> &SchemaId {
        &self.schema
    }

    pub(crate) const fn stats(&self) -> &ChannelStats {
        &self.stats
    }

    pub(crate) fn is_publisher(&self, instance: &InstanceId) -> bool {
        let state = self.state.read();
        !state.retired && state.publishers.contains(instance)
    }

    /// Current subscriber queues, or `None` if `instance` no longer publishes here.
    pub(crate) fn delivery_targets(&self, instance: &InstanceId) -> Option<Vec<Arc<SubscriberQueue>>> {
        let state = self.state.read();
        if state.retired || !state.publishers.contains(instance) {
            return None;
        }
        Some(state.subscribers.values().cloned().collect())
    }

    fn info(&self) -> ChannelInfo {
        let state = self.state.read();
        ChannelInfo {
            name: self.name.clone(),
            schema: self.schema.clone(),
            publishers: state.publishers.iter().cloned().collect(),
            subscribers: state
                .subscribers
                .iter()
                .map(|(instance, queue)| SubscriberInfo {
                    instance: instance.clone(),
                    queued: queue.len(),
                    dropped: queue.dropped(),
                    timeouts: queue.timeouts(),
                })
                .collect(),
            stats: self.stats.snapshot(),
        }
    }
}

enum Party {
    Publisher,
    Subscriber(SubscriptionOptions),
}

/// Registry of live channels.
///
/// Lookups go through a [`DashMap`] of channel name to entry; each entry carries its
/// own [`RwLock`], so registration on one channel never blocks readers of another.
/// A channel is created by its first registration and removed when its last party
/// deregisters. Its schema is fixed for its lifetime.
#[derive(Debug, Default)]
pub struct ChannelDirectory {
    channels: DashMap<ChannelName, Arc<ChannelEntry>>,
    memberships: DashMap<InstanceId, BTreeSet<ChannelName>>,
}

impl ChannelDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `instance` as a publisher on `channel`.
    ///
    /// # Errors
    ///
    /// [`ArmatureError::SchemaConflict`] if the channel carries a different schema;
    /// the directory is left unchanged.
    #[instrument(skip(self, schema), fields(schema = %schema))]
    pub fn publish_on(&self, channel: &str, instance: &InstanceId, schema: &SchemaId) -> ArmatureResult<()> {
        if channel == HEALTH_CHANNEL && *schema != health_schema_id() {
            return Err(ArmatureError::SchemaConflict {
                channel: channel.to_string(),
                expected: health_schema_id().to_string(),
                found: schema.to_string(),
            });
        }
        self.join(channel, instance, schema, Party::Publisher)
            .map(|_| ())
    }

    /// Registers `instance` as a subscriber on `channel` with default queue options.
    ///
    /// # Errors
    ///
    /// See [`subscribe_with`](Self::subscribe_with).
    pub fn subscribe_to(&self, channel: &str, instance: &InstanceId, schema: &SchemaId) -> ArmatureResult<Subscription> {
        self.subscribe_with(channel, instance, schema, SubscriptionOptions::default())
    }

    /// Registers `instance` as a subscriber on `channel` and returns its queue.
    ///
    /// Subscribing twice returns the existing queue.
    ///
    /// # Errors
    ///
    /// - [`ArmatureError::ReservedChannel`] for the health channel.
    /// - [`ArmatureError::SchemaConflict`] if the channel carries a different schema.
    /// - [`ArmatureError::InvalidDescriptor`] for invalid options.
    #[instrument(skip(self, schema, options), fields(schema = %schema))]
    pub fn subscribe_with(
        &self,
        channel: &str,
        instance: &InstanceId,
        schema: &SchemaId,
        options: SubscriptionOptions,
    ) -> ArmatureResult<Subscription> {
        if channel == HEALTH_CHANNEL {
            return Err(ArmatureError::ReservedChannel(channel.to_string()));
        }
        self.subscribe_unchecked(channel, instance, schema, options)
    }

    /// Subscription to the health channel; only the fault monitor calls this.
    pub(crate) fn subscribe_health(&self, monitor: &InstanceId, options: SubscriptionOptions) -> ArmatureResult<Subscription> {
        self.subscribe_unchecked(HEALTH_CHANNEL, monitor, &health_schema_id(), options)
    }

    fn subscribe_unchecked(
        &self,
        channel: &str,
        instance: &InstanceId,
        schema: &SchemaId,
        options: SubscriptionOptions,
    ) -> ArmatureResult<Subscription> {
        options.validate()?;
        let queue = self
            .join(channel, instance, schema, Party::Subscriber(options))?
            .ok_or_else(|| ArmatureError::UnknownChannel(channel.to_string()))?;
        Ok(Subscription::new(queue))
    }

    fn join(
        &self,
        channel: &str,
        instance: &InstanceId,
        schema: &SchemaId,
        party: Party,
    ) -> ArmatureResult<Option<Arc<SubscriberQueue>>> {
        if !is_valid_channel_name(channel) {
            return Err(ArmatureError::InvalidDescriptor(format!(
                "invalid channel name '{channel}'"
            )));
        }

        let queue = loop {
            let entry = Arc::clone(
                self.channels
                    .entry(channel.to_string())
                    .or_insert_with(|| Arc::new(ChannelEntry::new(channel, schema.clone())))
                    .value(),
            );

            let mut state = entry.state.write();
            if state.retired {
                // Its last party left; a fresh registration starts a new channel.
                drop(state);
                trace!(channel, "replacing retired channel");
                self.channels
                    .remove_if(channel, |_, current| Arc::ptr_eq(current, &entry));
                std::hint::spin_loop();
                continue;
            }
            if entry.schema != *schema {
                return Err(ArmatureError::SchemaConflict {
                    channel: channel.to_string(),
                    expected: entry.schema.to_string(),
                    found: schema.to_string(),
                });
            }
            match party {
                Party::Publisher => {
                    state.publishers.insert(instance.clone());
                    break None;
                }
                Party::Subscriber(options) => {
                    let queue = state
                        .subscribers
                        .entry(instance.clone())
                        .or_insert_with(|| {
                            Arc::new(SubscriberQueue::new(channel.to_string(), instance.clone(), options))
                        });
                    break Some(Arc::clone(queue));
                }
            }
        };

        self.memberships
            .entry(instance.clone())
            .or_default()
            .insert(channel.to_string());
        debug!(channel, instance = %instance, "registered on channel");
        Ok(queue)
    }

    /// Removes every registration of `instance`, closing its queues and removing
    /// channels left without parties. Deregistering an unknown instance is a no-op.
    #[instrument(skip(self))]
    pub fn deregister(&self, instance: &InstanceId) {
        let Some((_, names)) = self.memberships.remove(instance) else {
            return;
        };

        for name in names {
            let Some(entry) = self.channels.get(&name).map(|entry| Arc::clone(entry.value())) else {
                continue;
            };
            let unused = {
                let mut state = entry.state.write();
                state.publishers.remove(instance);
                if let Some(queue) = state.subscribers.remove(instance) {
                    queue.close();
                }
                if state.is_unused() {
                    state.retired = true;
                }
                state.retired
            };
            if unused {
                self.channels
                    .remove_if(&name, |_, current| Arc::ptr_eq(current, &entry));
                debug!(channel = %name, "removed channel without parties");
            }
        }
    }

    pub(crate) fn entry(&self, channel: &str) -> Option<Arc<ChannelEntry>> {
        self.channels.get(channel).map(|entry| Arc::clone(entry.value()))
    }

    /// Snapshot of one channel.
    #[must_use]
    pub fn channel(&self, name: &str) -> Option<ChannelInfo> {
        self.entry(name).map(|entry| entry.info())
    }

    /// Snapshot of every channel, sorted by name.
    #[must_use]
    pub fn channels(&self) -> Vec<ChannelInfo> {
        let entries: Vec<Arc<ChannelEntry>> = self
            .channels
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let mut infos: Vec<ChannelInfo> = entries.iter().map(|entry| entry.info()).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Channels `instance` is registered on.
    #[must_use]
    pub fn channels_of(&self, instance: &InstanceId) -> Vec<ChannelName> {
        self.memberships
            .get(instance)
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Per-subscriber drop counters of every channel.
    #[must_use]
    pub fn subscriber_drops(&self) -> Vec<(ChannelName, InstanceId, usize)> {
        self.channels()
            .into_iter()
            .flat_map(|info| {
                let name = info.name;
                info.subscribers
                    .into_iter()
                    .map(move |subscriber| (name.clone(), subscriber.instance, subscriber.dropped))
            })
            .collect()
    }

    /// Number of live channels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Whether no channel exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Closes every queue and empties the directory.
    pub fn teardown(&self) {
        let entries: Vec<Arc<ChannelEntry>> = self
            .channels
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for entry in entries {
            let mut state = entry.state.write();
            state.retired = true;
            for queue in state.subscribers.values() {
                queue.close();
            }
        }
        self.channels.clear();
        self.memberships.clear();
        debug!("channel directory torn down");
    }
}

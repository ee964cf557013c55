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

//! The fault monitor.
//!
//! A single task that is the sole subscriber of `$health`. It folds health signals,
//! subscriber drop counters and lifecycle termination events into escalation decisions:
//!
//! - `warn_threshold` consecutive `Warn` signals inside `warn_window` degrade a `Running`
//!   instance; an `Ok` signal brings a `Degraded` instance back to `Running`.
//! - A `Fail` signal, an abnormal termination the restart policy covers, or a `Degraded`
//!   instance outliving `degraded_ceiling` requests a restart (or `fail` for `Temporary`
//!   instances).
//! - A channel whose subscribers are failing together is marked at risk; restarts of its
//!   subscribers are suppressed until an operator clears it, and an at-risk channel that
//!   outlives `at_risk_ceiling` is raised as a fatal [`ArmatureError::ChannelAtRisk`].

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::common::{ArmatureConfig, ArmatureError, ArmatureResult, ChannelName, InstanceId};
use crate::common::config::SupervisionConfig;
use crate::message::{HealthSignal, HealthStatus, Message, SchemaRegistry};
use crate::module::{InstanceState, LifecycleManager, RestartPolicy, TerminationReason};
use crate::routing::{BackpressurePolicy, ChannelDirectory, Subscription, SubscriptionOptions};
use crate::supervision::window::HealthWindow;
use crate::supervision::{FatalCondition, SupervisorEvent};

#[derive(Debug, Clone, Copy)]
struct AtRisk {
    since: Instant,
    escalated: bool,
}

#[derive(Debug)]
struct MonitorShared {
    at_risk: DashMap<ChannelName, AtRisk>,
    fatal: parking_lot::RwLock<Vec<FatalCondition>>,
    fatal_tx: broadcast::Sender<FatalCondition>,
}

impl MonitorShared {
    fn raise(&self, error: ArmatureError) {
        let condition = FatalCondition::now(error);
        error!(error = %condition.error, "fatal condition raised");
        self.fatal.write().push(condition.clone());
        let _ = self.fatal_tx.send(condition);
    }
}

/// Handle to a running fault monitor.
#[derive(Debug)]
pub struct MonitorHandle {
    id: InstanceId,
    shared: Arc<MonitorShared>,
    cancellation_token: CancellationToken,
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl MonitorHandle {
    /// The id the monitor subscribes to `$health` under.
    #[must_use]
    pub const fn monitor_id(&self) -> &InstanceId {
        &self.id
    }

    /// Channels currently marked at risk, sorted.
    #[must_use]
    pub fn at_risk_channels(&self) -> Vec<ChannelName> {
        let mut channels: Vec<ChannelName> = self
            .shared
            .at_risk
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        channels.sort();
        channels
    }

    /// Whether `channel` is marked at risk.
    #[must_use]
    pub fn is_at_risk(&self, channel: &str) -> bool {
        self.shared.at_risk.contains_key(channel)
    }

    /// Lifts the at-risk mark so subscribers of `channel` may be restarted again.
    /// Returns whether the channel was marked.
    pub fn clear_at_risk(&self, channel: &str) -> bool {
        let cleared = self.shared.at_risk.remove(channel).is_some();
        if cleared {
            info!(channel, "at-risk mark cleared by operator");
        }
        cleared
    }

    /// Every fatal condition raised so far, oldest first.
    #[must_use]
    pub fn fatal_conditions(&self) -> Vec<FatalCondition> {
        self.shared.fatal.read().clone()
    }

    /// Receiver of fatal conditions raised from now on.
    #[must_use]
    pub fn subscribe_fatal(&self) -> broadcast::Receiver<FatalCondition> {
        self.shared.fatal_tx.subscribe()
    }

    pub(crate) fn report_fatal(&self, error: ArmatureError) {
        self.shared.raise(error);
    }

    /// Stops the monitor task and releases its `$health` subscription.
    pub async fn shutdown(&self) {
        self.cancellation_token.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "fault monitor task ended abnormally");
            }
        }
    }
}

/// The fault monitor's task state. Created and started with [`FaultMonitor::spawn`].
pub struct FaultMonitor {
    id: InstanceId,
    lifecycle: LifecycleManager,
    directory: Arc<ChannelDirectory>,
    registry: Arc<SchemaRegistry>,
    settings: SupervisionConfig,
    health: Subscription,
    windows: HashMap<InstanceId, HealthWindow>,
    drops: HashMap<(ChannelName, InstanceId), usize>,
    pending: Arc<DashSet<InstanceId>>,
    shared: Arc<MonitorShared>,
}

async fn next_event(events: &mut Option<mpsc::UnboundedReceiver<SupervisorEvent>>) -> Option<SupervisorEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}

impl FaultMonitor {
    /// Subscribes to `$health` and spawns the monitor task.
    ///
    /// # Errors
    ///
    /// Returns the directory's error if the `$health` subscription cannot be made.
    pub fn spawn(
        lifecycle: LifecycleManager,
        directory: Arc<ChannelDirectory>,
        registry: Arc<SchemaRegistry>,
        config: &ArmatureConfig,
    ) -> ArmatureResult<MonitorHandle> {
        let id = InstanceId::generate();
        let options = SubscriptionOptions::new(
            config.limits.health_queue_capacity.max(1),
            BackpressurePolicy::DropOldest,
        );
        let health = directory.subscribe_health(&id, options)?;

        let events = lifecycle.take_supervisor_events();
        if events.is_none() {
            warn!("supervisor events already taken; monitor sees health signals only");
        }

        let (fatal_tx, _) = broadcast::channel(config.limits.event_broadcast_capacity.max(1));
        let shared = Arc::new(MonitorShared {
            at_risk: DashMap::new(),
            fatal: parking_lot::RwLock::new(Vec::new()),
            fatal_tx,
        });
        let cancellation_token = CancellationToken::new();

        let monitor = Self {
            id: id.clone(),
            lifecycle,
            directory,
            registry,
            settings: config.supervision.clone(),
            health,
            windows: HashMap::new(),
            drops: HashMap::new(),
            pending: Arc::new(DashSet::new()),
            shared: Arc::clone(&shared),
        };
        let task = tokio::spawn(monitor.run(cancellation_token.clone(), events));
        info!(monitor = %id, "fault monitor started");

        Ok(MonitorHandle {
            id,
            shared,
            cancellation_token,
            task: parking_lot::Mutex::new(Some(task)),
        })
    }

    async fn run(
        mut self,
        cancellation_token: CancellationToken,
        mut events: Option<mpsc::UnboundedReceiver<SupervisorEvent>>,
    ) {
        let health = self.health.clone();
        let mut ticker = tokio::time::interval(self.settings.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = cancellation_token.cancelled() => break,
                message = health.recv() => match message {
                    Some(message) => self.on_health(&message),
                    None => break,
                },
                event = next_event(&mut events) => match event {
                    Some(event) => self.on_supervisor_event(event),
                    None => events = None,
                },
                _ = ticker.tick() => self.on_tick(),
            }
        }

        self.directory.deregister(&self.id);
        debug!(monitor = %self.id, "fault monitor stopped");
    }

    fn on_health(&mut self, message: &Message) {
        let signal = match message.decode_typed::<HealthSignal>(&self.registry) {
            Ok(signal) => signal,
            Err(e) => {
                warn!(producer = %message.producer(), error = %e, "undecodable health signal");
                return;
            }
        };
        let instance = message.producer().clone();
        if signal.instance != instance {
            warn!(claimed = %signal.instance, producer = %instance, "health signal names another instance; attributing to its producer");
        }
        trace!(%instance, status = %signal.status, "health signal");

        match signal.status {
            HealthStatus::Ok => {
                if let Some(window) = self.windows.get_mut(&instance) {
                    window.reset();
                }
                if self.state_of(&instance) == Some(InstanceState::Degraded) {
                    let lifecycle = self.lifecycle.clone();
                    tokio::spawn(async move {
                        if let Err(e) = lifecycle.recover(&instance).await {
                            debug!(%instance, error = %e, "recover skipped");
                        }
                    });
                }
            }
            HealthStatus::Warn => self.on_warning(&instance),
            HealthStatus::Fail => {
                self.windows.remove(&instance);
                let diagnostic = signal
                    .diagnostic
                    .unwrap_or_else(|| "health check failed".to_string());
                self.request_restart(&instance, TerminationReason::HealthFailure(diagnostic));
            }
        }
    }

    fn on_warning(&mut self, instance: &InstanceId) {
        let window = self.settings.warn_window();
        let count = self
            .windows
            .entry(instance.clone())
            .or_insert_with(|| HealthWindow::new(window))
            .record_warn();
        if count < self.settings.warn_threshold.max(1) {
            return;
        }
        if self.state_of(instance) != Some(InstanceState::Running) {
            return;
        }
        if let Some(window) = self.windows.get_mut(instance) {
            window.reset();
        }

        // The slot lock may be held through a restart's backoff; never wait on it here.
        let lifecycle = self.lifecycle.clone();
        let id = instance.clone();
        tokio::spawn(async move {
            match lifecycle.degrade(&id).await {
                Ok(true) => {}
                Ok(false) => trace!(instance = %id, "degrade skipped; no longer running"),
                Err(e) => debug!(instance = %id, error = %e, "degrade skipped"),
            }
        });
    }

    fn state_of(&self, instance: &InstanceId) -> Option<InstanceState> {
        self.lifecycle.state(instance).ok()
    }

    fn on_supervisor_event(&mut self, event: SupervisorEvent) {
        match event {
            SupervisorEvent::Terminated {
                instance,
                reason,
                policy,
            } => {
                self.windows.remove(&instance);
                if policy.should_restart(&reason) {
                    self.request_restart(&instance, reason);
                } else {
                    debug!(%instance, %reason, %policy, "termination needs no restart");
                }
            }
            SupervisorEvent::Pinned { instance, attempts } => {
                warn!(%instance, attempts, "instance pinned; awaiting operator");
                self.evaluate_at_risk();
            }
        }
    }

    /// Hands a restart (or, for `Temporary` instances and subscribers of at-risk
    /// channels, a fail) to the lifecycle manager without blocking the monitor loop.
    #[instrument(skip(self))]
    fn request_restart(&mut self, instance: &InstanceId, reason: TerminationReason) {
        self.evaluate_at_risk();

        let Some(info) = self.lifecycle.info(instance) else {
            return;
        };
        if info.pinned {
            debug!(%instance, "pinned instance is not restarted");
            return;
        }
        if !self.pending.insert(instance.clone()) {
            trace!(%instance, "restart already pending");
            return;
        }

        let suppressed_by = info
            .descriptor
            .input_channels()
            .find(|channel| self.shared.at_risk.contains_key(*channel))
            .map(str::to_string);
        let temporary = info.descriptor.restart.policy == RestartPolicy::Temporary;

        let lifecycle = self.lifecycle.clone();
        let pending = Arc::clone(&self.pending);
        let id = instance.clone();

        if temporary || suppressed_by.is_some() {
            if let Some(channel) = suppressed_by {
                warn!(%instance, %channel, "restart suppressed; channel at risk");
            }
            tokio::spawn(async move {
                if let Err(e) = lifecycle.fail(&id, &reason).await {
                    warn!(instance = %id, error = %e, "could not fail instance");
                }
                pending.remove(&id);
            });
        } else {
            info!(%instance, %reason, "requesting restart");
            tokio::spawn(async move {
                if let Err(e) = lifecycle.restart(&id).await {
                    warn!(instance = %id, error = %e, "restart failed");
                }
                pending.remove(&id);
            });
        }
    }

    fn on_tick(&mut self) {
        let ceiling = self.settings.degraded_ceiling();
        let overdue: Vec<InstanceId> = self
            .lifecycle
            .instances()
            .into_iter()
            .filter(|info| info.state == InstanceState::Degraded)
            .filter(|info| info.degraded_since.is_some_and(|since| since.elapsed() >= ceiling))
            .map(|info| info.id)
            .collect();
        for instance in overdue {
            warn!(%instance, ?ceiling, "degraded for too long");
            self.request_restart(&instance, TerminationReason::DegradedTimeout);
        }

        if self.settings.drops_as_warnings {
            let mut warned = Vec::new();
            let mut observed = HashMap::new();
            for (channel, subscriber, dropped) in self.directory.subscriber_drops() {
                if subscriber == self.id {
                    continue;
                }
                let previous = self
                    .drops
                    .get(&(channel.clone(), subscriber.clone()))
                    .copied()
                    .unwrap_or(0);
                if dropped > previous {
                    debug!(%channel, %subscriber, dropped, "subscriber dropping messages");
                    warned.push(subscriber.clone());
                }
                observed.insert((channel, subscriber), dropped);
            }
            self.drops = observed;
            for subscriber in warned {
                self.on_warning(&subscriber);
            }
        }

        self.evaluate_at_risk();
        self.escalate_at_risk();
    }

    #[allow(clippy::cast_precision_loss)]
    fn evaluate_at_risk(&self) {
        let mut population: HashMap<ChannelName, (usize, usize)> = HashMap::new();
        for info in self.lifecycle.instances() {
            if info.state == InstanceState::Stopped {
                continue;
            }
            let failed = usize::from(info.state == InstanceState::Failed);
            for channel in info.descriptor.input_channels() {
                let counts = population.entry(channel.to_string()).or_default();
                counts.0 += 1;
                counts.1 += failed;
            }
        }

        for (channel, (total, failed)) in population {
            if total < self.settings.at_risk_min_subscribers.max(1) {
                continue;
            }
            if failed as f64 / total as f64 <= self.settings.at_risk_fraction {
                continue;
            }
            if self.shared.at_risk.contains_key(&channel) {
                continue;
            }
            warn!(%channel, failed, total, "channel at risk; suspending restarts of its subscribers");
            self.shared.at_risk.insert(
                channel,
                AtRisk {
                    since: Instant::now(),
                    escalated: false,
                },
            );
        }
    }

    fn escalate_at_risk(&self) {
        let ceiling = self.settings.at_risk_ceiling();
        let mut expired = Vec::new();
        for mut entry in self.shared.at_risk.iter_mut() {
            if !entry.escalated && entry.since.elapsed() >= ceiling {
                entry.escalated = true;
                expired.push(entry.key().clone());
            }
        }
        for channel in expired {
            self.shared.raise(ArmatureError::ChannelAtRisk(channel));
        }
    }
}

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

//! The module lifecycle manager.
//!
//! Owns every module instance: creates it from a descriptor and a registered factory,
//! wires its channels, runs it as a tracked tokio task and moves it through the
//! [`InstanceState`] machine. Task exits are collected by a reaper task and forwarded
//! to the fault monitor as [`SupervisorEvent`]s.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::SystemTime;

use dashmap::DashMap;
use futures::future::join_all;
use futures::FutureExt;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::common::{ArmatureConfig, ArmatureError, ArmatureResult, ChannelName, InstanceId};
use crate::message::{health_schema_id, SchemaRegistry, HEALTH_CHANNEL};
use crate::module::{
    InstanceState, ModuleContext, ModuleDescriptor, RestartLimiter, StateTransition,
    TerminationReason,
};
use crate::routing::{ChannelDirectory, Publisher, Router, Subscription};
use crate::supervision::SupervisorEvent;
use crate::traits::{Module, ModuleFactory};

/// Notifications broadcast by [`LifecycleManager::subscribe_events`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// An instance changed state.
    Transition {
        /// The instance.
        instance: InstanceId,
        /// Previous state; `None` when the instance was created.
        from: Option<InstanceState>,
        /// New state.
        to: InstanceState,
    },
    /// An instance is being restarted.
    Restarting {
        /// The instance.
        instance: InstanceId,
        /// Restarts performed so far, including this one.
        restarts: u32,
    },
    /// An instance exhausted its restart budget.
    Pinned {
        /// The instance.
        instance: InstanceId,
        /// Restarts counted in the window.
        attempts: usize,
    },
}

/// Snapshot of one instance.
#[derive(Debug, Clone)]
pub struct InstanceInfo {
    /// Instance id.
    pub id: InstanceId,
    /// The descriptor it runs.
    pub descriptor: Arc<ModuleDescriptor>,
    /// Current state.
    pub state: InstanceState,
    /// Whether the restart budget is exhausted.
    pub pinned: bool,
    /// Restarts performed.
    pub restarts: u32,
    /// When the instance last entered `Degraded`, while it is degraded.
    pub degraded_since: Option<Instant>,
}

enum TaskOutcome {
    Completed,
    Failed(String),
    Panicked(String),
}

struct TaskExit {
    instance: InstanceId,
    generation: u64,
    outcome: TaskOutcome,
}

struct InstanceSlot {
    id: InstanceId,
    descriptor: Arc<ModuleDescriptor>,
    state: InstanceState,
    history: Vec<StateTransition>,
    limiter: RestartLimiter,
    pinned: bool,
    restarts: u32,
    generation: u64,
    cancellation_token: CancellationToken,
    task: Option<JoinHandle<()>>,
    stop_requested: bool,
    running_since: Option<Instant>,
    degraded_since: Option<Instant>,
}

impl InstanceSlot {
    fn info(&self) -> InstanceInfo {
        InstanceInfo {
            id: self.id.clone(),
            descriptor: Arc::clone(&self.descriptor),
            state: self.state,
            pinned: self.pinned,
            restarts: self.restarts,
            degraded_since: self.degraded_since,
        }
    }
}

struct Wiring {
    publishers: HashMap<ChannelName, Publisher>,
    subscriptions: HashMap<ChannelName, Subscription>,
    health: Publisher,
}

struct LifecycleInner {
    config: ArmatureConfig,
    registry: Arc<SchemaRegistry>,
    directory: Arc<ChannelDirectory>,
    router: Arc<Router>,
    factories: DashMap<String, Arc<dyn ModuleFactory>>,
    slots: DashMap<InstanceId, Arc<Mutex<InstanceSlot>>>,
    infos: DashMap<InstanceId, InstanceInfo>,
    tracker: TaskTracker,
    events: broadcast::Sender<LifecycleEvent>,
    supervisor_tx: mpsc::UnboundedSender<SupervisorEvent>,
    supervisor_rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<SupervisorEvent>>>,
    exits: mpsc::UnboundedSender<TaskExit>,
    shutdown: CancellationToken,
}

/// Starts, stops and restarts module instances.
///
/// Cheap to clone; clones share the same instances. Must be created inside a tokio
/// runtime.
#[derive(Clone)]
pub struct LifecycleManager {
    inner: Arc<LifecycleInner>,
}

impl std::fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("instances", &self.inner.slots.len())
            .field("factories", &self.inner.factories.len())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

impl LifecycleManager {
    /// Creates a manager and spawns its reaper task.
    #[must_use]
    pub fn new(
        config: ArmatureConfig,
        registry: Arc<SchemaRegistry>,
        directory: Arc<ChannelDirectory>,
        router: Arc<Router>,
    ) -> Self {
        let (events, _) = broadcast::channel(config.limits.event_broadcast_capacity.max(1));
        let (supervisor_tx, supervisor_rx) = mpsc::unbounded_channel();
        let (exits, exits_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let inner = Arc::new(LifecycleInner {
            config,
            registry,
            directory,
            router,
            factories: DashMap::new(),
            slots: DashMap::new(),
            infos: DashMap::new(),
            tracker: TaskTracker::new(),
            events,
            supervisor_tx,
            supervisor_rx: parking_lot::Mutex::new(Some(supervisor_rx)),
            exits,
            shutdown: shutdown.clone(),
        });

        tokio::spawn(Self::reap_exits(Arc::downgrade(&inner), exits_rx, shutdown));
        Self { inner }
    }

    async fn reap_exits(
        inner: Weak<LifecycleInner>,
        mut exits: mpsc::UnboundedReceiver<TaskExit>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                exit = exits.recv() => {
                    let Some(exit) = exit else { break };
                    let Some(inner) = inner.upgrade() else { break };
                    let manager = Self { inner };
                    tokio::spawn(async move { manager.handle_exit(exit).await });
                }
            }
        }
        trace!("lifecycle reaper finished");
    }

    /// Registers the factory used for descriptors named `name`.
    pub fn register_module(&self, name: impl Into<String>, factory: impl ModuleFactory) {
        let name = name.into();
        debug!(module = %name, "registered module factory");
        self.inner.factories.insert(name, Arc::new(factory));
    }

    /// Whether a factory is registered under `name`.
    #[must_use]
    pub fn has_module(&self, name: &str) -> bool {
        self.inner.factories.contains_key(name)
    }

    /// Starts a new instance of `descriptor`.
    ///
    /// # Errors
    ///
    /// - [`ArmatureError::InvalidDescriptor`] if validation fails or no factory is
    ///   registered; no instance is created.
    /// - [`ArmatureError::SchemaConflict`] (or another registration error) if wiring
    ///   fails; the instance is kept in `Failed` and its registrations are rolled back.
    pub async fn start(&self, descriptor: ModuleDescriptor) -> ArmatureResult<InstanceId> {
        self.start_shared(Arc::new(descriptor)).await
    }

    /// As [`start`](Self::start), for a descriptor shared with a store.
    ///
    /// # Errors
    ///
    /// As [`start`](Self::start).
    #[instrument(skip(self, descriptor), fields(module = %descriptor.name))]
    pub async fn start_shared(&self, descriptor: Arc<ModuleDescriptor>) -> ArmatureResult<InstanceId> {
        descriptor.validate(&self.inner.registry)?;
        if !self.has_module(&descriptor.name) {
            return Err(ArmatureError::InvalidDescriptor(format!(
                "no module factory registered for '{}'",
                descriptor.name
            )));
        }

        let id = InstanceId::generate();
        let limits = descriptor.restart_limits(&self.inner.config.restart);
        let slot = InstanceSlot {
            id: id.clone(),
            descriptor,
            state: InstanceState::Starting,
            history: vec![StateTransition {
                from: None,
                to: InstanceState::Starting,
                at: SystemTime::now(),
            }],
            limiter: RestartLimiter::new(limits),
            pinned: false,
            restarts: 0,
            generation: 0,
            cancellation_token: self.inner.shutdown.child_token(),
            task: None,
            stop_requested: false,
            running_since: None,
            degraded_since: None,
        };
        self.inner.infos.insert(id.clone(), slot.info());
        let _ = self.inner.events.send(LifecycleEvent::Transition {
            instance: id.clone(),
            from: None,
            to: InstanceState::Starting,
        });

        let slot = Arc::new(Mutex::new(slot));
        let mut guard = slot.lock().await;
        self.inner.slots.insert(id.clone(), Arc::clone(&slot));
        self.launch(&mut guard).await?;
        Ok(id)
    }

    fn wire(&self, slot: &InstanceSlot) -> ArmatureResult<Wiring> {
        let directory = &self.inner.directory;
        let router = &self.inner.router;
        let id = &slot.id;

        let mut publishers = HashMap::new();
        for output in &slot.descriptor.outputs {
            directory.publish_on(&output.channel, id, &output.schema)?;
            publishers.insert(output.channel.clone(), router.publisher(&output.channel, id)?);
        }

        directory.publish_on(HEALTH_CHANNEL, id, &health_schema_id())?;
        let health = router.publisher(HEALTH_CHANNEL, id)?;

        let mut subscriptions = HashMap::new();
        for input in &slot.descriptor.inputs {
            let options = slot.descriptor.input_options(input, &self.inner.config);
            let subscription = directory.subscribe_with(&input.channel, id, &input.schema, options)?;
            subscriptions.insert(input.channel.clone(), subscription);
        }

        Ok(Wiring {
            publishers,
            subscriptions,
            health,
        })
    }

    fn create_module(&self, slot: &InstanceSlot) -> ArmatureResult<Box<dyn Module>> {
        let name = &slot.descriptor.name;
        let factory = self
            .inner
            .factories
            .get(name)
            .map(|factory| Arc::clone(factory.value()))
            .ok_or_else(|| {
                ArmatureError::InvalidDescriptor(format!("no module factory registered for '{name}'"))
            })?;
        factory.create().map_err(|e| {
            ArmatureError::InvalidDescriptor(format!("module '{name}' could not be created: {e:#}"))
        })
    }

    /// Wires and spawns an instance that is in `Starting`.
    async fn launch(&self, slot: &mut InstanceSlot) -> ArmatureResult<()> {
        let prepared = self
            .wire(slot)
            .and_then(|wiring| Ok((wiring, self.create_module(slot)?)));
        let (wiring, mut module) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!(instance = %slot.id, error = %e, "instance failed to start");
                self.inner.directory.deregister(&slot.id);
                self.transition(slot, InstanceState::Failed);
                return Err(e);
            }
        };

        slot.generation += 1;
        slot.stop_requested = false;
        slot.cancellation_token = self.inner.shutdown.child_token();

        let ctx = ModuleContext::new(
            slot.id.clone(),
            Arc::clone(&slot.descriptor),
            Arc::clone(&self.inner.registry),
            wiring.publishers,
            wiring.subscriptions,
            wiring.health,
            slot.cancellation_token.clone(),
        );
        let exits = self.inner.exits.clone();
        let instance = slot.id.clone();
        let generation = slot.generation;

        slot.task = Some(self.inner.tracker.spawn(async move {
            let outcome = match AssertUnwindSafe(module.run(ctx)).catch_unwind().await {
                Ok(Ok(())) => TaskOutcome::Completed,
                Ok(Err(e)) => TaskOutcome::Failed(format!("{e:#}")),
                Err(payload) => TaskOutcome::Panicked(panic_message(&*payload)),
            };
            let _ = exits.send(TaskExit {
                instance,
                generation,
                outcome,
            });
        }));

        slot.running_since = Some(Instant::now());
        self.transition(slot, InstanceState::Running);
        info!(instance = %slot.id, module = %slot.descriptor.name, "instance running");
        Ok(())
    }

    async fn handle_exit(&self, exit: TaskExit) {
        let Some(slot) = self.slot(&exit.instance) else {
            return;
        };
        let mut slot = slot.lock().await;
        if slot.generation != exit.generation || slot.stop_requested {
            trace!(instance = %exit.instance, "ignoring exit of a stopped task");
            return;
        }
        slot.task = None;
        slot.stop_requested = true;

        let reason = match exit.outcome {
            TaskOutcome::Completed => TerminationReason::Normal,
            TaskOutcome::Failed(message) => TerminationReason::Error(message),
            TaskOutcome::Panicked(message) => TerminationReason::Panic(message),
        };

        if let Some(since) = slot.running_since.take() {
            if since.elapsed() >= slot.descriptor.restart_limits(&self.inner.config.restart).window() {
                slot.limiter.reset_consecutive();
            }
        }

        if reason.is_abnormal() {
            error!(instance = %slot.id, %reason, "instance terminated abnormally");
            self.inner.directory.deregister(&slot.id);
            self.mark_failed(&mut slot);
        } else {
            info!(instance = %slot.id, "instance exited on its own");
            self.transition(&mut slot, InstanceState::Stopping);
            self.inner.directory.deregister(&slot.id);
            self.transition(&mut slot, InstanceState::Stopped);
        }

        self.notify_supervisor(SupervisorEvent::Terminated {
            instance: slot.id.clone(),
            reason,
            policy: slot.descriptor.restart.policy,
        });
    }

    fn notify_supervisor(&self, event: SupervisorEvent) {
        // Only fails once the monitor has shut down.
        if let Err(e) = self.inner.supervisor_tx.send(event) {
            warn!(event = ?e.0, "supervisor event dropped; no monitor is listening");
        }
    }

    /// Moves the instance to `Failed` along legal edges.
    fn mark_failed(&self, slot: &mut InstanceSlot) {
        match slot.state {
            InstanceState::Running => {
                self.transition(slot, InstanceState::Degraded);
                self.transition(slot, InstanceState::Failed);
            }
            InstanceState::Starting | InstanceState::Degraded => {
                self.transition(slot, InstanceState::Failed);
            }
            InstanceState::Stopped => {
                self.transition(slot, InstanceState::Starting);
                self.transition(slot, InstanceState::Failed);
            }
            InstanceState::Stopping | InstanceState::Failed => {}
        }
    }

    fn transition(&self, slot: &mut InstanceSlot, to: InstanceState) -> bool {
        let from = slot.state;
        if !from.can_transition_to(to) {
            warn!(instance = %slot.id, %from, %to, "illegal state transition refused");
            return false;
        }
        slot.state = to;
        slot.history.push(StateTransition {
            from: Some(from),
            to,
            at: SystemTime::now(),
        });
        if to == InstanceState::Degraded {
            slot.degraded_since = Some(Instant::now());
        } else {
            slot.degraded_since = None;
        }
        self.inner.infos.insert(slot.id.clone(), slot.info());
        let _ = self.inner.events.send(LifecycleEvent::Transition {
            instance: slot.id.clone(),
            from: Some(from),
            to,
        });
        debug!(instance = %slot.id, %from, %to, "state transition");
        true
    }

    fn slot(&self, id: &InstanceId) -> Option<Arc<Mutex<InstanceSlot>>> {
        self.inner.slots.get(id).map(|slot| Arc::clone(slot.value()))
    }

    fn require_slot(&self, id: &InstanceId) -> ArmatureResult<Arc<Mutex<InstanceSlot>>> {
        self.slot(id)
            .ok_or_else(|| ArmatureError::UnknownInstance(id.clone()))
    }

    /// Stops an instance cooperatively.
    ///
    /// Cancels the instance's token, waits up to its grace period, then aborts the
    /// task. The instance is always deregistered from the directory. Stopping a
    /// `Stopped` instance is a no-op.
    ///
    /// # Errors
    ///
    /// [`ArmatureError::UnknownInstance`].
    #[instrument(skip(self))]
    pub async fn stop(&self, id: &InstanceId) -> ArmatureResult<()> {
        let slot = self.require_slot(id)?;
        let mut slot = slot.lock().await;
        self.stop_locked(&mut slot).await;
        Ok(())
    }

    async fn stop_locked(&self, slot: &mut InstanceSlot) {
        if slot.state == InstanceState::Stopped {
            self.inner.directory.deregister(&slot.id);
            return;
        }
        self.transition(slot, InstanceState::Stopping);
        self.reclaim(slot).await;
        self.transition(slot, InstanceState::Stopped);
        info!(instance = %slot.id, "instance stopped");
    }

    /// Ends the instance's task, if any, and releases its channels.
    async fn reclaim(&self, slot: &mut InstanceSlot) {
        slot.stop_requested = true;
        slot.running_since = None;
        slot.cancellation_token.cancel();
        if let Some(mut task) = slot.task.take() {
            let grace = slot
                .descriptor
                .stop_grace(self.inner.config.timeouts.stop_grace());
            if tokio::time::timeout(grace, &mut task).await.is_err() {
                warn!(instance = %slot.id, ?grace, "instance ignored cancellation, aborting");
                task.abort();
                let _ = task.await;
            }
        }
        self.inner.directory.deregister(&slot.id);
    }

    /// Stops the instance fully, waits the backoff delay and starts it again under the
    /// same id.
    ///
    /// # Errors
    ///
    /// - [`ArmatureError::RestartLimitExceeded`] when the budget is exhausted; the
    ///   instance is pinned in `Failed` and reported.
    /// - Any error of [`start`](Self::start) while re-wiring.
    #[instrument(skip(self))]
    pub async fn restart(&self, id: &InstanceId) -> ArmatureResult<()> {
        let slot = self.require_slot(id)?;
        let mut slot = slot.lock().await;

        if slot.pinned || !slot.limiter.can_restart() {
            let attempts = slot.limiter.restarts_in_window();
            if !slot.pinned {
                self.pin(&mut slot, attempts).await;
            }
            return Err(ArmatureError::RestartLimitExceeded {
                instance: id.clone(),
                attempts,
            });
        }

        let backoff = slot.limiter.record_restart();
        self.stop_locked(&mut slot).await;
        if !backoff.is_zero() {
            debug!(instance = %id, ?backoff, "waiting before restart");
            tokio::time::sleep(backoff).await;
        }

        slot.restarts += 1;
        self.transition(&mut slot, InstanceState::Starting);
        let _ = self.inner.events.send(LifecycleEvent::Restarting {
            instance: id.clone(),
            restarts: slot.restarts,
        });
        info!(instance = %id, restarts = slot.restarts, "restarting instance");
        self.launch(&mut slot).await
    }

    async fn pin(&self, slot: &mut InstanceSlot, attempts: usize) {
        slot.pinned = true;
        self.mark_failed(slot);
        self.reclaim(slot).await;
        self.inner.infos.insert(slot.id.clone(), slot.info());
        error!(instance = %slot.id, attempts, "restart budget exhausted, instance pinned");
        let _ = self.inner.events.send(LifecycleEvent::Pinned {
            instance: slot.id.clone(),
            attempts,
        });
        self.notify_supervisor(SupervisorEvent::Pinned {
            instance: slot.id.clone(),
            attempts,
        });
    }

    /// Clears the pin and the restart history of an instance.
    ///
    /// # Errors
    ///
    /// [`ArmatureError::UnknownInstance`].
    pub async fn clear_pin(&self, id: &InstanceId) -> ArmatureResult<()> {
        let slot = self.require_slot(id)?;
        let mut slot = slot.lock().await;
        let limits = slot.descriptor.restart_limits(&self.inner.config.restart);
        slot.pinned = false;
        slot.limiter = RestartLimiter::new(limits);
        self.inner.infos.insert(slot.id.clone(), slot.info());
        info!(instance = %id, "restart pin cleared");
        Ok(())
    }

    /// `Running -> Degraded`. Returns whether the transition happened.
    ///
    /// # Errors
    ///
    /// [`ArmatureError::UnknownInstance`].
    pub async fn degrade(&self, id: &InstanceId) -> ArmatureResult<bool> {
        let slot = self.require_slot(id)?;
        let mut slot = slot.lock().await;
        if slot.state != InstanceState::Running {
            return Ok(false);
        }
        warn!(instance = %id, "instance degraded");
        Ok(self.transition(&mut slot, InstanceState::Degraded))
    }

    /// `Degraded -> Running`. Returns whether the transition happened.
    ///
    /// # Errors
    ///
    /// [`ArmatureError::UnknownInstance`].
    pub async fn recover(&self, id: &InstanceId) -> ArmatureResult<bool> {
        let slot = self.require_slot(id)?;
        let mut slot = slot.lock().await;
        if slot.state != InstanceState::Degraded {
            return Ok(false);
        }
        info!(instance = %id, "instance recovered");
        Ok(self.transition(&mut slot, InstanceState::Running))
    }

    /// Marks a live instance `Failed` and reclaims its task without restarting it.
    ///
    /// # Errors
    ///
    /// [`ArmatureError::UnknownInstance`].
    pub async fn fail(&self, id: &InstanceId, reason: &TerminationReason) -> ArmatureResult<()> {
        let slot = self.require_slot(id)?;
        let mut slot = slot.lock().await;
        if !slot.state.is_live() {
            return Ok(());
        }
        error!(instance = %id, %reason, "instance failed");
        self.mark_failed(&mut slot);
        self.reclaim(&mut slot).await;
        Ok(())
    }

    /// Current state of an instance.
    ///
    /// # Errors
    ///
    /// [`ArmatureError::UnknownInstance`].
    pub fn state(&self, id: &InstanceId) -> ArmatureResult<InstanceState> {
        self.inner
            .infos
            .get(id)
            .map(|info| info.state)
            .ok_or_else(|| ArmatureError::UnknownInstance(id.clone()))
    }

    /// Snapshot of one instance.
    #[must_use]
    pub fn info(&self, id: &InstanceId) -> Option<InstanceInfo> {
        self.inner.infos.get(id).map(|info| info.value().clone())
    }

    /// Snapshot of every instance, ordered by id (creation time).
    #[must_use]
    pub fn instances(&self) -> Vec<InstanceInfo> {
        let mut infos: Vec<InstanceInfo> = self
            .inner
            .infos
            .iter()
            .map(|info| info.value().clone())
            .collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    /// Every state change of an instance, oldest first.
    ///
    /// # Errors
    ///
    /// [`ArmatureError::UnknownInstance`].
    pub async fn history(&self, id: &InstanceId) -> ArmatureResult<Vec<StateTransition>> {
        let slot = self.require_slot(id)?;
        let slot = slot.lock().await;
        Ok(slot.history.clone())
    }

    /// Receiver of lifecycle events from now on.
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.inner.events.subscribe()
    }

    /// The supervisor event stream; handed out once, to the fault monitor.
    pub(crate) fn take_supervisor_events(&self) -> Option<mpsc::UnboundedReceiver<SupervisorEvent>> {
        self.inner.supervisor_rx.lock().take()
    }

    /// Stops every instance, waits for their tasks and ends the reaper.
    ///
    /// Returns `false` if the shutdown bound elapsed first.
    pub async fn stop_all(&self) -> bool {
        let ids: Vec<InstanceId> = self
            .inner
            .slots
            .iter()
            .map(|slot| slot.key().clone())
            .collect();
        let bound = self.inner.config.timeouts.system_shutdown();
        let mut clean = true;

        let stops = join_all(ids.iter().map(|id| self.stop(id)));
        if tokio::time::timeout(bound, stops).await.is_err() {
            warn!(?bound, "not every instance stopped in time");
            clean = false;
        }

        self.inner.tracker.close();
        if tokio::time::timeout(bound, self.inner.tracker.wait()).await.is_err() {
            warn!("module tasks still running after shutdown bound");
            clean = false;
        }
        self.inner.shutdown.cancel();
        info!(instances = ids.len(), "all instances stopped");
        clean
    }
}

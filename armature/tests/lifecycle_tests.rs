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

use std::time::{Duration, Instant};

use armature::module::LifecycleEvent;
use armature::prelude::*;
use armature_test::prelude::*;
use semver::Version;

use crate::setup::messages::{scan_v1, scan_v2, SCAN_CHANNEL};
use crate::setup::modules::{Idle, OneShot, Stubborn};
use crate::setup::{launch, wait_for_state};

mod setup;

fn idle_descriptor() -> ModuleDescriptor {
    ModuleDescriptor::new("idle", Version::new(1, 0, 0)).with_output(SCAN_CHANNEL, scan_v1())
}

#[armature_test]
async fn start_then_stop_walks_the_state_machine() -> anyhow::Result<()> {
    let runtime = launch().await?;
    runtime.register_module("idle", || Idle);

    let id = runtime.start(idle_descriptor()).await?;
    assert_eq!(runtime.lifecycle().state(&id)?, InstanceState::Running);
    assert!(runtime.directory().channel(SCAN_CHANNEL).is_some());

    runtime.stop(&id).await?;
    assert_eq!(runtime.lifecycle().state(&id)?, InstanceState::Stopped);
    assert!(
        runtime.directory().channel(SCAN_CHANNEL).is_none(),
        "a channel with no parties left must be removed"
    );

    let path: Vec<(Option<InstanceState>, InstanceState)> = runtime
        .lifecycle()
        .history(&id)
        .await?
        .into_iter()
        .map(|t| (t.from, t.to))
        .collect();
    assert_eq!(
        path,
        vec![
            (None, InstanceState::Starting),
            (Some(InstanceState::Starting), InstanceState::Running),
            (Some(InstanceState::Running), InstanceState::Stopping),
            (Some(InstanceState::Stopping), InstanceState::Stopped),
        ]
    );

    runtime.stop(&id).await?;
    assert_eq!(runtime.lifecycle().history(&id).await?.len(), 4);

    runtime.shutdown_all().await
}

#[armature_test]
async fn unknown_instances_are_reported() -> anyhow::Result<()> {
    let runtime = launch().await?;
    let ghost = InstanceId::from("mod_ghost");

    assert_eq!(
        runtime.stop(&ghost).await.unwrap_err(),
        ArmatureError::UnknownInstance(ghost.clone())
    );
    assert_eq!(
        runtime.restart(&ghost).await.unwrap_err(),
        ArmatureError::UnknownInstance(ghost.clone())
    );
    assert!(runtime.lifecycle().state(&ghost).is_err());

    runtime.shutdown_all().await
}

#[armature_test]
async fn start_rejects_descriptors_it_cannot_honour() -> anyhow::Result<()> {
    let runtime = launch().await?;

    let unregistered = runtime.start(idle_descriptor()).await.unwrap_err();
    assert!(matches!(unregistered, ArmatureError::InvalidDescriptor(_)));

    runtime.register_module("idle", || Idle);
    let unknown_schema = ModuleDescriptor::new("idle", Version::new(1, 0, 0))
        .with_output(SCAN_CHANNEL, "scan@9.0.0".parse()?);
    let err = runtime.start(unknown_schema).await.unwrap_err();
    assert!(matches!(err, ArmatureError::InvalidDescriptor(_)));

    assert!(runtime.instances().is_empty(), "rejected descriptors create no instance");
    runtime.shutdown_all().await
}

#[armature_test]
async fn conflicting_subscription_fails_the_instance_and_changes_nothing() -> anyhow::Result<()> {
    let runtime = launch().await?;
    runtime.register_module("lidar", || Idle);
    runtime.register_module("planner", || Idle);

    let lidar = ModuleDescriptor::new("lidar", Version::new(1, 0, 0)).with_output(SCAN_CHANNEL, scan_v1());
    let planner = ModuleDescriptor::new("planner", Version::new(1, 0, 0)).with_input(SCAN_CHANNEL, scan_v2());

    runtime.start(lidar).await?;
    let before = runtime.directory().channel(SCAN_CHANNEL).expect("channel exists");

    let err = runtime.start(planner).await.unwrap_err();
    assert!(matches!(err, ArmatureError::SchemaConflict { ref channel, .. } if channel == SCAN_CHANNEL));

    let planner = runtime
        .instances()
        .into_iter()
        .find(|info| info.descriptor.name == "planner")
        .expect("failed instance is kept");
    assert_eq!(planner.state, InstanceState::Failed);
    assert!(runtime.directory().channels_of(&planner.id).is_empty());

    let after = runtime.directory().channel(SCAN_CHANNEL).expect("channel exists");
    assert_eq!(after.schema, scan_v1());
    assert_eq!(after.subscribers, before.subscribers);

    runtime.shutdown_all().await
}

#[armature_test]
async fn restart_passes_through_stopped_and_keeps_the_id() -> anyhow::Result<()> {
    let runtime = launch().await?;
    runtime.register_module("idle", || Idle);
    let id = runtime.start(idle_descriptor()).await?;

    let mut events = runtime.lifecycle().subscribe_events();
    runtime.restart(&id).await?;
    assert_eq!(runtime.lifecycle().state(&id)?, InstanceState::Running);

    let mut path = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let LifecycleEvent::Transition { instance, from, to } = event {
            assert_eq!(instance, id);
            path.push((from, to));
        }
    }
    assert_eq!(
        path,
        vec![
            (Some(InstanceState::Running), InstanceState::Stopping),
            (Some(InstanceState::Stopping), InstanceState::Stopped),
            (Some(InstanceState::Stopped), InstanceState::Starting),
            (Some(InstanceState::Starting), InstanceState::Running),
        ]
    );

    let info = runtime.lifecycle().info(&id).expect("instance exists");
    assert_eq!(info.restarts, 1);
    assert_eq!(runtime.instances().len(), 1);

    runtime.shutdown_all().await
}

#[armature_test]
async fn instance_ignoring_cancellation_is_aborted() -> anyhow::Result<()> {
    let runtime = launch().await?;
    runtime.register_module("stubborn", || Stubborn);
    let descriptor = ModuleDescriptor::new("stubborn", Version::new(1, 0, 0))
        .with_stop_grace(Duration::from_millis(50));
    let id = runtime.start(descriptor).await?;

    let begun = Instant::now();
    runtime.stop(&id).await?;
    assert!(begun.elapsed() < Duration::from_secs(2));
    assert_eq!(runtime.lifecycle().state(&id)?, InstanceState::Stopped);
    assert!(runtime.directory().channels_of(&id).is_empty());

    runtime.shutdown_all().await
}

#[armature_test]
async fn returning_instance_is_stopped() -> anyhow::Result<()> {
    let runtime = launch().await?;
    runtime.register_module("oneshot", || OneShot);
    let descriptor = ModuleDescriptor::new("oneshot", Version::new(1, 0, 0))
        .with_restart_policy(RestartPolicy::Temporary);

    let id = runtime.start(descriptor).await?;
    wait_for_state(&runtime, &id, InstanceState::Stopped).await?;
    assert!(runtime.directory().channels_of(&id).is_empty());

    runtime.shutdown_all().await
}

#[armature_test]
async fn exhausted_restart_budget_pins_the_instance() -> anyhow::Result<()> {
    let runtime = launch().await?;
    runtime.register_module("idle", || Idle);
    let descriptor = idle_descriptor().with_restart_limits(RestartLimiterConfig {
        enabled: true,
        max_restarts: 2,
        window_secs: 60,
        initial_backoff_ms: 1,
        max_backoff_ms: 5,
        backoff_multiplier: 2.0,
    });
    let id = runtime.start(descriptor).await?;

    runtime.restart(&id).await?;
    runtime.restart(&id).await?;
    let err = runtime.restart(&id).await.unwrap_err();
    assert_eq!(
        err,
        ArmatureError::RestartLimitExceeded {
            instance: id.clone(),
            attempts: 2
        }
    );

    let info = runtime.lifecycle().info(&id).expect("instance exists");
    assert!(info.pinned);
    assert_eq!(info.state, InstanceState::Failed);
    assert!(runtime.directory().channels_of(&id).is_empty());
    assert!(runtime.restart(&id).await.is_err(), "pinned instances stay pinned");

    runtime.lifecycle().clear_pin(&id).await?;
    runtime.restart(&id).await?;
    assert_eq!(runtime.lifecycle().state(&id)?, InstanceState::Running);

    runtime.shutdown_all().await
}

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

use std::time::Duration;

use armature::common::BackpressureKind;
use armature::module::TerminationReason;
use armature::prelude::*;
use armature_test::prelude::*;
use semver::Version;

use crate::setup::messages::{scan_v1, Scan, SCAN_CHANNEL};
use crate::setup::modules::{Failing, Idle, Scripted};
use crate::setup::{fast_config, launch, launch_with, wait_for_state, wait_until};

mod setup;

fn scripted(policy: RestartPolicy) -> ModuleDescriptor {
    ModuleDescriptor::new("scripted", Version::new(1, 0, 0)).with_restart_policy(policy)
}

fn pin_immediately() -> RestartLimiterConfig {
    RestartLimiterConfig {
        enabled: true,
        max_restarts: 0,
        window_secs: 60,
        initial_backoff_ms: 1,
        max_backoff_ms: 1,
        backoff_multiplier: 1.0,
    }
}

#[armature_test]
async fn repeated_warnings_degrade_and_a_failure_restarts() -> anyhow::Result<()> {
    let runtime = launch().await?;
    let (health, factory) = Scripted::factory();
    runtime.register_module("scripted", factory);
    let id = runtime.start(scripted(RestartPolicy::Permanent)).await?;

    health.send(HealthStatus::Warn)?;
    health.send(HealthStatus::Warn)?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(runtime.lifecycle().state(&id)?, InstanceState::Running);

    health.send(HealthStatus::Warn)?;
    wait_for_state(&runtime, &id, InstanceState::Degraded).await?;

    health.send(HealthStatus::Fail)?;
    let lifecycle = runtime.lifecycle().clone();
    wait_until(|| lifecycle.info(&id).is_some_and(|info| info.restarts == 1)).await?;
    wait_for_state(&runtime, &id, InstanceState::Running).await?;

    let history = runtime.lifecycle().history(&id).await?;
    let degraded_then_stopped = history.windows(3).any(|w| {
        w[0].to == InstanceState::Stopping
            && w[1].to == InstanceState::Stopped
            && w[2].to == InstanceState::Starting
    });
    assert!(degraded_then_stopped, "restart must pass through Stopped");

    runtime.shutdown_all().await
}

#[armature_test]
async fn ok_signal_recovers_a_degraded_instance() -> anyhow::Result<()> {
    let runtime = launch().await?;
    let (health, factory) = Scripted::factory();
    runtime.register_module("scripted", factory);
    let id = runtime.start(scripted(RestartPolicy::Permanent)).await?;

    for _ in 0..3 {
        health.send(HealthStatus::Warn)?;
    }
    wait_for_state(&runtime, &id, InstanceState::Degraded).await?;

    health.send(HealthStatus::Ok)?;
    wait_for_state(&runtime, &id, InstanceState::Running).await?;
    assert_eq!(runtime.lifecycle().info(&id).map(|info| info.restarts), Some(0));

    runtime.shutdown_all().await
}

#[armature_test]
async fn temporary_instance_is_failed_instead_of_restarted() -> anyhow::Result<()> {
    let runtime = launch().await?;
    let (health, factory) = Scripted::factory();
    runtime.register_module("scripted", factory);
    let id = runtime.start(scripted(RestartPolicy::Temporary)).await?;

    health.send(HealthStatus::Fail)?;
    wait_for_state(&runtime, &id, InstanceState::Failed).await?;
    tokio::time::sleep(Duration::from_millis(60)).await;

    assert_eq!(runtime.lifecycle().state(&id)?, InstanceState::Failed);
    assert_eq!(runtime.lifecycle().info(&id).map(|info| info.restarts), Some(0));
    runtime.shutdown_all().await
}

#[armature_test]
async fn degraded_too_long_is_restarted() -> anyhow::Result<()> {
    let mut config = fast_config();
    config.supervision.degraded_ceiling_ms = 80;
    let runtime = launch_with(config).await?;
    let (health, factory) = Scripted::factory();
    runtime.register_module("scripted", factory);
    let id = runtime.start(scripted(RestartPolicy::Permanent)).await?;

    for _ in 0..3 {
        health.send(HealthStatus::Warn)?;
    }
    wait_for_state(&runtime, &id, InstanceState::Degraded).await?;

    let lifecycle = runtime.lifecycle().clone();
    wait_until(|| lifecycle.info(&id).is_some_and(|info| info.restarts >= 1)).await?;
    runtime.shutdown_all().await
}

#[armature_test]
async fn crashing_module_is_restarted_until_pinned() -> anyhow::Result<()> {
    let runtime = launch().await?;
    runtime.register_module("failing", || Failing);
    let descriptor = ModuleDescriptor::new("failing", Version::new(1, 0, 0))
        .with_restart_limits(RestartLimiterConfig {
            enabled: true,
            max_restarts: 2,
            window_secs: 60,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            backoff_multiplier: 2.0,
        });
    let id = runtime.start(descriptor).await?;

    let lifecycle = runtime.lifecycle().clone();
    wait_until(|| lifecycle.info(&id).is_some_and(|info| info.pinned)).await?;

    let info = runtime.lifecycle().info(&id).expect("instance exists");
    assert_eq!(info.state, InstanceState::Failed);
    assert_eq!(info.restarts, 2);
    runtime.shutdown_all().await
}

#[armature_test]
async fn transient_instance_is_left_alone_after_a_clean_exit() -> anyhow::Result<()> {
    let runtime = launch().await?;
    runtime.register_module("oneshot", || crate::setup::modules::OneShot);
    let descriptor = ModuleDescriptor::new("oneshot", Version::new(1, 0, 0))
        .with_restart_policy(RestartPolicy::Transient);
    let id = runtime.start(descriptor).await?;

    wait_for_state(&runtime, &id, InstanceState::Stopped).await?;
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(runtime.lifecycle().info(&id).map(|info| info.restarts), Some(0));
    assert!(!RestartPolicy::Transient.should_restart(&TerminationReason::Normal));

    runtime.shutdown_all().await
}

#[armature_test]
async fn failing_subscribers_put_their_channel_at_risk() -> anyhow::Result<()> {
    let mut config = fast_config();
    config.supervision.at_risk_fraction = 0.5;
    config.supervision.at_risk_min_subscribers = 2;
    config.supervision.at_risk_ceiling_ms = 100;
    let runtime = launch_with(config).await?;

    let (health, factory) = Scripted::factory();
    runtime.register_module("scripted", factory);
    runtime.register_module("failing", || Failing);
    let mut fatal = runtime.subscribe_fatal();

    let survivor = runtime
        .start(scripted(RestartPolicy::Permanent).with_input(SCAN_CHANNEL, scan_v1()))
        .await?;
    for _ in 0..2 {
        let crasher = ModuleDescriptor::new("failing", Version::new(1, 0, 0))
            .with_input(SCAN_CHANNEL, scan_v1())
            .with_restart_limits(pin_immediately());
        runtime.start(crasher).await?;
    }

    let monitor_view = runtime.clone();
    wait_until(|| monitor_view.at_risk_channels() == vec![SCAN_CHANNEL.to_string()]).await?;

    health.send(HealthStatus::Fail)?;
    wait_for_state(&runtime, &survivor, InstanceState::Failed).await?;
    assert_eq!(
        runtime.lifecycle().info(&survivor).map(|info| info.restarts),
        Some(0),
        "subscribers of an at-risk channel are not restarted"
    );

    let condition = tokio::time::timeout(Duration::from_secs(5), fatal.recv()).await??;
    assert_eq!(condition.error, ArmatureError::ChannelAtRisk(SCAN_CHANNEL.to_string()));
    assert!(condition.error.is_fatal());
    assert_eq!(runtime.fatal_conditions().len(), 1);

    assert!(runtime.clear_at_risk(SCAN_CHANNEL));
    assert!(!runtime.clear_at_risk("radar/tracks"));
    runtime.shutdown_all().await
}

#[armature_test]
async fn subscriber_drops_count_as_warnings() -> anyhow::Result<()> {
    let mut config = fast_config();
    config.supervision.drops_as_warnings = true;
    config.supervision.warn_threshold = 1;
    let runtime = launch_with(config).await?;
    runtime.register_module("idle", || Idle);

    let slow = ModuleDescriptor::new("idle", Version::new(1, 0, 0)).with_input_options(
        SCAN_CHANNEL,
        scan_v1(),
        1,
        BackpressureKind::DropNewest,
        None,
    );
    let id = runtime.start(slow).await?;

    let producer = InstanceId::from("mod_test_producer");
    runtime.directory().publish_on(SCAN_CHANNEL, &producer, &scan_v1())?;
    let publisher = runtime.router().publisher(SCAN_CHANNEL, &producer)?;
    for seq in 1..=3 {
        publisher.publish_typed(&Scan::numbered(seq)).await?;
    }

    wait_for_state(&runtime, &id, InstanceState::Degraded).await?;
    runtime.shutdown_all().await
}

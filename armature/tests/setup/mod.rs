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

#![allow(dead_code)]

use std::sync::Once;
use std::time::Duration;

use armature::prelude::*;
use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

pub mod messages;
pub mod modules;

static INIT: Once = Once::new();

/// Installs a file-writing subscriber once per test binary.
pub fn initialize_tracing() {
    INIT.call_once(|| {
        std::fs::create_dir_all("logs").expect("could not create logs dir");

        let file_appender = RollingFileAppender::new(Rotation::NEVER, "logs", "armature_tests.txt");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        Box::leak(Box::new(guard));

        let filter = EnvFilter::new("trace")
            .add_directive("armature::routing::queue=debug".parse().unwrap())
            .add_directive("armature::module=trace".parse().unwrap())
            .add_directive("armature::supervision=trace".parse().unwrap())
            .add_directive("tokio=info".parse().unwrap());

        let subscriber = FmtSubscriber::builder()
            .with_span_events(FmtSpan::NONE)
            .with_max_level(Level::TRACE)
            .compact()
            .with_line_number(true)
            .without_time()
            .with_target(true)
            .with_env_filter(filter)
            .with_writer(non_blocking)
            .finish();

        tracing::subscriber::set_global_default(subscriber)
            .expect("setting default subscriber failed");
    });
}

/// Configuration with short timers so supervision tests finish quickly.
pub fn fast_config() -> ArmatureConfig {
    let mut config = ArmatureConfig::default();
    config.timeouts.stop_grace_ms = 200;
    config.timeouts.system_shutdown_ms = 5_000;
    config.supervision.tick_interval_ms = 20;
    config.supervision.drops_as_warnings = false;
    config.restart = RestartLimiterConfig {
        enabled: true,
        max_restarts: 5,
        window_secs: 60,
        initial_backoff_ms: 5,
        max_backoff_ms: 20,
        backoff_multiplier: 2.0,
    };
    config
}

/// Launches a runtime with [`fast_config`] and the scan schemas registered.
pub async fn launch() -> anyhow::Result<Runtime> {
    launch_with(fast_config()).await
}

pub async fn launch_with(config: ArmatureConfig) -> anyhow::Result<Runtime> {
    initialize_tracing();
    let runtime = ArmatureApp::launch_with_config(config).await?;
    messages::register_scan_schemas(&runtime)?;
    Ok(runtime)
}

/// Polls until `id` reaches `state`.
pub async fn wait_for_state(
    runtime: &Runtime,
    id: &InstanceId,
    state: InstanceState,
) -> anyhow::Result<()> {
    let polling = async {
        loop {
            if runtime.lifecycle().state(id)? == state {
                return Ok::<(), ArmatureError>(());
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), polling)
        .await
        .map_err(|_| anyhow::anyhow!("{id} never reached {state}"))??;
    Ok(())
}

/// Polls until `condition` holds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> anyhow::Result<()> {
    let polling = async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), polling)
        .await
        .map_err(|_| anyhow::anyhow!("condition not met in time"))
}

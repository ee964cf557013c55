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

use armature::common::logging::init_tracing;
use armature::prelude::*;

// payloads are plain structs; the macro adds the derives and the marker trait
#[armature_message]
struct Scan {
    seq: u64,
    nearest_m: f64,
}

const LIDAR: &str = r#"
name = "lidar"
version = "1.0.0"

[[outputs]]
channel = "lidar/scan"
schema = "scan.v1"
"#;

const PLANNER: &str = r#"
name = "planner"
version = "1.0.0"

[[inputs]]
channel = "lidar/scan"
schema = "scan.v1"
capacity = 4
backpressure = "drop_oldest"

[restart]
policy = "transient"
"#;

struct Lidar;

#[async_trait]
impl Module for Lidar {
    async fn run(&mut self, ctx: ModuleContext) -> anyhow::Result<()> {
        let mut ticker = tokio::time::interval(Duration::from_millis(100));
        let mut seq = 0u64;
        loop {
            tokio::select! {
                () = ctx.cancelled() => return Ok(()),
                _ = ticker.tick() => {
                    seq += 1;
                    let nearest_m = 0.2 + (seq % 10) as f64 * 0.3;
                    ctx.publish_typed("lidar/scan", &Scan { seq, nearest_m }).await?;
                }
            }
        }
    }
}

struct Planner;

#[async_trait]
impl Module for Planner {
    async fn run(&mut self, ctx: ModuleContext) -> anyhow::Result<()> {
        let scans = ctx.subscription("lidar/scan")?;
        loop {
            tokio::select! {
                () = ctx.cancelled() => return Ok(()),
                scan = scans.recv_typed::<Scan>(ctx.registry()) => {
                    let Some(scan) = scan else { return Ok(()) };
                    let scan = scan?;
                    let status = if scan.nearest_m < 0.5 { HealthStatus::Warn } else { HealthStatus::Ok };
                    println!("planner: scan {} nearest {:.1} m -> {status}", scan.seq, scan.nearest_m);
                    ctx.report_health(status, None).await?;
                }
            }
        }
    }
}

#[armature_main]
async fn main() -> anyhow::Result<()> {
    let config = ArmatureConfig::load();
    let _guard = init_tracing(&config.tracing, &config.paths.log_directory);

    let runtime = ArmatureApp::launch_with_config(config).await?;
    runtime.register_schema(
        "scan.v1".parse()?,
        EncodingSpec::json()
            .required("seq", FieldKind::Integer)
            .required("nearest_m", FieldKind::Float),
    )?;
    runtime.register_module("lidar", || Lidar);
    runtime.register_module("planner", || Planner);

    runtime.start(ModuleDescriptor::from_toml_str(PLANNER)?).await?;
    runtime.start(ModuleDescriptor::from_toml_str(LIDAR)?).await?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => println!("interrupted"),
        () = tokio::time::sleep(Duration::from_secs(2)) => {}
    }

    for channel in runtime.channels() {
        println!(
            "{} ({}): {} published, {} dropped",
            channel.name, channel.schema, channel.stats.published, channel.stats.dropped
        );
    }
    for instance in runtime.instances() {
        println!("{} {}: {}", instance.descriptor.name, instance.id, instance.state);
    }

    runtime.shutdown_all().await
}

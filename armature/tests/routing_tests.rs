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

use std::sync::Arc;
use std::time::Duration;

use armature::prelude::*;
use armature_test::prelude::*;
use semver::Version;

use crate::setup::messages::{scan_v1, Scan, SCAN_CHANNEL};
use crate::setup::modules::{Recorder, Scanner};
use crate::setup::{launch, wait_until};

mod setup;

fn drain(subscription: &Subscription, registry: &SchemaRegistry) -> Vec<u64> {
    std::iter::from_fn(|| subscription.try_recv())
        .map(|message| message.decode_typed::<Scan>(registry).expect("valid scan").seq)
        .collect()
}

#[armature_test]
async fn drop_oldest_keeps_the_newest_messages() -> anyhow::Result<()> {
    let runtime = launch().await?;
    let producer = InstanceId::from("mod_lidar");
    let consumer = InstanceId::from("mod_planner");

    runtime.directory().publish_on(SCAN_CHANNEL, &producer, &scan_v1())?;
    let scans = runtime.directory().subscribe_with(
        SCAN_CHANNEL,
        &consumer,
        &scan_v1(),
        SubscriptionOptions::new(10, BackpressurePolicy::DropOldest),
    )?;
    let publisher = runtime.router().publisher(SCAN_CHANNEL, &producer)?;

    for seq in 1..=15 {
        publisher.publish_typed(&Scan::numbered(seq)).await?;
    }

    assert_eq!(scans.dropped(), 5);
    assert_eq!(drain(&scans, runtime.registry()), (6..=15).collect::<Vec<_>>());

    let stats = runtime
        .directory()
        .channel(SCAN_CHANNEL)
        .expect("channel exists")
        .stats;
    assert_eq!(stats.published, 15);
    assert_eq!(stats.dropped, 5);

    runtime.shutdown_all().await
}

#[armature_test]
async fn block_producer_delivers_everything_in_order() -> anyhow::Result<()> {
    let runtime = launch().await?;
    let producer = InstanceId::from("mod_lidar");
    let consumer = InstanceId::from("mod_planner");

    runtime.directory().publish_on(SCAN_CHANNEL, &producer, &scan_v1())?;
    let scans = runtime.directory().subscribe_with(
        SCAN_CHANNEL,
        &consumer,
        &scan_v1(),
        SubscriptionOptions::new(
            2,
            BackpressurePolicy::BlockProducer {
                timeout: Duration::from_secs(5),
            },
        ),
    )?;
    let publisher = runtime.router().publisher(SCAN_CHANNEL, &producer)?;

    let registry = Arc::clone(runtime.registry());
    let reader = tokio::spawn(async move {
        let mut seen = Vec::new();
        while seen.len() < 100 {
            match scans.recv_typed::<Scan>(&registry).await {
                Some(scan) => seen.push(scan.expect("valid scan").seq),
                None => break,
            }
        }
        seen
    });

    for seq in 1..=100 {
        let report = publisher.publish_typed(&Scan::numbered(seq)).await?;
        assert!(report.timed_out.is_empty());
        assert_eq!(report.dropped, 0);
    }

    let seen = reader.await?;
    assert_eq!(seen, (1..=100).collect::<Vec<_>>());
    runtime.shutdown_all().await
}

#[armature_test]
async fn block_producer_timeout_is_reported_not_raised() -> anyhow::Result<()> {
    let runtime = launch().await?;
    let producer = InstanceId::from("mod_lidar");
    let consumer = InstanceId::from("mod_planner");

    runtime.directory().publish_on(SCAN_CHANNEL, &producer, &scan_v1())?;
    let _scans = runtime.directory().subscribe_with(
        SCAN_CHANNEL,
        &consumer,
        &scan_v1(),
        SubscriptionOptions::new(
            1,
            BackpressurePolicy::BlockProducer {
                timeout: Duration::from_millis(20),
            },
        ),
    )?;
    let publisher = runtime.router().publisher(SCAN_CHANNEL, &producer)?;

    let first = publisher.publish_typed(&Scan::numbered(1)).await?;
    assert_eq!(first.delivered, 1);

    let second = publisher.publish_typed(&Scan::numbered(2)).await?;
    assert_eq!(second.timed_out, vec![consumer.clone()]);
    assert_eq!(
        second.timeout_events(SCAN_CHANNEL),
        vec![ArmatureError::DeliveryTimeout {
            channel: SCAN_CHANNEL.to_string(),
            subscriber: consumer.clone(),
        }]
    );

    let channel = runtime.directory().channel(SCAN_CHANNEL).expect("channel exists");
    let subscriber = &channel.subscribers[0];
    assert_eq!(subscriber.instance, consumer);
    assert_eq!(subscriber.timeouts, 1);
    assert_eq!(subscriber.dropped, 1);
    assert_eq!(channel.stats.timeouts, 1);

    runtime.shutdown_all().await
}

#[armature_test]
async fn modules_exchange_typed_messages() -> anyhow::Result<()> {
    let runtime = launch().await?;
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let recorded = Arc::clone(&seen);
    runtime.register_module("recorder", move || Recorder {
        seen: Arc::clone(&recorded),
    });
    runtime.register_module("scanner", || Scanner { count: 5 });

    runtime
        .start(ModuleDescriptor::new("recorder", Version::new(1, 0, 0)).with_input(SCAN_CHANNEL, scan_v1()))
        .await?;
    runtime
        .start(ModuleDescriptor::new("scanner", Version::new(1, 0, 0)).with_output(SCAN_CHANNEL, scan_v1()))
        .await?;

    wait_until(|| seen.lock().len() == 5).await?;
    assert_eq!(*seen.lock(), vec![1, 2, 3, 4, 5]);

    let channel = runtime.directory().channel(SCAN_CHANNEL).expect("channel exists");
    assert_eq!(channel.publishers.len(), 1);
    assert_eq!(channel.subscribers.len(), 1);

    runtime.shutdown_all().await
}

#[armature_test]
async fn values_outside_the_schema_are_rejected() -> anyhow::Result<()> {
    let runtime = launch().await?;
    let producer = InstanceId::from("mod_lidar");
    runtime.directory().publish_on(SCAN_CHANNEL, &producer, &scan_v1())?;
    let publisher = runtime.router().publisher(SCAN_CHANNEL, &producer)?;

    let err = publisher
        .publish(&serde_json::json!({ "seq": "one", "ranges": [] }))
        .await
        .unwrap_err();
    assert!(matches!(err, ArmatureError::SchemaMismatch { .. }));

    runtime.shutdown_all().await
}

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

use std::fs;

use semver::Version;

use armature::prelude::*;
use armature_test::prelude::*;

use crate::setup::launch;
use crate::setup::messages::{scan_v1, SCAN_CHANNEL};
use crate::setup::modules::{Idle, Scanner};

mod setup;

const LIDAR: &str = r#"
name = "lidar"
version = "1.0.0"

[[outputs]]
channel = "lidar/scan"
schema = "scan.v1"

[restart]
policy = "permanent"
"#;

const PLANNER: &str = r#"
name = "planner"
version = "0.4.1"

[[inputs]]
channel = "lidar/scan"
schema = "scan@1.0.0"
capacity = 8
backpressure = "drop_newest"
"#;

#[armature_test]
async fn store_loads_good_files_and_reports_bad_ones() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    fs::write(dir.path().join("10-lidar.toml"), LIDAR)?;
    fs::write(dir.path().join("20-planner.toml"), PLANNER)?;
    fs::write(dir.path().join("30-broken.toml"), "name = \"broken\"\nversion = ")?;
    fs::write(dir.path().join("notes.txt"), "not a descriptor")?;

    let runtime = launch().await?;
    runtime.register_module("lidar", || Scanner { count: 3 });
    runtime.register_module("planner", || Idle);

    let store = runtime.load_descriptors(dir.path())?;
    assert_eq!(store.len(), 2);
    assert_eq!(store.failures().len(), 1);
    assert!(store.failures()[0].path.ends_with("30-broken.toml"));
    assert!(matches!(store.failures()[0].error, ArmatureError::InvalidDescriptor(_)));

    let results = runtime.start_all(&store).await;
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|(_, result)| result.is_ok()));
    assert_eq!(runtime.instances().len(), 2);

    let planner = store.get("planner").expect("planner loaded");
    assert_eq!(planner.inputs[0].capacity, Some(8));
    assert!(runtime.fatal_conditions().is_empty());

    runtime.shutdown_all().await
}

#[armature_test]
async fn one_bad_module_does_not_block_the_rest() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    fs::write(dir.path().join("lidar.toml"), LIDAR)?;
    fs::write(dir.path().join("planner.toml"), PLANNER)?;

    let runtime = launch().await?;
    runtime.register_module("planner", || Idle);

    let store = runtime.load_descriptors(dir.path())?;
    let results = runtime.start_all(&store).await;
    let lidar = results
        .iter()
        .find(|(name, _)| name == "lidar")
        .map(|(_, result)| result.clone())
        .expect("lidar attempted");
    assert!(matches!(lidar, Err(ArmatureError::InvalidDescriptor(_))));
    assert_eq!(runtime.instances().len(), 1);

    runtime.shutdown_all().await
}

#[armature_test]
async fn subscribers_start_before_sources_in_name_order() -> anyhow::Result<()> {
    let runtime = launch().await?;
    for name in ["camera", "lidar", "planner", "mapper"] {
        runtime.register_module(name, || Idle);
    }

    let mut store = DescriptorStore::new();
    store.insert(ModuleDescriptor::new("lidar", Version::new(1, 0, 0)).with_output(SCAN_CHANNEL, scan_v1()))?;
    store.insert(ModuleDescriptor::new("planner", Version::new(1, 0, 0)).with_input(SCAN_CHANNEL, scan_v1()))?;
    store.insert(ModuleDescriptor::new("camera", Version::new(1, 0, 0)))?;
    store.insert(ModuleDescriptor::new("mapper", Version::new(1, 0, 0)).with_input(SCAN_CHANNEL, scan_v1()))?;

    let names: Vec<String> = runtime
        .start_all(&store)
        .await
        .into_iter()
        .map(|(name, result)| result.map(|_| name))
        .collect::<Result<_, _>>()?;
    assert_eq!(names, ["mapper", "planner", "camera", "lidar"]);

    runtime.shutdown_all().await
}

#[armature_test]
async fn duplicate_module_names_corrupt_the_store() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    fs::write(dir.path().join("a.toml"), LIDAR)?;
    fs::write(dir.path().join("b.toml"), LIDAR)?;

    let runtime = launch().await?;
    let err = runtime.load_descriptors(dir.path()).unwrap_err();
    assert!(matches!(err, ArmatureError::DescriptorStoreCorrupt(_)));
    assert!(err.is_fatal());

    let fatal = runtime.fatal_conditions();
    assert_eq!(fatal.len(), 1);
    assert_eq!(fatal[0].error, err);

    runtime.shutdown_all().await
}

#[armature_test]
async fn missing_store_is_corrupt() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let missing = dir.path().join("nowhere");

    let err = DescriptorStore::load_dir(&missing).unwrap_err();
    assert!(matches!(err, ArmatureError::DescriptorStoreCorrupt(_)));
    Ok(())
}

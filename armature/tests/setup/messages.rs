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

use armature::prelude::*;

/// A lidar sweep as published on `lidar/scan`.
#[armature_message]
pub struct Scan {
    pub seq: u64,
    pub ranges: Vec<f64>,
}

impl Scan {
    pub fn numbered(seq: u64) -> Self {
        Self {
            seq,
            ranges: vec![1.5, 2.0, 2.5],
        }
    }
}

pub const SCAN_CHANNEL: &str = "lidar/scan";

pub fn scan_v1() -> SchemaId {
    "scan.v1".parse().expect("valid schema id")
}

pub fn scan_v2() -> SchemaId {
    "scan.v2".parse().expect("valid schema id")
}

pub fn scan_spec() -> EncodingSpec {
    EncodingSpec::json()
        .required("seq", FieldKind::Integer)
        .required("ranges", FieldKind::Array)
}

pub fn register_scan_schemas(runtime: &Runtime) -> ArmatureResult<()> {
    runtime.register_schema(scan_v1(), scan_spec())?;
    runtime.register_schema(scan_v2(), scan_spec())
}

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

//! Shared identifier types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Name of a logical channel, e.g. `lidar/scan`.
pub type ChannelName = String;

/// Identifier of a module instance.
///
/// Ids are generated once per [`start`](crate::module::LifecycleManager::start) and kept
/// across restarts of the same instance. The textual form is a type-prefixed UUIDv7
/// (`mod_01h...`), which sorts by creation time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    /// Generates a fresh, unique instance id.
    #[must_use]
    pub fn generate() -> Self {
        use mti::prelude::*;
        Self("mod".create_type_id::<V7>().to_string())
    }

    /// Wraps an existing id string.
    #[must_use]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The string form of the id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InstanceId {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

/// Checks that a channel name is usable: non-empty, no whitespace, and made of
/// `/`-separated non-empty segments.
#[must_use]
pub fn is_valid_channel_name(name: &str) -> bool {
    !name.is_empty()
        && !name.chars().any(char::is_whitespace)
        && name.split('/').all(|segment| !segment.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique_and_prefixed() {
        let a = InstanceId::generate();
        let b = InstanceId::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("mod_"));
    }

    #[test]
    fn channel_name_rules() {
        assert!(is_valid_channel_name("lidar/scan"));
        assert!(is_valid_channel_name("$health"));
        assert!(!is_valid_channel_name(""));
        assert!(!is_valid_channel_name("lidar//scan"));
        assert!(!is_valid_channel_name("/lidar"));
        assert!(!is_valid_channel_name("lidar scan"));
    }
}

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

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use semver::Version;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, trace};

use crate::common::{ArmatureError, ArmatureResult};
use crate::message::schema::{check_successor, EncodingSpec, Format, SchemaId};

/// Registry of versioned message schemas.
///
/// Versions are grouped per schema name. Registering a version runs the
/// compatibility check against its neighbours in the same major line and inserts it
/// under the name's shard lock, so concurrent registrations of one name are
/// serialized.
///
/// # Example
///
/// ```rust,ignore
/// let registry = SchemaRegistry::new();
/// registry.register(
///     "scan@1.0.0".parse()?,
///     EncodingSpec::json().required("ranges", FieldKind::Array),
/// )?;
/// let bytes = registry.encode(&"scan@1.0.0".parse()?, &json!({"ranges": [1.0]}))?;
/// ```
#[derive(Default)]
pub struct SchemaRegistry {
    schemas: DashMap<String, BTreeMap<Version, Arc<EncodingSpec>>>,
}

impl std::fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaRegistry")
            .field("registered_schemas", &self.len())
            .finish()
    }
}

impl SchemaRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a schema version.
    ///
    /// # Errors
    ///
    /// - [`ArmatureError::DuplicateSchema`] if the exact id is already registered.
    /// - [`ArmatureError::IncompatibleSchema`] if the spec breaks the rules of its
    ///   major line relative to the closest lower or higher registered version.
    pub fn register(&self, id: SchemaId, spec: EncodingSpec) -> ArmatureResult<()> {
        let mut versions = self.schemas.entry(id.name().to_string()).or_default();
        let version = id.version().clone();

        if versions.contains_key(&version) {
            return Err(ArmatureError::DuplicateSchema(id.to_string()));
        }

        let incompatible = |reason: String| ArmatureError::IncompatibleSchema {
            schema: id.to_string(),
            reason,
        };

        let lower = versions
            .range(..&version)
            .rev()
            .find(|(existing, _)| existing.major == version.major);
        if let Some((lower_version, lower_spec)) = lower {
            check_successor((lower_version, lower_spec), (&version, &spec))
                .map_err(incompatible)?;
        }

        let higher = versions
            .range(&version..)
            .find(|(existing, _)| existing.major == version.major);
        if let Some((higher_version, higher_spec)) = higher {
            check_successor((&version, &spec), (higher_version, higher_spec))
                .map_err(incompatible)?;
        }

        versions.insert(version, Arc::new(spec));
        debug!(schema = %id, "registered schema");
        Ok(())
    }

    /// Whether the exact id is registered.
    #[must_use]
    pub fn contains(&self, id: &SchemaId) -> bool {
        self.schemas
            .get(id.name())
            .is_some_and(|versions| versions.contains_key(id.version()))
    }

    /// The encoding spec registered under `id`.
    #[must_use]
    pub fn spec(&self, id: &SchemaId) -> Option<Arc<EncodingSpec>> {
        self.schemas
            .get(id.name())
            .and_then(|versions| versions.get(id.version()).cloned())
    }

    /// All registered ids, sorted by name and version.
    #[must_use]
    pub fn schema_ids(&self) -> Vec<SchemaId> {
        let mut ids: Vec<SchemaId> = self
            .schemas
            .iter()
            .flat_map(|entry| {
                let name = entry.key().clone();
                entry
                    .value()
                    .keys()
                    .map(|version| SchemaId::new(name.clone(), version.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();
        ids.sort();
        ids
    }

    /// Number of registered schema versions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.schemas.iter().map(|entry| entry.value().len()).sum()
    }

    /// Whether no schema is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn require(&self, id: &SchemaId) -> ArmatureResult<Arc<EncodingSpec>> {
        self.spec(id)
            .ok_or_else(|| ArmatureError::UnknownSchema(id.to_string()))
    }

    /// Validates `value` and serializes it in the schema's wire format.
    ///
    /// # Errors
    ///
    /// [`ArmatureError::UnknownSchema`] or [`ArmatureError::SchemaMismatch`].
    pub fn encode(&self, id: &SchemaId, value: &Value) -> ArmatureResult<Vec<u8>> {
        let spec = self.require(id)?;
        let mismatch = |reason: String| ArmatureError::SchemaMismatch {
            schema: id.to_string(),
            reason,
        };
        spec.validate(value).map_err(mismatch)?;

        let bytes = match spec.format {
            Format::Json => serde_json::to_vec(value).map_err(|e| mismatch(e.to_string()))?,
            Format::MessagePack => {
                rmp_serde::to_vec_named(value).map_err(|e| mismatch(e.to_string()))?
            }
        };
        trace!(schema = %id, len = bytes.len(), "encoded payload");
        Ok(bytes)
    }

    /// Parses bytes in the schema's wire format and validates the result.
    ///
    /// Fields the schema does not declare are dropped rather than rejected, so a
    /// reader on `1.0.0` accepts payloads written under `1.1.0`.
    ///
    /// # Errors
    ///
    /// [`ArmatureError::UnknownSchema`] or [`ArmatureError::DecodeError`].
    pub fn decode(&self, id: &SchemaId, bytes: &[u8]) -> ArmatureResult<Value> {
        let spec = self.require(id)?;
        let decode_error = |reason: String| ArmatureError::DecodeError {
            schema: id.to_string(),
            reason,
        };

        let mut value: Value = match spec.format {
            Format::Json => serde_json::from_slice(bytes).map_err(|e| decode_error(e.to_string()))?,
            Format::MessagePack => {
                rmp_serde::from_slice(bytes).map_err(|e| decode_error(e.to_string()))?
            }
        };
        spec.validate_lenient(&mut value).map_err(decode_error)?;
        Ok(value)
    }

    /// Encodes any serializable value through the same validation as [`encode`](Self::encode).
    ///
    /// # Errors
    ///
    /// [`ArmatureError::UnknownSchema`] or [`ArmatureError::SchemaMismatch`].
    pub fn encode_typed<T: Serialize>(&self, id: &SchemaId, value: &T) -> ArmatureResult<Vec<u8>> {
        let value = serde_json::to_value(value).map_err(|e| ArmatureError::SchemaMismatch {
            schema: id.to_string(),
            reason: e.to_string(),
        })?;
        self.encode(id, &value)
    }

    /// Decodes bytes into a concrete type.
    ///
    /// # Errors
    ///
    /// [`ArmatureError::UnknownSchema`] or [`ArmatureError::DecodeError`].
    pub fn decode_typed<T: DeserializeOwned>(&self, id: &SchemaId, bytes: &[u8]) -> ArmatureResult<T> {
        let value = self.decode(id, bytes)?;
        serde_json::from_value(value).map_err(|e| ArmatureError::DecodeError {
            schema: id.to_string(),
            reason: e.to_string(),
        })
    }
}

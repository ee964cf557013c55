//! Message envelopes, versioned schemas and the schema registry.
//!
//! *   [`Message`]: the immutable envelope handed from a producer to every subscriber.
//! *   [`SchemaId`] and [`EncodingSpec`]: versioned wire contracts.
//! *   [`SchemaRegistry`]: registration with compatibility checks, plus encode/decode.
//! *   [`HealthSignal`]: the payload of the reserved [`HEALTH_CHANNEL`].

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

// --- Public Re-exports ---
pub use envelope::Message;
pub use health::{
    health_schema_id, health_schema_spec, HealthSignal, HealthStatus, HEALTH_CHANNEL,
    HEALTH_SCHEMA_NAME,
};
pub use registry::SchemaRegistry;
pub use schema::{EncodingSpec, FieldKind, FieldSpec, Format, SchemaId, SchemaIdParseError};

// --- Submodules ---

/// Defines [`Message`].
mod envelope;
/// Defines the health signal payload and its schema.
mod health;
/// Defines [`SchemaRegistry`].
mod registry;
/// Defines schema ids, field specs and the compatibility rules.
mod schema;

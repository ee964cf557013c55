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

//! Error taxonomy for the Armature runtime.

use std::fmt;

use crate::common::{ChannelName, InstanceId};

/// Errors reported by the schema registry, channel directory, routing engine,
/// lifecycle manager and fault monitor.
///
/// Registration and load errors fail a single attempt and are returned to the caller.
/// [`ArmatureError::DescriptorStoreCorrupt`] and [`ArmatureError::ChannelAtRisk`] are
/// the only fatal variants (see [`ArmatureError::is_fatal`]); they are surfaced to the
/// operator instead of being resolved automatically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArmatureError {
    /// A module descriptor is malformed or references unknown schemas or modules.
    InvalidDescriptor(String),

    /// A schema with the exact same id is already registered.
    DuplicateSchema(String),

    /// A new schema version is not wire-compatible with an existing version of the
    /// same major line.
    IncompatibleSchema {
        /// The schema being registered.
        schema: String,
        /// Why the compatibility check failed.
        reason: String,
    },

    /// A value does not match the field layout of its schema.
    SchemaMismatch {
        /// The schema the value was checked against.
        schema: String,
        /// The first violation found.
        reason: String,
    },

    /// A publisher or subscriber tried to join a channel with a different schema.
    SchemaConflict {
        /// The channel name.
        channel: ChannelName,
        /// The schema the channel was created with.
        expected: String,
        /// The schema offered by the registrant.
        found: String,
    },

    /// No instance with the given id is known to the lifecycle manager.
    UnknownInstance(InstanceId),

    /// A `BlockProducer` subscriber did not free space before its timeout expired.
    DeliveryTimeout {
        /// The channel being published on.
        channel: ChannelName,
        /// The subscriber that timed out.
        subscriber: InstanceId,
    },

    /// Bytes could not be decoded with the given schema.
    DecodeError {
        /// The schema used for decoding.
        schema: String,
        /// The underlying failure.
        reason: String,
    },

    /// The schema id is not registered.
    UnknownSchema(String),

    /// The channel does not exist or the caller is not registered on it.
    UnknownChannel(ChannelName),

    /// The channel name is reserved for the runtime.
    ReservedChannel(ChannelName),

    /// The restart budget of an instance is exhausted; the instance is pinned.
    RestartLimitExceeded {
        /// The pinned instance.
        instance: InstanceId,
        /// Restarts counted within the window.
        attempts: usize,
    },

    /// The descriptor store could not be read consistently.
    DescriptorStoreCorrupt(String),

    /// A channel stayed at risk longer than the configured ceiling.
    ChannelAtRisk(ChannelName),
}

impl ArmatureError {
    /// Returns `true` for conditions that require operator intervention.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::DescriptorStoreCorrupt(_) | Self::ChannelAtRisk(_)
        )
    }
}

impl fmt::Display for ArmatureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidDescriptor(reason) => write!(f, "Invalid descriptor: {reason}"),
            Self::DuplicateSchema(schema) => write!(f, "Schema already registered: {schema}"),
            Self::IncompatibleSchema { schema, reason } => {
                write!(f, "Incompatible schema {schema}: {reason}")
            }
            Self::SchemaMismatch { schema, reason } => {
                write!(f, "Value does not match schema {schema}: {reason}")
            }
            Self::SchemaConflict {
                channel,
                expected,
                found,
            } => write!(
                f,
                "Schema conflict on channel '{channel}': channel carries {expected}, got {found}"
            ),
            Self::UnknownInstance(id) => write!(f, "Unknown instance: {id}"),
            Self::DeliveryTimeout {
                channel,
                subscriber,
            } => write!(
                f,
                "Delivery to {subscriber} on channel '{channel}' timed out"
            ),
            Self::DecodeError { schema, reason } => {
                write!(f, "Failed to decode {schema}: {reason}")
            }
            Self::UnknownSchema(schema) => write!(f, "Unknown schema: {schema}"),
            Self::UnknownChannel(channel) => write!(f, "Unknown channel: {channel}"),
            Self::ReservedChannel(channel) => write!(f, "Channel '{channel}' is reserved"),
            Self::RestartLimitExceeded { instance, attempts } => write!(
                f,
                "Restart limit exceeded for {instance} after {attempts} attempts"
            ),
            Self::DescriptorStoreCorrupt(reason) => {
                write!(f, "Descriptor store corrupt: {reason}")
            }
            Self::ChannelAtRisk(channel) => write!(f, "Channel '{channel}' is at risk"),
        }
    }
}

impl std::error::Error for ArmatureError {}

/// Convenience alias used throughout the crate.
pub type ArmatureResult<T> = Result<T, ArmatureError>;

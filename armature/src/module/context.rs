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

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::common::{ArmatureError, ArmatureResult, ChannelName, InstanceId};
use crate::message::{HealthSignal, HealthStatus, SchemaRegistry};
use crate::module::ModuleDescriptor;
use crate::routing::{PublishReport, Publisher, Subscription};
use crate::traits::ArmatureMessage;

/// Everything a running module instance may touch.
///
/// Built fresh by the lifecycle manager for every start and restart. It exposes one
/// [`Publisher`] per declared output, one [`Subscription`] per declared input, the
/// health reporter and the instance's cancellation token.
#[derive(Debug)]
pub struct ModuleContext {
    id: InstanceId,
    descriptor: Arc<ModuleDescriptor>,
    registry: Arc<SchemaRegistry>,
    publishers: HashMap<ChannelName, Publisher>,
    subscriptions: HashMap<ChannelName, Subscription>,
    health: Publisher,
    cancellation_token: CancellationToken,
}

impl ModuleContext {
    pub(crate) fn new(
        id: InstanceId,
        descriptor: Arc<ModuleDescriptor>,
        registry: Arc<SchemaRegistry>,
        publishers: HashMap<ChannelName, Publisher>,
        subscriptions: HashMap<ChannelName, Subscription>,
        health: Publisher,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            id,
            descriptor,
            registry,
            publishers,
            subscriptions,
            health,
            cancellation_token,
        }
    }

    /// This instance's id; stable across restarts.
    #[must_use]
    pub const fn id(&self) -> &InstanceId {
        &self.id
    }

    /// The descriptor the instance was started from.
    #[must_use]
    pub fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    /// The schema registry, for decoding received messages.
    #[must_use]
    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// The publisher of a declared output.
    ///
    /// # Errors
    ///
    /// [`ArmatureError::UnknownChannel`] if `channel` is not a declared output.
    pub fn publisher(&self, channel: &str) -> ArmatureResult<&Publisher> {
        self.publishers
            .get(channel)
            .ok_or_else(|| ArmatureError::UnknownChannel(channel.to_string()))
    }

    /// The subscription of a declared input.
    ///
    /// # Errors
    ///
    /// [`ArmatureError::UnknownChannel`] if `channel` is not a declared input.
    pub fn subscription(&self, channel: &str) -> ArmatureResult<Subscription> {
        self.subscriptions
            .get(channel)
            .cloned()
            .ok_or_else(|| ArmatureError::UnknownChannel(channel.to_string()))
    }

    /// Publishes a dynamic value on a declared output.
    ///
    /// # Errors
    ///
    /// See [`Publisher::publish`].
    pub async fn publish(&self, channel: &str, value: &Value) -> ArmatureResult<PublishReport> {
        self.publisher(channel)?.publish(value).await
    }

    /// Publishes a typed message on a declared output.
    ///
    /// # Errors
    ///
    /// See [`Publisher::publish_typed`].
    pub async fn publish_typed<T>(&self, channel: &str, message: &T) -> ArmatureResult<PublishReport>
    where
        T: ArmatureMessage + Serialize,
    {
        self.publisher(channel)?.publish_typed(message).await
    }

    /// Emits a health signal on the reserved health channel.
    ///
    /// # Errors
    ///
    /// [`ArmatureError::UnknownChannel`] once the instance has been deregistered.
    pub async fn report_health(&self, status: HealthStatus, diagnostic: Option<String>) -> ArmatureResult<()> {
        let signal = HealthSignal::now(self.id.clone(), status, diagnostic);
        self.health.publish_typed(&signal).await.map(|_| ())
    }

    /// The token cancelled when the instance is asked to stop.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Whether a stop was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// Completes when a stop is requested.
    pub async fn cancelled(&self) {
        self.cancellation_token.cancelled().await;
    }
}

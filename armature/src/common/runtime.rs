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

use std::path::Path;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

use crate::common::{ArmatureConfig, ArmatureResult, ChannelName, InstanceId};
use crate::message::{EncodingSpec, SchemaId, SchemaRegistry};
use crate::module::{DescriptorStore, InstanceInfo, LifecycleManager, ModuleDescriptor};
use crate::routing::{ChannelDirectory, ChannelInfo, Router};
use crate::supervision::{FatalCondition, MonitorHandle};
use crate::traits::ModuleFactory;

#[derive(Debug)]
pub(crate) struct RuntimeInner {
    pub(crate) config: ArmatureConfig,
    pub(crate) registry: Arc<SchemaRegistry>,
    pub(crate) directory: Arc<ChannelDirectory>,
    pub(crate) router: Arc<Router>,
    pub(crate) lifecycle: LifecycleManager,
    pub(crate) monitor: MonitorHandle,
}

/// A running Armature system.
///
/// Returned by [`ArmatureApp::launch_async`](crate::common::ArmatureApp::launch_async).
/// Owns the schema registry, the channel directory, the router, the lifecycle manager and
/// the fault monitor; everything an administrative surface needs goes through here.
/// Cheap to clone.
#[derive(Debug, Clone)]
pub struct Runtime(pub(crate) Arc<RuntimeInner>);

impl Runtime {
    /// The configuration the runtime was launched with.
    #[must_use]
    pub fn config(&self) -> &ArmatureConfig {
        &self.0.config
    }

    /// The schema registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.0.registry
    }

    /// The channel directory.
    #[must_use]
    pub fn directory(&self) -> &Arc<ChannelDirectory> {
        &self.0.directory
    }

    /// The router.
    #[must_use]
    pub fn router(&self) -> &Arc<Router> {
        &self.0.router
    }

    /// The lifecycle manager.
    #[must_use]
    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.0.lifecycle
    }

    /// The fault monitor.
    #[must_use]
    pub fn monitor(&self) -> &MonitorHandle {
        &self.0.monitor
    }

    /// Registers a schema version.
    ///
    /// # Errors
    ///
    /// See [`SchemaRegistry::register`].
    pub fn register_schema(&self, id: SchemaId, spec: EncodingSpec) -> ArmatureResult<()> {
        self.0.registry.register(id, spec)
    }

    /// Registers the factory for descriptors named `name`.
    pub fn register_module(&self, name: impl Into<String>, factory: impl ModuleFactory) {
        self.0.lifecycle.register_module(name, factory);
    }

    /// Starts an instance of `descriptor`.
    ///
    /// # Errors
    ///
    /// See [`LifecycleManager::start`].
    pub async fn start(&self, descriptor: ModuleDescriptor) -> ArmatureResult<InstanceId> {
        self.0.lifecycle.start(descriptor).await
    }

    /// Stops an instance.
    ///
    /// # Errors
    ///
    /// See [`LifecycleManager::stop`].
    pub async fn stop(&self, id: &InstanceId) -> ArmatureResult<()> {
        self.0.lifecycle.stop(id).await
    }

    /// Restarts an instance.
    ///
    /// # Errors
    ///
    /// See [`LifecycleManager::restart`].
    pub async fn restart(&self, id: &InstanceId) -> ArmatureResult<()> {
        self.0.lifecycle.restart(id).await
    }

    /// Loads a descriptor store. A corrupt store is also raised as a fatal condition.
    ///
    /// # Errors
    ///
    /// [`DescriptorStoreCorrupt`](crate::common::ArmatureError::DescriptorStoreCorrupt).
    pub fn load_descriptors(&self, dir: &Path) -> ArmatureResult<DescriptorStore> {
        DescriptorStore::load_dir(dir).inspect_err(|e| {
            if e.is_fatal() {
                self.0.monitor.report_fatal(e.clone());
            }
        })
    }

    /// Starts one instance per descriptor in `store`, in
    /// [`start_order`](DescriptorStore::start_order). A failing descriptor does not
    /// prevent the others from starting; results come back in the same order.
    #[instrument(skip(self, store), fields(descriptors = store.len()))]
    pub async fn start_all(
        &self,
        store: &DescriptorStore,
    ) -> Vec<(String, ArmatureResult<InstanceId>)> {
        let mut results = Vec::with_capacity(store.len());
        for descriptor in store.start_order() {
            let result = self.0.lifecycle.start_shared(Arc::clone(&descriptor)).await;
            if let Err(e) = &result {
                warn!(module = %descriptor.name, error = %e, "module did not start");
            }
            results.push((descriptor.name.clone(), result));
        }
        results
    }

    /// Snapshot of every instance.
    #[must_use]
    pub fn instances(&self) -> Vec<InstanceInfo> {
        self.0.lifecycle.instances()
    }

    /// Snapshot of every live channel.
    #[must_use]
    pub fn channels(&self) -> Vec<ChannelInfo> {
        self.0.directory.channels()
    }

    /// Channels currently marked at risk.
    #[must_use]
    pub fn at_risk_channels(&self) -> Vec<ChannelName> {
        self.0.monitor.at_risk_channels()
    }

    /// Lifts the at-risk mark of `channel`.
    pub fn clear_at_risk(&self, channel: &str) -> bool {
        self.0.monitor.clear_at_risk(channel)
    }

    /// Fatal conditions raised so far.
    #[must_use]
    pub fn fatal_conditions(&self) -> Vec<FatalCondition> {
        self.0.monitor.fatal_conditions()
    }

    /// Receiver of fatal conditions raised from now on.
    #[must_use]
    pub fn subscribe_fatal(&self) -> broadcast::Receiver<FatalCondition> {
        self.0.monitor.subscribe_fatal()
    }

    /// Stops the monitor and every instance, then tears the directory down.
    ///
    /// # Errors
    ///
    /// Returns an error if some instance did not stop within
    /// `timeouts.system_shutdown_ms`; the directory is torn down regardless.
    pub async fn shutdown_all(&self) -> anyhow::Result<()> {
        info!("shutting down armature runtime");
        self.0.monitor.shutdown().await;
        let clean = self.0.lifecycle.stop_all().await;
        self.0.directory.teardown();

        if !clean {
            error!("armature runtime shut down with instances still running");
            anyhow::bail!(
                "instances did not stop within {:?}",
                self.0.config.timeouts.system_shutdown()
            );
        }
        debug!("armature runtime shut down");
        Ok(())
    }
}

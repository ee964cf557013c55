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

use tracing::trace;

use crate::common::runtime::RuntimeInner;
use crate::common::{ArmatureConfig, ArmatureResult, Runtime};
use crate::message::{health_schema_id, health_schema_spec, SchemaRegistry};
use crate::module::LifecycleManager;
use crate::routing::{ChannelDirectory, Router};
use crate::supervision::FaultMonitor;

/// Entry point for bringing an Armature system up.
///
/// Each launch builds its own registry, directory and monitor; nothing is global.
#[derive(Default, Debug, Clone)]
pub struct ArmatureApp;

impl ArmatureApp {
    /// Launches a runtime with the configuration from
    /// `$XDG_CONFIG_HOME/armature/config.toml`, or defaults.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// ```rust,ignore
    /// use armature::prelude::*;
    ///
    /// #[armature_main]
    /// async fn main() -> anyhow::Result<()> {
    ///     let runtime = ArmatureApp::launch_async().await?;
    ///     // register schemas and modules, start instances...
    ///     runtime.shutdown_all().await
    /// }
    /// ```
    ///
    /// # Errors
    ///
    /// See [`launch_with_config`](Self::launch_with_config).
    pub async fn launch_async() -> ArmatureResult<Runtime> {
        let config = ArmatureConfig::load();
        trace!("Configuration loaded: {:?}", config);
        Self::launch_with_config(config).await
    }

    /// Launches a runtime with an explicit configuration.
    ///
    /// Registers the `$health` schema and spawns the fault monitor.
    ///
    /// # Errors
    ///
    /// Fails only if the health schema or the monitor's `$health` subscription cannot
    /// be registered.
    pub async fn launch_with_config(config: ArmatureConfig) -> ArmatureResult<Runtime> {
        trace!("Starting Armature system initialization");

        let registry = Arc::new(SchemaRegistry::new());
        registry.register(health_schema_id(), health_schema_spec())?;

        let directory = Arc::new(ChannelDirectory::new());
        let router = Arc::new(Router::new(Arc::clone(&registry), Arc::clone(&directory)));
        let lifecycle = LifecycleManager::new(
            config.clone(),
            Arc::clone(&registry),
            Arc::clone(&directory),
            Arc::clone(&router),
        );
        let monitor = FaultMonitor::spawn(
            lifecycle.clone(),
            Arc::clone(&directory),
            Arc::clone(&registry),
            &config,
        )?;

        trace!("Armature system initialization complete");
        Ok(Runtime(Arc::new(RuntimeInner {
            config,
            registry,
            directory,
            router,
            lifecycle,
            monitor,
        })))
    }
}

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

use async_trait::async_trait;

use crate::module::ModuleContext;

/// A unit of functionality run by the lifecycle manager.
///
/// `run` is the whole life of one instance: it reads its subscriptions, publishes on
/// its outputs and returns when the context's cancellation token fires. Returning
/// `Ok` before cancellation is an unrequested exit; returning `Err` or panicking
/// marks the instance `Failed`.
///
/// ```rust,ignore
/// struct Relay;
///
/// #[async_trait]
/// impl Module for Relay {
///     async fn run(&mut self, ctx: ModuleContext) -> anyhow::Result<()> {
///         let input = ctx.subscription("lidar/scan")?;
///         let output = ctx.publisher("lidar/relay")?;
///         loop {
///             tokio::select! {
///                 () = ctx.cancelled() => return Ok(()),
///                 Some(message) = input.recv() => {
///                     output.publish(&message.decode(ctx.registry())?).await?;
///                 }
///             }
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait Module: Send + 'static {
    /// Runs the instance until cancellation or failure.
    async fn run(&mut self, ctx: ModuleContext) -> anyhow::Result<()>;
}

/// Builds a fresh module value for every start and restart of an instance.
///
/// Closures returning a [`Module`] implement this trait.
pub trait ModuleFactory: Send + Sync + 'static {
    /// Creates the module value.
    ///
    /// # Errors
    ///
    /// Whatever prevents the module from being built; the start attempt fails.
    fn create(&self) -> anyhow::Result<Box<dyn Module>>;
}

impl<F, M> ModuleFactory for F
where
    F: Fn() -> M + Send + Sync + 'static,
    M: Module,
{
    fn create(&self) -> anyhow::Result<Box<dyn Module>> {
        Ok(Box::new(self()))
    }
}

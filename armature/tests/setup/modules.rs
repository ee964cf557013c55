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

use armature::prelude::*;
use tokio::sync::{mpsc, Mutex};

use crate::setup::messages::{Scan, SCAN_CHANNEL};

/// Waits for its stop request.
pub struct Idle;

#[async_trait]
impl Module for Idle {
    async fn run(&mut self, ctx: ModuleContext) -> anyhow::Result<()> {
        ctx.cancelled().await;
        Ok(())
    }
}

/// Never looks at its cancellation token.
pub struct Stubborn;

#[async_trait]
impl Module for Stubborn {
    async fn run(&mut self, _ctx: ModuleContext) -> anyhow::Result<()> {
        std::future::pending::<()>().await;
        Ok(())
    }
}

/// Returns an error straight away.
pub struct Failing;

#[async_trait]
impl Module for Failing {
    async fn run(&mut self, _ctx: ModuleContext) -> anyhow::Result<()> {
        Err(anyhow::anyhow!("sensor offline"))
    }
}

/// Finishes its work and returns.
pub struct OneShot;

#[async_trait]
impl Module for OneShot {
    async fn run(&mut self, _ctx: ModuleContext) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Publishes `count` numbered scans, then idles.
pub struct Scanner {
    pub count: u64,
}

#[async_trait]
impl Module for Scanner {
    async fn run(&mut self, ctx: ModuleContext) -> anyhow::Result<()> {
        for seq in 1..=self.count {
            ctx.publish_typed(SCAN_CHANNEL, &Scan::numbered(seq)).await?;
        }
        ctx.cancelled().await;
        Ok(())
    }
}

/// Records the `seq` of every scan it receives.
pub struct Recorder {
    pub seen: Arc<parking_lot::Mutex<Vec<u64>>>,
}

#[async_trait]
impl Module for Recorder {
    async fn run(&mut self, ctx: ModuleContext) -> anyhow::Result<()> {
        let scans = ctx.subscription(SCAN_CHANNEL)?;
        loop {
            tokio::select! {
                () = ctx.cancelled() => return Ok(()),
                received = scans.recv_typed::<Scan>(ctx.registry()) => match received {
                    Some(scan) => self.seen.lock().push(scan?.seq),
                    None => return Ok(()),
                },
            }
        }
    }
}

/// Reports whatever health status the test feeds it.
///
/// The command queue is shared by every incarnation of the module, so a restarted
/// instance keeps listening to the same test.
pub struct Scripted {
    pub commands: Arc<Mutex<mpsc::UnboundedReceiver<HealthStatus>>>,
}

impl Scripted {
    pub fn factory() -> (mpsc::UnboundedSender<HealthStatus>, impl Fn() -> Scripted + Send + Sync + 'static) {
        let (tx, rx) = mpsc::unbounded_channel();
        let commands = Arc::new(Mutex::new(rx));
        (tx, move || Scripted {
            commands: Arc::clone(&commands),
        })
    }
}

#[async_trait]
impl Module for Scripted {
    async fn run(&mut self, ctx: ModuleContext) -> anyhow::Result<()> {
        let mut commands = self.commands.lock().await;
        loop {
            tokio::select! {
                () = ctx.cancelled() => return Ok(()),
                command = commands.recv() => match command {
                    Some(status) => ctx.report_health(status, Some(format!("scripted {status}"))).await?,
                    None => return Ok(()),
                },
            }
        }
    }
}

/// Panics on start.
pub struct Panicking;

#[async_trait]
impl Module for Panicking {
    async fn run(&mut self, _ctx: ModuleContext) -> anyhow::Result<()> {
        panic!("lidar driver crashed");
    }
}

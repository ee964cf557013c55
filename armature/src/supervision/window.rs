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

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

/// Consecutive `Warn` signals of one instance inside a rolling window.
#[derive(Debug, Clone)]
pub(crate) struct HealthWindow {
    window: Duration,
    warnings: VecDeque<Instant>,
}

impl HealthWindow {
    pub(crate) const fn new(window: Duration) -> Self {
        Self {
            window,
            warnings: VecDeque::new(),
        }
    }

    /// Records a warning and returns how many fall inside the window.
    pub(crate) fn record_warn(&mut self) -> usize {
        let now = Instant::now();
        self.warnings.push_back(now);
        self.prune(now);
        self.warnings.len()
    }

    /// Anything other than a warning breaks the run.
    pub(crate) fn reset(&mut self) {
        self.warnings.clear();
    }

    fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.warnings.front() {
            if now.duration_since(*oldest) > self.window {
                self.warnings.pop_front();
            } else {
                break;
            }
        }
    }
}

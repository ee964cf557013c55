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

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::FmtSubscriber;

use crate::common::config::TracingConfig;

/// Expands a leading `~/` against `$HOME`.
fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), std::env::var_os("HOME")) {
        (Some(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => PathBuf::from(path),
    }
}

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over [`TracingConfig::level`]. With
/// `log_to_file` set, output goes through a non-blocking rolling file writer in
/// `log_directory`; otherwise to stdout. The returned guard must be kept alive for
/// buffered lines to be flushed.
///
/// Installing twice is not an error: the second subscriber is discarded.
pub fn init_tracing(config: &TracingConfig, log_directory: &str) -> WorkerGuard {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    let (writer, guard) = if config.log_to_file {
        let appender = RollingFileAppender::new(
            Rotation::DAILY,
            expand_home(log_directory),
            config.log_file_prefix.as_str(),
        );
        tracing_appender::non_blocking(appender)
    } else {
        tracing_appender::non_blocking(std::io::stdout())
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_thread_ids(true)
        .with_target(true)
        .with_line_number(true)
        .with_ansi(!config.log_to_file)
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::debug!("global tracing subscriber already installed");
    }
    guard
}

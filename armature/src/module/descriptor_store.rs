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
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::common::{ArmatureError, ArmatureResult};
use crate::module::ModuleDescriptor;

/// A descriptor file that could not be loaded. Only that module is affected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorLoadFailure {
    /// The offending file.
    pub path: PathBuf,
    /// Why it was rejected.
    pub error: ArmatureError,
}

/// Descriptors loaded from a directory of `*.toml` files, keyed by module name.
#[derive(Debug, Clone, Default)]
pub struct DescriptorStore {
    descriptors: BTreeMap<String, Arc<ModuleDescriptor>>,
    failures: Vec<DescriptorLoadFailure>,
}

impl DescriptorStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every `*.toml` file in `dir`, in file name order.
    ///
    /// A malformed file is recorded in [`failures`](Self::failures) and skipped.
    ///
    /// # Errors
    ///
    /// [`ArmatureError::DescriptorStoreCorrupt`] if the directory cannot be listed or
    /// two files declare the same module name.
    pub fn load_dir(dir: &Path) -> ArmatureResult<Self> {
        let corrupt = |reason: String| {
            error!(directory = %dir.display(), %reason, "descriptor store corrupt");
            ArmatureError::DescriptorStoreCorrupt(reason)
        };

        let listing = std::fs::read_dir(dir).map_err(|e| corrupt(format!("{}: {e}", dir.display())))?;
        let mut paths = Vec::new();
        for entry in listing {
            let entry = entry.map_err(|e| corrupt(format!("{}: {e}", dir.display())))?;
            let path = entry.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "toml") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut store = Self::new();
        let mut origins: BTreeMap<String, PathBuf> = BTreeMap::new();
        for path in paths {
            match ModuleDescriptor::from_path(&path) {
                Ok(descriptor) => {
                    if let Some(first) = origins.get(&descriptor.name) {
                        return Err(corrupt(format!(
                            "module '{}' declared by both {} and {}",
                            descriptor.name,
                            first.display(),
                            path.display()
                        )));
                    }
                    debug!(module = %descriptor.name, path = %path.display(), "loaded descriptor");
                    origins.insert(descriptor.name.clone(), path);
                    store
                        .descriptors
                        .insert(descriptor.name.clone(), Arc::new(descriptor));
                }
                Err(error) => {
                    warn!(path = %path.display(), %error, "skipping invalid descriptor");
                    store.failures.push(DescriptorLoadFailure { path, error });
                }
            }
        }

        info!(
            directory = %dir.display(),
            loaded = store.descriptors.len(),
            failed = store.failures.len(),
            "descriptor store loaded"
        );
        Ok(store)
    }

    /// Adds a descriptor built in code.
    ///
    /// # Errors
    ///
    /// [`ArmatureError::InvalidDescriptor`] if the structure is invalid or the name is taken.
    pub fn insert(&mut self, descriptor: ModuleDescriptor) -> ArmatureResult<Arc<ModuleDescriptor>> {
        descriptor.check_structure()?;
        if self.descriptors.contains_key(&descriptor.name) {
            return Err(ArmatureError::InvalidDescriptor(format!(
                "module '{}' already present",
                descriptor.name
            )));
        }
        let descriptor = Arc::new(descriptor);
        self.descriptors
            .insert(descriptor.name.clone(), Arc::clone(&descriptor));
        Ok(descriptor)
    }

    /// The descriptor of module `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<ModuleDescriptor>> {
        self.descriptors.get(name).cloned()
    }

    /// All descriptors, sorted by module name.
    pub fn descriptors(&self) -> impl Iterator<Item = &Arc<ModuleDescriptor>> {
        self.descriptors.values()
    }

    /// Descriptors in the order [`Runtime::start_all`](crate::common::Runtime::start_all)
    /// starts them: modules with inputs first, then pure sources, each group sorted by
    /// name. Sources come last so their first messages find their subscribers.
    #[must_use]
    pub fn start_order(&self) -> Vec<Arc<ModuleDescriptor>> {
        let (sinks, sources): (Vec<_>, Vec<_>) = self
            .descriptors
            .values()
            .cloned()
            .partition(|descriptor| descriptor.input_channels().next().is_some());
        sinks.into_iter().chain(sources).collect()
    }

    /// Files that failed to load.
    #[must_use]
    pub fn failures(&self) -> &[DescriptorLoadFailure] {
        &self.failures
    }

    /// Number of loaded descriptors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Whether no descriptor was loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

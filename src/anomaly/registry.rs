use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use log::{debug, info, warn};

use super::detector::{Detector, Runner, ScriptDetector};
use crate::error::{DetectorError, SentinelError};

/// Immutable name → detector mapping, built once at startup.
pub struct DetectorRegistry {
    detectors: BTreeMap<String, Arc<dyn Detector>>,
}

/// Collects detectors; the first detector registered under a name wins.
#[derive(Default)]
pub struct RegistryBuilder {
    detectors: BTreeMap<String, Arc<dyn Detector>>,
}

impl RegistryBuilder {
    /// Adds a detector unless its name is already taken.
    ///
    /// Returns whether the detector was registered.
    pub fn register(&mut self, detector: Arc<dyn Detector>) -> bool {
        let name = detector.name().to_string();
        if self.detectors.contains_key(&name) {
            warn!("Detector {name} already registered, skipping");
            return false;
        }

        info!("Registered anomaly detector: {name}");
        self.detectors.insert(name, detector);
        true
    }

    pub fn with(mut self, detector: Arc<dyn Detector>) -> Self {
        self.register(detector);
        self
    }

    pub fn build(self) -> DetectorRegistry {
        DetectorRegistry {
            detectors: self.detectors,
        }
    }
}

impl DetectorRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Registers every detector script found directly inside `directory`.
    ///
    /// Subdirectories, files without one of `extensions`, and files starting
    /// with `_` or `.` are skipped. Entries are visited in file-name order so
    /// the winner of a name collision (e.g. `zscore.py` vs `zscore.sh`) does
    /// not depend on the filesystem.
    ///
    /// # Errors
    ///
    /// Returns `SentinelError::Discovery` if the directory is missing or
    /// unreadable.
    pub fn discover(
        directory: &Path,
        runner: &Runner,
        extensions: &[String],
    ) -> Result<Self, SentinelError> {
        if directory.as_os_str().is_empty() {
            return Err(SentinelError::Discovery(
                "detector directory not specified".to_string(),
            ));
        }
        if !directory.is_dir() {
            return Err(SentinelError::Discovery(format!(
                "detector directory does not exist: {}",
                directory.display()
            )));
        }

        info!("Discovering anomaly detectors in {}", directory.display());

        let mut entries = fs::read_dir(directory)
            .map_err(|e| {
                SentinelError::Discovery(format!(
                    "failed to read detector directory {}: {e}",
                    directory.display()
                ))
            })?
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Skipping unreadable detector directory entry: {e}");
                    None
                }
            })
            .collect::<Vec<_>>();
        entries.sort_by_key(fs::DirEntry::file_name);

        let mut builder = Self::builder();
        let mut discovered = 0;

        for entry in entries {
            let path = entry.path();
            if path.is_dir() {
                continue;
            }

            let file_name = entry.file_name().to_string_lossy().into_owned();
            if file_name.starts_with('_') || file_name.starts_with('.') {
                debug!("Skipping detector file {file_name}");
                continue;
            }

            let is_script = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| extensions.iter().any(|allowed| allowed == ext));
            if !is_script {
                continue;
            }

            if builder.register(Arc::new(ScriptDetector::new(path, runner.clone()))) {
                discovered += 1;
            }
        }

        let registry = builder.build();
        info!(
            "Detector discovery complete: discovered={discovered} total={}",
            registry.len()
        );

        Ok(registry)
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Detector>, DetectorError> {
        self.detectors
            .get(name)
            .cloned()
            .ok_or_else(|| DetectorError::NotFound(name.to_string()))
    }

    /// Registered names, sorted.
    pub fn list(&self) -> Vec<&str> {
        self.detectors.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }
}

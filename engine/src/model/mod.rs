//! Model artifact store: on-disk layout, sanitized paths, and TTL-cached
//! loaders for everything the hot path consumes.
//!
//! All artifacts are neutral serde formats; see the individual modules for
//! the shapes. Loaders cache `None` for missing artifacts too, so an unknown
//! model produces one informational log per TTL window rather than one per
//! burst.

pub mod density;
pub mod fingerprint;
pub mod forest;
pub mod scaler;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cache::TtlCache;
use crate::config::AppConfig;
use crate::normalize::sanitize_name;
use crate::resolver;

use density::{DensityArtifact, DensityModel};
use fingerprint::Fingerprint;
use forest::EventClassifier;
use scaler::ScalerArtifact;

/// A device's event-classifier ensemble in deterministic filename order.
pub type Ensemble = Vec<(String, EventClassifier)>;

pub struct ModelStore {
    models_dir: PathBuf,
    eps_path: PathBuf,
    default_eps: f64,
    scalers: TtlCache<String, Option<Arc<scaler::Scaler>>>,
    fingerprints: TtlCache<String, Option<Arc<Fingerprint>>>,
    filters: TtlCache<String, Option<Arc<DensityModel>>>,
    ensembles: TtlCache<String, Option<Arc<Ensemble>>>,
}

impl ModelStore {
    pub fn new(config: &AppConfig) -> Self {
        let ttl = Duration::from_secs(config.cache_ttl_secs);
        let capacity = config.cache_capacity;
        Self {
            models_dir: config.models_dir(),
            eps_path: config.eps_list_path(),
            default_eps: config.default_eps,
            scalers: TtlCache::new(ttl, capacity),
            fingerprints: TtlCache::new(ttl, capacity),
            filters: TtlCache::new(ttl, capacity),
            ensembles: TtlCache::new(ttl, capacity),
        }
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    // -- on-disk layout -----------------------------------------------------

    pub fn scaler_path(&self, name: &str) -> PathBuf {
        self.models_dir
            .join("SS_PCA")
            .join(format!("{}.json", sanitize_name(name)))
    }

    pub fn freq_period_dir(&self, sampling_rate_secs: u64) -> PathBuf {
        self.models_dir
            .join("freq_period")
            .join(format!("{sampling_rate_secs}s"))
    }

    pub fn fingerprint_path(&self, model: &str) -> PathBuf {
        self.models_dir
            .join("freq_period")
            .join("fingerprints")
            .join(format!("{}.txt", sanitize_name(model)))
    }

    pub fn filter_model_path(&self, model: &str, host: &str, proto: &str) -> PathBuf {
        self.models_dir.join("filter").join(format!(
            "{}{}{}.model",
            sanitize_name(model),
            sanitize_name(host),
            proto
        ))
    }

    pub fn classifier_dir(&self, model: &str) -> PathBuf {
        self.models_dir
            .join("binary")
            .join("rf")
            .join(sanitize_name(model))
    }

    // -- cached loaders -----------------------------------------------------

    /// Standardizer for a device: keyed by model name with the device MAC as
    /// fallback (trainers persist by MAC, converted drops by model name).
    pub fn scaler_for(&self, model: &str, mac: &str) -> Option<Arc<scaler::Scaler>> {
        let primary = self.scaler_path(model);
        let fallback = self.scaler_path(mac);
        let key = format!("{model}|{mac}");
        self.scalers.get_with(key, || {
            for path in [&primary, &fallback] {
                match ScalerArtifact::load(path) {
                    Ok(artifact) => {
                        debug!(path = %path.display(), "Loaded standardizer");
                        return Some(Arc::new(artifact.ss));
                    }
                    Err(crate::error::PipelineError::Io(_)) => continue,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Bad standardizer artifact");
                        return None;
                    }
                }
            }
            info!(model, mac, "No standardizer artifact for device");
            None
        })
    }

    /// Periodic fingerprint for a model, `None` when the device has none.
    pub fn fingerprint_for(&self, model: &str) -> Option<Arc<Fingerprint>> {
        let path = self.fingerprint_path(model);
        self.fingerprints.get_with(model.to_string(), || {
            match Fingerprint::load(&path) {
                Ok(fp) if !fp.is_empty() => Some(Arc::new(fp)),
                Ok(_) => {
                    info!(model, "Fingerprint file is empty");
                    None
                }
                Err(crate::error::PipelineError::Io(_)) => {
                    info!(model, "No fingerprint for model");
                    None
                }
                Err(e) => {
                    warn!(model, error = %e, "Unreadable fingerprint");
                    None
                }
            }
        })
    }

    /// Filter model for one (model, host, proto) fingerprint tuple.
    pub fn filter_model(&self, model: &str, host: &str, proto: &str) -> Option<Arc<DensityModel>> {
        let path = self.filter_model_path(model, host, proto);
        let key = path.display().to_string();
        self.filters.get_with(key, || match DensityArtifact::load(&path) {
            Ok(artifact) => Some(Arc::new(artifact.trained_model)),
            Err(crate::error::PipelineError::Io(_)) => {
                info!(path = %path.display(), "Missing filter model");
                None
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Bad filter model artifact");
                None
            }
        })
    }

    /// The device's classifier ensemble in deterministic filename order. The
    /// event name is everything after the first `_` of the file stem.
    /// Unreadable classifiers are skipped with a log line.
    pub fn classifiers_for(&self, model: &str) -> Option<Arc<Ensemble>> {
        let dir = self.classifier_dir(model);
        self.ensembles.get_with(model.to_string(), || {
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(_) => {
                    info!(model, dir = %dir.display(), "No classifier folder for model");
                    return None;
                }
            };

            let mut files: Vec<PathBuf> = entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_file())
                .collect();
            files.sort();

            let mut ensemble: Ensemble = Vec::new();
            for path in files {
                let stem = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or_default();
                let event = stem.splitn(2, '_').nth(1).unwrap_or_default().to_string();
                match EventClassifier::load(&path) {
                    Ok(clf) => ensemble.push((event, clf)),
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Skipping unreadable classifier");
                    }
                }
            }

            if ensemble.is_empty() {
                info!(model, "Classifier folder holds no usable models");
                None
            } else {
                Some(Arc::new(ensemble))
            }
        })
    }

    /// Sorted model folder names under `binary/rf/`, the fuzzy matcher's
    /// candidate set.
    pub fn model_folders(&self) -> Vec<String> {
        let dir = self.models_dir.join("binary").join("rf");
        let mut folders: Vec<String> = match std::fs::read_dir(&dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .filter(|e| e.path().is_dir())
                .filter_map(|e| e.file_name().into_string().ok())
                .collect(),
            Err(_) => Vec::new(),
        };
        folders.sort();
        folders
    }

    /// DBSCAN eps for a model from the eps table, fuzzy-matched at 0.9;
    /// falls back to the configured default.
    pub fn eps_for(&self, model: &str) -> f64 {
        let table: HashMap<String, f64> = match std::fs::read_to_string(&self.eps_path)
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
        {
            Some(table) => table,
            None => return self.default_eps,
        };
        let mut keys: Vec<&str> = table.keys().map(String::as_str).collect();
        keys.sort_unstable();
        match resolver::find_best_match(model, keys, 0.9) {
            Some(key) => table.get(&key).copied().unwrap_or(self.default_eps),
            None => self.default_eps,
        }
    }
}

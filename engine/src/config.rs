use anyhow::Result;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

/// Application configuration loaded from a TOML file or defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Project data directory (idle CSVs, standardized CSVs, models).
    #[serde(default = "default_project_dir")]
    pub project_dir: PathBuf,

    /// Model artifact directory. Defaults to `<project_dir>/models`.
    #[serde(default)]
    pub models_dir: Option<PathBuf>,

    /// Burst aggregation window in seconds.
    #[serde(default = "default_burst_window")]
    pub burst_window_secs: f64,

    /// Flow statistics flush interval in seconds.
    #[serde(default = "default_flow_flush")]
    pub flow_flush_secs: f64,

    /// Capacity of every inter-stage queue (drop-oldest on overflow).
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Worker dequeue timeout in milliseconds. Bounds shutdown latency.
    #[serde(default = "default_dequeue_timeout")]
    pub dequeue_timeout_millis: u64,

    /// Model cache TTL in seconds.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    /// Model cache capacity (LRU entries).
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Sampling rate in seconds for periodicity binning.
    #[serde(default = "default_sampling_rate")]
    pub sampling_rate_secs: u64,

    /// RNG seed for the permutation null distribution, so trainer reruns on
    /// unchanged data are byte-identical.
    #[serde(default = "default_permutation_seed")]
    pub permutation_seed: u64,

    /// Similarity threshold for device-name → model-name fuzzy resolution.
    #[serde(default = "default_match_threshold")]
    pub match_threshold: f64,

    /// Fallback DBSCAN eps when a model has no entry in eps_list.json.
    #[serde(default = "default_eps")]
    pub default_eps: f64,

    /// MAC address of the observer host. When set, packets carrying it are
    /// rewritten to the real device MAC via the ARP cache; packets touching
    /// neither side are ignored.
    #[serde(default)]
    pub observer_mac: String,

    /// Explicit device product name → model folder name mappings, consulted
    /// before fuzzy matching.
    #[serde(default)]
    pub device_models: HashMap<String, String>,

    /// Subnets considered local in addition to RFC 1918 / link-local ranges
    /// (CIDR notation).
    #[serde(default)]
    pub local_subnets: Vec<String>,

    /// Devices to seed the in-memory registry with when running standalone.
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
}

/// One registry seed entry from the `[[devices]]` tables.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceEntry {
    pub mac: String,
    pub name: String,
    #[serde(default)]
    pub idle: bool,
    /// Annotation labels recorded into BFV tails while capturing.
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub event: String,
}

fn default_project_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_burst_window() -> f64 {
    1.0
}

fn default_flow_flush() -> f64 {
    2.0
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_dequeue_timeout() -> u64 {
    500
}

fn default_cache_ttl() -> u64 {
    300
}

fn default_cache_capacity() -> usize {
    128
}

fn default_sampling_rate() -> u64 {
    1
}

fn default_permutation_seed() -> u64 {
    1867
}

fn default_match_threshold() -> f64 {
    0.8
}

fn default_eps() -> f64 {
    5.0
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            project_dir: default_project_dir(),
            models_dir: None,
            burst_window_secs: default_burst_window(),
            flow_flush_secs: default_flow_flush(),
            queue_capacity: default_queue_capacity(),
            dequeue_timeout_millis: default_dequeue_timeout(),
            cache_ttl_secs: default_cache_ttl(),
            cache_capacity: default_cache_capacity(),
            sampling_rate_secs: default_sampling_rate(),
            permutation_seed: default_permutation_seed(),
            match_threshold: default_match_threshold(),
            default_eps: default_eps(),
            observer_mac: String::new(),
            device_models: HashMap::new(),
            local_subnets: Vec::new(),
            devices: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::de::from_str(&contents)?;
        Ok(config)
    }

    /// Model artifact directory.
    pub fn models_dir(&self) -> PathBuf {
        self.models_dir
            .clone()
            .unwrap_or_else(|| self.project_dir.join("models"))
    }

    /// Raw idle BFV capture directory.
    pub fn idle_data_dir(&self) -> PathBuf {
        self.project_dir.join("idle-data")
    }

    /// Standardized idle train/test directory.
    pub fn idle_std_dir(&self) -> PathBuf {
        self.project_dir.join("idle-data-std")
    }

    /// Path to the model → DBSCAN eps table.
    pub fn eps_list_path(&self) -> PathBuf {
        self.project_dir.join("core").join("eps_list.json")
    }
}

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CONFIG_ENV: &str = "PROCSENTRY_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding rules, whitelist, history, anomaly log and model.
    pub data_dir: PathBuf,
    pub runtime: RuntimeConfig,
    pub api: ApiConfig,
    pub history: HistoryConfig,
    pub detector: DetectorConfig,
    pub forecast: ForecastConfig,
    pub alerts: AlertsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub metrics_interval_secs: u64,
    pub enforce_interval_secs: u64,
    /// Query `nvidia-smi` on every snapshot.
    pub gpu: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub listen: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub min_samples: usize,
    pub contamination: f64,
    pub trees: usize,
    pub seed: u64,
    pub max_reported: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    pub min_records: usize,
    pub test_fraction: f64,
    pub seed: u64,
    /// Retrain after this many metric ticks; 0 disables periodic retraining.
    pub retrain_every_ticks: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    pub capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            runtime: RuntimeConfig::default(),
            api: ApiConfig::default(),
            history: HistoryConfig::default(),
            detector: DetectorConfig::default(),
            forecast: ForecastConfig::default(),
            alerts: AlertsConfig::default(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            metrics_interval_secs: 3,
            enforce_interval_secs: 5,
            gpu: true,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: "127.0.0.1:5000".to_string(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { capacity: 1000 }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_samples: 8,
            contamination: 0.05,
            trees: 100,
            seed: 42,
            max_reported: 10,
        }
    }
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            min_records: 30,
            test_fraction: 0.2,
            seed: 42,
            retrain_every_ticks: 200,
        }
    }
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self { capacity: 200 }
    }
}

impl Config {
    /// Strict load: any I/O or parse failure is returned to the caller.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(config.validated())
    }

    /// Resolve the config path (explicit argument, then `PROCSENTRY_CONFIG`)
    /// and load it. A missing or broken file falls back to defaults.
    pub fn load(path: Option<&Path>) -> Self {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

        let Some(path) = path else {
            info!("[config] no config file given, using defaults");
            return Self::default();
        };

        if !path.exists() {
            info!("[config] {} not found, using defaults", path.display());
            return Self::default();
        }

        match Self::load_from(&path) {
            Ok(config) => {
                info!("[config] loaded {}", path.display());
                config
            }
            Err(err) => {
                warn!("[config] {err}; using defaults");
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    fn validated(mut self) -> Self {
        if self.runtime.metrics_interval_secs == 0 {
            warn!("[config] runtime.metrics_interval_secs must be >= 1, using 1");
            self.runtime.metrics_interval_secs = 1;
        }
        if self.runtime.enforce_interval_secs == 0 {
            warn!("[config] runtime.enforce_interval_secs must be >= 1, using 1");
            self.runtime.enforce_interval_secs = 1;
        }
        if self.history.capacity == 0 {
            warn!("[config] history.capacity must be >= 1, using 1");
            self.history.capacity = 1;
        }
        if self.alerts.capacity == 0 {
            warn!("[config] alerts.capacity must be >= 1, using 1");
            self.alerts.capacity = 1;
        }
        if !(self.detector.contamination > 0.0 && self.detector.contamination <= 0.5) {
            let clamped = if self.detector.contamination.is_nan() {
                DetectorConfig::default().contamination
            } else {
                self.detector.contamination.clamp(0.001, 0.5)
            };
            warn!(
                "[config] detector.contamination {} out of (0, 0.5], using {}",
                self.detector.contamination, clamped
            );
            self.detector.contamination = clamped;
        }
        if self.detector.min_samples < 3 {
            warn!("[config] detector.min_samples must be >= 3, using 3");
            self.detector.min_samples = 3;
        }
        if self.detector.trees == 0 {
            warn!("[config] detector.trees must be >= 1, using 1");
            self.detector.trees = 1;
        }
        if !(self.forecast.test_fraction > 0.0 && self.forecast.test_fraction < 1.0) {
            warn!(
                "[config] forecast.test_fraction {} out of (0, 1), using 0.2",
                self.forecast.test_fraction
            );
            self.forecast.test_fraction = 0.2;
        }
        self
    }

    pub fn rules_path(&self) -> PathBuf {
        self.data_dir.join("user_limits.json")
    }

    pub fn whitelist_path(&self) -> PathBuf {
        self.data_dir.join("whitelist.json")
    }

    pub fn history_path(&self) -> PathBuf {
        self.data_dir.join("history.csv")
    }

    pub fn anomaly_log_path(&self) -> PathBuf {
        self.data_dir.join("anomalies.log")
    }

    pub fn model_path(&self) -> PathBuf {
        self.data_dir.join("cpu_forecast_model.json")
    }

    pub fn alerts_path(&self) -> PathBuf {
        self.data_dir.join("alerts.jsonl")
    }
}

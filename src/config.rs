use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::anomaly::DetectorParams;
use crate::error::SentinelError;

/// Configuration file structure for the sentinel.
///
/// Field names are snake_case so existing JSON configs keep working.
/// Configuration files are loaded from the current directory or a given path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Jenkins connection settings
    #[serde(default)]
    pub jenkins: JenkinsConfig,

    /// Pipelines whose build history is tracked
    #[serde(default)]
    pub pipelines: Vec<PipelineConfig>,

    /// Detector discovery and dispatch settings
    #[serde(default)]
    pub anomaly_processing: AnomalyProcessingConfig,

    /// Build queue behaviour
    #[serde(default)]
    pub queue: QueueConfig,

    /// Local persistence settings
    #[serde(default)]
    pub store: StoreConfig,

    /// Log level used when `RUST_LOG` is not set
    #[serde(default = "default_logging_level")]
    pub logging_level: String,

    /// Append log output to this file instead of stderr
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JenkinsConfig {
    /// Jenkins base URL (e.g. `https://jenkins.example.com`)
    #[serde(default)]
    pub base_url: String,

    #[serde(default)]
    pub username: String,

    /// API token, preferred over the password
    #[serde(default)]
    pub token: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Per-request timeout
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Job path relative to the Jenkins base URL (e.g. `job/my-pipeline`)
    pub url: String,

    #[serde(default)]
    pub anomaly_detection: Option<AnomalyDetectionConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyDetectionConfig {
    /// Detector name (script file name without extension)
    #[serde(default)]
    pub name: String,

    /// Extra detector arguments, passed as `--key value` in this order
    #[serde(default)]
    pub params: IndexMap<String, serde_json::Value>,

    #[serde(default = "default_time_window_hours")]
    pub time_window_hours: u32,

    /// Metric names to build time series for
    #[serde(default)]
    pub metrics: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyProcessingConfig {
    /// Number of detector invocations allowed to run at once
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Directory scanned for detector scripts
    #[serde(default = "default_detector_directory")]
    pub detector_directory: PathBuf,

    /// Program and leading arguments used to run a detector script
    #[serde(default = "default_runner")]
    pub runner: Vec<String>,

    /// File extensions recognised as detector scripts
    #[serde(default = "default_script_extensions")]
    pub script_extensions: Vec<String>,

    /// Deadline for a whole detection run
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Re-select `error` items on every processing pass
    #[serde(default)]
    pub retry_errored: bool,

    /// Upper bound on persisted build numbers read during reconciliation
    #[serde(default = "default_existing_build_limit")]
    pub existing_build_limit: usize,

    /// Store the console tail of failed and unstable builds
    #[serde(default)]
    pub capture_failure_logs: bool,

    #[serde(default = "default_failure_log_lines")]
    pub failure_log_lines: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreConfig {
    /// State file path. Defaults to the platform data directory.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            jenkins: JenkinsConfig::default(),
            pipelines: Vec::new(),
            anomaly_processing: AnomalyProcessingConfig::default(),
            queue: QueueConfig::default(),
            store: StoreConfig::default(),
            logging_level: default_logging_level(),
            log_file: None,
        }
    }
}

impl Default for JenkinsConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            username: String::new(),
            token: None,
            password: None,
            timeout_seconds: default_timeout_seconds(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl Default for AnomalyProcessingConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            detector_directory: default_detector_directory(),
            runner: default_runner(),
            script_extensions: default_script_extensions(),
            timeout_seconds: None,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            retry_errored: false,
            existing_build_limit: default_existing_build_limit(),
            capture_failure_logs: false,
            failure_log_lines: default_failure_log_lines(),
        }
    }
}

fn default_logging_level() -> String {
    "info".to_string()
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    8_000
}

fn default_time_window_hours() -> u32 {
    24
}

fn default_max_parallel() -> usize {
    4
}

fn default_detector_directory() -> PathBuf {
    PathBuf::from("detectors")
}

fn default_runner() -> Vec<String> {
    vec!["uv".to_string(), "run".to_string()]
}

fn default_script_extensions() -> Vec<String> {
    vec!["py".to_string()]
}

fn default_existing_build_limit() -> usize {
    10_000
}

fn default_failure_log_lines() -> usize {
    200
}

impl AnomalyDetectionConfig {
    /// Renders params as detector command-line values, keeping config order.
    ///
    /// Strings are passed verbatim; other JSON values use their JSON text.
    pub fn detector_params(&self) -> DetectorParams {
        self.params
            .iter()
            .map(|(key, value)| {
                let rendered = match value {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (key.clone(), rendered)
            })
            .collect()
    }
}

impl Config {
    /// Load configuration from a file.
    ///
    /// Searches for configuration files in this order:
    /// 1. Specified path
    /// 2. ./sentinel.toml
    /// 3. ./sentinel.json
    /// 4. ./sentinel.yaml
    /// 5. ./sentinel.yml
    ///
    /// Returns default configuration if no path is given and no file is found.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_from_path(path);
        }

        let candidates = [
            "sentinel.toml",
            "sentinel.json",
            "sentinel.yaml",
            "sentinel.yml",
        ];

        for candidate in &candidates {
            let path = Path::new(candidate);
            if path.exists() {
                return Self::load_from_path(path);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file path.
    fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");

        match extension {
            "toml" => toml::from_str(&contents)
                .with_context(|| format!("Failed to parse TOML config: {}", path.display())),
            "json" => serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display())),
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display())),
            _ => toml::from_str(&contents)
                .or_else(|_| serde_json::from_str(&contents))
                .or_else(|_| serde_yaml::from_str(&contents))
                .with_context(|| format!("Failed to parse config file: {}", path.display())),
        }
    }

    /// Checks the settings every command relies on.
    ///
    /// # Errors
    ///
    /// Returns `SentinelError::Config` describing the first problem found.
    pub fn validate(&self) -> std::result::Result<(), SentinelError> {
        if self.jenkins.base_url.trim().is_empty() {
            return Err(SentinelError::Config("jenkins.base_url is required".into()));
        }
        url::Url::parse(&self.jenkins.base_url).map_err(|e| {
            SentinelError::Config(format!(
                "jenkins.base_url {:?} is not a valid URL: {e}",
                self.jenkins.base_url
            ))
        })?;
        if self.jenkins.username.trim().is_empty() {
            return Err(SentinelError::Config("jenkins.username is required".into()));
        }
        let has_secret = [&self.jenkins.token, &self.jenkins.password]
            .iter()
            .any(|s| s.as_deref().is_some_and(|v| !v.is_empty()));
        if !has_secret {
            return Err(SentinelError::Config(
                "either jenkins.token or jenkins.password must be set".into(),
            ));
        }
        if self.jenkins.retry.max_attempts == 0 {
            return Err(SentinelError::Config(
                "jenkins.retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.anomaly_processing.max_parallel == 0 {
            return Err(SentinelError::Config(
                "anomaly_processing.max_parallel must be at least 1".into(),
            ));
        }
        if self.anomaly_processing.runner.is_empty() {
            return Err(SentinelError::Config(
                "anomaly_processing.runner must name a program".into(),
            ));
        }
        Ok(())
    }

    /// Resolved path of the local state file.
    pub fn store_path(&self) -> std::result::Result<PathBuf, SentinelError> {
        if let Some(path) = &self.store.path {
            return Ok(path.clone());
        }
        dirs::data_dir()
            .map(|dir| dir.join("ci-sentinel").join("state.json"))
            .ok_or_else(|| SentinelError::Config("no data directory found; set store.path".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.jenkins.base_url = "https://jenkins.example.com".to_string();
        config.jenkins.username = "ci".to_string();
        config.jenkins.token = Some("token".to_string());
        config
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.jenkins.retry.max_attempts, 5);
        assert_eq!(config.jenkins.retry.initial_backoff_ms, 500);
        assert_eq!(config.jenkins.retry.max_backoff_ms, 8_000);
        assert_eq!(config.anomaly_processing.max_parallel, 4);
        assert_eq!(config.anomaly_processing.runner, vec!["uv", "run"]);
        assert_eq!(config.queue.existing_build_limit, 10_000);
        assert!(!config.queue.retry_errored);
        assert_eq!(config.logging_level, "info");
    }

    #[test]
    fn test_load_json_config() {
        let mut temp_file = NamedTempFile::with_suffix(".json").unwrap();
        let json_content = r#"{
  "jenkins": {
    "base_url": "https://jenkins.example.com",
    "username": "ci",
    "token": "abc"
  },
  "anomaly_processing": {
    "max_parallel": 2,
    "detector_directory": "/opt/detectors"
  },
  "pipelines": [
    {
      "url": "job/api-build",
      "anomaly_detection": {
        "name": "zscore",
        "params": {"threshold": 2.5, "min-samples": 10, "mode": "strict"},
        "time_window_hours": 168,
        "metrics": ["duration", "waiting_time_seconds"]
      }
    },
    {"url": "job/docs"}
  ]
}"#;
        write!(temp_file, "{}", json_content).unwrap();

        let config = Config::load_from_path(temp_file.path()).unwrap();
        assert_eq!(config.jenkins.username, "ci");
        assert_eq!(config.anomaly_processing.max_parallel, 2);
        assert_eq!(config.pipelines.len(), 2);
        assert!(config.pipelines[1].anomaly_detection.is_none());

        let detection = config.pipelines[0].anomaly_detection.as_ref().unwrap();
        assert_eq!(detection.time_window_hours, 168);

        let params: Vec<_> = detection.detector_params().into_iter().collect();
        assert_eq!(
            params,
            vec![
                ("threshold".to_string(), "2.5".to_string()),
                ("min-samples".to_string(), "10".to_string()),
                ("mode".to_string(), "strict".to_string()),
            ]
        );
    }

    #[test]
    fn test_load_toml_config() {
        let mut temp_file = NamedTempFile::with_suffix(".toml").unwrap();
        let toml_content = r#"
logging_level = "debug"

[jenkins]
base_url = "https://jenkins.example.com"
username = "ci"
password = "secret"

[jenkins.retry]
max_attempts = 3

[queue]
retry_errored = true

[[pipelines]]
url = "job/api-build"
"#;
        write!(temp_file, "{}", toml_content).unwrap();

        let config = Config::load_from_path(temp_file.path()).unwrap();
        assert_eq!(config.logging_level, "debug");
        assert_eq!(config.jenkins.retry.max_attempts, 3);
        assert_eq!(config.jenkins.retry.initial_backoff_ms, 500);
        assert!(config.queue.retry_errored);
        assert_eq!(config.pipelines[0].url, "job/api-build");
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let result = Config::load(Some(Path::new("definitely-missing-sentinel.toml")));
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_accepts_complete_config() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_secret() {
        let mut config = valid_config();
        config.jenkins.token = None;
        config.jenkins.password = Some(String::new());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("token or jenkins.password"));
    }

    #[test]
    fn test_validate_rejects_zero_parallelism() {
        let mut config = valid_config();
        config.anomaly_processing.max_parallel = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_url() {
        let mut config = valid_config();
        config.jenkins.base_url = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_store_path_override() {
        let mut config = valid_config();
        config.store.path = Some(PathBuf::from("/tmp/sentinel-state.json"));
        assert_eq!(
            config.store_path().unwrap(),
            PathBuf::from("/tmp/sentinel-state.json")
        );
    }
}

use eyre::{Context, Result, eyre};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lmsflow::api::{DEFAULT_API_PATH, RetryPolicy};
use lmsflow::pipeline::{CollectionProfile, PipelineConfig, TransformerConfig};
use lmsflow::scheduler::SchedulerConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default `env_logger` filter, e.g. `info` or `lmsflow=debug`; `RUST_LOG` wins.
    pub log_level: Option<String>,
    pub api: ApiConfig,
    pub scheduler: SchedulerConfig,
    pub pipeline: PipelineConfig,
    pub transformer: TransformerConfig,
    pub profile: CollectionProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub api_path: String,
    /// Environment variable holding the bearer token
    pub token_env: String,
    pub timeout_ms: u64,
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub hourly_limit: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_path: DEFAULT_API_PATH.to_string(),
            token_env: "LMS_API_TOKEN".to_string(),
            timeout_ms: 30000,
            retry_attempts: 3,
            retry_base_delay_ms: 1000,
            hourly_limit: 3000,
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_attempts, self.retry_base_delay_ms, self.timeout_ms)
    }

    /// Read the bearer token from the configured environment variable.
    pub fn token(&self) -> Result<String> {
        match std::env::var(&self.token_env) {
            Ok(token) if !token.trim().is_empty() => Ok(token),
            _ => Err(eyre!("API token not set: export {}", self.token_env)),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            api: ApiConfig::default(),
            scheduler: SchedulerConfig::default(),
            pipeline: PipelineConfig::default(),
            transformer: TransformerConfig::default(),
            profile: CollectionProfile::default(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try primary location: ~/.config/<project>/<project>.yml
        if let Some(config_dir) = dirs::config_dir() {
            let project_name = env!("CARGO_PKG_NAME");
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let project_name = env!("CARGO_PKG_NAME");
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        // No config file found, use defaults
        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Offline checks: everything except the token and the network.
    pub fn validate(&self) -> Result<()> {
        if self.api.base_url.trim().is_empty() {
            return Err(eyre!("api.base_url is not set"));
        }
        if self.api.hourly_limit == 0 {
            return Err(eyre!("api.hourly_limit must be at least 1"));
        }
        if self.api.retry_attempts == 0 {
            return Err(eyre!("api.retry_attempts must be at least 1"));
        }
        if self.transformer.program.trim().is_empty() {
            return Err(eyre!("transformer.program is not set"));
        }
        self.profile.validate().context("Invalid collection profile")?;
        self.pipeline.validate().context("Invalid pipeline settings")?;
        self.scheduler.validate().context("Invalid scheduler settings")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.api.api_path, "/api/v1");
        assert_eq!(config.api.token_env, "LMS_API_TOKEN");
        assert_eq!(config.api.retry_attempts, 3);
        assert_eq!(config.api.hourly_limit, 3000);
        assert_eq!(config.pipeline.bulk_transform_timeout_ms, 300_000);
        assert_eq!(config.profile, CollectionProfile::standard());
    }

    #[test]
    fn test_log_level_from_file() {
        let file = write_config("log_level: lmsflow=debug\napi:\n  base_url: https://lms.example.edu\n");
        let config = Config::load(Some(&file.path().to_path_buf())).unwrap();
        assert_eq!(config.log_level.as_deref(), Some("lmsflow=debug"));
        assert_eq!(Config::default().log_level.as_deref(), Some("info"));
    }

    #[test]
    fn test_defaults_need_base_url() {
        assert!(Config::default().validate().is_err());
    }

    #[test]
    fn test_load_partial_file() {
        let file = write_config(
            "api:\n  base_url: https://lms.example.edu\n  hourly_limit: 700\nscheduler:\n  max_concurrent: 2\n",
        );
        let config = Config::load(Some(&file.path().to_path_buf())).unwrap();
        assert_eq!(config.api.base_url, "https://lms.example.edu");
        assert_eq!(config.api.hourly_limit, 700);
        assert_eq!(config.api.retry_base_delay_ms, 1000);
        assert_eq!(config.scheduler.max_concurrent, 2);
        assert_eq!(config.scheduler.speedup_streak, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_profile_missing_toggle_fails_validation() {
        let file = write_config(
            "api:\n  base_url: https://lms.example.edu\nprofile:\n  students: true\n  assignments: false\n  modules: true\n",
        );
        let config = Config::load(Some(&file.path().to_path_buf())).unwrap();
        let err = config.validate().unwrap_err();
        assert!(format!("{:#}", err).contains("submissions"));
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let path = PathBuf::from("/nonexistent/lmsflow.yml");
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn test_token_from_env() {
        let api = ApiConfig {
            token_env: "LMSFLOW_TEST_TOKEN_UNSET_VAR".to_string(),
            ..Default::default()
        };
        assert!(api.token().is_err());
    }

    #[test]
    fn test_retry_policy_from_api_section() {
        let policy = ApiConfig::default().retry_policy();
        assert_eq!(policy.attempts, 3);
        assert_eq!(policy.base_delay_ms, 1000);
    }
}

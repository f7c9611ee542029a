//! Layered configuration.
//!
//! Sources are merged in order, later ones winning:
//! 1. `AppConfig::default()`
//! 2. a TOML file (`--config`, else `$SSR_CONFIG`, else `./rexo-ssr.toml`)
//! 3. environment variables `SSR_<SECTION>__<FIELD>`, e.g.
//!    `SSR_SANDBOX__WORKERS=4` or `SSR_CACHE__BACKEND=redis`

use crate::cache::{CacheBackend, CacheConfig, MAX_TTL_SECS};
use crate::classify::ClassifierConfig;
use crate::data::DataConfig;
use crate::error::ConfigError;
use crate::render::RenderConfig;
use crate::runtime::SandboxConfig;
use crate::telemetry::{parse_log_level, LoggingConfig};
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_PREFIX: &str = "SSR_";
pub const CONFIG_PATH_ENV: &str = "SSR_CONFIG";
pub const DEFAULT_CONFIG_FILENAME: &str = "rexo-ssr.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub sandbox: SandboxConfig,
    pub cache: CacheConfig,
    pub data: DataConfig,
    pub classifier: ClassifierConfig,
    pub render: RenderConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load from the default sources.
    pub fn load() -> Result<Self, ConfigError> {
        ConfigLoader::new().load()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sandbox.workers == 0 {
            return Err(ConfigError::Invalid("sandbox.workers must be at least 1".into()));
        }
        if self.sandbox.timeout_ms == Some(0) {
            return Err(ConfigError::Invalid("sandbox.timeout_ms must be positive".into()));
        }
        if self.sandbox.entry.trim().is_empty() {
            return Err(ConfigError::Invalid("sandbox.entry must not be empty".into()));
        }
        if self.cache.backend == CacheBackend::Redis && self.cache.redis_url.trim().is_empty() {
            return Err(ConfigError::Invalid("cache.redis_url is required for the redis backend".into()));
        }
        for (name, secs) in [
            ("cache.page_ttl_secs", self.cache.page_ttl_secs),
            ("cache.data_ttl_secs", self.cache.data_ttl_secs),
        ] {
            if secs > MAX_TTL_SECS {
                return Err(ConfigError::Invalid(format!(
                    "{} must be at most {} seconds",
                    name, MAX_TTL_SECS
                )));
            }
        }
        if self.data.fetch_timeout_ms == 0 {
            return Err(ConfigError::Invalid("data.fetch_timeout_ms must be positive".into()));
        }
        parse_log_level(&self.logging.level)?;
        Ok(())
    }
}

/// Builder over the configuration sources.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
    env_prefix: String,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            config_path: None,
            env_prefix: ENV_PREFIX.to_string(),
        }
    }

    /// Use this file instead of searching for one. It must exist.
    pub fn with_config_path(mut self, path: impl AsRef<Path>) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(AppConfig::default()));

        if let Some(path) = self.config_file()? {
            figment = figment.merge(Toml::file(&path));
        }

        figment = figment.merge(Env::prefixed(&self.env_prefix).split("__"));

        let config: AppConfig = figment.extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    /// The TOML file [`ConfigLoader::load`] reads, if any.
    pub fn config_file(&self) -> Result<Option<PathBuf>, ConfigError> {
        let explicit = self
            .config_path
            .clone()
            .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from));

        match explicit {
            Some(path) if path.is_file() => Ok(Some(path)),
            Some(path) => Err(ConfigError::Invalid(format!(
                "Configuration file not found: {}",
                path.display()
            ))),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_FILENAME);
                Ok(default.is_file().then_some(default))
            }
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.sandbox.workers, 1);
        assert_eq!(config.sandbox.timeout_ms, Some(5_000));
        assert_eq!(config.cache.backend, CacheBackend::Memory);
        assert_eq!(config.data.fetch_timeout_ms, 3_000);
        assert_eq!(config.render.cache_control, "public, max-age=300");
        assert_eq!(config.classifier.prerender_header, "X-Prerender");
    }

    #[test]
    fn test_toml_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ssr.toml");
        std::fs::write(
            &path,
            r#"
[sandbox]
workers = 3
timeout_ms = 250

[cache]
backend = "redis"
redis_url = "redis://cache:6379/1"

[classifier]
crawler_signatures = ["slurp"]
"#,
        )
        .unwrap();

        let config = ConfigLoader::new()
            .with_env_prefix("SSR_TEST_TOML_")
            .with_config_path(&path)
            .load()
            .unwrap();

        assert_eq!(config.sandbox.workers, 3);
        assert_eq!(config.sandbox.timeout_ms, Some(250));
        assert_eq!(config.sandbox.entry, "app.js");
        assert_eq!(config.cache.backend, CacheBackend::Redis);
        assert_eq!(config.cache.page_ttl_secs, 300);
        assert_eq!(config.classifier.crawler_signatures, vec!["slurp".to_string()]);
    }

    #[test]
    fn test_env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ssr.toml");
        std::fs::write(&path, "[data]\nfetch_timeout_ms = 100\n").unwrap();

        std::env::set_var("SSR_TEST_ENV_DATA__FETCH_TIMEOUT_MS", "900");
        std::env::set_var("SSR_TEST_ENV_LOGGING__JSON", "true");
        let config = ConfigLoader::new()
            .with_env_prefix("SSR_TEST_ENV_")
            .with_config_path(&path)
            .load()
            .unwrap();
        std::env::remove_var("SSR_TEST_ENV_DATA__FETCH_TIMEOUT_MS");
        std::env::remove_var("SSR_TEST_ENV_LOGGING__JSON");

        assert_eq!(config.data.fetch_timeout_ms, 900);
        assert!(config.logging.json);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let err = ConfigLoader::new()
            .with_env_prefix("SSR_TEST_MISSING_")
            .with_config_path("/definitely/not/here.toml")
            .load()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let mut config = AppConfig::default();
        config.sandbox.workers = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.logging.level = "chatty".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_file_reports_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ssr.toml");
        std::fs::write(&path, "").unwrap();

        let loader = ConfigLoader::new().with_config_path(&path);
        assert_eq!(loader.config_file().unwrap(), Some(path));
    }

    #[test]
    fn test_oversized_ttl_is_rejected() {
        let mut config = AppConfig::default();
        config.cache.page_ttl_secs = u64::MAX;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("cache.page_ttl_secs"));

        let mut config = AppConfig::default();
        config.cache.data_ttl_secs = MAX_TTL_SECS;
        config.validate().unwrap();
    }
}

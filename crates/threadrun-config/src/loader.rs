use std::path::{Path, PathBuf};

use threadrun_common::{Error, Result};
use tracing::{debug, info};

use crate::model::AppConfig;

const CONFIG_FILE: &str = "config.yml";

/// Loads [`AppConfig`] from a YAML file and layers environment overrides on top.
pub struct ConfigLoader {
    config_dir: PathBuf,
}

impl ConfigLoader {
    pub fn new() -> Self {
        let config_dir = dirs::home_dir()
            .map(|h| h.join(".threadrun"))
            .unwrap_or_else(|| PathBuf::from(".threadrun"));
        Self { config_dir }
    }

    pub fn with_dir(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn default_path(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    /// Load the config file (explicit path, or the default location when it
    /// exists) and apply process environment overrides.
    pub fn load(&self, explicit: Option<&Path>) -> Result<AppConfig> {
        let mut config = match explicit {
            Some(path) => Self::read_file(path)?,
            None => {
                let path = self.default_path();
                if path.exists() {
                    Self::read_file(&path)?
                } else {
                    debug!("no config file at {}, using defaults", path.display());
                    AppConfig::default()
                }
            }
        };
        apply_env(&mut config, |name| std::env::var(name).ok());
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<AppConfig> {
        info!("loading config from {}", path.display());
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
        parse_yaml(&raw)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

pub fn parse_yaml(raw: &str) -> Result<AppConfig> {
    if raw.trim().is_empty() {
        return Ok(AppConfig::default());
    }
    serde_yaml::from_str(raw).map_err(|e| Error::Config(format!("invalid config: {e}")))
}

/// Layer environment overrides onto `config`. `lookup` abstracts the
/// environment so callers and tests can supply their own source.
pub fn apply_env<F>(config: &mut AppConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(key) = get("OPENAI_API_KEY") {
        config.assistant.api_key = Some(key);
    }
    if let Some(id) = get("ASSISTANT_ID") {
        config.assistant.assistant_id = Some(id);
    }
    if let Some(url) = get("OPENAI_BASE_URL") {
        config.assistant.base_url = Some(url);
    }
    if let Some(model) = get("OPENAI_MODEL") {
        config.assistant.completion_model = model;
    }
    if let Some(greeting) = get("THREADRUN_GREETING") {
        config.assistant.greeting = Some(greeting);
    }
    if let Some(host) = get("THREADRUN_HOST") {
        config.gateway.host = host;
    }
    if let Some(port) = get("THREADRUN_PORT") {
        match port.trim().parse() {
            Ok(port) => config.gateway.port = port,
            Err(_) => tracing::warn!("ignoring invalid THREADRUN_PORT '{port}'"),
        }
    }
    if let Some(origins) = get("THREADRUN_CORS_ORIGINS") {
        config.gateway.cors_origins = origins
            .split(',')
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty())
            .collect();
    }
    if let Some(path) = get("THREADRUN_SQLITE_PATH") {
        config.storage.sqlite_path = Some(PathBuf::from(path));
    }
}

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use threadrun_common::{Error, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub gateway: GatewayConfig,
    pub assistant: AssistantConfig,
    pub polling: PollingConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Reject configurations the server cannot start with.
    ///
    /// A missing credential or assistant id is fatal at startup and never
    /// deferred to the first request.
    pub fn validate(&self) -> Result<()> {
        if self.assistant.api_key.as_deref().is_none_or(|k| k.trim().is_empty()) {
            return Err(Error::Config(
                "OPENAI_API_KEY is not set (assistant.api_key)".into(),
            ));
        }
        if self
            .assistant
            .assistant_id
            .as_deref()
            .is_none_or(|a| a.trim().is_empty())
        {
            return Err(Error::Config(
                "ASSISTANT_ID is not set (assistant.assistant_id)".into(),
            ));
        }
        if self.polling.interval_ms == 0 {
            return Err(Error::Config("polling.interval_ms must be positive".into()));
        }
        if self.polling.timeout_secs == 0 {
            return Err(Error::Config("polling.timeout_secs must be positive".into()));
        }
        let factor = self.polling.backoff_factor;
        if !factor.is_finite() || factor < 1.0 {
            return Err(Error::Config(
                "polling.backoff_factor must be a finite number of at least 1.0".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            cors_origins: vec!["http://localhost:3000".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    pub api_key: Option<String>,
    pub assistant_id: Option<String>,
    pub base_url: Option<String>,
    /// Hidden message seeded into every new thread.
    pub greeting: Option<String>,
    /// Model used by the one-shot credential check, not by runs.
    pub completion_model: String,
    pub request_timeout_secs: u64,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            assistant_id: None,
            base_url: None,
            greeting: None,
            completion_model: "gpt-4".to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl AssistantConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_ms: u64,
    /// 1.0 keeps the interval constant; larger values back off exponentially.
    pub backoff_factor: f64,
    pub max_interval_ms: u64,
    pub timeout_secs: u64,
    pub max_polls: Option<u32>,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 500,
            backoff_factor: 1.0,
            max_interval_ms: 5_000,
            timeout_secs: 120,
            max_polls: None,
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms.max(self.interval_ms))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// When set, conversation threads survive restarts in this SQLite file.
    pub sqlite_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Fallback filter when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

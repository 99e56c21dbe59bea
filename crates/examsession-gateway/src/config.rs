//! Gateway configuration and factory.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use examsession_core::controller::SessionConfig;
use examsession_core::traits::{ExamGateway, StaticCredentials};

use crate::mock::MockGateway;
use crate::rest::{RestGateway, DEFAULT_TIMEOUT_SECS};

/// File name searched for in the current directory.
pub const CONFIG_FILE_NAME: &str = "examsession.toml";

/// Which gateway to talk to.
///
/// Note: Custom Debug impl masks the bearer token to prevent accidental exposure in logs.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum GatewayConfig {
    Rest {
        base_url: String,
        #[serde(default)]
        token: String,
        #[serde(default = "default_timeout")]
        timeout_secs: u64,
    },
    /// In-memory gateway serving one demo attempt.
    Mock {
        #[serde(default = "default_mock_duration")]
        duration_secs: u64,
    },
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayConfig::Rest {
                base_url,
                token: _,
                timeout_secs,
            } => f
                .debug_struct("Rest")
                .field("base_url", base_url)
                .field("token", &"***")
                .field("timeout_secs", timeout_secs)
                .finish(),
            GatewayConfig::Mock { duration_secs } => f
                .debug_struct("Mock")
                .field("duration_secs", duration_secs)
                .finish(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig::Mock {
            duration_secs: default_mock_duration(),
        }
    }
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}
fn default_mock_duration() -> u64 {
    600
}
fn default_tick_interval() -> u64 {
    1000
}

/// Session tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// How often the remaining time is published, in milliseconds.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval(),
        }
    }
}

/// Top-level examsession configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExamSessionConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub session: SessionSettings,
}

impl ExamSessionConfig {
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            tick_interval: Duration::from_millis(self.session.tick_interval_ms.max(1)),
        }
    }
}

/// Resolve environment variable references like `${VAR_NAME}` in a string.
fn resolve_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    while let Some(start) = result.find("${") {
        if let Some(end) = result[start..].find('}') {
            let var_name = &result[start + 2..start + end];
            let value = std::env::var(var_name).unwrap_or_default();
            result = format!(
                "{}{}{}",
                &result[..start],
                value,
                &result[start + end + 1..]
            );
        } else {
            break;
        }
    }
    result
}

fn resolve_gateway_config(config: &GatewayConfig) -> GatewayConfig {
    match config {
        GatewayConfig::Rest {
            base_url,
            token,
            timeout_secs,
        } => GatewayConfig::Rest {
            base_url: resolve_env_vars(base_url),
            token: resolve_env_vars(token),
            timeout_secs: *timeout_secs,
        },
        GatewayConfig::Mock { duration_secs } => GatewayConfig::Mock {
            duration_secs: *duration_secs,
        },
    }
}

/// Load configuration from well-known paths.
///
/// Search order:
/// 1. `examsession.toml` in the current directory
/// 2. `~/.config/examsession/config.toml`
///
/// Environment variable overrides: `EXAMSESSION_GATEWAY_URL`, `EXAMSESSION_TOKEN`.
pub fn load_config() -> Result<ExamSessionConfig> {
    load_config_from(None)
}

/// Load config from an explicit path, or search the default locations.
pub fn load_config_from(path: Option<&Path>) -> Result<ExamSessionConfig> {
    let config_path = if let Some(p) = path {
        if p.exists() {
            Some(p.to_path_buf())
        } else {
            anyhow::bail!("config file not found: {}", p.display());
        }
    } else {
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            Some(local)
        } else {
            dirs_path()
                .map(|dir| dir.join("config.toml"))
                .filter(|global| global.exists())
        }
    };

    let mut config = match config_path {
        Some(path) => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config: {}", path.display()))?;
            toml::from_str::<ExamSessionConfig>(&content)
                .with_context(|| format!("failed to parse config: {}", path.display()))?
        }
        None => ExamSessionConfig::default(),
    };

    apply_env_overrides(
        &mut config,
        std::env::var("EXAMSESSION_GATEWAY_URL").ok(),
        std::env::var("EXAMSESSION_TOKEN").ok(),
    );
    config.gateway = resolve_gateway_config(&config.gateway);

    Ok(config)
}

/// A gateway URL override switches a mock config over to REST.
fn apply_env_overrides(config: &mut ExamSessionConfig, url: Option<String>, token: Option<String>) {
    if let Some(url) = url {
        match &mut config.gateway {
            GatewayConfig::Rest { base_url, .. } => *base_url = url,
            GatewayConfig::Mock { .. } => {
                config.gateway = GatewayConfig::Rest {
                    base_url: url,
                    token: String::new(),
                    timeout_secs: default_timeout(),
                };
            }
        }
    }

    if let (Some(value), GatewayConfig::Rest { token, .. }) = (token, &mut config.gateway) {
        *token = value;
    }
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|h| PathBuf::from(h).join(".config").join("examsession"))
}

/// Create a gateway instance from its configuration.
pub fn create_gateway(config: &GatewayConfig) -> Result<Arc<dyn ExamGateway>> {
    match config {
        GatewayConfig::Rest {
            base_url,
            token,
            timeout_secs,
        } => {
            if base_url.is_empty() {
                anyhow::bail!("gateway base_url is empty");
            }
            let credentials = Arc::new(StaticCredentials::new(token.clone()));
            let gateway = RestGateway::new(base_url, credentials, Some(*timeout_secs))
                .context("failed to create REST gateway")?;
            Ok(Arc::new(gateway))
        }
        GatewayConfig::Mock { duration_secs } => Ok(Arc::new(MockGateway::demo(
            Utc::now(),
            Duration::from_secs(*duration_secs),
        ))),
    }
}

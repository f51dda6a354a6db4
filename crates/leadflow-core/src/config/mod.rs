mod defaults;

#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::LeadflowError;
use defaults::*;

/// Top-level leadflow configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub leadflow: LeadflowConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub followup: FollowUpConfig,
    #[serde(default)]
    pub reminder: ReminderConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

/// General service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeadflowConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for LeadflowConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            data_dir: default_data_dir(),
            log_level: default_log_level(),
        }
    }
}

/// SQLite store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// How long a writer waits on a locked database before failing.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            max_connections: default_max_connections(),
            busy_timeout_secs: default_busy_timeout(),
        }
    }
}

/// Dispatch worker -- the periodic delivery loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Maximum due rows fetched per table per tick.
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,
    /// Failed attempts after which a row is deactivated as exhausted.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i64,
    #[serde(default = "default_delivery_timeout")]
    pub delivery_timeout_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_secs: default_poll_interval(),
            batch_size: default_batch_size(),
            max_attempts: default_max_attempts(),
            delivery_timeout_secs: default_delivery_timeout(),
        }
    }
}

/// Upper bound for `followup.grace_minutes` (one week).
pub const MAX_GRACE_MINUTES: i64 = 7 * 24 * 60;
/// Upper bound for `followup.attribution_window_hours` (one year).
pub const MAX_ATTRIBUTION_WINDOW_HOURS: i64 = 366 * 24;

/// Follow-up scheduling policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowUpConfig {
    /// Campaign used when a caller names none.
    #[serde(default = "default_campaign")]
    pub default_campaign: String,
    /// Computed times further in the past than this are clamped to now.
    #[serde(default = "default_grace_minutes")]
    pub grace_minutes: i64,
    /// Credit window for a reply to the last sent follow-up when the chain
    /// has no next item to bound it.
    #[serde(default = "default_attribution_window")]
    pub attribution_window_hours: i64,
}

impl Default for FollowUpConfig {
    fn default() -> Self {
        Self {
            default_campaign: default_campaign(),
            grace_minutes: default_grace_minutes(),
            attribution_window_hours: default_attribution_window(),
        }
    }
}

/// Appointment reminder settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Outbound transport selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// `"log"` (dry run) or `"webhook"`.
    #[serde(default = "default_transport_kind")]
    pub kind: String,
    #[serde(default)]
    pub webhook_url: String,
    /// Bearer token sent to the webhook. Falls back to `LEADFLOW_TRANSPORT_KEY`.
    #[serde(default)]
    pub api_key: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: default_transport_kind(),
            webhook_url: String::new(),
            api_key: String::new(),
        }
    }
}

/// HTTP API for event intake and dashboard projections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_api_host")]
    pub host: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Bearer token for API authentication. Empty = no auth (for local-only use).
    #[serde(default)]
    pub api_key: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_api_host(),
            port: default_api_port(),
            api_key: String::new(),
        }
    }
}

impl Config {
    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), LeadflowError> {
        if self.dispatch.poll_interval_secs == 0 {
            return Err(LeadflowError::Config(
                "dispatch.poll_interval_secs must be > 0".into(),
            ));
        }
        if self.dispatch.max_attempts < 1 {
            return Err(LeadflowError::Config(
                "dispatch.max_attempts must be >= 1".into(),
            ));
        }
        if self.dispatch.batch_size < 1 {
            return Err(LeadflowError::Config(
                "dispatch.batch_size must be >= 1".into(),
            ));
        }
        if !(0..=MAX_GRACE_MINUTES).contains(&self.followup.grace_minutes) {
            return Err(LeadflowError::Config(format!(
                "followup.grace_minutes must be between 0 and {MAX_GRACE_MINUTES}"
            )));
        }
        if !(0..=MAX_ATTRIBUTION_WINDOW_HOURS).contains(&self.followup.attribution_window_hours) {
            return Err(LeadflowError::Config(format!(
                "followup.attribution_window_hours must be between 0 and {MAX_ATTRIBUTION_WINDOW_HOURS}"
            )));
        }
        match self.transport.kind.as_str() {
            "log" => {}
            "webhook" if self.transport.webhook_url.is_empty() => {
                return Err(LeadflowError::Config(
                    "transport.kind = \"webhook\" requires transport.webhook_url".into(),
                ));
            }
            "webhook" => {}
            other => {
                return Err(LeadflowError::Config(format!(
                    "unknown transport kind: {other}"
                )));
            }
        }
        Ok(())
    }
}

/// Expand `~` to home directory.
pub fn shellexpand(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return format!("{}/{rest}", home.to_string_lossy());
        }
    }
    path.to_string()
}

/// Load configuration from a TOML file.
///
/// Falls back to defaults if the file does not exist.
pub fn load(path: &str) -> Result<Config, LeadflowError> {
    let path = Path::new(path);
    if !path.exists() {
        tracing::info!(
            "Config file not found at {}, using defaults",
            path.display()
        );
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| LeadflowError::Config(format!("failed to read {}: {}", path.display(), e)))?;

    let config: Config = toml::from_str(&content)
        .map_err(|e| LeadflowError::Config(format!("failed to parse config: {}", e)))?;

    config.validate()?;
    Ok(config)
}
